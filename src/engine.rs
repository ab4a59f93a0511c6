//! External engine process invocation.

use std::{
    fs::File,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::error::Error;

// -------------------------------------------------------------------------------------------------

/// Executable name of the ray-tracing engine.
pub const ENGINE_PROGRAM: &str = "bellhop.exe";

/// Base name of every config and result file inside a run directory.
pub const ENGINE_BASE_NAME: &str = "bellhop";

// -------------------------------------------------------------------------------------------------

/// Invokes the external ray-tracing engine for one prepared run directory.
///
/// Abstracted behind a trait so tests can substitute a fake engine that
/// drops pre-baked result files into the directory instead of spawning a
/// process.
pub trait EngineRunner: Send + Sync {
    /// Runs the engine with `work_dir` as current directory on the config
    /// file `<base_name>.env`. In debug mode engine stdout goes to
    /// `<base_name>.prt2` inside the run directory, otherwise it is
    /// discarded. A non-zero exit status is an [`Error::EngineFailure`].
    fn run(&self, work_dir: &Path, base_name: &str, debug: bool) -> Result<(), Error>;
}

// -------------------------------------------------------------------------------------------------

/// The default [`EngineRunner`]: spawns the engine binary found under the
/// configured installation path.
#[derive(Debug, Clone)]
pub struct ShellEngine {
    program: PathBuf,
}

impl ShellEngine {
    /// `engine_path` is the directory holding the engine binary; empty means
    /// "resolve through PATH".
    pub fn new(engine_path: impl Into<PathBuf>) -> Self {
        let engine_path: PathBuf = engine_path.into();
        let program = if engine_path.as_os_str().is_empty() {
            PathBuf::from(ENGINE_PROGRAM)
        } else {
            engine_path.join(ENGINE_PROGRAM)
        };
        Self { program }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl EngineRunner for ShellEngine {
    fn run(&self, work_dir: &Path, base_name: &str, debug: bool) -> Result<(), Error> {
        let stdout = if debug {
            let log_path = work_dir.join(format!("{base_name}.prt2"));
            Stdio::from(File::create(&log_path).map_err(|err| {
                Error::FileWriteError(log_path, err)
            })?)
        } else {
            Stdio::null()
        };

        log::debug!(
            "running '{}' on '{}' in {}",
            self.program.display(),
            base_name,
            work_dir.display()
        );

        let status = Command::new(&self.program)
            .arg(base_name)
            .current_dir(work_dir)
            .stdout(stdout)
            .stderr(Stdio::null())
            .status()
            .map_err(|err| Error::EngineFailure(format!("{}: {err}", self.program.display())))?;

        if !status.success() {
            return Err(Error::EngineFailure(format!(
                "{} exited with {status} in {}",
                self.program.display(),
                work_dir.display()
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
