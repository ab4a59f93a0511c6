use std::{error, fmt, io, path::PathBuf};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by hydroray.
#[derive(Debug)]
pub enum Error {
    /// A required environmental provider returned no or an invalid value.
    EnvironmentError(String),
    /// A per-link job is not completely configured and cannot be initialized.
    InvalidConfiguration(String),
    /// An engine input file could not be created or written.
    FileWriteError(PathBuf, io::Error),
    /// An engine result file is missing or malformed.
    ResultFileError(PathBuf, String),
    /// The external engine process could not be spawned or exited with a
    /// non-zero status.
    EngineFailure(String),
    /// A time value outside the job's simulation window was rejected.
    TimeError(String),
    IoError(io::Error),
    SendError,
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvironmentError(what) => write!(f, "Invalid environment data: {what}"),
            Self::InvalidConfiguration(what) => write!(f, "Incomplete configuration: {what}"),
            Self::FileWriteError(path, err) => {
                write!(f, "Failed to write '{}': {err}", path.display())
            }
            Self::ResultFileError(path, what) => {
                write!(f, "Malformed result file '{}': {what}", path.display())
            }
            Self::EngineFailure(what) => write!(f, "Engine invocation failed: {what}"),
            Self::TimeError(what) => write!(f, "Invalid time value: {what}"),
            Self::IoError(err) => err.fmt(f),
            Self::SendError => write!(f, "Failed to send message into a channel"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for Error {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        Error::SendError
    }
}
