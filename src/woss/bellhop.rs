//! Bellhop engine driver: config-file emission, engine invocation and
//! result-reader ownership for one link.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

use crate::{
    definitions::Definitions,
    engine::{EngineRunner, ShellEngine, ENGINE_BASE_NAME},
    environment::EnvironmentManager,
    error::Error,
    readers::{
        arr_ascii::ArrAsciiReader, arr_bin::ArrBinReader, shd::ShdReader, ArrSyntax,
        ReaderContext, ResReader, ShdSyntax,
    },
    types::{
        coord::CoordZ,
        pressure::Pressure,
        ssp::Ssp,
        time::{SimTime, Time},
        time_arr::TimeArr,
        transducer::{CustomTransducer, Transducer},
    },
    utils,
};

use super::{frequency_lower_bound, quantized_frequencies, transect::Transect, Woss};

// -------------------------------------------------------------------------------------------------

/// Guard-column factor for the range-dependent SSP matrix file: profiles are
/// replicated at ±`box_range · SSP_GUARD_RANGE_FACTOR` so the engine never
/// extrapolates out of domain.
pub const SSP_GUARD_RANGE_FACTOR: f64 = 1.05;

/// Relative perturbation applied to SSP and altimetry samples on Monte-Carlo
/// runs after the first.
const RUN_PERTURBATION_SIGMA: f64 = 1.0e-4;

// -------------------------------------------------------------------------------------------------

/// The engine's operation mode: which result kind it computes and in which
/// file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum BellhopMode {
    /// Arrivals written as ASCII (`'A'` ray option).
    #[default]
    #[strum(serialize = "A")]
    ArrivalsAscii,
    /// Arrivals written as binary (`'a'` ray option).
    #[strum(serialize = "a")]
    ArrivalsBinary,
    /// Coherent transmission-loss pressure field.
    #[strum(serialize = "C")]
    CoherentPressure,
    /// Incoherent transmission-loss pressure field.
    #[strum(serialize = "I")]
    IncoherentPressure,
    /// Semicoherent transmission-loss pressure field.
    #[strum(serialize = "S")]
    SemicoherentPressure,
}

impl BellhopMode {
    pub fn is_time_arr_mode(&self) -> bool {
        matches!(self, BellhopMode::ArrivalsAscii | BellhopMode::ArrivalsBinary)
    }

    pub fn is_pressure_mode(&self) -> bool {
        !self.is_time_arr_mode()
    }
}

/// Curve interpolation type of the bathymetry and altimetry files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum CurveType {
    #[strum(serialize = "C")]
    Curvilinear,
    #[default]
    #[strum(serialize = "L")]
    Linear,
}

/// How bathymetry transitions are written into the `.bty` file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum BathymetryWriteMethod {
    /// Every (range, depth) transition as a step, collapsing consecutive
    /// equal depths.
    #[default]
    #[strum(serialize = "D")]
    Discrete,
    /// Mid-point depths at each change, raw values at the endpoints.
    #[strum(serialize = "S")]
    Slope,
}

// -------------------------------------------------------------------------------------------------

/// Everything the creator resolves from its parameter containers for one
/// link, copied into the job before initialization.
#[derive(Debug, Clone)]
pub struct BellhopSettings {
    pub work_dir: PathBuf,
    pub mode: BellhopMode,
    /// Engine beam interpolation options appended to the mode in the ray
    /// options line (e.g. "B" for Gaussian beams).
    pub beam_options: String,
    pub bathymetry_type: CurveType,
    pub bathymetry_method: BathymetryWriteMethod,
    pub altimetry_type: CurveType,
    pub arr_syntax: ArrSyntax,
    pub shd_syntax: ShdSyntax,
    pub thorpe_attenuation: bool,
    pub total_range_steps: usize,
    pub total_transmitters: usize,
    pub tx_min_depth_offset: f64,
    pub tx_max_depth_offset: f64,
    pub total_rx_depths: usize,
    pub rx_min_depth_offset: f64,
    pub rx_max_depth_offset: f64,
    pub total_rx_ranges: usize,
    pub rx_min_range_offset: f64,
    pub rx_max_range_offset: f64,
    pub total_rays: usize,
    /// Minimum launch angle [decimal degrees].
    pub min_angle: f64,
    /// Maximum launch angle [decimal degrees].
    pub max_angle: f64,
    /// Ray-box depth [m]; defaulted from the environment when `None`.
    pub box_depth: Option<f64>,
    /// Ray-box range [m]; defaulted from the link range when `None`.
    pub box_range: Option<f64>,
    /// Depth steps of the transformed SSP matrix; 0 disables transformation.
    pub transform_ssp_depth_steps: usize,
    pub ssp_depth_precision: f64,
    pub transducer: Arc<Transducer>,
    pub beam_pattern: CustomTransducer,
    pub total_runs: usize,
    /// Seconds between re-initializations; negative disables evolution.
    pub evolution_time_quantum: f64,
    pub clean_work_dir: bool,
    pub debug: bool,
}

impl Default for BellhopSettings {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            mode: BellhopMode::ArrivalsAscii,
            beam_options: "B".into(),
            bathymetry_type: CurveType::Linear,
            bathymetry_method: BathymetryWriteMethod::Discrete,
            altimetry_type: CurveType::Linear,
            arr_syntax: ArrSyntax::V2,
            shd_syntax: ShdSyntax::V1,
            thorpe_attenuation: true,
            total_range_steps: 20,
            total_transmitters: 1,
            tx_min_depth_offset: 0.0,
            tx_max_depth_offset: 0.0,
            total_rx_depths: 2,
            rx_min_depth_offset: -0.1,
            rx_max_depth_offset: 0.1,
            total_rx_ranges: 2,
            rx_min_range_offset: -0.1,
            rx_max_range_offset: 0.1,
            total_rays: 1000,
            min_angle: -45.0,
            max_angle: 45.0,
            box_depth: None,
            box_range: None,
            transform_ssp_depth_steps: 0,
            ssp_depth_precision: Ssp::DEFAULT_DEPTH_PRECISION,
            transducer: Arc::new(Transducer::new_not_valid()),
            beam_pattern: CustomTransducer::default(),
            total_runs: 1,
            evolution_time_quantum: -1.0,
            clean_work_dir: false,
            debug: false,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// One per-link simulation job driving the Bellhop engine.
pub struct BellhopWoss {
    id: usize,
    settings: BellhopSettings,
    engine: Arc<dyn EngineRunner>,
    environment: EnvironmentManager,
    definitions: Definitions,

    tx: CoordZ,
    rx: CoordZ,
    start_time: Time,
    current_time: Time,
    end_time: Time,
    frequencies: Vec<f64>,

    bearing: f64,
    great_circle_distance: f64,
    total_distance: f64,

    transect: Transect,
    normalized_ssp: Vec<(f64, Ssp)>,
    min_normalized_ssp_depth: f64,
    max_normalized_ssp_depth: f64,
    norm_ssp_depth_steps: usize,
    box_depth: f64,
    box_range: f64,

    readers: Vec<(f64, Box<dyn ResReader>)>,

    initialized: bool,
    has_run_once: bool,
    is_running: bool,
}

impl BellhopWoss {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: CoordZ,
        rx: CoordZ,
        sim_time: SimTime,
        start_frequency: f64,
        end_frequency: f64,
        frequency_step: f64,
        settings: BellhopSettings,
        engine: Arc<dyn EngineRunner>,
        environment: EnvironmentManager,
        definitions: Definitions,
    ) -> Self {
        let frequencies = quantized_frequencies(start_frequency, end_frequency, frequency_step);
        Self {
            id: utils::unique_usize_id(),
            transect: Transect::new(settings.total_range_steps),
            settings,
            engine,
            environment,
            definitions,
            tx,
            rx,
            start_time: sim_time.start,
            current_time: sim_time.start,
            end_time: sim_time.end,
            frequencies,
            bearing: 0.0,
            great_circle_distance: 0.0,
            total_distance: 0.0,
            normalized_ssp: Vec::new(),
            min_normalized_ssp_depth: f64::INFINITY,
            max_normalized_ssp_depth: 0.0,
            norm_ssp_depth_steps: 0,
            box_depth: 0.0,
            box_range: 0.0,
            readers: Vec::new(),
            initialized: false,
            has_run_once: false,
            is_running: false,
        }
    }

    /// The shared "not valid" sentinel job: never initializable, all
    /// lookups return not-valid values.
    pub fn new_not_valid() -> Self {
        Self::new(
            CoordZ::new_not_valid(),
            CoordZ::new_not_valid(),
            SimTime::default(),
            0.0,
            0.0,
            0.0,
            BellhopSettings::default(),
            Arc::new(ShellEngine::new("")),
            EnvironmentManager::new(),
            Definitions::new(),
        )
    }

    pub fn settings(&self) -> &BellhopSettings {
        &self.settings
    }

    /// Inserts one frequency into the job's set, keeping it sorted and
    /// deduplicated.
    pub fn insert_frequency(&mut self, frequency: f64) -> &mut Self {
        if frequency > 0.0 {
            let pos = self.frequencies.partition_point(|&f| f < frequency);
            if self.frequencies.get(pos) != Some(&frequency) {
                self.frequencies.insert(pos, frequency);
            }
        }
        self
    }

    /// Inserts the quantized set `{start + i·step}` covering the band.
    pub fn insert_frequencies(&mut self, start: f64, end: f64, step: f64) -> &mut Self {
        for frequency in quantized_frequencies(start, end, step) {
            self.insert_frequency(frequency);
        }
        self
    }

    pub fn erase_frequency(&mut self, frequency: f64) -> &mut Self {
        self.frequencies.retain(|&f| f != frequency);
        self
    }

    pub fn clear_frequencies(&mut self) -> &mut Self {
        self.frequencies.clear();
        self
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    pub fn normalized_ssp(&self) -> &[(f64, Ssp)] {
        &self.normalized_ssp
    }

    pub fn transect(&self) -> &Transect {
        &self.transect
    }

    pub fn min_normalized_ssp_depth(&self) -> f64 {
        self.min_normalized_ssp_depth
    }

    pub fn max_normalized_ssp_depth(&self) -> f64 {
        self.max_normalized_ssp_depth
    }

    pub fn box_depth(&self) -> f64 {
        self.box_depth
    }

    pub fn box_range(&self) -> f64 {
        self.box_range
    }

    // ---------------------------------------------------------------------------------------------
    // SSP normalization

    /// Produces the range → SSP map the engine consumes, in one of three
    /// shapes: a transformed rectangular matrix, an already-rectangular
    /// matrix truncated at the sea floor, or a single-profile fallback.
    fn normalize_ssp(&mut self) -> Result<(), Error> {
        self.normalized_ssp.clear();

        let max_bathymetry = self.transect.max_bathymetry_depth();
        let transform_steps = self.settings.transform_ssp_depth_steps;

        if self.transect.all_ssp_transformable() && transform_steps > 0 {
            self.min_normalized_ssp_depth = self
                .transect
                .min_altimetry_depth()
                .min(self.transect.min_ssp_depth());
            self.max_normalized_ssp_depth =
                max_bathymetry.min(self.transect.max_ssp_depth());

            for &index in self.transect.ssp_unique_indexes() {
                let source = self.transect.ssp_vector()[index]
                    .as_ref()
                    .expect("unique index points at a stored profile");
                let transformed = source
                    .transform(
                        &self.tx.coord(),
                        self.min_normalized_ssp_depth,
                        self.max_normalized_ssp_depth,
                        transform_steps,
                    )
                    .ok_or_else(|| {
                        Error::EnvironmentError("SSP transform failed".into())
                    })?;
                self.normalized_ssp
                    .push((self.transect.range_vector()[index], transformed));
            }
        } else if self.transect.is_ssp_matrix_uniform() {
            for &index in self.transect.ssp_unique_indexes() {
                let source = self.transect.ssp_vector()[index]
                    .as_ref()
                    .expect("unique index points at a stored profile");
                self.normalized_ssp.push((
                    self.transect.range_vector()[index],
                    source.truncate(max_bathymetry.ceil()),
                ));
            }
            self.min_normalized_ssp_depth = self.transect.min_ssp_depth();
            self.max_normalized_ssp_depth = if max_bathymetry <= self.transect.max_ssp_depth() {
                max_bathymetry.ceil()
            } else {
                self.transect.max_ssp_depth()
            };
        } else {
            // range-dependence cannot be expressed: fall back to the first
            // profile only
            let first = self
                .transect
                .ssp_vector()
                .first()
                .and_then(|ssp| ssp.as_ref())
                .ok_or_else(|| Error::EnvironmentError("no SSP sampled".into()))?;
            self.normalized_ssp.push((0.0, first.clone()));
            self.min_normalized_ssp_depth = first.min_depth();
            self.max_normalized_ssp_depth = first.max_depth();
        }

        let first = &self.normalized_ssp[0].1;
        self.norm_ssp_depth_steps = first.len();
        if self.norm_ssp_depth_steps == 0 {
            return Err(Error::EnvironmentError("empty normalized SSP".into()));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Offset, angle and box sanitation

    fn check_depth_offsets(&mut self) {
        // a non-positive surface depth cannot bound source placement;
        // substitute a shallow reference depth
        let min_depth = if self.min_normalized_ssp_depth <= 0.0 {
            0.1
        } else {
            self.min_normalized_ssp_depth
        };
        let tx_floor = self.transect.coordz_vector()[0].depth();
        let rx_floor = self
            .transect
            .max_bathymetry_depth()
            .min(self.max_normalized_ssp_depth);

        let (tx_min, tx_max) = Self::clamp_depth_offsets(
            &self.tx,
            self.settings.tx_min_depth_offset,
            self.settings.tx_max_depth_offset,
            min_depth,
            tx_floor,
        );
        self.settings.tx_min_depth_offset = tx_min;
        self.settings.tx_max_depth_offset = tx_max;

        let (rx_min, rx_max) = Self::clamp_depth_offsets(
            &self.rx,
            self.settings.rx_min_depth_offset,
            self.settings.rx_max_depth_offset,
            min_depth,
            rx_floor,
        );
        self.settings.rx_min_depth_offset = rx_min;
        self.settings.rx_max_depth_offset = rx_max;
    }

    /// Clamps a depth-offset pair so the absolute depths stay inside
    /// `[min_depth, max_depth]` with a 2% safety margin.
    fn clamp_depth_offsets(
        coordinates: &CoordZ,
        mut min_offset: f64,
        mut max_offset: f64,
        min_depth: f64,
        max_depth: f64,
    ) -> (f64, f64) {
        let total_depth = max_depth - min_depth;
        let mut total_offset = (max_offset - min_offset).abs();
        if total_offset >= total_depth {
            total_offset = total_depth - total_depth / 50.0;
        }

        let depth = coordinates.depth();
        if depth + min_offset <= min_depth {
            min_offset = min_depth + min_depth / 50.0 - depth;
        }
        if depth + max_offset <= min_depth {
            max_offset = (min_depth + min_depth / 50.0 + total_offset) - depth;
        }
        if depth + min_offset >= max_depth {
            min_offset = max_depth - max_depth / 50.0 - total_offset - depth;
        }
        if depth + max_offset >= max_depth {
            max_offset = max_depth - max_depth / 50.0 - depth;
        }
        (min_offset, max_offset)
    }

    fn check_range_offsets(&mut self) {
        let distance = self.great_circle_distance;
        let mut min_offset = self.settings.rx_min_range_offset;
        let mut max_offset = self.settings.rx_max_range_offset;

        let mut total_offset = (max_offset - min_offset).abs();
        if total_offset >= 1.1 * distance {
            total_offset = 1.1 * distance - distance / 50.0;
        }

        if min_offset <= -distance {
            let value = -distance;
            min_offset = value - value / 1000.0;
        }
        if max_offset <= -distance {
            let value = -distance + total_offset;
            max_offset = value - value / 1000.0;
        }
        if min_offset >= 0.1 * distance {
            let value = 1.1 * distance - total_offset;
            min_offset = value - value / 1000.0;
        }
        if max_offset >= 0.1 * distance {
            let value = 0.1 * distance;
            max_offset = value - value / 1000.0;
        }

        self.settings.rx_min_range_offset = min_offset;
        self.settings.rx_max_range_offset = max_offset;
    }

    /// A pure vertical channel cannot bound launch angles by geometry:
    /// open the fan symmetrically to the widest configured angle.
    fn check_angles(&mut self) {
        if self.great_circle_distance == 0.0 && self.total_distance != 0.0 {
            let widest = self
                .settings
                .min_angle
                .abs()
                .max(self.settings.max_angle.abs());
            log::debug!(
                "BellhopWoss({}): vertical channel, opening angles to ±{widest}",
                self.id
            );
            self.settings.min_angle = -widest;
            self.settings.max_angle = widest;
        }
    }

    fn init_box(&mut self) {
        let environment_depth = self
            .transect
            .max_bathymetry_depth()
            .min(self.max_normalized_ssp_depth);
        let requested_range = self.great_circle_distance.max(self.total_distance)
            + self.settings.rx_max_range_offset;

        self.box_depth = self
            .settings
            .box_depth
            .unwrap_or(1.1 * environment_depth);
        self.box_range = self
            .settings
            .box_range
            .unwrap_or(1.1 * requested_range);
    }

    // ---------------------------------------------------------------------------------------------
    // Working directory and file paths

    fn run_dir(&self, frequency: f64, run: usize) -> PathBuf {
        self.settings
            .work_dir
            .join(format!("woss{}", self.id))
            .join(format!("freq{frequency}"))
            .join(format!("time{}", self.current_time.to_unix()))
            .join(format!("run{run}"))
    }

    fn run_file(&self, frequency: f64, run: usize, extension: &str) -> PathBuf {
        self.run_dir(frequency, run)
            .join(format!("{ENGINE_BASE_NAME}.{extension}"))
    }

    // ---------------------------------------------------------------------------------------------
    // Config file emission

    fn write_all_cfg_files(&mut self) -> Result<(), Error> {
        let frequencies = self.frequencies.clone();
        for frequency in frequencies {
            for run in 0..self.settings.total_runs {
                self.write_cfg_files(frequency, run)?;
            }
        }
        Ok(())
    }

    fn write_cfg_files(&mut self, frequency: f64, run: usize) -> Result<(), Error> {
        utils::make_work_dir(
            &self.settings.work_dir,
            self.id,
            frequency,
            self.current_time.to_unix(),
            run,
        )
        .map_err(|err| Error::FileWriteError(self.run_dir(frequency, run), err))?;

        self.write_bathymetry_file(frequency, run)?;

        if self.transect.altimetry().is_some() {
            self.write_altimetry_file(frequency, run)?;
        }
        if self.settings.transducer.is_valid() {
            self.write_beam_pattern_file(frequency, run)?;
        }

        let env_path = self.run_file(frequency, run, "env");
        let file = File::create(&env_path)
            .map_err(|err| Error::FileWriteError(env_path.clone(), err))?;
        let mut out = BufWriter::new(file);

        self.write_header(&mut out, frequency, run)?;
        self.write_normalized_ssp(&mut out, frequency, run)?;
        self.write_sediment(&mut out)?;
        self.write_transmitter(&mut out)?;
        self.write_receiver(&mut out)?;
        self.write_ray_options(&mut out)?;
        self.write_box(&mut out)?;

        out.flush()?;
        Ok(())
    }

    fn write_header<W: Write>(&self, out: &mut W, frequency: f64, run: usize) -> Result<(), Error> {
        writeln!(out, "'BELLHOP - woss id = {}; run = {}'", self.id, run)?;
        writeln!(out, "{frequency}    ! FREQUENCY [HZ]")?;
        writeln!(out, "1    ! NMEDIA")?;
        Ok(())
    }

    fn write_normalized_ssp<W: Write>(
        &self,
        out: &mut W,
        frequency: f64,
        run: usize,
    ) -> Result<(), Error> {
        let range_dependent = self.normalized_ssp.len() > 1;

        let mut options = String::from(if range_dependent { "QVW" } else { "CVW" });
        if self.settings.thorpe_attenuation {
            options.push('T');
        }
        if self.transect.altimetry().is_some() {
            options.push('*');
        }
        writeln!(out, "'{options}'    ! OPTIONS1")?;
        writeln!(
            out,
            "0 0.0 {}    ! NMESH SIGMAS Z(NSSP)",
            self.max_normalized_ssp_depth
        )?;

        // the env file carries the profile at the first range; later runs
        // see an independently perturbed copy
        let first_profile = if run > 0 {
            self.normalized_ssp[0]
                .1
                .randomize(RUN_PERTURBATION_SIGMA, self.definitions.random().as_ref())
        } else {
            self.normalized_ssp[0].1.clone()
        };

        for (index, (depth, speed)) in first_profile.iter().enumerate() {
            let depth = if index == 0 {
                depth.min(self.min_normalized_ssp_depth)
            } else {
                depth
            };
            writeln!(out, "{depth}  {speed}  /")?;
        }

        if range_dependent {
            self.write_ssp_matrix_file(frequency, run)?;
        }
        Ok(())
    }

    fn write_ssp_matrix_file(&self, frequency: f64, run: usize) -> Result<(), Error> {
        let path = self.run_file(frequency, run, "ssp");
        let file = File::create(&path).map_err(|err| Error::FileWriteError(path.clone(), err))?;
        let mut out = BufWriter::new(file);

        let profiles: Vec<Ssp> = self
            .normalized_ssp
            .iter()
            .map(|(_, ssp)| {
                if run > 0 {
                    ssp.randomize(RUN_PERTURBATION_SIGMA, self.definitions.random().as_ref())
                } else {
                    ssp.clone()
                }
            })
            .collect();

        let guard_range_km = self.box_range * SSP_GUARD_RANGE_FACTOR / 1000.0;

        writeln!(out, "{}", profiles.len() + 2)?;

        write!(out, "{}", -guard_range_km)?;
        for (range, _) in &self.normalized_ssp {
            write!(out, " {}", range / 1000.0)?;
        }
        writeln!(out, " {guard_range_km}")?;

        let first = profiles.first().expect("normalized map is never empty");
        let last = profiles.last().expect("normalized map is never empty");
        for step in 0..self.norm_ssp_depth_steps {
            let row_error = || Error::EnvironmentError("ragged normalized SSP matrix".into());
            write!(out, "{}", first.at(step).ok_or_else(row_error)?.1)?;
            for profile in &profiles {
                write!(out, " {}", profile.at(step).ok_or_else(row_error)?.1)?;
            }
            writeln!(out, " {}", last.at(step).ok_or_else(row_error)?.1)?;
        }

        out.flush()?;
        Ok(())
    }

    fn write_sediment<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        let sediment = self
            .transect
            .sediment()
            .ok_or_else(|| Error::EnvironmentError("no sediment sampled".into()))?;
        writeln!(out, "'A*' 0.0    ! BOTTOM TYPE")?;
        writeln!(
            out,
            "{} {}  /  ! {} BOTTOM TYPE",
            self.max_normalized_ssp_depth,
            sediment.to_engine_string(),
            sediment.name()
        )?;
        Ok(())
    }

    fn write_transmitter<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        let settings = &self.settings;
        writeln!(out, "{}    ! NUMBER OF SOURCES", settings.total_transmitters)?;
        if settings.total_transmitters == 1 {
            writeln!(
                out,
                "{}  /    ! SOURCE'S DEPTH",
                self.tx.depth() + settings.tx_min_depth_offset
            )?;
        } else {
            writeln!(
                out,
                "{}  {}  /    ! SOURCES' DEPTHS",
                self.tx.depth() + settings.tx_min_depth_offset,
                self.tx.depth() + settings.tx_max_depth_offset
            )?;
        }
        Ok(())
    }

    fn write_receiver<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        let settings = &self.settings;
        writeln!(out, "{}    ! NUMBER OF RX DEPTH(S)", settings.total_rx_depths)?;
        if settings.total_rx_depths == 1 {
            writeln!(
                out,
                "{}  /    ! RX'S DEPTH",
                self.rx.depth() + settings.rx_min_depth_offset
            )?;
        } else {
            writeln!(
                out,
                "{}  {}  /    ! RX'S DEPTHS",
                self.rx.depth() + settings.rx_min_depth_offset,
                self.rx.depth() + settings.rx_max_depth_offset
            )?;
        }

        writeln!(out, "{}    ! NUMBER OF RX RANGE(S)", settings.total_rx_ranges)?;
        let min_range_km =
            (self.great_circle_distance + settings.rx_min_range_offset) / 1000.0;
        let max_range_km =
            (self.great_circle_distance + settings.rx_max_range_offset) / 1000.0;
        if settings.total_rx_ranges == 1 {
            writeln!(out, "{min_range_km}  /    ! RX'S RANGE")?;
        } else {
            writeln!(out, "{min_range_km}  {max_range_km}  /    ! RX'S RANGES")?;
        }
        Ok(())
    }

    fn write_ray_options<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        let settings = &self.settings;
        let pattern_marker = if settings.transducer.is_valid() { "*" } else { "" };
        writeln!(
            out,
            "'{}{}{}'    ! RAY OPTIONS",
            settings.mode, settings.beam_options, pattern_marker
        )?;
        writeln!(out, "{}    ! NUMBER OF RAYS", settings.total_rays)?;
        writeln!(
            out,
            "{} {} /    ! START, END ANGLES",
            settings.min_angle, settings.max_angle
        )?;
        Ok(())
    }

    fn write_box<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        writeln!(
            out,
            "0.0 {} {} ,    ! RAY-STEP , BOX DEPTH, BOX RANGE",
            self.box_depth,
            self.box_range / 1000.0
        )?;
        Ok(())
    }

    fn write_bathymetry_file(&self, frequency: f64, run: usize) -> Result<(), Error> {
        let path = self.run_file(frequency, run, "bty");
        let file = File::create(&path).map_err(|err| Error::FileWriteError(path.clone(), err))?;
        let mut out = BufWriter::new(file);

        let samples: Vec<(f64, f64)> = self
            .transect
            .range_vector()
            .iter()
            .zip(self.transect.coordz_vector())
            .map(|(&range, coord)| {
                (range, coord.depth().min(self.max_normalized_ssp_depth))
            })
            .collect();

        let rows = match self.settings.bathymetry_method {
            BathymetryWriteMethod::Discrete => collapse_discrete(&samples),
            BathymetryWriteMethod::Slope => collapse_slope(&samples),
        };

        writeln!(out, "'{}'", self.settings.bathymetry_type)?;
        writeln!(out, "{}", rows.len())?;
        for (range, depth) in rows {
            writeln!(out, "{} {}", range / 1000.0, depth)?;
        }
        out.flush()?;
        Ok(())
    }

    fn write_altimetry_file(&self, frequency: f64, run: usize) -> Result<(), Error> {
        let path = self.run_file(frequency, run, "ati");
        let file = File::create(&path).map_err(|err| Error::FileWriteError(path.clone(), err))?;
        let mut out = BufWriter::new(file);

        let altimetry = self
            .transect
            .altimetry()
            .expect("caller checked altimetry presence");
        let surface = if run > 0 {
            altimetry.randomize(RUN_PERTURBATION_SIGMA, self.definitions.random().as_ref())
        } else {
            altimetry.clone()
        };

        let samples: Vec<(f64, f64)> = surface.iter().collect();
        let rows = collapse_discrete(&samples);

        writeln!(out, "'{}'", self.settings.altimetry_type)?;
        writeln!(out, "{}", rows.len())?;
        for (range, depth) in rows {
            writeln!(out, "{} {}", range / 1000.0, depth)?;
        }
        out.flush()?;
        Ok(())
    }

    fn write_beam_pattern_file(&self, frequency: f64, run: usize) -> Result<(), Error> {
        let path = self.run_file(frequency, run, "sbp");
        let file = File::create(&path).map_err(|err| Error::FileWriteError(path.clone(), err))?;
        let mut out = BufWriter::new(file);

        let pattern = &self.settings.beam_pattern;
        self.settings.transducer.write_vertical_pattern(
            &mut out,
            &self.tx,
            &self.rx,
            pattern.initial_bearing,
            pattern.vertical_rotation,
            pattern.horizontal_rotation,
            pattern.multiply_constant,
            pattern.add_constant,
        )?;
        out.flush()?;
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Result readers and lookups

    fn result_extension(&self) -> &'static str {
        if self.settings.mode.is_time_arr_mode() {
            "arr"
        } else {
            "shd"
        }
    }

    fn init_res_reader(&mut self, frequency: f64, run: usize) -> Result<(), Error> {
        let file = self.run_file(frequency, run, self.result_extension());

        let position = self
            .readers
            .iter()
            .position(|(reader_frequency, _)| *reader_frequency == frequency);
        let position = match position {
            Some(position) => {
                self.readers[position].1.set_file(file);
                position
            }
            None => {
                let context = ReaderContext {
                    job_id: self.id,
                    file,
                    arr_syntax: self.settings.arr_syntax,
                    shd_syntax: self.settings.shd_syntax,
                    delay_resolution: self.definitions.time_arr_delay_resolution(),
                    debug: self.settings.debug,
                };
                let reader: Box<dyn ResReader> = match self.settings.mode {
                    BellhopMode::ArrivalsAscii => Box::new(ArrAsciiReader::new(context)),
                    BellhopMode::ArrivalsBinary => Box::new(ArrBinReader::new(context)),
                    _ => Box::new(ShdReader::new(context)),
                };
                let pos = self
                    .readers
                    .partition_point(|(reader_frequency, _)| *reader_frequency < frequency);
                self.readers.insert(pos, (frequency, reader));
                pos
            }
        };

        self.readers[position].1.initialize()
    }

    fn reader_for(&self, frequency: f64) -> Option<&dyn ResReader> {
        if self.readers.is_empty() {
            return None;
        }
        let frequencies: Vec<f64> = self.readers.iter().map(|(f, _)| *f).collect();
        let index = frequency_lower_bound(&frequencies, frequency);
        Some(self.readers[index].1.as_ref())
    }

    /// Clamps a lookup against the job's frequency set and rx grid bounds.
    fn check_boundaries(
        &self,
        frequency: f64,
        tx_depth: f64,
        rx_depth: f64,
        rx_range: f64,
    ) -> (f64, f64, f64, f64) {
        let settings = &self.settings;
        let frequency = frequency.clamp(
            *self.frequencies.first().unwrap_or(&frequency),
            *self.frequencies.last().unwrap_or(&frequency),
        );
        let tx_depth = tx_depth.clamp(
            self.tx.depth() + settings.tx_min_depth_offset,
            (self.tx.depth() + settings.tx_max_depth_offset)
                .max(self.tx.depth() + settings.tx_min_depth_offset),
        );
        let rx_depth = rx_depth.clamp(
            self.rx.depth() + settings.rx_min_depth_offset,
            (self.rx.depth() + settings.rx_max_depth_offset)
                .max(self.rx.depth() + settings.rx_min_depth_offset),
        );
        let rx_range = rx_range.clamp(
            self.great_circle_distance + settings.rx_min_range_offset,
            (self.great_circle_distance + settings.rx_max_range_offset)
                .max(self.great_circle_distance + settings.rx_min_range_offset),
        );
        (frequency, tx_depth, rx_depth, rx_range)
    }
}

impl Woss for BellhopWoss {
    fn id(&self) -> usize {
        self.id
    }

    fn is_valid(&self) -> bool {
        let settings = &self.settings;
        self.start_time.is_valid()
            && self.end_time.is_valid()
            && self.tx.is_valid()
            && self.rx.is_valid()
            && !self.frequencies.is_empty()
            && settings.total_range_steps > 0
            && settings.total_transmitters > 0
            && settings.total_rx_depths > 0
            && settings.total_rx_ranges > 0
            && settings.total_rays > 0
            && settings.min_angle <= settings.max_angle
    }

    fn initialize(&mut self) -> Result<(), Error> {
        if !self.is_valid() {
            return Err(Error::InvalidConfiguration(format!(
                "BellhopWoss({}) is not completely configured",
                self.id
            )));
        }

        self.great_circle_distance = self.tx.great_circle_distance(&self.rx);
        self.total_distance = self.tx.cartesian_distance(&self.rx);
        self.bearing = self.tx.initial_bearing(&self.rx);

        log::debug!(
            "BellhopWoss({}): tx = {}, rx = {}, gc distance = {:.2} m, distance = {:.2} m",
            self.id,
            self.tx,
            self.rx,
            self.great_circle_distance,
            self.total_distance
        );

        // a re-initialization invalidates every parsed result
        self.readers.clear();

        self.transect
            .set_total_range_steps(self.settings.total_range_steps);
        let (tx, rx, bearing, distance, time) = (
            self.tx,
            self.rx,
            self.bearing,
            self.great_circle_distance,
            self.current_time,
        );
        let environment = self.environment.clone();
        let definitions = self.definitions.clone();
        self.transect
            .initialize(&tx, &rx, bearing, distance, &time, &environment, &definitions)?;

        self.normalize_ssp()?;
        self.check_depth_offsets();
        self.check_range_offsets();
        self.check_angles();
        self.init_box();
        self.write_all_cfg_files()?;

        self.initialized = true;
        Ok(())
    }

    fn run(&mut self) -> Result<(), Error> {
        if !self.initialized {
            self.initialize()?;
        }
        self.is_running = true;

        let frequencies = self.frequencies.clone();
        for frequency in frequencies {
            for run in 0..self.settings.total_runs {
                let dir = self.run_dir(frequency, run);
                log::debug!(
                    "BellhopWoss({}): engine run, frequency = {frequency}, run = {run}",
                    self.id
                );

                if let Err(err) =
                    self.engine
                        .run(&dir, ENGINE_BASE_NAME, self.settings.debug)
                {
                    log::error!("BellhopWoss({}): engine aborted: {err}", self.id);
                    self.is_running = false;
                    return Err(err);
                }
                if let Err(err) = self.init_res_reader(frequency, run) {
                    log::error!("BellhopWoss({}): result parsing failed: {err}", self.id);
                    self.is_running = false;
                    return Err(err);
                }
            }
        }

        self.is_running = false;
        self.has_run_once = true;
        Ok(())
    }

    fn time_evolve(&mut self, time: &Time) -> bool {
        if self.settings.evolution_time_quantum < 0.0 {
            return !self.has_run_once;
        }
        if !time.is_valid() {
            return false;
        }

        let mut time = *time;
        if time > self.end_time {
            time = self.end_time;
        } else if time < self.start_time {
            time = self.start_time;
        }

        if time == self.current_time {
            return !self.has_run_once;
        }

        let difference = time.diff_seconds(&self.current_time).abs();
        log::debug!(
            "BellhopWoss({}): time difference = {difference} s, quantum = {} s",
            self.id,
            self.settings.evolution_time_quantum
        );

        if self.settings.evolution_time_quantum == 0.0
            || difference >= self.settings.evolution_time_quantum
        {
            self.current_time = time;
            if let Err(err) = self.initialize() {
                log::error!("BellhopWoss({}): re-initialization failed: {err}", self.id);
                return false;
            }
            if let Some(altimetry) = self.transect.altimetry() {
                let evolved = altimetry.time_evolve(&time);
                self.transect.set_altimetry(Some(evolved));
            }
            return true;
        }

        !self.has_run_once
    }

    fn is_running(&self) -> bool {
        self.is_running
    }

    fn has_run_once(&self) -> bool {
        self.has_run_once
    }

    fn tx(&self) -> CoordZ {
        self.tx
    }

    fn rx(&self) -> CoordZ {
        self.rx
    }

    fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    fn great_circle_distance(&self) -> f64 {
        self.great_circle_distance
    }

    fn total_distance(&self) -> f64 {
        self.total_distance
    }

    fn bearing(&self) -> f64 {
        self.bearing
    }

    fn get_pressure(
        &self,
        frequency: f64,
        tx_depth: f64,
        rx_depth: f64,
        rx_range: f64,
    ) -> Pressure {
        let (frequency, tx_depth, rx_depth, rx_range) =
            self.check_boundaries(frequency, tx_depth, rx_depth, rx_range);
        match self.reader_for(frequency) {
            Some(reader) => {
                reader.read_pressure(tx_depth, rx_depth, rx_range)
                    / self.settings.total_runs as f64
            }
            None => Pressure::new_not_valid(),
        }
    }

    fn get_avg_pressure(
        &self,
        frequency: f64,
        tx_depth: f64,
        start_rx_depth: f64,
        start_rx_range: f64,
        end_rx_depth: f64,
        end_rx_range: f64,
    ) -> Pressure {
        let (frequency, tx_depth, start_rx_depth, start_rx_range) =
            self.check_boundaries(frequency, tx_depth, start_rx_depth, start_rx_range);
        let (_, _, end_rx_depth, end_rx_range) =
            self.check_boundaries(frequency, tx_depth, end_rx_depth, end_rx_range);
        match self.reader_for(frequency) {
            Some(reader) => {
                reader.read_avg_pressure(
                    tx_depth,
                    start_rx_depth,
                    start_rx_range,
                    end_rx_depth,
                    end_rx_range,
                ) / self.settings.total_runs as f64
            }
            None => Pressure::new_not_valid(),
        }
    }

    fn get_time_arr(
        &self,
        frequency: f64,
        tx_depth: f64,
        rx_depth: f64,
        rx_range: f64,
    ) -> TimeArr {
        let (frequency, tx_depth, rx_depth, rx_range) =
            self.check_boundaries(frequency, tx_depth, rx_depth, rx_range);
        match self.reader_for(frequency) {
            Some(reader) => {
                let mut arr = reader.read_time_arr(tx_depth, rx_depth, rx_range);
                arr.divide(self.settings.total_runs as f64);
                arr
            }
            None => TimeArr::new_not_valid(),
        }
    }
}

impl Drop for BellhopWoss {
    fn drop(&mut self) {
        if self.settings.clean_work_dir {
            if let Err(err) = utils::remove_work_dir(&self.settings.work_dir, self.id) {
                log::warn!("BellhopWoss({}): failed to clean work dir: {err}", self.id);
            }
        }
    }
}

impl std::fmt::Debug for BellhopWoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BellhopWoss")
            .field("id", &self.id)
            .field("tx", &self.tx)
            .field("rx", &self.rx)
            .field("frequencies", &self.frequencies)
            .field("initialized", &self.initialized)
            .field("has_run_once", &self.has_run_once)
            .finish_non_exhaustive()
    }
}

// -------------------------------------------------------------------------------------------------

/// Collapses consecutive equal depths, keeping the last sample of each run
/// before a change.
fn collapse_discrete(samples: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut rows = Vec::with_capacity(samples.len());
    let mut prev_depth = f64::NAN;
    let mut has_pending = false;

    for (index, &(range, depth)) in samples.iter().enumerate() {
        if depth == prev_depth {
            has_pending = true;
            continue;
        }
        if has_pending {
            has_pending = false;
            rows.push(samples[index - 1]);
        }
        prev_depth = depth;
        rows.push((range, depth));
    }
    rows
}

/// Mid-point depths at every change, raw values at the two endpoints.
fn collapse_slope(samples: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut rows = Vec::with_capacity(samples.len());
    let mut prev_depth = f64::NAN;

    for (index, &(range, depth)) in samples.iter().enumerate() {
        if depth != prev_depth && index > 0 && !prev_depth.is_nan() {
            rows.push((range, (prev_depth + depth) / 2.0));
        } else if index == 0 || index == samples.len() - 1 {
            rows.push((range, depth));
        }
        prev_depth = depth;
    }
    rows
}

// -------------------------------------------------------------------------------------------------
