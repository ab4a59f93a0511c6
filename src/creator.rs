//! Woss factories: materialize fully configured per-link jobs from the
//! parameter containers.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock},
};

use crate::{
    container::CreatorContainer,
    definitions::Definitions,
    engine::{EngineRunner, ShellEngine},
    environment::EnvironmentManager,
    error::Error,
    readers::{ArrSyntax, ShdSyntax},
    types::{
        coord::CoordZ,
        ssp::Ssp,
        time::SimTime,
        transducer::TransducerRegistry,
    },
    woss::{
        bellhop::{
            BathymetryWriteMethod, BellhopMode, BellhopSettings, BellhopWoss, CurveType,
        },
        Woss,
    },
};

// -------------------------------------------------------------------------------------------------

/// Minimum/maximum ray launch angles [decimal degrees], stored per link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomAngles {
    pub min_angle: f64,
    pub max_angle: f64,
}

impl CustomAngles {
    pub fn new(min_angle: f64, max_angle: f64) -> Self {
        Self {
            min_angle,
            max_angle,
        }
    }
}

impl Default for CustomAngles {
    fn default() -> Self {
        Self {
            min_angle: -45.0,
            max_angle: 45.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A shared, lazily created Woss handle.
pub type SharedWoss = Arc<Mutex<Box<dyn Woss>>>;

/// Materializes a fully configured [`Woss`] for a (tx, rx, frequency band)
/// triple, reading every tunable from the per-link parameter containers.
pub trait WossCreator: Send + Sync {
    /// Allocates, configures and initializes a fresh job. The returned job
    /// is owned by the caller (normally the manager).
    fn create_woss(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
    ) -> Result<Box<dyn Woss>, Error>;

    /// The simulation time window applying to the link.
    fn sim_time(&self, tx: &CoordZ, rx: &CoordZ) -> SimTime;

    /// The frequency quantization step applying to the link [Hz].
    fn frequency_step(&self, tx: &CoordZ, rx: &CoordZ) -> f64;

    /// The shared never-valid sentinel job, for lookups that must yield an
    /// object without a valid configuration.
    fn not_valid_woss(&self) -> SharedWoss;
}

// -------------------------------------------------------------------------------------------------

/// The [`WossCreator`] for the Bellhop engine driver.
///
/// All per-link tunables live in public [`CreatorContainer`] fields;
/// configure them (usually through their `access_all` defaults) before
/// handing the creator to a manager.
pub struct BellhopCreator {
    pub work_dir: PathBuf,
    pub engine: Arc<dyn EngineRunner>,
    pub environment: EnvironmentManager,
    pub definitions: Definitions,
    pub transducers: Arc<TransducerRegistry>,

    pub arr_syntax: ArrSyntax,
    pub shd_syntax: ShdSyntax,
    pub thorpe_attenuation: bool,
    pub clean_work_dir: bool,
    pub debug: bool,

    pub sim_times: CreatorContainer<SimTime>,
    pub frequency_steps: CreatorContainer<f64>,
    pub evolution_time_quanta: CreatorContainer<f64>,
    pub total_runs: CreatorContainer<i64>,
    pub modes: CreatorContainer<BellhopMode>,
    pub beam_options: CreatorContainer<String>,
    pub bathymetry_types: CreatorContainer<CurveType>,
    pub bathymetry_methods: CreatorContainer<BathymetryWriteMethod>,
    pub altimetry_types: CreatorContainer<CurveType>,
    pub angles: CreatorContainer<CustomAngles>,
    pub total_range_steps: CreatorContainer<i64>,
    pub total_transmitters: CreatorContainer<i64>,
    pub tx_min_depth_offsets: CreatorContainer<f64>,
    pub tx_max_depth_offsets: CreatorContainer<f64>,
    pub total_rx_depths: CreatorContainer<i64>,
    pub rx_min_depth_offsets: CreatorContainer<f64>,
    pub rx_max_depth_offsets: CreatorContainer<f64>,
    pub total_rx_ranges: CreatorContainer<i64>,
    pub rx_min_range_offsets: CreatorContainer<f64>,
    pub rx_max_range_offsets: CreatorContainer<f64>,
    pub total_rays: CreatorContainer<i64>,
    pub box_depths: CreatorContainer<Option<f64>>,
    pub box_ranges: CreatorContainer<Option<f64>>,
    pub transform_ssp_depth_steps: CreatorContainer<i64>,
    pub ssp_depth_precisions: CreatorContainer<f64>,
    pub transducer_params: CreatorContainer<crate::types::transducer::CustomTransducer>,

    woss_not_valid: OnceLock<SharedWoss>,
}

impl BellhopCreator {
    /// Creates a creator with engine-agnostic defaults in every container's
    /// wildcard slot; only the simulation time window must still be set.
    pub fn new(work_dir: impl Into<PathBuf>, engine_path: impl Into<PathBuf>) -> Self {
        let mut creator = Self {
            work_dir: work_dir.into(),
            engine: Arc::new(ShellEngine::new(engine_path.into())),
            environment: EnvironmentManager::new(),
            definitions: Definitions::new(),
            transducers: Arc::new(TransducerRegistry::new()),
            arr_syntax: ArrSyntax::V2,
            shd_syntax: ShdSyntax::V1,
            thorpe_attenuation: true,
            clean_work_dir: false,
            debug: false,
            sim_times: CreatorContainer::new(),
            frequency_steps: CreatorContainer::new(),
            evolution_time_quanta: CreatorContainer::new(),
            total_runs: CreatorContainer::new(),
            modes: CreatorContainer::new(),
            beam_options: CreatorContainer::new(),
            bathymetry_types: CreatorContainer::new(),
            bathymetry_methods: CreatorContainer::new(),
            altimetry_types: CreatorContainer::new(),
            angles: CreatorContainer::new(),
            total_range_steps: CreatorContainer::new(),
            total_transmitters: CreatorContainer::new(),
            tx_min_depth_offsets: CreatorContainer::new(),
            tx_max_depth_offsets: CreatorContainer::new(),
            total_rx_depths: CreatorContainer::new(),
            rx_min_depth_offsets: CreatorContainer::new(),
            rx_max_depth_offsets: CreatorContainer::new(),
            total_rx_ranges: CreatorContainer::new(),
            rx_min_range_offsets: CreatorContainer::new(),
            rx_max_range_offsets: CreatorContainer::new(),
            total_rays: CreatorContainer::new(),
            box_depths: CreatorContainer::new(),
            box_ranges: CreatorContainer::new(),
            transform_ssp_depth_steps: CreatorContainer::new(),
            ssp_depth_precisions: CreatorContainer::new(),
            transducer_params: CreatorContainer::new(),
            woss_not_valid: OnceLock::new(),
        };

        let defaults = BellhopSettings::default();
        // an unset step quantizes the band to its start frequency only
        *creator.frequency_steps.access_all() = f64::MAX;
        *creator.evolution_time_quanta.access_all() = -1.0;
        *creator.total_runs.access_all() = 1;
        *creator.modes.access_all() = defaults.mode;
        *creator.beam_options.access_all() = defaults.beam_options.clone();
        *creator.bathymetry_types.access_all() = defaults.bathymetry_type;
        *creator.bathymetry_methods.access_all() = defaults.bathymetry_method;
        *creator.altimetry_types.access_all() = defaults.altimetry_type;
        *creator.angles.access_all() =
            CustomAngles::new(defaults.min_angle, defaults.max_angle);
        *creator.total_range_steps.access_all() = defaults.total_range_steps as i64;
        *creator.total_transmitters.access_all() = defaults.total_transmitters as i64;
        *creator.tx_min_depth_offsets.access_all() = defaults.tx_min_depth_offset;
        *creator.tx_max_depth_offsets.access_all() = defaults.tx_max_depth_offset;
        *creator.total_rx_depths.access_all() = defaults.total_rx_depths as i64;
        *creator.rx_min_depth_offsets.access_all() = defaults.rx_min_depth_offset;
        *creator.rx_max_depth_offsets.access_all() = defaults.rx_max_depth_offset;
        *creator.total_rx_ranges.access_all() = defaults.total_rx_ranges as i64;
        *creator.rx_min_range_offsets.access_all() = defaults.rx_min_range_offset;
        *creator.rx_max_range_offsets.access_all() = defaults.rx_max_range_offset;
        *creator.total_rays.access_all() = defaults.total_rays as i64;
        *creator.transform_ssp_depth_steps.access_all() = 0;
        *creator.ssp_depth_precisions.access_all() = Ssp::DEFAULT_DEPTH_PRECISION;
        *creator.transducer_params.access_all() =
            crate::types::transducer::CustomTransducer::default();

        creator
    }

    fn settings_for(&self, tx: &CoordZ, rx: &CoordZ) -> BellhopSettings {
        let angles = self.angles.get(tx, rx);
        let beam_pattern = self.transducer_params.get_oriented(tx, rx);
        let transducer = self.transducers.get(&beam_pattern.type_name);

        BellhopSettings {
            work_dir: self.work_dir.clone(),
            mode: self.modes.get(tx, rx),
            beam_options: self.beam_options.get(tx, rx),
            bathymetry_type: self.bathymetry_types.get(tx, rx),
            bathymetry_method: self.bathymetry_methods.get(tx, rx),
            altimetry_type: self.altimetry_types.get(tx, rx),
            arr_syntax: self.arr_syntax,
            shd_syntax: self.shd_syntax,
            thorpe_attenuation: self.thorpe_attenuation,
            total_range_steps: self.total_range_steps.get(tx, rx).max(0) as usize,
            total_transmitters: self.total_transmitters.get(tx, rx).max(0) as usize,
            tx_min_depth_offset: self.tx_min_depth_offsets.get(tx, rx),
            tx_max_depth_offset: self.tx_max_depth_offsets.get(tx, rx),
            total_rx_depths: self.total_rx_depths.get(tx, rx).max(0) as usize,
            rx_min_depth_offset: self.rx_min_depth_offsets.get(tx, rx),
            rx_max_depth_offset: self.rx_max_depth_offsets.get(tx, rx),
            total_rx_ranges: self.total_rx_ranges.get(tx, rx).max(0) as usize,
            rx_min_range_offset: self.rx_min_range_offsets.get(tx, rx),
            rx_max_range_offset: self.rx_max_range_offsets.get(tx, rx),
            total_rays: self.total_rays.get(tx, rx).max(0) as usize,
            min_angle: angles.min_angle,
            max_angle: angles.max_angle,
            box_depth: self.box_depths.get(tx, rx),
            box_range: self.box_ranges.get(tx, rx),
            transform_ssp_depth_steps: self.transform_ssp_depth_steps.get(tx, rx).max(0)
                as usize,
            ssp_depth_precision: self.ssp_depth_precisions.get(tx, rx),
            transducer,
            beam_pattern,
            total_runs: self.total_runs.get(tx, rx).max(1) as usize,
            evolution_time_quantum: self.evolution_time_quanta.get(tx, rx),
            clean_work_dir: self.clean_work_dir,
            debug: self.debug,
        }
    }
}

impl WossCreator for BellhopCreator {
    fn create_woss(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
    ) -> Result<Box<dyn Woss>, Error> {
        let sim_time = self.sim_time(tx, rx);
        if !sim_time.is_valid() {
            return Err(Error::InvalidConfiguration(format!(
                "no valid simulation time window for tx = {tx}, rx = {rx}"
            )));
        }

        let mut woss = BellhopWoss::new(
            *tx,
            *rx,
            sim_time,
            start_frequency,
            end_frequency,
            self.frequency_step(tx, rx),
            self.settings_for(tx, rx),
            self.engine.clone(),
            self.environment.clone(),
            self.definitions.clone(),
        );
        woss.initialize()?;

        log::debug!(
            "BellhopCreator: created woss {} for tx = {tx}, rx = {rx}, band = [{start_frequency}, {end_frequency}]",
            woss.id()
        );
        Ok(Box::new(woss))
    }

    fn sim_time(&self, tx: &CoordZ, rx: &CoordZ) -> SimTime {
        self.sim_times.get(tx, rx)
    }

    fn frequency_step(&self, tx: &CoordZ, rx: &CoordZ) -> f64 {
        let step = self.frequency_steps.get(tx, rx);
        if step <= 0.0 {
            f64::MAX
        } else {
            step
        }
    }

    fn not_valid_woss(&self) -> SharedWoss {
        self.woss_not_valid
            .get_or_init(|| {
                Arc::new(Mutex::new(
                    Box::new(BellhopWoss::new_not_valid()) as Box<dyn Woss>
                ))
            })
            .clone()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::container::LinkKey;
    use crate::types::time::Time;

    use super::*;

    #[test]
    fn frequency_step_never_degenerates() {
        let creator = BellhopCreator::new("/tmp/woss", "");
        let a = CoordZ::new(45.0, 13.0, 10.0);
        let b = CoordZ::new(45.1, 13.1, 20.0);
        assert_eq!(creator.frequency_step(&a, &b), f64::MAX);
    }

    #[test]
    fn not_valid_woss_is_shared_and_invalid() {
        let creator = BellhopCreator::new("/tmp/woss", "");
        let woss = creator.not_valid_woss();
        assert!(!woss.lock().unwrap().is_valid());
        let again = creator.not_valid_woss();
        assert!(Arc::ptr_eq(&woss, &again));
    }

    #[test]
    fn create_requires_a_time_window() {
        let creator = BellhopCreator::new("/tmp/woss", "");
        let a = CoordZ::new(45.0, 13.0, 10.0);
        let b = CoordZ::new(45.1, 13.1, 20.0);
        let result = creator.create_woss(&a, &b, 10_000.0, 10_000.0);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn per_region_ray_counts_resolve_through_containers() {
        use crate::container::{PointRegion, Region};

        let mut creator = BellhopCreator::new("/tmp/woss", "");
        let in_region = CoordZ::new(45.0, 13.0, 10.0);
        let outside = CoordZ::new(40.0, 10.0, 10.0);
        let region: Arc<dyn Region> = Arc::new(PointRegion::new(in_region, 10_000.0));

        *creator.total_rays.access_all() = 2000;
        creator
            .total_rays
            .replace(5000, LinkKey::Region(region), LinkKey::Any);

        let anywhere = CoordZ::new(45.5, 13.5, 30.0);
        let settings = creator.settings_for(&in_region, &anywhere);
        assert_eq!(settings.total_rays, 5000);
        let settings = creator.settings_for(&outside, &anywhere);
        assert_eq!(settings.total_rays, 2000);
    }

    #[test]
    fn sim_time_window_from_wildcard() {
        let mut creator = BellhopCreator::new("/tmp/woss", "");
        let window = SimTime::new(
            Time::new(2012, 6, 1, 0, 0, 0),
            Time::new(2012, 6, 2, 0, 0, 0),
        );
        *creator.sim_times.access_all() = window;

        let a = CoordZ::new(45.0, 13.0, 10.0);
        let b = CoordZ::new(45.1, 13.1, 20.0);
        assert_eq!(creator.sim_time(&a, &b), window);
    }
}
