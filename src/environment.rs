//! Environmental data providers and the aggregation layer the simulation
//! queries them through.
//!
//! The concrete geographic databases (bathymetry grids, sediment atlases,
//! climatology SSPs) live outside this crate; here are only the narrow
//! interfaces the orchestrator needs, plus closure adapters and in-memory
//! result stores for tests and embedders.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::types::{
    altimetry::Altimetry,
    coord::CoordZ,
    pressure::Pressure,
    sediment::Sediment,
    ssp::Ssp,
    time::Time,
    time_arr::TimeArr,
};

// -------------------------------------------------------------------------------------------------

/// Sea-floor depth lookup [m, positive down]. `None` marks a point the
/// provider has no data for, which is fatal for the querying job.
pub trait BathymetryProvider: Send + Sync {
    fn bathymetry(&self, tx: &CoordZ, point: &CoordZ) -> Option<f64>;
}

/// Sea-floor sediment parameters applying to a whole transect.
pub trait SedimentProvider: Send + Sync {
    fn sediment(&self, tx: &CoordZ, transect: &[CoordZ]) -> Option<Sediment>;
}

/// Sound-speed profile lookup at a point, for time-varying providers at a
/// given instant.
pub trait SspProvider: Send + Sync {
    fn ssp(&self, tx: &CoordZ, point: &CoordZ, time: &Time) -> Option<Ssp>;
}

/// Sea-surface altimetry for a link. Optional: links without a provider run
/// with a flat surface.
pub trait AltimetryProvider: Send + Sync {
    fn altimetry(&self, tx: &CoordZ, rx: &CoordZ) -> Option<Altimetry>;
}

/// Persistent store of computed per-frequency pressures, keyed by
/// (tx, rx, frequency, time). Implementations must be internally
/// thread-safe.
pub trait PressureStore: Send + Sync {
    fn get(&self, tx: &CoordZ, rx: &CoordZ, frequency: f64, time: &Time) -> Option<Pressure>;
    fn insert(&self, tx: &CoordZ, rx: &CoordZ, frequency: f64, time: &Time, value: Pressure);
}

/// Persistent store of computed per-frequency impulse responses.
pub trait TimeArrStore: Send + Sync {
    fn get(&self, tx: &CoordZ, rx: &CoordZ, frequency: f64, time: &Time) -> Option<TimeArr>;
    fn insert(&self, tx: &CoordZ, rx: &CoordZ, frequency: f64, time: &Time, value: &TimeArr);
}

// -------------------------------------------------------------------------------------------------

/// Closure adapters, so simple providers don't need named types.
pub struct FnBathymetry<F>(pub F);

impl<F> BathymetryProvider for FnBathymetry<F>
where
    F: Fn(&CoordZ, &CoordZ) -> Option<f64> + Send + Sync,
{
    fn bathymetry(&self, tx: &CoordZ, point: &CoordZ) -> Option<f64> {
        (self.0)(tx, point)
    }
}

pub struct FnSediment<F>(pub F);

impl<F> SedimentProvider for FnSediment<F>
where
    F: Fn(&CoordZ, &[CoordZ]) -> Option<Sediment> + Send + Sync,
{
    fn sediment(&self, tx: &CoordZ, transect: &[CoordZ]) -> Option<Sediment> {
        (self.0)(tx, transect)
    }
}

pub struct FnSsp<F>(pub F);

impl<F> SspProvider for FnSsp<F>
where
    F: Fn(&CoordZ, &CoordZ, &Time) -> Option<Ssp> + Send + Sync,
{
    fn ssp(&self, tx: &CoordZ, point: &CoordZ, time: &Time) -> Option<Ssp> {
        (self.0)(tx, point, time)
    }
}

pub struct FnAltimetry<F>(pub F);

impl<F> AltimetryProvider for FnAltimetry<F>
where
    F: Fn(&CoordZ, &CoordZ) -> Option<Altimetry> + Send + Sync,
{
    fn altimetry(&self, tx: &CoordZ, rx: &CoordZ) -> Option<Altimetry> {
        (self.0)(tx, rx)
    }
}

// -------------------------------------------------------------------------------------------------

/// Quantized result-store key: 1e-6 degrees, millimeter depths, millihertz
/// frequencies and whole seconds, so lookups are reproducible across float
/// round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StoreKey {
    tx: (i64, i64, i64),
    rx: (i64, i64, i64),
    frequency_mhz: i64,
    time: i64,
}

impl StoreKey {
    fn new(tx: &CoordZ, rx: &CoordZ, frequency: f64, time: &Time) -> Self {
        let quantize = |c: &CoordZ| {
            (
                (c.latitude() * 1e6).round() as i64,
                (c.longitude() * 1e6).round() as i64,
                (c.depth() * 1e3).round() as i64,
            )
        };
        Self {
            tx: quantize(tx),
            rx: quantize(rx),
            frequency_mhz: (frequency * 1e3).round() as i64,
            time: time.to_unix(),
        }
    }
}

/// In-memory [`PressureStore`], mainly for tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryPressureStore {
    values: Mutex<HashMap<StoreKey, Pressure>>,
}

impl MemoryPressureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().expect("poisoned store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PressureStore for MemoryPressureStore {
    fn get(&self, tx: &CoordZ, rx: &CoordZ, frequency: f64, time: &Time) -> Option<Pressure> {
        let values = self.values.lock().expect("poisoned store lock");
        values.get(&StoreKey::new(tx, rx, frequency, time)).copied()
    }

    fn insert(&self, tx: &CoordZ, rx: &CoordZ, frequency: f64, time: &Time, value: Pressure) {
        let mut values = self.values.lock().expect("poisoned store lock");
        values.insert(StoreKey::new(tx, rx, frequency, time), value);
    }
}

/// In-memory [`TimeArrStore`].
#[derive(Debug, Default)]
pub struct MemoryTimeArrStore {
    values: Mutex<HashMap<StoreKey, TimeArr>>,
}

impl MemoryTimeArrStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().expect("poisoned store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TimeArrStore for MemoryTimeArrStore {
    fn get(&self, tx: &CoordZ, rx: &CoordZ, frequency: f64, time: &Time) -> Option<TimeArr> {
        let values = self.values.lock().expect("poisoned store lock");
        values.get(&StoreKey::new(tx, rx, frequency, time)).cloned()
    }

    fn insert(&self, tx: &CoordZ, rx: &CoordZ, frequency: f64, time: &Time, value: &TimeArr) {
        let mut values = self.values.lock().expect("poisoned store lock");
        values.insert(StoreKey::new(tx, rx, frequency, time), value.clone());
    }
}

// -------------------------------------------------------------------------------------------------

/// Aggregates all configured providers behind one handle the jobs query.
/// Unconfigured providers yield `None` (fatal for the querying job), except
/// altimetry which falls back to a flat surface.
#[derive(Default, Clone)]
pub struct EnvironmentManager {
    bathymetry: Option<Arc<dyn BathymetryProvider>>,
    sediment: Option<Arc<dyn SedimentProvider>>,
    ssp: Option<Arc<dyn SspProvider>>,
    altimetry: Option<Arc<dyn AltimetryProvider>>,
    pressure_store: Option<Arc<dyn PressureStore>>,
    time_arr_store: Option<Arc<dyn TimeArrStore>>,
}

impl EnvironmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bathymetry(&mut self, provider: Arc<dyn BathymetryProvider>) -> &mut Self {
        self.bathymetry = Some(provider);
        self
    }

    pub fn set_sediment(&mut self, provider: Arc<dyn SedimentProvider>) -> &mut Self {
        self.sediment = Some(provider);
        self
    }

    pub fn set_ssp(&mut self, provider: Arc<dyn SspProvider>) -> &mut Self {
        self.ssp = Some(provider);
        self
    }

    pub fn set_altimetry(&mut self, provider: Arc<dyn AltimetryProvider>) -> &mut Self {
        self.altimetry = Some(provider);
        self
    }

    pub fn set_pressure_store(&mut self, store: Arc<dyn PressureStore>) -> &mut Self {
        self.pressure_store = Some(store);
        self
    }

    pub fn set_time_arr_store(&mut self, store: Arc<dyn TimeArrStore>) -> &mut Self {
        self.time_arr_store = Some(store);
        self
    }

    pub fn bathymetry(&self, tx: &CoordZ, point: &CoordZ) -> Option<f64> {
        self.bathymetry.as_ref()?.bathymetry(tx, point)
    }

    pub fn sediment(&self, tx: &CoordZ, transect: &[CoordZ]) -> Option<Sediment> {
        self.sediment.as_ref()?.sediment(tx, transect)
    }

    pub fn ssp(&self, tx: &CoordZ, point: &CoordZ, time: &Time) -> Option<Ssp> {
        self.ssp.as_ref()?.ssp(tx, point, time)
    }

    pub fn altimetry(&self, tx: &CoordZ, rx: &CoordZ) -> Option<Altimetry> {
        self.altimetry.as_ref()?.altimetry(tx, rx)
    }

    pub fn has_pressure_store(&self) -> bool {
        self.pressure_store.is_some()
    }

    pub fn has_time_arr_store(&self) -> bool {
        self.time_arr_store.is_some()
    }

    pub fn get_pressure(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        frequency: f64,
        time: &Time,
    ) -> Option<Pressure> {
        self.pressure_store.as_ref()?.get(tx, rx, frequency, time)
    }

    pub fn insert_pressure(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        frequency: f64,
        time: &Time,
        value: Pressure,
    ) {
        if let Some(store) = &self.pressure_store {
            store.insert(tx, rx, frequency, time, value);
        }
    }

    pub fn get_time_arr(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        frequency: f64,
        time: &Time,
    ) -> Option<TimeArr> {
        self.time_arr_store.as_ref()?.get(tx, rx, frequency, time)
    }

    pub fn insert_time_arr(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        frequency: f64,
        time: &Time,
        value: &TimeArr,
    ) {
        if let Some(store) = &self.time_arr_store {
            store.insert(tx, rx, frequency, time, value);
        }
    }
}

// -------------------------------------------------------------------------------------------------
