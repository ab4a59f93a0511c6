//! Prototype configuration shared by the creator and manager layers.

use std::{fmt, sync::Arc};

use crate::{
    random::{RandomSource, SmallRngSource},
    types::{altimetry::Altimetry, ssp::Ssp, time_arr::TimeArr},
};

// -------------------------------------------------------------------------------------------------

type SspFactory = dyn Fn() -> Ssp + Send + Sync;
type AltimetryFactory = dyn Fn() -> Altimetry + Send + Sync;

// -------------------------------------------------------------------------------------------------

/// Bundles the prototype factories and shared services the simulation graph
/// is built from, so embedders can substitute domain-specific variants of
/// the value types without the core knowing concrete types.
///
/// Passed by handle to the creator and manager at construction; there is no
/// process-wide registry, which keeps tests isolatable.
#[derive(Clone)]
pub struct Definitions {
    random: Arc<dyn RandomSource>,
    ssp_factory: Arc<SspFactory>,
    altimetry_factory: Arc<AltimetryFactory>,
    time_arr_delay_resolution: f64,
    debug: bool,
}

impl Definitions {
    pub fn new() -> Self {
        Self {
            random: Arc::new(SmallRngSource::default()),
            ssp_factory: Arc::new(Ssp::new),
            altimetry_factory: Arc::new(Altimetry::new_flat),
            time_arr_delay_resolution: TimeArr::DEFAULT_DELAY_RESOLUTION,
            debug: false,
        }
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_ssp_factory(
        mut self,
        factory: impl Fn() -> Ssp + Send + Sync + 'static,
    ) -> Self {
        self.ssp_factory = Arc::new(factory);
        self
    }

    pub fn with_altimetry_factory(
        mut self,
        factory: impl Fn() -> Altimetry + Send + Sync + 'static,
    ) -> Self {
        self.altimetry_factory = Arc::new(factory);
        self
    }

    pub fn with_time_arr_delay_resolution(mut self, resolution: f64) -> Self {
        self.time_arr_delay_resolution = resolution;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn random(&self) -> &Arc<dyn RandomSource> {
        &self.random
    }

    pub fn new_ssp(&self) -> Ssp {
        (self.ssp_factory)()
    }

    pub fn new_altimetry(&self) -> Altimetry {
        (self.altimetry_factory)()
    }

    pub fn new_time_arr(&self) -> TimeArr {
        TimeArr::with_delay_resolution(self.time_arr_delay_resolution)
    }

    pub fn time_arr_delay_resolution(&self) -> f64 {
        self.time_arr_delay_resolution
    }

    pub fn debug(&self) -> bool {
        self.debug
    }
}

impl Default for Definitions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Definitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definitions")
            .field("time_arr_delay_resolution", &self.time_arr_delay_resolution)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factories_are_substitutable() {
        let definitions = Definitions::new()
            .with_ssp_factory(|| Ssp::from_points([(0.0, 1500.0)]))
            .with_time_arr_delay_resolution(1e-3);

        assert_eq!(definitions.new_ssp().len(), 1);
        assert_eq!(definitions.new_time_arr().delay_resolution(), 1e-3);
        assert!(definitions.new_altimetry().is_valid());
    }
}
