//! Central wiring: builds the provider → creator → manager object graph.

use std::sync::Arc;

use crate::{
    creator::BellhopCreator,
    definitions::Definitions,
    environment::{
        AltimetryProvider, BathymetryProvider, EnvironmentManager, PressureStore,
        SedimentProvider, SspProvider, TimeArrStore,
    },
    error::Error,
    manager::{ParallelManager, SimpleManager, WossManager},
    types::transducer::TransducerRegistry,
};

// -------------------------------------------------------------------------------------------------

/// Which manager implementation the controller assembles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerKind {
    #[default]
    Simple,
    Parallel,
}

// -------------------------------------------------------------------------------------------------

/// Collects providers, stores and the creator configuration, then links
/// them into one initialized graph. [`Controller::initialize`] is
/// idempotent: the second call returns the already-built manager.
pub struct Controller {
    bathymetry: Option<Arc<dyn BathymetryProvider>>,
    sediment: Option<Arc<dyn SedimentProvider>>,
    ssp: Option<Arc<dyn SspProvider>>,
    altimetry: Option<Arc<dyn AltimetryProvider>>,
    pressure_store: Option<Arc<dyn PressureStore>>,
    time_arr_store: Option<Arc<dyn TimeArrStore>>,

    transducers: Arc<TransducerRegistry>,
    definitions: Definitions,
    creator: Option<BellhopCreator>,
    manager_kind: ManagerKind,
    space_sampling: f64,
    time_evolution_active: bool,

    manager: Option<Arc<dyn WossManager>>,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            bathymetry: None,
            sediment: None,
            ssp: None,
            altimetry: None,
            pressure_store: None,
            time_arr_store: None,
            transducers: Arc::new(TransducerRegistry::new()),
            definitions: Definitions::new(),
            creator: None,
            manager_kind: ManagerKind::default(),
            space_sampling: 0.0,
            time_evolution_active: false,
            manager: None,
        }
    }

    pub fn set_bathymetry_provider(&mut self, provider: Arc<dyn BathymetryProvider>) -> &mut Self {
        self.bathymetry = Some(provider);
        self
    }

    pub fn set_sediment_provider(&mut self, provider: Arc<dyn SedimentProvider>) -> &mut Self {
        self.sediment = Some(provider);
        self
    }

    pub fn set_ssp_provider(&mut self, provider: Arc<dyn SspProvider>) -> &mut Self {
        self.ssp = Some(provider);
        self
    }

    pub fn set_altimetry_provider(&mut self, provider: Arc<dyn AltimetryProvider>) -> &mut Self {
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

    pub fn set_transducer_registry(&mut self, registry: Arc<TransducerRegistry>) -> &mut Self {
        self.transducers = registry;
        self
    }

    pub fn set_definitions(&mut self, definitions: Definitions) -> &mut Self {
        self.definitions = definitions;
        self
    }

    /// The pre-configured creator whose containers hold the per-link
    /// tunables. Must be set before initialization.
    pub fn set_creator(&mut self, creator: BellhopCreator) -> &mut Self {
        self.creator = Some(creator);
        self
    }

    pub fn set_manager_kind(&mut self, kind: ManagerKind) -> &mut Self {
        self.manager_kind = kind;
        self
    }

    pub fn set_space_sampling(&mut self, radius: f64) -> &mut Self {
        self.space_sampling = radius;
        self
    }

    pub fn set_time_evolution_active(&mut self, active: bool) -> &mut Self {
        self.time_evolution_active = active;
        self
    }

    pub fn transducers(&self) -> &Arc<TransducerRegistry> {
        &self.transducers
    }

    pub fn manager(&self) -> Option<&Arc<dyn WossManager>> {
        self.manager.as_ref()
    }

    /// Builds the environment from the configured providers, hands it and
    /// the registries to the creator, and binds creator and environment
    /// into the requested manager.
    pub fn initialize(&mut self) -> Result<Arc<dyn WossManager>, Error> {
        if let Some(manager) = &self.manager {
            return Ok(manager.clone());
        }

        let mut creator = self.creator.take().ok_or_else(|| {
            Error::InvalidConfiguration("controller has no creator".into())
        })?;

        let mut environment = EnvironmentManager::new();
        if let Some(provider) = &self.bathymetry {
            environment.set_bathymetry(provider.clone());
        }
        if let Some(provider) = &self.sediment {
            environment.set_sediment(provider.clone());
        }
        if let Some(provider) = &self.ssp {
            environment.set_ssp(provider.clone());
        }
        if let Some(provider) = &self.altimetry {
            environment.set_altimetry(provider.clone());
        }
        if let Some(store) = &self.pressure_store {
            environment.set_pressure_store(store.clone());
        }
        if let Some(store) = &self.time_arr_store {
            environment.set_time_arr_store(store.clone());
        }

        creator.environment = environment.clone();
        creator.transducers = self.transducers.clone();
        creator.definitions = self.definitions.clone();
        let creator = Arc::new(creator);

        let manager: Arc<dyn WossManager> = match self.manager_kind {
            ManagerKind::Simple => {
                let mut manager = SimpleManager::new(creator, environment);
                manager.set_space_sampling(self.space_sampling);
                manager.set_time_evolution_active(self.time_evolution_active);
                Arc::new(manager)
            }
            ManagerKind::Parallel => {
                let mut manager = ParallelManager::new(creator, environment);
                manager.set_space_sampling(self.space_sampling);
                manager.set_time_evolution_active(self.time_evolution_active);
                Arc::new(manager)
            }
        };

        self.manager = Some(manager.clone());
        log::debug!("controller initialized ({:?} manager)", self.manager_kind);
        Ok(manager)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_requires_a_creator() {
        let mut controller = Controller::new();
        assert!(matches!(
            controller.initialize(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut controller = Controller::new();
        controller.set_creator(BellhopCreator::new("/tmp/woss", ""));
        let first = controller.initialize().unwrap();
        let second = controller.initialize().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
