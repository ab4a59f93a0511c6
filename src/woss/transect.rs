//! Environment sampling along the transmitter→receiver transect.

use crate::{
    definitions::Definitions,
    environment::EnvironmentManager,
    error::Error,
    types::{
        altimetry::Altimetry,
        coord::{Coord, CoordZ},
        sediment::Sediment,
        ssp::Ssp,
        time::Time,
    },
};

// -------------------------------------------------------------------------------------------------

/// Inserts a value into an exact-equality sorted set of floats.
fn insert_unique(set: &mut Vec<f64>, value: f64) {
    let pos = set.partition_point(|&v| v < value);
    if set.get(pos) != Some(&value) {
        set.insert(pos, value);
    }
}

// -------------------------------------------------------------------------------------------------

/// The environment sampled along a great-circle transect: the range grid,
/// the bathymetry-annotated coordinates, the sediment, the (optional)
/// sea-surface altimetry and the range-indexed sound-speed profiles with
/// value-equality deduplication.
#[derive(Debug, Default)]
pub struct Transect {
    total_range_steps: usize,

    range_vector: Vec<f64>,
    coordz_vector: Vec<CoordZ>,

    min_bathymetry_depth: f64,
    max_bathymetry_depth: f64,

    sediment: Option<Sediment>,

    altimetry: Option<Altimetry>,
    min_altimetry_depth: f64,
    max_altimetry_depth: f64,

    /// One entry per range sample; `None` marks a duplicate of an earlier
    /// unique profile.
    ssp_vector: Vec<Option<Ssp>>,
    ssp_unique_indexes: Vec<usize>,
    min_ssp_depths: Vec<f64>,
    max_ssp_depths: Vec<f64>,
    min_ssp_depth_steps: usize,
    max_ssp_depth_steps: usize,
    all_ssp_transformable: bool,
}

impl Transect {
    pub fn new(total_range_steps: usize) -> Self {
        Self {
            total_range_steps,
            ..Default::default()
        }
    }

    pub fn set_total_range_steps(&mut self, steps: usize) {
        self.total_range_steps = steps;
    }

    pub fn total_range_steps(&self) -> usize {
        self.total_range_steps
    }

    pub fn range_vector(&self) -> &[f64] {
        &self.range_vector
    }

    pub fn coordz_vector(&self) -> &[CoordZ] {
        &self.coordz_vector
    }

    pub fn min_bathymetry_depth(&self) -> f64 {
        self.min_bathymetry_depth
    }

    pub fn max_bathymetry_depth(&self) -> f64 {
        self.max_bathymetry_depth
    }

    pub fn sediment(&self) -> Option<&Sediment> {
        self.sediment.as_ref()
    }

    pub fn altimetry(&self) -> Option<&Altimetry> {
        self.altimetry.as_ref()
    }

    pub fn set_altimetry(&mut self, altimetry: Option<Altimetry>) {
        self.altimetry = altimetry;
    }

    pub fn min_altimetry_depth(&self) -> f64 {
        self.min_altimetry_depth
    }

    pub fn max_altimetry_depth(&self) -> f64 {
        self.max_altimetry_depth
    }

    pub fn ssp_vector(&self) -> &[Option<Ssp>] {
        &self.ssp_vector
    }

    pub fn ssp_unique_indexes(&self) -> &[usize] {
        &self.ssp_unique_indexes
    }

    /// Minimum of all profiles' minimum depths [m].
    pub fn min_ssp_depth(&self) -> f64 {
        self.min_ssp_depths.first().copied().unwrap_or(0.0)
    }

    /// Maximum of all profiles' maximum depths [m].
    pub fn max_ssp_depth(&self) -> f64 {
        self.max_ssp_depths.last().copied().unwrap_or(0.0)
    }

    /// Whether every profile shares one min depth, one max depth and one
    /// step count, i.e. the matrix is already rectangular.
    pub fn is_ssp_matrix_uniform(&self) -> bool {
        self.min_ssp_depths.len() == 1
            && self.max_ssp_depths.len() == 1
            && self.min_ssp_depth_steps == self.max_ssp_depth_steps
    }

    pub fn all_ssp_transformable(&self) -> bool {
        self.all_ssp_transformable
    }

    /// Samples the whole environment for the given link at `time`.
    ///
    /// Any provider returning no or invalid data is fatal and leaves the
    /// transect cleared; an altimetry surface that fails to initialize only
    /// disables the surface.
    pub fn initialize(
        &mut self,
        tx: &CoordZ,
        rx: &CoordZ,
        bearing: f64,
        total_distance: f64,
        time: &Time,
        environment: &EnvironmentManager,
        definitions: &Definitions,
    ) -> Result<(), Error> {
        self.clear();

        if self.total_range_steps == 0 {
            return Err(Error::InvalidConfiguration("total range steps is 0".into()));
        }

        self.init_range_vector(total_distance);
        self.init_coordz_vector(tx, rx, bearing, environment)?;
        self.init_sediment(tx, environment)?;
        self.init_altimetry(tx, rx, environment, definitions)?;
        self.init_ssp_vector(tx, time, environment)?;
        Ok(())
    }

    fn clear(&mut self) {
        let steps = self.total_range_steps;
        *self = Self::new(steps);
        self.min_bathymetry_depth = f64::INFINITY;
        self.max_bathymetry_depth = 0.0;
        self.min_altimetry_depth = f64::INFINITY;
        self.max_altimetry_depth = f64::NEG_INFINITY;
        self.min_ssp_depth_steps = usize::MAX;
        self.max_ssp_depth_steps = 0;
        self.all_ssp_transformable = true;
    }

    fn init_range_vector(&mut self, total_distance: f64) {
        let steps = self.total_range_steps;
        self.range_vector = (0..=steps)
            .map(|i| total_distance / (steps as f64) * (i as f64))
            .collect();
    }

    fn init_coordz_vector(
        &mut self,
        tx: &CoordZ,
        rx: &CoordZ,
        bearing: f64,
        environment: &EnvironmentManager,
    ) -> Result<(), Error> {
        let steps = self.total_range_steps;
        self.coordz_vector.reserve(steps + 1);

        for i in 0..=steps {
            // endpoints snap to exactly the transmitter and receiver
            let position = if i == 0 {
                tx.coord()
            } else if i == steps {
                rx.coord()
            } else {
                Coord::from_bearing(&tx.coord(), bearing, self.range_vector[i])
            };
            let point = CoordZ::from_coord(position, 0.0);

            let depth = environment.bathymetry(tx, &point).ok_or_else(|| {
                Error::EnvironmentError(format!("no bathymetry at {point}"))
            })?;
            if !depth.is_finite() || depth < 0.0 {
                return Err(Error::EnvironmentError(format!(
                    "bad bathymetry {depth} at {point}"
                )));
            }

            self.min_bathymetry_depth = self.min_bathymetry_depth.min(depth);
            self.max_bathymetry_depth = self.max_bathymetry_depth.max(depth);
            self.coordz_vector.push(point.with_depth(depth));
        }
        Ok(())
    }

    fn init_sediment(
        &mut self,
        tx: &CoordZ,
        environment: &EnvironmentManager,
    ) -> Result<(), Error> {
        let sediment = environment
            .sediment(tx, &self.coordz_vector)
            .ok_or_else(|| Error::EnvironmentError(format!("no sediment for tx = {tx}")))?;
        if !sediment.is_valid() {
            return Err(Error::EnvironmentError(format!(
                "invalid sediment '{}' for tx = {tx}",
                sediment.name()
            )));
        }
        log::debug!("transect sediment = {sediment}");
        self.sediment = Some(sediment);
        Ok(())
    }

    fn init_altimetry(
        &mut self,
        tx: &CoordZ,
        rx: &CoordZ,
        environment: &EnvironmentManager,
        definitions: &Definitions,
    ) -> Result<(), Error> {
        // links without an altimetry provider run over the prototype
        // surface (flat unless substituted)
        let mut altimetry = environment
            .altimetry(tx, rx)
            .unwrap_or_else(|| definitions.new_altimetry());
        altimetry.set_range(tx.great_circle_distance(rx));
        altimetry.set_total_range_steps(self.total_range_steps);
        altimetry.set_depth(self.max_bathymetry_depth);

        if !altimetry.is_valid() || !altimetry.initialize() {
            log::debug!("altimetry unavailable for tx = {tx}, running without surface");
            self.altimetry = None;
            return Ok(());
        }

        self.min_altimetry_depth = altimetry.min_value();
        self.max_altimetry_depth = altimetry.max_value();

        // a surface clipping through the sea floor is unusable
        if self.min_bathymetry_depth <= self.min_altimetry_depth
            || self.max_altimetry_depth >= self.max_bathymetry_depth
        {
            return Err(Error::EnvironmentError(format!(
                "altimetry [{}, {}] clips bathymetry [{}, {}]",
                self.min_altimetry_depth,
                self.max_altimetry_depth,
                self.min_bathymetry_depth,
                self.max_bathymetry_depth
            )));
        }

        self.altimetry = Some(altimetry);
        Ok(())
    }

    fn init_ssp_vector(
        &mut self,
        tx: &CoordZ,
        time: &Time,
        environment: &EnvironmentManager,
    ) -> Result<(), Error> {
        for i in 0..=self.total_range_steps {
            let point = self.coordz_vector[i];
            let ssp = environment
                .ssp(tx, &point, time)
                .ok_or_else(|| Error::EnvironmentError(format!("no SSP at {point}")))?;
            if !ssp.is_valid() {
                return Err(Error::EnvironmentError(format!("invalid SSP at {point}")));
            }

            self.all_ssp_transformable = self.all_ssp_transformable && ssp.is_transformable();
            insert_unique(&mut self.min_ssp_depths, ssp.min_depth());
            insert_unique(&mut self.max_ssp_depths, ssp.max_depth());
            self.min_ssp_depth_steps = self.min_ssp_depth_steps.min(ssp.len());
            self.max_ssp_depth_steps = self.max_ssp_depth_steps.max(ssp.len());

            // value-equality deduplication: only the first occurrence of a
            // profile is kept, later equal profiles reference it
            let is_duplicate = self
                .ssp_unique_indexes
                .iter()
                .any(|&index| self.ssp_vector[index].as_ref() == Some(&ssp));
            if is_duplicate {
                self.ssp_vector.push(None);
            } else {
                self.ssp_unique_indexes.push(self.ssp_vector.len());
                self.ssp_vector.push(Some(ssp));
            }
        }

        log::debug!(
            "transect sampled {} SSPs, {} unique",
            self.ssp_vector.len(),
            self.ssp_unique_indexes.len()
        );
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::environment::{FnBathymetry, FnSediment, FnSsp};
    use crate::types::sediment::Sediment;

    use super::*;

    fn test_environment(bathymetry: fn(&CoordZ, &CoordZ) -> Option<f64>) -> EnvironmentManager {
        let mut env = EnvironmentManager::new();
        env.set_bathymetry(Arc::new(FnBathymetry(bathymetry)));
        env.set_sediment(Arc::new(FnSediment(|_: &CoordZ, _: &[CoordZ]| {
            Some(Sediment::new("sand", 1650.0, 110.0, 1.9, 0.8, 2.5, 10.0))
        })));
        env.set_ssp(Arc::new(FnSsp(|_: &CoordZ, point: &CoordZ, _: &Time| {
            // two distinct profiles along range, switching at 44.95° lat
            if point.latitude() < 44.95 {
                Some(Ssp::from_points([(0.0, 1520.0), (100.0, 1500.0)]))
            } else {
                Some(Ssp::from_points([(0.0, 1522.0), (100.0, 1502.0)]))
            }
        })));
        env
    }

    fn sample(env: &EnvironmentManager, steps: usize) -> Transect {
        let tx = CoordZ::new(44.9, 13.0, 10.0);
        let rx = CoordZ::new(45.0, 13.0, 50.0);
        let mut transect = Transect::new(steps);
        transect
            .initialize(
                &tx,
                &rx,
                tx.initial_bearing(&rx),
                tx.great_circle_distance(&rx),
                &Time::no_evolution(),
                env,
                &Definitions::new(),
            )
            .unwrap();
        transect
    }

    #[test]
    fn grids_have_steps_plus_one_samples() {
        let env = test_environment(|_, _| Some(100.0));
        let transect = sample(&env, 10);

        assert_eq!(transect.range_vector().len(), 11);
        assert_eq!(transect.coordz_vector().len(), 11);
        assert_eq!(transect.range_vector()[0], 0.0);

        let tx = CoordZ::new(44.9, 13.0, 10.0);
        let rx = CoordZ::new(45.0, 13.0, 50.0);
        let total = tx.great_circle_distance(&rx);
        assert!((transect.range_vector()[10] - total).abs() < 1.0);

        // endpoints snap to the exact tx/rx positions
        assert_eq!(transect.coordz_vector()[0].coord(), tx.coord());
        assert_eq!(transect.coordz_vector()[10].coord(), rx.coord());
        // every sample is annotated with the provider's bathymetry
        assert!(transect.coordz_vector().iter().all(|c| c.depth() == 100.0));
    }

    #[test]
    fn ssp_deduplication() {
        let env = test_environment(|_, _| Some(100.0));
        let transect = sample(&env, 10);

        assert_eq!(transect.ssp_vector().len(), 11);
        assert_eq!(transect.ssp_unique_indexes().len(), 2);
        assert_eq!(transect.min_ssp_depth(), 0.0);
        assert_eq!(transect.max_ssp_depth(), 100.0);
        assert!(transect.is_ssp_matrix_uniform());
        assert!(transect.all_ssp_transformable());
    }

    #[test]
    fn missing_bathymetry_is_fatal() {
        let env = test_environment(|_, _| None);
        let tx = CoordZ::new(44.9, 13.0, 10.0);
        let rx = CoordZ::new(45.0, 13.0, 50.0);
        let mut transect = Transect::new(4);
        let result = transect.initialize(
            &tx,
            &rx,
            tx.initial_bearing(&rx),
            tx.great_circle_distance(&rx),
            &Time::no_evolution(),
            &env,
            &Definitions::new(),
        );
        assert!(matches!(result, Err(Error::EnvironmentError(_))));
    }

    #[test]
    fn flat_altimetry_respects_bathymetry_bounds() {
        let env = test_environment(|_, _| Some(100.0));
        let transect = sample(&env, 10);
        let altimetry = transect.altimetry().expect("flat surface configured");
        assert!(altimetry.is_valid());
        assert!(transect.min_bathymetry_depth() > transect.min_altimetry_depth());
        assert!(transect.max_altimetry_depth() < transect.max_bathymetry_depth());
    }
}
