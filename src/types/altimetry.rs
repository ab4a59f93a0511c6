//! Sea-surface altimetry along a transect.

use std::fmt;

use crate::random::RandomSource;

use crate::types::time::Time;

// -------------------------------------------------------------------------------------------------

/// Sea-surface elevation along a range transect, as an ordered
/// range [m] → surface depth [m] mapping.
///
/// Surface depths are signed: 0 is the nominal flat surface, negative values
/// are wave crests above it. Before use the surface is always re-scaled onto
/// the owning job's range grid via [`Altimetry::initialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Altimetry {
    /// Source samples, resampled onto the range grid by `initialize`.
    points: Vec<(f64, f64)>,
    range: f64,
    total_range_steps: usize,
    /// Maximum usable water depth below this surface [m].
    depth: f64,
    initialized: bool,
}

impl Altimetry {
    /// A perfectly flat surface at elevation 0.
    pub fn new_flat() -> Self {
        Self {
            points: vec![(0.0, 0.0)],
            range: 0.0,
            total_range_steps: 0,
            depth: 0.0,
            initialized: false,
        }
    }

    /// A surface from explicit (range [m], surface depth [m]) samples.
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Self {
        let mut points: Vec<(f64, f64)> = points.into_iter().collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            points,
            range: 0.0,
            total_range_steps: 0,
            depth: 0.0,
            initialized: false,
        }
    }

    pub fn new_not_valid() -> Self {
        Self {
            points: Vec::new(),
            range: 0.0,
            total_range_steps: 0,
            depth: 0.0,
            initialized: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.points.is_empty()
    }

    pub fn set_range(&mut self, range: f64) {
        self.range = range;
        self.initialized = false;
    }

    pub fn set_total_range_steps(&mut self, steps: usize) {
        self.total_range_steps = steps;
        self.initialized = false;
    }

    pub fn set_depth(&mut self, depth: f64) {
        self.depth = depth;
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn total_range_steps(&self) -> usize {
        self.total_range_steps
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn min_value(&self) -> f64 {
        self.points
            .iter()
            .map(|&(_, depth)| depth)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn max_value(&self) -> f64 {
        self.points
            .iter()
            .map(|&(_, depth)| depth)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().copied()
    }

    /// Resamples the source surface onto the configured range grid:
    /// `total_range_steps + 1` evenly spaced samples over `[0, range]`.
    pub fn initialize(&mut self) -> bool {
        if self.points.is_empty() || self.range <= 0.0 || self.total_range_steps == 0 {
            return false;
        }

        let source = self.points.clone();
        let source_span = source.last().unwrap().0.max(f64::MIN_POSITIVE);

        self.points = (0..=self.total_range_steps)
            .map(|i| {
                let target = self.range * (i as f64) / (self.total_range_steps as f64);
                // source ranges are rescaled onto the target span
                let lookup = target / self.range * source_span;
                (target, Self::interpolate(&source, lookup))
            })
            .collect();

        self.initialized = true;
        true
    }

    fn interpolate(points: &[(f64, f64)], range: f64) -> f64 {
        if range <= points[0].0 {
            return points[0].1;
        }
        if range >= points[points.len() - 1].0 {
            return points[points.len() - 1].1;
        }
        let pos = points.partition_point(|&(r, _)| r < range);
        let (r1, d1) = points[pos - 1];
        let (r2, d2) = points[pos];
        d1 + (d2 - d1) * (range - r1) / (r2 - r1)
    }

    /// Produces the surface for a later instant. The flat model is
    /// time-invariant, so this returns an identical copy; wave-model
    /// subsuppliers replace the samples here.
    pub fn time_evolve(&self, _time: &Time) -> Altimetry {
        self.clone()
    }

    /// Returns a copy with every sample perturbed by an absolute amount
    /// drawn uniformly from `[-sigma, sigma]` meters.
    pub fn randomize(&self, sigma: f64, random: &dyn RandomSource) -> Altimetry {
        let mut out = self.clone();
        for (_, depth) in &mut out.points {
            *depth += sigma * random.signed_uniform();
        }
        out
    }
}

impl fmt::Display for Altimetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Altimetry[{} points over {:.1} m]",
            self.points.len(),
            self.range
        )
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::random::SmallRngSource;

    use super::*;

    #[test]
    fn flat_surface_resamples_onto_grid() {
        let mut alt = Altimetry::new_flat();
        alt.set_range(5000.0);
        alt.set_total_range_steps(10);
        assert!(alt.initialize());
        assert_eq!(alt.len(), 11);
        assert_eq!(alt.min_value(), 0.0);
        assert_eq!(alt.max_value(), 0.0);
        let last = alt.iter().last().unwrap();
        assert_abs_diff_eq!(last.0, 5000.0, epsilon = 1e-9);
    }

    #[test]
    fn wavy_surface_keeps_extremes() {
        let mut alt = Altimetry::from_points([(0.0, -1.0), (500.0, 1.0), (1000.0, -0.5)]);
        alt.set_range(2000.0);
        alt.set_total_range_steps(20);
        assert!(alt.initialize());
        assert_eq!(alt.len(), 21);
        assert_abs_diff_eq!(alt.min_value(), -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(alt.max_value(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn initialize_requires_grid() {
        let mut alt = Altimetry::new_flat();
        assert!(!alt.initialize());
        assert!(!Altimetry::new_not_valid().is_valid());
    }

    #[test]
    fn randomize_perturbs_in_band() {
        let mut alt = Altimetry::new_flat();
        alt.set_range(1000.0);
        alt.set_total_range_steps(8);
        alt.initialize();

        let random = SmallRngSource::new(3);
        let out = alt.randomize(1e-4, &random);
        assert_eq!(out.len(), alt.len());
        for (_, depth) in out.iter() {
            assert!(depth.abs() <= 1e-4);
        }
    }
}
