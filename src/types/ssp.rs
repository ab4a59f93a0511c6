//! Sound-speed profiles: sound speed in water as a function of depth.

use std::fmt;

use crate::random::RandomSource;

use super::coord::Coord;

// -------------------------------------------------------------------------------------------------

/// An ordered depth → sound-speed mapping along the water column.
///
/// Invariants: depth keys strictly increasing, speeds positive. Depth keys
/// closer than `depth_precision` are considered the same sample and the
/// later insert wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Ssp {
    points: Vec<(f64, f64)>,
    transformable: bool,
    depth_precision: f64,
}

impl Ssp {
    /// Default depth precision when merging inserts [m].
    pub const DEFAULT_DEPTH_PRECISION: f64 = 1.0e-6;

    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            transformable: true,
            depth_precision: Self::DEFAULT_DEPTH_PRECISION,
        }
    }

    pub fn with_depth_precision(depth_precision: f64) -> Self {
        Self {
            points: Vec::new(),
            transformable: true,
            depth_precision,
        }
    }

    /// Builds a profile from (depth [m], speed [m/s]) samples.
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Self {
        let mut ssp = Self::new();
        for (depth, speed) in points {
            ssp.insert(depth, speed);
        }
        ssp
    }

    pub fn is_valid(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|&(_, speed)| speed > 0.0)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn min_depth(&self) -> f64 {
        self.points.first().map_or(0.0, |&(depth, _)| depth)
    }

    pub fn max_depth(&self) -> f64 {
        self.points.last().map_or(0.0, |&(depth, _)| depth)
    }

    pub fn at(&self, index: usize) -> Option<(f64, f64)> {
        self.points.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().copied()
    }

    /// Whether this profile can be resampled onto an arbitrary depth grid.
    pub fn is_transformable(&self) -> bool {
        self.transformable
    }

    pub fn set_transformable(&mut self, flag: bool) {
        self.transformable = flag;
    }

    pub fn depth_precision(&self) -> f64 {
        self.depth_precision
    }

    /// Inserts a (depth, speed) sample keeping depths strictly increasing.
    /// A depth within `depth_precision` of an existing key replaces it.
    pub fn insert(&mut self, depth: f64, speed: f64) {
        let pos = self.points.partition_point(|&(d, _)| d < depth);

        for neighbor in [pos.wrapping_sub(1), pos] {
            if let Some((d, s)) = self.points.get_mut(neighbor) {
                if (*d - depth).abs() <= self.depth_precision {
                    *s = speed;
                    return;
                }
            }
        }
        self.points.insert(pos, (depth, speed));
    }

    /// Sound speed at the given depth, linearly interpolated between the
    /// bracketing samples and clamped to the profile's span.
    pub fn value_at_depth(&self, depth: f64) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        if depth <= self.min_depth() {
            return Some(self.points.first().unwrap().1);
        }
        if depth >= self.max_depth() {
            return Some(self.points.last().unwrap().1);
        }
        let pos = self.points.partition_point(|&(d, _)| d < depth);
        let (d1, s1) = self.points[pos - 1];
        let (d2, s2) = self.points[pos];
        Some(s1 + (s2 - s1) * (depth - d1) / (d2 - d1))
    }

    /// Returns a new profile dropping all samples deeper than `max_depth`.
    pub fn truncate(&self, max_depth: f64) -> Ssp {
        let mut out = self.clone();
        out.points.retain(|&(depth, _)| depth <= max_depth);
        out
    }

    /// Resamples the profile onto a uniform grid of exactly `steps` points
    /// over `[min_depth, max_depth]`. The result is transformable iff the
    /// source is. Returns `None` when the profile is not transformable or
    /// `steps` is zero.
    ///
    /// The origin coordinate is accepted for parity with providers that
    /// adjust profiles for latitude-dependent gravity; the plain resampler
    /// does not use it.
    pub fn transform(
        &self,
        _origin: &Coord,
        min_depth: f64,
        max_depth: f64,
        steps: usize,
    ) -> Option<Ssp> {
        if !self.transformable || steps == 0 || self.points.is_empty() || max_depth <= min_depth {
            return None;
        }

        let mut out = Ssp::with_depth_precision(self.depth_precision);
        let span = max_depth - min_depth;
        for i in 0..steps {
            let depth = if steps == 1 {
                min_depth
            } else {
                min_depth + span * (i as f64) / ((steps - 1) as f64)
            };
            let speed = self.value_at_depth(depth)?;
            out.points.push((depth, speed));
        }
        out.transformable = self.transformable;
        Some(out)
    }

    /// Returns a copy with every speed perturbed by a relative amount drawn
    /// uniformly from `[-sigma, sigma]`.
    pub fn randomize(&self, sigma: f64, random: &dyn RandomSource) -> Ssp {
        let mut out = self.clone();
        for (_, speed) in &mut out.points {
            *speed *= 1.0 + sigma * random.signed_uniform();
        }
        out
    }
}

impl Default for Ssp {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Ssp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SSP[{} points, {:.1}..{:.1} m]",
            self.points.len(),
            self.min_depth(),
            self.max_depth()
        )
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::random::SmallRngSource;

    use super::*;

    fn test_profile() -> Ssp {
        Ssp::from_points([
            (0.0, 1520.0),
            (50.0, 1510.0),
            (100.0, 1500.0),
            (200.0, 1495.0),
        ])
    }

    #[test]
    fn insert_keeps_order_and_merges() {
        let mut ssp = Ssp::new();
        ssp.insert(100.0, 1500.0);
        ssp.insert(0.0, 1520.0);
        ssp.insert(50.0, 1510.0);
        assert_eq!(ssp.len(), 3);
        assert_eq!(ssp.min_depth(), 0.0);
        assert_eq!(ssp.max_depth(), 100.0);

        // same depth within precision replaces
        ssp.insert(50.0 + Ssp::DEFAULT_DEPTH_PRECISION / 2.0, 1511.0);
        assert_eq!(ssp.len(), 3);
        assert_eq!(ssp.at(1), Some((50.0, 1511.0)));
    }

    #[test]
    fn interpolation() {
        let ssp = test_profile();
        assert_abs_diff_eq!(ssp.value_at_depth(25.0).unwrap(), 1515.0, epsilon = 1e-9);
        // clamped outside the span
        assert_eq!(ssp.value_at_depth(-10.0), Some(1520.0));
        assert_eq!(ssp.value_at_depth(500.0), Some(1495.0));
    }

    #[test]
    fn transform_resamples_to_exact_step_count() {
        let ssp = test_profile();
        let out = ssp.transform(&Coord::new(45.0, 13.0), 0.0, 150.0, 16).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(out.min_depth(), 0.0);
        assert_abs_diff_eq!(out.max_depth(), 150.0, epsilon = 1e-9);
        assert!(out.is_transformable());

        let mut opaque = ssp.clone();
        opaque.set_transformable(false);
        assert!(opaque.transform(&Coord::new(45.0, 13.0), 0.0, 150.0, 16).is_none());
    }

    #[test]
    fn truncate_drops_deep_samples() {
        let out = test_profile().truncate(100.0);
        assert_eq!(out.len(), 3);
        assert_eq!(out.max_depth(), 100.0);
    }

    #[test]
    fn randomize_stays_close() {
        let random = SmallRngSource::new(1);
        let ssp = test_profile();
        let out = ssp.randomize(1e-4, &random);
        assert_eq!(out.len(), ssp.len());
        assert_ne!(out, ssp);
        for ((_, orig), (_, pert)) in ssp.iter().zip(out.iter()) {
            assert!((pert / orig - 1.0).abs() <= 1e-4);
        }
    }

    #[test]
    fn equality_is_value_wise() {
        assert_eq!(test_profile(), test_profile());
        let mut other = test_profile();
        other.insert(300.0, 1490.0);
        assert_ne!(test_profile(), other);
    }
}
