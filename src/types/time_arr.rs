//! Channel impulse responses: ordered (delay, pressure) arrival sequences.

use std::{fmt, ops::AddAssign};

use num_complex::Complex64;

use super::pressure::Pressure;

// -------------------------------------------------------------------------------------------------

/// An ordered sequence of (delay [s], complex pressure) arrivals describing
/// a channel impulse response between two points.
///
/// Arrivals whose delays fall within [`TimeArr::DEFAULT_DELAY_RESOLUTION`]
/// of an existing entry are merged by complex addition instead of creating
/// a new tap; the resolution is configurable per instance.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeArr {
    taps: Vec<(f64, Complex64)>,
    delay_resolution: f64,
}

impl TimeArr {
    /// Delay bucketing resolution applied by [`TimeArr::sum_value`] [s].
    pub const DEFAULT_DELAY_RESOLUTION: f64 = 1.0e-6;

    const NOT_VALID_DELAY: f64 = f64::INFINITY;

    pub fn new() -> Self {
        Self {
            taps: Vec::new(),
            delay_resolution: Self::DEFAULT_DELAY_RESOLUTION,
        }
    }

    pub fn with_delay_resolution(delay_resolution: f64) -> Self {
        Self {
            taps: Vec::new(),
            delay_resolution,
        }
    }

    /// A unit impulse: unit pressure at delay 0.
    pub fn new_impulse() -> Self {
        let mut value = Self::new();
        value.sum_value(0.0, Pressure::new(1.0, 0.0));
        value
    }

    /// The not-valid sentinel, distinguishable from every physical response.
    pub fn new_not_valid() -> Self {
        Self {
            taps: vec![(Self::NOT_VALID_DELAY, Complex64::new(0.0, 0.0))],
            delay_resolution: Self::DEFAULT_DELAY_RESOLUTION,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.taps.is_empty() && self.taps.iter().all(|(delay, _)| delay.is_finite())
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn delay_resolution(&self) -> f64 {
        self.delay_resolution
    }

    pub fn taps(&self) -> impl Iterator<Item = (f64, Pressure)> + '_ {
        self.taps
            .iter()
            .map(|&(delay, value)| (delay, Pressure::from_complex(value)))
    }

    /// Inserts an arrival, merging it by addition with an existing tap when
    /// `delay` is within the configured resolution of it.
    pub fn sum_value(&mut self, delay: f64, pressure: Pressure) {
        let pos = self
            .taps
            .partition_point(|&(tap_delay, _)| tap_delay < delay);

        for neighbor in [pos.wrapping_sub(1), pos] {
            if let Some((tap_delay, value)) = self.taps.get_mut(neighbor) {
                if (*tap_delay - delay).abs() <= self.delay_resolution {
                    *value += pressure.complex();
                    return;
                }
            }
        }
        self.taps.insert(pos, (delay, pressure.complex()));
    }

    /// Coherent sum of all arrivals into one complex pressure sample.
    pub fn to_pressure(&self) -> Pressure {
        if !self.is_valid() {
            return Pressure::new_not_valid();
        }
        let sum = self
            .taps
            .iter()
            .fold(Complex64::new(0.0, 0.0), |acc, &(_, value)| acc + value);
        Pressure::from_complex(sum)
    }

    pub fn clear(&mut self) {
        self.taps.clear();
    }

    pub fn divide(&mut self, scalar: f64) {
        for (_, value) in &mut self.taps {
            *value /= scalar;
        }
    }
}

impl Default for TimeArr {
    fn default() -> Self {
        Self::new()
    }
}

impl AddAssign<&TimeArr> for TimeArr {
    fn add_assign(&mut self, rhs: &TimeArr) {
        for (delay, value) in &rhs.taps {
            self.sum_value(*delay, Pressure::from_complex(*value));
        }
    }
}

impl fmt::Display for TimeArr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeArr[{} taps]", self.taps.len())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn sum_value_merges_within_resolution() {
        let mut arr = TimeArr::new();
        arr.sum_value(0.10, Pressure::new(1.0, 0.0));
        arr.sum_value(0.10 + TimeArr::DEFAULT_DELAY_RESOLUTION / 2.0, Pressure::new(1.0, 0.0));
        assert_eq!(arr.len(), 1);
        assert_abs_diff_eq!(arr.to_pressure().re(), 2.0, epsilon = 1e-12);

        arr.sum_value(0.25, Pressure::new(0.5, 0.0));
        assert_eq!(arr.len(), 2);
    }

    #[test]
    fn taps_stay_ordered() {
        let mut arr = TimeArr::new();
        arr.sum_value(0.3, Pressure::new(1.0, 0.0));
        arr.sum_value(0.1, Pressure::new(1.0, 0.0));
        arr.sum_value(0.2, Pressure::new(1.0, 0.0));
        let delays: Vec<f64> = arr.taps().map(|(d, _)| d).collect();
        assert_eq!(delays, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn pressure_round_trip() {
        let p = Pressure::new(0.3, -0.7);
        let mut arr = TimeArr::new();
        arr.sum_value(0.042, p);
        let back = arr.to_pressure();
        assert_abs_diff_eq!(back.re(), p.re(), epsilon = 1e-12);
        assert_abs_diff_eq!(back.im(), p.im(), epsilon = 1e-12);
    }

    #[test]
    fn sentinels() {
        assert!(!TimeArr::new_not_valid().is_valid());
        assert!(!TimeArr::new().is_valid());
        assert!(TimeArr::new_impulse().is_valid());
        assert!(!TimeArr::new_not_valid().to_pressure().is_valid());
    }

    #[test]
    fn addition_and_division() {
        let mut a = TimeArr::new();
        a.sum_value(0.1, Pressure::new(1.0, 0.0));
        let mut b = TimeArr::new();
        b.sum_value(0.1, Pressure::new(3.0, 0.0));
        b.sum_value(0.5, Pressure::new(2.0, 0.0));
        a += &b;
        assert_eq!(a.len(), 2);
        a.divide(2.0);
        assert_abs_diff_eq!(a.to_pressure().re(), 3.0, epsilon = 1e-12);
    }
}
