//! Complex acoustic pressure samples.

use std::{
    fmt,
    ops::{Add, AddAssign, Div, DivAssign, Mul},
};

use num_complex::Complex64;

use crate::utils::linear_to_db;

use super::time_arr::TimeArr;

// -------------------------------------------------------------------------------------------------

/// A complex acoustic pressure at a single frequency.
///
/// The not-valid sentinel has infinite components and is distinguishable
/// from the zero pressure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pressure {
    value: Complex64,
}

impl Pressure {
    pub fn new(re: f64, im: f64) -> Self {
        Self {
            value: Complex64::new(re, im),
        }
    }

    pub fn from_complex(value: Complex64) -> Self {
        Self { value }
    }

    /// Builds a pressure from polar form: `amplitude · e^(i·phase)`.
    pub fn from_amplitude_phase(amplitude: f64, phase: f64) -> Self {
        Self {
            value: Complex64::from_polar(amplitude, phase),
        }
    }

    /// Coherently sums a channel impulse response into a single sample.
    pub fn from_time_arr(time_arr: &TimeArr) -> Self {
        time_arr.to_pressure()
    }

    pub fn new_not_valid() -> Self {
        Self {
            value: Complex64::new(f64::INFINITY, f64::INFINITY),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.value.re.is_finite() && self.value.im.is_finite()
    }

    pub fn re(&self) -> f64 {
        self.value.re
    }

    pub fn im(&self) -> f64 {
        self.value.im
    }

    pub fn complex(&self) -> Complex64 {
        self.value
    }

    pub fn abs(&self) -> f64 {
        self.value.norm()
    }

    /// Transmission loss in dB re 1 µPa: attenuation of this sample relative
    /// to unit pressure; positive for attenuated signals.
    pub fn tx_loss_db(&self) -> f64 {
        -linear_to_db(self.abs())
    }
}

impl Default for Pressure {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Add for Pressure {
    type Output = Pressure;

    fn add(self, rhs: Pressure) -> Pressure {
        Pressure::from_complex(self.value + rhs.value)
    }
}

impl AddAssign for Pressure {
    fn add_assign(&mut self, rhs: Pressure) {
        self.value += rhs.value;
    }
}

impl Mul<f64> for Pressure {
    type Output = Pressure;

    fn mul(self, rhs: f64) -> Pressure {
        Pressure::from_complex(self.value * rhs)
    }
}

impl Div<f64> for Pressure {
    type Output = Pressure;

    fn div(self, rhs: f64) -> Pressure {
        Pressure::from_complex(self.value / rhs)
    }
}

impl DivAssign<f64> for Pressure {
    fn div_assign(&mut self, rhs: f64) {
        self.value /= rhs;
    }
}

impl fmt::Display for Pressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:+e}, {:+e}i)", self.value.re, self.value.im)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn sentinel_is_not_zero() {
        let invalid = Pressure::new_not_valid();
        assert!(!invalid.is_valid());
        assert!(Pressure::default().is_valid());
        assert_ne!(invalid, Pressure::default());
    }

    #[test]
    fn polar_construction() {
        let p = Pressure::from_amplitude_phase(2.0, std::f64::consts::FRAC_PI_2);
        assert_abs_diff_eq!(p.re(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.im(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn tx_loss() {
        // |p| = 0.1 -> 20 dB of loss
        let p = Pressure::new(0.1, 0.0);
        assert_abs_diff_eq!(p.tx_loss_db(), 20.0, epsilon = 1e-9);
        assert_eq!(Pressure::new(1.0, 0.0).tx_loss_db(), 0.0);
    }

    #[test]
    fn arithmetic() {
        let mut p = Pressure::new(1.0, -1.0);
        p += Pressure::new(1.0, 1.0);
        assert_eq!(p, Pressure::new(2.0, 0.0));
        assert_eq!(p / 2.0, Pressure::new(1.0, 0.0));
    }
}
