//! Seafloor sediment acoustic parameters.

use std::fmt;

// -------------------------------------------------------------------------------------------------

/// The acoustic parameter bundle of the seafloor layer below the transect.
#[derive(Debug, Clone, PartialEq)]
pub struct Sediment {
    name: String,
    /// Compressional wave speed [m/s].
    compressional_speed: f64,
    /// Shear wave speed [m/s].
    shear_speed: f64,
    /// Density relative to water [g/cm³].
    density: f64,
    /// Compressional attenuation [dB/wavelength].
    compressional_attenuation: f64,
    /// Shear attenuation [dB/wavelength].
    shear_attenuation: f64,
    /// Layer thickness [m].
    thickness: f64,
}

impl Sediment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        compressional_speed: f64,
        shear_speed: f64,
        density: f64,
        compressional_attenuation: f64,
        shear_attenuation: f64,
        thickness: f64,
    ) -> Self {
        Self {
            name: name.into(),
            compressional_speed,
            shear_speed,
            density,
            compressional_attenuation,
            shear_attenuation,
            thickness,
        }
    }

    pub fn new_not_valid() -> Self {
        Self {
            name: String::new(),
            compressional_speed: 0.0,
            shear_speed: 0.0,
            density: 0.0,
            compressional_attenuation: 0.0,
            shear_attenuation: 0.0,
            thickness: 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.compressional_speed > 0.0 && self.density > 0.0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compressional_speed(&self) -> f64 {
        self.compressional_speed
    }

    pub fn shear_speed(&self) -> f64 {
        self.shear_speed
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn compressional_attenuation(&self) -> f64 {
        self.compressional_attenuation
    }

    pub fn shear_attenuation(&self) -> f64 {
        self.shear_attenuation
    }

    pub fn thickness(&self) -> f64 {
        self.thickness
    }

    /// Serialization for the engine's bottom-halfspace config line:
    /// compressional speed, shear speed, density, both attenuations.
    pub fn to_engine_string(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.compressional_speed,
            self.shear_speed,
            self.density,
            self.compressional_attenuation,
            self.shear_attenuation
        )
    }
}

impl fmt::Display for Sediment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.to_engine_string())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_serialization() {
        let sand = Sediment::new("sand", 1650.0, 110.0, 1.9, 0.8, 2.5, 10.0);
        assert!(sand.is_valid());
        assert_eq!(sand.to_engine_string(), "1650 110 1.9 0.8 2.5");
    }

    #[test]
    fn sentinel() {
        assert!(!Sediment::new_not_valid().is_valid());
    }
}
