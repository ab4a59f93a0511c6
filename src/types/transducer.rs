//! Transducer beam patterns and their per-link orientation records.

use std::{fmt, io::Write, sync::Arc};

use dashmap::DashMap;

use crate::error::Error;

use super::coord::CoordZ;

// -------------------------------------------------------------------------------------------------

/// A vertical beam pattern: angular sensitivity of the source transducer,
/// as ordered (angle [decimal degrees], linear gain) samples over
/// `[-90°, 90°]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transducer {
    type_name: String,
    pattern: Vec<(f64, f64)>,
}

impl Transducer {
    pub fn new(type_name: impl Into<String>, pattern: Vec<(f64, f64)>) -> Self {
        let mut pattern = pattern;
        pattern.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            type_name: type_name.into(),
            pattern,
        }
    }

    /// An omnidirectional pattern with unit gain at the two endpoints.
    pub fn new_omnidirectional() -> Self {
        Self::new("omni", vec![(-90.0, 1.0), (90.0, 1.0)])
    }

    pub fn new_not_valid() -> Self {
        Self {
            type_name: String::new(),
            pattern: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.pattern.is_empty()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    /// Writes the vertical beam-pattern file consumed by the engine: a
    /// sample count line, then one `angle gain` line per sample with the
    /// pattern rotated by `vertical_rotation` and each gain mapped through
    /// `gain · multiply_constant + add_constant`.
    ///
    /// Geometry parameters are accepted so range-dependent patterns can
    /// steer towards the receiver; the tabular pattern only applies the
    /// vertical rotation.
    #[allow(clippy::too_many_arguments)]
    pub fn write_vertical_pattern<W: Write>(
        &self,
        writer: &mut W,
        _tx: &CoordZ,
        _rx: &CoordZ,
        _initial_bearing: f64,
        vertical_rotation: f64,
        _horizontal_rotation: f64,
        multiply_constant: f64,
        add_constant: f64,
    ) -> Result<(), Error> {
        writeln!(writer, "{}", self.pattern.len())?;
        for &(angle, gain) in &self.pattern {
            let rotated = (angle + vertical_rotation).clamp(-90.0, 90.0);
            writeln!(writer, "{} {}", rotated, gain * multiply_constant + add_constant)?;
        }
        Ok(())
    }
}

impl fmt::Display for Transducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transducer[{}, {} samples]", self.type_name, self.pattern.len())
    }
}

// -------------------------------------------------------------------------------------------------

/// Per-link transducer configuration: which pattern to use and how to orient
/// it. Held in the parameter container keyed by (tx, rx) region.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomTransducer {
    pub type_name: String,
    /// Initial bearing of the beam pattern [radians].
    pub initial_bearing: f64,
    /// Vertical rotation applied to the pattern [decimal degrees].
    pub vertical_rotation: f64,
    /// Horizontal rotation applied to the pattern [decimal degrees].
    pub horizontal_rotation: f64,
    pub multiply_constant: f64,
    pub add_constant: f64,
}

impl CustomTransducer {
    pub fn new(
        type_name: impl Into<String>,
        initial_bearing: f64,
        vertical_rotation: f64,
        horizontal_rotation: f64,
        multiply_constant: f64,
        add_constant: f64,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            initial_bearing,
            vertical_rotation,
            horizontal_rotation,
            multiply_constant,
            add_constant,
        }
    }
}

impl Default for CustomTransducer {
    fn default() -> Self {
        Self {
            type_name: String::new(),
            initial_bearing: 0.0,
            vertical_rotation: 0.0,
            horizontal_rotation: 0.0,
            multiply_constant: 1.0,
            add_constant: 0.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Process-wide registry of beam patterns, keyed by transducer type name.
///
/// Lookups of unknown names fall back to a shared not-valid pattern, which
/// the env-file writer treats as "no beam pattern file".
#[derive(Debug, Default)]
pub struct TransducerRegistry {
    patterns: DashMap<String, Arc<Transducer>>,
}

impl TransducerRegistry {
    pub fn new() -> Self {
        Self {
            patterns: DashMap::new(),
        }
    }

    pub fn register(&self, transducer: Transducer) {
        self.patterns
            .insert(transducer.type_name().to_owned(), Arc::new(transducer));
    }

    pub fn get(&self, type_name: &str) -> Arc<Transducer> {
        self.patterns
            .get(type_name)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::new(Transducer::new_not_valid()))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_file_format() {
        let t = Transducer::new("test", vec![(-90.0, 0.5), (0.0, 1.0), (90.0, 0.5)]);
        let mut out = Vec::new();
        t.write_vertical_pattern(
            &mut out,
            &CoordZ::new(45.0, 13.0, 10.0),
            &CoordZ::new(45.1, 13.1, 20.0),
            0.0,
            10.0,
            0.0,
            2.0,
            0.1,
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "3");
        assert_eq!(lines[1], "-80 1.1");
        assert_eq!(lines[2], "10 2.1");
        assert_eq!(lines[3], "90 1.1");
    }

    #[test]
    fn registry_falls_back_to_not_valid() {
        let registry = TransducerRegistry::new();
        registry.register(Transducer::new_omnidirectional());
        assert!(registry.get("omni").is_valid());
        assert!(!registry.get("missing").is_valid());
    }
}
