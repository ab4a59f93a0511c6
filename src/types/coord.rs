//! Geographic coordinates, with and without depth.

use std::fmt;

use crate::utils::{
    destination, great_circle_distance, initial_bearing, EARTH_RADIUS,
};

// -------------------------------------------------------------------------------------------------

/// Marker value for unset latitude/longitude/depth components.
const COORD_NOT_SET: f64 = -2000.0;

// -------------------------------------------------------------------------------------------------

/// A geographic surface point: latitude and longitude in decimal degrees.
///
/// Valid iff latitude ∈ [-90, 90] and longitude ∈ [-180, 180]. Immutable
/// after construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    latitude: f64,
    longitude: f64,
}

impl Coord {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn new_not_valid() -> Self {
        Self {
            latitude: COORD_NOT_SET,
            longitude: COORD_NOT_SET,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Surface great-circle distance towards `other` [m].
    pub fn great_circle_distance(&self, other: &Coord) -> f64 {
        great_circle_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Initial great-circle bearing towards `other` [radians].
    pub fn initial_bearing(&self, other: &Coord) -> f64 {
        initial_bearing(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// The point reached by following `bearing` [radians] for `range` [m]
    /// along the great circle.
    pub fn from_bearing(start: &Coord, bearing: f64, range: f64) -> Coord {
        let (lat, lon) = destination(start.latitude, start.longitude, bearing, range);
        Coord::new(lat, lon)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.6}°, {:.6}°]", self.latitude, self.longitude)
    }
}

// -------------------------------------------------------------------------------------------------

/// A geographic point with depth below the sea surface [m].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordZ {
    coord: Coord,
    depth: f64,
}

impl CoordZ {
    pub fn new(latitude: f64, longitude: f64, depth: f64) -> Self {
        Self {
            coord: Coord::new(latitude, longitude),
            depth,
        }
    }

    pub fn new_not_valid() -> Self {
        Self {
            coord: Coord::new_not_valid(),
            depth: COORD_NOT_SET,
        }
    }

    pub fn from_coord(coord: Coord, depth: f64) -> Self {
        Self { coord, depth }
    }

    pub fn coord(&self) -> Coord {
        self.coord
    }

    pub fn latitude(&self) -> f64 {
        self.coord.latitude()
    }

    pub fn longitude(&self) -> f64 {
        self.coord.longitude()
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }

    /// Returns a copy with the given depth.
    pub fn with_depth(&self, depth: f64) -> Self {
        Self {
            coord: self.coord,
            depth,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.coord.is_valid() && self.depth != COORD_NOT_SET
    }

    pub fn great_circle_distance(&self, other: &CoordZ) -> f64 {
        self.coord.great_circle_distance(&other.coord)
    }

    pub fn initial_bearing(&self, other: &CoordZ) -> f64 {
        self.coord.initial_bearing(&other.coord)
    }

    /// Cartesian straight-line distance [m], accounting for depth: both
    /// points are projected on a sphere of radius `EARTH_RADIUS - depth`.
    pub fn cartesian_distance(&self, other: &CoordZ) -> f64 {
        let (x1, y1, z1) = self.cartesian();
        let (x2, y2, z2) = other.cartesian();
        ((x2 - x1).powi(2) + (y2 - y1).powi(2) + (z2 - z1).powi(2)).sqrt()
    }

    fn cartesian(&self) -> (f64, f64, f64) {
        let r = EARTH_RADIUS - self.depth;
        let lat = self.latitude().to_radians();
        let lon = self.longitude().to_radians();
        (
            r * lat.cos() * lon.cos(),
            r * lat.cos() * lon.sin(),
            r * lat.sin(),
        )
    }
}

impl fmt::Display for CoordZ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}°, {:.6}°, {:.2} m]",
            self.latitude(),
            self.longitude(),
            self.depth
        )
    }
}

// -------------------------------------------------------------------------------------------------

/// A transmitter/receiver pair, the key of one simulated link.
pub type CoordZPair = (CoordZ, CoordZ);

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_bounds() {
        assert!(Coord::new(45.0, 13.0).is_valid());
        assert!(Coord::new(-90.0, 180.0).is_valid());
        assert!(!Coord::new(90.5, 13.0).is_valid());
        assert!(!Coord::new(45.0, -181.0).is_valid());
        assert!(!Coord::new_not_valid().is_valid());
        assert!(!CoordZ::new_not_valid().is_valid());
    }

    #[test]
    fn vertical_pair_distances() {
        let a = CoordZ::new(45.0, 13.0, 10.0);
        let b = CoordZ::new(45.0, 13.0, 90.0);
        assert_eq!(a.great_circle_distance(&b), 0.0);
        let d = a.cartesian_distance(&b);
        assert!((d - 80.0).abs() < 1e-6);
    }

    #[test]
    fn bearing_path_ends_at_target() {
        let a = CoordZ::new(45.7, 13.7, 70.0);
        let b = CoordZ::new(45.9, 14.2, 50.0);
        let bearing = a.initial_bearing(&b);
        let range = a.great_circle_distance(&b);
        let end = Coord::from_bearing(&a.coord(), bearing, range);
        assert!((end.latitude() - b.latitude()).abs() < 1e-6);
        assert!((end.longitude() - b.longitude()).abs() < 1e-6);
    }
}
