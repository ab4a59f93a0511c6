//! Geodesic math, unit conversions and working-directory helpers shared
//! across the crate.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

// -------------------------------------------------------------------------------------------------

/// Mean earth radius used by all great-circle computations [m].
pub const EARTH_RADIUS: f64 = 6_371_000.0;

const MINUS_INF_IN_DB: f64 = -200.0;

// -------------------------------------------------------------------------------------------------

macro_rules! assert_eq_with_epsilon {
    ($x:expr, $y:expr, $d:expr) => {
        if !(($x - $y).abs() < $d) {
            panic!("{} != {} within {}", $x, $y, $d);
        }
    };
}
#[allow(unused_imports)]
pub(crate) use assert_eq_with_epsilon;

// -------------------------------------------------------------------------------------------------

/// Generates a unique usize number, by simply counting atomically upwards from 1.
pub fn unique_usize_id() -> usize {
    static JOB_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);
    JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// -------------------------------------------------------------------------------------------------

pub fn linear_to_db(value: f64) -> f64 {
    if value == 1.0 {
        return 0.0; // avoid rounding errors at exactly 0 dB
    } else if value > 1e-12 {
        return 20.0 * value.log10();
    }
    MINUS_INF_IN_DB
}

pub fn db_to_linear(value: f64) -> f64 {
    if value == 0.0 {
        return 1.0; // avoid rounding errors at exactly 0 dB
    } else if value > MINUS_INF_IN_DB {
        return 10.0f64.powf(value / 20.0);
    }
    0.0
}

// -------------------------------------------------------------------------------------------------

/// Surface great-circle distance between two (latitude, longitude) pairs in
/// decimal degrees, via the haversine formula [m].
pub fn great_circle_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial great-circle bearing from point 1 towards point 2 [radians],
/// normalized to `[0, 2π)`.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    let theta = y.atan2(x);
    (theta + 2.0 * std::f64::consts::PI) % (2.0 * std::f64::consts::PI)
}

/// Destination (latitude, longitude) in decimal degrees reached from the
/// given start point by following `bearing` [radians] for `range` [m] along
/// the great circle.
pub fn destination(lat: f64, lon: f64, bearing: f64, range: f64) -> (f64, f64) {
    let phi1 = lat.to_radians();
    let lambda1 = lon.to_radians();
    let delta = range / EARTH_RADIUS;

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * bearing.cos()).asin();
    let lambda2 = lambda1
        + (bearing.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    let mut lon2 = lambda2.to_degrees();
    if lon2 > 180.0 {
        lon2 -= 360.0;
    } else if lon2 < -180.0 {
        lon2 += 360.0;
    }
    (phi2.to_degrees(), lon2)
}

// -------------------------------------------------------------------------------------------------

/// Converts UTM easting/northing [m] of the given zone to (latitude,
/// longitude) in decimal degrees on the WGS84 ellipsoid.
///
/// Standard inverse transverse-Mercator series expansion; accurate to well
/// below a meter, which is plenty for sampling environmental databases.
pub fn utm_to_geographic(
    easting: f64,
    northing: f64,
    zone: u32,
    southern_hemisphere: bool,
) -> (f64, f64) {
    const A: f64 = 6_378_137.0; // WGS84 semi-major axis
    const ECC_SQ: f64 = 0.006_694_379_990_14; // WGS84 first eccentricity squared
    const K0: f64 = 0.9996;

    let x = easting - 500_000.0;
    let y = if southern_hemisphere {
        northing - 10_000_000.0
    } else {
        northing
    };

    let ecc_prime_sq = ECC_SQ / (1.0 - ECC_SQ);
    let e1 = (1.0 - (1.0 - ECC_SQ).sqrt()) / (1.0 + (1.0 - ECC_SQ).sqrt());

    let m = y / K0;
    let mu = m
        / (A * (1.0 - ECC_SQ / 4.0 - 3.0 * ECC_SQ * ECC_SQ / 64.0
            - 5.0 * ECC_SQ * ECC_SQ * ECC_SQ / 256.0));

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin();

    let n1 = A / (1.0 - ECC_SQ * phi1.sin().powi(2)).sqrt();
    let t1 = phi1.tan().powi(2);
    let c1 = ecc_prime_sq * phi1.cos().powi(2);
    let r1 = A * (1.0 - ECC_SQ) / (1.0 - ECC_SQ * phi1.sin().powi(2)).powf(1.5);
    let d = x / (n1 * K0);

    let lat = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ecc_prime_sq) * d.powi(4)
                    / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * ecc_prime_sq
                    - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lon = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ecc_prime_sq + 24.0 * t1 * t1)
            * d.powi(5)
            / 120.0)
        / phi1.cos();

    let lon_origin = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;

    (lat.to_degrees(), lon_origin + lon.to_degrees())
}

// -------------------------------------------------------------------------------------------------

/// Month number (1..=12) to its English name, for provider implementations
/// keyed by month (e.g. monthly climatology databases).
pub fn month_name(month: u32) -> Option<&'static str> {
    Some(match month {
        1 => "january",
        2 => "february",
        3 => "march",
        4 => "april",
        5 => "may",
        6 => "june",
        7 => "july",
        8 => "august",
        9 => "september",
        10 => "october",
        11 => "november",
        12 => "december",
        _ => return None,
    })
}

/// English month name (case-insensitive) back to its 1..=12 number.
pub fn month_number(name: &str) -> Option<u32> {
    (1..=12).find(|&m| month_name(m) == Some(name.to_ascii_lowercase().as_str()))
}

// -------------------------------------------------------------------------------------------------

/// Creates the per-run working directory tree, returning its path.
pub fn make_work_dir(
    base: &Path,
    job_id: usize,
    frequency: f64,
    time_key: i64,
    run: usize,
) -> io::Result<PathBuf> {
    let dir = base
        .join(format!("woss{job_id}"))
        .join(format!("freq{frequency}"))
        .join(format!("time{time_key}"))
        .join(format!("run{run}"));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Removes a job's whole working tree. Missing directories are not an error.
pub fn remove_work_dir(base: &Path, job_id: usize) -> io::Result<()> {
    let dir = base.join(format!("woss{job_id}"));
    match fs::remove_dir_all(&dir) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lin_db_conversion() {
        assert_eq!(linear_to_db(1.0), 0.0);
        assert_eq!(linear_to_db(0.0), MINUS_INF_IN_DB);
        assert_eq!(db_to_linear(MINUS_INF_IN_DB), 0.0);
        assert_eq!(db_to_linear(0.0), 1.0);
        assert_eq_with_epsilon!(linear_to_db(db_to_linear(20.0)), 20.0, 0.0001);
        assert_eq_with_epsilon!(linear_to_db(db_to_linear(-20.0)), -20.0, 0.0001);
    }

    #[test]
    fn great_circle_basics() {
        // one degree of latitude on the reference sphere
        let d = great_circle_distance(45.0, 13.0, 46.0, 13.0);
        assert_eq_with_epsilon!(d, EARTH_RADIUS * 1.0f64.to_radians(), 1.0);
        // degenerate pair
        assert_eq!(great_circle_distance(45.0, 13.0, 45.0, 13.0), 0.0);
        // due north bearing
        assert_eq_with_epsilon!(initial_bearing(45.0, 13.0, 46.0, 13.0), 0.0, 1e-9);
    }

    #[test]
    fn destination_round_trip() {
        let (lat, lon) = (45.7, 13.7);
        let bearing = initial_bearing(lat, lon, 45.9, 14.1);
        let range = great_circle_distance(lat, lon, 45.9, 14.1);
        let (lat2, lon2) = destination(lat, lon, bearing, range);
        assert_eq_with_epsilon!(lat2, 45.9, 1e-6);
        assert_eq_with_epsilon!(lon2, 14.1, 1e-6);
    }

    #[test]
    fn utm_inverse_is_plausible() {
        // Trieste harbour, zone 33N
        let (lat, lon) = utm_to_geographic(402_545.0, 5_060_305.0, 33, false);
        assert_eq_with_epsilon!(lat, 45.69, 0.05);
        assert_eq_with_epsilon!(lon, 13.74, 0.05);
    }

    #[test]
    fn month_round_trip() {
        for m in 1..=12 {
            assert_eq!(month_number(month_name(m).unwrap()), Some(m));
        }
        assert_eq!(month_name(13), None);
        assert_eq!(month_number("smarch"), None);
    }
}
