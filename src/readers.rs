//! Engine result-file readers.
//!
//! Three readers reconstruct the per-frequency results the engine leaves on
//! disk: arrivals in ASCII or binary form (channel impulse responses) and
//! the binary transmission-loss pressure field. All of them expose
//! nearest-grid-cell lookups over a (source depth × receiver depth ×
//! receiver range) matrix.

pub mod arr_ascii;
pub mod arr_bin;
pub mod shd;

use std::{fmt, path::PathBuf, sync::Mutex};

use num_complex::Complex64;

use crate::{
    error::Error,
    types::{pressure::Pressure, time_arr::TimeArr},
};

// -------------------------------------------------------------------------------------------------

/// Arrivals file syntax variants, matching the engine release that produced
/// the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum ArrSyntax {
    /// Pre 31 August 2016 syntax, without imaginary time delay.
    #[strum(serialize = "0")]
    V0,
    /// Post 31 August 2016 syntax, with imaginary time delay.
    #[strum(serialize = "1")]
    V1,
    /// Post 31 March 2019 syntax, with the '2D'-prefixed header.
    #[strum(serialize = "2")]
    V2,
}

impl ArrSyntax {
    pub fn has_imaginary_delay(&self) -> bool {
        matches!(self, ArrSyntax::V1 | ArrSyntax::V2)
    }
}

/// Transmission-loss field file syntax variants. The variant selects the
/// header offset of the record index formula and must match the engine
/// release bit-exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum ShdSyntax {
    #[strum(serialize = "0")]
    V0,
    #[strum(serialize = "1")]
    V1,
}

impl ShdSyntax {
    pub fn header_offset(&self) -> u64 {
        match self {
            ShdSyntax::V0 => 7,
            ShdSyntax::V1 => 10,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Everything a reader needs to know about the job that spawned it.
#[derive(Debug, Clone)]
pub struct ReaderContext {
    pub job_id: usize,
    pub file: PathBuf,
    pub arr_syntax: ArrSyntax,
    pub shd_syntax: ShdSyntax,
    pub delay_resolution: f64,
    pub debug: bool,
}

// -------------------------------------------------------------------------------------------------

/// A parsed engine result for one frequency, exposing nearest-grid-cell
/// pressure and impulse-response lookups.
pub trait ResReader: Send {
    /// Points the reader at a result file. The header is parsed from the
    /// first file only; every subsequent file must share its grid.
    fn set_file(&mut self, file: std::path::PathBuf);

    /// Parses the current result file. The first call collects the header;
    /// every call accumulates the body into the result matrix, which is how
    /// Monte-Carlo runs stack up before the per-lookup division by the run
    /// count. Lookups before the first successful call return not-valid
    /// sentinels.
    fn initialize(&mut self) -> Result<(), Error>;

    /// The frequency the parsed file was computed for [Hz].
    fn frequency(&self) -> f64;

    fn read_pressure(&self, tx_depth: f64, rx_depth: f64, rx_range: f64) -> Pressure;

    fn read_time_arr(&self, tx_depth: f64, rx_depth: f64, rx_range: f64) -> TimeArr;

    /// Average pressure over the rx depth/range box. Memoized per instance:
    /// repeating the previous query returns the cached value without
    /// touching the parsed matrix.
    fn read_avg_pressure(
        &self,
        tx_depth: f64,
        start_rx_depth: f64,
        start_rx_range: f64,
        end_rx_depth: f64,
        end_rx_range: f64,
    ) -> Pressure;
}

// -------------------------------------------------------------------------------------------------

/// Quantizes a value onto a result-file axis, returning the flat index of
/// the nearest grid cell. Values at or beyond the endpoints snap to the
/// nearest endpoint; tied fractional parts round up on the magnitude.
pub(crate) fn grid_index(value: f64, axis: &[f32]) -> usize {
    let n = axis.len();
    if n == 0 {
        return 0;
    }
    if value <= axis[0] as f64 || n == 1 {
        return 0;
    }
    if value >= axis[n - 1] as f64 {
        return n - 1;
    }
    let quantized = (value - axis[0] as f64) / ((axis[n - 1] as f64 - axis[0] as f64) / n as f64);
    let index = if quantized.abs().fract() >= 0.5 {
        quantized.ceil()
    } else {
        quantized.floor()
    };
    (index as usize).min(n - 1)
}

// -------------------------------------------------------------------------------------------------

/// Per-arrival pressure for the given file syntax.
///
/// The `2π·f ± phase·π/180` argument carries no time variable: the engine
/// encodes arrival phase in a time-invariant reference, and the imaginary
/// delay of the newer syntaxes attenuates the amplitude with a negated
/// imaginary component.
pub(crate) fn arrival_pressure(
    syntax: ArrSyntax,
    frequency: f64,
    amplitude: f64,
    phase_degrees: f64,
    imaginary_delay: f64,
) -> Pressure {
    use std::f64::consts::PI;

    let argument = 2.0 * PI * frequency + phase_degrees * PI / 180.0;
    if syntax.has_imaginary_delay() {
        let attenuation = (2.0 * PI * frequency * imaginary_delay).exp();
        Pressure::new(
            amplitude * attenuation * argument.cos(),
            -amplitude * attenuation * argument.sin(),
        )
    } else {
        Pressure::new(amplitude * argument.cos(), amplitude * argument.sin())
    }
}

/// Delay recovery for vertical-channel glitches: a non-positive delay or a
/// non-positive range axis value is replaced by the direct vertical path at
/// the 1500 m/s reference speed.
pub(crate) fn recover_delay(delay: f64, rx_range: f64, tx_depth: f64, rx_depth: f64) -> f64 {
    let mut delay = delay;
    if delay <= 0.0 || rx_range <= 0.0 {
        delay = (rx_depth - tx_depth).abs() / 1500.0;
    }
    if delay <= 0.0 {
        delay = delay.abs();
    }
    delay
}

// -------------------------------------------------------------------------------------------------

/// Single-entry memo for the last average-pressure query. Per reader
/// instance, so concurrent readers never observe each other's entries.
pub(crate) struct AvgPressureCache {
    last: Mutex<Option<(AvgQuery, Complex64)>>,
}

#[derive(PartialEq, Clone, Copy)]
pub(crate) struct AvgQuery {
    pub tx_depth: f64,
    pub start_rx_depth: f64,
    pub start_rx_range: f64,
    pub end_rx_depth: f64,
    pub end_rx_range: f64,
}

impl AvgPressureCache {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    pub fn get_or_compute(
        &self,
        query: AvgQuery,
        compute: impl FnOnce() -> Complex64,
    ) -> Complex64 {
        let mut last = self.last.lock().expect("poisoned cache lock");
        if let Some((cached_query, cached_value)) = &*last {
            if *cached_query == query {
                return *cached_value;
            }
        }
        let value = compute();
        *last = Some((query, value));
        value
    }
}

impl fmt::Debug for AvgPressureCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AvgPressureCache")
    }
}

// -------------------------------------------------------------------------------------------------

/// The arrivals matrix shared by the ASCII and binary readers: a flattened
/// (source depth × receiver depth × receiver range) grid of impulse
/// responses plus its coordinate axes.
#[derive(Debug, Default)]
pub struct ArrData {
    pub frequency: f64,
    pub tx_depths: Vec<f32>,
    pub rx_depths: Vec<f32>,
    pub rx_ranges: Vec<f32>,
    pub values: Vec<TimeArr>,
}

impl ArrData {
    pub(crate) fn allocate_values(&mut self, delay_resolution: f64) {
        let cells = self.tx_depths.len() * self.rx_depths.len() * self.rx_ranges.len();
        self.values = (0..cells)
            .map(|_| TimeArr::with_delay_resolution(delay_resolution))
            .collect();
    }

    /// Flat index of the nearest grid cell for the given query point.
    pub fn index_of(&self, tx_depth: f64, rx_depth: f64, rx_range: f64) -> usize {
        let tx_index = grid_index(tx_depth, &self.tx_depths);
        let rx_depth_index = grid_index(rx_depth, &self.rx_depths);
        let rx_range_index = grid_index(rx_range, &self.rx_ranges);
        tx_index * self.rx_depths.len() * self.rx_ranges.len()
            + rx_depth_index * self.rx_ranges.len()
            + rx_range_index
    }

    pub fn value_at(&self, tx_depth: f64, rx_depth: f64, rx_range: f64) -> Option<&TimeArr> {
        self.values.get(self.index_of(tx_depth, rx_depth, rx_range))
    }

    pub(crate) fn cell_index(&self, isd: usize, ird: usize, irr: usize) -> usize {
        isd * self.rx_depths.len() * self.rx_ranges.len() + ird * self.rx_ranges.len() + irr
    }

    /// Complex sum over the flat index interval of the two query corners,
    /// divided by the cell count.
    pub(crate) fn avg_pressure(&self, query: &AvgQuery) -> Complex64 {
        let start = self.index_of(query.tx_depth, query.start_rx_depth, query.start_rx_range);
        let end = self.index_of(query.tx_depth, query.end_rx_depth, query.end_rx_range);

        let mut sum = Complex64::new(0.0, 0.0);
        let mut count = 0.0;
        for index in start..=end.min(self.values.len().saturating_sub(1)) {
            sum += self.values[index].to_pressure().complex();
            count += 1.0;
        }
        if count > 0.0 {
            sum / count
        } else {
            Complex64::new(f64::INFINITY, f64::INFINITY)
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn grid_index_endpoints_snap() {
        let axis = [0.0f32, 10.0, 20.0, 30.0];
        assert_eq!(grid_index(-5.0, &axis), 0);
        assert_eq!(grid_index(0.0, &axis), 0);
        assert_eq!(grid_index(30.0, &axis), 3);
        assert_eq!(grid_index(99.0, &axis), 3);
        assert_eq!(grid_index(5.0, &[7.0f32]), 0);
    }

    #[test]
    fn grid_index_rounds_half_up() {
        let axis = [0.0f32, 10.0, 20.0, 30.0];
        // cell width for quantization is span/len = 30/4 = 7.5
        assert_eq!(grid_index(3.0, &axis), 0);
        assert_eq!(grid_index(3.75, &axis), 1);
        assert_eq!(grid_index(7.0, &axis), 1);
    }

    #[test]
    fn arrival_pressure_syntax_variants() {
        let p0 = arrival_pressure(ArrSyntax::V0, 0.0, 2.0, 90.0, 0.0);
        assert_abs_diff_eq!(p0.re(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p0.im(), 2.0, epsilon = 1e-12);

        // with zero imaginary delay the newer syntaxes only negate the
        // imaginary part
        let p1 = arrival_pressure(ArrSyntax::V1, 0.0, 2.0, 90.0, 0.0);
        assert_abs_diff_eq!(p1.re(), p0.re(), epsilon = 1e-12);
        assert_abs_diff_eq!(p1.im(), -p0.im(), epsilon = 1e-12);

        // a negative imaginary delay attenuates
        let p2 = arrival_pressure(ArrSyntax::V1, 1000.0, 2.0, 0.0, -1e-4);
        assert!(p2.abs() < 2.0);
    }

    #[test]
    fn delay_recovery() {
        // healthy record is untouched
        assert_eq!(recover_delay(0.5, 1000.0, 10.0, 90.0), 0.5);
        // vertical channel: direct path at 1500 m/s
        let recovered = recover_delay(-1.0, 0.0, 10.0, 90.0);
        assert_abs_diff_eq!(recovered, 80.0 / 1500.0, epsilon = 1e-12);
        // degenerate depths still yield a non-negative delay
        assert_eq!(recover_delay(-1.0, 0.0, 50.0, 50.0), 0.0);
    }

    #[test]
    fn avg_cache_memoizes_single_entry() {
        let cache = AvgPressureCache::new();
        let query = AvgQuery {
            tx_depth: 10.0,
            start_rx_depth: 0.0,
            start_rx_range: 0.0,
            end_rx_depth: 100.0,
            end_rx_range: 1000.0,
        };
        let mut calls = 0;
        let value = cache.get_or_compute(query, || {
            calls += 1;
            Complex64::new(1.0, 0.0)
        });
        assert_eq!(value, Complex64::new(1.0, 0.0));
        let value = cache.get_or_compute(query, || {
            calls += 1;
            Complex64::new(2.0, 0.0)
        });
        // second identical query is served from the memo
        assert_eq!(value, Complex64::new(1.0, 0.0));
        assert_eq!(calls, 1);
    }
}
