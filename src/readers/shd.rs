//! Binary transmission-loss field (SHD) reader.

use std::{
    fs,
    io::{Cursor, Read},
};

use byteorder::{LittleEndian, ReadBytesExt};

use num_complex::Complex64;

use crate::{
    error::Error,
    types::{pressure::Pressure, time_arr::TimeArr},
};

use super::{grid_index, AvgPressureCache, AvgQuery, ReaderContext, ResReader};

// -------------------------------------------------------------------------------------------------

/// The parsed pressure field: a flattened (theta × source depth × receiver
/// depth × receiver range) grid of complex pressures plus its axes.
#[derive(Debug, Default)]
pub struct ShdData {
    /// Fortran record length in 4-byte words; every header and body record
    /// occupies `4 · record_length` bytes.
    pub record_length: u64,
    pub plot_type: String,
    pub frequency: f64,
    pub theta: Vec<f32>,
    pub tx_depths: Vec<f32>,
    pub rx_depths: Vec<f32>,
    /// Receiver ranges as stored in the file [km].
    pub rx_ranges: Vec<f32>,
    /// Receiver depths per range: the full depth axis for "rectilin" grids,
    /// 1 for "irregular" ones.
    pub nrx_per_range: usize,
    pub values: Vec<Complex64>,
}

impl ShdData {
    /// Flat index of the nearest grid cell. The receiver range is quantized
    /// in km against the file's range axis.
    pub fn index_of(&self, tx_depth: f64, rx_depth: f64, rx_range: f64, theta: f64) -> usize {
        let theta_index = grid_index(theta, &self.theta);
        let tx_index = grid_index(tx_depth, &self.tx_depths);
        let rx_depth_index = grid_index(
            rx_depth,
            &self.rx_depths[..self.nrx_per_range.min(self.rx_depths.len())],
        );
        let rx_range_index = grid_index(rx_range / 1000.0, &self.rx_ranges);

        let nrr = self.rx_ranges.len();
        theta_index * self.tx_depths.len() * self.nrx_per_range * nrr
            + tx_index * self.nrx_per_range * nrr
            + rx_depth_index * nrr
            + rx_range_index
    }

    pub fn value_at(&self, tx_depth: f64, rx_depth: f64, rx_range: f64) -> Option<Complex64> {
        self.values
            .get(self.index_of(tx_depth, rx_depth, rx_range, 0.0))
            .copied()
    }

    fn avg_pressure(&self, query: &AvgQuery) -> Complex64 {
        let start = self.index_of(query.tx_depth, query.start_rx_depth, query.start_rx_range, 0.0);
        let end = self.index_of(query.tx_depth, query.end_rx_depth, query.end_rx_range, 0.0);

        let mut sum = Complex64::new(0.0, 0.0);
        let mut count = 0.0;
        for index in start..=end.min(self.values.len().saturating_sub(1)) {
            sum += self.values[index];
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

/// Reads the engine's binary pressure-field file.
#[derive(Debug)]
pub struct ShdReader {
    context: ReaderContext,
    data: ShdData,
    header_collected: bool,
    file_collected: bool,
    cache: AvgPressureCache,
}

impl ShdReader {
    pub fn new(context: ReaderContext) -> Self {
        Self {
            context,
            data: ShdData::default(),
            header_collected: false,
            file_collected: false,
            cache: AvgPressureCache::new(),
        }
    }

    pub fn data(&self) -> &ShdData {
        &self.data
    }

    fn result_error(&self, what: impl ToString) -> Error {
        Error::ResultFileError(self.context.file.clone(), what.to_string())
    }

    fn parse_header(&mut self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        cursor.set_position(0);
        let record_length = cursor
            .read_i32::<LittleEndian>()
            .map_err(|err| self.result_error(err))?;
        if record_length <= 0 {
            return Err(self.result_error(format!("bad record length {record_length}")));
        }
        self.data.record_length = record_length as u64;
        let record_bytes = 4 * self.data.record_length;

        // record 1: plot type
        cursor.set_position(record_bytes);
        let mut plot_type = [0u8; 10];
        cursor
            .read_exact(&mut plot_type)
            .map_err(|err| self.result_error(err))?;
        self.data.plot_type = String::from_utf8_lossy(&plot_type).trim().to_owned();

        // record 2: frequency and axis sizes
        cursor.set_position(2 * record_bytes);
        self.data.frequency = self.read_f32(cursor)? as f64;
        let n_theta = self.read_count(cursor)?;
        let n_tx = self.read_count(cursor)?;
        let n_rx_depths = self.read_count(cursor)?;
        let n_rx_ranges = self.read_count(cursor)?;

        // records 3..=6: the axis arrays
        cursor.set_position(3 * record_bytes);
        self.data.theta = self.read_f32_array(cursor, n_theta)?;
        cursor.set_position(4 * record_bytes);
        self.data.tx_depths = self.read_f32_array(cursor, n_tx)?;
        cursor.set_position(5 * record_bytes);
        self.data.rx_depths = self.read_f32_array(cursor, n_rx_depths)?;
        cursor.set_position(6 * record_bytes);
        self.data.rx_ranges = self.read_f32_array(cursor, n_rx_ranges)?;

        self.data.nrx_per_range = match self.data.plot_type.as_str() {
            "irregular" => 1,
            // "rectilin" and any unknown plot type span the full depth axis
            _ => n_rx_depths,
        };

        self.data.values =
            vec![Complex64::new(0.0, 0.0); n_theta * n_tx * n_rx_depths * n_rx_ranges];
        Ok(())
    }

    fn parse_body(&mut self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        let record_bytes = 4 * self.data.record_length;
        let header_offset = self.context.shd_syntax.header_offset();
        let (n_theta, n_tx) = (self.data.theta.len(), self.data.tx_depths.len());
        let (n_rx_depths, n_rx_ranges) = (self.data.rx_depths.len(), self.data.rx_ranges.len());
        let nrx = self.data.nrx_per_range;

        for itheta in 0..n_theta {
            for isd in 0..n_tx {
                for ird in 0..n_rx_depths {
                    let recnum =
                        (itheta * n_tx * nrx + isd * nrx + ird) as u64 + header_offset;
                    cursor.set_position(recnum * record_bytes);

                    for irr in 0..n_rx_ranges {
                        let re = self.read_f32(cursor)? as f64;
                        let im = self.read_f32(cursor)? as f64;

                        let index = itheta * n_tx * nrx * n_rx_ranges
                            + isd * nrx * n_rx_ranges
                            + ird * n_rx_ranges
                            + irr;

                        if re.is_finite() && im.is_finite() {
                            self.data.values[index] += Complex64::new(re, im);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn read_f32(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<f32, Error> {
        cursor
            .read_f32::<LittleEndian>()
            .map_err(|err| self.result_error(err))
    }

    fn read_count(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<usize, Error> {
        let count = cursor
            .read_i32::<LittleEndian>()
            .map_err(|err| self.result_error(err))?;
        Ok(count.max(0) as usize)
    }

    fn read_f32_array(
        &self,
        cursor: &mut Cursor<Vec<u8>>,
        count: usize,
    ) -> Result<Vec<f32>, Error> {
        (0..count).map(|_| self.read_f32(cursor)).collect()
    }
}

impl ResReader for ShdReader {
    fn set_file(&mut self, file: std::path::PathBuf) {
        self.context.file = file;
    }

    fn initialize(&mut self) -> Result<(), Error> {
        let bytes = fs::read(&self.context.file)
            .map_err(|err| Error::ResultFileError(self.context.file.clone(), err.to_string()))?;
        let mut cursor = Cursor::new(bytes);
        if !self.header_collected {
            self.parse_header(&mut cursor)?;
            self.header_collected = true;
        }
        self.parse_body(&mut cursor)?;
        self.file_collected = true;
        Ok(())
    }

    fn frequency(&self) -> f64 {
        self.data.frequency
    }

    fn read_pressure(&self, tx_depth: f64, rx_depth: f64, rx_range: f64) -> Pressure {
        if !self.file_collected {
            return Pressure::new_not_valid();
        }
        self.data
            .value_at(tx_depth, rx_depth, rx_range)
            .map(Pressure::from_complex)
            .unwrap_or_else(Pressure::new_not_valid)
    }

    fn read_time_arr(&self, tx_depth: f64, rx_depth: f64, rx_range: f64) -> TimeArr {
        if !self.file_collected {
            return TimeArr::new_not_valid();
        }
        let pressure = self.read_pressure(tx_depth, rx_depth, rx_range);
        if !pressure.is_valid() {
            return TimeArr::new_not_valid();
        }
        let mut arr = TimeArr::with_delay_resolution(self.context.delay_resolution);
        arr.sum_value(0.0, pressure);
        arr
    }

    fn read_avg_pressure(
        &self,
        tx_depth: f64,
        start_rx_depth: f64,
        start_rx_range: f64,
        end_rx_depth: f64,
        end_rx_range: f64,
    ) -> Pressure {
        if !self.file_collected {
            return Pressure::new_not_valid();
        }
        let query = AvgQuery {
            tx_depth,
            start_rx_depth,
            start_rx_range,
            end_rx_depth,
            end_rx_range,
        };
        let value = self.cache.get_or_compute(query, || self.data.avg_pressure(&query));
        Pressure::from_complex(value)
    }
}

// -------------------------------------------------------------------------------------------------
