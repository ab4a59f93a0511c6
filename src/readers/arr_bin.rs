//! Binary arrivals file reader.
//!
//! Same logical content as the ASCII form, framed with Fortran record
//! markers: a 4-byte leading record header, 8 marker bytes after each count
//! and axis array, and a two-float trailer after every arrival record.

use std::{
    fs,
    io::{Cursor, Seek, SeekFrom},
};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::{
    error::Error,
    types::{pressure::Pressure, time_arr::TimeArr},
};

use super::{
    arrival_pressure, recover_delay, ArrData, ArrSyntax, AvgPressureCache, AvgQuery,
    ReaderContext, ResReader,
};

// -------------------------------------------------------------------------------------------------

const RECORD_MARKER_BYTES: i64 = 8;

// -------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct ArrBinReader {
    context: ReaderContext,
    data: ArrData,
    header_collected: bool,
    file_collected: bool,
    /// Byte offset of the body, so re-reads for later runs skip the header.
    body_offset: u64,
    cache: AvgPressureCache,
}

impl ArrBinReader {
    pub fn new(context: ReaderContext) -> Self {
        Self {
            context,
            data: ArrData::default(),
            header_collected: false,
            file_collected: false,
            body_offset: 0,
            cache: AvgPressureCache::new(),
        }
    }

    pub fn data(&self) -> &ArrData {
        &self.data
    }

    fn result_error(&self, what: impl ToString) -> Error {
        Error::ResultFileError(self.context.file.clone(), what.to_string())
    }

    fn parse_header(&mut self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        cursor.set_position(4);

        if self.context.arr_syntax == ArrSyntax::V2 {
            let mut sim_type = [0u8; 4];
            std::io::Read::read_exact(cursor, &mut sim_type)
                .map_err(|err| self.result_error(err))?;
            if &sim_type != b"'2D'" {
                return Err(self.result_error(format!(
                    "{} arrival files are not supported",
                    String::from_utf8_lossy(&sim_type)
                )));
            }

            self.skip_marker(cursor)?;
            self.data.frequency = self.read_f32(cursor)? as f64;
            self.skip_marker(cursor)?;

            let n_tx = self.read_count(cursor)?;
            self.data.tx_depths = self.read_f32_array(cursor, n_tx)?;
            self.skip_marker(cursor)?;

            let n_rx_depths = self.read_count(cursor)?;
            self.data.rx_depths = self.read_f32_array(cursor, n_rx_depths)?;
            self.skip_marker(cursor)?;

            let n_rx_ranges = self.read_count(cursor)?;
            self.data.rx_ranges = self.read_f32_array(cursor, n_rx_ranges)?;
        } else {
            // legacy header: counts first, then the axis arrays. The file
            // carries no frequency field in this framing; the matrix keeps
            // the default of 0 Hz, exactly as legacy consumers expect.
            let n_tx = self.read_count(cursor)?;
            let n_rx_depths = self.read_count(cursor)?;
            let n_rx_ranges = self.read_count(cursor)?;

            self.skip_marker(cursor)?;
            self.data.tx_depths = self.read_f32_array(cursor, n_tx)?;
            self.skip_marker(cursor)?;
            self.data.rx_depths = self.read_f32_array(cursor, n_rx_depths)?;
            self.skip_marker(cursor)?;
            self.data.rx_ranges = self.read_f32_array(cursor, n_rx_ranges)?;
        }

        self.skip_marker(cursor)?;
        self.data.allocate_values(self.context.delay_resolution);
        Ok(())
    }

    fn parse_body(&mut self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        let syntax = self.context.arr_syntax;

        for isd in 0..self.data.tx_depths.len() {
            let max_arrivals = self.read_count(cursor)?;
            self.skip_marker(cursor)?;

            log::debug!(
                "ArrBinReader({}): source {isd}, max arrivals = {max_arrivals}",
                self.context.job_id
            );

            for ird in 0..self.data.rx_depths.len() {
                for irr in 0..self.data.rx_ranges.len() {
                    let arrivals = self.read_count(cursor)?;
                    self.skip_marker(cursor)?;

                    let cell = self.data.cell_index(isd, ird, irr);
                    if arrivals == 0 {
                        self.data.values[cell].sum_value(0.0, Pressure::default());
                        continue;
                    }

                    for _ in 0..arrivals {
                        let amplitude = self.read_f32(cursor)? as f64;
                        let phase = self.read_f32(cursor)? as f64;
                        let delay = self.read_f32(cursor)? as f64;
                        let imaginary_delay = if syntax.has_imaginary_delay() {
                            self.read_f32(cursor)? as f64
                        } else {
                            0.0
                        };
                        let _src_angle = self.read_f32(cursor)?;
                        let _rx_angle = self.read_f32(cursor)?;
                        let _top_bounces = self.read_f32(cursor)?;
                        let _bottom_bounces = self.read_f32(cursor)?;
                        self.skip_marker(cursor)?;

                        let delay = recover_delay(
                            delay,
                            self.data.rx_ranges[irr] as f64,
                            self.data.tx_depths[isd] as f64,
                            self.data.rx_depths[ird] as f64,
                        );
                        let pressure = arrival_pressure(
                            syntax,
                            self.data.frequency,
                            amplitude,
                            phase,
                            imaginary_delay,
                        );
                        self.data.values[cell].sum_value(delay, pressure);
                    }
                }
            }
        }
        Ok(())
    }

    fn skip_marker(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        cursor
            .seek(SeekFrom::Current(RECORD_MARKER_BYTES))
            .map_err(|err| self.result_error(err))?;
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

impl ResReader for ArrBinReader {
    fn set_file(&mut self, file: std::path::PathBuf) {
        self.context.file = file;
    }

    fn initialize(&mut self) -> Result<(), Error> {
        let bytes = fs::read(&self.context.file)
            .map_err(|err| Error::ResultFileError(self.context.file.clone(), err.to_string()))?;
        let mut cursor = Cursor::new(bytes);
        if self.header_collected {
            cursor.set_position(self.body_offset);
        } else {
            self.parse_header(&mut cursor)?;
            self.body_offset = cursor.position();
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
        self.read_time_arr(tx_depth, rx_depth, rx_range).to_pressure()
    }

    fn read_time_arr(&self, tx_depth: f64, rx_depth: f64, rx_range: f64) -> TimeArr {
        if !self.file_collected {
            return TimeArr::new_not_valid();
        }
        self.data
            .value_at(tx_depth, rx_depth, rx_range)
            .cloned()
            .unwrap_or_else(TimeArr::new_not_valid)
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

#[cfg(test)]
mod tests {
    use byteorder::{LittleEndian, WriteBytesExt};

    use crate::types::time_arr::TimeArr;

    use super::*;

    fn context(path: &std::path::Path, syntax: ArrSyntax) -> ReaderContext {
        ReaderContext {
            job_id: 0,
            file: path.to_path_buf(),
            arr_syntax: syntax,
            shd_syntax: super::super::ShdSyntax::V1,
            delay_resolution: TimeArr::DEFAULT_DELAY_RESOLUTION,
            debug: false,
        }
    }

    fn marker(out: &mut Vec<u8>) {
        out.extend_from_slice(&[0u8; 8]);
    }

    /// V2 framing: 1 source, 1 rx depth, 2 rx ranges, one arrival per cell.
    fn v2_fixture() -> Vec<u8> {
        let mut out = Vec::new();
        out.write_i32::<LittleEndian>(0).unwrap(); // leading record header
        out.extend_from_slice(b"'2D'");
        marker(&mut out);
        out.write_f32::<LittleEndian>(12_000.0).unwrap();
        marker(&mut out);

        out.write_i32::<LittleEndian>(1).unwrap();
        out.write_f32::<LittleEndian>(30.0).unwrap();
        marker(&mut out);

        out.write_i32::<LittleEndian>(1).unwrap();
        out.write_f32::<LittleEndian>(60.0).unwrap();
        marker(&mut out);

        out.write_i32::<LittleEndian>(2).unwrap();
        out.write_f32::<LittleEndian>(500.0).unwrap();
        out.write_f32::<LittleEndian>(1_000.0).unwrap();
        marker(&mut out);

        // body: source 0
        out.write_i32::<LittleEndian>(1).unwrap(); // max arrivals
        marker(&mut out);
        for (delay, amp) in [(0.4f32, 0.8f32), (0.9, 0.4)] {
            out.write_i32::<LittleEndian>(1).unwrap(); // curr arrivals
            marker(&mut out);
            out.write_f32::<LittleEndian>(amp).unwrap();
            out.write_f32::<LittleEndian>(0.0).unwrap(); // phase
            out.write_f32::<LittleEndian>(delay).unwrap();
            out.write_f32::<LittleEndian>(0.0).unwrap(); // imaginary delay
            out.write_f32::<LittleEndian>(-5.0).unwrap();
            out.write_f32::<LittleEndian>(5.0).unwrap();
            out.write_f32::<LittleEndian>(0.0).unwrap();
            out.write_f32::<LittleEndian>(1.0).unwrap();
            marker(&mut out); // two-float trailer
        }
        out
    }

    #[test]
    fn parses_v2_framing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bellhop.arr");
        std::fs::write(&path, v2_fixture()).unwrap();

        let mut reader = ArrBinReader::new(context(&path, ArrSyntax::V2));
        reader.initialize().unwrap();

        assert_eq!(reader.frequency(), 12_000.0);
        assert_eq!(reader.data().rx_ranges, vec![500.0, 1_000.0]);

        let near = reader.read_time_arr(30.0, 60.0, 500.0);
        assert_eq!(near.len(), 1);
        let (delay, _) = near.taps().next().unwrap();
        assert!((delay - 0.4).abs() < 1e-6);

        let far = reader.read_time_arr(30.0, 60.0, 1_000.0);
        let (delay, _) = far.taps().next().unwrap();
        assert!((delay - 0.9).abs() < 1e-6);
    }

    #[test]
    fn legacy_framing_has_no_frequency() {
        let mut out = Vec::new();
        out.write_i32::<LittleEndian>(0).unwrap();
        out.write_i32::<LittleEndian>(1).unwrap(); // Nsd
        out.write_i32::<LittleEndian>(1).unwrap(); // Nrd
        out.write_i32::<LittleEndian>(1).unwrap(); // Nrr
        marker(&mut out);
        out.write_f32::<LittleEndian>(10.0).unwrap();
        marker(&mut out);
        out.write_f32::<LittleEndian>(90.0).unwrap();
        marker(&mut out);
        out.write_f32::<LittleEndian>(800.0).unwrap();
        marker(&mut out);
        out.write_i32::<LittleEndian>(0).unwrap(); // max arrivals
        marker(&mut out);
        out.write_i32::<LittleEndian>(0).unwrap(); // curr arrivals
        marker(&mut out);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bellhop.arr");
        std::fs::write(&path, out).unwrap();

        let mut reader = ArrBinReader::new(context(&path, ArrSyntax::V0));
        reader.initialize().unwrap();
        assert_eq!(reader.frequency(), 0.0);

        // the empty cell is seeded with a zero tap
        let arr = reader.read_time_arr(10.0, 90.0, 800.0);
        assert_eq!(arr.len(), 1);
        assert_eq!(arr.to_pressure(), Pressure::default());
    }

    #[test]
    fn truncated_file_is_a_result_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bellhop.arr");
        std::fs::write(&path, vec![0u8; 6]).unwrap();

        let mut reader = ArrBinReader::new(context(&path, ArrSyntax::V0));
        assert!(matches!(reader.initialize(), Err(Error::ResultFileError(..))));
    }
}
