//! ASCII arrivals file reader.

use std::fs;

use crate::{
    error::Error,
    types::{pressure::Pressure, time_arr::TimeArr},
};

use super::{
    arrival_pressure, recover_delay, ArrData, ArrSyntax, AvgPressureCache, AvgQuery,
    ReaderContext, ResReader,
};

// -------------------------------------------------------------------------------------------------

/// Whitespace-separated token stream over an ASCII result file.
struct Tokens {
    items: Vec<String>,
    pos: usize,
    path: std::path::PathBuf,
}

impl Tokens {
    fn from_file(path: &std::path::Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)
            .map_err(|err| Error::ResultFileError(path.to_path_buf(), err.to_string()))?;
        Ok(Self {
            items: text.split_whitespace().map(str::to_owned).collect(),
            pos: 0,
            path: path.to_path_buf(),
        })
    }

    fn next(&mut self) -> Result<&str, Error> {
        let item = self
            .items
            .get(self.pos)
            .ok_or_else(|| Error::ResultFileError(self.path.clone(), "unexpected end".into()))?;
        self.pos += 1;
        Ok(item)
    }

    fn next_f64(&mut self) -> Result<f64, Error> {
        let path = self.path.clone();
        let token = self.next()?;
        token
            .parse::<f64>()
            .map_err(|_| Error::ResultFileError(path, format!("bad number '{token}'")))
    }

    fn next_usize(&mut self) -> Result<usize, Error> {
        let path = self.path.clone();
        let token = self.next()?;
        token
            .parse::<i64>()
            .map(|value| value.max(0) as usize)
            .map_err(|_| Error::ResultFileError(path, format!("bad count '{token}'")))
    }

    fn next_f32_array(&mut self, count: usize) -> Result<Vec<f32>, Error> {
        (0..count).map(|_| self.next_f64().map(|v| v as f32)).collect()
    }
}

// -------------------------------------------------------------------------------------------------

/// Reads the engine's ASCII arrivals file into an [`ArrData`] matrix of
/// impulse responses, one per (source depth, receiver depth, receiver
/// range) cell.
#[derive(Debug)]
pub struct ArrAsciiReader {
    context: ReaderContext,
    data: ArrData,
    header_collected: bool,
    file_collected: bool,
    /// Token offset of the body, so re-reads for later runs skip the header.
    body_token_pos: usize,
    cache: AvgPressureCache,
}

impl ArrAsciiReader {
    pub fn new(context: ReaderContext) -> Self {
        Self {
            context,
            data: ArrData::default(),
            header_collected: false,
            file_collected: false,
            body_token_pos: 0,
            cache: AvgPressureCache::new(),
        }
    }

    pub fn data(&self) -> &ArrData {
        &self.data
    }

    fn parse_header(&mut self, tokens: &mut Tokens) -> Result<(), Error> {
        if self.context.arr_syntax == ArrSyntax::V2 {
            let sim_type = tokens.next()?.to_owned();
            if sim_type != "'2D'" {
                return Err(Error::ResultFileError(
                    self.context.file.clone(),
                    format!("{sim_type} arrival files are not supported"),
                ));
            }
            self.data.frequency = tokens.next_f64()?;

            let n_tx = tokens.next_usize()?;
            self.data.tx_depths = tokens.next_f32_array(n_tx)?;
            let n_rx_depths = tokens.next_usize()?;
            self.data.rx_depths = tokens.next_f32_array(n_rx_depths)?;
            let n_rx_ranges = tokens.next_usize()?;
            self.data.rx_ranges = tokens.next_f32_array(n_rx_ranges)?;
        } else {
            self.data.frequency = tokens.next_f64()?;
            let n_tx = tokens.next_usize()?;
            let n_rx_depths = tokens.next_usize()?;
            let n_rx_ranges = tokens.next_usize()?;

            self.data.tx_depths = tokens.next_f32_array(n_tx)?;
            self.data.rx_depths = tokens.next_f32_array(n_rx_depths)?;
            self.data.rx_ranges = tokens.next_f32_array(n_rx_ranges)?;
        }

        self.data.allocate_values(self.context.delay_resolution);
        Ok(())
    }

    fn parse_body(&mut self, tokens: &mut Tokens) -> Result<(), Error> {
        let syntax = self.context.arr_syntax;

        for isd in 0..self.data.tx_depths.len() {
            let max_arrivals = tokens.next_usize()?;
            log::debug!(
                "ArrAsciiReader({}): source {isd}, max arrivals = {max_arrivals}",
                self.context.job_id
            );

            for ird in 0..self.data.rx_depths.len() {
                for irr in 0..self.data.rx_ranges.len() {
                    let arrivals = tokens.next_usize()?;
                    let cell = self.data.cell_index(isd, ird, irr);

                    if arrivals == 0 {
                        self.data.values[cell].sum_value(0.0, Pressure::default());
                        continue;
                    }

                    for _ in 0..arrivals {
                        let amplitude = tokens.next_f64()?;
                        let phase = tokens.next_f64()?;
                        let delay = tokens.next_f64()?;
                        let imaginary_delay = if syntax.has_imaginary_delay() {
                            tokens.next_f64()?
                        } else {
                            0.0
                        };
                        let _src_angle = tokens.next_f64()?;
                        let _rx_angle = tokens.next_f64()?;
                        let _top_bounces = tokens.next_f64()?;
                        let _bottom_bounces = tokens.next_f64()?;

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
}

impl ResReader for ArrAsciiReader {
    fn set_file(&mut self, file: std::path::PathBuf) {
        self.context.file = file;
    }

    fn initialize(&mut self) -> Result<(), Error> {
        let mut tokens = Tokens::from_file(&self.context.file)?;
        if self.header_collected {
            tokens.pos = self.body_token_pos;
        } else {
            self.parse_header(&mut tokens)?;
            self.body_token_pos = tokens.pos;
            self.header_collected = true;
        }
        self.parse_body(&mut tokens)?;
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
    use std::io::Write;

    use approx::assert_abs_diff_eq;

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

    /// 1 source, 2 rx depths, 1 rx range in the 2019 ('2D') syntax.
    fn write_v2_fixture(file: &mut impl Write) {
        writeln!(file, "'2D'").unwrap();
        writeln!(file, "25000.0").unwrap();
        writeln!(file, "1  70.0").unwrap();
        writeln!(file, "2  40.0 80.0").unwrap();
        writeln!(file, "1  1000.0").unwrap();
        // source 0: max arrivals
        writeln!(file, "2").unwrap();
        // (ird 0, irr 0): two arrivals; fields: amp phase delay delay_imag
        // src_angle rx_angle top_bounces bottom_bounces
        writeln!(file, "2").unwrap();
        writeln!(file, "0.5 0.0 0.70 0.0 -10.0 10.0 0 1").unwrap();
        writeln!(file, "0.25 90.0 0.72 0.0 -12.0 12.0 1 1").unwrap();
        // (ird 1, irr 0): no arrivals
        writeln!(file, "0").unwrap();
    }

    #[test]
    fn parses_v2_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bellhop.arr");
        write_v2_fixture(&mut std::fs::File::create(&path).unwrap());

        let mut reader = ArrAsciiReader::new(context(&path, ArrSyntax::V2));
        reader.initialize().unwrap();

        assert_eq!(reader.frequency(), 25000.0);
        assert_eq!(reader.data().tx_depths, vec![70.0]);
        assert_eq!(reader.data().rx_depths, vec![40.0, 80.0]);

        let arr = reader.read_time_arr(70.0, 40.0, 1000.0);
        assert!(arr.is_valid());
        assert_eq!(arr.len(), 2);

        // the empty cell was seeded with a zero tap
        let empty = reader.read_time_arr(70.0, 80.0, 1000.0);
        assert_eq!(empty.len(), 1);
        assert_eq!(empty.to_pressure(), Pressure::default());
    }

    #[test]
    fn glitch_recovery_forces_vertical_delay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bellhop.arr");
        let mut file = std::fs::File::create(&path).unwrap();
        // legacy header, range axis value 0 triggers the recovery
        writeln!(file, "10000.0").unwrap();
        writeln!(file, "1 1 1").unwrap();
        writeln!(file, "10.0").unwrap();
        writeln!(file, "90.0").unwrap();
        writeln!(file, "0.0").unwrap();
        writeln!(file, "1").unwrap();
        writeln!(file, "1").unwrap();
        writeln!(file, "1.0 0.0 0.5 -10.0 10.0 0 0").unwrap();
        drop(file);

        let mut reader = ArrAsciiReader::new(context(&path, ArrSyntax::V0));
        reader.initialize().unwrap();

        let arr = reader.read_time_arr(10.0, 90.0, 0.0);
        let (delay, _) = arr.taps().next().unwrap();
        assert_abs_diff_eq!(delay, 80.0 / 1500.0, epsilon = 1e-9);
    }

    #[test]
    fn avg_pressure_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bellhop.arr");
        write_v2_fixture(&mut std::fs::File::create(&path).unwrap());

        let mut reader = ArrAsciiReader::new(context(&path, ArrSyntax::V2));
        reader.initialize().unwrap();

        let first = reader.read_avg_pressure(70.0, 40.0, 1000.0, 80.0, 1000.0);
        let second = reader.read_avg_pressure(70.0, 40.0, 1000.0, 80.0, 1000.0);
        assert_eq!(first, second);
        assert!(first.is_valid());
    }

    #[test]
    fn uninitialized_reader_returns_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bellhop.arr");
        let reader = ArrAsciiReader::new(context(&path, ArrSyntax::V2));
        assert!(!reader.read_time_arr(1.0, 1.0, 1.0).is_valid());
        assert!(!reader.read_pressure(1.0, 1.0, 1.0).is_valid());
        assert!(!reader.read_avg_pressure(1.0, 1.0, 1.0, 2.0, 2.0).is_valid());
    }

    #[test]
    fn reinitialize_accumulates_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bellhop.arr");
        write_v2_fixture(&mut std::fs::File::create(&path).unwrap());

        let mut reader = ArrAsciiReader::new(context(&path, ArrSyntax::V2));
        reader.initialize().unwrap();
        let single = reader.read_time_arr(70.0, 40.0, 1000.0).to_pressure();

        // a second run over the same file stacks onto the matrix
        reader.set_file(path.clone());
        reader.initialize().unwrap();
        let double = reader.read_time_arr(70.0, 40.0, 1000.0).to_pressure();
        assert_abs_diff_eq!(double.re(), 2.0 * single.re(), epsilon = 1e-9);
        assert_abs_diff_eq!(double.im(), 2.0 * single.im(), epsilon = 1e-9);
    }

    #[test]
    fn missing_file_is_a_result_error() {
        let mut reader = ArrAsciiReader::new(context(
            std::path::Path::new("/nonexistent/bellhop.arr"),
            ArrSyntax::V2,
        ));
        assert!(matches!(reader.initialize(), Err(Error::ResultFileError(..))));
    }
}
