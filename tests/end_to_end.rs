//! End-to-end scenarios over the public API, with the external engine
//! replaced by a double that emits arrivals fixtures.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use approx::assert_abs_diff_eq;

use hydroray::{
    types::coord::CoordZ,
    types::sediment::Sediment,
    types::ssp::Ssp,
    types::time::{SimTime, Time},
    BellhopCreator, Controller, EngineRunner, Error, FnBathymetry, FnSediment, FnSsp,
    MemoryTimeArrStore, Pressure, WossManager,
};

// -------------------------------------------------------------------------------------------------

/// Engine double: counts invocations and writes a one-cell ASCII arrivals
/// file (source at 10 m, receiver at 90 m, range axis 0) whose single
/// arrival has a zero delay, so the vertical-channel recovery path is
/// always exercised.
struct CountingEngine {
    invocations: AtomicUsize,
}

impl CountingEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl EngineRunner for CountingEngine {
    fn run(&self, work_dir: &Path, base_name: &str, _debug: bool) -> Result<(), Error> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        // the run directory always carries the prepared config file
        let env_text = std::fs::read_to_string(work_dir.join(format!("{base_name}.env")))?;
        let frequency: f64 = env_text
            .lines()
            .find(|line| line.contains("! FREQUENCY"))
            .and_then(|line| line.split_whitespace().next())
            .and_then(|token| token.parse().ok())
            .expect("config file carries the frequency");

        let mut text = String::new();
        text.push_str("'2D'\n");
        text.push_str(&format!("{frequency}\n"));
        text.push_str("1  10.0\n");
        text.push_str("1  90.0\n");
        text.push_str("1  0.0\n");
        text.push_str("1\n1\n");
        text.push_str("1.0 0.0 0.0 0.0 -5.0 5.0 0 0\n");
        std::fs::write(work_dir.join(format!("{base_name}.arr")), text)?;
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

struct Fixture {
    _work_dir: tempfile::TempDir,
    engine: Arc<CountingEngine>,
    controller: Controller,
}

fn fixture(frequency_step: f64, evolution_quantum: f64) -> Fixture {
    let work_dir = tempfile::tempdir().unwrap();
    let engine = CountingEngine::new();

    let mut creator = BellhopCreator::new(work_dir.path(), "");
    creator.engine = engine.clone();
    *creator.sim_times.access_all() = SimTime::new(
        Time::new(2012, 6, 1, 0, 0, 0),
        Time::new(2012, 6, 30, 0, 0, 0),
    );
    *creator.frequency_steps.access_all() = frequency_step;
    *creator.evolution_time_quanta.access_all() = evolution_quantum;
    *creator.total_range_steps.access_all() = 10;

    let mut controller = Controller::new();
    controller
        .set_bathymetry_provider(Arc::new(FnBathymetry(|_: &CoordZ, _: &CoordZ| Some(100.0))))
        .set_sediment_provider(Arc::new(FnSediment(|_: &CoordZ, _: &[CoordZ]| {
            Some(Sediment::new("sand", 1650.0, 110.0, 1.9, 0.8, 2.5, 10.0))
        })))
        .set_ssp_provider(Arc::new(FnSsp(|_: &CoordZ, _: &CoordZ, _: &Time| {
            Some(Ssp::from_points([
                (0.0, 1520.0),
                (50.0, 1510.0),
                (100.0, 1500.0),
            ]))
        })))
        .set_creator(creator);

    Fixture {
        _work_dir: work_dir,
        engine,
        controller,
    }
}

fn query_time() -> Time {
    Time::new(2012, 6, 1, 12, 0, 0)
}

// -------------------------------------------------------------------------------------------------

#[test]
fn same_point_query_returns_unit_pressure_without_the_engine() {
    let mut fixture = fixture(f64::MAX, -1.0);
    let manager = fixture.controller.initialize().unwrap();

    let point = CoordZ::new(45.7, 13.7, 70.0);
    let pressure = manager.get_woss_pressure(&point, &point, 25_000.0, 25_000.0, &query_time());

    assert_eq!(pressure, Pressure::new(1.0, 0.0));
    assert_eq!(fixture.engine.count(), 0);
}

#[test]
fn vertical_channel_recovers_the_direct_path_delay() {
    let mut fixture = fixture(f64::MAX, -1.0);
    let manager = fixture.controller.initialize().unwrap();

    let top = CoordZ::new(45.0, 13.0, 10.0);
    let bottom = CoordZ::new(45.0, 13.0, 90.0);
    assert_eq!(top.great_circle_distance(&bottom), 0.0);
    assert_abs_diff_eq!(top.cartesian_distance(&bottom), 80.0, epsilon = 1e-6);

    let arr = manager.get_woss_time_arr(&top, &bottom, 10_000.0, 10_000.0, &query_time());
    assert!(arr.is_valid());

    let expected_delay = 80.0 / 1500.0;
    assert!(
        arr.taps()
            .any(|(delay, _)| (delay - expected_delay).abs() < 1e-6),
        "no tap at the direct-path delay in {arr}"
    );
    assert_eq!(fixture.engine.count(), 1);
}

#[test]
fn frequency_band_steps_and_fills_the_result_store() {
    let mut fixture = fixture(2_500.0, -1.0);
    let store = Arc::new(MemoryTimeArrStore::new());
    fixture.controller.set_time_arr_store(store.clone());
    let manager = fixture.controller.initialize().unwrap();

    let tx = CoordZ::new(45.7, 13.7, 70.0);
    let rx = CoordZ::new(45.8, 13.8, 50.0);
    let arr = manager.get_woss_time_arr(&tx, &rx, 10_000.0, 20_000.0, &query_time());

    assert!(arr.is_valid());
    // {10000, 12500, 15000, 17500, 20000}: one engine run and one store
    // entry per discrete frequency
    assert_eq!(fixture.engine.count(), 5);
    assert_eq!(store.len(), 5);

    // the full band now comes out of the store
    let again = manager.get_woss_time_arr(&tx, &rx, 10_000.0, 20_000.0, &query_time());
    assert_eq!(fixture.engine.count(), 5);
    assert_eq!(
        again.to_pressure().complex(),
        arr.to_pressure().complex()
    );
}

#[test]
fn cached_woss_serves_repeated_queries_without_rerunning() {
    let mut fixture = fixture(f64::MAX, -1.0);
    let manager = fixture.controller.initialize().unwrap();

    let tx = CoordZ::new(45.7, 13.7, 70.0);
    let rx = CoordZ::new(45.8, 13.8, 50.0);

    let first = manager.get_woss_time_arr(&tx, &rx, 10_000.0, 10_000.0, &query_time());
    assert_eq!(fixture.engine.count(), 1);

    let second = manager.get_woss_time_arr(&tx, &rx, 10_000.0, 10_000.0, &query_time());
    assert_eq!(fixture.engine.count(), 1);
    assert_eq!(
        first.to_pressure().complex(),
        second.to_pressure().complex()
    );
}

#[test]
fn time_evolution_reruns_only_past_the_quantum() {
    let mut fixture = fixture(f64::MAX, 3_600.0);
    let manager = fixture.controller.initialize().unwrap();

    let tx = CoordZ::new(45.7, 13.7, 70.0);
    let rx = CoordZ::new(45.8, 13.8, 50.0);
    let t0 = Time::new(2012, 6, 1, 0, 0, 0);

    manager.get_woss_time_arr(&tx, &rx, 10_000.0, 10_000.0, &t0);
    let after_first = fixture.engine.count();
    assert!(after_first >= 1);

    // still inside the evolution quantum: reuse
    manager.get_woss_time_arr(&tx, &rx, 10_000.0, 10_000.0, &t0.add_seconds(2_000));
    assert_eq!(fixture.engine.count(), after_first);

    // past the quantum: re-initialize and re-run
    manager.get_woss_time_arr(&tx, &rx, 10_000.0, 10_000.0, &t0.add_seconds(5_000));
    assert_eq!(fixture.engine.count(), 2 * after_first);
}

#[test]
fn missing_environment_yields_the_not_valid_sentinel() {
    let work_dir = tempfile::tempdir().unwrap();
    let mut creator = BellhopCreator::new(work_dir.path(), "");
    creator.engine = CountingEngine::new();
    *creator.sim_times.access_all() = SimTime::new(
        Time::new(2012, 6, 1, 0, 0, 0),
        Time::new(2012, 6, 30, 0, 0, 0),
    );

    // no providers at all: job creation fails, queries yield sentinels
    let mut controller = Controller::new();
    controller.set_creator(creator);
    let manager = controller.initialize().unwrap();

    let tx = CoordZ::new(45.7, 13.7, 70.0);
    let rx = CoordZ::new(45.8, 13.8, 50.0);
    let pressure = manager.get_woss_pressure(&tx, &rx, 10_000.0, 10_000.0, &query_time());
    assert!(!pressure.is_valid());
    let arr = manager.get_woss_time_arr(&tx, &rx, 10_000.0, 10_000.0, &query_time());
    assert!(!arr.is_valid());
}
