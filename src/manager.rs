//! Query dispatch and Woss caching.
//!
//! Managers turn client queries (tx, rx, frequency band, time) into cached
//! [`Woss`](crate::woss::Woss) invocations: they deduplicate jobs per link,
//! short-circuit through the persistent result stores, step the frequency
//! band over the job's quantized set and sum the per-frequency results
//! coherently.

use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex},
    thread,
};

use crate::{
    creator::{SharedWoss, WossCreator},
    environment::EnvironmentManager,
    error::Error,
    types::{
        coord::{CoordZ, CoordZPair},
        pressure::Pressure,
        time::Time,
        time_arr::TimeArr,
    },
    woss::{frequency_lower_bound, WOSS_MAX_DEPTH, WOSS_MAX_RANGE, WOSS_MIN_DEPTH, WOSS_MIN_RANGE},
};

// -------------------------------------------------------------------------------------------------

/// Serves Pressure and TimeArr queries between coordinate pairs.
///
/// The vectorized variants preserve ordering: output index `i` corresponds
/// to input pair `i` regardless of completion order.
pub trait WossManager: Send + Sync {
    fn creator(&self) -> &Arc<dyn WossCreator>;

    /// Complex pressure for the band `[start_frequency, end_frequency]`,
    /// coherently summed across the quantized frequency set.
    fn get_woss_pressure(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Pressure;

    /// Channel impulse response for the band, summed across the quantized
    /// frequency set.
    fn get_woss_time_arr(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> TimeArr;

    fn get_woss_pressure_vector(
        &self,
        pairs: &[CoordZPair],
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Vec<Pressure>;

    fn get_woss_time_arr_vector(
        &self,
        pairs: &[CoordZPair],
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Vec<TimeArr>;

    /// Advances every cached job to the given instant.
    fn time_evolve(&self, time: &Time) -> bool;

    /// Drops every cached job.
    fn reset(&self) -> bool;

    /// Pressure query with the instant given as a seconds offset from the
    /// link's simulation start time.
    fn get_woss_pressure_at_offset(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        offset_seconds: f64,
    ) -> Pressure {
        let sim_time = self.creator().sim_time(tx, rx);
        if !sim_time.start.is_valid() {
            log::warn!("invalid simulation start time for tx = {tx}, rx = {rx}");
            return Pressure::new_not_valid();
        }
        let time = sim_time.start.add_seconds(offset_seconds as i64);
        self.get_woss_pressure(tx, rx, start_frequency, end_frequency, &time)
    }

    /// Impulse-response query with the instant given as a seconds offset
    /// from the link's simulation start time.
    fn get_woss_time_arr_at_offset(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        offset_seconds: f64,
    ) -> TimeArr {
        let sim_time = self.creator().sim_time(tx, rx);
        if !sim_time.start.is_valid() {
            log::warn!("invalid simulation start time for tx = {tx}, rx = {rx}");
            return TimeArr::new_not_valid();
        }
        let time = sim_time.start.add_seconds(offset_seconds as i64);
        self.get_woss_time_arr(tx, rx, start_frequency, end_frequency, &time)
    }
}

// -------------------------------------------------------------------------------------------------

#[derive(Clone)]
struct WossEntry {
    id: usize,
    woss: SharedWoss,
}

/// Shared dispatch state: the per-link job cache with space-sampling
/// equivalence, the store passes and the single-link pipeline.
struct ManagerCore {
    creator: Arc<dyn WossCreator>,
    environment: EnvironmentManager,
    /// Radius within which two coordinates are considered the same map key
    /// [m]; 0 requires exact positions.
    space_sampling: f64,
    /// When inactive, store entries are keyed by the no-evolution sentinel
    /// instant instead of the query time.
    time_evolution_active: bool,
    woss_map: Mutex<Vec<(CoordZ, Vec<(CoordZ, WossEntry)>)>>,
}

impl ManagerCore {
    fn new(creator: Arc<dyn WossCreator>, environment: EnvironmentManager) -> Self {
        Self {
            creator,
            environment,
            space_sampling: 0.0,
            time_evolution_active: false,
            woss_map: Mutex::new(Vec::new()),
        }
    }

    fn matches(&self, a: &CoordZ, b: &CoordZ) -> bool {
        a.cartesian_distance(b) <= self.space_sampling
    }

    fn time_key(&self, time: &Time) -> Time {
        if self.time_evolution_active {
            *time
        } else {
            Time::no_evolution()
        }
    }

    /// Resolves or allocates the job covering the link.
    fn get_woss(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
    ) -> Result<WossEntry, Error> {
        let mut map = self.woss_map.lock().expect("poisoned woss map");

        let slot = map.iter_mut().find(|(key, _)| self.matches(key, tx));
        if let Some((_, links)) = slot {
            if let Some((_, entry)) = links.iter().find(|(key, _)| self.matches(key, rx)) {
                return Ok(entry.clone());
            }
            let woss = self
                .creator
                .create_woss(tx, rx, start_frequency, end_frequency)?;
            let entry = WossEntry {
                id: woss.id(),
                woss: Arc::new(Mutex::new(woss)),
            };
            links.push((*rx, entry.clone()));
            return Ok(entry);
        }

        let woss = self
            .creator
            .create_woss(tx, rx, start_frequency, end_frequency)?;
        let entry = WossEntry {
            id: woss.id(),
            woss: Arc::new(Mutex::new(woss)),
        };
        map.push((*tx, vec![(*rx, entry.clone())]));
        Ok(entry)
    }

    /// Attempts to serve the whole band from the impulse-response store.
    fn store_time_arr_sum(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time_key: &Time,
    ) -> Option<TimeArr> {
        if !self.environment.has_time_arr_store() {
            return None;
        }
        let step = self.creator.frequency_step(tx, rx);
        let count = ((end_frequency - start_frequency) / step).floor().max(0.0) as usize;

        let mut sum = TimeArr::new();
        for i in 0..=count {
            let frequency = start_frequency + (i as f64) * step;
            let arr = self.environment.get_time_arr(tx, rx, frequency, time_key)?;
            if !arr.is_valid() {
                return None;
            }
            sum += &arr;
        }
        Some(sum)
    }

    /// Attempts to serve the whole band from the pressure store.
    fn store_pressure_sum(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time_key: &Time,
    ) -> Option<Pressure> {
        if !self.environment.has_pressure_store() {
            return None;
        }
        let step = self.creator.frequency_step(tx, rx);
        let count = ((end_frequency - start_frequency) / step).floor().max(0.0) as usize;

        let mut sum = Pressure::default();
        for i in 0..=count {
            let frequency = start_frequency + (i as f64) * step;
            let pressure = self.environment.get_pressure(tx, rx, frequency, time_key)?;
            if !pressure.is_valid() {
                return None;
            }
            sum += pressure;
        }
        Some(sum)
    }

    /// Evolves and runs the job as needed, then sums the per-frequency
    /// impulse responses over the band, populating the store on the way.
    fn read_time_arr(
        &self,
        entry: &WossEntry,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
        time_key: &Time,
    ) -> TimeArr {
        let mut woss = entry.woss.lock().expect("poisoned woss lock");

        if woss.time_evolve(time) {
            if let Err(err) = woss.run() {
                log::error!("woss {} run failed: {err}", entry.id);
                return TimeArr::new_not_valid();
            }
        }

        let frequencies = woss.frequencies().to_vec();
        if frequencies.is_empty() {
            return TimeArr::new_not_valid();
        }
        let start = frequency_lower_bound(&frequencies, start_frequency);
        let end = frequency_lower_bound(&frequencies, end_frequency);

        let mut sum = TimeArr::new();
        for &frequency in &frequencies[start..=end] {
            let arr = woss.get_time_arr(
                frequency,
                tx.depth(),
                rx.depth(),
                tx.great_circle_distance(rx),
            );
            self.environment.insert_time_arr(tx, rx, frequency, time_key, &arr);
            sum += &arr;
        }
        sum
    }

    /// The pressure analogue of [`ManagerCore::read_time_arr`], averaging
    /// over the whole rx box per frequency.
    fn read_pressure(
        &self,
        entry: &WossEntry,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
        time_key: &Time,
    ) -> Pressure {
        let mut woss = entry.woss.lock().expect("poisoned woss lock");

        if woss.time_evolve(time) {
            if let Err(err) = woss.run() {
                log::error!("woss {} run failed: {err}", entry.id);
                return Pressure::new_not_valid();
            }
        }

        let frequencies = woss.frequencies().to_vec();
        if frequencies.is_empty() {
            return Pressure::new_not_valid();
        }
        let start = frequency_lower_bound(&frequencies, start_frequency);
        let end = frequency_lower_bound(&frequencies, end_frequency);

        let mut sum = Pressure::default();
        for &frequency in &frequencies[start..=end] {
            let pressure = woss.get_avg_pressure(
                frequency,
                tx.depth(),
                WOSS_MIN_DEPTH,
                WOSS_MIN_RANGE,
                WOSS_MAX_DEPTH,
                WOSS_MAX_RANGE,
            );
            self.environment
                .insert_pressure(tx, rx, frequency, time_key, pressure);
            sum += pressure;
        }
        sum
    }

    fn compute_time_arr(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> TimeArr {
        if tx.cartesian_distance(rx) == 0.0 {
            return TimeArr::new_impulse();
        }
        let time_key = self.time_key(time);
        if let Some(sum) =
            self.store_time_arr_sum(tx, rx, start_frequency, end_frequency, &time_key)
        {
            return sum;
        }
        match self.get_woss(tx, rx, start_frequency, end_frequency) {
            Ok(entry) => self.read_time_arr(
                &entry,
                tx,
                rx,
                start_frequency,
                end_frequency,
                time,
                &time_key,
            ),
            Err(err) => {
                log::error!("woss creation failed for tx = {tx}, rx = {rx}: {err}");
                TimeArr::new_not_valid()
            }
        }
    }

    fn compute_pressure(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Pressure {
        if tx.cartesian_distance(rx) == 0.0 {
            return Pressure::new(1.0, 0.0);
        }
        let time_key = self.time_key(time);
        if let Some(sum) =
            self.store_pressure_sum(tx, rx, start_frequency, end_frequency, &time_key)
        {
            return sum;
        }
        match self.get_woss(tx, rx, start_frequency, end_frequency) {
            Ok(entry) => self.read_pressure(
                &entry,
                tx,
                rx,
                start_frequency,
                end_frequency,
                time,
                &time_key,
            ),
            Err(err) => {
                log::error!("woss creation failed for tx = {tx}, rx = {rx}: {err}");
                Pressure::new_not_valid()
            }
        }
    }

    fn time_evolve_all(&self, time: &Time) -> bool {
        let map = self.woss_map.lock().expect("poisoned woss map");
        for (_, links) in map.iter() {
            for (_, entry) in links {
                entry
                    .woss
                    .lock()
                    .expect("poisoned woss lock")
                    .time_evolve(time);
            }
        }
        true
    }

    fn reset(&self) -> bool {
        self.woss_map.lock().expect("poisoned woss map").clear();
        true
    }

    fn forget(&self, tx: &CoordZ, rx: &CoordZ) {
        let mut map = self.woss_map.lock().expect("poisoned woss map");
        for (key, links) in map.iter_mut() {
            if self.matches(key, tx) {
                links.retain(|(rx_key, _)| !self.matches(rx_key, rx));
            }
        }
        map.retain(|(_, links)| !links.is_empty());
    }
}

// -------------------------------------------------------------------------------------------------

/// The single-threaded manager: every call runs the full pipeline on the
/// caller's thread. One job is kept per (tx, rx) key pair; no memory
/// management beyond [`WossManager::reset`] is performed.
pub struct SimpleManager {
    core: ManagerCore,
}

impl SimpleManager {
    pub fn new(creator: Arc<dyn WossCreator>, environment: EnvironmentManager) -> Self {
        Self {
            core: ManagerCore::new(creator, environment),
        }
    }

    /// Sets the coordinate equivalence radius [m]: endpoints moving less
    /// than this reuse the cached job.
    pub fn set_space_sampling(&mut self, radius: f64) {
        self.core.space_sampling = radius.max(0.0);
    }

    pub fn space_sampling(&self) -> f64 {
        self.core.space_sampling
    }

    pub fn set_time_evolution_active(&mut self, active: bool) {
        self.core.time_evolution_active = active;
    }

    /// Drops the cached job of one link.
    pub fn forget(&self, tx: &CoordZ, rx: &CoordZ) {
        self.core.forget(tx, rx);
    }
}

impl WossManager for SimpleManager {
    fn creator(&self) -> &Arc<dyn WossCreator> {
        &self.core.creator
    }

    fn get_woss_pressure(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Pressure {
        self.core
            .compute_pressure(tx, rx, start_frequency, end_frequency, time)
    }

    fn get_woss_time_arr(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> TimeArr {
        self.core
            .compute_time_arr(tx, rx, start_frequency, end_frequency, time)
    }

    fn get_woss_pressure_vector(
        &self,
        pairs: &[CoordZPair],
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Vec<Pressure> {
        pairs
            .iter()
            .map(|(tx, rx)| self.get_woss_pressure(tx, rx, start_frequency, end_frequency, time))
            .collect()
    }

    fn get_woss_time_arr_vector(
        &self,
        pairs: &[CoordZPair],
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Vec<TimeArr> {
        pairs
            .iter()
            .map(|(tx, rx)| self.get_woss_time_arr(tx, rx, start_frequency, end_frequency, time))
            .collect()
    }

    fn time_evolve(&self, time: &Time) -> bool {
        self.core.time_evolve_all(time)
    }

    fn reset(&self) -> bool {
        self.core.reset()
    }
}

// -------------------------------------------------------------------------------------------------

/// A broadcast gate parked on by workers waiting for another worker's
/// engine invocation on the same job.
struct ActiveGate {
    done: Mutex<bool>,
    signal: Condvar,
}

impl ActiveGate {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut done = self.done.lock().expect("poisoned gate lock");
        while !*done {
            done = self.signal.wait(done).expect("poisoned gate lock");
        }
    }

    fn broadcast(&self) {
        *self.done.lock().expect("poisoned gate lock") = true;
        self.signal.notify_all();
    }
}

// -------------------------------------------------------------------------------------------------

/// The multi-threaded manager: vectorized queries fan out over a worker
/// pool, and concurrent requests hitting the same running job park on its
/// gate instead of re-running the engine.
pub struct ParallelManager {
    core: ManagerCore,
    concurrent_threads: usize,
    /// Serializes store reads, job resolution and time evolution.
    request_lock: Mutex<()>,
    /// Gates of jobs currently executing the engine, by job id.
    active: Mutex<HashMap<usize, Arc<ActiveGate>>>,
}

impl ParallelManager {
    pub fn new(creator: Arc<dyn WossCreator>, environment: EnvironmentManager) -> Self {
        Self {
            core: ManagerCore::new(creator, environment),
            concurrent_threads: Self::clamp_threads(usize::MAX),
            request_lock: Mutex::new(()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Worker count clamp: at least 1, at most one and a half times the
    /// installed cpus.
    fn clamp_threads(configured: usize) -> usize {
        let cpus = num_cpus::get();
        configured.min(cpus + cpus / 2).max(1)
    }

    pub fn set_concurrent_threads(&mut self, threads: usize) {
        self.concurrent_threads = Self::clamp_threads(threads);
    }

    pub fn concurrent_threads(&self) -> usize {
        self.concurrent_threads
    }

    pub fn set_space_sampling(&mut self, radius: f64) {
        self.core.space_sampling = radius.max(0.0);
    }

    pub fn set_time_evolution_active(&mut self, active: bool) {
        self.core.time_evolution_active = active;
    }

    /// The full pipeline with request coalescing; see the crate docs on the
    /// suspension protocol.
    fn compute_time_arr_coalesced(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> TimeArr {
        if tx.cartesian_distance(rx) == 0.0 {
            return TimeArr::new_impulse();
        }
        let time_key = self.core.time_key(time);

        loop {
            let request = self.request_lock.lock().expect("poisoned request lock");

            if let Some(sum) =
                self.core
                    .store_time_arr_sum(tx, rx, start_frequency, end_frequency, &time_key)
            {
                return sum;
            }

            let entry = match self.core.get_woss(tx, rx, start_frequency, end_frequency) {
                Ok(entry) => entry,
                Err(err) => {
                    log::error!("woss creation failed for tx = {tx}, rx = {rx}: {err}");
                    return TimeArr::new_not_valid();
                }
            };

            let gate = self
                .active
                .lock()
                .expect("poisoned active map")
                .get(&entry.id)
                .cloned();
            if let Some(gate) = gate {
                // another worker is running this job: park until its
                // broadcast, then retry from the (now-populated) store
                drop(request);
                gate.wait();
                continue;
            }

            let mut woss = entry.woss.lock().expect("poisoned woss lock");
            let has_to_run = woss.time_evolve(time);
            let gate = if has_to_run {
                let gate = Arc::new(ActiveGate::new());
                self.active
                    .lock()
                    .expect("poisoned active map")
                    .insert(entry.id, gate.clone());
                Some(gate)
            } else {
                None
            };
            drop(request);

            let run_ok = if has_to_run { woss.run().is_ok() } else { true };

            let request = self.request_lock.lock().expect("poisoned request lock");
            let result = if run_ok {
                let frequencies = woss.frequencies().to_vec();
                let start = frequency_lower_bound(&frequencies, start_frequency);
                let end = frequency_lower_bound(&frequencies, end_frequency);

                let mut sum = TimeArr::new();
                for &frequency in frequencies.get(start..=end).unwrap_or(&[]) {
                    let arr = woss.get_time_arr(
                        frequency,
                        tx.depth(),
                        rx.depth(),
                        tx.great_circle_distance(rx),
                    );
                    self.core
                        .environment
                        .insert_time_arr(tx, rx, frequency, &time_key, &arr);
                    sum += &arr;
                }
                if sum.is_empty() {
                    TimeArr::new_not_valid()
                } else {
                    sum
                }
            } else {
                TimeArr::new_not_valid()
            };

            if let Some(gate) = gate {
                self.active
                    .lock()
                    .expect("poisoned active map")
                    .remove(&entry.id);
                gate.broadcast();
            }
            drop(request);
            return result;
        }
    }

    fn compute_pressure_coalesced(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Pressure {
        if tx.cartesian_distance(rx) == 0.0 {
            return Pressure::new(1.0, 0.0);
        }
        let time_key = self.core.time_key(time);

        loop {
            let request = self.request_lock.lock().expect("poisoned request lock");

            if let Some(sum) =
                self.core
                    .store_pressure_sum(tx, rx, start_frequency, end_frequency, &time_key)
            {
                return sum;
            }

            let entry = match self.core.get_woss(tx, rx, start_frequency, end_frequency) {
                Ok(entry) => entry,
                Err(err) => {
                    log::error!("woss creation failed for tx = {tx}, rx = {rx}: {err}");
                    return Pressure::new_not_valid();
                }
            };

            let gate = self
                .active
                .lock()
                .expect("poisoned active map")
                .get(&entry.id)
                .cloned();
            if let Some(gate) = gate {
                drop(request);
                gate.wait();
                continue;
            }

            let mut woss = entry.woss.lock().expect("poisoned woss lock");
            let has_to_run = woss.time_evolve(time);
            let gate = if has_to_run {
                let gate = Arc::new(ActiveGate::new());
                self.active
                    .lock()
                    .expect("poisoned active map")
                    .insert(entry.id, gate.clone());
                Some(gate)
            } else {
                None
            };
            drop(request);

            let run_ok = if has_to_run { woss.run().is_ok() } else { true };

            let request = self.request_lock.lock().expect("poisoned request lock");
            let result = if run_ok {
                let frequencies = woss.frequencies().to_vec();
                let start = frequency_lower_bound(&frequencies, start_frequency);
                let end = frequency_lower_bound(&frequencies, end_frequency);

                let mut sum = Pressure::default();
                let mut any = false;
                for &frequency in frequencies.get(start..=end).unwrap_or(&[]) {
                    let pressure = woss.get_avg_pressure(
                        frequency,
                        tx.depth(),
                        WOSS_MIN_DEPTH,
                        WOSS_MIN_RANGE,
                        WOSS_MAX_DEPTH,
                        WOSS_MAX_RANGE,
                    );
                    self.core
                        .environment
                        .insert_pressure(tx, rx, frequency, &time_key, pressure);
                    sum += pressure;
                    any = true;
                }
                if any {
                    sum
                } else {
                    Pressure::new_not_valid()
                }
            } else {
                Pressure::new_not_valid()
            };

            if let Some(gate) = gate {
                self.active
                    .lock()
                    .expect("poisoned active map")
                    .remove(&entry.id);
                gate.broadcast();
            }
            drop(request);
            return result;
        }
    }

    /// Fans an ordered query vector out over the worker pool, preserving
    /// input ordering in the reply vector.
    fn vector_query<T, F>(&self, pairs: &[CoordZPair], compute: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&CoordZ, &CoordZ) -> T + Sync,
    {
        if pairs.is_empty() {
            return Vec::new();
        }
        let workers = self.concurrent_threads.min(pairs.len()).max(1);

        let (work_send, work_recv) = crossbeam_channel::unbounded::<(usize, CoordZPair)>();
        for (index, pair) in pairs.iter().enumerate() {
            work_send
                .send((index, *pair))
                .expect("work queue never closes early");
        }
        drop(work_send);

        let (reply_send, reply_recv) = crossbeam_channel::unbounded::<(usize, T)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_recv = work_recv.clone();
                let reply_send = reply_send.clone();
                let compute = &compute;
                scope.spawn(move || {
                    while let Ok((index, (tx, rx))) = work_recv.recv() {
                        let value = compute(&tx, &rx);
                        if reply_send.send((index, value)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(reply_send);

            let mut results: Vec<Option<T>> = (0..pairs.len()).map(|_| None).collect();
            for (index, value) in reply_recv.iter() {
                results[index] = Some(value);
            }
            results
                .into_iter()
                .map(|value| value.expect("a reply for every query"))
                .collect()
        })
    }
}

impl WossManager for ParallelManager {
    fn creator(&self) -> &Arc<dyn WossCreator> {
        &self.core.creator
    }

    fn get_woss_pressure(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Pressure {
        self.compute_pressure_coalesced(tx, rx, start_frequency, end_frequency, time)
    }

    fn get_woss_time_arr(
        &self,
        tx: &CoordZ,
        rx: &CoordZ,
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> TimeArr {
        self.compute_time_arr_coalesced(tx, rx, start_frequency, end_frequency, time)
    }

    fn get_woss_pressure_vector(
        &self,
        pairs: &[CoordZPair],
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Vec<Pressure> {
        self.vector_query(pairs, |tx, rx| {
            self.compute_pressure_coalesced(tx, rx, start_frequency, end_frequency, time)
        })
    }

    fn get_woss_time_arr_vector(
        &self,
        pairs: &[CoordZPair],
        start_frequency: f64,
        end_frequency: f64,
        time: &Time,
    ) -> Vec<TimeArr> {
        self.vector_query(pairs, |tx, rx| {
            self.compute_time_arr_coalesced(tx, rx, start_frequency, end_frequency, time)
        })
    }

    fn time_evolve(&self, time: &Time) -> bool {
        let _request = self.request_lock.lock().expect("poisoned request lock");
        self.core.time_evolve_all(time)
    }

    fn reset(&self) -> bool {
        let _request = self.request_lock.lock().expect("poisoned request lock");
        self.core.reset()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use approx::assert_abs_diff_eq;

    use crate::environment::{MemoryPressureStore, MemoryTimeArrStore};
    use crate::types::time::SimTime;
    use crate::woss::{quantized_frequencies, Woss};

    use super::*;

    // ---------------------------------------------------------------------------------------------
    // Test doubles: a creator/woss pair that counts engine runs and serves
    // a deterministic single-tap response per frequency.

    struct CountingWoss {
        id: usize,
        frequencies: Vec<f64>,
        quantum: f64,
        start_time: Time,
        current_time: Time,
        end_time: Time,
        tx: CoordZ,
        rx: CoordZ,
        has_run_once: bool,
        runs: Arc<AtomicUsize>,
    }

    impl Woss for CountingWoss {
        fn id(&self) -> usize {
            self.id
        }

        fn is_valid(&self) -> bool {
            true
        }

        fn initialize(&mut self) -> Result<(), Error> {
            Ok(())
        }

        fn run(&mut self) -> Result<(), Error> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.has_run_once = true;
            Ok(())
        }

        fn time_evolve(&mut self, time: &Time) -> bool {
            if self.quantum < 0.0 {
                return !self.has_run_once;
            }
            if !time.is_valid() {
                return false;
            }
            let mut time = *time;
            if time > self.end_time {
                time = self.end_time;
            } else if time < self.start_time {
                time = self.start_time;
            }
            if time == self.current_time {
                return !self.has_run_once;
            }
            let difference = time.diff_seconds(&self.current_time).abs();
            if self.quantum == 0.0 || difference >= self.quantum {
                self.current_time = time;
                self.has_run_once = false;
                return true;
            }
            !self.has_run_once
        }

        fn is_running(&self) -> bool {
            false
        }

        fn has_run_once(&self) -> bool {
            self.has_run_once
        }

        fn tx(&self) -> CoordZ {
            self.tx
        }

        fn rx(&self) -> CoordZ {
            self.rx
        }

        fn frequencies(&self) -> &[f64] {
            &self.frequencies
        }

        fn great_circle_distance(&self) -> f64 {
            self.tx.great_circle_distance(&self.rx)
        }

        fn total_distance(&self) -> f64 {
            self.tx.cartesian_distance(&self.rx)
        }

        fn bearing(&self) -> f64 {
            0.0
        }

        fn get_pressure(&self, frequency: f64, _: f64, _: f64, _: f64) -> Pressure {
            Pressure::new(frequency / 1_000.0, 0.0)
        }

        fn get_avg_pressure(
            &self,
            frequency: f64,
            _: f64,
            _: f64,
            _: f64,
            _: f64,
            _: f64,
        ) -> Pressure {
            Pressure::new(frequency / 1_000.0, 0.0)
        }

        fn get_time_arr(&self, frequency: f64, _: f64, _: f64, _: f64) -> TimeArr {
            let mut arr = TimeArr::new();
            arr.sum_value(0.1, Pressure::new(frequency / 1_000.0, 0.0));
            arr
        }
    }

    struct CountingCreator {
        step: f64,
        quantum: f64,
        sim_time: SimTime,
        runs: Arc<AtomicUsize>,
        created: AtomicUsize,
    }

    impl CountingCreator {
        fn new(step: f64, quantum: f64) -> Self {
            Self {
                step,
                quantum,
                sim_time: SimTime::new(
                    Time::new(2012, 6, 1, 0, 0, 0),
                    Time::new(2012, 6, 30, 0, 0, 0),
                ),
                runs: Arc::new(AtomicUsize::new(0)),
                created: AtomicUsize::new(0),
            }
        }
    }

    impl WossCreator for CountingCreator {
        fn create_woss(
            &self,
            tx: &CoordZ,
            rx: &CoordZ,
            start_frequency: f64,
            end_frequency: f64,
        ) -> Result<Box<dyn Woss>, Error> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingWoss {
                id: crate::utils::unique_usize_id(),
                frequencies: quantized_frequencies(start_frequency, end_frequency, self.step),
                quantum: self.quantum,
                start_time: self.sim_time.start,
                current_time: self.sim_time.start,
                end_time: self.sim_time.end,
                tx: *tx,
                rx: *rx,
                has_run_once: false,
                runs: self.runs.clone(),
            }))
        }

        fn sim_time(&self, _: &CoordZ, _: &CoordZ) -> SimTime {
            self.sim_time
        }

        fn frequency_step(&self, _: &CoordZ, _: &CoordZ) -> f64 {
            self.step
        }

        fn not_valid_woss(&self) -> SharedWoss {
            unimplemented!("not used by the dispatch tests")
        }
    }

    fn tx() -> CoordZ {
        CoordZ::new(45.7, 13.7, 70.0)
    }

    fn rx() -> CoordZ {
        CoordZ::new(45.8, 13.8, 50.0)
    }

    fn query_time() -> Time {
        Time::new(2012, 6, 1, 12, 0, 0)
    }

    // ---------------------------------------------------------------------------------------------

    #[test]
    fn same_point_is_a_unit_impulse_without_any_woss() {
        let creator = Arc::new(CountingCreator::new(2_500.0, -1.0));
        let manager = SimpleManager::new(creator.clone(), EnvironmentManager::new());

        let p = manager.get_woss_pressure(&tx(), &tx(), 25_000.0, 25_000.0, &query_time());
        assert_eq!(p, Pressure::new(1.0, 0.0));

        let arr = manager.get_woss_time_arr(&tx(), &tx(), 25_000.0, 25_000.0, &query_time());
        assert_eq!(arr.to_pressure(), Pressure::new(1.0, 0.0));

        assert_eq!(creator.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn band_steps_over_the_quantized_set_and_fills_the_store() {
        let creator = Arc::new(CountingCreator::new(2_500.0, -1.0));
        let store = Arc::new(MemoryTimeArrStore::new());
        let mut environment = EnvironmentManager::new();
        environment.set_time_arr_store(store.clone());

        let manager = SimpleManager::new(creator.clone(), environment);
        let arr = manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 20_000.0, &query_time());

        // {10000, 12500, 15000, 17500, 20000}: one store entry per frequency
        assert_eq!(store.len(), 5);
        assert!(arr.is_valid());
        let expected: f64 = [10_000.0f64, 12_500.0, 15_000.0, 17_500.0, 20_000.0]
            .iter()
            .map(|f| f / 1_000.0)
            .sum();
        assert_abs_diff_eq!(arr.to_pressure().re(), expected, epsilon = 1e-9);

        // a second identical query is served from the store: no new run
        assert_eq!(creator.runs.load(Ordering::SeqCst), 1);
        let again = manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 20_000.0, &query_time());
        assert_eq!(creator.runs.load(Ordering::SeqCst), 1);
        assert_abs_diff_eq!(again.to_pressure().re(), expected, epsilon = 1e-9);
    }

    #[test]
    fn pressure_band_fills_the_pressure_store() {
        let creator = Arc::new(CountingCreator::new(2_500.0, -1.0));
        let store = Arc::new(MemoryPressureStore::new());
        let mut environment = EnvironmentManager::new();
        environment.set_pressure_store(store.clone());

        let manager = SimpleManager::new(creator.clone(), environment);
        let p = manager.get_woss_pressure(&tx(), &rx(), 10_000.0, 20_000.0, &query_time());
        assert_eq!(store.len(), 5);
        assert!(p.is_valid());
        assert_eq!(creator.runs.load(Ordering::SeqCst), 1);

        manager.get_woss_pressure(&tx(), &rx(), 10_000.0, 20_000.0, &query_time());
        assert_eq!(creator.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeated_queries_without_store_reuse_the_woss() {
        let creator = Arc::new(CountingCreator::new(2_500.0, -1.0));
        let manager = SimpleManager::new(creator.clone(), EnvironmentManager::new());

        manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 10_000.0, &query_time());
        manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 10_000.0, &query_time());

        assert_eq!(creator.created.load(Ordering::SeqCst), 1);
        // evolution disabled: the engine ran exactly once
        assert_eq!(creator.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn time_evolution_triggers_a_rerun_past_the_quantum() {
        let creator = Arc::new(CountingCreator::new(2_500.0, 3_600.0));
        let manager = SimpleManager::new(creator.clone(), EnvironmentManager::new());
        let t0 = Time::new(2012, 6, 1, 0, 0, 0);

        manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 10_000.0, &t0);
        manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 10_000.0, &t0.add_seconds(2_000));
        assert_eq!(creator.runs.load(Ordering::SeqCst), 1);

        manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 10_000.0, &t0.add_seconds(5_000));
        assert_eq!(creator.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn space_sampling_reuses_nearby_endpoints() {
        let creator = Arc::new(CountingCreator::new(2_500.0, -1.0));
        let mut manager = SimpleManager::new(creator.clone(), EnvironmentManager::new());
        manager.set_space_sampling(500.0);

        manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 10_000.0, &query_time());
        // a receiver 100 m away maps onto the same cached job
        let moved = CoordZ::new(45.8, 13.8, 150.0);
        manager.get_woss_time_arr(&tx(), &moved, 10_000.0, 10_000.0, &query_time());
        assert_eq!(creator.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn offset_queries_translate_through_the_sim_time() {
        let creator = Arc::new(CountingCreator::new(2_500.0, -1.0));
        let manager = SimpleManager::new(creator.clone(), EnvironmentManager::new());
        let p = manager.get_woss_pressure_at_offset(&tx(), &rx(), 10_000.0, 10_000.0, 120.0);
        assert!(p.is_valid());
    }

    #[test]
    fn parallel_vector_preserves_ordering() {
        let creator = Arc::new(CountingCreator::new(2_500.0, -1.0));
        let manager = ParallelManager::new(creator.clone(), EnvironmentManager::new());

        let pairs: Vec<CoordZPair> = (0..8)
            .map(|i| {
                (
                    CoordZ::new(45.0 + 0.01 * i as f64, 13.0, 50.0),
                    CoordZ::new(45.5, 13.5, 60.0 + i as f64),
                )
            })
            .collect();

        let single = SimpleManager::new(creator.clone(), EnvironmentManager::new());
        let expected: Vec<Pressure> = pairs
            .iter()
            .map(|(a, b)| single.get_woss_pressure(a, b, 10_000.0, 20_000.0, &query_time()))
            .collect();

        let parallel =
            manager.get_woss_pressure_vector(&pairs, 10_000.0, 20_000.0, &query_time());
        assert_eq!(parallel.len(), pairs.len());
        for (value, expected) in parallel.iter().zip(&expected) {
            assert_abs_diff_eq!(value.re(), expected.re(), epsilon = 1e-9);
            assert_abs_diff_eq!(value.im(), expected.im(), epsilon = 1e-9);
        }
    }

    #[test]
    fn duplicate_parallel_queries_run_the_engine_once() {
        let creator = Arc::new(CountingCreator::new(2_500.0, -1.0));
        let store = Arc::new(MemoryTimeArrStore::new());
        let mut environment = EnvironmentManager::new();
        environment.set_time_arr_store(store.clone());

        let manager = ParallelManager::new(creator.clone(), environment);
        let pairs: Vec<CoordZPair> = (0..6).map(|_| (tx(), rx())).collect();

        let results =
            manager.get_woss_time_arr_vector(&pairs, 10_000.0, 10_000.0, &query_time());
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|arr| arr.is_valid()));
        // all six queries were coalesced onto one engine invocation
        assert_eq!(creator.runs.load(Ordering::SeqCst), 1);
        assert_eq!(creator.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_drops_cached_jobs() {
        let creator = Arc::new(CountingCreator::new(2_500.0, -1.0));
        let manager = SimpleManager::new(creator.clone(), EnvironmentManager::new());

        manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 10_000.0, &query_time());
        assert!(manager.reset());
        manager.get_woss_time_arr(&tx(), &rx(), 10_000.0, 10_000.0, &query_time());
        assert_eq!(creator.created.load(Ordering::SeqCst), 2);
    }
}
