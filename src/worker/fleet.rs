//! The worker fleet engine.
//!
//! Owns a keyed collection of [`Worker`]s, drives their behavior machine on a
//! periodic tick, and exposes the command surface used by tests and the
//! simulation manager. One exclusive lock guards the whole engine state;
//! every accessor returns deep copies, never references into the engine.

use crate::config::{WorkerFleetConfig, WorkerTypeConfig};
use crate::error::{FleetError, Result};
use crate::events::{EventBus, EventKind};
use crate::shutdown::{StopSignal, TaskTracker};
use crate::worker::behavior::{self, Deferred};
use crate::worker::{select_worker_type, AttackKind, NetworkProfile, Worker};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Fleet-wide statistics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetStats {
    pub total_workers: u32,
    pub active_workers: u32,
    pub total_hash_rate: u64,
    pub average_hash_rate: u64,
    pub total_shares: u64,
    pub valid_shares: u64,
    pub invalid_shares: u64,
    pub burst_events: u64,
    pub drop_events: u64,
    pub attack_events: u64,
    pub uptime_percentage: f64,
    /// Wall-clock time since `start()`; zero while stopped.
    pub simulation_time: Duration,
}

struct FleetState {
    workers: HashMap<String, Worker>,
    running: bool,
    started_at: Option<Instant>,
    stats: FleetStats,
    rng: StdRng,
    next_id: u64,
    stop: StopSignal,
}

/// Engine managing a fleet of simulated workers.
///
/// Cheap to clone; clones share the same underlying fleet.
#[derive(Clone)]
pub struct WorkerFleet {
    config: Arc<WorkerFleetConfig>,
    state: Arc<Mutex<FleetState>>,
    events: EventBus,
    tasks: TaskTracker,
}

impl WorkerFleet {
    /// Build a fleet and generate its initial population.
    pub fn new(config: WorkerFleetConfig) -> Result<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut workers = HashMap::with_capacity(config.worker_count);
        let mut next_id = 0u64;
        for _ in 0..config.worker_count {
            let worker = generate_worker(&config, &mut next_id, &mut rng);
            workers.insert(worker.id.clone(), worker);
        }

        info!(workers = workers.len(), "Generated worker fleet");

        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(FleetState {
                workers,
                running: false,
                started_at: None,
                stats: FleetStats::default(),
                rng,
                next_id,
                stop: StopSignal::new(),
            })),
            events: EventBus::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Diagnostic event stream for this fleet.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Start the simulation: activate every worker and launch the periodic
    /// behavior and statistics tasks.
    pub async fn start(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.running {
            return Err(FleetError::AlreadyRunning);
        }

        st.running = true;
        st.started_at = Some(Instant::now());
        let now = Utc::now();
        for worker in st.workers.values_mut() {
            worker.is_active = true;
            worker.state.last_seen = now;
        }

        let stop = st.stop.clone();
        drop(st);

        self.spawn_behavior_loop(stop.clone());
        self.spawn_stats_loop(stop);
        info!("Worker fleet started");
        Ok(())
    }

    /// Stop the simulation. No-op when not running. Cancels the periodic
    /// tasks and every pending deferred timer before returning.
    pub async fn stop(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        if !st.running {
            return Ok(());
        }

        st.running = false;
        for worker in st.workers.values_mut() {
            worker.is_active = false;
        }

        st.stop.stop();
        // Fresh signal so the engine can be started again.
        st.stop = StopSignal::new();
        drop(st);

        self.tasks.abort_all();
        info!("Worker fleet stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Deep copies of every worker.
    pub async fn workers(&self) -> Vec<Worker> {
        let st = self.state.lock().await;
        st.workers.values().cloned().collect()
    }

    /// Deep copy of one worker, `None` when unknown.
    pub async fn worker(&self, id: &str) -> Option<Worker> {
        let st = self.state.lock().await;
        st.workers.get(id).cloned()
    }

    /// Add a worker built from the given type entry. Malicious behavior is
    /// never assigned to explicitly added workers.
    pub async fn add_worker(&self, type_cfg: WorkerTypeConfig) -> Result<Worker> {
        let mut st = self.state.lock().await;
        st.next_id += 1;
        let id = format!("worker-{}", st.next_id);
        let FleetState { rng, .. } = &mut *st;
        let network = NetworkProfile::sample(&self.config.network, rng);
        let mut worker = Worker::from_type(
            id.clone(),
            &type_cfg,
            self.config.hash_rate_range,
            network,
            None,
            rng,
        );

        if st.running {
            worker.is_active = true;
            worker.state.last_seen = Utc::now();
        }

        st.workers.insert(id, worker.clone());
        debug!(worker = %worker.id, "Added worker");
        Ok(worker)
    }

    /// Remove a worker; pending timers for it become harmless no-ops.
    pub async fn remove_worker(&self, id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        st.workers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| FleetError::WorkerNotFound(id.to_string()))
    }

    /// Recompute and return the fleet-wide statistics snapshot.
    pub async fn fleet_stats(&self) -> FleetStats {
        let mut st = self.state.lock().await;
        recalculate(&mut st);
        st.stats.clone()
    }

    /// Statistics for one worker, `None` when unknown.
    pub async fn worker_stats(&self, id: &str) -> Option<crate::worker::WorkerStats> {
        let st = self.state.lock().await;
        st.workers.get(id).map(|w| w.stats.clone())
    }

    /// Force a worker into a burst window.
    pub async fn trigger_burst(&self, id: &str, duration: Duration) -> Result<()> {
        let mut st = self.state.lock().await;
        let worker = st
            .workers
            .get_mut(id)
            .ok_or_else(|| FleetError::WorkerNotFound(id.to_string()))?;

        worker.state.is_bursting = true;
        worker.state.burst_started = Some(Instant::now());
        worker.state.burst_duration = duration;
        worker.stats.burst_events += 1;
        self.events.publish(
            EventKind::BurstStarted,
            id,
            format!("burst triggered for {:?}", duration),
        );
        Ok(())
    }

    /// Force a connection drop with automatic reconnection after `duration`.
    pub async fn trigger_drop(&self, id: &str, duration: Duration) -> Result<()> {
        let mut st = self.state.lock().await;
        let stop = st.stop.clone();
        let worker = st
            .workers
            .get_mut(id)
            .ok_or_else(|| FleetError::WorkerNotFound(id.to_string()))?;

        behavior::drop_worker(worker, &self.events);
        self.schedule_reconnect(id.to_string(), duration, stop);
        Ok(())
    }

    /// Force an attack on a malicious worker; automatically stops after
    /// `duration`. Non-malicious workers are rejected untouched.
    pub async fn trigger_attack(
        &self,
        id: &str,
        kind: AttackKind,
        duration: Duration,
    ) -> Result<()> {
        let mut st = self.state.lock().await;
        let stop = st.stop.clone();
        let worker = st
            .workers
            .get_mut(id)
            .ok_or_else(|| FleetError::WorkerNotFound(id.to_string()))?;

        if !worker.is_malicious {
            return Err(FleetError::InvalidOperation(format!(
                "worker {} is not configured as malicious",
                id
            )));
        }

        behavior::start_attack(worker, kind, duration, &self.events);
        self.schedule_attack_end(id.to_string(), duration, stop);
        Ok(())
    }

    /// Update a worker's hash rate. The only sanctioned way a hash rate
    /// changes after generation.
    pub async fn update_hash_rate(&self, id: &str, hash_rate: u64) -> Result<()> {
        let mut st = self.state.lock().await;
        let worker = st
            .workers
            .get_mut(id)
            .ok_or_else(|| FleetError::WorkerNotFound(id.to_string()))?;
        worker.hash_rate = hash_rate;
        Ok(())
    }

    /// Replace a worker's network profile.
    pub async fn update_network_conditions(
        &self,
        id: &str,
        profile: NetworkProfile,
    ) -> Result<()> {
        let mut st = self.state.lock().await;
        let worker = st
            .workers
            .get_mut(id)
            .ok_or_else(|| FleetError::WorkerNotFound(id.to_string()))?;
        worker.network = profile;
        Ok(())
    }

    fn spawn_behavior_loop(&self, stop: StopSignal) {
        let fleet = self.clone();
        let period = self.config.behavior_interval;
        self.tasks.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => fleet.behavior_pass(&stop).await,
                    _ = stop.cancelled() => return,
                }
            }
        }));
    }

    fn spawn_stats_loop(&self, stop: StopSignal) {
        let state = self.state.clone();
        let period = self.config.stats_interval;
        self.tasks.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut st = state.lock().await;
                        if stop.is_stopped() {
                            return;
                        }
                        recalculate(&mut st);
                    }
                    _ = stop.cancelled() => return,
                }
            }
        }));
    }

    async fn behavior_pass(&self, stop: &StopSignal) {
        let mut st = self.state.lock().await;
        if stop.is_stopped() || !st.running {
            return;
        }

        let mut deferred = Vec::new();
        let now = Utc::now();
        let FleetState { workers, rng, .. } = &mut *st;
        for worker in workers.values_mut() {
            if !worker.is_active {
                continue;
            }
            behavior::tick_worker(worker, &self.config.behavior, rng, &self.events, &mut deferred);
            worker.state.last_seen = now;
        }

        let stop = st.stop.clone();
        drop(st);

        for action in deferred {
            match action {
                Deferred::Reconnect { worker_id, delay } => {
                    self.schedule_reconnect(worker_id, delay, stop.clone());
                }
            }
        }
    }

    /// Deferred one-shot restoring a dropped worker's connectivity.
    fn schedule_reconnect(&self, id: String, delay: Duration, stop: StopSignal) {
        let state = self.state.clone();
        let events = self.events.clone();
        self.tasks.track(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let mut st = state.lock().await;
                    if stop.is_stopped() {
                        return;
                    }
                    let running = st.running;
                    if let Some(worker) = st.workers.get_mut(&id) {
                        worker.state.is_disconnected = false;
                        if running {
                            worker.is_active = true;
                            worker.state.last_seen = Utc::now();
                        }
                        events.publish(EventKind::WorkerReconnected, &id, "reconnected");
                    }
                }
                _ = stop.cancelled() => {}
            }
        }));
    }

    /// Deferred one-shot ending a triggered attack.
    fn schedule_attack_end(&self, id: String, delay: Duration, stop: StopSignal) {
        let state = self.state.clone();
        let events = self.events.clone();
        self.tasks.track(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let mut st = state.lock().await;
                    if stop.is_stopped() {
                        return;
                    }
                    if let Some(profile) = st.workers.get_mut(&id).and_then(|w| w.attack.as_mut()) {
                        if profile.is_attacking {
                            profile.is_attacking = false;
                            profile.attack_started = None;
                            events.publish(EventKind::AttackEnded, &id, "attack window elapsed");
                        }
                    }
                }
                _ = stop.cancelled() => {}
            }
        }));
    }
}

fn generate_worker(config: &WorkerFleetConfig, next_id: &mut u64, rng: &mut StdRng) -> Worker {
    *next_id += 1;
    let id = format!("worker-{}", next_id);

    let type_cfg = select_worker_type(&config.worker_types, rng);
    let malicious = config.malicious.malicious_percentage > 0.0
        && rng.gen::<f64>() < config.malicious.malicious_percentage;
    let network = NetworkProfile::sample(&config.network, rng);

    Worker::from_type(
        id,
        &type_cfg,
        config.hash_rate_range,
        network,
        malicious.then_some(config.malicious.attack_types.as_slice()),
        rng,
    )
}

fn recalculate(st: &mut FleetState) {
    let mut stats = FleetStats {
        total_workers: st.workers.len() as u32,
        ..FleetStats::default()
    };

    for worker in st.workers.values() {
        if worker.is_active {
            stats.active_workers += 1;
            stats.total_hash_rate += worker.hash_rate;
        }
        stats.total_shares += worker.stats.total_shares;
        stats.valid_shares += worker.stats.valid_shares;
        stats.invalid_shares += worker.stats.invalid_shares;
        stats.burst_events += worker.stats.burst_events;
        stats.drop_events += worker.stats.drop_events;
        stats.attack_events += worker.stats.attack_events;
    }

    if stats.active_workers > 0 {
        stats.average_hash_rate = stats.total_hash_rate / stats.active_workers as u64;
    }
    if stats.total_workers > 0 {
        stats.uptime_percentage = stats.active_workers as f64 / stats.total_workers as f64 * 100.0;
    }
    if st.running {
        if let Some(started) = st.started_at {
            stats.simulation_time = started.elapsed();
        }
    }

    st.stats = stats;
}
