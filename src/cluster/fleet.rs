//! The cluster fleet engine.
//!
//! Owns a keyed collection of [`Cluster`]s and layers coordination on top of
//! their worker fleets: leader election, failover, network-partition
//! injection, power-budget governance, and pool migration (see
//! [`migration`](crate::cluster::migration)). Four independent periodic
//! tasks (behavior, failure injection, coordination, statistics) mutate the
//! same state under one exclusive lock; read accessors return deep copies.

use crate::cluster::migration::{MigrationPlan, MigrationProgress};
use crate::cluster::{Cluster, ClusterStats, OverallStats};
use crate::config::{ClusterConfig, ClusterFleetConfig};
use crate::error::{FleetError, Result};
use crate::events::{EventBus, EventKind};
use crate::shutdown::{StopSignal, TaskTracker};
use crate::worker::behavior::{self, Deferred};
use crate::worker::sample_duration;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Delay between a primary failing and its backups activating.
const FAILOVER_DELAY: Duration = Duration::from_secs(2);

/// Latency multiplier applied to partitioned clusters.
const PARTITION_LATENCY_FACTOR: u32 = 10;

pub(super) struct ClusterState {
    pub(super) clusters: HashMap<String, Cluster>,
    pub(super) plans: HashMap<String, MigrationPlan>,
    pub(super) progress: HashMap<String, MigrationProgress>,
    pub(super) running: bool,
    pub(super) started_at: Option<Instant>,
    pub(super) overall: OverallStats,
    pub(super) rng: StdRng,
    pub(super) next_cluster: u64,
    pub(super) next_worker: u64,
    pub(super) stop: StopSignal,
}

/// Engine managing a fleet of coordinated clusters.
///
/// Cheap to clone; clones share the same underlying fleet.
#[derive(Clone)]
pub struct ClusterFleet {
    pub(super) config: Arc<ClusterFleetConfig>,
    pub(super) state: Arc<Mutex<ClusterState>>,
    pub(super) events: EventBus,
    pub(super) tasks: TaskTracker,
}

impl ClusterFleet {
    /// Build a fleet and generate every configured cluster.
    pub fn new(config: ClusterFleetConfig) -> Result<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut clusters = HashMap::with_capacity(config.clusters.len());
        let mut next_cluster = 0u64;
        let mut next_worker = 0u64;
        for cluster_cfg in &config.clusters {
            next_cluster += 1;
            let id = cluster_id(&cluster_cfg.name, next_cluster);
            let cluster = Cluster::generate(id, cluster_cfg, &mut next_worker, &mut rng);
            clusters.insert(cluster.id.clone(), cluster);
        }

        info!(clusters = clusters.len(), "Generated cluster fleet");

        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(ClusterState {
                clusters,
                plans: HashMap::new(),
                progress: HashMap::new(),
                running: false,
                started_at: None,
                overall: OverallStats::default(),
                rng,
                next_cluster,
                next_worker,
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

    /// Start the simulation: activate every cluster and worker, run the
    /// initial leader elections, and launch the periodic tasks.
    pub async fn start(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.running {
            return Err(FleetError::AlreadyRunning);
        }

        st.running = true;
        st.started_at = Some(Instant::now());
        let now = Utc::now();
        for cluster in st.clusters.values_mut() {
            cluster.is_active = true;
            cluster.last_sync_time = Some(now);
            for worker in cluster.workers.iter_mut() {
                worker.is_active = true;
                worker.state.last_seen = now;
            }
        }

        // Initial leader election per election-enabled coordinator group.
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for cluster in st.clusters.values() {
            if cluster.coordination.leader_election {
                groups
                    .entry(cluster.coordinator.clone())
                    .or_default()
                    .push(cluster.id.clone());
            }
        }
        for ids in groups.values() {
            self.elect_among(&mut st, ids);
        }

        let stop = st.stop.clone();
        drop(st);

        self.spawn_behavior_loop(stop.clone());
        self.spawn_coordination_loop(stop.clone());
        self.spawn_stats_loop(stop.clone());
        if self.config.failures.enable_cluster_failures && self.config.failures.failure_rate > 0.0
        {
            self.spawn_failure_loop(stop);
        }
        info!("Cluster fleet started");
        Ok(())
    }

    /// Stop the simulation. No-op when not running. Cancels the periodic
    /// tasks, in-flight migration pacers, and every deferred timer.
    pub async fn stop(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        if !st.running {
            return Ok(());
        }

        st.running = false;
        for cluster in st.clusters.values_mut() {
            cluster.is_active = false;
            for worker in cluster.workers.iter_mut() {
                worker.is_active = false;
            }
        }

        st.stop.stop();
        // Fresh signal so the engine can be started again.
        st.stop = StopSignal::new();
        drop(st);

        self.tasks.abort_all();
        info!("Cluster fleet stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Wall-clock time since `start()`; zero while stopped.
    pub async fn uptime(&self) -> Duration {
        let st = self.state.lock().await;
        if st.running {
            st.started_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }

    /// Deep copies of every cluster.
    pub async fn clusters(&self) -> Vec<Cluster> {
        let st = self.state.lock().await;
        st.clusters.values().cloned().collect()
    }

    /// Deep copy of one cluster, `None` when unknown.
    pub async fn cluster(&self, id: &str) -> Option<Cluster> {
        let st = self.state.lock().await;
        st.clusters.get(id).cloned()
    }

    /// Add a cluster generated from `config`; active immediately when the
    /// engine is running.
    pub async fn add_cluster(&self, config: ClusterConfig) -> Result<Cluster> {
        if config.name.is_empty() {
            return Err(FleetError::InvalidConfig {
                field: "name".to_string(),
                reason: "cluster name must not be empty".to_string(),
            });
        }

        let mut st = self.state.lock().await;
        st.next_cluster += 1;
        let id = cluster_id(&config.name, st.next_cluster);
        let ClusterState {
            rng, next_worker, ..
        } = &mut *st;
        let mut cluster = Cluster::generate(id, &config, next_worker, rng);

        if st.running {
            cluster.is_active = true;
            cluster.last_sync_time = Some(Utc::now());
            for worker in cluster.workers.iter_mut() {
                worker.is_active = true;
                worker.state.last_seen = Utc::now();
            }
        }

        st.clusters.insert(cluster.id.clone(), cluster.clone());
        debug!(cluster = %cluster.id, "Added cluster");
        Ok(cluster)
    }

    /// Remove a cluster; pending timers for it become harmless no-ops.
    pub async fn remove_cluster(&self, id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        st.clusters
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| FleetError::ClusterNotFound(id.to_string()))
    }

    /// Fail a cluster for `duration`: it goes inactive with every worker
    /// disconnected, backups take over when auto-failover is configured, and
    /// recovery is scheduled automatically.
    pub async fn trigger_cluster_failure(&self, id: &str, duration: Duration) -> Result<()> {
        let mut st = self.state.lock().await;
        self.fail_cluster_locked(&mut st, id, duration)
    }

    /// Degrade connectivity for the named clusters: 10x latency and 50%
    /// packet loss until `duration` elapses.
    pub async fn trigger_network_partition(
        &self,
        ids: &[String],
        duration: Duration,
    ) -> Result<()> {
        let mut st = self.state.lock().await;
        for id in ids {
            if !st.clusters.contains_key(id) {
                return Err(FleetError::ClusterNotFound(id.clone()));
            }
        }

        for id in ids {
            if let Some(cluster) = st.clusters.get_mut(id) {
                for worker in cluster.workers.iter_mut() {
                    worker.network.latency *= PARTITION_LATENCY_FACTOR;
                    worker.network.packet_loss = 0.5;
                }
                self.events
                    .publish(EventKind::PartitionStarted, id, "network partition injected");
            }
        }

        let stop = st.stop.clone();
        drop(st);
        self.schedule_partition_heal(ids.to_vec(), duration, stop);
        Ok(())
    }

    /// Fail a coordinator: every cluster in its group loses leadership until
    /// re-election after `duration`.
    pub async fn trigger_coordinator_failure(
        &self,
        coordinator: &str,
        duration: Duration,
    ) -> Result<()> {
        let mut st = self.state.lock().await;
        let members: Vec<String> = st
            .clusters
            .values()
            .filter(|c| c.coordinator == coordinator)
            .map(|c| c.id.clone())
            .collect();
        if members.is_empty() {
            return Err(FleetError::CoordinatorNotFound(coordinator.to_string()));
        }

        for id in &members {
            if let Some(cluster) = st.clusters.get_mut(id) {
                cluster.is_leader = false;
                cluster.stats.failover_events += 1;
            }
        }
        self.events.publish(
            EventKind::CoordinatorFailed,
            coordinator,
            format!("{} clusters lost their coordinator", members.len()),
        );

        let stop = st.stop.clone();
        drop(st);

        let fleet = self.clone();
        self.tasks.track(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = stop.cancelled() => return,
            }
            let mut st = fleet.state.lock().await;
            if stop.is_stopped() {
                return;
            }
            fleet.elect_among(&mut st, &members);
        }));
        Ok(())
    }

    /// Elect one leader uniformly at random among the given cluster ids.
    /// Clears every other candidate's leader flag first.
    pub async fn elect_leader(&self, ids: &[String]) -> Result<String> {
        if ids.is_empty() {
            return Err(FleetError::Validation(
                "leader election needs at least one candidate cluster".to_string(),
            ));
        }
        let mut st = self.state.lock().await;
        self.elect_among(&mut st, ids)
            .ok_or_else(|| FleetError::ClusterNotFound(ids.join(", ")))
    }

    /// Stamp a synchronization point on the given clusters.
    pub async fn synchronize_clusters(&self, ids: &[String]) -> Result<()> {
        let mut st = self.state.lock().await;
        for id in ids {
            if !st.clusters.contains_key(id) {
                return Err(FleetError::ClusterNotFound(id.clone()));
            }
        }

        let now = Utc::now();
        for id in ids {
            if let Some(cluster) = st.clusters.get_mut(id) {
                cluster.last_sync_time = Some(now);
                cluster.stats.sync_events += 1;
            }
        }
        self.events.publish(
            EventKind::ClustersSynchronized,
            ids.join(","),
            "synchronization forced",
        );
        Ok(())
    }

    /// Recompute and return fleet-wide statistics.
    pub async fn overall_stats(&self) -> OverallStats {
        let mut st = self.state.lock().await;
        refresh_all_stats(&mut st);
        st.overall.clone()
    }

    /// Recompute and return one cluster's statistics, `None` when unknown.
    pub async fn cluster_stats(&self, id: &str) -> Option<ClusterStats> {
        let mut st = self.state.lock().await;
        let cluster = st.clusters.get_mut(id)?;
        cluster.current_power_usage = cluster.active_power_usage();
        cluster.recompute_stats();
        Some(cluster.stats.clone())
    }

    /// Location name to cluster count. Values sum to the cluster total.
    pub async fn geographic_distribution(&self) -> HashMap<String, u32> {
        let st = self.state.lock().await;
        let mut distribution: HashMap<String, u32> = HashMap::new();
        for cluster in st.clusters.values() {
            *distribution.entry(cluster.location.clone()).or_default() += 1;
        }
        distribution
    }

    /// Update a cluster's descriptive configuration in place. The worker
    /// population and pool assignment are not touched.
    pub async fn update_cluster_config(&self, id: &str, config: ClusterConfig) -> Result<()> {
        let mut st = self.state.lock().await;
        let cluster = st
            .clusters
            .get_mut(id)
            .ok_or_else(|| FleetError::ClusterNotFound(id.to_string()))?;

        cluster.name = config.name;
        cluster.location = config.location;
        cluster.coordinator = config.coordinator;
        cluster.farm_type = config.farm_type;
        cluster.power_limit = config.power_limit;
        cluster.hash_rate_range = config.hash_rate_range;
        cluster.network_latency = config.network_latency;
        cluster.failover = config.failover;
        cluster.coordination = config.coordination;
        Ok(())
    }

    /// Grow or shrink a cluster's worker population to `count`.
    pub async fn update_worker_distribution(&self, id: &str, count: usize) -> Result<()> {
        let mut st = self.state.lock().await;
        let running = st.running;
        let ClusterState {
            clusters,
            rng,
            next_worker,
            ..
        } = &mut *st;
        let cluster = clusters
            .get_mut(id)
            .ok_or_else(|| FleetError::ClusterNotFound(id.to_string()))?;

        while cluster.workers.len() < count {
            let mut worker = cluster.spawn_worker(next_worker, rng);
            if running && cluster.is_active {
                worker.is_active = true;
                worker.state.last_seen = Utc::now();
            }
            cluster.workers.push(worker);
        }
        cluster.workers.truncate(count);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internal: failure handling
    // ------------------------------------------------------------------

    pub(super) fn fail_cluster_locked(
        &self,
        st: &mut ClusterState,
        id: &str,
        duration: Duration,
    ) -> Result<()> {
        let stop = st.stop.clone();
        let cluster = st
            .clusters
            .get_mut(id)
            .ok_or_else(|| FleetError::ClusterNotFound(id.to_string()))?;

        cluster.is_in_failure = true;
        cluster.is_active = false;
        cluster.stats.failover_events += 1;
        cluster.stats.last_failure_time = Some(Utc::now());
        for worker in cluster.workers.iter_mut() {
            worker.is_active = false;
            worker.state.is_disconnected = true;
        }

        self.events.publish(
            EventKind::ClusterFailed,
            id,
            format!("cluster failed for {:?}", duration),
        );

        let auto_failover =
            cluster.failover.auto_failover && !cluster.failover.backup_clusters.is_empty();
        if auto_failover {
            self.schedule_failover(id.to_string(), duration, stop);
        } else {
            self.schedule_recovery(id.to_string(), duration, stop);
        }
        Ok(())
    }

    /// Deferred failover: activate backups after a short delay, then recover
    /// the primary once the outage elapses.
    fn schedule_failover(&self, id: String, outage: Duration, stop: StopSignal) {
        let fleet = self.clone();
        self.tasks.track(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(FAILOVER_DELAY) => {}
                _ = stop.cancelled() => return,
            }
            {
                let mut st = fleet.state.lock().await;
                if stop.is_stopped() {
                    return;
                }
                let backups = match st.clusters.get(&id) {
                    Some(cluster) => cluster.failover.backup_clusters.clone(),
                    None => return,
                };
                activate_backups(&mut st, &backups, &fleet.events);
            }
            tokio::select! {
                _ = tokio::time::sleep(outage) => {}
                _ = stop.cancelled() => return,
            }
            let mut st = fleet.state.lock().await;
            if stop.is_stopped() {
                return;
            }
            recover_cluster(&mut st, &id, &fleet.events);
        }));
    }

    /// Deferred recovery for a failed cluster without auto-failover.
    fn schedule_recovery(&self, id: String, outage: Duration, stop: StopSignal) {
        let fleet = self.clone();
        self.tasks.track(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(outage) => {}
                _ = stop.cancelled() => return,
            }
            let mut st = fleet.state.lock().await;
            if stop.is_stopped() {
                return;
            }
            recover_cluster(&mut st, &id, &fleet.events);
        }));
    }

    fn schedule_partition_heal(&self, ids: Vec<String>, duration: Duration, stop: StopSignal) {
        let fleet = self.clone();
        self.tasks.track(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = stop.cancelled() => return,
            }
            let mut st = fleet.state.lock().await;
            if stop.is_stopped() {
                return;
            }
            for id in &ids {
                if let Some(cluster) = st.clusters.get_mut(id) {
                    for worker in cluster.workers.iter_mut() {
                        worker.network.latency /= PARTITION_LATENCY_FACTOR;
                        worker.network.packet_loss = 0.01;
                    }
                    fleet
                        .events
                        .publish(EventKind::PartitionHealed, id, "network partition healed");
                }
            }
        }));
    }

    // ------------------------------------------------------------------
    // Internal: coordination
    // ------------------------------------------------------------------

    /// Clear leader flags among `ids` and mark one uniformly-chosen known
    /// cluster as leader. Returns `None` when no id is known.
    pub(super) fn elect_among(&self, st: &mut ClusterState, ids: &[String]) -> Option<String> {
        let known: Vec<String> = ids
            .iter()
            .filter(|id| st.clusters.contains_key(*id))
            .cloned()
            .collect();
        if known.is_empty() {
            return None;
        }

        for id in &known {
            if let Some(cluster) = st.clusters.get_mut(id) {
                cluster.is_leader = false;
            }
        }

        let winner = known[st.rng.gen_range(0..known.len())].clone();
        if let Some(cluster) = st.clusters.get_mut(&winner) {
            cluster.is_leader = true;
        }
        self.events.publish(
            EventKind::LeaderElected,
            &winner,
            format!("elected among {} candidates", known.len()),
        );
        Some(winner)
    }

    // ------------------------------------------------------------------
    // Internal: periodic tasks
    // ------------------------------------------------------------------

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

    fn spawn_failure_loop(&self, stop: StopSignal) {
        let fleet = self.clone();
        let period = self.config.failure_interval;
        self.tasks.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => fleet.failure_pass(&stop).await,
                    _ = stop.cancelled() => return,
                }
            }
        }));
    }

    fn spawn_coordination_loop(&self, stop: StopSignal) {
        let fleet = self.clone();
        let period = self.config.coordination_interval;
        self.tasks.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => fleet.coordination_pass(&stop).await,
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
                        refresh_all_stats(&mut st);
                    }
                    _ = stop.cancelled() => return,
                }
            }
        }));
    }

    /// One behavior tick: power governance, then the worker behavior machine
    /// for every active worker of every active cluster.
    async fn behavior_pass(&self, stop: &StopSignal) {
        let mut st = self.state.lock().await;
        if stop.is_stopped() || !st.running {
            return;
        }

        let mut deferred: Vec<(String, Deferred)> = Vec::new();
        let now = Utc::now();
        let ClusterState { clusters, rng, .. } = &mut *st;
        for cluster in clusters.values_mut() {
            if !cluster.is_active {
                continue;
            }

            enforce_power_budget(cluster, &self.events);

            let mut local = Vec::new();
            for worker in cluster.workers.iter_mut() {
                if !worker.is_active {
                    continue;
                }
                behavior::tick_worker(worker, &self.config.behavior, rng, &self.events, &mut local);
                worker.state.last_seen = now;
            }
            for action in local {
                deferred.push((cluster.id.clone(), action));
            }
        }

        let stop = st.stop.clone();
        drop(st);

        for (cluster_id, action) in deferred {
            match action {
                Deferred::Reconnect { worker_id, delay } => {
                    self.schedule_worker_reconnect(cluster_id, worker_id, delay, stop.clone());
                }
            }
        }
    }

    /// One failure-injection tick: roll every healthy cluster against the
    /// configured per-minute failure rate.
    async fn failure_pass(&self, stop: &StopSignal) {
        let rate = self.config.failures.failure_rate;
        if rate <= 0.0 {
            return;
        }

        let mut st = self.state.lock().await;
        if stop.is_stopped() || !st.running {
            return;
        }

        let candidates: Vec<String> = st
            .clusters
            .values()
            .filter(|c| c.is_active && !c.is_in_failure)
            .map(|c| c.id.clone())
            .collect();

        for id in candidates {
            let roll: f64 = st.rng.gen();
            if roll >= rate / 60.0 {
                continue;
            }
            let outage = sample_duration(self.config.failures.recovery_range, &mut st.rng);
            match self.fail_cluster_locked(&mut st, &id, outage) {
                Ok(()) => {
                    debug!(cluster = %id, ?outage, "Injected random cluster failure");
                }
                Err(e) => {
                    warn!(cluster = %id, error = %e, "Random failure injection failed");
                    self.events.publish(
                        EventKind::InternalError,
                        &id,
                        format!("random failure injection: {}", e),
                    );
                }
            }
        }
    }

    /// One coordination tick: synchronize due clusters per coordinator group
    /// and ensure every election-enabled group has a leader.
    async fn coordination_pass(&self, stop: &StopSignal) {
        let mut st = self.state.lock().await;
        if stop.is_stopped() || !st.running {
            return;
        }

        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for cluster in st.clusters.values() {
            if cluster.is_active && !cluster.coordination.sync_interval.is_zero() {
                groups
                    .entry(cluster.coordinator.clone())
                    .or_default()
                    .push(cluster.id.clone());
            }
        }

        let now = Utc::now();
        for (coordinator, ids) in groups {
            let mut synced = 0usize;
            for id in &ids {
                if let Some(cluster) = st.clusters.get_mut(id) {
                    let due = match cluster.last_sync_time {
                        None => true,
                        Some(t) => now
                            .signed_duration_since(t)
                            .to_std()
                            .map(|d| d >= cluster.coordination.sync_interval)
                            .unwrap_or(false),
                    };
                    if due {
                        cluster.last_sync_time = Some(now);
                        cluster.stats.sync_events += 1;
                        synced += 1;
                    }
                }
            }
            if synced > 0 {
                self.events.publish(
                    EventKind::ClustersSynchronized,
                    &coordinator,
                    format!("{} clusters synchronized", synced),
                );
            }

            let election_enabled = ids
                .iter()
                .any(|id| st.clusters.get(id).is_some_and(|c| c.coordination.leader_election));
            let has_leader = ids
                .iter()
                .any(|id| st.clusters.get(id).is_some_and(|c| c.is_leader));
            if election_enabled && !has_leader {
                self.elect_among(&mut st, &ids);
            }
        }
    }

    /// Deferred one-shot restoring a dropped cluster worker's connectivity.
    fn schedule_worker_reconnect(
        &self,
        cluster_id: String,
        worker_id: String,
        delay: Duration,
        stop: StopSignal,
    ) {
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
                    if let Some(cluster) = st.clusters.get_mut(&cluster_id) {
                        let cluster_active = cluster.is_active;
                        if let Some(worker) =
                            cluster.workers.iter_mut().find(|w| w.id == worker_id)
                        {
                            worker.state.is_disconnected = false;
                            if running && cluster_active {
                                worker.is_active = true;
                                worker.state.last_seen = Utc::now();
                            }
                            events.publish(EventKind::WorkerReconnected, &worker_id, "reconnected");
                        }
                    }
                }
                _ = stop.cancelled() => {}
            }
        }));
    }
}

/// Deterministic cluster id: lowercased name with a per-engine sequence.
fn cluster_id(name: &str, seq: u64) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}-{}", slug, seq)
}

/// Shed active workers in ascending id order until the cluster is back under
/// its power budget, then record the resulting draw.
fn enforce_power_budget(cluster: &mut Cluster, events: &EventBus) {
    let mut usage = cluster.active_power_usage();
    if cluster.power_limit > 0 && usage > cluster.power_limit {
        let mut order: Vec<usize> = (0..cluster.workers.len())
            .filter(|&i| cluster.workers[i].is_active)
            .collect();
        order.sort_by(|&a, &b| cluster.workers[a].id.cmp(&cluster.workers[b].id));

        let mut shed = 0usize;
        for idx in order {
            if usage <= cluster.power_limit {
                break;
            }
            let worker = &mut cluster.workers[idx];
            worker.is_active = false;
            usage = usage.saturating_sub(worker.performance.power_consumption);
            shed += 1;
        }
        events.publish(
            EventKind::PowerCapEnforced,
            &cluster.id,
            format!("shed {} workers, draw now {}W", shed, usage),
        );
    }
    cluster.current_power_usage = usage;
}

/// Activate every backup cluster named in `names`.
fn activate_backups(st: &mut ClusterState, names: &[String], events: &EventBus) {
    let now = Utc::now();
    for cluster in st.clusters.values_mut() {
        if cluster.is_backup && names.contains(&cluster.name) {
            cluster.is_active = true;
            for worker in cluster.workers.iter_mut() {
                worker.is_active = true;
                worker.state.last_seen = now;
            }
            events.publish(
                EventKind::FailoverActivated,
                &cluster.id,
                "backup cluster activated",
            );
        }
    }
}

/// Restore a failed primary and stand its backups down again.
fn recover_cluster(st: &mut ClusterState, id: &str, events: &EventBus) {
    let now = Utc::now();
    let backups = {
        let Some(cluster) = st.clusters.get_mut(id) else {
            return;
        };
        cluster.is_in_failure = false;
        cluster.is_active = true;
        cluster.stats.last_recovery_time = Some(now);
        for worker in cluster.workers.iter_mut() {
            worker.is_active = true;
            worker.state.is_disconnected = false;
            worker.state.last_seen = now;
        }
        cluster.failover.backup_clusters.clone()
    };
    events.publish(EventKind::ClusterRecovered, id, "cluster recovered");

    for cluster in st.clusters.values_mut() {
        if cluster.is_backup && backups.contains(&cluster.name) {
            cluster.is_active = false;
            for worker in cluster.workers.iter_mut() {
                worker.is_active = false;
            }
        }
    }
}

/// Recompute every cluster's statistics and the fleet-wide aggregate.
fn refresh_all_stats(st: &mut ClusterState) {
    for cluster in st.clusters.values_mut() {
        cluster.current_power_usage = cluster.active_power_usage();
        cluster.recompute_stats();
    }

    let mut overall = OverallStats {
        total_clusters: st.clusters.len() as u32,
        ..OverallStats::default()
    };
    for cluster in st.clusters.values() {
        if cluster.is_active {
            overall.active_clusters += 1;
        }
        overall.total_workers += cluster.workers.len() as u32;
        overall.active_workers += cluster.stats.active_workers;
        overall.total_hash_rate += cluster.stats.total_hash_rate;
        overall.total_power_usage += cluster.current_power_usage;
        overall.failover_events += cluster.stats.failover_events;
        overall.migration_events += cluster.stats.migration_events;
        *overall
            .geographic_distribution
            .entry(cluster.location.clone())
            .or_default() += 1;
    }

    if overall.active_workers > 0 {
        overall.average_hash_rate = overall.total_hash_rate / overall.active_workers as u64;
    }
    if overall.total_workers > 0 {
        overall.uptime_percentage =
            overall.active_workers as f64 / overall.total_workers as f64 * 100.0;
    }
    if overall.total_power_usage > 0 {
        overall.power_efficiency =
            overall.total_hash_rate as f64 / overall.total_power_usage as f64;
    }

    st.overall = overall;
}
