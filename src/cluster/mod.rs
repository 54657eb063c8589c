//! Simulated mining clusters.
//!
//! A [`Cluster`] is a named group of workers sharing a coordinator,
//! location, power budget, and pool assignment. Cluster-owned workers use
//! the same data model and behavior machine as standalone fleet workers but
//! are generated from per-cluster parameters and a per-farm-type power
//! model.

pub mod fleet;
pub mod migration;

use crate::config::{ClusterConfig, CoordinationConfig, FailoverConfig, HashRateRange};
use crate::worker::{
    effective_range, FarmType, NetworkProfile, PerformanceProfile, Worker, WorkerState,
    WorkerStats,
};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Per-cluster statistics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterStats {
    pub worker_count: u32,
    pub active_workers: u32,
    pub total_hash_rate: u64,
    pub average_hash_rate: u64,
    pub total_shares: u64,
    pub valid_shares: u64,
    pub invalid_shares: u64,
    pub uptime_percentage: f64,
    /// Hashes per second per watt of current draw.
    pub power_efficiency: f64,
    pub failover_events: u64,
    pub sync_events: u64,
    pub migration_events: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_recovery_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_in_failure: bool,
}

/// Fleet-wide statistics across every cluster.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OverallStats {
    pub total_clusters: u32,
    pub active_clusters: u32,
    pub total_workers: u32,
    pub active_workers: u32,
    pub total_hash_rate: u64,
    pub average_hash_rate: u64,
    pub total_power_usage: u32,
    pub power_efficiency: f64,
    pub uptime_percentage: f64,
    pub failover_events: u64,
    pub migration_events: u64,
    /// Location name to cluster count.
    pub geographic_distribution: HashMap<String, u32>,
}

/// A simulated mining cluster.
///
/// Invariant: among clusters sharing one coordinator with leader election
/// enabled, at most one holds the leader role at any instant.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub location: String,
    pub coordinator: String,
    pub workers: Vec<Worker>,
    pub farm_type: FarmType,
    /// Watts; zero disables power governance.
    pub power_limit: u32,
    pub current_power_usage: u32,
    pub is_active: bool,
    pub is_leader: bool,
    pub is_backup: bool,
    pub is_in_failure: bool,
    pub current_pool: String,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Generation parameters, kept so the cluster can grow its own workers.
    pub hash_rate_range: HashRateRange,
    pub network_latency: Duration,
    pub failover: FailoverConfig,
    pub coordination: CoordinationConfig,
    pub stats: ClusterStats,
}

impl Cluster {
    /// Build a cluster and generate its worker population.
    pub(crate) fn generate(
        id: String,
        config: &ClusterConfig,
        worker_seq: &mut u64,
        rng: &mut StdRng,
    ) -> Self {
        let mut cluster = Self {
            id,
            name: config.name.clone(),
            location: config.location.clone(),
            coordinator: config.coordinator.clone(),
            workers: Vec::with_capacity(config.worker_count),
            farm_type: config.farm_type,
            power_limit: config.power_limit,
            current_power_usage: 0,
            is_active: false,
            is_leader: false,
            is_backup: config.is_backup,
            is_in_failure: false,
            current_pool: config.current_pool.clone(),
            last_sync_time: None,
            hash_rate_range: config.hash_rate_range,
            network_latency: config.network_latency,
            failover: config.failover.clone(),
            coordination: config.coordination.clone(),
            stats: ClusterStats::default(),
        };

        for _ in 0..config.worker_count {
            let worker = cluster.spawn_worker(worker_seq, rng);
            cluster.workers.push(worker);
        }
        cluster
    }

    /// Generate one worker with this cluster's parameters. Cluster workers
    /// are never malicious.
    pub(crate) fn spawn_worker(&self, worker_seq: &mut u64, rng: &mut StdRng) -> Worker {
        *worker_seq += 1;
        let id = format!("{}-w{}", self.id, worker_seq);

        let range = effective_range(self.hash_rate_range);
        let span = range.max.saturating_sub(range.min);
        let hash_rate = range.min + (rng.gen::<f64>() * span as f64) as u64;

        Worker {
            id,
            kind: self.farm_type,
            hash_rate,
            is_active: false,
            is_malicious: false,
            location: self.location.clone(),
            performance: PerformanceProfile {
                power_consumption: power_consumption(self.farm_type, hash_rate),
                efficiency_rating: self.farm_type.efficiency_rating(),
                failure_rate: 0.01,
                temperature: 20.0 + rng.gen::<f64>() * 40.0,
                fan_speed: 1000 + rng.gen_range(0..2000),
            },
            network: NetworkProfile::for_cluster(self.network_latency, rng),
            attack: None,
            state: WorkerState::new(),
            stats: WorkerStats::default(),
        }
    }

    /// Look up a worker by id.
    pub fn worker(&self, id: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.id == id)
    }

    /// Sum of active workers' power draw in watts.
    pub(crate) fn active_power_usage(&self) -> u32 {
        self.workers
            .iter()
            .filter(|w| w.is_active)
            .map(|w| w.performance.power_consumption)
            .sum()
    }

    /// Recompute the statistics snapshot from current worker state.
    pub(crate) fn recompute_stats(&mut self) {
        let stats = &mut self.stats;
        stats.worker_count = self.workers.len() as u32;
        stats.active_workers = 0;
        stats.total_hash_rate = 0;
        stats.total_shares = 0;
        stats.valid_shares = 0;
        stats.invalid_shares = 0;

        for worker in &self.workers {
            if worker.is_active {
                stats.active_workers += 1;
                stats.total_hash_rate += worker.hash_rate;
            }
            stats.total_shares += worker.stats.total_shares;
            stats.valid_shares += worker.stats.valid_shares;
            stats.invalid_shares += worker.stats.invalid_shares;
        }

        stats.average_hash_rate = if stats.active_workers > 0 {
            stats.total_hash_rate / stats.active_workers as u64
        } else {
            0
        };
        stats.uptime_percentage = if stats.worker_count > 0 {
            stats.active_workers as f64 / stats.worker_count as f64 * 100.0
        } else {
            0.0
        };
        stats.power_efficiency = if self.current_power_usage > 0 {
            stats.total_hash_rate as f64 / self.current_power_usage as f64
        } else {
            0.0
        };
        stats.is_active = self.is_active;
        stats.is_in_failure = self.is_in_failure;
    }
}

/// Nominal power draw for a worker of the given class and hash rate.
fn power_consumption(farm_type: FarmType, hash_rate: u64) -> u32 {
    let mhs = (hash_rate / 1_000_000) as u32;
    mhs * farm_type.watts_per_mhs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn test_config() -> ClusterConfig {
        ClusterConfig {
            name: "test".to_string(),
            worker_count: 10,
            location: "us-east".to_string(),
            coordinator: "coord-1".to_string(),
            farm_type: FarmType::Asic,
            current_pool: "pool_1".to_string(),
            ..ClusterConfig::default()
        }
    }

    #[test]
    fn test_generate_populates_workers() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = 0;
        let cluster = Cluster::generate("c-1".to_string(), &test_config(), &mut seq, &mut rng);

        assert_eq!(cluster.workers.len(), 10);
        for worker in &cluster.workers {
            assert_eq!(worker.location, "us-east");
            assert_eq!(worker.kind, FarmType::Asic);
            assert!(!worker.is_malicious);
            assert!(worker.hash_rate >= 1_000_000);
            assert!(worker.hash_rate <= 10_000_000);
        }
    }

    #[test]
    fn test_power_model_scales_with_hash_rate() {
        assert_eq!(power_consumption(FarmType::Asic, 5_000_000), 500);
        assert_eq!(power_consumption(FarmType::Gpu, 5_000_000), 1500);
        assert_eq!(power_consumption(FarmType::Cpu, 1_000_000), 500);
    }

    #[test]
    fn test_recompute_stats_counts_active_only_hash_rate() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut seq = 0;
        let mut cluster = Cluster::generate("c-1".to_string(), &test_config(), &mut seq, &mut rng);

        for worker in cluster.workers.iter_mut().take(4) {
            worker.is_active = true;
        }
        cluster.recompute_stats();

        assert_eq!(cluster.stats.worker_count, 10);
        assert_eq!(cluster.stats.active_workers, 4);
        assert!(cluster.stats.total_hash_rate > 0);
        assert_eq!(cluster.stats.uptime_percentage, 40.0);
    }

    #[test]
    fn test_active_power_usage_sums_active_workers() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seq = 0;
        let mut cluster = Cluster::generate("c-1".to_string(), &test_config(), &mut seq, &mut rng);

        assert_eq!(cluster.active_power_usage(), 0);
        for worker in cluster.workers.iter_mut() {
            worker.is_active = true;
        }
        let expected: u32 = cluster
            .workers
            .iter()
            .map(|w| w.performance.power_consumption)
            .sum();
        assert_eq!(cluster.active_power_usage(), expected);
    }
}
