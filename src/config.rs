//! Configuration for the fleet simulation engines.
//!
//! All structs are serde-friendly so scenarios can be loaded from JSON files
//! checked into a test suite. `Default` impls carry conservative values; the
//! `development()` presets produce a lively small fleet suitable for local
//! experiments.

use crate::cluster::migration::MigrationStrategy;
use crate::error::{FleetError, Result};
use crate::worker::{AttackKind, FarmType, LinkQuality};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Inclusive range of base hash rates, in hashes per second.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HashRateRange {
    pub min: u64,
    pub max: u64,
}

impl Default for HashRateRange {
    fn default() -> Self {
        Self {
            min: 1_000_000,
            max: 10_000_000,
        }
    }
}

/// Inclusive range of durations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DurationRange {
    pub min: Duration,
    pub max: Duration,
}

impl DurationRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }
}

impl Default for DurationRange {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(5),
            max: Duration::from_secs(30),
        }
    }
}

/// Range of network latencies used when sampling worker link profiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatencyRange {
    pub min: Duration,
    pub max: Duration,
}

impl Default for LatencyRange {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(20),
            max: Duration::from_millis(250),
        }
    }
}

/// One entry of the worker type distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTypeConfig {
    pub kind: FarmType,
    /// Share of the population in [0, 1].
    pub percentage: f64,
    pub hash_rate_multiplier: f64,
    /// Watts drawn while active.
    pub power_consumption: u32,
    /// 0.0 to 1.0.
    pub efficiency_rating: f64,
    pub failure_rate: f64,
}

impl Default for WorkerTypeConfig {
    fn default() -> Self {
        Self {
            kind: FarmType::Gpu,
            percentage: 1.0,
            hash_rate_multiplier: 1.0,
            power_consumption: 300,
            efficiency_rating: 0.85,
            failure_rate: 0.01,
        }
    }
}

/// One entry of the connection quality distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionQualityConfig {
    pub quality: LinkQuality,
    /// Share of the population in [0, 1].
    pub percentage: f64,
    pub packet_loss: f64,
    pub jitter: Duration,
}

/// Network sampling parameters for generated workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConditionsConfig {
    pub latency_range: LatencyRange,
    /// Empty means every worker gets the default "good" profile.
    pub qualities: Vec<ConnectionQualityConfig>,
}

/// Burst mining behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Expected burst starts per worker-hour.
    pub probability: f64,
    pub duration_range: DurationRange,
    /// Share-rate multiplier while bursting.
    pub intensity_multiplier: f64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            probability: 0.0,
            duration_range: DurationRange::default(),
            intensity_multiplier: 2.0,
        }
    }
}

/// Connection drop behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDropConfig {
    /// Expected drops per worker-hour.
    pub probability: f64,
    /// How long a dropped worker stays offline.
    pub duration_range: DurationRange,
}

impl Default for ConnectionDropConfig {
    fn default() -> Self {
        Self {
            probability: 0.0,
            duration_range: DurationRange::new(Duration::from_secs(2), Duration::from_secs(20)),
        }
    }
}

/// Behavior pattern configuration shared by all workers of a fleet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorConfig {
    pub burst: BurstConfig,
    pub drops: ConnectionDropConfig,
}

/// One attack type a malicious worker may launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackTypeConfig {
    pub kind: AttackKind,
    /// Expected attack starts per worker-hour.
    pub probability: f64,
    /// 0.0 to 1.0; meaning depends on the attack kind.
    pub intensity: f64,
}

/// Malicious population parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaliciousConfig {
    /// Share of generated workers flagged malicious, in [0, 1].
    pub malicious_percentage: f64,
    /// Empty means malicious workers get a default invalid-shares profile.
    pub attack_types: Vec<AttackTypeConfig>,
}

/// Configuration for a [`WorkerFleet`](crate::worker::fleet::WorkerFleet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFleetConfig {
    pub worker_count: usize,
    pub hash_rate_range: HashRateRange,
    /// Empty means a single 100% GPU population.
    pub worker_types: Vec<WorkerTypeConfig>,
    pub network: NetworkConditionsConfig,
    pub behavior: BehaviorConfig,
    pub malicious: MaliciousConfig,
    /// Behavior tick period. Probabilities are expressed per worker-hour and
    /// scaled down by the wall-clock seconds in one tick.
    pub behavior_interval: Duration,
    pub stats_interval: Duration,
    /// Seed for the engine RNG; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for WorkerFleetConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            hash_rate_range: HashRateRange::default(),
            worker_types: Vec::new(),
            network: NetworkConditionsConfig::default(),
            behavior: BehaviorConfig::default(),
            malicious: MaliciousConfig::default(),
            behavior_interval: Duration::from_secs(1),
            stats_interval: Duration::from_secs(5),
            seed: None,
        }
    }
}

impl WorkerFleetConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.hash_rate_range.min > self.hash_rate_range.max {
            return Err(FleetError::InvalidConfig {
                field: "hash_rate_range".to_string(),
                reason: "min must not exceed max".to_string(),
            });
        }
        for (i, t) in self.worker_types.iter().enumerate() {
            if !(0.0..=1.0).contains(&t.percentage) {
                return Err(FleetError::InvalidConfig {
                    field: format!("worker_types[{}].percentage", i),
                    reason: "must be within [0, 1]".to_string(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.malicious.malicious_percentage) {
            return Err(FleetError::InvalidConfig {
                field: "malicious.malicious_percentage".to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if self.behavior_interval.is_zero() || self.stats_interval.is_zero() {
            return Err(FleetError::InvalidConfig {
                field: "behavior_interval/stats_interval".to_string(),
                reason: "tick periods must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// A small, lively fleet for local experiments.
    pub fn development() -> Self {
        Self {
            worker_count: 10,
            behavior: BehaviorConfig {
                burst: BurstConfig {
                    probability: 6.0,
                    duration_range: DurationRange::new(
                        Duration::from_secs(5),
                        Duration::from_secs(15),
                    ),
                    intensity_multiplier: 2.0,
                },
                drops: ConnectionDropConfig {
                    probability: 2.0,
                    duration_range: DurationRange::new(
                        Duration::from_secs(2),
                        Duration::from_secs(10),
                    ),
                },
            },
            malicious: MaliciousConfig {
                malicious_percentage: 0.1,
                attack_types: vec![AttackTypeConfig {
                    kind: AttackKind::InvalidShares,
                    probability: 4.0,
                    intensity: 0.3,
                }],
            },
            ..Self::default()
        }
    }
}

/// Failover behavior for one cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Names of backup clusters activated when this one fails.
    pub backup_clusters: Vec<String>,
    pub failure_rate: f64,
    pub recovery_time: Duration,
    pub auto_failover: bool,
}

/// Consensus flavor label for a coordinator group. Simulation-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusKind {
    Raft,
    Pbft,
    #[default]
    Simple,
}

/// Coordination parameters for one cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Zero disables synchronization for this cluster.
    pub sync_interval: Duration,
    pub leader_election: bool,
    pub consensus: ConsensusKind,
}

/// Configuration for a single cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub worker_count: usize,
    pub location: String,
    pub coordinator: String,
    pub hash_rate_range: HashRateRange,
    pub network_latency: Duration,
    pub farm_type: FarmType,
    /// Watts; zero disables power governance.
    pub power_limit: u32,
    pub is_backup: bool,
    pub current_pool: String,
    pub failover: FailoverConfig,
    pub coordination: CoordinationConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            worker_count: 0,
            location: String::new(),
            coordinator: String::new(),
            hash_rate_range: HashRateRange::default(),
            network_latency: Duration::from_millis(50),
            farm_type: FarmType::Gpu,
            power_limit: 0,
            is_backup: false,
            current_pool: String::new(),
            failover: FailoverConfig::default(),
            coordination: CoordinationConfig::default(),
        }
    }
}

/// One migration pacing strategy entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStrategyConfig {
    pub kind: MigrationStrategy,
    pub duration: Duration,
    /// Expressed in worker units; migration granularity stays per-cluster,
    /// so this only determines the batch count and pacing interval.
    pub batch_size: u32,
    pub rollback_on_fail: bool,
}

/// Migration parameters for a cluster fleet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub strategies: Vec<MigrationStrategyConfig>,
    pub default_strategy: MigrationStrategy,
}

/// Random failure injection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInjectionConfig {
    pub enable_cluster_failures: bool,
    pub enable_network_partitions: bool,
    pub enable_coordinator_failures: bool,
    /// Expected random cluster failures per cluster-minute.
    pub failure_rate: f64,
    /// Outage length sampled for random failures.
    pub recovery_range: DurationRange,
}

impl Default for FailureInjectionConfig {
    fn default() -> Self {
        Self {
            enable_cluster_failures: false,
            enable_network_partitions: false,
            enable_coordinator_failures: false,
            failure_rate: 0.0,
            recovery_range: DurationRange::new(
                Duration::from_secs(5 * 60),
                Duration::from_secs(30 * 60),
            ),
        }
    }
}

/// Configuration for a [`ClusterFleet`](crate::cluster::fleet::ClusterFleet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterFleetConfig {
    pub clusters: Vec<ClusterConfig>,
    /// Behavior patterns applied to every cluster-owned worker.
    pub behavior: BehaviorConfig,
    pub failures: FailureInjectionConfig,
    pub migration: MigrationConfig,
    pub behavior_interval: Duration,
    pub failure_interval: Duration,
    pub coordination_interval: Duration,
    pub stats_interval: Duration,
    /// Seed for the engine RNG; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for ClusterFleetConfig {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            behavior: BehaviorConfig::default(),
            failures: FailureInjectionConfig::default(),
            migration: MigrationConfig::default(),
            behavior_interval: Duration::from_secs(5),
            failure_interval: Duration::from_secs(60),
            coordination_interval: Duration::from_secs(10),
            stats_interval: Duration::from_secs(10),
            seed: None,
        }
    }
}

impl ClusterFleetConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        for (i, c) in self.clusters.iter().enumerate() {
            if c.name.is_empty() {
                return Err(FleetError::InvalidConfig {
                    field: format!("clusters[{}].name", i),
                    reason: "cluster name must not be empty".to_string(),
                });
            }
            if c.hash_rate_range.min > c.hash_rate_range.max {
                return Err(FleetError::InvalidConfig {
                    field: format!("clusters[{}].hash_rate_range", i),
                    reason: "min must not exceed max".to_string(),
                });
            }
        }
        if self.failures.failure_rate < 0.0 {
            return Err(FleetError::InvalidConfig {
                field: "failures.failure_rate".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        if self.behavior_interval.is_zero()
            || self.failure_interval.is_zero()
            || self.coordination_interval.is_zero()
            || self.stats_interval.is_zero()
        {
            return Err(FleetError::InvalidConfig {
                field: "tick intervals".to_string(),
                reason: "tick periods must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Two small coordinated clusters for local experiments.
    pub fn development() -> Self {
        Self {
            clusters: vec![
                ClusterConfig {
                    name: "dev-east".to_string(),
                    worker_count: 5,
                    location: "us-east".to_string(),
                    coordinator: "dev-coordinator".to_string(),
                    farm_type: FarmType::Asic,
                    current_pool: "dev-pool".to_string(),
                    coordination: CoordinationConfig {
                        sync_interval: Duration::from_secs(5),
                        leader_election: true,
                        consensus: ConsensusKind::Simple,
                    },
                    ..ClusterConfig::default()
                },
                ClusterConfig {
                    name: "dev-west".to_string(),
                    worker_count: 5,
                    location: "us-west".to_string(),
                    coordinator: "dev-coordinator".to_string(),
                    farm_type: FarmType::Gpu,
                    current_pool: "dev-pool".to_string(),
                    coordination: CoordinationConfig {
                        sync_interval: Duration::from_secs(5),
                        leader_election: true,
                        consensus: ConsensusKind::Simple,
                    },
                    ..ClusterConfig::default()
                },
            ],
            ..Self::default()
        }
    }
}
