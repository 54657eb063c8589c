//! Common fixtures for integration tests.

use hashfleet::config::{
    ClusterConfig, ClusterFleetConfig, CoordinationConfig, FailoverConfig, HashRateRange,
    WorkerFleetConfig,
};
use hashfleet::worker::FarmType;
use std::time::Duration;

/// Initialize test logging once; respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A seeded worker fleet config with a fast behavior tick.
pub fn worker_fleet_config(count: usize) -> WorkerFleetConfig {
    WorkerFleetConfig {
        worker_count: count,
        seed: Some(1234),
        ..WorkerFleetConfig::default()
    }
}

/// A cluster entry with the given identity on `pool`.
pub fn cluster_config(name: &str, workers: usize, location: &str, pool: &str) -> ClusterConfig {
    ClusterConfig {
        name: name.to_string(),
        worker_count: workers,
        location: location.to_string(),
        coordinator: "coordinator-1".to_string(),
        farm_type: FarmType::Asic,
        current_pool: pool.to_string(),
        ..ClusterConfig::default()
    }
}

/// Two clusters on `pool_1` (10 and 8 workers), seeded.
pub fn two_pool_clusters() -> ClusterFleetConfig {
    ClusterFleetConfig {
        clusters: vec![
            cluster_config("alpha", 10, "us-east", "pool_1"),
            cluster_config("beta", 8, "eu-west", "pool_1"),
        ],
        seed: Some(1234),
        ..ClusterFleetConfig::default()
    }
}

/// A primary with auto-failover onto a backup cluster.
pub fn failover_pair() -> ClusterFleetConfig {
    ClusterFleetConfig {
        clusters: vec![
            ClusterConfig {
                name: "primary".to_string(),
                worker_count: 6,
                location: "primary-dc".to_string(),
                coordinator: "coordinator-1".to_string(),
                current_pool: "pool_1".to_string(),
                failover: FailoverConfig {
                    backup_clusters: vec!["backup".to_string()],
                    auto_failover: true,
                    recovery_time: Duration::from_secs(5),
                    failure_rate: 0.0,
                },
                ..ClusterConfig::default()
            },
            ClusterConfig {
                name: "backup".to_string(),
                worker_count: 4,
                location: "backup-dc".to_string(),
                coordinator: "coordinator-2".to_string(),
                is_backup: true,
                current_pool: "pool_1".to_string(),
                ..ClusterConfig::default()
            },
        ],
        seed: Some(99),
        ..ClusterFleetConfig::default()
    }
}

/// A coordinator group with leader election enabled on every member.
pub fn election_group(members: usize) -> ClusterFleetConfig {
    let clusters = (0..members)
        .map(|i| ClusterConfig {
            name: format!("member-{}", i),
            worker_count: 2,
            location: "dc-1".to_string(),
            coordinator: "shared-coordinator".to_string(),
            current_pool: "pool_1".to_string(),
            coordination: CoordinationConfig {
                sync_interval: Duration::from_secs(5),
                leader_election: true,
                ..CoordinationConfig::default()
            },
            ..ClusterConfig::default()
        })
        .collect();

    ClusterFleetConfig {
        clusters,
        seed: Some(7),
        ..ClusterFleetConfig::default()
    }
}

/// A cluster drawing 600W per worker (6 MH/s ASIC) against a 1000W budget.
pub fn power_capped_cluster() -> ClusterFleetConfig {
    ClusterFleetConfig {
        clusters: vec![ClusterConfig {
            name: "capped".to_string(),
            worker_count: 2,
            location: "dc-1".to_string(),
            coordinator: "coordinator-1".to_string(),
            farm_type: FarmType::Asic,
            power_limit: 1000,
            current_pool: "pool_1".to_string(),
            hash_rate_range: HashRateRange {
                min: 6_000_000,
                max: 6_000_000,
            },
            ..ClusterConfig::default()
        }],
        seed: Some(5),
        ..ClusterFleetConfig::default()
    }
}
