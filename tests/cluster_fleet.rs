//! Cluster fleet integration tests.
//!
//! Failure injection, failover and recovery, leader election, network
//! partitions, power governance, and statistics aggregation.

#[allow(dead_code)]
mod common;

use common::{
    cluster_config, election_group, failover_pair, init_tracing, power_capped_cluster,
    two_pool_clusters,
};
use hashfleet::{ClusterFleet, EventKind, FleetError};
use std::time::Duration;

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_start_activates_clusters_and_workers() {
    init_tracing();
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");

    fleet.start().await.expect("start");
    for cluster in fleet.clusters().await {
        assert!(cluster.is_active);
        assert!(cluster.last_sync_time.is_some());
        assert!(cluster.workers.iter().all(|w| w.is_active));
    }

    let err = fleet.start().await.expect_err("double start");
    assert!(matches!(err, FleetError::AlreadyRunning));

    fleet.stop().await.expect("stop");
    assert_eq!(fleet.uptime().await, Duration::ZERO);
    for cluster in fleet.clusters().await {
        assert!(!cluster.is_active);
        assert!(cluster.workers.iter().all(|w| !w.is_active));
    }
}

#[tokio::test]
async fn test_add_and_remove_cluster() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    fleet.start().await.expect("start");

    let added = fleet
        .add_cluster(cluster_config("gamma", 3, "ap-south", "pool_1"))
        .await
        .expect("add");
    assert!(added.is_active, "clusters added while running start active");
    assert_eq!(fleet.clusters().await.len(), 3);

    fleet.remove_cluster(&added.id).await.expect("remove");
    assert_eq!(fleet.clusters().await.len(), 2);
    let err = fleet.remove_cluster(&added.id).await.expect_err("missing");
    assert!(matches!(err, FleetError::ClusterNotFound(_)));
    fleet.stop().await.expect("stop");
}

// =============================================================================
// Failure injection and recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cluster_failure_marks_cluster_and_workers() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    fleet.start().await.expect("start");
    let id = fleet.clusters().await[0].id.clone();

    let before = fleet.cluster_stats(&id).await.expect("stats").failover_events;
    fleet
        .trigger_cluster_failure(&id, Duration::from_secs(60))
        .await
        .expect("failure");

    let cluster = fleet.cluster(&id).await.expect("cluster");
    assert!(cluster.is_in_failure);
    assert!(!cluster.is_active);
    assert!(cluster
        .workers
        .iter()
        .all(|w| !w.is_active && w.state.is_disconnected));

    let stats = fleet.cluster_stats(&id).await.expect("stats");
    assert_eq!(stats.failover_events, before + 1);
    assert!(stats.last_failure_time.is_some());
    fleet.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn test_cluster_self_recovers_without_auto_failover() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    fleet.start().await.expect("start");
    let id = fleet.clusters().await[0].id.clone();

    fleet
        .trigger_cluster_failure(&id, Duration::from_millis(100))
        .await
        .expect("failure");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let cluster = fleet.cluster(&id).await.expect("cluster");
    assert!(!cluster.is_in_failure, "cluster must self-recover");
    assert!(cluster.is_active);
    assert!(cluster
        .workers
        .iter()
        .all(|w| w.is_active && !w.state.is_disconnected));
    fleet.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn test_auto_failover_activates_backup_then_recovers_primary() {
    let fleet = ClusterFleet::new(failover_pair()).expect("fleet");
    fleet.start().await.expect("start");

    let clusters = fleet.clusters().await;
    let primary = clusters
        .iter()
        .find(|c| c.name == "primary")
        .expect("primary")
        .id
        .clone();
    let backup = clusters
        .iter()
        .find(|c| c.name == "backup")
        .expect("backup")
        .id
        .clone();

    fleet
        .trigger_cluster_failure(&primary, Duration::from_secs(5))
        .await
        .expect("failure");

    // Past the failover delay: backup active, primary still down.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(fleet.cluster(&backup).await.expect("backup").is_active);
    assert!(!fleet.cluster(&primary).await.expect("primary").is_active);

    // Past the outage: primary restored, backup stood down.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let primary_cluster = fleet.cluster(&primary).await.expect("primary");
    assert!(primary_cluster.is_active);
    assert!(!primary_cluster.is_in_failure);
    assert!(primary_cluster.stats.last_recovery_time.is_some());
    assert!(!fleet.cluster(&backup).await.expect("backup").is_active);
    fleet.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_recovery_timer() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    fleet.start().await.expect("start");
    let id = fleet.clusters().await[0].id.clone();

    fleet
        .trigger_cluster_failure(&id, Duration::from_millis(200))
        .await
        .expect("failure");
    fleet.stop().await.expect("stop");

    tokio::time::sleep(Duration::from_secs(2)).await;

    // Recovery must not have fired against the stopped engine.
    let cluster = fleet.cluster(&id).await.expect("cluster");
    assert!(cluster.is_in_failure);
    assert!(!cluster.is_active);
}

#[tokio::test(start_paused = true)]
async fn test_random_failure_injection_fails_clusters() {
    let mut config = two_pool_clusters();
    config.failures.enable_cluster_failures = true;
    // A rate of 60 per cluster-minute makes every roll a hit.
    config.failures.failure_rate = 60.0;
    let fleet = ClusterFleet::new(config).expect("fleet");
    fleet.start().await.expect("start");

    tokio::time::sleep(Duration::from_secs(61)).await;

    let clusters = fleet.clusters().await;
    assert!(
        clusters.iter().all(|c| c.is_in_failure && !c.is_active),
        "every cluster must be failed by the injection tick"
    );
    fleet.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn test_network_partition_degrades_and_heals() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    fleet.start().await.expect("start");
    let id = fleet.clusters().await[0].id.clone();
    let baseline: Vec<_> = fleet
        .cluster(&id)
        .await
        .expect("cluster")
        .workers
        .iter()
        .map(|w| w.network.latency)
        .collect();

    fleet
        .trigger_network_partition(&[id.clone()], Duration::from_millis(100))
        .await
        .expect("partition");

    let degraded = fleet.cluster(&id).await.expect("cluster");
    for (worker, base) in degraded.workers.iter().zip(&baseline) {
        assert_eq!(worker.network.latency, *base * 10);
        assert_eq!(worker.network.packet_loss, 0.5);
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let healed = fleet.cluster(&id).await.expect("cluster");
    for (worker, base) in healed.workers.iter().zip(&baseline) {
        assert_eq!(worker.network.latency, *base);
        assert_eq!(worker.network.packet_loss, 0.01);
    }
    fleet.stop().await.expect("stop");
}

#[tokio::test]
async fn test_network_partition_rejects_unknown_cluster() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    let err = fleet
        .trigger_network_partition(&["nope".to_string()], Duration::from_secs(1))
        .await
        .expect_err("unknown cluster");
    assert!(matches!(err, FleetError::ClusterNotFound(_)));
}

// =============================================================================
// Coordination
// =============================================================================

#[tokio::test]
async fn test_start_elects_exactly_one_leader_per_group() {
    let fleet = ClusterFleet::new(election_group(4)).expect("fleet");
    fleet.start().await.expect("start");

    let leaders = fleet
        .clusters()
        .await
        .iter()
        .filter(|c| c.is_leader)
        .count();
    assert_eq!(leaders, 1);
    fleet.stop().await.expect("stop");
}

#[tokio::test]
async fn test_elect_leader_returns_the_single_leader() {
    let fleet = ClusterFleet::new(election_group(3)).expect("fleet");
    let ids: Vec<String> = fleet.clusters().await.iter().map(|c| c.id.clone()).collect();

    let winner = fleet.elect_leader(&ids).await.expect("election");
    let clusters = fleet.clusters().await;
    let leaders: Vec<_> = clusters.iter().filter(|c| c.is_leader).collect();
    assert_eq!(leaders.len(), 1);
    assert_eq!(leaders[0].id, winner);

    let err = fleet.elect_leader(&[]).await.expect_err("empty candidates");
    assert!(matches!(err, FleetError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_failure_clears_leaders_then_reelects() {
    let fleet = ClusterFleet::new(election_group(3)).expect("fleet");
    fleet.start().await.expect("start");
    assert_eq!(
        fleet.clusters().await.iter().filter(|c| c.is_leader).count(),
        1
    );

    fleet
        .trigger_coordinator_failure("shared-coordinator", Duration::from_millis(100))
        .await
        .expect("coordinator failure");
    assert_eq!(
        fleet.clusters().await.iter().filter(|c| c.is_leader).count(),
        0,
        "leadership is cleared while the coordinator is down"
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        fleet.clusters().await.iter().filter(|c| c.is_leader).count(),
        1,
        "a new leader is elected after the coordinator recovers"
    );

    let err = fleet
        .trigger_coordinator_failure("nobody", Duration::from_secs(1))
        .await
        .expect_err("unknown coordinator");
    assert!(matches!(err, FleetError::CoordinatorNotFound(_)));
    fleet.stop().await.expect("stop");
}

#[tokio::test]
async fn test_synchronize_clusters_stamps_sync_state() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    let ids: Vec<String> = fleet.clusters().await.iter().map(|c| c.id.clone()).collect();

    fleet.synchronize_clusters(&ids).await.expect("sync");
    for cluster in fleet.clusters().await {
        assert!(cluster.last_sync_time.is_some());
        assert_eq!(cluster.stats.sync_events, 1);
    }
}

// =============================================================================
// Power governance
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_power_budget_sheds_workers_deterministically() {
    let fleet = ClusterFleet::new(power_capped_cluster()).expect("fleet");
    fleet.start().await.expect("start");
    let id = fleet.clusters().await[0].id.clone();

    // Both workers draw 600W against a 1000W budget; one behavior tick must
    // shed the first worker by id order.
    tokio::time::sleep(Duration::from_secs(6)).await;

    let cluster = fleet.cluster(&id).await.expect("cluster");
    assert!(cluster.current_power_usage <= 1000);
    let active: Vec<_> = cluster.workers.iter().filter(|w| w.is_active).collect();
    assert_eq!(active.len(), 1);

    let mut ids: Vec<_> = cluster.workers.iter().map(|w| w.id.clone()).collect();
    ids.sort();
    assert_eq!(active[0].id, ids[1], "the lowest-id worker is shed first");
    fleet.stop().await.expect("stop");
}

// =============================================================================
// Statistics
// =============================================================================

#[tokio::test]
async fn test_overall_stats_aggregate_clusters() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    fleet.start().await.expect("start");

    let stats = fleet.overall_stats().await;
    assert_eq!(stats.total_clusters, 2);
    assert_eq!(stats.active_clusters, 2);
    assert_eq!(stats.total_workers, 18);
    assert_eq!(stats.active_workers, 18);
    assert!(stats.total_hash_rate > 0);
    assert_eq!(stats.uptime_percentage, 100.0);

    let distribution = fleet.geographic_distribution().await;
    let total: u32 = distribution.values().sum();
    assert_eq!(total, stats.total_clusters);
    assert_eq!(distribution.get("us-east"), Some(&1));
    assert_eq!(distribution.get("eu-west"), Some(&1));
    fleet.stop().await.expect("stop");
}

#[tokio::test]
async fn test_cluster_stats_for_unknown_cluster_is_none() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    assert!(fleet.cluster_stats("nope").await.is_none());
    assert!(fleet.cluster("nope").await.is_none());
}

#[tokio::test]
async fn test_returned_clusters_do_not_alias_engine_state() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    let id = fleet.clusters().await[0].id.clone();

    let mut snapshot = fleet.cluster(&id).await.expect("cluster");
    snapshot.current_pool = "hijacked".to_string();
    snapshot.workers[0].hash_rate = 0;
    snapshot.stats.failover_events = 777;

    let fresh = fleet.cluster(&id).await.expect("cluster");
    assert_eq!(fresh.current_pool, "pool_1");
    assert_ne!(fresh.workers[0].hash_rate, 0);
    assert_eq!(fresh.stats.failover_events, 0);
}

// =============================================================================
// Configuration updates
// =============================================================================

#[tokio::test]
async fn test_update_worker_distribution_grows_and_shrinks() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    let id = fleet.clusters().await[0].id.clone();
    let initial = fleet.cluster(&id).await.expect("cluster").workers.len();

    fleet
        .update_worker_distribution(&id, initial + 5)
        .await
        .expect("grow");
    assert_eq!(
        fleet.cluster(&id).await.expect("cluster").workers.len(),
        initial + 5
    );

    fleet.update_worker_distribution(&id, 3).await.expect("shrink");
    assert_eq!(fleet.cluster(&id).await.expect("cluster").workers.len(), 3);
}

#[tokio::test]
async fn test_update_cluster_config_rewrites_descriptors() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    let id = fleet.clusters().await[0].id.clone();

    let mut config = cluster_config("renamed", 0, "sa-east", "ignored");
    config.coordinator = "coordinator-9".to_string();
    config.power_limit = 4242;
    fleet
        .update_cluster_config(&id, config)
        .await
        .expect("update");

    let cluster = fleet.cluster(&id).await.expect("cluster");
    assert_eq!(cluster.name, "renamed");
    assert_eq!(cluster.location, "sa-east");
    assert_eq!(cluster.coordinator, "coordinator-9");
    assert_eq!(cluster.power_limit, 4242);
    assert_eq!(cluster.current_pool, "pool_1", "pool assignment is kept");
}

// =============================================================================
// Diagnostics
// =============================================================================

#[tokio::test]
async fn test_failure_publishes_event() {
    let fleet = ClusterFleet::new(two_pool_clusters()).expect("fleet");
    fleet.start().await.expect("start");
    let id = fleet.clusters().await[0].id.clone();
    let mut rx = fleet.events().subscribe();

    fleet
        .trigger_cluster_failure(&id, Duration::from_secs(60))
        .await
        .expect("failure");

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timely event")
        .expect("event");
    assert_eq!(event.kind, EventKind::ClusterFailed);
    assert_eq!(event.subject, id);
    fleet.stop().await.expect("stop");
}
