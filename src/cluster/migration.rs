//! Pool migration planning and execution.
//!
//! A [`MigrationPlan`] moves a set of clusters from one pool to another
//! using one of three strategies. Immediate plans complete before
//! `execute_migration` returns; gradual plans pace themselves on a batch
//! interval derived from the estimated duration; scheduled plans defer to
//! their start time and then run the immediate path. Progress is tracked per
//! plan and is monotone until it reaches a terminal status, which is final.

use crate::cluster::fleet::{ClusterFleet, ClusterState};
use crate::error::{FleetError, Result};
use crate::events::EventKind;
use crate::shutdown::StopSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Pacing floor for gradual batches.
const MIN_BATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Default batch size in worker units when no gradual strategy is configured.
const DEFAULT_BATCH_SIZE: u32 = 10;

/// How a migration plan is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStrategy {
    /// Move every target cluster in one step.
    Immediate,
    /// Move one cluster per batch interval.
    #[default]
    Gradual,
    /// Wait for the plan's start time, then move everything at once.
    Scheduled,
}

/// Lifecycle status of a plan and its progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl MigrationStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::Cancelled | MigrationStatus::Failed
        )
    }
}

/// A request to move clusters between pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Assigned by the engine when left empty.
    pub id: String,
    pub source_pool: String,
    pub target_pool: String,
    pub cluster_ids: Vec<String>,
    pub strategy: MigrationStrategy,
    /// Only meaningful for the scheduled strategy.
    pub start_time: DateTime<Utc>,
    pub estimated_duration: Duration,
    pub status: MigrationStatus,
    pub created_at: DateTime<Utc>,
}

impl MigrationPlan {
    pub fn new(
        source_pool: impl Into<String>,
        target_pool: impl Into<String>,
        cluster_ids: Vec<String>,
        strategy: MigrationStrategy,
        estimated_duration: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            source_pool: source_pool.into(),
            target_pool: target_pool.into(),
            cluster_ids,
            strategy,
            start_time: now,
            estimated_duration,
            status: MigrationStatus::Planned,
            created_at: now,
        }
    }

    /// Set the start time for a scheduled plan.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.start_time = at;
        self
    }
}

/// Tracked execution state of one plan.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationProgress {
    pub plan_id: String,
    pub total_workers: u32,
    pub migrated_workers: u32,
    pub failed_workers: u32,
    pub progress_percent: f64,
    pub estimated_time_remaining: Duration,
    pub status: MigrationStatus,
    pub errors: Vec<String>,
}

impl ClusterFleet {
    /// Validate and launch a migration plan. Returns the plan id.
    ///
    /// Immediate plans are complete when this returns; gradual and scheduled
    /// plans run on background tasks tied to the engine lifecycle.
    pub async fn execute_migration(&self, mut plan: MigrationPlan) -> Result<String> {
        let mut st = self.state.lock().await;
        for id in &plan.cluster_ids {
            if !st.clusters.contains_key(id) {
                return Err(FleetError::Validation(format!(
                    "migration plan references unknown cluster: {}",
                    id
                )));
            }
        }

        if plan.id.is_empty() {
            plan.id = format!("migration-{}", Uuid::new_v4());
        }
        plan.created_at = Utc::now();
        plan.status = MigrationStatus::InProgress;

        let total_workers: u32 = plan
            .cluster_ids
            .iter()
            .filter_map(|id| st.clusters.get(id))
            .map(|c| c.workers.len() as u32)
            .sum();

        let plan_id = plan.id.clone();
        let strategy = plan.strategy;
        let estimated_duration = plan.estimated_duration;
        let start_time = plan.start_time;

        st.progress.insert(
            plan_id.clone(),
            MigrationProgress {
                plan_id: plan_id.clone(),
                total_workers,
                migrated_workers: 0,
                failed_workers: 0,
                progress_percent: 0.0,
                estimated_time_remaining: estimated_duration,
                status: MigrationStatus::InProgress,
                errors: Vec::new(),
            },
        );
        st.plans.insert(plan_id.clone(), plan);

        self.events.publish(
            EventKind::MigrationStarted,
            &plan_id,
            format!("{:?} migration of {} workers", strategy, total_workers),
        );

        let stop = st.stop.clone();
        match strategy {
            MigrationStrategy::Immediate => {
                complete_immediately(&mut st, &plan_id, self);
            }
            MigrationStrategy::Gradual => {
                let interval = batch_interval(total_workers, estimated_duration, self);
                drop(st);
                self.spawn_gradual(plan_id.clone(), interval, stop);
            }
            MigrationStrategy::Scheduled => {
                drop(st);
                self.spawn_scheduled(plan_id.clone(), start_time, stop);
            }
        }
        Ok(plan_id)
    }

    /// Progress of the most recent plan between the given pools, `None` when
    /// no plan matches.
    pub async fn migration_progress(
        &self,
        source_pool: &str,
        target_pool: &str,
    ) -> Option<MigrationProgress> {
        let st = self.state.lock().await;
        st.plans
            .values()
            .filter(|p| p.source_pool == source_pool && p.target_pool == target_pool)
            .max_by_key(|p| p.created_at)
            .and_then(|p| st.progress.get(&p.id))
            .cloned()
    }

    /// Cancel an in-flight migration. The gradual pacer observes the
    /// cancellation on its next interval and stops without further mutation.
    /// Plans that already reached a terminal status are rejected.
    pub async fn cancel_migration(&self, plan_id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        let plan = st
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| FleetError::MigrationNotFound(plan_id.to_string()))?;

        if plan.status.is_terminal() {
            return Err(FleetError::InvalidOperation(format!(
                "migration {} already reached terminal status {:?}",
                plan_id, plan.status
            )));
        }

        plan.status = MigrationStatus::Cancelled;
        if let Some(progress) = st.progress.get_mut(plan_id) {
            progress.status = MigrationStatus::Cancelled;
        }
        self.events
            .publish(EventKind::MigrationCancelled, plan_id, "migration cancelled");
        Ok(())
    }

    fn spawn_gradual(&self, plan_id: String, interval: Duration, stop: StopSignal) {
        let fleet = self.clone();
        self.tasks.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if fleet.gradual_step(&plan_id, interval, &stop).await {
                            return;
                        }
                    }
                    _ = stop.cancelled() => return,
                }
            }
        }));
    }

    /// One gradual batch: migrate the first plan cluster still on the source
    /// pool. Returns `true` when the pacer should stop.
    async fn gradual_step(&self, plan_id: &str, interval: Duration, stop: &StopSignal) -> bool {
        let mut st = self.state.lock().await;
        if stop.is_stopped() {
            return true;
        }

        let ClusterState {
            clusters,
            plans,
            progress,
            ..
        } = &mut *st;
        let Some(plan) = plans.get_mut(plan_id) else {
            return true;
        };
        let Some(prog) = progress.get_mut(plan_id) else {
            return true;
        };
        if plan.status.is_terminal() || prog.status.is_terminal() {
            return true;
        }

        let mut moved = 0u32;
        for id in &plan.cluster_ids {
            if let Some(cluster) = clusters.get_mut(id) {
                if cluster.current_pool == plan.source_pool {
                    cluster.current_pool = plan.target_pool.clone();
                    cluster.stats.migration_events += 1;
                    moved = cluster.workers.len() as u32;
                    debug!(cluster = %id, plan = %plan_id, "Migrated cluster batch");
                    break;
                }
            }
        }

        if moved == 0 && prog.migrated_workers < prog.total_workers {
            plan.status = MigrationStatus::Failed;
            prog.status = MigrationStatus::Failed;
            prog.errors
                .push("no clusters remaining on source pool".to_string());
            self.events.publish(
                EventKind::MigrationFailed,
                plan_id,
                "no clusters remaining on source pool",
            );
            return true;
        }

        prog.migrated_workers += moved;
        prog.progress_percent = if prog.total_workers > 0 {
            prog.migrated_workers as f64 / prog.total_workers as f64 * 100.0
        } else {
            100.0
        };
        let remaining = plan
            .cluster_ids
            .iter()
            .filter(|id| {
                clusters
                    .get(*id)
                    .is_some_and(|c| c.current_pool == plan.source_pool)
            })
            .count() as u32;
        prog.estimated_time_remaining = interval * remaining;

        if prog.migrated_workers >= prog.total_workers {
            plan.status = MigrationStatus::Completed;
            prog.status = MigrationStatus::Completed;
            prog.progress_percent = 100.0;
            prog.estimated_time_remaining = Duration::ZERO;
            self.events.publish(
                EventKind::MigrationCompleted,
                plan_id,
                format!("{} workers migrated", prog.migrated_workers),
            );
            return true;
        }
        false
    }

    fn spawn_scheduled(&self, plan_id: String, start_time: DateTime<Utc>, stop: StopSignal) {
        let fleet = self.clone();
        self.tasks.track(tokio::spawn(async move {
            let delay = start_time
                .signed_duration_since(Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.cancelled() => return,
            }

            let mut st = fleet.state.lock().await;
            if stop.is_stopped() {
                return;
            }
            if st
                .plans
                .get(&plan_id)
                .map_or(true, |p| p.status.is_terminal())
            {
                return;
            }
            complete_immediately(&mut st, &plan_id, &fleet);
        }));
    }
}

/// Move every plan cluster to the target pool in one step and mark the plan
/// completed. Caller holds the engine lock.
fn complete_immediately(st: &mut ClusterState, plan_id: &str, fleet: &ClusterFleet) {
    let ClusterState {
        clusters,
        plans,
        progress,
        ..
    } = st;
    let Some(plan) = plans.get_mut(plan_id) else {
        return;
    };
    let Some(prog) = progress.get_mut(plan_id) else {
        return;
    };

    let mut migrated = 0u32;
    for id in &plan.cluster_ids {
        if let Some(cluster) = clusters.get_mut(id) {
            cluster.current_pool = plan.target_pool.clone();
            cluster.stats.migration_events += 1;
            migrated += cluster.workers.len() as u32;
        }
    }

    plan.status = MigrationStatus::Completed;
    prog.migrated_workers = migrated;
    prog.progress_percent = 100.0;
    prog.estimated_time_remaining = Duration::ZERO;
    prog.status = MigrationStatus::Completed;
    fleet.events.publish(
        EventKind::MigrationCompleted,
        plan_id,
        format!("{} workers migrated", migrated),
    );
}

/// Pacing interval for a gradual plan: estimated duration split across the
/// batch count, floored to keep the pacer from spinning.
fn batch_interval(total_workers: u32, estimated_duration: Duration, fleet: &ClusterFleet) -> Duration {
    let batch_size = fleet
        .config
        .migration
        .strategies
        .iter()
        .find(|s| s.kind == MigrationStrategy::Gradual && s.batch_size > 0)
        .map(|s| s.batch_size)
        .unwrap_or(DEFAULT_BATCH_SIZE);

    let batches = (total_workers / batch_size).max(1);
    let interval = estimated_duration / batches;
    interval.max(MIN_BATCH_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!MigrationStatus::Planned.is_terminal());
        assert!(!MigrationStatus::InProgress.is_terminal());
        assert!(MigrationStatus::Completed.is_terminal());
        assert!(MigrationStatus::Cancelled.is_terminal());
        assert!(MigrationStatus::Failed.is_terminal());
    }

    #[test]
    fn test_plan_builder_defaults() {
        let plan = MigrationPlan::new(
            "pool_1",
            "pool_2",
            vec!["c-1".to_string()],
            MigrationStrategy::Immediate,
            Duration::from_secs(60),
        );
        assert!(plan.id.is_empty());
        assert_eq!(plan.status, MigrationStatus::Planned);
        assert_eq!(plan.source_pool, "pool_1");
        assert_eq!(plan.target_pool, "pool_2");
    }

    #[test]
    fn test_strategy_serde_names() {
        let json = serde_json::to_string(&MigrationStrategy::Immediate).expect("serialize");
        assert_eq!(json, "\"immediate\"");
        let parsed: MigrationStrategy = serde_json::from_str("\"gradual\"").expect("parse");
        assert_eq!(parsed, MigrationStrategy::Gradual);
    }
}
