//! Diagnostic event stream for the fleet engines.
//!
//! Engines publish a [`FleetEvent`] for every notable transition (bursts,
//! drops, failures, elections, migrations) and for errors raised by internal
//! periodic tasks, which would otherwise be invisible to callers. Consumers
//! subscribe through [`EventBus::subscribe`]; publishing never blocks and
//! events are dropped when nobody listens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the broadcast channel behind an [`EventBus`].
const DEFAULT_CAPACITY: usize = 256;

/// Event type categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Worker events
    BurstStarted,
    BurstEnded,
    WorkerDropped,
    WorkerReconnected,
    AttackStarted,
    AttackEnded,

    // Cluster events
    ClusterFailed,
    FailoverActivated,
    ClusterRecovered,
    PartitionStarted,
    PartitionHealed,
    CoordinatorFailed,
    LeaderElected,
    ClustersSynchronized,
    PowerCapEnforced,

    // Migration events
    MigrationStarted,
    MigrationCompleted,
    MigrationFailed,
    MigrationCancelled,

    // System events
    InternalError,
}

/// Coarse grouping of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Worker,
    Cluster,
    Migration,
    System,
}

impl EventKind {
    /// Get the category for this event kind.
    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::BurstStarted
            | EventKind::BurstEnded
            | EventKind::WorkerDropped
            | EventKind::WorkerReconnected
            | EventKind::AttackStarted
            | EventKind::AttackEnded => EventCategory::Worker,

            EventKind::ClusterFailed
            | EventKind::FailoverActivated
            | EventKind::ClusterRecovered
            | EventKind::PartitionStarted
            | EventKind::PartitionHealed
            | EventKind::CoordinatorFailed
            | EventKind::LeaderElected
            | EventKind::ClustersSynchronized
            | EventKind::PowerCapEnforced => EventCategory::Cluster,

            EventKind::MigrationStarted
            | EventKind::MigrationCompleted
            | EventKind::MigrationFailed
            | EventKind::MigrationCancelled => EventCategory::Migration,

            EventKind::InternalError => EventCategory::System,
        }
    }
}

/// A single diagnostic event.
#[derive(Debug, Clone, Serialize)]
pub struct FleetEvent {
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    /// Id of the entity the event is about (worker, cluster, plan, ...).
    pub subject: String,
    pub detail: String,
}

/// Broadcast-based event bus, cheap to clone and share with background tasks.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all subsequently published events.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Lossy when no subscriber is attached.
    pub fn publish(&self, kind: EventKind, subject: impl Into<String>, detail: impl Into<String>) {
        let event = FleetEvent {
            kind,
            at: Utc::now(),
            subject: subject.into(),
            detail: detail.into(),
        };
        debug!(kind = ?event.kind, subject = %event.subject, "{}", event.detail);
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
