//! Hashfleet - a simulated mining fleet and cluster test-bed.
//!
//! Hashfleet emulates fleets of cryptocurrency mining workers organized into
//! coordinated clusters (data centers and mining farms). It is built to
//! validate a production mining pool's behavior under realistic and
//! adversarial conditions without real hardware or a real blockchain
//! network: hashing is simulated probabilistically and every network effect
//! is injected, never performed.
//!
//! # Features
//!
//! - **Worker fleets**: populations of simulated ASIC/GPU/CPU workers with
//!   burst mining, connection drops, malicious attack profiles, and
//!   probabilistic share submission.
//! - **Cluster fleets**: named worker groups with coordinators, leader
//!   election, failover to backup clusters, power-budget governance, and
//!   network-partition injection.
//! - **Pool migration**: immediate, gradual, and scheduled strategies with
//!   tracked, cancellable progress.
//! - **Deterministic replay**: seedable RNG and deterministic entity ids.
//! - **Diagnostics**: every notable transition and every internal-task error
//!   is published on a broadcast event bus.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Hashfleet                           │
//! ├────────────────────────────────────────────────────────────┤
//! │  ClusterFleet: failover | elections | partitions | power   │
//! ├────────────────────────────────────────────────────────────┤
//! │  Migration: immediate | gradual | scheduled                │
//! ├────────────────────────────────────────────────────────────┤
//! │  WorkerFleet: behavior ticks | bursts | drops | attacks    │
//! ├────────────────────────────────────────────────────────────┤
//! │  Shared: events bus | stop signal | task tracking          │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use hashfleet::config::ClusterFleetConfig;
//! use hashfleet::ClusterFleet;
//!
//! #[tokio::main]
//! async fn main() -> hashfleet::Result<()> {
//!     let fleet = ClusterFleet::new(ClusterFleetConfig::development())?;
//!     fleet.start().await?;
//!     // ... drive scenarios against the fleet
//!     fleet.stop().await
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod shutdown;
pub mod worker;

pub use cluster::fleet::ClusterFleet;
pub use cluster::migration::{MigrationPlan, MigrationProgress, MigrationStatus, MigrationStrategy};
pub use error::{FleetError, Result};
pub use events::{EventBus, EventKind, FleetEvent};
pub use worker::fleet::WorkerFleet;
