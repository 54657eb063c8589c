//! Error types for the hashfleet simulation engines.
//!
//! This module provides a unified error type [`FleetError`] for all fleet
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Lookup**: unknown worker, cluster, coordinator, or migration plan ids
//! - **Lifecycle**: starting an engine twice, stopping one that never ran
//! - **Misuse**: operations that are invalid for the target entity's state
//! - **Configuration**: invalid settings or unparsable configuration input
//!
//! # Example
//!
//! ```rust
//! use hashfleet::error::{FleetError, Result};
//!
//! fn lookup(id: &str) -> Result<()> {
//!     if id.is_empty() {
//!         return Err(FleetError::WorkerNotFound(id.into()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Main error type for fleet operations.
#[derive(Error, Debug)]
pub enum FleetError {
    // Lookup errors
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("No clusters registered under coordinator: {0}")]
    CoordinatorNotFound(String),

    #[error("Migration plan not found: {0}")]
    MigrationNotFound(String),

    // Lifecycle errors
    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine is not running")]
    NotRunning,

    // Misuse errors
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
}

impl FleetError {
    /// Check whether the error is a lookup miss for an unknown entity.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FleetError::WorkerNotFound(_)
                | FleetError::ClusterNotFound(_)
                | FleetError::CoordinatorNotFound(_)
                | FleetError::MigrationNotFound(_)
        )
    }

    /// Check whether the error indicates lifecycle misuse.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, FleetError::AlreadyRunning | FleetError::NotRunning)
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        FleetError::Config(e.to_string())
    }
}

/// Result type alias for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
