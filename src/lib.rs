//! hakeeper - Active/Standby Coordination for Replicated Services
//!
//! Keeps a fleet of identical processes agreeing on exactly one active
//! node, records every member's liveness in a shared store, and persists
//! consensus state so the agreement survives a crash.
//!
//! # Architecture
//!
//! Leadership comes from one of two strategies, fixed at start-up: a
//! lease held in a shared SQL store, or an external consensus engine.
//! A scheduler drives health registration, leadership rounds, garbage
//! collection of stale rows and cluster alerting on independent timers.
//!
//! # Features
//!
//! - Lease election through conditional writes (no extra locking)
//! - Health registration with staleness rejection and a liveness counter
//! - Step-down when health registration keeps failing
//! - Leader DNS reconciliation and auxiliary script scheduling
//! - Crash-safe snapshot store with CRC-64 verification and retention

pub mod config;
pub mod election;
pub mod error;
pub mod health;
pub mod keeper;
pub mod scheduler;
pub mod snapshot;
pub mod system;

pub use config::KeeperConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{KeeperConfig, StrategyKind};
    pub use crate::election::{ConsensusEngine, ElectionCoordinator, ElectionStrategy, NodeVitals};
    pub use crate::error::{Error, Result};
    pub use crate::health::{HealthRegistrar, HealthStatus, NodeHealth, NodeIdentity};
    pub use crate::keeper::Keeper;
    pub use crate::scheduler::Scheduler;
    pub use crate::snapshot::{FileSnapshotStore, SnapshotDescriptor};
}
