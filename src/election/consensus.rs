//! Consensus Engine Interface
//!
//! The replicated-log engine is an external collaborator. This crate
//! only queries its leadership state, asks it to step down, and hands
//! it the state machine and snapshot store it persists through.

use std::sync::Arc;

use async_trait::async_trait;

use super::applier::StateApplier;
use crate::error::Result;
use crate::snapshot::FileSnapshotStore;

/// Replicated consensus engine
#[async_trait]
pub trait ConsensusEngine: Send + Sync {
    /// Whether the engine has been set up and is running
    fn is_enabled(&self) -> bool;

    /// Whether this node is the consensus leader
    fn is_leader(&self) -> bool;

    /// Identifier of the current leader (empty if unknown)
    fn current_leader_id(&self) -> String;

    /// URI of the current leader's API
    fn leader_uri(&self) -> String;

    /// Whether this node is a voting member of a working quorum
    fn is_part_of_quorum(&self) -> bool;

    /// Members the engine currently sees as healthy
    fn healthy_members(&self) -> Vec<String>;

    /// Configured peer addresses (`host:port`)
    async fn peer_addresses(&self) -> Result<Vec<String>>;

    /// Step down if currently leader
    fn yield_leadership(&self) -> Result<()>;

    /// Start the engine with its state machine and durability backend
    async fn setup(
        &self,
        applier: Arc<dyn StateApplier>,
        snapshots: Arc<FileSnapshotStore>,
        self_identity: &str,
    ) -> Result<()>;

    /// Long-running background supervision; runs until the process exits
    async fn monitor(&self);

    /// A follower announcing itself to the leader
    async fn on_health_report(&self, token: &str, bind: &str, advertise: &str) -> Result<()>;
}
