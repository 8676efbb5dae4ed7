//! Health Store Backend
//!
//! The transactional store holding the node health, node history and
//! active node tables. Every mutation reports the number of rows it
//! affected; the lease ladder and the run-once history insert rely on
//! conditional UPDATE and insert-ignore semantics to be correct.

use async_trait::async_trait;

use super::node::{ActiveNodeRecord, NodeHealth, NodeIdentity};
use crate::error::Result;

/// Identifier of the single leadership slot
pub const ANCHOR: u8 = 1;

/// Shared store operations used by the registrar
#[async_trait]
pub trait HealthBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Insert-ignore the node's history row
    async fn insert_history(&self, node: &NodeHealth) -> Result<u64>;

    /// Refresh an existing health row, backdating `last_seen_active`
    /// by `reported_secs_ago` and bumping the liveness counter.
    /// `extra_info` is only overwritten when non-empty.
    async fn update_health(&self, node: &NodeHealth, reported_secs_ago: i64) -> Result<u64>;

    /// Insert-ignore a health row, backdating both seen timestamps
    async fn insert_health(&self, node: &NodeHealth, reported_secs_ago: i64) -> Result<u64>;

    /// Delete health rows not seen for `older_than_secs`
    async fn expire_health(&self, older_than_secs: u64) -> Result<u64>;

    /// Delete history rows first seen more than `hours` ago
    async fn expire_history(&self, hours: u64) -> Result<u64>;

    /// Health rows seen within `within_secs`, ordered by hostname
    ///
    /// A non-empty `extra_info` matches rows carrying exactly that tag; an
    /// empty one matches every row.
    async fn read_available_nodes(&self, within_secs: u64, extra_info: &str) -> Result<Vec<NodeHealth>>;

    /// Election step 1: create the anchor row if absent
    async fn claim_anchor(&self, identity: &NodeIdentity) -> Result<u64>;

    /// Election step 2: take the anchor row over if its holder has been
    /// silent for longer than `expire_secs`
    async fn takeover_anchor(&self, identity: &NodeIdentity, expire_secs: u64) -> Result<u64>;

    /// Election step 3: refresh the anchor row if this identity holds it
    async fn reaffirm_anchor(&self, identity: &NodeIdentity) -> Result<u64>;

    /// Current anchor row, if any
    async fn read_active_node(&self) -> Result<Option<ActiveNodeRecord>>;
}
