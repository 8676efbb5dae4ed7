//! Snapshot Metadata

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Metadata describing one persisted snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    /// Directory name: `<term>-<index>-<creationMillis>`
    pub id: String,
    /// Consensus term of the last entry in the snapshot
    pub term: u64,
    /// Log index of the last entry in the snapshot
    pub index: u64,
    /// Consensus peer set at the time of the snapshot
    pub peers: Vec<String>,
    /// Size of the state file in bytes (0 until finalized)
    pub size: u64,
    /// CRC-64 of the state file (absent until finalized)
    pub checksum: Option<u64>,
}

impl SnapshotDescriptor {
    /// Create the descriptor of a snapshot that is still being written
    pub fn pending(id: String, term: u64, index: u64, peers: Vec<String>) -> Self {
        Self {
            id,
            term,
            index,
            peers,
            size: 0,
            checksum: None,
        }
    }

    /// Whether this snapshot's position is strictly after `other`'s
    pub fn is_after(&self, other: &SnapshotDescriptor) -> bool {
        (self.term, self.index) > (other.term, other.index)
    }

    /// Oldest-to-newest ordering by (term, index, id)
    pub fn position_cmp(&self, other: &SnapshotDescriptor) -> Ordering {
        (self.term, self.index, self.id.as_str()).cmp(&(other.term, other.index, other.id.as_str()))
    }
}

/// Sort snapshots newest first
pub(crate) fn sort_newest_first(snapshots: &mut [SnapshotDescriptor]) {
    snapshots.sort_by(|a, b| b.position_cmp(a));
}
