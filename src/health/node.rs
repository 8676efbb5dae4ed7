//! Node Health Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one running process: hostname plus a per-start token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub hostname: String,
    pub token: String,
}

impl NodeIdentity {
    /// Create an identity with a fresh random token
    pub fn generate(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Whether a stored (hostname, token) pair is this identity
    pub fn matches(&self, hostname: &str, token: &str) -> bool {
        self.hostname == hostname && self.token == token
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.hostname, self.token)
    }
}

/// One process instance's health row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub hostname: String,
    pub token: String,
    pub app_version: String,
    pub first_seen_active: Option<DateTime<Utc>>,
    pub last_seen_active: Option<DateTime<Utc>>,
    /// Execution mode tag
    pub extra_info: String,
    pub command: String,
    /// Storage backend descriptor
    pub db_backend: String,
    /// Resolved address, filled in on first insert
    pub ip: String,
    pub consensus_port: u16,
    /// Local clock at the last registration attempt
    pub last_reported: DateTime<Utc>,
}

impl NodeHealth {
    /// Health row for this process
    pub fn new(identity: &NodeIdentity, db_backend: impl Into<String>, consensus_port: u16) -> Self {
        Self {
            hostname: identity.hostname.clone(),
            token: identity.token.clone(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            first_seen_active: None,
            last_seen_active: None,
            extra_info: String::new(),
            command: String::new(),
            db_backend: db_backend.into(),
            ip: String::new(),
            consensus_port,
            last_reported: Utc::now(),
        }
    }

    /// Identity key of this row
    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            hostname: self.hostname.clone(),
            token: self.token.clone(),
        }
    }

    /// Whole seconds elapsed since `last_reported`, never negative
    pub fn reported_seconds_ago(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_reported).num_seconds().max(0)
    }
}

/// The anchor row naming the current lease holder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveNodeRecord {
    pub anchor: u8,
    pub hostname: String,
    pub token: String,
    pub first_seen_active: Option<DateTime<Utc>>,
    pub last_seen_active: Option<DateTime<Utc>>,
}

/// Consensus view included in a health status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusStatus {
    pub leader: String,
    pub is_leader: bool,
    pub leader_uri: String,
    pub advertise: String,
    pub healthy_members: Vec<String>,
}

/// Cluster view taken at one health check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub hostname: String,
    pub token: String,
    pub is_active_node: bool,
    pub active_node: Option<ActiveNodeRecord>,
    /// Failure message when the check could not complete
    pub error: Option<String>,
    pub available_nodes: Vec<NodeHealth>,
    pub consensus: Option<ConsensusStatus>,
}

impl HealthStatus {
    /// Unhealthy status for this identity, filled in as the check proceeds
    pub fn pending(identity: &NodeIdentity) -> Self {
        Self {
            hostname: identity.hostname.clone(),
            token: identity.token.clone(),
            ..Default::default()
        }
    }
}

/// Convert stored unix seconds into a timestamp
pub(crate) fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}
