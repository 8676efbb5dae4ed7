//! hakeeper Configuration
//!
//! This module provides configuration structures for the hakeeper
//! election, health registration and snapshot subsystems.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted health poll interval
pub const MAX_HEALTH_POLL_SECONDS: u64 = 3600;

/// Longest accepted lease expiry and periodic job interval (one week)
pub const MAX_TIMER_SECONDS: u64 = 7 * 24 * 3600;

/// Longest accepted node history retention (ten years)
pub const MAX_UNSEEN_HISTORY_HOURS: u64 = 10 * 365 * 24;

/// Main hakeeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Shared store configuration
    pub database: DatabaseConfig,

    /// Election configuration
    #[serde(default)]
    pub election: ElectionSettings,

    /// Snapshot store configuration
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Periodic job configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Auxiliary scripts run on their own timers
    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hostname override (defaults to the OS hostname)
    #[serde(default)]
    pub hostname: Option<String>,

    /// Data directory for snapshots and the embedded store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Execution mode tag recorded as the node's extra info
    #[serde(default = "default_execution_mode")]
    pub execution_mode: String,

    /// Command recorded alongside the node's health row
    #[serde(default)]
    pub command: String,
}

/// Which store implementation backs the health and election tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Shared MySQL / MariaDB server
    Mysql,
    /// Embedded SQLite file (single host)
    Sqlite,
}

/// Shared store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Store implementation
    #[serde(default = "default_store_kind")]
    pub backend: StoreKind,

    /// MySQL host
    #[serde(default)]
    pub host: String,

    /// MySQL port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    #[serde(default)]
    pub user: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// Database name
    #[serde(default = "default_db_name")]
    pub database: String,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// SQLite file path (defaults to `<data_dir>/keeper.db`)
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
}

/// Leadership strategy, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Lease held in the shared store's anchor row
    Lease,
    /// Leadership delegated to a replicated consensus engine
    Consensus,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Lease => write!(f, "LEASE"),
            StrategyKind::Consensus => write!(f, "CONSENSUS"),
        }
    }
}

/// Election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSettings {
    /// Election strategy
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Health poll interval in seconds
    #[serde(default = "default_health_poll_seconds")]
    pub health_poll_seconds: u64,

    /// Seconds after which a silent lease holder may be taken over
    #[serde(default = "default_active_node_expire_seconds")]
    pub active_node_expire_seconds: u64,

    /// Hours to keep node history rows
    #[serde(default = "default_unseen_history_hours")]
    pub unseen_history_hours: u64,

    /// Consensus bind address (host:port)
    #[serde(default)]
    pub consensus_bind: String,

    /// Consensus advertise address (defaults to the bind address)
    #[serde(default)]
    pub consensus_advertise: Option<String>,

    /// Port recorded when `consensus_bind` carries none
    #[serde(default = "default_consensus_port")]
    pub default_consensus_port: u16,

    /// Expected consensus members (host:port)
    #[serde(default)]
    pub consensus_nodes: Vec<String>,
}

/// Snapshot store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Number of finalized snapshots to keep
    #[serde(default = "default_snapshot_retain")]
    pub retain: usize,
}

/// Who reconciles the leader domain on the domain timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainReconcileMode {
    /// Every node checks the domain on each domain tick
    AllNodes,
    /// Only the current leader checks the domain on each domain tick
    LeaderOnly,
}

/// Periodic job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Domain reconciliation interval in seconds
    #[serde(default = "default_domain_check_interval")]
    pub domain_check_interval_seconds: u64,

    /// DNS name that should resolve to the leader
    #[serde(default)]
    pub leader_domain: String,

    /// Commands rebinding `{domain}` to `{ip}`
    #[serde(default)]
    pub switch_domain_commands: Vec<String>,

    /// Which nodes reconcile the domain on the timer
    #[serde(default = "default_domain_reconcile")]
    pub domain_reconcile: DomainReconcileMode,

    /// Cluster status check interval in seconds (consensus strategy only)
    #[serde(default = "default_cluster_status_interval")]
    pub cluster_status_interval_seconds: u64,

    /// Alert command; `{msg}` is replaced by the alert text
    #[serde(default)]
    pub cluster_status_alert_command: String,

    /// API endpoint reported in alerts
    #[serde(default)]
    pub api_endpoint: String,
}

/// Auxiliary script configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Shell text to run
    pub script: String,

    /// Run interval in seconds (0 falls back to 60)
    #[serde(default)]
    pub run_interval_seconds: u64,

    /// Capture and log the script output
    #[serde(default)]
    pub capture_output: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/hakeeper")
}

fn default_execution_mode() -> String {
    "ServiceMode".to_string()
}

fn default_store_kind() -> StoreKind {
    StoreKind::Mysql
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_name() -> String {
    "hakeeper".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Lease
}

fn default_health_poll_seconds() -> u64 {
    1
}

fn default_active_node_expire_seconds() -> u64 {
    5
}

fn default_unseen_history_hours() -> u64 {
    240
}

fn default_consensus_port() -> u16 {
    10008
}

fn default_snapshot_retain() -> usize {
    10
}

fn default_domain_check_interval() -> u64 {
    60
}

fn default_domain_reconcile() -> DomainReconcileMode {
    DomainReconcileMode::AllNodes
}

fn default_cluster_status_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            data_dir: default_data_dir(),
            execution_mode: default_execution_mode(),
            command: String::new(),
        }
    }
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            health_poll_seconds: default_health_poll_seconds(),
            active_node_expire_seconds: default_active_node_expire_seconds(),
            unseen_history_hours: default_unseen_history_hours(),
            consensus_bind: String::new(),
            consensus_advertise: None,
            default_consensus_port: default_consensus_port(),
            consensus_nodes: Vec::new(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            retain: default_snapshot_retain(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            domain_check_interval_seconds: default_domain_check_interval(),
            leader_domain: String::new(),
            switch_domain_commands: Vec::new(),
            domain_reconcile: default_domain_reconcile(),
            cluster_status_interval_seconds: default_cluster_status_interval(),
            cluster_status_alert_command: String::new(),
            api_endpoint: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl DatabaseConfig {
    /// Get database connection URL
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

impl ElectionSettings {
    /// Get the health poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_seconds)
    }

    /// Port recorded on this node's health row
    pub fn consensus_port(&self) -> u16 {
        self.consensus_bind
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(self.default_consensus_port)
    }

    /// Get the advertised consensus address (or bind address if not set)
    pub fn consensus_advertise(&self) -> &str {
        self.consensus_advertise
            .as_deref()
            .unwrap_or(&self.consensus_bind)
    }
}

impl ScriptConfig {
    /// Get the run interval as Duration
    pub fn run_interval(&self) -> Duration {
        match self.run_interval_seconds {
            0 => Duration::from_secs(60),
            secs => Duration::from_secs(secs),
        }
    }
}

impl KeeperConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: KeeperConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.election.health_poll_seconds == 0 {
            return Err(crate::Error::Config(
                "election.health_poll_seconds must be positive".into(),
            ));
        }

        if self.election.health_poll_seconds > MAX_HEALTH_POLL_SECONDS {
            return Err(crate::Error::Config(format!(
                "election.health_poll_seconds cannot exceed {}",
                MAX_HEALTH_POLL_SECONDS
            )));
        }

        if self.election.active_node_expire_seconds == 0 {
            return Err(crate::Error::Config(
                "election.active_node_expire_seconds must be positive".into(),
            ));
        }

        if self.election.active_node_expire_seconds > MAX_TIMER_SECONDS {
            return Err(crate::Error::Config(format!(
                "election.active_node_expire_seconds cannot exceed {}",
                MAX_TIMER_SECONDS
            )));
        }

        if self.election.unseen_history_hours > MAX_UNSEEN_HISTORY_HOURS {
            return Err(crate::Error::Config(format!(
                "election.unseen_history_hours cannot exceed {}",
                MAX_UNSEEN_HISTORY_HOURS
            )));
        }

        let timers = [
            ("scheduler.domain_check_interval_seconds", self.scheduler.domain_check_interval_seconds),
            ("scheduler.cluster_status_interval_seconds", self.scheduler.cluster_status_interval_seconds),
        ];
        let scripts = self
            .scripts
            .iter()
            .map(|s| ("scripts.run_interval_seconds", s.run_interval_seconds));
        for (name, secs) in timers.into_iter().chain(scripts) {
            if secs > MAX_TIMER_SECONDS {
                return Err(crate::Error::Config(format!(
                    "{} cannot exceed {}",
                    name, MAX_TIMER_SECONDS
                )));
            }
        }

        if self.snapshot.retain < 1 {
            return Err(crate::Error::Config(
                "snapshot.retain must be at least 1".into(),
            ));
        }

        if self.election.strategy == StrategyKind::Consensus && self.election.consensus_nodes.is_empty() {
            return Err(crate::Error::Config(
                "election.consensus_nodes cannot be empty with the consensus strategy".into(),
            ));
        }

        if self.database.backend == StoreKind::Mysql && self.database.host.is_empty() {
            return Err(crate::Error::Config("database.host cannot be empty".into()));
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Get the embedded store path
    pub fn sqlite_path(&self) -> PathBuf {
        self.database
            .sqlite_path
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("keeper.db"))
    }

    /// Descriptor of the store recorded on each node row
    pub fn storage_backend_descriptor(&self) -> String {
        match self.database.backend {
            StoreKind::Mysql => format!("{}:{}", self.database.host, self.database.port),
            StoreKind::Sqlite => self.sqlite_path().display().to_string(),
        }
    }

}
