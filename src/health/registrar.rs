//! Health Registrar
//!
//! Records this node's liveness in the shared store on every tick, runs
//! the lease election ladder, garbage-collects stale rows, and caches the
//! result of health checks for one poll interval.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::sync::Cache;
use tokio::sync::{Mutex, RwLock};

use super::backend::HealthBackend;
use super::node::{ActiveNodeRecord, HealthStatus, NodeHealth, NodeIdentity};
use crate::config::KeeperConfig;
use crate::election::{ElectionStrategy, NodeVitals};
use crate::error::{Error, Result};
use crate::system;

/// Health rows older than this many poll intervals are purged
pub const EXPIRE_AFTER_POLLS: u64 = 5;

/// Registrations older than this many poll intervals are not written
pub const STALE_AFTER_POLLS: i64 = 2;

const REGISTRATION_IDLE: u8 = 0;
const REGISTRATION_STARTING: u8 = 1;
const REGISTRATION_RUNNING: u8 = 2;

/// Registrar tuning taken from the configuration
#[derive(Debug, Clone)]
pub struct RegistrarSettings {
    pub poll_interval: Duration,
    pub active_node_expire: Duration,
    pub unseen_history_hours: u64,
    /// Storage backend descriptor written on new rows
    pub db_backend: String,
    pub consensus_port: u16,
}

impl RegistrarSettings {
    pub fn from_config(config: &KeeperConfig) -> Self {
        Self {
            poll_interval: config.election.poll_interval(),
            active_node_expire: Duration::from_secs(config.election.active_node_expire_seconds),
            unseen_history_hours: config.election.unseen_history_hours,
            db_backend: config.storage_backend_descriptor(),
            consensus_port: config.election.consensus_port(),
        }
    }
}

/// Writes and reads this node's health and lease rows
pub struct HealthRegistrar {
    backend: Arc<dyn HealthBackend>,
    identity: NodeIdentity,
    node: RwLock<NodeHealth>,
    vitals: Arc<NodeVitals>,
    settings: RegistrarSettings,
    /// Set once the history row has been attempted
    history_recorded: AtomicBool,
    /// Continuous registration start-up state
    registration_state: AtomicU8,
    health_cache: Cache<String, Arc<HealthStatus>>,
    /// Serializes cache misses so concurrent checks share one registration
    refresh: Mutex<()>,
}

impl HealthRegistrar {
    pub fn new(
        backend: Arc<dyn HealthBackend>,
        identity: NodeIdentity,
        vitals: Arc<NodeVitals>,
        settings: RegistrarSettings,
    ) -> Self {
        let node = NodeHealth::new(&identity, settings.db_backend.clone(), settings.consensus_port);
        let health_cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(settings.poll_interval)
            .build();

        Self {
            backend,
            identity,
            node: RwLock::new(node),
            vitals,
            settings,
            history_recorded: AtomicBool::new(false),
            registration_state: AtomicU8::new(REGISTRATION_IDLE),
            health_cache,
            refresh: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn vitals(&self) -> &Arc<NodeVitals> {
        &self.vitals
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    fn poll_secs(&self) -> u64 {
        self.settings.poll_interval.as_secs().max(1)
    }

    /// Write a node's health row
    ///
    /// Returns `false` without touching the store when the snapshot is
    /// older than two poll intervals.
    pub async fn register_node(&self, node: &NodeHealth) -> Result<bool> {
        let reported_secs_ago = node.reported_seconds_ago(Utc::now());
        if reported_secs_ago > STALE_AFTER_POLLS * self.poll_secs() as i64 {
            tracing::debug!(
                "Skipping registration of {}: reported {}s ago",
                node.hostname,
                reported_secs_ago
            );
            return Ok(false);
        }

        if self
            .history_recorded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Err(e) = self.backend.insert_history(node).await {
                tracing::warn!("Failed to record node history: {}", e);
            }
        }

        if self.backend.update_health(node, reported_secs_ago).await? > 0 {
            return Ok(true);
        }

        // No row yet
        let mut fresh = node.clone();
        fresh.ip = self.resolve_ip(&node.hostname).await;
        fresh.db_backend = self.settings.db_backend.clone();
        let inserted = self.backend.insert_health(&fresh, reported_secs_ago).await?;
        if inserted > 0 {
            tracing::info!("Registered node {} ({}) in {}", fresh.hostname, fresh.ip, self.backend.name());
        }
        Ok(inserted > 0)
    }

    async fn resolve_ip(&self, hostname: &str) -> String {
        match system::lookup_host(hostname).await {
            Ok(addrs) => addrs.first().map(IpAddr::to_string).unwrap_or_default(),
            Err(e) => {
                tracing::error!("Lookup of {} failed: {}", hostname, e);
                String::new()
            }
        }
    }

    /// Refresh and write this process's own health row
    pub async fn register_self(&self) -> Result<bool> {
        let snapshot = {
            let mut node = self.node.write().await;
            node.last_reported = Utc::now();
            node.clone()
        };

        let result = self.register_node(&snapshot).await;
        self.vitals.record_health_check(matches!(result, Ok(true)));
        result
    }

    /// Try to become (or stay) the active node
    ///
    /// Three attempts in order, each only when the previous changed no
    /// row: claim an absent anchor, take over an expired one, reaffirm
    /// our own.
    pub async fn attempt_election(&self) -> Result<bool> {
        if self.backend.claim_anchor(&self.identity).await? > 0 {
            tracing::info!("Elected as active node (new anchor)");
            return Ok(true);
        }

        let expire_secs = self.settings.active_node_expire.as_secs();
        if self.backend.takeover_anchor(&self.identity, expire_secs).await? > 0 {
            tracing::info!("Elected as active node (took over expired lease)");
            return Ok(true);
        }

        Ok(self.backend.reaffirm_anchor(&self.identity).await? > 0)
    }

    /// The anchor row, and whether it names this process
    pub async fn elected_node(&self) -> Result<(Option<ActiveNodeRecord>, bool)> {
        let active = self.backend.read_active_node().await?;
        let is_elected = active
            .as_ref()
            .map(|a| self.identity.matches(&a.hostname, &a.token))
            .unwrap_or(false);
        Ok((active, is_elected))
    }

    /// Purge health rows that missed several keepalives
    pub async fn expire_stale_members(&self) -> Result<u64> {
        let removed = self
            .backend
            .expire_health(EXPIRE_AFTER_POLLS * self.poll_secs())
            .await
            .map_err(|e| {
                tracing::error!("Failed to remove stale node health rows: {}", e);
                e
            })?;
        if removed > 0 {
            tracing::info!("Expired {} stale node health rows", removed);
        }
        Ok(removed)
    }

    /// Purge history rows past the retention window
    pub async fn expire_history(&self) -> Result<u64> {
        let removed = self
            .backend
            .expire_history(self.settings.unseen_history_hours)
            .await?;
        if removed > 0 {
            tracing::info!("Expired {} node history rows", removed);
        }
        Ok(removed)
    }

    /// Nodes seen within two poll intervals
    ///
    /// A non-empty `mode_filter` keeps only rows tagged with that exact
    /// mode; an empty filter keeps every row. With
    /// `peers`, only rows whose (ip, consensus port) matches a peer are
    /// kept; loopback peers stand for this host's address.
    pub async fn read_available_nodes(
        &self,
        mode_filter: &str,
        peers: Option<&[String]>,
    ) -> Result<Vec<NodeHealth>> {
        let within = STALE_AFTER_POLLS as u64 * self.poll_secs();
        let nodes = self.backend.read_available_nodes(within, mode_filter).await?;

        let Some(peers) = peers else {
            return Ok(nodes);
        };
        if peers.is_empty() {
            return Err(Error::Consensus("consensus peers are empty".into()));
        }

        let endpoints = peer_endpoints(peers);
        Ok(nodes
            .into_iter()
            .filter(|n| endpoints.iter().any(|(ip, port)| *ip == n.ip && *port == n.consensus_port))
            .collect())
    }

    /// Register and describe this node's view of the cluster
    ///
    /// Results are cached per process token for one poll interval.
    /// Failures are reported in the status, which is cached as well.
    pub async fn check_health(&self, strategy: &dyn ElectionStrategy) -> Arc<HealthStatus> {
        let key = self.identity.token.clone();
        if let Some(status) = self.health_cache.get(&key) {
            return status;
        }

        let _guard = self.refresh.lock().await;
        if let Some(status) = self.health_cache.get(&key) {
            return status;
        }

        let mut status = HealthStatus::pending(&self.identity);
        if let Err(e) = self.fill_status(strategy, &mut status).await {
            tracing::error!("Health check failed: {}", e);
            status.error = Some(e.to_string());
        }

        let status = Arc::new(status);
        self.health_cache.insert(key, Arc::clone(&status));
        status
    }

    async fn fill_status(&self, strategy: &dyn ElectionStrategy, status: &mut HealthStatus) -> Result<()> {
        status.healthy = self.register_self().await?;
        strategy.describe(status).await?;

        let mode = self.node.read().await.extra_info.clone();
        let peers = match strategy.member_addresses().await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("Could not read consensus peers: {}", e);
                return Ok(());
            }
        };
        match self.read_available_nodes(&mode, peers.as_deref()).await {
            Ok(nodes) => status.available_nodes = nodes,
            Err(e) => tracing::warn!("Could not read available nodes: {}", e),
        }
        Ok(())
    }

    /// Start registering this node every poll interval
    ///
    /// The first registration runs before this returns; later ones run on
    /// a background task. Only the first call starts anything; later
    /// calls only update the recorded mode and command.
    pub async fn start_continuous_registration(self: &Arc<Self>, extra_info: &str, command: &str) {
        {
            let mut node = self.node.write().await;
            node.extra_info = extra_info.to_string();
            node.command = command.to_string();
        }

        if self
            .registration_state
            .compare_exchange(
                REGISTRATION_IDLE,
                REGISTRATION_STARTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        self.registration_tick().await;

        let registrar = Arc::clone(self);
        let period = self.settings.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                // Inline so a stuck store never piles up registrations
                registrar.registration_tick().await;
            }
        });

        self.registration_state.store(REGISTRATION_RUNNING, Ordering::Release);
        tracing::info!("Continuous registration started for {}", self.identity);
    }

    /// Whether continuous registration has been started
    pub fn continuous_registration_started(&self) -> bool {
        self.registration_state.load(Ordering::Acquire) != REGISTRATION_IDLE
    }

    async fn registration_tick(&self) {
        let healthy = match self.register_self().await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::error!("Continuous registration failed: {}", e);
                false
            }
        };
        self.vitals.set_continuous_check_healthy(healthy);
    }
}

/// (ip, port) pairs of peer addresses, loopback replaced by the local IPv4
fn peer_endpoints(peers: &[String]) -> Vec<(String, u16)> {
    let local = system::local_ipv4().ok().map(|ip| ip.to_string());

    peers
        .iter()
        .filter_map(|peer| {
            let (host, port) = peer.rsplit_once(':')?;
            let port: u16 = port.parse().ok()?;
            let host = match (host, &local) {
                ("127.0.0.1", Some(local)) => local.clone(),
                _ => host.to_string(),
            };
            Some((host, port))
        })
        .collect()
}

#[cfg(test)]
impl HealthRegistrar {
    /// Registrar with a one second poll and five second lease
    pub(crate) fn for_tests(
        backend: Arc<dyn HealthBackend>,
        identity: NodeIdentity,
        vitals: Arc<NodeVitals>,
    ) -> Self {
        Self::new(
            backend,
            identity,
            vitals,
            RegistrarSettings {
                poll_interval: Duration::from_secs(1),
                active_node_expire: Duration::from_secs(5),
                unseen_history_hours: 240,
                db_backend: "sqlite".into(),
                consensus_port: 10008,
            },
        )
    }
}
