//! Continuous Operation
//!
//! One loop waits on independent timers and dispatches work:
//!
//! - health (every poll interval): leadership round, spawned
//! - domain (configurable): leader domain reconciliation, inline
//! - caretaking (every minute): leader-only expiry jobs, spawned
//! - cluster status (configurable, consensus only): alerting, inline
//!
//! Spawned work is fire-and-forget. Registration and expiry are
//! idempotent against the store, so overlapping runs are harmless.

pub mod cluster_status;
pub mod domain;
pub mod scripts;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::{DomainReconcileMode, KeeperConfig, StrategyKind};
use crate::election::ElectionCoordinator;
use crate::error::Result;

pub use domain::{reconcile_leader_domain, DomainSettings};

/// Period of the leader-only expiry jobs
pub const CARETAKING_INTERVAL: Duration = Duration::from_secs(60);

/// Drives the periodic work of one node
#[derive(Clone)]
pub struct Scheduler {
    config: Arc<KeeperConfig>,
    coordinator: Arc<ElectionCoordinator>,
    domain: Arc<DomainSettings>,
}

impl Scheduler {
    pub fn new(config: Arc<KeeperConfig>, coordinator: Arc<ElectionCoordinator>) -> Self {
        let domain = Arc::new(DomainSettings::from_config(&config.scheduler));
        Self {
            config,
            coordinator,
            domain,
        }
    }

    pub fn coordinator(&self) -> &Arc<ElectionCoordinator> {
        &self.coordinator
    }

    /// Run until the process exits
    ///
    /// Returns only if the election strategy fails to start.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("continuous operation: setting up");

        let script_tasks = scripts::spawn_script_loops(&self.config.scripts, &self.coordinator);
        tracing::debug!("Started {} auxiliary script loops", script_tasks.len());

        self.coordinator.strategy().start().await?;

        let poll = self.config.election.poll_interval();
        let domain_period = Duration::from_secs(self.config.scheduler.domain_check_interval_seconds.max(1));
        let cluster_period = Duration::from_secs(self.config.scheduler.cluster_status_interval_seconds.max(1));
        let consensus = self.coordinator.kind() == StrategyKind::Consensus;

        let mut health_tick = ticker(poll);
        let mut domain_tick = ticker(domain_period);
        let mut caretaking_tick = ticker(CARETAKING_INTERVAL);
        let mut cluster_tick = ticker(cluster_period);

        tracing::info!(
            "continuous operation: starting ({} strategy, poll {}s)",
            self.coordinator.kind(),
            poll.as_secs()
        );

        loop {
            tokio::select! {
                _ = health_tick.tick() => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.on_health_tick().await;
                    });
                }
                _ = domain_tick.tick() => {
                    self.on_domain_tick().await;
                }
                _ = caretaking_tick.tick() => {
                    self.on_caretaking_tick();
                }
                _ = cluster_tick.tick(), if consensus => {
                    self.check_cluster_status().await;
                }
            }
        }
    }

    /// One leadership round
    ///
    /// A node that has just become leader (or, under consensus, any
    /// quorum member not already leading) re-registers itself, and a
    /// new leader reconciles the leader domain once.
    pub async fn on_health_tick(&self) {
        let was_leader = self.coordinator.is_leader();
        self.coordinator.refresh_leadership().await;

        if !self.coordinator.is_leader_or_member() {
            return;
        }
        if was_leader {
            return;
        }

        let registrar = Arc::clone(self.coordinator.registrar());
        tokio::spawn(async move {
            if let Err(e) = registrar.register_self().await {
                tracing::error!("Registration after election failed: {}", e);
            }
        });

        if self.coordinator.is_leader() {
            tracing::info!("This node is now the leader");
            if let Err(e) = reconcile_leader_domain(&self.domain).await {
                tracing::error!("Leader domain reconciliation failed: {}", e);
            }
        }
    }

    async fn on_domain_tick(&self) {
        let due = match self.config.scheduler.domain_reconcile {
            DomainReconcileMode::AllNodes => true,
            DomainReconcileMode::LeaderOnly => self.coordinator.is_leader(),
        };
        if !due {
            return;
        }
        if let Err(e) = reconcile_leader_domain(&self.domain).await {
            tracing::error!("Leader domain reconciliation failed: {}", e);
        }
    }

    /// Spawn the expiry jobs if this node leads
    pub fn on_caretaking_tick(&self) -> bool {
        if !self.coordinator.is_leader() {
            return false;
        }

        let registrar = Arc::clone(self.coordinator.registrar());
        tokio::spawn(async move {
            if let Err(e) = registrar.expire_history().await {
                tracing::error!("Failed to expire node history: {}", e);
            }
        });

        let registrar = Arc::clone(self.coordinator.registrar());
        tokio::spawn(async move {
            // Errors are logged by the registrar
            let _ = registrar.expire_stale_members().await;
        });
        true
    }

    /// Alert when the consensus cluster is not fully healthy
    pub async fn check_cluster_status(&self) -> Option<String> {
        let settings = &self.config.scheduler;
        let node_info = format!(
            "{} ApiEndpoint:{}",
            self.config.election.consensus_bind, settings.api_endpoint
        );

        let health = self.coordinator.check_health().await;
        let reason = cluster_status::cluster_alert(&health, self.config.election.consensus_nodes.len())?;
        cluster_status::raise_alert(&settings.cluster_status_alert_command, &node_info, &reason).await;
        Some(reason)
    }
}

/// Interval whose first tick fires one period from now
fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::testing::ScriptedEngine;
    use crate::election::{ConsensusStrategy, HealthReportApplier, LeaseStrategy, NodeVitals};
    use crate::health::{HealthRegistrar, NodeIdentity, SqliteHealthBackend};
    use crate::snapshot::FileSnapshotStore;
    use tempfile::tempdir;

    fn config(strategy: &str, extra: &str) -> Arc<KeeperConfig> {
        let toml = format!(
            r#"
[database]
backend = "sqlite"

[election]
strategy = "{}"
consensus_bind = "10.0.0.1:10008"
consensus_nodes = ["10.0.0.1:10008", "10.0.0.2:10008"]
{}
"#,
            strategy, extra
        );
        Arc::new(KeeperConfig::from_str(&toml).unwrap())
    }

    fn lease_scheduler(backend: &Arc<SqliteHealthBackend>, host: &str) -> Scheduler {
        let registrar = Arc::new(HealthRegistrar::for_tests(
            backend.clone(),
            NodeIdentity::generate(host),
            Arc::new(NodeVitals::new()),
        ));
        let strategy = Arc::new(LeaseStrategy::new(registrar.clone()));
        let coordinator = Arc::new(ElectionCoordinator::new(strategy, registrar));
        Scheduler::new(config("lease", ""), coordinator)
    }

    #[tokio::test]
    async fn test_health_tick_elects_one_leader() {
        let backend = Arc::new(SqliteHealthBackend::open_in_memory().unwrap());
        let a = lease_scheduler(&backend, "node-a");
        let b = lease_scheduler(&backend, "node-b");

        a.on_health_tick().await;
        b.on_health_tick().await;

        assert!(a.coordinator().is_leader());
        assert!(!b.coordinator().is_leader());

        // Caretaking only on the leader
        assert!(a.on_caretaking_tick());
        assert!(!b.on_caretaking_tick());
    }

    #[tokio::test]
    async fn test_new_leader_registers_itself() {
        let backend = Arc::new(SqliteHealthBackend::open_in_memory().unwrap());
        let scheduler = lease_scheduler(&backend, "localhost");
        let identity = scheduler.coordinator().registrar().identity().clone();

        scheduler.on_health_tick().await;
        for _ in 0..50 {
            if backend.liveness_indicator(&identity).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(backend.liveness_indicator(&identity).await.is_some());
    }

    #[tokio::test]
    async fn test_caretaking_expires_stale_rows() {
        let backend = Arc::new(SqliteHealthBackend::open_in_memory().unwrap());
        let leader = lease_scheduler(&backend, "localhost");
        let follower = lease_scheduler(&backend, "localhost");

        leader.on_health_tick().await;
        assert!(leader.coordinator().is_leader());
        follower.coordinator().registrar().register_self().await.unwrap();

        // Wait for the leader's post-election registration to land
        let identity = leader.coordinator().registrar().identity().clone();
        for _ in 0..50 {
            if backend.liveness_indicator(&identity).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(backend.health_row_count().await, 2);

        backend.backdate_health(10).await;
        assert!(!follower.on_caretaking_tick());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.health_row_count().await, 2);

        assert!(leader.on_caretaking_tick());
        for _ in 0..50 {
            if backend.health_row_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(backend.health_row_count().await, 0);
    }

    #[tokio::test]
    async fn test_cluster_status_alerts_on_missing_member() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("alert");
        let mut cfg = (*config("consensus", "")).clone();
        cfg.scheduler.cluster_status_alert_command = format!("echo '{{msg}}' > {}", out.display());
        let cfg = Arc::new(cfg);

        let backend = Arc::new(SqliteHealthBackend::open_in_memory().unwrap());
        let identity = NodeIdentity::generate("localhost");
        let registrar = Arc::new(HealthRegistrar::for_tests(
            backend,
            identity.clone(),
            Arc::new(NodeVitals::new()),
        ));
        let engine = ScriptedEngine::new();
        engine.set_leader(true);
        engine.set_members(&["10.0.0.1:10008"]);
        let strategy = Arc::new(ConsensusStrategy::new(
            engine,
            registrar.vitals().clone(),
            Arc::new(HealthReportApplier::new()),
            Arc::new(FileSnapshotStore::new(dir.path(), 2).unwrap()),
            identity,
            &cfg.election,
        ));
        let coordinator = Arc::new(ElectionCoordinator::new(strategy, registrar));
        let scheduler = Scheduler::new(cfg, coordinator);

        let reason = scheduler.check_cluster_status().await.unwrap();
        assert!(reason.contains("1 healthy members, expected 2"));
        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.starts_with("10.0.0.1:10008 ApiEndpoint:"));
    }

    #[test]
    fn test_leader_only_domain_mode_parses() {
        let cfg = config("lease", "[scheduler]\ndomain_reconcile = \"leader-only\"");
        assert_eq!(cfg.scheduler.domain_reconcile, DomainReconcileMode::LeaderOnly);
    }
}
