//! Election Strategies
//!
//! Leadership is decided by exactly one strategy, chosen at start-up:
//!
//! - [`LeaseStrategy`]: a lease held in the shared store's anchor row,
//!   renewed through the registrar's three-step election ladder.
//! - [`ConsensusStrategy`]: leadership delegated to an external
//!   replicated consensus engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::applier::{HealthReportApplier, StateApplier};
use super::consensus::ConsensusEngine;
use super::vitals::NodeVitals;
use crate::config::{ElectionSettings, StrategyKind};
use crate::error::Result;
use crate::health::backend::ANCHOR;
use crate::health::{ActiveNodeRecord, ConsensusStatus, HealthRegistrar, HealthStatus, NodeIdentity};
use crate::snapshot::FileSnapshotStore;

/// Unhealthy poll intervals after which a consensus leader steps down
pub const YIELD_AFTER_UNHEALTHY_POLLS: u32 = 5;

/// Unhealthy poll intervals after which the condition is logged as critical
pub const FATAL_AFTER_UNHEALTHY_POLLS: u32 = 30;

/// How this node learns whether it leads
#[async_trait]
pub trait ElectionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// One-time start-up; an error here is fatal for the process
    async fn start(&self) -> Result<()>;

    /// Run one leadership round and report whether this node leads
    async fn poll_leadership(&self) -> bool;

    fn is_leader(&self) -> bool;

    /// Leader under the lease strategy, any quorum member under consensus
    fn is_leader_or_member(&self) -> bool;

    /// Fill the leadership fields of a health status
    async fn describe(&self, status: &mut HealthStatus) -> Result<()>;

    /// Peer addresses available nodes must match, if the strategy has any
    async fn member_addresses(&self) -> Result<Option<Vec<String>>>;

    /// Whether auxiliary scripts only run on the leader
    fn gates_auxiliary_work(&self) -> bool;
}

/// Lease election against the shared store
pub struct LeaseStrategy {
    registrar: Arc<HealthRegistrar>,
}

impl LeaseStrategy {
    pub fn new(registrar: Arc<HealthRegistrar>) -> Self {
        Self { registrar }
    }
}

#[async_trait]
impl ElectionStrategy for LeaseStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Lease
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn poll_leadership(&self) -> bool {
        let elected = match self.registrar.attempt_election().await {
            Ok(elected) => elected,
            Err(e) => {
                tracing::error!("Election attempt failed: {}", e);
                false
            }
        };

        if !elected {
            match self.registrar.elected_node().await {
                Ok((Some(active), _)) => {
                    tracing::debug!("Not elected as active node; active node: {}; polling", active.hostname);
                }
                Ok((None, _)) => {
                    tracing::debug!("Not elected as active node; no active node; polling");
                }
                Err(e) => {
                    tracing::debug!("Not elected as active node; active node: unable to determine: {}; polling", e);
                }
            }
        }

        elected
    }

    fn is_leader(&self) -> bool {
        self.registrar.vitals().is_elected()
    }

    fn is_leader_or_member(&self) -> bool {
        self.registrar.vitals().is_elected()
    }

    async fn describe(&self, status: &mut HealthStatus) -> Result<()> {
        let (active, is_elected) = self.registrar.elected_node().await?;
        status.active_node = active;
        status.is_active_node = is_elected;
        Ok(())
    }

    async fn member_addresses(&self) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    fn gates_auxiliary_work(&self) -> bool {
        false
    }
}

/// Leadership delegated to a consensus engine
pub struct ConsensusStrategy {
    engine: Arc<dyn ConsensusEngine>,
    vitals: Arc<NodeVitals>,
    applier: Arc<HealthReportApplier>,
    snapshots: Arc<FileSnapshotStore>,
    identity: NodeIdentity,
    bind: String,
    advertise: String,
    poll_interval: Duration,
}

impl ConsensusStrategy {
    pub fn new(
        engine: Arc<dyn ConsensusEngine>,
        vitals: Arc<NodeVitals>,
        applier: Arc<HealthReportApplier>,
        snapshots: Arc<FileSnapshotStore>,
        identity: NodeIdentity,
        settings: &ElectionSettings,
    ) -> Self {
        Self {
            engine,
            vitals,
            applier,
            snapshots,
            identity,
            bind: settings.consensus_bind.clone(),
            advertise: settings.consensus_advertise().to_string(),
            poll_interval: settings.poll_interval(),
        }
    }

    /// Step down or escalate when health registration keeps failing
    fn check_unhealthy_duration(&self) {
        let unhealthy_for = self.vitals.since_last_good_health();

        let yield_after = self.poll_interval * YIELD_AFTER_UNHEALTHY_POLLS;
        if unhealthy_for > yield_after {
            tracing::error!(
                "Health test is failing for over {} seconds; yielding consensus leadership",
                yield_after.as_secs()
            );
            if self.engine.is_leader() {
                if let Err(e) = self.engine.yield_leadership() {
                    tracing::error!("Failed to yield consensus leadership: {}", e);
                }
            }
        }

        if unhealthy_for > self.poll_interval * FATAL_AFTER_UNHEALTHY_POLLS {
            tracing::error!("Node is unable to register health. Please check database connectivity.");
        }
    }
}

#[async_trait]
impl ElectionStrategy for ConsensusStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Consensus
    }

    async fn start(&self) -> Result<()> {
        if let Err(e) = self.applier.recover(&self.snapshots) {
            tracing::warn!("Could not restore health reports from snapshot: {}", e);
        }

        let applier: Arc<dyn StateApplier> = self.applier.clone();
        self.engine
            .setup(applier, Arc::clone(&self.snapshots), &self.identity.hostname)
            .await
            .map_err(|e| {
                tracing::error!("Consensus engine setup failed: {}", e);
                e
            })?;

        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            engine.monitor().await;
        });

        tracing::info!("Consensus engine started for {}", self.identity.hostname);
        Ok(())
    }

    async fn poll_leadership(&self) -> bool {
        self.check_unhealthy_duration();

        let leader = self.engine.is_leader();
        if !leader && self.engine.is_part_of_quorum() {
            if let Err(e) = self
                .engine
                .on_health_report(&self.identity.token, &self.bind, &self.advertise)
                .await
            {
                tracing::debug!("Health report to leader failed: {}", e);
            }
        }
        leader
    }

    fn is_leader(&self) -> bool {
        self.engine.is_leader()
    }

    fn is_leader_or_member(&self) -> bool {
        self.engine.is_part_of_quorum()
    }

    async fn describe(&self, status: &mut HealthStatus) -> Result<()> {
        let leader = self.engine.current_leader_id();
        let is_leader = self.engine.is_leader();

        status.active_node = Some(ActiveNodeRecord {
            anchor: ANCHOR,
            hostname: leader.clone(),
            token: String::new(),
            first_seen_active: None,
            last_seen_active: None,
        });
        status.is_active_node = is_leader;
        status.consensus = Some(ConsensusStatus {
            leader,
            is_leader,
            leader_uri: self.engine.leader_uri(),
            advertise: self.advertise.clone(),
            healthy_members: self.engine.healthy_members(),
        });
        Ok(())
    }

    async fn member_addresses(&self) -> Result<Option<Vec<String>>> {
        Ok(Some(self.engine.peer_addresses().await?))
    }

    fn gates_auxiliary_work(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::testing::ScriptedEngine;
    use crate::health::SqliteHealthBackend;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn settings() -> ElectionSettings {
        ElectionSettings {
            strategy: StrategyKind::Consensus,
            consensus_bind: "10.0.0.1:10008".into(),
            consensus_nodes: vec!["10.0.0.1:10008".into()],
            ..Default::default()
        }
    }

    fn consensus(engine: Arc<ScriptedEngine>, vitals: Arc<NodeVitals>, base: &std::path::Path) -> ConsensusStrategy {
        ConsensusStrategy::new(
            engine,
            vitals,
            Arc::new(HealthReportApplier::new()),
            Arc::new(FileSnapshotStore::new(base, 2).unwrap()),
            NodeIdentity::generate("node-a"),
            &settings(),
        )
    }

    #[tokio::test]
    async fn test_consensus_start_runs_setup() {
        let dir = tempdir().unwrap();
        let engine = ScriptedEngine::new();
        let strategy = consensus(engine.clone(), Arc::new(NodeVitals::new()), dir.path());

        strategy.start().await.unwrap();
        assert!(engine.is_enabled());
        assert_eq!(strategy.kind(), StrategyKind::Consensus);
        assert!(strategy.gates_auxiliary_work());
    }

    #[tokio::test]
    async fn test_consensus_setup_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let engine = ScriptedEngine::new();
        engine.fail_setup.store(true, Ordering::SeqCst);
        let strategy = consensus(engine, Arc::new(NodeVitals::new()), dir.path());

        assert!(strategy.start().await.is_err());
    }

    #[tokio::test]
    async fn test_consensus_yields_when_unhealthy() {
        let dir = tempdir().unwrap();
        let engine = ScriptedEngine::new();
        let vitals = Arc::new(NodeVitals::new());
        let strategy = consensus(engine.clone(), vitals.clone(), dir.path());
        engine.set_leader(true);

        vitals.record_health_check(true);
        assert!(strategy.poll_leadership().await);
        assert_eq!(engine.yields.load(Ordering::SeqCst), 0);

        // Default poll interval is 1s, so 5s of failures crosses the yield threshold
        vitals.set_last_good_health_ago(Duration::from_secs(6));
        assert!(!strategy.poll_leadership().await);
        assert_eq!(engine.yields.load(Ordering::SeqCst), 1);

        // Past the fatal threshold the node only logs and keeps going
        vitals.set_last_good_health_ago(Duration::from_secs(31));
        assert!(!strategy.poll_leadership().await);
        assert_eq!(engine.yields.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_follower_reports_health() {
        let dir = tempdir().unwrap();
        let engine = ScriptedEngine::new();
        let strategy = consensus(engine.clone(), Arc::new(NodeVitals::new()), dir.path());
        strategy.start().await.unwrap();

        engine.quorum.store(true, Ordering::SeqCst);
        assert!(!strategy.poll_leadership().await);

        let reports = engine.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1, "10.0.0.1:10008");
        assert_eq!(strategy.applier.reports().len(), 1);
    }

    #[tokio::test]
    async fn test_consensus_describe() {
        let dir = tempdir().unwrap();
        let engine = ScriptedEngine::new();
        engine.set_leader(true);
        engine.set_members(&["10.0.0.1:10008", "10.0.0.2:10008"]);
        let strategy = consensus(engine, Arc::new(NodeVitals::new()), dir.path());

        let mut status = HealthStatus::default();
        strategy.describe(&mut status).await.unwrap();
        assert!(status.is_active_node);
        let view = status.consensus.unwrap();
        assert!(view.is_leader);
        assert_eq!(view.healthy_members.len(), 2);
        assert_eq!(view.advertise, "10.0.0.1:10008");
    }

    #[tokio::test]
    async fn test_consensus_peers_filter_available_nodes() {
        let dir = tempdir().unwrap();
        let engine = ScriptedEngine::new();
        engine.set_peers(&["192.0.2.10:10008", "192.0.2.11:10008"]);
        let strategy = consensus(engine, Arc::new(NodeVitals::new()), dir.path());

        assert_eq!(
            strategy.member_addresses().await.unwrap(),
            Some(vec!["192.0.2.10:10008".to_string(), "192.0.2.11:10008".to_string()])
        );

        // This host registers itself but is not one of the peers
        let backend = Arc::new(SqliteHealthBackend::open_in_memory().unwrap());
        let registrar = HealthRegistrar::for_tests(
            backend,
            NodeIdentity::generate("localhost"),
            Arc::new(NodeVitals::new()),
        );
        let status = registrar.check_health(&strategy).await;
        assert!(status.healthy);
        assert!(status.error.is_none());
        assert!(status.available_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_lease_strategy_poll() {
        let backend = Arc::new(SqliteHealthBackend::open_in_memory().unwrap());
        let vitals = Arc::new(NodeVitals::new());
        let registrar = Arc::new(HealthRegistrar::for_tests(
            backend,
            NodeIdentity::generate("node-a"),
            vitals,
        ));
        let strategy = LeaseStrategy::new(registrar);

        assert!(strategy.poll_leadership().await);
        assert!(!strategy.gates_auxiliary_work());
        assert_eq!(strategy.member_addresses().await.unwrap(), None);

        let mut status = HealthStatus::default();
        strategy.describe(&mut status).await.unwrap();
        assert!(status.is_active_node);
        assert!(status.consensus.is_none());
    }
}
