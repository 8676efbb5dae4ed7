//! Keeper
//!
//! Builds the store backend, registrar, election strategy and scheduler
//! from a configuration and runs them.

use std::sync::Arc;

use crate::config::{KeeperConfig, StoreKind, StrategyKind};
use crate::election::{
    ConsensusEngine, ConsensusStrategy, ElectionCoordinator, ElectionStrategy, HealthReportApplier,
    LeaseStrategy, NodeVitals,
};
use crate::error::{Error, Result};
use crate::health::{
    HealthBackend, HealthRegistrar, MySqlHealthBackend, NodeIdentity, RegistrarSettings,
    SqliteHealthBackend,
};
use crate::scheduler::Scheduler;
use crate::snapshot::FileSnapshotStore;
use crate::system;

/// A fully wired node
pub struct Keeper {
    config: Arc<KeeperConfig>,
    registrar: Arc<HealthRegistrar>,
    coordinator: Arc<ElectionCoordinator>,
}

impl Keeper {
    /// Wire a node from its configuration
    ///
    /// The consensus strategy needs an engine supplied by the hosting
    /// application; `engine` is ignored under the lease strategy.
    pub async fn build(config: KeeperConfig, engine: Option<Arc<dyn ConsensusEngine>>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let hostname = match &config.node.hostname {
            Some(name) => name.clone(),
            None => system::this_hostname()?,
        };
        let identity = NodeIdentity::generate(hostname);
        tracing::info!("Node identity: {}", identity);

        let backend = open_backend(&config).await?;
        let vitals = Arc::new(NodeVitals::new());
        let registrar = Arc::new(HealthRegistrar::new(
            backend,
            identity.clone(),
            Arc::clone(&vitals),
            RegistrarSettings::from_config(&config),
        ));

        let strategy: Arc<dyn ElectionStrategy> = match config.election.strategy {
            StrategyKind::Lease => Arc::new(LeaseStrategy::new(Arc::clone(&registrar))),
            StrategyKind::Consensus => {
                let engine = engine.ok_or_else(|| {
                    Error::Config("consensus strategy requires a consensus engine".into())
                })?;
                let snapshots = Arc::new(FileSnapshotStore::new(config.data_dir(), config.snapshot.retain)?);
                Arc::new(ConsensusStrategy::new(
                    engine,
                    vitals,
                    Arc::new(HealthReportApplier::new()),
                    snapshots,
                    identity,
                    &config.election,
                ))
            }
        };

        let coordinator = Arc::new(ElectionCoordinator::new(strategy, Arc::clone(&registrar)));
        Ok(Self {
            config,
            registrar,
            coordinator,
        })
    }

    pub fn coordinator(&self) -> &Arc<ElectionCoordinator> {
        &self.coordinator
    }

    pub fn registrar(&self) -> &Arc<HealthRegistrar> {
        &self.registrar
    }

    /// Start continuous registration, then run the scheduler
    pub async fn run(&self) -> Result<()> {
        self.registrar
            .start_continuous_registration(&self.config.node.execution_mode, &self.config.node.command)
            .await;

        Scheduler::new(Arc::clone(&self.config), Arc::clone(&self.coordinator))
            .run()
            .await
    }
}

async fn open_backend(config: &KeeperConfig) -> Result<Arc<dyn HealthBackend>> {
    match config.database.backend {
        StoreKind::Mysql => Ok(Arc::new(MySqlHealthBackend::connect(&config.database).await?)),
        StoreKind::Sqlite => {
            let path = config.sqlite_path();
            tracing::info!("Using embedded health store at {}", path.display());
            Ok(Arc::new(SqliteHealthBackend::open(&path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::testing::ScriptedEngine;
    use crate::snapshot::SNAPSHOT_DIR;
    use tempfile::tempdir;

    fn config(data_dir: &std::path::Path, strategy: &str) -> KeeperConfig {
        let toml = format!(
            r#"
[node]
hostname = "localhost"
data_dir = "{}"

[database]
backend = "sqlite"

[election]
strategy = "{}"
consensus_bind = "127.0.0.1:10008"
consensus_nodes = ["127.0.0.1:10008"]
"#,
            data_dir.display(),
            strategy
        );
        KeeperConfig::from_str(&toml).unwrap()
    }

    #[tokio::test]
    async fn test_build_lease_node() {
        let dir = tempdir().unwrap();
        let keeper = Keeper::build(config(dir.path(), "lease"), None).await.unwrap();

        assert_eq!(keeper.coordinator().kind(), StrategyKind::Lease);
        assert_eq!(keeper.registrar().identity().hostname, "localhost");
        assert!(dir.path().join("keeper.db").exists());

        keeper.coordinator().refresh_leadership().await;
        assert!(keeper.coordinator().is_leader());
    }

    #[tokio::test]
    async fn test_consensus_requires_engine() {
        let dir = tempdir().unwrap();
        assert!(Keeper::build(config(dir.path(), "consensus"), None).await.is_err());

        let engine = ScriptedEngine::new();
        let keeper = Keeper::build(config(dir.path(), "consensus"), Some(engine))
            .await
            .unwrap();
        assert_eq!(keeper.coordinator().kind(), StrategyKind::Consensus);
        assert!(dir.path().join(SNAPSHOT_DIR).is_dir());
    }
}
