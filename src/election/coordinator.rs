//! Election Coordinator

use std::sync::Arc;

use super::strategy::ElectionStrategy;
use super::vitals::NodeVitals;
use crate::config::StrategyKind;
use crate::health::{HealthRegistrar, HealthStatus};

/// Dispatches leadership questions to the configured strategy
pub struct ElectionCoordinator {
    strategy: Arc<dyn ElectionStrategy>,
    registrar: Arc<HealthRegistrar>,
    vitals: Arc<NodeVitals>,
}

impl ElectionCoordinator {
    pub fn new(strategy: Arc<dyn ElectionStrategy>, registrar: Arc<HealthRegistrar>) -> Self {
        let vitals = Arc::clone(registrar.vitals());
        Self {
            strategy,
            registrar,
            vitals,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn strategy(&self) -> &Arc<dyn ElectionStrategy> {
        &self.strategy
    }

    pub fn registrar(&self) -> &Arc<HealthRegistrar> {
        &self.registrar
    }

    pub fn vitals(&self) -> &Arc<NodeVitals> {
        &self.vitals
    }

    /// Whether this node leads
    pub fn is_leader(&self) -> bool {
        self.strategy.is_leader()
    }

    /// Whether this node leads (lease) or is a quorum member (consensus)
    pub fn is_leader_or_member(&self) -> bool {
        self.strategy.is_leader_or_member()
    }

    /// Run one leadership round and record the outcome
    pub async fn refresh_leadership(&self) -> bool {
        let elected = self.strategy.poll_leadership().await;
        self.record_election(elected);
        elected
    }

    /// Replace the elected flag
    pub fn record_election(&self, elected: bool) {
        self.vitals.set_elected(elected);
    }

    /// Cached health status of this node
    pub async fn check_health(&self) -> Arc<HealthStatus> {
        self.registrar.check_health(self.strategy.as_ref()).await
    }
}
