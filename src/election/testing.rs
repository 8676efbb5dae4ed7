//! Scripted consensus engine for tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::applier::{HealthReport, StateApplier, HEALTH_REPORT_OP};
use super::consensus::ConsensusEngine;
use crate::error::{Error, Result};
use crate::snapshot::FileSnapshotStore;

/// In-process engine whose leadership is set by the test
#[derive(Default)]
pub struct ScriptedEngine {
    pub leader: AtomicBool,
    pub quorum: AtomicBool,
    pub fail_setup: AtomicBool,
    pub setup_calls: AtomicUsize,
    pub yields: AtomicUsize,
    pub members: Mutex<Vec<String>>,
    pub peers: Mutex<Vec<String>>,
    pub reports: Mutex<Vec<(String, String, String)>>,
    applier: Mutex<Option<Arc<dyn StateApplier>>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
        if leader {
            self.quorum.store(true, Ordering::SeqCst);
        }
    }

    pub fn set_members(&self, members: &[&str]) {
        *self.members.lock().unwrap() = members.iter().map(|m| m.to_string()).collect();
    }

    pub fn set_peers(&self, peers: &[&str]) {
        *self.peers.lock().unwrap() = peers.iter().map(|m| m.to_string()).collect();
    }
}

#[async_trait]
impl ConsensusEngine for ScriptedEngine {
    fn is_enabled(&self) -> bool {
        self.setup_calls.load(Ordering::SeqCst) > 0
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn current_leader_id(&self) -> String {
        if self.is_leader() {
            "self".to_string()
        } else {
            "other".to_string()
        }
    }

    fn leader_uri(&self) -> String {
        "http://leader:3000".to_string()
    }

    fn is_part_of_quorum(&self) -> bool {
        self.quorum.load(Ordering::SeqCst)
    }

    fn healthy_members(&self) -> Vec<String> {
        self.members.lock().unwrap().clone()
    }

    async fn peer_addresses(&self) -> Result<Vec<String>> {
        Ok(self.peers.lock().unwrap().clone())
    }

    fn yield_leadership(&self) -> Result<()> {
        self.yields.fetch_add(1, Ordering::SeqCst);
        self.leader.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn setup(
        &self,
        applier: Arc<dyn StateApplier>,
        _snapshots: Arc<FileSnapshotStore>,
        _self_identity: &str,
    ) -> Result<()> {
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(Error::Consensus("scripted setup failure".into()));
        }
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        *self.applier.lock().unwrap() = Some(applier);
        Ok(())
    }

    async fn monitor(&self) {}

    async fn on_health_report(&self, token: &str, bind: &str, advertise: &str) -> Result<()> {
        self.reports
            .lock()
            .unwrap()
            .push((token.to_string(), bind.to_string(), advertise.to_string()));

        let applier = self.applier.lock().unwrap().clone();
        if let Some(applier) = applier {
            let payload = HealthReport::new(token, bind, advertise).encode()?;
            applier.apply(HEALTH_REPORT_OP, &payload)?;
        }
        Ok(())
    }
}
