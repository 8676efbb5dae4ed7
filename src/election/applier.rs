//! Consensus State Machine
//!
//! The consensus engine applies committed commands through a
//! [`StateApplier`] and persists the applier's state in the snapshot
//! store. [`HealthReportApplier`] is the state machine this crate hands
//! to the engine: it records the health reports followers send to the
//! leader.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::snapshot::{FileSnapshotStore, SnapshotDescriptor};

/// Operation name of a follower health report
pub const HEALTH_REPORT_OP: &str = "health-report";

/// State machine driven by the consensus engine
pub trait StateApplier: Send + Sync {
    /// Apply one committed command
    fn apply(&self, op: &str, payload: &[u8]) -> Result<Vec<u8>>;

    /// Serialize the full state
    fn snapshot(&self) -> Result<Vec<u8>>;

    /// Replace the full state from a snapshot
    fn restore(&self, reader: &mut dyn Read) -> Result<()>;
}

/// A follower announcing itself to the leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub token: String,
    pub bind: String,
    pub advertise: String,
    pub reported_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(token: &str, bind: &str, advertise: &str) -> Self {
        Self {
            token: token.to_string(),
            bind: bind.to_string(),
            advertise: advertise.to_string(),
            reported_at: Utc::now(),
        }
    }

    /// Encode as a command payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Latest health report per follower token
#[derive(Debug, Default)]
pub struct HealthReportApplier {
    reports: RwLock<HashMap<String, HealthReport>>,
}

impl HealthReportApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All known reports, ordered by token
    pub fn reports(&self) -> Vec<HealthReport> {
        let reports = match self.reports.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut all: Vec<HealthReport> = reports.values().cloned().collect();
        all.sort_by(|a, b| a.token.cmp(&b.token));
        all
    }

    /// Write the current state into a new snapshot and finalize it
    pub fn persist(
        &self,
        store: &FileSnapshotStore,
        index: u64,
        term: u64,
        peers: Vec<String>,
    ) -> Result<SnapshotDescriptor> {
        let state = self.snapshot()?;
        let mut sink = store.create(index, term, peers)?;

        if let Err(e) = sink.write_all(&state) {
            let _ = sink.cancel();
            return Err(Error::Io(e));
        }
        sink.close()?;
        Ok(sink.descriptor().clone())
    }

    /// Restore from the newest snapshot that passes verification
    ///
    /// Corrupt snapshots are skipped in favour of older ones.
    pub fn recover(&self, store: &FileSnapshotStore) -> Result<Option<SnapshotDescriptor>> {
        for candidate in store.list()? {
            match store.open(&candidate.id) {
                Ok((meta, mut reader)) => {
                    self.restore(&mut reader)?;
                    tracing::info!(
                        "Restored {} health reports from snapshot {}",
                        self.reports().len(),
                        meta.id
                    );
                    return Ok(Some(meta));
                }
                Err(e) if e.is_integrity_failure() => {
                    tracing::error!("Skipping snapshot {}: {}", candidate.id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

impl StateApplier for HealthReportApplier {
    fn apply(&self, op: &str, payload: &[u8]) -> Result<Vec<u8>> {
        match op {
            HEALTH_REPORT_OP => {
                let report: HealthReport = serde_json::from_slice(payload)?;
                tracing::debug!("Health report from {} ({})", report.token, report.advertise);
                let mut reports = self
                    .reports
                    .write()
                    .map_err(|_| Error::Internal("health report lock poisoned".into()))?;
                reports.insert(report.token.clone(), report);
                Ok(Vec::new())
            }
            other => Err(Error::Consensus(format!("Unknown command: {}", other))),
        }
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.reports())?)
    }

    fn restore(&self, reader: &mut dyn Read) -> Result<()> {
        let restored: Vec<HealthReport> = serde_json::from_reader(reader)?;
        let mut reports = self
            .reports
            .write()
            .map_err(|_| Error::Internal("health report lock poisoned".into()))?;
        *reports = restored
            .into_iter()
            .map(|report| (report.token.clone(), report))
            .collect();
        Ok(())
    }
}
