//! Node Vitals
//!
//! The process-wide liveness flags. Writers replace values with single
//! atomic stores; readers take single atomic loads. No field depends on
//! another, so no broader locking is needed.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Shared liveness state of this node
#[derive(Debug, Default)]
pub struct NodeVitals {
    /// Whether this node currently considers itself elected
    elected: AtomicBool,
    /// Unix millis of the last registration attempt (0 = never)
    last_health_check: AtomicI64,
    /// Unix millis of the last successful registration (0 = never)
    last_good_health_check: AtomicI64,
    /// Outcome of the last continuous registration tick
    continuous_check_healthy: AtomicBool,
}

impl NodeVitals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_elected(&self, elected: bool) {
        self.elected.store(elected, Ordering::SeqCst);
    }

    pub fn is_elected(&self) -> bool {
        self.elected.load(Ordering::SeqCst)
    }

    /// Record a registration attempt and whether it succeeded
    pub fn record_health_check(&self, healthy: bool) {
        let now = Utc::now().timestamp_millis();
        self.last_health_check.store(now, Ordering::SeqCst);
        if healthy {
            self.last_good_health_check.store(now, Ordering::SeqCst);
        }
    }

    /// Time of the last registration attempt
    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.last_health_check.load(Ordering::SeqCst))
    }

    /// Time of the last successful registration
    pub fn last_good_health_check(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.last_good_health_check.load(Ordering::SeqCst))
    }

    /// Time elapsed since the last successful registration.
    /// Zero if no registration has succeeded yet.
    pub fn since_last_good_health(&self) -> Duration {
        match self.last_good_health_check.load(Ordering::SeqCst) {
            0 => Duration::ZERO,
            millis => {
                let elapsed = Utc::now().timestamp_millis() - millis;
                Duration::from_millis(elapsed.max(0) as u64)
            }
        }
    }

    pub fn set_continuous_check_healthy(&self, healthy: bool) {
        self.continuous_check_healthy.store(healthy, Ordering::SeqCst);
    }

    /// Outcome of the last continuous registration tick (exported as a metric)
    pub fn last_continuous_check_healthy(&self) -> bool {
        self.continuous_check_healthy.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn set_last_good_health_ago(&self, ago: Duration) {
        let millis = Utc::now().timestamp_millis() - ago.as_millis() as i64;
        self.last_good_health_check.store(millis, Ordering::SeqCst);
    }
}

fn millis_to_time(millis: i64) -> Option<DateTime<Utc>> {
    match millis {
        0 => None,
        m => DateTime::from_timestamp_millis(m),
    }
}
