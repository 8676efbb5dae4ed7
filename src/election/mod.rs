//! Leader Election
//!
//! One [`ElectionStrategy`] is chosen at start-up and fixed for the
//! lifetime of the process. The [`ElectionCoordinator`] dispatches every
//! leadership question to it and records the answer in [`NodeVitals`].

pub mod applier;
pub mod consensus;
pub mod coordinator;
pub mod strategy;
pub mod vitals;

#[cfg(test)]
pub(crate) mod testing;

pub use applier::{HealthReport, HealthReportApplier, StateApplier};
pub use consensus::ConsensusEngine;
pub use coordinator::ElectionCoordinator;
pub use strategy::{ConsensusStrategy, ElectionStrategy, LeaseStrategy};
pub use vitals::NodeVitals;
