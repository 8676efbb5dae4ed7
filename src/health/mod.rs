//! Health Registration
//!
//! Every node writes a health row to the shared store on each poll
//! interval. Under the lease strategy the same store holds the anchor
//! row naming the active node.

pub mod backend;
pub mod mysql;
pub mod node;
pub mod registrar;
pub mod sqlite;

pub use backend::HealthBackend;
pub use mysql::{MySqlHealthBackend, MYSQL_SCHEMA};
pub use node::{ActiveNodeRecord, ConsensusStatus, HealthStatus, NodeHealth, NodeIdentity};
pub use registrar::{HealthRegistrar, RegistrarSettings};
pub use sqlite::SqliteHealthBackend;
