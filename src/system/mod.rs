//! System Collaborators
//!
//! Thin wrappers over the operating system: running shell commands
//! and discovering this host's name and addresses.

pub mod command;
pub mod net;

pub use command::{run_command_no_output, run_command_output};
pub use net::{local_ipv4, lookup_host, this_hostname};
