//! hakeeper Error Types

use thiserror::Error;

/// Result type alias for hakeeper operations
pub type Result<T> = std::result::Result<T, Error>;

/// hakeeper error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    // Snapshot errors
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Snapshot {id} failed checksum verification (stored: {stored:#018x}, computed: {computed:#018x})")]
    SnapshotCorrupted { id: String, stored: u64, computed: u64 },

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Consensus errors
    #[error("Consensus engine error: {0}")]
    Consensus(String),

    // External collaborators
    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is transient; the next scheduler tick retries it
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Store(_) | Error::Network(_)
        )
    }

    /// Check if this error means stored data must not be trusted
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Error::SnapshotCorrupted { .. })
    }
}
