//! Error types for configuration and state persistence.
//!
//! Collaborator failures (GitHub, agent process) are carried as
//! `anyhow::Error` and isolated per item by the reconciler; only the errors
//! below have typed variants because callers branch on them.

use std::path::PathBuf;
use thiserror::Error;

/// Startup configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no configuration path given and no config directory could be determined")]
    NoDefaultPath,
}

/// Errors persisting the state store.
///
/// Loading never fails: an unreadable store is replaced by an empty one.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write state file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}
