use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MedicError {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("audit store error: {0}")]
    AuditStore(String),

    #[error("decision record not found: {0}")]
    DecisionNotFound(String),

    #[error("signal '{signal}' unavailable: {reason}")]
    SignalUnavailable { signal: String, reason: String },

    #[error("execution surface error: {0}")]
    Execution(String),

    #[error("partition backend error: {0}")]
    PartitionBackend(String),

    #[error("failed to spawn '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MedicError>;
