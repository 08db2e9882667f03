//! Error types for the orchestrator

use std::time::Duration;
use thiserror::Error;

/// Orchestrator result type
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur in the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Invalid or inconsistent run configuration (caught before any cloud call)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot does not exist in the queried account/region
    #[error("Snapshot {0} not found")]
    SnapshotNotFound(String),

    /// DB instance does not exist in the queried account/region
    #[error("DB instance {0} not found")]
    InstanceNotFound(String),

    /// KMS alias could not be found on any page of the alias listing
    #[error("KMS key alias {0} not found")]
    KeyAliasNotFound(String),

    /// KMS rejected the key policy document
    #[error("Malformed key policy for {key_id}")]
    MalformedPolicy {
        /// Key the policy was written to
        key_id: String,
        /// The rejected document
        policy: String,
    },

    /// Generic AWS service error
    #[error("AWS service error: {0}")]
    AwsService(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A wait loop exceeded its configured deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl OrchestratorError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Convert from generic AWS SDK error
    pub fn from_aws<E>(err: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::AwsService(err.to_string())
    }

    /// True for the "resource is absent" variants used by existence checks
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SnapshotNotFound(_) | Self::InstanceNotFound(_)
        )
    }
}
