//! Error types for gpulet

use thiserror::Error;

/// Main error type for gpulet
#[derive(Error, Debug)]
pub enum GpuletError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cluster state read failed
    #[error("Cluster state error: {0}")]
    Cluster(String),

    /// Job status write-back failed
    #[error("Status update failed for {job}: {reason}")]
    StatusUpdate { job: String, reason: String },

    /// Pod eviction request failed
    #[error("Eviction failed for pod {pod}: {reason}")]
    Eviction { pod: String, reason: String },

    /// Not enough of one resource dimension anywhere in the cluster
    #[error("Insufficient {resource}: {available} available < {requested} requested")]
    InsufficientResources {
        resource: &'static str,
        requested: u64,
        available: u64,
    },

    /// No single node can accommodate the job
    #[error("No feasible node: {0}")]
    NoFeasibleNode(String),

    /// No allocation recorded for the job
    #[error("No allocation found for job: {0}")]
    AllocationNotFound(String),

    /// An allocation is already recorded for the job
    #[error("Allocation already exists for job: {0}")]
    AllocationExists(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Malformed job or request field
    #[error("Invalid job: field '{field}' {reason}")]
    InvalidJob { field: &'static str, reason: String },

    /// Committed-resource arithmetic went negative
    #[error("Resource accounting underflow in {resource}: {detail}")]
    AccountingUnderflow {
        resource: &'static str,
        detail: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GpuletError {
    /// Whether this error means "not enough capacity right now".
    ///
    /// Infeasible jobs stay Pending and are retried on the next pass;
    /// every other error is surfaced to the caller.
    pub fn is_infeasible(&self) -> bool {
        matches!(
            self,
            GpuletError::InsufficientResources { .. } | GpuletError::NoFeasibleNode(_)
        )
    }
}

/// Result type for gpulet operations
pub type GpuletResult<T> = Result<T, GpuletError>;

impl From<serde_json::Error> for GpuletError {
    fn from(err: serde_json::Error) -> Self {
        GpuletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuletError {
    fn from(err: toml::de::Error) -> Self {
        GpuletError::Config(err.to_string())
    }
}
