//! Node and pod snapshot types
//!
//! These mirror what the cluster reports; the engine treats them as a
//! read-only snapshot per cycle and never as authoritative in-process
//! state.

use serde::{Deserialize, Serialize};

use crate::ResourceVector;

/// A cluster machine with finite GPU/CPU/memory capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node name
    pub name: String,
    /// Total capacity as reported by the cluster
    pub capacity: ResourceVector,
    /// Schedulable capacity (capacity minus system reservations)
    pub allocatable: ResourceVector,
}

impl Node {
    /// Create a node whose allocatable figure equals its capacity
    pub fn new(name: impl Into<String>, capacity: ResourceVector) -> Self {
        Self {
            name: name.into(),
            capacity,
            allocatable: capacity,
        }
    }
}

/// A resource-consuming pod scheduled to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    /// Pod name
    pub name: String,
    /// Namespace the pod lives in
    pub namespace: String,
    /// Node the pod is scheduled to
    pub node_name: String,
    /// Current phase
    pub phase: PodPhase,
    /// Owning job key (`namespace/name`), when the pod belongs to a job
    pub owner_job: Option<String>,
    /// Per-container declared resource requests
    pub containers: Vec<ContainerSpec>,
}

impl Pod {
    /// The pod key: `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Sum of declared container requests
    pub fn requests(&self) -> ResourceVector {
        self.containers
            .iter()
            .fold(ResourceVector::ZERO, |acc, c| acc.plus(&c.requests))
    }

    /// Whether the pod currently counts against node capacity
    pub fn consumes_resources(&self) -> bool {
        matches!(self.phase, PodPhase::Running | PodPhase::Pending)
    }
}

/// A container within a pod, carrying its declared requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Declared resource requests
    pub requests: ResourceVector,
}

/// Pod phase as reported by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodPhase {
    /// Scheduled but not yet running
    Pending,
    /// Running on its node
    Running,
    /// Exited abnormally
    Failed,
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Failed => write!(f, "Failed"),
        }
    }
}
