//! Cluster state trait definitions

use async_trait::async_trait;
use gpulet_core::{GpuletResult, Job, Node, Pod};

/// Filter for pod listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodFilter {
    /// All pods in the cluster
    All,
    /// Pods scheduled to a specific node
    OnNode(String),
    /// Pods owned by a specific job (`namespace/name`)
    OwnedBy(String),
}

/// Read/write abstraction over live cluster state.
///
/// Reads must reflect a consistent-enough snapshot; staleness on the
/// order of seconds is tolerated by the engine. Failures propagate
/// unchanged, with no retry at this layer.
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// List all nodes with their capacity and allocatable figures
    async fn list_nodes(&self) -> GpuletResult<Vec<Node>>;

    /// List pods matching the filter
    async fn list_pods(&self, filter: &PodFilter) -> GpuletResult<Vec<Pod>>;

    /// Persist a job's status sub-resource.
    ///
    /// A failure here means the admission (or release) did not happen;
    /// callers must roll back any local state they changed first.
    async fn update_job_status(&self, job: &Job) -> GpuletResult<()>;

    /// Request removal of a pod to induce external rescheduling
    async fn evict_pod(&self, pod: &Pod) -> GpuletResult<()>;
}
