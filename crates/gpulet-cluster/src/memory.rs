//! In-memory cluster state
//!
//! Holds node and pod reports pushed through the API (or constructed
//! directly in tests) and records the job statuses and evictions the
//! engine writes back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use gpulet_core::{GpuletError, GpuletResult, Job, JobStatus, Node, Pod};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::state::{ClusterState, PodFilter};

/// In-memory implementation of [`ClusterState`].
///
/// Nodes and pods are upserted by key, heartbeat-style: a repeated report
/// replaces the previous snapshot entry. Status writes and evictions are
/// recorded so callers (and tests) can observe them.
#[derive(Default)]
pub struct InMemoryCluster {
    nodes: RwLock<HashMap<String, Node>>,
    pods: RwLock<HashMap<String, Pod>>,
    job_statuses: RwLock<HashMap<String, JobStatus>>,
    evicted: RwLock<Vec<String>>,
    /// When set, `update_job_status` fails; used to exercise rollback paths.
    fail_status_updates: AtomicBool,
}

impl InMemoryCluster {
    /// Create an empty cluster view
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node report
    pub async fn upsert_node(&self, node: Node) {
        debug!(node = %node.name, capacity = %node.capacity, "Node reported");
        self.nodes.write().await.insert(node.name.clone(), node);
    }

    /// Remove a node from the view
    pub async fn remove_node(&self, name: &str) -> GpuletResult<()> {
        self.nodes
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| GpuletError::NodeNotFound(name.to_string()))
    }

    /// Insert or replace a pod report
    pub async fn report_pod(&self, pod: Pod) {
        debug!(pod = %pod.key(), node = %pod.node_name, phase = %pod.phase, "Pod reported");
        self.pods.write().await.insert(pod.key(), pod);
    }

    /// Remove a pod from the view
    pub async fn remove_pod(&self, key: &str) {
        self.pods.write().await.remove(key);
    }

    /// Number of nodes currently reported
    pub async fn node_count(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// The last status the engine wrote for a job, if any
    pub async fn job_status(&self, key: &str) -> Option<JobStatus> {
        self.job_statuses.read().await.get(key).copied()
    }

    /// Pod keys evicted so far, in eviction order
    pub async fn evicted_pods(&self) -> Vec<String> {
        self.evicted.read().await.clone()
    }

    /// Make subsequent status writes fail (or succeed again)
    pub fn set_fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterState for InMemoryCluster {
    async fn list_nodes(&self) -> GpuletResult<Vec<Node>> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    async fn list_pods(&self, filter: &PodFilter) -> GpuletResult<Vec<Pod>> {
        let pods = self.pods.read().await;
        let matched = pods
            .values()
            .filter(|p| match filter {
                PodFilter::All => true,
                PodFilter::OnNode(node) => &p.node_name == node,
                PodFilter::OwnedBy(job) => p.owner_job.as_deref() == Some(job.as_str()),
            })
            .cloned()
            .collect();
        Ok(matched)
    }

    async fn update_job_status(&self, job: &Job) -> GpuletResult<()> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(GpuletError::StatusUpdate {
                job: job.key(),
                reason: "status sink unavailable".to_string(),
            });
        }
        self.job_statuses.write().await.insert(job.key(), job.status);
        Ok(())
    }

    async fn evict_pod(&self, pod: &Pod) -> GpuletResult<()> {
        let key = pod.key();
        let removed = self.pods.write().await.remove(&key);
        if removed.is_none() {
            return Err(GpuletError::Eviction {
                pod: key,
                reason: "pod not found".to_string(),
            });
        }
        info!(pod = %key, node = %pod.node_name, "Pod evicted");
        self.evicted.write().await.push(key);
        Ok(())
    }
}
