//! Engine facade: the three components wired over one cluster view

use std::sync::Arc;

use serde::Serialize;

use gpulet_cluster::ClusterState;
use gpulet_core::{GpuletResult, Job};

use crate::accountant::{AccountantMetrics, Allocation, ResourceAccountant};
use crate::balancer::{BalancerMetrics, LoadBalancer, NodeStats, RebalanceReport};
use crate::scheduler::{Scheduler, SchedulerMetrics};

/// Combined counter snapshot across all three components
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    /// Scheduler counters
    pub scheduler: SchedulerMetrics,
    /// Accountant counters
    pub accountant: AccountantMetrics,
    /// Balancer counters
    pub balancer: BalancerMetrics,
}

/// The scheduling engine: queue, accountant, and balancer over a shared
/// [`ClusterState`] view.
///
/// All snapshot accessors return defensive copies; callers never see the
/// live tables.
pub struct Engine {
    accountant: Arc<ResourceAccountant>,
    balancer: Arc<LoadBalancer>,
    scheduler: Arc<Scheduler>,
}

impl Engine {
    /// Wire up an engine over the given cluster view
    pub fn new(cluster: Arc<dyn ClusterState>) -> Self {
        let accountant = Arc::new(ResourceAccountant::new(cluster.clone()));
        let balancer = Arc::new(LoadBalancer::new(cluster, accountant.clone()));
        let scheduler = Arc::new(Scheduler::new(accountant.clone(), balancer.clone()));
        Self {
            accountant,
            balancer,
            scheduler,
        }
    }

    /// Submit a job and drive one admission pass
    pub async fn submit(&self, job: Job) -> GpuletResult<()> {
        self.scheduler.submit(job).await
    }

    /// Release a job's allocation and mark it Terminated
    pub async fn release(&self, namespace: &str, name: &str) -> GpuletResult<Allocation> {
        let mut job = Job::new(namespace, name);
        self.accountant.release(&mut job).await
    }

    /// Retry admission for everything still pending
    pub async fn run_admission_pass(&self) -> GpuletResult<usize> {
        self.scheduler.run_admission_pass().await
    }

    /// Run one rebalance cycle
    pub async fn rebalance(&self) -> GpuletResult<RebalanceReport> {
        self.balancer.rebalance().await
    }

    /// Reclaim allocations past their expiry horizon
    pub async fn sweep_expired_allocations(&self) -> usize {
        self.accountant.sweep_expired().await.len()
    }

    /// Snapshot of held allocations
    pub async fn allocations(&self) -> Vec<Allocation> {
        self.accountant.allocations().await
    }

    /// Snapshot of the last computed node stats
    pub async fn node_stats(&self) -> Vec<NodeStats> {
        self.balancer.node_stats().await
    }

    /// Number of jobs waiting for admission
    pub async fn queue_length(&self) -> usize {
        self.scheduler.queue_length().await
    }

    /// Snapshot of the pending queue
    pub async fn pending_jobs(&self) -> Vec<Job> {
        self.scheduler.pending_jobs().await
    }

    /// Combined counter snapshot
    pub async fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            scheduler: self.scheduler.metrics().await,
            accountant: self.accountant.metrics().await,
            balancer: self.balancer.metrics().await,
        }
    }
}
