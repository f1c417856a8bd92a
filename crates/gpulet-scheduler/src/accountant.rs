//! Resource accountant: engine-held commitments against cluster capacity
//!
//! The cluster's own state is ground truth for current usage, but not for
//! commitments the engine has made that the cluster has not reflected yet.
//! The allocation table here is the engine's only durable memory of those
//! promises; every admission subtracts both live pod usage and the table
//! before comparing against what a job requests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gpulet_cluster::{ClusterState, PodFilter};
use gpulet_core::{GpuletError, GpuletResult, Job, JobStatus, ResourceVector};

/// Fixed lifetime of an allocation before the expiry sweep reclaims it.
const ALLOCATION_TTL_HOURS: i64 = 24;

/// An engine-held commitment of resources to a job.
///
/// Independent of the cluster's usage reporting; created by
/// [`ResourceAccountant::allocate`], never mutated in place apart from its
/// placement binding, destroyed by release or expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    /// Unique allocation identity
    pub id: Uuid,
    /// Namespace of the owning job
    pub namespace: String,
    /// Name of the owning job
    pub name: String,
    /// Committed resource vector
    pub resources: ResourceVector,
    /// Placement target, once the balancer has chosen one
    pub node: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp (creation + 24h)
    pub expires_at: DateTime<Utc>,
}

impl Allocation {
    /// The owning job's key: `namespace/name`
    pub fn job_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Whether the allocation is past its expiry horizon at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Counter snapshot for the monitoring subsystem
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountantMetrics {
    /// Allocations granted since start
    pub granted: u64,
    /// Allocations released since start
    pub released: u64,
    /// Failed allocation attempts (infeasible or rolled back)
    pub failed: u64,
    /// Allocations reclaimed by the expiry sweep
    pub expired: u64,
    /// Currently held allocations
    pub active: usize,
}

struct AccountantState {
    allocations: HashMap<String, Allocation>,
    granted: u64,
    released: u64,
    failed: u64,
    expired: u64,
}

/// Tracks resource commitments and decides cluster-wide admission.
pub struct ResourceAccountant {
    cluster: Arc<dyn ClusterState>,
    inner: RwLock<AccountantState>,
}

impl ResourceAccountant {
    /// Create an accountant over the given cluster view
    pub fn new(cluster: Arc<dyn ClusterState>) -> Self {
        Self {
            cluster,
            inner: RwLock::new(AccountantState {
                allocations: HashMap::new(),
                granted: 0,
                released: 0,
                failed: 0,
                expired: 0,
            }),
        }
    }

    /// Commit resources for a job, cluster-wide.
    ///
    /// Re-reads the cluster, computes available = Σ allocatable − live pod
    /// usage − already-committed allocations, and checks the request
    /// dimension by dimension in the fixed order GPU, CPU, memory. The
    /// first shortfall aborts with an error naming that dimension.
    ///
    /// On success the job advances to Starting and the new status is
    /// persisted. A failed status write rolls the allocation back before
    /// returning: either both the commitment and the status exist, or
    /// neither does.
    pub async fn allocate(&self, job: &mut Job) -> GpuletResult<Allocation> {
        let requested = job.resources.to_vector();
        let key = job.key();

        let nodes = self.cluster.list_nodes().await?;
        let pods = self.cluster.list_pods(&PodFilter::All).await?;

        let total = nodes
            .iter()
            .fold(ResourceVector::ZERO, |acc, n| acc.plus(&n.allocatable));
        let live = pods
            .iter()
            .filter(|p| p.consumes_resources())
            .fold(ResourceVector::ZERO, |acc, p| acc.plus(&p.requests()));

        let now = Utc::now();
        let allocation = {
            let mut state = self.inner.write().await;
            if state.allocations.contains_key(&key) {
                return Err(GpuletError::AllocationExists(key));
            }

            let committed = committed_total(&state.allocations, now);
            let available = match total
                .checked_sub(&live)
                .and_then(|v| v.checked_sub(&committed))
            {
                Ok(available) => available,
                Err(e) => {
                    state.failed += 1;
                    return Err(e);
                }
            };

            if let Err(e) = check_dimensions(&requested, &available) {
                state.failed += 1;
                debug!(job = %key, requested = %requested, available = %available, "Allocation refused");
                return Err(e);
            }

            let allocation = Allocation {
                id: Uuid::new_v4(),
                namespace: job.namespace.clone(),
                name: job.name.clone(),
                resources: requested,
                node: None,
                created_at: now,
                expires_at: now + Duration::hours(ALLOCATION_TTL_HOURS),
            };
            state.allocations.insert(key.clone(), allocation.clone());
            allocation
        };

        let prev_status = job.status;
        let prev_started = job.started_at;
        job.status = JobStatus::Starting;
        job.started_at = Some(now);

        if let Err(e) = self.cluster.update_job_status(job).await {
            // The admission did not happen: unwind the commitment.
            let mut state = self.inner.write().await;
            state.allocations.remove(&key);
            state.failed += 1;
            job.status = prev_status;
            job.started_at = prev_started;
            warn!(job = %key, error = %e, "Status write failed, allocation rolled back");
            return Err(e);
        }

        let mut state = self.inner.write().await;
        state.granted += 1;
        info!(
            job = %key,
            resources = %requested,
            allocation_id = %allocation.id,
            "Resources allocated"
        );
        Ok(allocation)
    }

    /// Attach a placement target to the job's allocation (replace-on-change)
    pub async fn bind(&self, job_key: &str, node: &str) -> GpuletResult<Allocation> {
        let mut state = self.inner.write().await;
        let allocation = state
            .allocations
            .get_mut(job_key)
            .ok_or_else(|| GpuletError::AllocationNotFound(job_key.to_string()))?;
        allocation.node = Some(node.to_string());
        debug!(job = %job_key, node = %node, "Allocation bound");
        Ok(allocation.clone())
    }

    /// Release a job's allocation and advance its status to Terminated.
    ///
    /// Releasing a job with no recorded allocation is a caller bug and
    /// leaves the table untouched. A failed status write reinstates the
    /// allocation before returning.
    pub async fn release(&self, job: &mut Job) -> GpuletResult<Allocation> {
        let key = job.key();
        let removed = {
            let mut state = self.inner.write().await;
            state
                .allocations
                .remove(&key)
                .ok_or_else(|| GpuletError::AllocationNotFound(key.clone()))?
        };

        let prev_status = job.status;
        job.status = JobStatus::Terminated;

        if let Err(e) = self.cluster.update_job_status(job).await {
            let mut state = self.inner.write().await;
            state.allocations.insert(key.clone(), removed);
            job.status = prev_status;
            warn!(job = %key, error = %e, "Status write failed, allocation reinstated");
            return Err(e);
        }

        let mut state = self.inner.write().await;
        state.released += 1;
        info!(job = %key, resources = %removed.resources, "Resources released");
        Ok(removed)
    }

    /// Remove allocations past their expiry horizon, returning them
    pub async fn sweep_expired(&self) -> Vec<Allocation> {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Expiry sweep against an explicit clock
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Vec<Allocation> {
        let mut state = self.inner.write().await;
        let expired_keys: Vec<String> = state
            .allocations
            .iter()
            .filter(|(_, a)| a.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(allocation) = state.allocations.remove(&key) {
                removed.push(allocation);
            }
        }
        state.expired += removed.len() as u64;

        if !removed.is_empty() {
            warn!(count = removed.len(), "Expired allocations swept");
        }
        removed
    }

    /// Snapshot of all held allocations
    pub async fn allocations(&self) -> Vec<Allocation> {
        self.inner.read().await.allocations.values().cloned().collect()
    }

    /// Sum of unexpired commitments bound to each node
    pub async fn committed_by_node(&self) -> HashMap<String, ResourceVector> {
        let now = Utc::now();
        let state = self.inner.read().await;
        let mut by_node: HashMap<String, ResourceVector> = HashMap::new();
        for allocation in state.allocations.values() {
            if allocation.is_expired(now) {
                continue;
            }
            if let Some(node) = &allocation.node {
                let entry = by_node.entry(node.clone()).or_insert(ResourceVector::ZERO);
                *entry = entry.plus(&allocation.resources);
            }
        }
        by_node
    }

    /// Sum of all unexpired commitments, cluster-wide
    pub async fn committed_total(&self) -> ResourceVector {
        let state = self.inner.read().await;
        committed_total(&state.allocations, Utc::now())
    }

    /// Counter snapshot
    pub async fn metrics(&self) -> AccountantMetrics {
        let state = self.inner.read().await;
        AccountantMetrics {
            granted: state.granted,
            released: state.released,
            failed: state.failed,
            expired: state.expired,
            active: state.allocations.len(),
        }
    }
}

fn committed_total(
    allocations: &HashMap<String, Allocation>,
    now: DateTime<Utc>,
) -> ResourceVector {
    allocations
        .values()
        .filter(|a| !a.is_expired(now))
        .fold(ResourceVector::ZERO, |acc, a| acc.plus(&a.resources))
}

/// Fixed-order dimension check: GPU, then CPU, then memory.
fn check_dimensions(
    requested: &ResourceVector,
    available: &ResourceVector,
) -> GpuletResult<()> {
    if requested.gpus > available.gpus {
        return Err(GpuletError::InsufficientResources {
            resource: "gpu",
            requested: u64::from(requested.gpus),
            available: u64::from(available.gpus),
        });
    }
    if requested.cpu_millis > available.cpu_millis {
        return Err(GpuletError::InsufficientResources {
            resource: "cpu",
            requested: requested.cpu_millis,
            available: available.cpu_millis,
        });
    }
    if requested.memory_bytes > available.memory_bytes {
        return Err(GpuletError::InsufficientResources {
            resource: "memory",
            requested: requested.memory_bytes,
            available: available.memory_bytes,
        });
    }
    Ok(())
}
