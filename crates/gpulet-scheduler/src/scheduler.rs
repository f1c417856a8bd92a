//! Priority queue and admission passes

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use gpulet_core::{GpuletResult, Job};

use crate::accountant::ResourceAccountant;
use crate::balancer::LoadBalancer;

/// Counter snapshot for the monitoring subsystem
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Jobs accepted into the queue
    pub jobs_submitted: u64,
    /// Jobs admitted (Pending -> Starting)
    pub jobs_scheduled: u64,
    /// Admission attempts that failed for non-capacity reasons
    pub admission_failures: u64,
    /// Moving average of submission-to-admission latency in milliseconds
    pub avg_scheduling_latency_ms: f64,
}

struct SchedulerState {
    pending: Vec<Job>,
    jobs_submitted: u64,
    jobs_scheduled: u64,
    admission_failures: u64,
    avg_latency_ms: f64,
}

/// Orders pending jobs by priority score and drives admission.
///
/// The pending set is a single mutex-guarded collection; an admission pass
/// holds the lock end to end, so jobs are processed strictly in descending
/// score order within a pass (stable on ties, by insertion order).
pub struct Scheduler {
    accountant: Arc<ResourceAccountant>,
    balancer: Arc<LoadBalancer>,
    inner: Mutex<SchedulerState>,
}

impl Scheduler {
    /// Create a scheduler over the given accountant and balancer
    pub fn new(accountant: Arc<ResourceAccountant>, balancer: Arc<LoadBalancer>) -> Self {
        Self {
            accountant,
            balancer,
            inner: Mutex::new(SchedulerState {
                pending: Vec::new(),
                jobs_submitted: 0,
                jobs_scheduled: 0,
                admission_failures: 0,
                avg_latency_ms: 0.0,
            }),
        }
    }

    /// Insert or update a job in the pending set, then drive one full
    /// admission pass before returning.
    ///
    /// A job that cannot currently be admitted stays in the set for the
    /// next pass; no backoff is imposed.
    pub async fn submit(&self, job: Job) -> GpuletResult<()> {
        job.validate()?;

        let mut state = self.inner.lock().await;
        state.jobs_submitted += 1;

        let key = job.key();
        match state.pending.iter_mut().find(|j| j.key() == key) {
            // Update in place: re-submission keeps the original queue
            // position so tie-breaks stay stable.
            Some(existing) => *existing = job,
            None => state.pending.push(job),
        }
        info!(job = %key, queue_length = state.pending.len(), "Job submitted");

        self.admit_pending(&mut state).await.map(|_| ())
    }

    /// Run one admission pass over the current pending set.
    ///
    /// Returns the number of jobs admitted. Called by `submit` and by the
    /// periodic tick; there is no internal retry beyond that.
    pub async fn run_admission_pass(&self) -> GpuletResult<usize> {
        let mut state = self.inner.lock().await;
        self.admit_pending(&mut state).await
    }

    async fn admit_pending(&self, state: &mut SchedulerState) -> GpuletResult<usize> {
        let now = Utc::now();

        // Stable sort: equal scores keep submission order.
        let mut order: Vec<usize> = (0..state.pending.len()).collect();
        order.sort_by_key(|&i| Reverse(state.pending[i].priority_score(now)));

        let mut admitted: HashSet<usize> = HashSet::new();
        let mut pass_error = None;

        for &i in &order {
            let mut job = state.pending[i].clone();
            let key = job.key();
            let score = job.priority_score(now);

            match self.try_admit(&mut job).await {
                Ok(node) => {
                    admitted.insert(i);
                    state.jobs_scheduled += 1;

                    let latency_ms =
                        (Utc::now() - job.submitted_at).num_milliseconds().max(0) as f64;
                    let n = state.jobs_scheduled as f64;
                    state.avg_latency_ms =
                        (state.avg_latency_ms * (n - 1.0) + latency_ms) / n;

                    info!(job = %key, node = %node, score, "Job admitted");
                }
                Err(e) if e.is_infeasible() => {
                    debug!(job = %key, score, reason = %e, "Job not admitted, retained");
                }
                Err(e) => {
                    state.admission_failures += 1;
                    error!(job = %key, error = %e, "Admission failed");
                    pass_error = Some(e);
                    break;
                }
            }
        }

        let mut idx = 0;
        state.pending.retain(|_| {
            let keep = !admitted.contains(&idx);
            idx += 1;
            keep
        });

        match pass_error {
            Some(e) => Err(e),
            None => Ok(admitted.len()),
        }
    }

    /// Admit a single job: placement feasibility first, then the
    /// cluster-wide commitment, then the node binding.
    ///
    /// Committing last means a failure at any step leaves at most one
    /// allocation to unwind, and the accountant already handles that.
    async fn try_admit(&self, job: &mut Job) -> GpuletResult<String> {
        let node = self.balancer.find_optimal_node(job).await?;
        self.accountant.allocate(job).await?;
        self.accountant.bind(&job.key(), &node).await?;
        Ok(node)
    }

    /// Number of jobs waiting for admission
    pub async fn queue_length(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Snapshot of the pending set, in insertion order
    pub async fn pending_jobs(&self) -> Vec<Job> {
        self.inner.lock().await.pending.clone()
    }

    /// Counter snapshot
    pub async fn metrics(&self) -> SchedulerMetrics {
        let state = self.inner.lock().await;
        SchedulerMetrics {
            jobs_submitted: state.jobs_submitted,
            jobs_scheduled: state.jobs_scheduled,
            admission_failures: state.admission_failures,
            avg_scheduling_latency_ms: state.avg_latency_ms,
        }
    }
}
