//! Load balancer: node scoring, placement, and eviction-based rebalancing

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use gpulet_cluster::{ClusterState, PodFilter};
use gpulet_core::{GpuletError, GpuletResult, Job, Node, Pod, PodPhase, ResourceVector};

use crate::accountant::ResourceAccountant;

/// Hard cap on evictions per rebalance cycle. A backpressure valve, not a
/// tunable.
pub const MAX_REBALANCE_MOVES: usize = 5;

/// Nodes above this LoadScore shed work during rebalancing
const OVERLOAD_THRESHOLD: f64 = 0.8;

/// Nodes below this LoadScore absorb work during rebalancing
const UNDERLOAD_THRESHOLD: f64 = 0.3;

const GPU_WEIGHT: f64 = 0.5;
const CPU_WEIGHT: f64 = 0.3;
const MEMORY_WEIGHT: f64 = 0.2;

/// Per-node derived snapshot: schedulable capacity, live usage, and a
/// weighted utilization scalar in [0, 1].
///
/// Recomputed every cycle from the cluster view; a cache, never a source
/// of truth.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    /// Node name
    pub node: String,
    /// Schedulable capacity (the cluster's allocatable figure, GPU included)
    pub capacity: ResourceVector,
    /// Sum of declared requests of running/pending pods on the node
    pub used: ResourceVector,
    /// `0.5·gpu + 0.3·cpu + 0.2·memory` utilization, each term clamped to [0, 1]
    pub load_score: f64,
}

impl NodeStats {
    /// Derive stats for a node from its live pod usage
    pub fn derive(node: &Node, used: ResourceVector) -> Self {
        let load_score = GPU_WEIGHT
            * utilization(u64::from(used.gpus), u64::from(node.allocatable.gpus))
            + CPU_WEIGHT * utilization(used.cpu_millis, node.allocatable.cpu_millis)
            + MEMORY_WEIGHT * utilization(used.memory_bytes, node.allocatable.memory_bytes);

        Self {
            node: node.name.clone(),
            capacity: node.allocatable,
            used,
            load_score,
        }
    }

    /// Capacity not consumed by live pods (clamped; advisory only)
    pub fn available(&self) -> ResourceVector {
        self.capacity.saturating_sub(&self.used)
    }

    fn is_overloaded(&self) -> bool {
        self.load_score > OVERLOAD_THRESHOLD
    }

    fn is_underloaded(&self) -> bool {
        self.load_score < UNDERLOAD_THRESHOLD
    }
}

/// A dimension with zero total capacity contributes 0 rather than dividing
/// by zero.
fn utilization(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64).clamp(0.0, 1.0)
    }
}

/// One eviction performed during a rebalance cycle.
///
/// `to_node` is the underloaded candidate that justified the move; the
/// actual re-placement happens externally once the eviction is reconciled.
#[derive(Debug, Clone, Serialize)]
pub struct PodMove {
    /// Evicted pod key (`namespace/name`)
    pub pod: String,
    /// Overloaded node the pod was evicted from
    pub from_node: String,
    /// Underloaded node that can absorb the pod's requests
    pub to_node: String,
}

/// Outcome of one rebalance cycle
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceReport {
    /// Nodes above the overload threshold this cycle
    pub overloaded: usize,
    /// Nodes below the underload threshold this cycle
    pub underloaded: usize,
    /// Evictions performed, capped at [`MAX_REBALANCE_MOVES`]
    pub moves: Vec<PodMove>,
}

/// Counter snapshot for the monitoring subsystem
#[derive(Debug, Clone, Default, Serialize)]
pub struct BalancerMetrics {
    /// Placement decisions made
    pub placements: u64,
    /// Placement attempts with no feasible node
    pub placement_failures: u64,
    /// Rebalance cycles run
    pub rebalance_cycles: u64,
    /// Pods evicted across all cycles
    pub pods_evicted: u64,
}

struct BalancerState {
    stats: HashMap<String, NodeStats>,
    placements: u64,
    placement_failures: u64,
    rebalance_cycles: u64,
    pods_evicted: u64,
}

/// Chooses placement targets and periodically rebalances running work.
pub struct LoadBalancer {
    cluster: Arc<dyn ClusterState>,
    accountant: Arc<ResourceAccountant>,
    inner: RwLock<BalancerState>,
}

impl LoadBalancer {
    /// Create a balancer over the given cluster view and accountant
    pub fn new(cluster: Arc<dyn ClusterState>, accountant: Arc<ResourceAccountant>) -> Self {
        Self {
            cluster,
            accountant,
            inner: RwLock::new(BalancerState {
                stats: HashMap::new(),
                placements: 0,
                placement_failures: 0,
                rebalance_cycles: 0,
                pods_evicted: 0,
            }),
        }
    }

    /// Recompute stats for every node from a fresh cluster read
    async fn refresh_stats(&self) -> GpuletResult<HashMap<String, NodeStats>> {
        let nodes = self.cluster.list_nodes().await?;
        let pods = self.cluster.list_pods(&PodFilter::All).await?;

        let mut used: HashMap<&str, ResourceVector> = HashMap::new();
        for pod in pods.iter().filter(|p| p.consumes_resources()) {
            let entry = used
                .entry(pod.node_name.as_str())
                .or_insert(ResourceVector::ZERO);
            *entry = entry.plus(&pod.requests());
        }

        let stats: HashMap<String, NodeStats> = nodes
            .iter()
            .map(|n| {
                let node_used = used
                    .get(n.name.as_str())
                    .copied()
                    .unwrap_or(ResourceVector::ZERO);
                (n.name.clone(), NodeStats::derive(n, node_used))
            })
            .collect();

        self.inner.write().await.stats = stats.clone();
        Ok(stats)
    }

    /// Pick the least-loaded node that can accommodate the job.
    ///
    /// Availability subtracts both live usage and commitments the engine
    /// has already bound to the node, so two admissions in the gap before
    /// the cluster reflects either cannot oversubscribe a single node.
    /// Ties between equally-loaded nodes are broken by iteration order;
    /// callers must not rely on it.
    pub async fn find_optimal_node(&self, job: &Job) -> GpuletResult<String> {
        let requested = job.resources.to_vector();
        let stats = self.refresh_stats().await?;
        let committed = self.accountant.committed_by_node().await;

        let best = stats
            .values()
            .filter(|s| {
                let bound = committed
                    .get(&s.node)
                    .copied()
                    .unwrap_or(ResourceVector::ZERO);
                requested.fits_within(&s.available().saturating_sub(&bound))
            })
            .min_by(|a, b| {
                a.load_score
                    .partial_cmp(&b.load_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|s| (s.node.clone(), s.load_score));

        let mut state = self.inner.write().await;
        match best {
            Some((node, score)) => {
                state.placements += 1;
                debug!(job = %job.key(), node = %node, load_score = score, "Placement selected");
                Ok(node)
            }
            None => {
                state.placement_failures += 1;
                Err(GpuletError::NoFeasibleNode(format!(
                    "{} requesting {}",
                    job.key(),
                    requested
                )))
            }
        }
    }

    /// Evict pods from overloaded nodes toward underloaded ones.
    ///
    /// For each (overloaded, underloaded) pair, at most one job-owned pod
    /// moves, and only when the underloaded node can absorb that pod's
    /// declared requests. Eviction induces rescheduling externally; this
    /// engine's authority ends at the eviction request.
    pub async fn rebalance(&self) -> GpuletResult<RebalanceReport> {
        let stats = self.refresh_stats().await?;

        let mut overloaded: Vec<NodeStats> =
            stats.values().filter(|s| s.is_overloaded()).cloned().collect();
        let mut underloaded: Vec<NodeStats> =
            stats.values().filter(|s| s.is_underloaded()).cloned().collect();

        // Worst offenders shed first; emptiest nodes absorb first.
        overloaded.sort_by(|a, b| {
            b.load_score
                .partial_cmp(&a.load_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        underloaded.sort_by(|a, b| {
            a.load_score
                .partial_cmp(&b.load_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut moves: Vec<PodMove> = Vec::new();

        'sources: for source in &overloaded {
            let mut candidates: Vec<Pod> = self
                .cluster
                .list_pods(&PodFilter::OnNode(source.node.clone()))
                .await?
                .into_iter()
                .filter(|p| p.owner_job.is_some() && p.phase == PodPhase::Running)
                .collect();

            for target in underloaded.iter_mut() {
                if moves.len() >= MAX_REBALANCE_MOVES {
                    break 'sources;
                }
                let Some(idx) = candidates
                    .iter()
                    .position(|p| p.requests().fits_within(&target.available()))
                else {
                    continue;
                };

                let pod = candidates.remove(idx);
                self.cluster.evict_pod(&pod).await?;

                // Track absorbed headroom so later pairs see it.
                target.used = target.used.plus(&pod.requests());
                moves.push(PodMove {
                    pod: pod.key(),
                    from_node: source.node.clone(),
                    to_node: target.node.clone(),
                });
            }
        }

        let mut state = self.inner.write().await;
        state.rebalance_cycles += 1;
        state.pods_evicted += moves.len() as u64;

        info!(
            overloaded = overloaded.len(),
            underloaded = underloaded.len(),
            moves = moves.len(),
            "Rebalance cycle complete"
        );

        Ok(RebalanceReport {
            overloaded: overloaded.len(),
            underloaded: underloaded.len(),
            moves,
        })
    }

    /// Snapshot of the last computed node stats, sorted by node name
    pub async fn node_stats(&self) -> Vec<NodeStats> {
        let state = self.inner.read().await;
        let mut stats: Vec<NodeStats> = state.stats.values().cloned().collect();
        stats.sort_by(|a, b| a.node.cmp(&b.node));
        stats
    }

    /// Counter snapshot
    pub async fn metrics(&self) -> BalancerMetrics {
        let state = self.inner.read().await;
        BalancerMetrics {
            placements: state.placements,
            placement_failures: state.placement_failures,
            rebalance_cycles: state.rebalance_cycles,
            pods_evicted: state.pods_evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulet_cluster::InMemoryCluster;
    use gpulet_core::ContainerSpec;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn make_pod(name: &str, node: &str, requests: ResourceVector, owned: bool) -> Pod {
        Pod {
            name: name.to_string(),
            namespace: "default".to_string(),
            node_name: node.to_string(),
            phase: PodPhase::Running,
            owner_job: owned.then(|| format!("default/{}", name)),
            containers: vec![ContainerSpec {
                name: "main".to_string(),
                requests,
            }],
        }
    }

    fn balancer_over(cluster: Arc<InMemoryCluster>) -> LoadBalancer {
        let accountant = Arc::new(ResourceAccountant::new(cluster.clone()));
        LoadBalancer::new(cluster, accountant)
    }

    #[test]
    fn test_load_score_zero_capacity_dimension() {
        // No GPU capacity at all: the GPU term contributes 0, not a fault.
        let node = Node::new("cpu-only", ResourceVector::new(0, 1000, GIB));
        let stats = NodeStats::derive(&node, ResourceVector::new(0, 500, 0));
        assert!((stats.load_score - 0.3 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_load_score_saturated_gpu_only() {
        let node = Node::new("node-a", ResourceVector::new(4, 8000, 16 * GIB));
        let stats = NodeStats::derive(&node, ResourceVector::new(4, 0, 0));
        assert!((stats.load_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_load_score_clamps_overuse() {
        let node = Node::new("node-a", ResourceVector::new(2, 1000, GIB));
        let stats = NodeStats::derive(&node, ResourceVector::new(4, 2000, 2 * GIB));
        assert!((stats.load_score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_placement_requires_gpu_availability() {
        // Node X has no free GPU, node Y has two. Y must win regardless
        // of load ordering.
        let cluster = Arc::new(InMemoryCluster::new());
        cluster
            .upsert_node(Node::new("node-x", ResourceVector::new(2, 8000, 16 * GIB)))
            .await;
        cluster
            .upsert_node(Node::new("node-y", ResourceVector::new(2, 8000, 16 * GIB)))
            .await;
        cluster
            .report_pod(make_pod("busy", "node-x", ResourceVector::new(2, 100, GIB), false))
            .await;

        let balancer = balancer_over(cluster);
        let mut job = Job::new("default", "train-1");
        job.resources.gpus = 1;

        let node = balancer.find_optimal_node(&job).await.unwrap();
        assert_eq!(node, "node-y");
    }

    #[tokio::test]
    async fn test_placement_prefers_lowest_load() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster
            .upsert_node(Node::new("node-a", ResourceVector::new(4, 8000, 16 * GIB)))
            .await;
        cluster
            .upsert_node(Node::new("node-b", ResourceVector::new(4, 8000, 16 * GIB)))
            .await;
        // node-a carries more load than node-b.
        cluster
            .report_pod(make_pod("w1", "node-a", ResourceVector::new(2, 2000, 4 * GIB), false))
            .await;
        cluster
            .report_pod(make_pod("w2", "node-b", ResourceVector::new(1, 1000, 2 * GIB), false))
            .await;

        let balancer = balancer_over(cluster);
        let mut job = Job::new("default", "train-1");
        job.resources.gpus = 1;

        let node = balancer.find_optimal_node(&job).await.unwrap();
        assert_eq!(node, "node-b");
    }

    #[tokio::test]
    async fn test_placement_counts_bound_commitments() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster
            .upsert_node(Node::new("node-a", ResourceVector::new(4, 8000, 16 * GIB)))
            .await;

        let accountant = Arc::new(ResourceAccountant::new(cluster.clone()));
        let balancer = LoadBalancer::new(cluster, accountant.clone());

        // Commit 3 of 4 GPUs to an earlier job; the cluster has not
        // reflected it as a pod yet.
        let mut first = Job::new("default", "train-1");
        first.resources.gpus = 3;
        accountant.allocate(&mut first).await.unwrap();
        accountant.bind("default/train-1", "node-a").await.unwrap();

        let mut second = Job::new("default", "train-2");
        second.resources.gpus = 2;
        assert!(matches!(
            balancer.find_optimal_node(&second).await,
            Err(GpuletError::NoFeasibleNode(_))
        ));

        // One GPU still fits.
        let mut small = Job::new("default", "train-3");
        small.resources.gpus = 1;
        assert_eq!(balancer.find_optimal_node(&small).await.unwrap(), "node-a");
    }

    #[tokio::test]
    async fn test_no_feasible_node_error() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster
            .upsert_node(Node::new("node-a", ResourceVector::new(1, 8000, 16 * GIB)))
            .await;

        let balancer = balancer_over(cluster);
        let mut job = Job::new("default", "train-1");
        job.resources.gpus = 2;

        let err = balancer.find_optimal_node(&job).await.unwrap_err();
        assert!(matches!(err, GpuletError::NoFeasibleNode(_)));

        let metrics = balancer.metrics().await;
        assert_eq!(metrics.placement_failures, 1);
    }

    /// Saturate a node with one unowned filler pod and `movable` job pods.
    async fn fill_node(cluster: &InMemoryCluster, node: &str, movable: usize) {
        // Filler takes most of the node; movable pods are small enough for
        // any underloaded target to absorb.
        cluster
            .report_pod(make_pod(
                &format!("filler-{}", node),
                node,
                ResourceVector::new(3, 6000, 12 * GIB),
                false,
            ))
            .await;
        for i in 0..movable {
            cluster
                .report_pod(make_pod(
                    &format!("job-{}-{}", node, i),
                    node,
                    ResourceVector::new(1, 1000, 2 * GIB),
                    true,
                ))
                .await;
        }
    }

    #[tokio::test]
    async fn test_rebalance_caps_moves_at_five() {
        let cluster = Arc::new(InMemoryCluster::new());
        // Three overloaded nodes, each with 2 movable job pods.
        for name in ["over-1", "over-2", "over-3"] {
            cluster
                .upsert_node(Node::new(name, ResourceVector::new(4, 8000, 16 * GIB)))
                .await;
            fill_node(&cluster, name, 2).await;
        }
        // Three empty underloaded nodes.
        for name in ["under-1", "under-2", "under-3"] {
            cluster
                .upsert_node(Node::new(name, ResourceVector::new(4, 8000, 16 * GIB)))
                .await;
        }

        let balancer = balancer_over(cluster.clone());
        let report = balancer.rebalance().await.unwrap();

        assert_eq!(report.overloaded, 3);
        assert_eq!(report.underloaded, 3);
        assert_eq!(report.moves.len(), MAX_REBALANCE_MOVES);
        assert_eq!(cluster.evicted_pods().await.len(), MAX_REBALANCE_MOVES);
    }

    #[tokio::test]
    async fn test_rebalance_skips_unowned_pods() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster
            .upsert_node(Node::new("over-1", ResourceVector::new(4, 8000, 16 * GIB)))
            .await;
        cluster
            .upsert_node(Node::new("under-1", ResourceVector::new(4, 8000, 16 * GIB)))
            .await;
        // Overloaded, but only by a pod no job owns.
        cluster
            .report_pod(make_pod(
                "system-0",
                "over-1",
                ResourceVector::new(4, 8000, 16 * GIB),
                false,
            ))
            .await;

        let balancer = balancer_over(cluster.clone());
        let report = balancer.rebalance().await.unwrap();

        assert_eq!(report.overloaded, 1);
        assert!(report.moves.is_empty());
        assert!(cluster.evicted_pods().await.is_empty());
    }

    #[tokio::test]
    async fn test_rebalance_requires_target_headroom() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster
            .upsert_node(Node::new("over-1", ResourceVector::new(4, 8000, 16 * GIB)))
            .await;
        fill_node(&cluster, "over-1", 1).await;
        // Underloaded by score (tiny cpu usage) but with no GPU headroom
        // for the movable pod.
        cluster
            .upsert_node(Node::new("under-1", ResourceVector::new(0, 8000, 16 * GIB)))
            .await;

        let balancer = balancer_over(cluster.clone());
        let report = balancer.rebalance().await.unwrap();

        assert!(report.moves.is_empty());
        assert!(cluster.evicted_pods().await.is_empty());
    }

    #[tokio::test]
    async fn test_rebalance_noop_when_balanced() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster
            .upsert_node(Node::new("node-a", ResourceVector::new(4, 8000, 16 * GIB)))
            .await;
        cluster
            .report_pod(make_pod("w1", "node-a", ResourceVector::new(2, 4000, 8 * GIB), true))
            .await;

        let balancer = balancer_over(cluster.clone());
        let report = balancer.rebalance().await.unwrap();

        assert_eq!(report.overloaded, 0);
        assert!(report.moves.is_empty());

        let metrics = balancer.metrics().await;
        assert_eq!(metrics.rebalance_cycles, 1);
        assert_eq!(metrics.pods_evicted, 0);
    }

    #[tokio::test]
    async fn test_node_stats_snapshot() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster
            .upsert_node(Node::new("node-a", ResourceVector::new(4, 8000, 16 * GIB)))
            .await;
        cluster
            .upsert_node(Node::new("node-b", ResourceVector::new(8, 16000, 32 * GIB)))
            .await;

        let balancer = balancer_over(cluster);
        balancer.refresh_stats().await.unwrap();

        let stats = balancer.node_stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].node, "node-a");
        assert_eq!(stats[1].node, "node-b");
        assert_eq!(stats[1].capacity.gpus, 8);
    }
}
