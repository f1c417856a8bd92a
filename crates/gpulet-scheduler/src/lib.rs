//! gpulet-scheduler: the scheduling engine core
//!
//! Three components share one [`ClusterState`](gpulet_cluster::ClusterState)
//! view, each guarding its own mutable state behind its own lock:
//!
//! - [`Scheduler`] — priority-ordered pending queue and admission passes
//! - [`ResourceAccountant`] — engine-held resource commitments, checked
//!   against what the cluster reports as available
//! - [`LoadBalancer`] — per-node load scoring, placement selection, and
//!   capped eviction-based rebalancing
//!
//! [`Engine`] wires the three together over a single cluster view.

pub mod accountant;
pub mod balancer;
pub mod engine;
pub mod scheduler;

pub use accountant::{AccountantMetrics, Allocation, ResourceAccountant};
pub use balancer::{BalancerMetrics, LoadBalancer, NodeStats, PodMove, RebalanceReport};
pub use engine::{Engine, EngineMetrics};
pub use scheduler::{Scheduler, SchedulerMetrics};
