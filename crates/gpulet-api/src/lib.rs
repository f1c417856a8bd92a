//! gpulet-api: REST surface over the scheduling engine
//!
//! Job submission and release, plus the read-only snapshots the
//! monitoring subsystem samples (metrics, allocations, node stats, queue
//! length), and the node/pod report routes that feed the in-memory
//! cluster view.

pub mod rest;

pub use rest::{create_router, AppState};
