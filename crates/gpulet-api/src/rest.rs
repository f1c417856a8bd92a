//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use gpulet_cluster::InMemoryCluster;
use gpulet_core::{
    ContainerSpec, GpuletError, Job, JobResources, Node, Pod, PodPhase, ResourceVector,
};
use gpulet_scheduler::{Allocation, Engine, EngineMetrics, NodeStats, RebalanceReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<Engine>,
    pub cluster: Arc<InMemoryCluster>,
}

/// Create the API router
pub fn create_router(engine: Arc<Engine>, cluster: Arc<InMemoryCluster>) -> Router {
    let state = Arc::new(AppState { engine, cluster });

    Router::new()
        .route("/api/v1/jobs", post(submit_job))
        .route("/api/v1/jobs/:namespace/:name/release", post(release_job))
        .route("/api/v1/queue", get(get_queue))
        .route("/api/v1/allocations", get(get_allocations))
        .route("/api/v1/nodes", get(get_node_stats))
        .route("/api/v1/nodes/:name", put(report_node))
        .route("/api/v1/pods/:namespace/:name", put(report_pod))
        .route("/api/v1/rebalance", post(trigger_rebalance))
        .route("/api/v1/metrics", get(get_metrics))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_status(err: &GpuletError) -> StatusCode {
    match err {
        GpuletError::AllocationNotFound(_)
        | GpuletError::JobNotFound(_)
        | GpuletError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        GpuletError::InvalidJob { .. } => StatusCode::BAD_REQUEST,
        GpuletError::InsufficientResources { .. }
        | GpuletError::NoFeasibleNode(_)
        | GpuletError::AllocationExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn into_response(err: GpuletError) -> (StatusCode, String) {
    (error_status(&err), err.to_string())
}

/// Request to submit a job
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Job name
    pub name: String,
    /// Namespace (defaults to "default")
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Number of GPUs requested
    #[serde(default)]
    pub gpus: u32,
    /// CPU request in millicores
    pub cpu_millis: Option<u64>,
    /// Memory request in bytes
    pub memory_bytes: Option<u64>,
    /// Whether the job carries a priority-class marker
    #[serde(default)]
    pub priority_class: bool,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Response describing a submitted job
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub key: String,
    pub status: String,
    pub queue_length: usize,
}

/// Submit a job for scheduling
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, (StatusCode, String)> {
    info!(
        name = %req.name,
        namespace = %req.namespace,
        gpus = req.gpus,
        "Submitting job"
    );

    let mut job = Job::new(req.namespace, req.name);
    job.resources = JobResources {
        gpus: req.gpus,
        cpu_millis: req.cpu_millis,
        memory_bytes: req.memory_bytes,
    };
    job.priority_class = req.priority_class;
    let key = job.key();

    state.engine.submit(job).await.map_err(into_response)?;

    let pending = state.engine.pending_jobs().await;
    let status = if pending.iter().any(|j| j.key() == key) {
        "Pending".to_string()
    } else {
        "Starting".to_string()
    };

    Ok(Json(SubmitJobResponse {
        key,
        status,
        queue_length: pending.len(),
    }))
}

/// Allocation response
#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    pub id: Uuid,
    pub job: String,
    pub resources: ResourceVector,
    pub node: Option<String>,
}

impl From<Allocation> for AllocationResponse {
    fn from(allocation: Allocation) -> Self {
        Self {
            id: allocation.id,
            job: allocation.job_key(),
            resources: allocation.resources,
            node: allocation.node.clone(),
        }
    }
}

/// Release a job's allocation
async fn release_job(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<AllocationResponse>, (StatusCode, String)> {
    info!(namespace = %namespace, name = %name, "Releasing job");

    let released = state
        .engine
        .release(&namespace, &name)
        .await
        .map_err(into_response)?;

    Ok(Json(AllocationResponse::from(released)))
}

/// Pending queue response
#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub length: usize,
    pub jobs: Vec<String>,
}

/// Get the pending queue
async fn get_queue(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueResponse>, (StatusCode, String)> {
    let pending = state.engine.pending_jobs().await;
    Ok(Json(QueueResponse {
        length: pending.len(),
        jobs: pending.iter().map(|j| j.key()).collect(),
    }))
}

/// List all held allocations
async fn get_allocations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AllocationResponse>>, (StatusCode, String)> {
    let allocations = state.engine.allocations().await;
    Ok(Json(
        allocations.into_iter().map(AllocationResponse::from).collect(),
    ))
}

/// Get per-node load stats
async fn get_node_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<NodeStats>>, (StatusCode, String)> {
    Ok(Json(state.engine.node_stats().await))
}

/// Request body reporting a node's capacity
#[derive(Debug, Deserialize)]
pub struct ReportNodeRequest {
    pub capacity: ResourceVector,
    /// Schedulable capacity; defaults to the full capacity
    pub allocatable: Option<ResourceVector>,
}

/// Report (upsert) a node
async fn report_node(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<ReportNodeRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut node = Node::new(name, req.capacity);
    if let Some(allocatable) = req.allocatable {
        node.allocatable = allocatable;
    }
    state.cluster.upsert_node(node).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body reporting a pod
#[derive(Debug, Deserialize)]
pub struct ReportPodRequest {
    pub node: String,
    pub phase: PodPhase,
    pub owner_job: Option<String>,
    pub requests: ResourceVector,
}

/// Report (upsert) a pod
async fn report_pod(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<ReportPodRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let pod = Pod {
        name,
        namespace,
        node_name: req.node,
        phase: req.phase,
        owner_job: req.owner_job,
        containers: vec![ContainerSpec {
            name: "main".to_string(),
            requests: req.requests,
        }],
    };
    state.cluster.report_pod(pod).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Trigger a rebalance cycle
async fn trigger_rebalance(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RebalanceReport>, (StatusCode, String)> {
    let report = state.engine.rebalance().await.map_err(into_response)?;
    Ok(Json(report))
}

/// Get engine counters
async fn get_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<EngineMetrics>, (StatusCode, String)> {
    Ok(Json(state.engine.metrics().await))
}

/// System status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub nodes: usize,
    pub queue_length: usize,
    pub allocations: usize,
}

/// Get system status
async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        nodes: state.cluster.node_count().await,
        queue_length: state.engine.queue_length().await,
        allocations: state.engine.allocations().await.len(),
    }))
}
