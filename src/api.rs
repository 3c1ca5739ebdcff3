//! HTTP control plane.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::cluster::{Cluster, NodeAddress};
use crate::coordinator::{CoordinatorHandle, CreateOutcome, NodeRole};
use crate::error::PolarisError;
use crate::job::{JobOptions, Range};

#[derive(Clone)]
pub struct ApiState {
    pub handle: CoordinatorHandle,
    pub cluster: Arc<dyn Cluster>,
}

#[derive(Serialize)]
struct JobSummary {
    id: Uuid,
}

#[derive(Deserialize)]
struct CreateJobRequest {
    name: String,
    #[serde(flatten)]
    options: JobOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    leader: Option<NodeAddress>,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            job_id: None,
            leader: None,
        }
    }
}

#[derive(Serialize)]
struct ClusterStatusResponse {
    node: NodeAddress,
    role: NodeRole,
    leader: Option<NodeAddress>,
    workers: Vec<NodeAddress>,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/jobs", get(list_jobs_handler).post(create_job_handler))
        .route("/api/v1/jobs/:id", get(get_job_handler).delete(cancel_job_handler))
        .route("/api/v1/cluster", get(cluster_status_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn list_jobs_handler(State(state): State<ApiState>) -> Json<Vec<JobSummary>> {
    let jobs = state
        .handle
        .job_ids()
        .await
        .into_iter()
        .map(|id| JobSummary { id })
        .collect();
    Json(jobs)
}

async fn get_job_handler(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    match state.handle.job(id).await {
        Some(job) => Json::<Vec<Range>>(job.ranges).into_response(),
        None => (StatusCode::NOT_FOUND, Json(MessageResponse::new("Job not found."))).into_response(),
    }
}

async fn create_job_handler(
    State(state): State<ApiState>,
    Json(request): Json<CreateJobRequest>,
) -> Response {
    match state.handle.create_job(request.name, request.options).await {
        Ok(outcome) => {
            let mut body = MessageResponse::new("Job started.");
            if let CreateOutcome::Created(id) = outcome {
                body.job_id = Some(id);
            }
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn cancel_job_handler(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    match state.handle.cancel_job(id).await {
        Ok(()) => {
            let mut body = MessageResponse::new("Job cancelled.");
            body.job_id = Some(id);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn cluster_status_handler(State(state): State<ApiState>) -> Json<ClusterStatusResponse> {
    Json(ClusterStatusResponse {
        node: state.cluster.local().clone(),
        role: state.handle.role().await,
        leader: state.cluster.leader().await,
        workers: state.cluster.workers().await,
    })
}

fn error_response(err: PolarisError) -> Response {
    let status = match &err {
        PolarisError::UnknownJobType(_) | PolarisError::InvalidJob(_) => StatusCode::BAD_REQUEST,
        PolarisError::JobNotFound(_) => StatusCode::NOT_FOUND,
        PolarisError::NotLeader(_) => StatusCode::CONFLICT,
        PolarisError::NoWorkersAvailable | PolarisError::CoordinatorStopped => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "Request failed");
    }

    let mut body = match &err {
        PolarisError::JobNotFound(_) => MessageResponse::new("Job not found."),
        _ => MessageResponse::new(err.to_string()),
    };
    if let PolarisError::NotLeader(leader) = err {
        body.leader = leader;
    }
    (status, Json(body)).into_response()
}
