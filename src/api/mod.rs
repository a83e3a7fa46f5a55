use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::failover::FailoverCoordinator;
use crate::recovery::LocalRecovery;

pub const RECOVER_TRIGGER_PATH: &str = "/node/recover/trigger";
pub const MIGRATE_PATH: &str = "/node/migrate";
pub const STATUS_PATH: &str = "/node/status";

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<FailoverCoordinator>,
    pub local: Arc<dyn LocalRecovery>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MigrateRequest {
    pub node: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub error: Option<String>,
}

impl AckResponse {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub local_address: String,
    pub state: String,
    pub pending_reports: usize,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(RECOVER_TRIGGER_PATH, post(recover_trigger_handler))
        .route(MIGRATE_PATH, post(migrate_handler))
        .route(STATUS_PATH, get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting node API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind node API server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Node API server failed");
    }
}

/// Recovery trigger from the leader: re-scan work assigned to this node.
async fn recover_trigger_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match state.local.trigger_self().await {
        Ok(()) => (StatusCode::OK, Json(AckResponse::ok())),
        Err(e) => {
            tracing::error!(error = %e, "Local recovery trigger failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AckResponse::err(e.to_string())),
            )
        }
    }
}

/// Administrative migration of a node's work, queued like a node-down report.
async fn migrate_handler(
    State(state): State<ApiState>,
    Json(payload): Json<MigrateRequest>,
) -> impl IntoResponse {
    if payload.node.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(AckResponse::err("node address is required")),
        );
    }

    if state.coordinator.report_node_down(&payload.node) {
        (StatusCode::ACCEPTED, Json(AckResponse::ok()))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(AckResponse::err("intake queue unavailable")),
        )
    }
}

async fn status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    Json(StatusResponse {
        local_address: coordinator.local_address().to_string(),
        state: coordinator.state().to_string(),
        pending_reports: coordinator.pending_reports(),
    })
}
