//! REST API handlers for the control surface

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::server::AppState;
use super::{ControlError, DiscoveryTarget};
use crate::metrics;
use crate::worker::ControlAction;

const DEFAULT_ACTIVITY_LIMIT: usize = 20;
const MAX_ACTIVITY_LIMIT: usize = 100;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ControlError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryRequest {
    pub user_id: Option<String>,
    pub monitor_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedResponse {
    pub task_id: Uuid,
    pub kind: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

// ============================================================================
// API Routes
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(worker_status))
        .route("/api/discovery", post(enqueue_discovery))
        .route("/api/control/{action}", post(send_control))
        .route("/api/activities", get(recent_activities))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

async fn worker_status(State(state): State<AppState>) -> axum::response::Response {
    match state.plane.status().await {
        Ok(status) => Json(ApiResponse::success(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn enqueue_discovery(
    State(state): State<AppState>,
    Json(request): Json<DiscoveryRequest>,
) -> axum::response::Response {
    let target = match DiscoveryTarget::from_parts(request.user_id, request.monitor_id) {
        Ok(target) => target,
        Err(e) => return e.into_response(),
    };

    match state.plane.enqueue_discovery(target).await {
        Ok(task) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(EnqueuedResponse {
                task_id: task.id,
                kind: task.kind(),
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn send_control(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> axum::response::Response {
    let action = match action.parse::<ControlAction>() {
        Ok(action) => action,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response();
        }
    };

    match state.plane.send_signal(action).await {
        Ok(signal) => (StatusCode::ACCEPTED, Json(ApiResponse::success(signal))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn recent_activities(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> axum::response::Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);

    match state.plane.activities(limit).await {
        Ok(entries) => Json(ApiResponse::success(entries)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn prometheus_metrics() -> axum::response::Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
