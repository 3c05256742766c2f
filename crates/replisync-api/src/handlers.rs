//! Operator API handlers.
//!
//! Commands are queued for the reconciler loop and answered with `202`;
//! their effect shows up in the next published status.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use replisync_reconciler::Command;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    ApiResponse::ok(status)
}

async fn enqueue(state: &ApiState, command: Command) -> axum::response::Response {
    match state.commands.send(command).await {
        Ok(()) => {
            info!(?command, "operator command queued");
            (StatusCode::ACCEPTED, ApiResponse::ok("queued")).into_response()
        }
        Err(_) => {
            warn!(?command, "reconciler is not running");
            error_response("reconciler is not running", StatusCode::SERVICE_UNAVAILABLE)
                .into_response()
        }
    }
}

/// POST /api/v1/reset
pub async fn reset(State(state): State<ApiState>) -> impl IntoResponse {
    if !state.status.borrow().state.is_failed() {
        return error_response("reconciler is not failed", StatusCode::CONFLICT).into_response();
    }
    enqueue(&state, Command::Reset).await
}

/// Scale request body.
#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub delta: i32,
}

/// POST /api/v1/scale
pub async fn scale(
    State(state): State<ApiState>,
    Json(req): Json<ScaleRequest>,
) -> impl IntoResponse {
    if req.delta == 0 {
        return error_response("delta must be non-zero", StatusCode::BAD_REQUEST).into_response();
    }
    enqueue(&state, Command::Scale(req.delta)).await
}
