//! replisync-api — operator surface for a running reconciler.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/status` | Current reconciler status |
//! | POST | `/api/v1/reset` | Leave `FAILED` after operator intervention |
//! | POST | `/api/v1/scale` | Queue a scaling request (`{"delta": n}`) |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::{mpsc, watch};

use replisync_reconciler::{Command, ReconcilerStatus};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub status: watch::Receiver<ReconcilerStatus>,
    pub commands: mpsc::Sender<Command>,
}

/// Build the operator API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(handlers::get_status))
        .route("/reset", post(handlers::reset))
        .route("/scale", post(handlers::scale))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
