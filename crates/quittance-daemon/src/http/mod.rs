//! The HTTP surface.
//!
//! Endpoints are semantic operations over the two engines; every request
//! authenticates through the access gate and is rate limited per tenant
//! before it touches a store. A request-wide body cap rejects oversized
//! payloads before they allocate; the validator's per-field caps refine
//! that into 413s with precise field paths.

pub mod auth;
pub mod error;
pub mod rate_limit;

mod receipts;
mod tasks;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::SharedState;

/// Maximum request body size in bytes (1 MiB). The largest legal receipt
/// (100 KiB body + 100 KiB outcome + 64 KiB inputs + 16 KiB metadata) fits
/// with ample headroom.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Builds the daemon router.
#[must_use]
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/receipts", post(receipts::submit_receipt))
        .route("/receipts/{receipt_id}", get(receipts::get_receipt))
        .route("/receipts/{receipt_id}/archive", post(receipts::archive_receipt))
        .route("/receipts/task/{task_id}", get(receipts::task_timeline))
        .route("/receipts/chain/{receipt_id}", get(receipts::receipt_chain))
        .route(
            "/receipts/children/{parent_task_id}",
            get(receipts::delegation_children),
        )
        .route("/inbox", get(receipts::list_inbox))
        .route("/bootstrap", post(receipts::bootstrap))
        .route("/tasks", post(tasks::submit_task).get(tasks::list_tasks))
        .route("/tasks/{task_id}", get(tasks::get_task))
        .route("/tasks/{task_id}/status", get(receipts::task_status))
        .route("/lease", post(tasks::lease_next))
        .route("/lease/{lease_id}/heartbeat", post(tasks::heartbeat))
        .route("/lease/{lease_id}/complete", post(tasks::complete))
        .route("/lease/{lease_id}/fail", post(tasks::fail))
        .route("/lease/{lease_id}/release", post(tasks::release))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Liveness probe.
async fn health() -> Response {
    Json(json!({ "status": "healthy", "service": "quittance" })).into_response()
}

/// Readiness probe: verifies database connectivity.
async fn ready(State(state): State<SharedState>) -> Response {
    match state.store.ping() {
        Ok(()) => Json(json!({ "status": "ready", "database": "connected" })).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not_ready" })),
            )
                .into_response()
        }
    }
}
