//! Handlers for the task queue and the lease lifecycle.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use quittance_core::receipt::{Fault, Layer, ValidationFailure};
use quittance_core::task::{TaskSpec, TaskStatus};

use super::error::ApiError;
use crate::state::SharedState;
use crate::store::{CompletionOutcome, FailureReport, TaskFilter};

/// `POST /tasks`: queue a task. Emits no receipt: the obligation is
/// created when a worker (or the planner) appends `accepted`.
pub async fn submit_task(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(spec): Json<TaskSpec>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let task = state.tasks.submit(
        &scope.tenant_id,
        spec,
        &state.engine,
        scope.retry_principal.as_deref(),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "task_id": task.task_id,
            "status": task.status,
            "created_at": task.created_at,
        })),
    )
        .into_response())
}

/// `GET /tasks/{task_id}`: fetch one task.
pub async fn get_task(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let task = state.tasks.get(&scope.tenant_id, &task_id)?;
    Ok(Json(task).into_response())
}

/// Query parameters for task listing.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    recipient_ai: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// `GET /tasks?status=&recipient_ai=&limit=`: list tasks, newest first.
pub async fn list_tasks(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => Some(TaskStatus::parse(raw).ok_or_else(|| {
            ApiError::Validation(ValidationFailure {
                faults: vec![Fault {
                    code: "TASK-QUERY-001".to_owned(),
                    layer: Layer::Structural,
                    path: "status".to_owned(),
                    message: format!("unknown task status {raw:?}"),
                    hint: Some("one of queued, leased, completed, failed, expired".to_owned()),
                }],
            })
        })?),
    };
    let filter = TaskFilter {
        status,
        recipient_ai: params.recipient_ai,
        limit: params.limit.unwrap_or(0),
    };
    let tasks = state.tasks.list(&scope.tenant_id, &filter)?;
    Ok(Json(json!({
        "count": tasks.len(),
        "tasks": tasks,
    }))
    .into_response())
}

/// A worker's poll for available work.
#[derive(Debug, Deserialize)]
pub struct LeaseRequest {
    worker_id: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    preferred_kinds: Vec<String>,
    /// Accepted for forward compatibility; a single task is offered per
    /// call.
    #[serde(default)]
    #[allow(dead_code)]
    max_tasks: Option<u32>,
}

/// `POST /lease`: offer the head of the queue to a worker.
///
/// Returns 204 when no work matches; the offer itself is transient and
/// emits no receipt.
pub async fn lease_next(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<LeaseRequest>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let grant = state.tasks.lease_next(
        &scope.tenant_id,
        &request.worker_id,
        &request.capabilities,
        &request.preferred_kinds,
        &state.engine,
        Utc::now(),
    )?;
    match grant {
        Some(grant) => Ok(Json(json!({
            "lease_id": grant.lease.lease_id,
            "lease_expires_at": grant.lease.expires_at,
            "task": grant.task,
        }))
        .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// A lease extension request.
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    worker_id: String,
}

/// `POST /lease/{lease_id}/heartbeat`: extend an active lease.
pub async fn heartbeat(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(lease_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let lease = state.tasks.heartbeat(
        &scope.tenant_id,
        &lease_id,
        &request.worker_id,
        &state.engine,
        Utc::now(),
    )?;
    Ok(Json(json!({
        "lease_id": lease.lease_id,
        "lease_expires_at": lease.expires_at,
        "status": "extended",
    }))
    .into_response())
}

/// `POST /lease/{lease_id}/complete`: append the `complete` receipt and
/// flip the task, atomically.
pub async fn complete(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(lease_id): Path<String>,
    Json(outcome): Json<CompletionOutcome>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let record = state
        .tasks
        .complete(&scope.tenant_id, &lease_id, &outcome, Utc::now())?;
    Ok(Json(record).into_response())
}

/// `POST /lease/{lease_id}/fail`: append the `escalate` receipt and
/// requeue or fail the task, atomically.
pub async fn fail(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(lease_id): Path<String>,
    Json(report): Json<FailureReport>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let record = state
        .tasks
        .fail(&scope.tenant_id, &lease_id, &report, Utc::now())?;
    Ok(Json(record).into_response())
}

/// A voluntary handback request.
#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    worker_id: String,
}

/// `POST /lease/{lease_id}/release`: voluntary handback; same retry
/// policy as a retryable failure.
pub async fn release(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(lease_id): Path<String>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let record = state
        .tasks
        .release(&scope.tenant_id, &lease_id, &request.worker_id, Utc::now())?;
    Ok(Json(record).into_response())
}
