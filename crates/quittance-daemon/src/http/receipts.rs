//! Handlers for the receipt ledger and its derived-state queries.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use quittance_core::receipt::ReceiptDraft;

use super::error::ApiError;
use crate::state::SharedState;
use crate::store::AppendOutcome;

/// Default inbox page size.
const INBOX_DEFAULT_LIMIT: usize = 20;

/// Inbox size handed out at session bootstrap.
const BOOTSTRAP_INBOX_LIMIT: usize = 50;

/// Recent-context size handed out at session bootstrap.
const BOOTSTRAP_RECENT_LIMIT: usize = 10;

/// `POST /receipts`: validate, stamp, and append a receipt.
///
/// Returns 201 for a fresh append, 200 for an idempotent replay.
pub async fn submit_receipt(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(draft): Json<ReceiptDraft>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let outcome = state.ledger.append(&scope.tenant_id, draft)?;

    let status = match outcome {
        AppendOutcome::Appended(_) => StatusCode::CREATED,
        AppendOutcome::AlreadyStored(_) => StatusCode::OK,
    };
    let receipt = outcome.receipt();
    let body = json!({
        "receipt_id": receipt.receipt_id,
        "stored_at": receipt.stored_at,
        "tenant_id": receipt.tenant_id,
    });
    Ok((status, Json(body)).into_response())
}

/// `GET /receipts/{receipt_id}`: fetch one receipt.
pub async fn get_receipt(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(receipt_id): Path<String>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let receipt = state.ledger.get(&scope.tenant_id, &receipt_id)?;
    Ok(Json(receipt).into_response())
}

/// `POST /receipts/{receipt_id}/archive`: soft-hide from the inbox.
/// Idempotent.
pub async fn archive_receipt(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(receipt_id): Path<String>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let archived_at = state.ledger.archive(&scope.tenant_id, &receipt_id)?;
    Ok(Json(json!({
        "status": "archived",
        "receipt_id": receipt_id,
        "archived_at": archived_at,
    }))
    .into_response())
}

/// Query parameters for the inbox.
#[derive(Debug, Deserialize)]
pub struct InboxParams {
    recipient_ai: String,
    limit: Option<usize>,
}

/// `GET /inbox?recipient_ai=&limit=`: open obligations for an agent,
/// newest first. Derived, not stored.
pub async fn list_inbox(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<InboxParams>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let receipts = state.ledger.inbox(
        &scope.tenant_id,
        &params.recipient_ai,
        params.limit.unwrap_or(INBOX_DEFAULT_LIMIT),
    )?;
    Ok(Json(json!({
        "tenant_id": scope.tenant_id,
        "recipient_ai": params.recipient_ai,
        "count": receipts.len(),
        "receipts": receipts,
    }))
    .into_response())
}

/// Query parameters for the task timeline.
#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    sort: Option<String>,
}

/// `GET /receipts/task/{task_id}?sort=`: the lifecycle timeline of a
/// task, ascending by default.
pub async fn task_timeline(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let ascending = !matches!(params.sort.as_deref(), Some("desc"));
    let receipts = state.ledger.timeline(&scope.tenant_id, &task_id, ascending)?;
    Ok(Json(json!({
        "tenant_id": scope.tenant_id,
        "task_id": task_id,
        "receipts": receipts,
    }))
    .into_response())
}

/// `GET /receipts/chain/{receipt_id}`: recursive provenance chain,
/// bounded by the configured depth cap.
pub async fn receipt_chain(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(receipt_id): Path<String>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let page = state
        .ledger
        .chain(&scope.tenant_id, &receipt_id, state.engine.query_depth_cap)?;
    Ok(Json(json!({
        "root_receipt_id": receipt_id,
        "chain": page.chain,
        "truncated": page.truncated,
    }))
    .into_response())
}

/// `GET /receipts/children/{parent_task_id}`: the delegation tree, one
/// level: receipts spawned under a parent task.
pub async fn delegation_children(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(parent_task_id): Path<String>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let receipts = state.ledger.children(&scope.tenant_id, &parent_task_id)?;
    Ok(Json(json!({
        "parent_task_id": parent_task_id,
        "count": receipts.len(),
        "receipts": receipts,
    }))
    .into_response())
}

/// `GET /tasks/{task_id}/status`: derived obligation status: a query,
/// never a column.
pub async fn task_status(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let status = state.ledger.derived_status(&scope.tenant_id, &task_id)?;
    Ok(Json(json!({
        "task_id": task_id,
        "status": status,
    }))
    .into_response())
}

/// Session bootstrap request.
#[derive(Debug, Deserialize)]
pub struct BootstrapRequest {
    agent_name: String,
    #[serde(default)]
    session_id: Option<String>,
}

/// `POST /bootstrap`: everything an agent needs to resume work: its open
/// obligations, its recent context, and the service capabilities.
pub async fn bootstrap(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<BootstrapRequest>,
) -> Result<Response, ApiError> {
    let scope = state.authorize(&headers)?;
    let inbox = state
        .ledger
        .inbox(&scope.tenant_id, &request.agent_name, BOOTSTRAP_INBOX_LIMIT)?;
    let recent = state.ledger.recent_for_recipient(
        &scope.tenant_id,
        &request.agent_name,
        BOOTSTRAP_RECENT_LIMIT,
    )?;

    Ok(Json(json!({
        "tenant_id": scope.tenant_id,
        "agent_name": request.agent_name,
        "session_id": request.session_id,
        "config": {
            "receipt_schema_version": quittance_core::receipt::SCHEMA_VERSION,
            "capabilities": ["receipts", "tasks", "leases"],
        },
        "inbox": {
            "count": inbox.len(),
            "receipts": inbox,
        },
        "recent_context": {
            "receipts": recent,
        },
    }))
    .into_response())
}
