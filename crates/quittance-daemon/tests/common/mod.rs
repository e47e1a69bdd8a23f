//! Shared fixtures: an in-process daemon over an in-memory store, driven
//! through the router without binding a socket.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::util::ServiceExt;

use quittance_core::config::EngineConfig;
use quittance_daemon::config::{AuthConfig, DaemonConfig, TokenEntry};
use quittance_daemon::http;
use quittance_daemon::state::{AppState, SharedState};
use quittance_daemon::store::Store;

pub const ACME_KEY: &str = "dev-key-acme";
pub const GLOBEX_KEY: &str = "dev-key-globex";

/// Two tenants, generous rate limits, default engine knobs.
pub fn test_config() -> DaemonConfig {
    DaemonConfig {
        auth: AuthConfig {
            tokens: vec![
                TokenEntry {
                    token: SecretString::from(ACME_KEY),
                    tenant_id: "acme".to_owned(),
                    retry_principal: None,
                },
                TokenEntry {
                    token: SecretString::from(GLOBEX_KEY),
                    tenant_id: "globex".to_owned(),
                    retry_principal: None,
                },
            ],
        },
        ..DaemonConfig::default()
    }
}

/// Builds the router plus a handle on the shared state for direct store
/// access (e.g. driving a reaper sweep deterministically).
pub fn app_with(config: DaemonConfig) -> (Router, SharedState) {
    let store = Store::in_memory().expect("in-memory store");
    let state = Arc::new(AppState::new(store, &config));
    (http::router(Arc::clone(&state)), state)
}

pub fn app() -> (Router, SharedState) {
    app_with(test_config())
}

/// Engine knobs with an instantly-expiring lease, for expiry scenarios.
pub fn zero_ttl_config() -> DaemonConfig {
    let mut config = test_config();
    config.engine = EngineConfig {
        lease_ttl_seconds: 0,
        ..EngineConfig::default()
    };
    config
}

/// Sends one request and returns `(status, parsed body)`.
pub async fn request(
    router: &Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header("x-api-key", token);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router never fails");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is JSON")
    };
    (status, value)
}

pub async fn post(
    router: &Router,
    path: &str,
    token: &str,
    body: Value,
) -> (StatusCode, Value) {
    request(router, "POST", path, Some(token), Some(body)).await
}

pub async fn get(router: &Router, path: &str, token: &str) -> (StatusCode, Value) {
    request(router, "GET", path, Some(token), None).await
}

/// A minimal valid task submission for `worker.x`.
pub fn task_body() -> Value {
    json!({
        "task_type": "code.generate",
        "task_summary": "summarize the repo",
        "task_body": "walk the tree and write a summary",
        "inputs": { "repo": "quittance" },
        "recipient_ai": "worker.x",
        "from_principal": "planner",
        "for_principal": "user:alice",
        "priority": 5,
    })
}

/// A minimal valid `accepted` receipt for a task.
pub fn accepted_body(task_id: &str) -> Value {
    json!({
        "task_id": task_id,
        "phase": "accepted",
        "task_type": "code.generate",
        "task_summary": "summarize the repo",
        "from_principal": "planner",
        "for_principal": "user:alice",
        "source_system": "worker.x",
        "recipient_ai": "worker.x",
    })
}
