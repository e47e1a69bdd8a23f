//! Tenant isolation: identical identifiers coexist across tenants, and no
//! query path ever crosses the boundary.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{ACME_KEY, GLOBEX_KEY, accepted_body, app, get, post, task_body};

#[tokio::test]
async fn same_receipt_id_coexists_across_tenants() {
    let (router, _state) = app();

    let mut acme = accepted_body("T-acme");
    acme["receipt_id"] = json!("R-X");
    let mut globex = accepted_body("T-globex");
    globex["receipt_id"] = json!("R-X");
    globex["recipient_ai"] = json!("worker.z");
    globex["source_system"] = json!("worker.z");

    let (status, _) = post(&router, "/receipts", ACME_KEY, acme).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = post(&router, "/receipts", GLOBEX_KEY, globex).await;
    assert_eq!(status, StatusCode::CREATED);

    // Each tenant sees its own row and only its own row.
    let (_, acme_view) = get(&router, "/receipts/R-X", ACME_KEY).await;
    assert_eq!(acme_view["task_id"], "T-acme");
    assert_eq!(acme_view["tenant_id"], "acme");

    let (_, globex_view) = get(&router, "/receipts/R-X", GLOBEX_KEY).await;
    assert_eq!(globex_view["task_id"], "T-globex");
    assert_eq!(globex_view["tenant_id"], "globex");
}

#[tokio::test]
async fn queries_never_return_foreign_rows() {
    let (router, _state) = app();

    post(&router, "/receipts", ACME_KEY, accepted_body("T-1")).await;
    let (_, created) = post(&router, "/tasks", ACME_KEY, task_body()).await;
    let task_id = created["task_id"].as_str().unwrap().to_owned();

    // globex sees none of it, under any filter combination.
    let (_, inbox) = get(&router, "/inbox?recipient_ai=worker.x", GLOBEX_KEY).await;
    assert_eq!(inbox["count"], 0);

    let (_, timeline) = get(&router, "/receipts/task/T-1", GLOBEX_KEY).await;
    assert!(timeline["receipts"].as_array().unwrap().is_empty());

    let (status, _) = get(&router, &format!("/tasks/{task_id}"), GLOBEX_KEY).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, tasks) = get(&router, "/tasks?status=queued", GLOBEX_KEY).await;
    assert_eq!(tasks["count"], 0);

    let (_, derived) = get(&router, "/tasks/T-1/status", GLOBEX_KEY).await;
    assert_eq!(derived["status"], "unknown");

    // And globex workers cannot lease acme's work.
    let (status, _) = post(&router, "/lease", GLOBEX_KEY, json!({ "worker_id": "w-g" })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn archive_is_tenant_scoped() {
    let (router, _state) = app();
    let mut body = accepted_body("T-1");
    body["receipt_id"] = json!("r-archive-me");
    post(&router, "/receipts", ACME_KEY, body).await;

    let (status, _) = post(
        &router,
        "/receipts/r-archive-me/archive",
        GLOBEX_KEY,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // acme's inbox is untouched by the foreign attempt.
    let (_, inbox) = get(&router, "/inbox?recipient_ai=worker.x", ACME_KEY).await;
    assert_eq!(inbox["count"], 1);
}

#[tokio::test]
async fn body_supplied_tenant_is_ignored() {
    let (router, _state) = app();
    let mut body = accepted_body("T-1");
    body["tenant_id"] = json!("globex");
    let (status, stored) = post(&router, "/receipts", ACME_KEY, body).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(stored["tenant_id"], "acme");
}
