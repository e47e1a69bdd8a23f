//! End-to-end lifecycle scenarios: the golden path and the escalation
//! flow, driven through the HTTP surface.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{ACME_KEY, accepted_body, app, get, post, task_body};

#[tokio::test]
async fn golden_path_resolves_and_drains_the_inbox() {
    let (router, _state) = app();

    // Submit a task for worker.x.
    let (status, created) = post(&router, "/tasks", ACME_KEY, task_body()).await;
    assert_eq!(status, StatusCode::CREATED);
    let task_id = created["task_id"].as_str().unwrap().to_owned();
    assert_eq!(created["status"], "queued");

    // Nothing resolved yet.
    let (_, derived) = get(&router, &format!("/tasks/{task_id}/status"), ACME_KEY).await;
    assert_eq!(derived["status"], "unknown");

    // Worker w-1 leases the head of the queue.
    let (status, grant) = post(
        &router,
        "/lease",
        ACME_KEY,
        json!({ "worker_id": "w-1", "capabilities": ["rust"], "preferred_kinds": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(grant["task"]["task_id"], task_id.as_str());
    let lease_id = grant["lease_id"].as_str().unwrap().to_owned();
    assert!(grant["lease_expires_at"].is_string());

    // The worker records acceptance of the obligation.
    let (status, _) = post(&router, "/receipts", ACME_KEY, accepted_body(&task_id)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, inbox) = get(&router, "/inbox?recipient_ai=worker.x", ACME_KEY).await;
    assert_eq!(inbox["count"], 1);

    let (_, derived) = get(&router, &format!("/tasks/{task_id}/status"), ACME_KEY).await;
    assert_eq!(derived["status"], "open");

    // Heartbeat while working.
    let (status, beat) = post(
        &router,
        &format!("/lease/{lease_id}/heartbeat"),
        ACME_KEY,
        json!({ "worker_id": "w-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(beat["status"], "extended");

    // Complete with an artifact pointer.
    let (status, record) = post(
        &router,
        &format!("/lease/{lease_id}/complete"),
        ACME_KEY,
        json!({
            "worker_id": "w-1",
            "status": "success",
            "outcome_kind": "artifact_pointer",
            "artifact_pointer": "pointer://a/b",
            "artifact_location": "depot",
            "artifact_mime": "text/plain",
            "artifact_checksum": "sha256:00",
            "artifact_size_bytes": 128,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["task_id"], task_id.as_str());
    assert_eq!(record["status"], "success");

    // Derived status flips to resolved; the timeline holds both receipts
    // in order; the inbox drains.
    let (_, derived) = get(&router, &format!("/tasks/{task_id}/status"), ACME_KEY).await;
    assert_eq!(derived["status"], "resolved");

    let (_, timeline) = get(&router, &format!("/receipts/task/{task_id}"), ACME_KEY).await;
    let receipts = timeline["receipts"].as_array().unwrap();
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[0]["phase"], "accepted");
    assert_eq!(receipts[1]["phase"], "complete");
    assert_eq!(receipts[1]["artifact_pointer"], "pointer://a/b");

    let (_, inbox) = get(&router, "/inbox?recipient_ai=worker.x", ACME_KEY).await;
    assert_eq!(inbox["count"], 0);

    // The resolved task is never re-offered.
    let (status, _) = post(&router, "/lease", ACME_KEY, json!({ "worker_id": "w-2" })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The task row agrees.
    let (_, task) = get(&router, &format!("/tasks/{task_id}"), ACME_KEY).await;
    assert_eq!(task["status"], "completed");
}

#[tokio::test]
async fn escalation_flow_requeues_and_reoffers() {
    let (router, _state) = app();

    let (_, created) = post(&router, "/tasks", ACME_KEY, task_body()).await;
    let task_id = created["task_id"].as_str().unwrap().to_owned();

    let (_, grant) = post(&router, "/lease", ACME_KEY, json!({ "worker_id": "w-1" })).await;
    let lease_id = grant["lease_id"].as_str().unwrap().to_owned();

    post(&router, "/receipts", ACME_KEY, accepted_body(&task_id)).await;

    // The worker cannot do the work: capability escalation to fallback.y.
    let (status, record) = post(
        &router,
        &format!("/lease/{lease_id}/fail"),
        ACME_KEY,
        json!({
            "worker_id": "w-1",
            "reason": "needs GPU",
            "retryable": true,
            "escalation_class": "capability",
            "escalation_to": "fallback.y",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["retry_scheduled"], true);
    assert_eq!(record["next_attempt"], 1);
    assert_eq!(record["escalation_to"], "fallback.y");

    // Task back in the queue with one attempt burned.
    let (_, task) = get(&router, &format!("/tasks/{task_id}"), ACME_KEY).await;
    assert_eq!(task["status"], "queued");
    assert_eq!(task["attempt"], 1);

    // The timeline shows accepted then escalate, and the escalate honors
    // the routing invariant.
    let (_, timeline) = get(&router, &format!("/receipts/task/{task_id}"), ACME_KEY).await;
    let receipts = timeline["receipts"].as_array().unwrap();
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[0]["phase"], "accepted");
    assert_eq!(receipts[1]["phase"], "escalate");
    assert_eq!(receipts[1]["escalation_class"], "capability");
    assert_eq!(receipts[1]["recipient_ai"], "fallback.y");
    assert_eq!(receipts[1]["escalation_to"], "fallback.y");

    // worker.x's inbox is empty; the obligation moved on.
    let (_, inbox) = get(&router, "/inbox?recipient_ai=worker.x", ACME_KEY).await;
    assert_eq!(inbox["count"], 0);

    // Derived status reflects the transfer.
    let (_, derived) = get(&router, &format!("/tasks/{task_id}/status"), ACME_KEY).await;
    assert_eq!(derived["status"], "escalated");

    // A new lease can offer the task again, at attempt 1.
    let (status, regrant) = post(&router, "/lease", ACME_KEY, json!({ "worker_id": "w-3" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(regrant["task"]["task_id"], task_id.as_str());
    assert_eq!(regrant["task"]["attempt"], 1);
}

#[tokio::test]
async fn voluntary_release_hands_the_task_back() {
    let (router, _state) = app();

    let (_, created) = post(&router, "/tasks", ACME_KEY, task_body()).await;
    let task_id = created["task_id"].as_str().unwrap().to_owned();
    let (_, grant) = post(&router, "/lease", ACME_KEY, json!({ "worker_id": "w-1" })).await;
    let lease_id = grant["lease_id"].as_str().unwrap().to_owned();

    let (status, record) = post(
        &router,
        &format!("/lease/{lease_id}/release"),
        ACME_KEY,
        json!({ "worker_id": "w-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["retry_scheduled"], true);

    let (_, task) = get(&router, &format!("/tasks/{task_id}"), ACME_KEY).await;
    assert_eq!(task["status"], "queued");
    assert_eq!(task["attempt"], 1);

    let (_, timeline) = get(&router, &format!("/receipts/task/{task_id}"), ACME_KEY).await;
    let receipts = timeline["receipts"].as_array().unwrap();
    assert_eq!(receipts[0]["escalation_reason"], "voluntary_release");
}

#[tokio::test]
async fn wrong_worker_cannot_touch_the_lease() {
    let (router, _state) = app();

    post(&router, "/tasks", ACME_KEY, task_body()).await;
    let (_, grant) = post(&router, "/lease", ACME_KEY, json!({ "worker_id": "w-1" })).await;
    let lease_id = grant["lease_id"].as_str().unwrap().to_owned();

    let (status, body) = post(
        &router,
        &format!("/lease/{lease_id}/complete"),
        ACME_KEY,
        json!({ "worker_id": "w-imposter", "status": "success", "outcome_kind": "none" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "lease_not_owned");
}
