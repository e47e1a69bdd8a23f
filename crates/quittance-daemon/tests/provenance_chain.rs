//! Provenance chain traversal: recursion over `caused_by_receipt_id`,
//! bounded depth with a continuation marker, and cycle defense.

mod common;

use axum::http::StatusCode;
use quittance_core::config::EngineConfig;
use serde_json::json;

use common::{ACME_KEY, accepted_body, app, app_with, get, post, test_config};

async fn seed_chain(router: &axum::Router, length: usize) {
    let mut previous: Option<String> = None;
    for i in 0..length {
        let mut body = accepted_body(&format!("T-{i}"));
        body["receipt_id"] = json!(format!("r-{i}"));
        if let Some(parent) = &previous {
            body["caused_by_receipt_id"] = json!(parent);
        }
        let (status, _) = post(router, "/receipts", ACME_KEY, body).await;
        assert_eq!(status, StatusCode::CREATED);
        previous = Some(format!("r-{i}"));
    }
}

#[tokio::test]
async fn chain_reaches_ancestors_and_descendants() {
    let (router, _state) = app();
    seed_chain(&router, 4).await;

    let (status, body) = get(&router, "/receipts/chain/r-2", ACME_KEY).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["truncated"], false);
    let ids: Vec<&str> = body["chain"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["receipt_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["r-0", "r-1", "r-2", "r-3"]);
}

#[tokio::test]
async fn chain_respects_the_depth_cap_with_a_marker() {
    let mut config = test_config();
    config.engine = EngineConfig {
        query_depth_cap: 5,
        ..EngineConfig::default()
    };
    let (router, _state) = app_with(config);
    // One receipt deeper than the cap.
    seed_chain(&router, 6).await;

    let (status, body) = get(&router, "/receipts/chain/r-0", ACME_KEY).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["truncated"], true);
    assert_eq!(body["chain"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn adversarial_cycle_aborts_with_structured_error() {
    let (router, _state) = app();

    // r-a points at r-b before r-b exists; r-b closes the loop.
    let mut a = accepted_body("T-a");
    a["receipt_id"] = json!("r-a");
    a["caused_by_receipt_id"] = json!("r-b");
    let mut b = accepted_body("T-b");
    b["receipt_id"] = json!("r-b");
    b["caused_by_receipt_id"] = json!("r-a");
    post(&router, "/receipts", ACME_KEY, a).await;
    post(&router, "/receipts", ACME_KEY, b).await;

    let (status, body) = get(&router, "/receipts/chain/r-a", ACME_KEY).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "provenance_cycle");
}

#[tokio::test]
async fn unknown_root_is_not_found() {
    let (router, _state) = app();
    let (status, body) = get(&router, "/receipts/chain/r-ghost", ACME_KEY).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn delegation_children_are_listed() {
    let (router, _state) = app();
    let mut child_one = accepted_body("T-child-1");
    child_one["parent_task_id"] = json!("T-root");
    let mut child_two = accepted_body("T-child-2");
    child_two["parent_task_id"] = json!("T-root");
    post(&router, "/receipts", ACME_KEY, child_one).await;
    post(&router, "/receipts", ACME_KEY, child_two).await;
    post(&router, "/receipts", ACME_KEY, accepted_body("T-unrelated")).await;

    let (status, body) = get(&router, "/receipts/children/T-root", ACME_KEY).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let receipts = body["receipts"].as_array().unwrap();
    assert!(receipts.iter().all(|r| r["parent_task_id"] == "T-root"));
}
