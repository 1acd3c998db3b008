//! HTTP API tests, driven through the router without binding a socket

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::test_writer_config;
use trust_ledger::api::{self, AppState};
use trust_ledger::ledger::MemoryStore;

fn test_app() -> Router {
    let state = AppState::new(Arc::new(MemoryStore::new()), test_writer_config(5), "USD");
    api::router(state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn contribution(trust_id: &str, contributor: &str, amount: i64) -> Value {
    json!({
        "actor_id": contributor,
        "payload": {
            "record_type": "contribution",
            "trust_id": trust_id,
            "contributor_id": contributor,
            "amount": amount,
            "currency": "USD"
        }
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_append_links_records() {
    let app = test_app();

    let (status, first) = send(&app, post_json("/trusts/t1/records", contribution("t1", "u1", 1000))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["attempts"], 1);
    assert_eq!(first["record"]["previous_hash"], "0");
    assert_eq!(first["record"]["record_hash"].as_str().unwrap().len(), 64);

    let (status, second) = send(&app, post_json("/trusts/t1/records", contribution("t1", "u2", 2000))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["record"]["previous_hash"], first["record"]["record_hash"]);
}

#[tokio::test]
async fn test_invalid_payload_is_unprocessable() {
    let app = test_app();

    let (status, body) = send(&app, post_json("/trusts/t1/records", contribution("t1", "u1", 0))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["retryable"], false);

    // Path and payload disagree on the Trust
    let (status, _) = send(&app, post_json("/trusts/t2/records", contribution("t1", "u1", 500))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, stats) = send(&app, get("/trusts/t1/stats")).await;
    assert_eq!(stats["totalRecords"], 0);
}

#[tokio::test]
async fn test_read_endpoints() {
    let app = test_app();

    for (contributor, amount) in [("u1", 1000), ("u2", 2000), ("u3", 3000)] {
        let (status, _) = send(
            &app,
            post_json("/trusts/t1/records", contribution("t1", contributor, amount)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    for (voter, vote) in [("v1", "approve"), ("v2", "reject")] {
        let request = json!({
            "actor_id": voter,
            "payload": {
                "record_type": "vote",
                "trust_id": "t1",
                "member_id_voted_on": "m1",
                "voter_id": voter,
                "vote": vote
            }
        });
        let (status, _) = send(&app, post_json("/trusts/t1/records", request)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, stats) = send(&app, get("/trusts/t1/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalRecords"], 5);
    assert_eq!(stats["verificationRate"], 100.0);
    assert_eq!(stats["chainIntegrity"], true);
    assert_eq!(stats["recordsByType"]["contributions"], 3);

    let (_, voting) = send(&app, get("/trusts/t1/voting")).await;
    assert_eq!(voting["totalVotes"], 2);
    assert_eq!(voting["approvalRate"], 50.0);

    let (_, financial) = send(&app, get("/trusts/t1/financial")).await;
    assert_eq!(financial["totalContributed"], 6000);
    assert_eq!(financial["averageContribution"], 2000);
    assert_eq!(financial["display"]["totalContributed"], "60.00");
    assert_eq!(financial["display"]["averageContribution"], "20.00");
    assert_eq!(financial["currency"], "USD");

    let (status, trail) = send(&app, get("/trusts/t1/audit")).await;
    assert_eq!(status, StatusCode::OK);
    let trail = trail.as_array().unwrap();
    assert_eq!(trail.len(), 5);
    assert!(trail.iter().all(|r| r["verification"]["isValid"] == true));

    let (_, history) = send(&app, get("/trusts/t1/members/u2/history")).await;
    assert_eq!(history.as_array().unwrap().len(), 1);

    let id = trail[0]["id"].as_str().unwrap().to_string();
    let (status, verification) = send(&app, get(&format!("/records/{}/verify", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verification["isValid"], true);
    assert_eq!(verification["recordId"], id);
}

#[tokio::test]
async fn test_unknown_record_is_not_found() {
    let app = test_app();
    let uri = format!("/records/{}/verify", uuid::Uuid::new_v4());
    let (status, _) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_report_for_empty_trust() {
    let app = test_app();
    let (status, report) = send(&app, get("/trusts/empty/report")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["auditTrail"].as_array().unwrap().len(), 0);
    assert_eq!(report["voting"]["approvalRate"], 0.0);
    assert_eq!(report["financial"]["averageLoan"], 0);
}
