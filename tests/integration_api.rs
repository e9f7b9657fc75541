//! HTTP API integration tests

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    middleware, Router,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;
use wallet_ledger::api::{self, AppState};
use wallet_ledger::idempotency::IdempotencyCache;
use wallet_ledger::lock::DistributedLock;

mod common;

fn test_app(state: AppState) -> Router {
    api::create_router()
        .layer(middleware::from_fn(api::middleware::logging_middleware))
        .layer(middleware::from_fn(api::middleware::context_middleware))
        .with_state(state)
}

async fn test_state() -> AppState {
    let pool = common::setup_test_db().await;
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let lock = DistributedLock::connect(&redis_url)
        .await
        .expect("failed to connect to redis");

    AppState {
        pool: pool.clone(),
        lock,
        lock_ttl: std::time::Duration::from_secs(5),
        lock_max_retries: 20,
        idempotency: IdempotencyCache::new(pool),
        snapshot_threshold: 100,
        debug_capture_dir: std::env::temp_dir().to_string_lossy().to_string(),
    }
}

#[tokio::test]
async fn test_create_credit_debit_roundtrip() {
    let state = test_state().await;
    let app = test_app(state);

    let wallet_id = format!("w-{}", Uuid::new_v4());

    let req = Request::builder()
        .method("POST")
        .uri("/wallets")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"wallet_id": wallet_id, "owner_id": "owner-1", "initial_balance": 10000})
                .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let req = Request::builder()
        .method("POST")
        .uri(format!("/wallets/{}/credit", wallet_id))
        .header("content-type", "application/json")
        .body(Body::from(json!({"amount": 500, "description": "bonus"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let req = Request::builder()
        .method("POST")
        .uri(format!("/wallets/{}/debit", wallet_id))
        .header("content-type", "application/json")
        .body(Body::from(json!({"amount": 2000, "description": "fee"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let req = Request::builder()
        .method("GET")
        .uri(format!("/wallets/{}", wallet_id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["balance"], 8500);
}

#[tokio::test]
async fn test_transfer_moves_funds_between_wallets() {
    let state = test_state().await;
    let app = test_app(state);

    let wallet_a = format!("w-{}", Uuid::new_v4());
    let wallet_b = format!("w-{}", Uuid::new_v4());

    for (id, balance) in [(&wallet_a, 10000), (&wallet_b, 0)] {
        let req = Request::builder()
            .method("POST")
            .uri("/wallets")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"wallet_id": id, "owner_id": "owner", "initial_balance": balance})
                    .to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let req = Request::builder()
        .method("POST")
        .uri(format!("/wallets/{}/transfer", wallet_a))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"to_wallet_id": wallet_b, "amount": 3000, "description": "rent"}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["from_wallet"]["balance"], 7000);
    assert_eq!(json["to_wallet"]["balance"], 3000);
}

#[tokio::test]
async fn test_idempotent_credit_applies_once() {
    let state = test_state().await;
    let app = test_app(state);

    let wallet_id = format!("w-{}", Uuid::new_v4());
    let req = Request::builder()
        .method("POST")
        .uri("/wallets")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"wallet_id": wallet_id, "owner_id": "owner-1", "initial_balance": 0}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let idempotency_key = Uuid::new_v4().to_string();
    let credit_body = json!({"amount": 1000, "description": "payout"}).to_string();

    for _ in 0..2 {
        let req = Request::builder()
            .method("POST")
            .uri(format!("/wallets/{}/credit", wallet_id))
            .header("content-type", "application/json")
            .header("Idempotency-Key", idempotency_key.clone())
            .body(Body::from(credit_body.clone()))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let req = Request::builder()
        .method("GET")
        .uri(format!("/wallets/{}", wallet_id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["balance"], 1000, "idempotency key must prevent double-credit");
}

#[tokio::test]
async fn test_debit_exceeding_balance_is_rejected() {
    let state = test_state().await;
    let app = test_app(state);

    let wallet_id = format!("w-{}", Uuid::new_v4());
    let req = Request::builder()
        .method("POST")
        .uri("/wallets")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"wallet_id": wallet_id, "owner_id": "owner-1", "initial_balance": 100}).to_string(),
        ))
        .unwrap();
    app.clone().oneshot(req).await.unwrap();

    let req = Request::builder()
        .method("POST")
        .uri(format!("/wallets/{}/debit", wallet_id))
        .header("content-type", "application/json")
        .body(Body::from(json!({"amount": 500}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_wallets_returns_created_wallets() {
    let state = test_state().await;
    let app = test_app(state);

    let wallet_id = format!("w-{}", Uuid::new_v4());
    let req = Request::builder()
        .method("POST")
        .uri("/wallets")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"wallet_id": wallet_id, "owner_id": "owner-1", "initial_balance": 0}).to_string(),
        ))
        .unwrap();
    app.clone().oneshot(req).await.unwrap();

    let req = Request::builder()
        .method("GET")
        .uri("/wallets")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["wallets"]
        .as_array()
        .unwrap()
        .iter()
        .any(|w| w["id"] == wallet_id));
}
