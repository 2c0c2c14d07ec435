//! In-process HTTP surface tests (§8): drives the full `axum::Router` via
//! `tower::ServiceExt::oneshot`, no bound socket required.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::Engine;
use ledger_auth::{AuthGate, AuthScheme};
use ledger_core::{Account, AuthenticationMaterial};
use ledger_store::Store;
use serde_json::{json, Value};
use tower::ServiceExt;

fn basic_auth(username: &str, password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}

fn build_app(store: Arc<Store>) -> axum::Router {
    let (_expiry_handle, expiry_tx) =
        ledger_expiry::spawn(Arc::clone(&store), tokio::sync::watch::channel(false).1);
    let auth_gate = Arc::new(AuthGate::new(AuthScheme::Basic));
    let state = ledger_api::AppState {
        store,
        expiry_tx,
        auth_gate,
        base_uri: "http://test.invalid".to_string(),
    };
    ledger_api::build(state)
}

fn seed_account(store: &Store, name: &str, password: &str, is_admin: bool, balance: &str) {
    let mut account = Account::new(name);
    account.authentication_material =
        Some(AuthenticationMaterial(blake3::hash(password.as_bytes()).to_hex().to_string()));
    account.is_admin = is_admin;
    account.balance = balance.parse().unwrap();
    store.transaction(|txn| txn.put_account(&account)).unwrap();
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_is_public_and_ok() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let app = build_app(store);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn listing_accounts_without_credentials_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let app = build_app(store);

    let response = app
        .oneshot(Request::builder().uri("/accounts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn non_admin_cannot_list_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    seed_account(&store, "alice", "hunter2", false, "0");
    let app = build_app(store);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/accounts")
                .header(header::AUTHORIZATION, basic_auth("alice", "hunter2"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_can_provision_an_account() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    seed_account(&store, "root", "adminpass", true, "0");
    let app = build_app(store);

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/accounts/bob")
                .header(header::AUTHORIZATION, basic_auth("root", "adminpass"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "balance": "500", "is_admin": false }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["balance"], "500");
}

#[tokio::test]
async fn full_transfer_lifecycle_reaches_completed_and_updates_balances() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    seed_account(&store, "alice", "alicepw", false, "100");
    seed_account(&store, "bob", "bobpw", false, "0");
    let app = build_app(store);

    let transfer_id = uuid::Uuid::new_v4();
    let path = format!("/transfers/{transfer_id}");

    // Proposed: alice has not yet authorized her source fund.
    let propose_body = json!({
        "source_funds": [{ "account": "alice", "amount": "40" }],
        "destination_funds": [{ "account": "bob", "amount": "40" }],
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(&path)
                .header(header::AUTHORIZATION, basic_auth("alice", "alicepw"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(propose_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["state"], "proposed");

    // Authorize: alice resubmits with her authorization present.
    let authorize_body = json!({
        "source_funds": [{ "account": "alice", "amount": "40", "authorization": true }],
        "destination_funds": [{ "account": "bob", "amount": "40" }],
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(&path)
                .header(header::AUTHORIZATION, basic_auth("alice", "alicepw"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(authorize_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["state"], "completed");

    // Balances settled: alice -40, bob +40.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/accounts/alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let alice = body_json(response).await;
    assert_eq!(alice["balance"], "60");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/accounts/bob")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bob = body_json(response).await;
    assert_eq!(bob["balance"], "40");
}

#[tokio::test]
async fn execution_condition_reaches_completed_via_fulfillment() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    seed_account(&store, "alice", "alicepw", false, "100");
    seed_account(&store, "bob", "bobpw", false, "0");
    let app = build_app(store);

    let transfer_id = uuid::Uuid::new_v4();
    let path = format!("/transfers/{transfer_id}");

    // Authorized up front, but gated behind an execution condition: settles
    // into `prepared`, not `completed`.
    let propose_body = json!({
        "source_funds": [{ "account": "alice", "amount": "40", "authorization": true }],
        "destination_funds": [{ "account": "bob", "amount": "40" }],
        "execution_condition": { "type": "preimage-sha256", "digest": "deadbeef" },
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(&path)
                .header(header::AUTHORIZATION, basic_auth("alice", "alicepw"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(propose_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["state"], "prepared");

    // No funds have moved yet: alice's 40 is held, not debited.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/accounts/alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let alice = body_json(response).await;
    assert_eq!(alice["balance"], "100");
    assert_eq!(alice["held"], "40");

    // Supplying the fulfillment discharges the condition and completes it.
    let fulfillment_path = format!("{path}/fulfillment");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(&fulfillment_path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "preimage": "cafebabe" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["state"], "completed");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/accounts/alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let alice = body_json(response).await;
    assert_eq!(alice["balance"], "60");
    assert_eq!(alice["held"], "0");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/accounts/bob")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bob = body_json(response).await;
    assert_eq!(bob["balance"], "40");
}
