use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health` and `GET /` (§6.1): the ambient surface every deployment
/// needs regardless of what the ledger itself exposes.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(root)).route("/health", get(health))
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "ledgerd",
        "version": env!("CARGO_PKG_VERSION"),
        "base_uri": state.base_uri,
    }))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.store.ping() {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "message": err.to_string() })),
        ),
    }
}
