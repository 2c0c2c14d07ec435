use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::Router;

use crate::routes::{accounts, ambient, subscriptions, transfers, ws};
use crate::state::AppState;

/// Assembles the full HTTP surface (§6) behind permissive CORS and request
/// tracing, the same middleware shape the teacher's RPC server wraps its
/// transport in.
pub fn build(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .merge(ambient::router())
        .merge(accounts::router())
        .merge(transfers::router())
        .merge(subscriptions::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
