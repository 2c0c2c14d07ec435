//! ledger-api
//!
//! HTTP surface for the ledger service: a REST + WebSocket layer over
//! `ledger-engine`'s transfer state machine, `ledger-store`'s accounts and
//! subscriptions, and `ledger-auth`'s authentication gate (§6).

pub mod auth;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
pub mod views;

pub use error::ApiError;
pub use router::build;
pub use state::AppState;
