use std::sync::Arc;

use ledger_auth::AuthGate;
use ledger_expiry::ExpirySender;
use ledger_store::Store;

/// Shared application state injected into every handler via `State<AppState>`
/// (§9 "Global singletons" note: lifted into an explicit application-state
/// record rather than process-wide statics).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub expiry_tx: ExpirySender,
    pub auth_gate: Arc<AuthGate>,
    pub base_uri: String,
}
