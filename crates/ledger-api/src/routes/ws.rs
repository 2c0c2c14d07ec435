use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use ledger_core::{AccountName, LedgerError, Timestamp, TransferId};

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;
use crate::views::transfer_view;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `GET /accounts/:name/transfers`: a WebSocket stream of every transfer
/// touching `name`, pushed as it is created or moves to a new state. Backed
/// by polling the store rather than an in-process event bus, matching the
/// store's role as the single source of truth (§5).
pub fn router() -> Router<AppState> {
    Router::new().route("/accounts/:name/transfers", get(stream_transfers))
}

async fn stream_transfers(
    State(state): State<AppState>,
    Path(name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let account = AccountName::from(name.as_str());
    let principal = authenticate(&state, &method, &uri, &headers)?;
    if !principal.may_authorize(&account) {
        return Err(ApiError(LedgerError::Forbidden(
            "only the account owner or admin may stream its transfers".into(),
        )));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, account)))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, account: AccountName) {
    let mut seen: HashMap<TransferId, Timestamp> = HashMap::new();

    loop {
        let transfers = match state.store.list_transfers() {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(error = %err, "transfer stream poll failed");
                break;
            }
        };

        for transfer in transfers {
            let touches_account = transfer.source_funds.iter().any(|f| f.account == account)
                || transfer.destination_funds.iter().any(|f| f.account == account);
            if !touches_account {
                continue;
            }
            if seen.get(&transfer.id).copied() == Some(transfer.updated_at) {
                continue;
            }
            seen.insert(transfer.id, transfer.updated_at);

            let payload = transfer_view(&transfer, &state.base_uri).to_string();
            if socket.send(Message::Text(payload)).await.is_err() {
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    _ => {}
                }
            }
        }
    }
}
