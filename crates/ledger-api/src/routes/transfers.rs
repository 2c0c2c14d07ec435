use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, Uri};
use axum::{Json, Router};
use ledger_core::{AccountName, DestinationFund, LedgerError, SourceFund, Timestamp, TransferId};
use ledger_engine::{upsert_transfer, TransferRequest};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;
use crate::views::transfer_view;
use axum::http::HeaderMap;
use axum::routing::{get, put};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/transfers/:id", get(get_transfer).put(put_transfer))
        .route(
            "/transfers/:id/fulfillment",
            get(get_fulfillment).put(put_fulfillment),
        )
        .route("/transfers/:id/state", get(get_state))
}

fn parse_id(raw: &str) -> Result<TransferId, ApiError> {
    TransferId::parse(raw)
        .map_err(|_| ApiError(LedgerError::InvalidRequest(format!("invalid transfer id: {raw}"))))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id)?;
    let transfer = state
        .store
        .get_transfer(&id)?
        .ok_or_else(|| ApiError(LedgerError::NotFound(format!("transfer {id}"))))?;
    Ok(Json(transfer_view(&transfer, &state.base_uri)))
}

#[derive(Deserialize)]
pub struct TransferUpsertBody {
    #[serde(default)]
    pub id: Option<uuid::Uuid>,
    pub source_funds: Vec<SourceFund>,
    pub destination_funds: Vec<DestinationFund>,
    #[serde(default)]
    pub execution_condition: Option<Value>,
    #[serde(default)]
    pub execution_condition_fulfillment: Option<Value>,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub reject: bool,
}

async fn put_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<TransferUpsertBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let path_id = parse_id(&id)?;
    if let Some(body_id) = body.id {
        if body_id != path_id.0 {
            return Err(ApiError(LedgerError::InvalidRequest(
                "body id does not match path id".into(),
            )));
        }
    }

    let principal = authenticate(&state, &method, &uri, &headers)?;

    let req = TransferRequest {
        id: path_id,
        source_funds: body.source_funds,
        destination_funds: body.destination_funds,
        execution_condition: body.execution_condition,
        execution_condition_fulfillment: body.execution_condition_fulfillment,
        expires_at: body.expires_at,
        reject: body.reject,
    };

    let (transfer, outcome) = upsert_transfer(&state.store, req, &principal)?;

    if let Some(expires_at) = transfer.expires_at {
        if !transfer.state.is_terminal() {
            let _ = state
                .expiry_tx
                .try_send(ledger_expiry::ExpirySignal { id: transfer.id, expires_at });
        }
    }

    let status = StatusCode::from_u16(outcome.http_status()).unwrap();
    Ok((status, Json(transfer_view(&transfer, &state.base_uri))))
}

async fn get_fulfillment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id)?;
    let transfer = state
        .store
        .get_transfer(&id)?
        .ok_or_else(|| ApiError(LedgerError::NotFound(format!("transfer {id}"))))?;
    Ok(Json(serde_json::json!({
        "fulfillment": transfer.execution_condition_fulfillment,
    })))
}

async fn put_fulfillment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(fulfillment): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id)?;
    let transfer = ledger_engine::fulfill_transfer(&state.store, id, fulfillment)?;
    Ok(Json(transfer_view(&transfer, &state.base_uri)))
}

async fn get_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id)?;
    let transfer = state
        .store
        .get_transfer(&id)?
        .ok_or_else(|| ApiError(LedgerError::NotFound(format!("transfer {id}"))))?;
    Ok(Json(serde_json::json!({ "state": transfer.state.as_str() })))
}

/// Accounts referenced by a transfer (source + destination), used by the
/// WebSocket stream to filter events for one account.
pub fn referenced_accounts(transfer: &ledger_core::Transfer) -> Vec<AccountName> {
    transfer
        .source_funds
        .iter()
        .map(|f| f.account.clone())
        .chain(transfer.destination_funds.iter().map(|f| f.account.clone()))
        .collect()
}
