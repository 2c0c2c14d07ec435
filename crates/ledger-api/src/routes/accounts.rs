use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::get;
use axum::{Json, Router};
use ledger_auth::require_admin;
use ledger_core::{Account, AccountName, Amount, AuthenticationMaterial, LedgerError};
use serde::Deserialize;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route("/accounts/:name", get(get_account).put(put_account))
}

async fn list_accounts(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<Vec<Account>>, ApiError> {
    let principal = authenticate(&state, &method, &uri, &headers)?;
    require_admin(&principal)?;
    let mut accounts = state.store.list_accounts()?;
    accounts.truncate(ledger_core::MAX_ACCOUNTS_PER_QUERY);
    Ok(Json(accounts))
}

async fn get_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Account>, ApiError> {
    let account = state
        .store
        .get_account(&AccountName::from(name.as_str()))?
        .ok_or_else(|| ApiError(LedgerError::NotFound(format!("account {name}"))))?;
    Ok(Json(account))
}

#[derive(Deserialize)]
pub struct AccountUpsertBody {
    #[serde(default)]
    pub balance: Option<Amount>,
    #[serde(default)]
    pub held: Option<Amount>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub authentication_material: Option<AuthenticationMaterial>,
}

async fn put_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<AccountUpsertBody>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let principal = authenticate(&state, &method, &uri, &headers)?;
    require_admin(&principal)?;

    let account_name = AccountName::from(name.as_str());
    let existing = state.store.get_account(&account_name)?;
    let created = existing.is_none();

    let account = Account {
        name: account_name,
        balance: body.balance.unwrap_or_else(|| existing.as_ref().map(|a| a.balance).unwrap_or(Amount::ZERO)),
        held: body.held.unwrap_or_else(|| existing.as_ref().map(|a| a.held).unwrap_or(Amount::ZERO)),
        is_admin: body.is_admin,
        authentication_material: body.authentication_material.or_else(|| existing.and_then(|a| a.authentication_material)),
    };

    state.store.transaction(|txn| txn.put_account(&account))?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(account)))
}
