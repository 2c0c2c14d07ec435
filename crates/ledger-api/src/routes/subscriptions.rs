use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::get;
use axum::{Json, Router};
use ledger_core::{LedgerError, NotificationId, Subscription, SubscriptionEvent, SubscriptionId};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;
use crate::views::subscription_view;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/subscriptions/:id",
            get(get_subscription).put(put_subscription).delete(delete_subscription),
        )
        .route(
            "/subscriptions/:sid/notifications/:nid",
            get(get_notification),
        )
}

fn parse_sub_id(raw: &str) -> Result<SubscriptionId, ApiError> {
    SubscriptionId::parse(raw)
        .map_err(|_| ApiError(LedgerError::InvalidRequest(format!("invalid subscription id: {raw}"))))
}

async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_sub_id(&id)?;
    let sub = state
        .store
        .get_subscription(&id)?
        .ok_or_else(|| ApiError(LedgerError::NotFound(format!("subscription {id}"))))?;
    Ok(Json(subscription_view(&sub, &state.base_uri)))
}

#[derive(Deserialize)]
pub struct SubscriptionUpsertBody {
    pub owner: String,
    pub event: SubscriptionEvent,
    pub target_uri: String,
}

async fn put_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<SubscriptionUpsertBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id = parse_sub_id(&id)?;
    let principal = authenticate(&state, &method, &uri, &headers)?;
    let owner = ledger_core::AccountName::from(body.owner.as_str());
    if !principal.may_authorize(&owner) {
        return Err(ApiError(LedgerError::Forbidden(
            "a subscription's owner must match the authenticated principal".into(),
        )));
    }

    let created = state.store.get_subscription(&id)?.is_none();
    let sub = Subscription {
        id,
        owner,
        event: body.event,
        target_uri: body.target_uri,
        created_at: ledger_core::now(),
    };
    state.store.transaction(|txn| txn.put_subscription(&sub))?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(subscription_view(&sub, &state.base_uri))))
}

async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let id = parse_sub_id(&id)?;
    let principal = authenticate(&state, &method, &uri, &headers)?;
    let sub = state
        .store
        .get_subscription(&id)?
        .ok_or_else(|| ApiError(LedgerError::NotFound(format!("subscription {id}"))))?;
    if !principal.may_authorize(&sub.owner) {
        return Err(ApiError(LedgerError::Forbidden(
            "only the owner or admin may delete a subscription".into(),
        )));
    }
    state.store.transaction(|txn| txn.delete_subscription(&id))?;
    Ok(StatusCode::OK)
}

async fn get_notification(
    State(state): State<AppState>,
    Path((sid, nid)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<ledger_core::Notification>, ApiError> {
    let sid = parse_sub_id(&sid)?;
    let nid = NotificationId::parse(&nid)
        .map_err(|_| ApiError(LedgerError::InvalidRequest(format!("invalid notification id: {nid}"))))?;
    let principal = authenticate(&state, &method, &uri, &headers)?;

    let sub = state
        .store
        .get_subscription(&sid)?
        .ok_or_else(|| ApiError(LedgerError::NotFound(format!("subscription {sid}"))))?;
    if !principal.may_authorize(&sub.owner) {
        return Err(ApiError(LedgerError::Forbidden(
            "only the owning account or admin may view this notification".into(),
        )));
    }

    let notification = state
        .store
        .get_notification(&nid)?
        .filter(|n| n.subscription_id == sid)
        .ok_or_else(|| ApiError(LedgerError::NotFound(format!("notification {nid}"))))?;
    Ok(Json(notification))
}
