use ledger_core::{Subscription, Transfer};
use serde_json::Value;

/// Renders a `Transfer` with its `id` field replaced by an absolute URI
/// rooted at the configured `base_uri` (§6 "payload normalization").
pub fn transfer_view(transfer: &Transfer, base_uri: &str) -> Value {
    let mut value = serde_json::to_value(transfer).expect("Transfer always serializes");
    value["id"] = Value::String(format!("{}/transfers/{}", base_uri.trim_end_matches('/'), transfer.id));
    value
}

pub fn subscription_view(subscription: &Subscription, base_uri: &str) -> Value {
    let mut value = serde_json::to_value(subscription).expect("Subscription always serializes");
    value["id"] = Value::String(format!(
        "{}/subscriptions/{}",
        base_uri.trim_end_matches('/'),
        subscription.id
    ));
    value
}
