//! Subscription: a durable registration by an account owner to receive
//! notifications about ledger events.

use serde::{Deserialize, Serialize};

use crate::types::{AccountName, SubscriptionId, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionEvent {
    #[serde(rename = "transfer.update")]
    TransferUpdate,
}

impl SubscriptionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionEvent::TransferUpdate => "transfer.update",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub owner: AccountName,
    pub event: SubscriptionEvent,
    pub target_uri: String,
    pub created_at: Timestamp,
}
