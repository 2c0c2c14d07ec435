//! Notification: a single delivery attempt record tied to a subscription
//! and a triggering transfer transition.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{NotificationId, SubscriptionId, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationState {
    Pending,
    /// Claimed by a worker; not yet resolved. Never observable outside the
    /// store's transaction (the CAS target of a worker claim, §4.5).
    InFlight,
    Delivered,
    Abandoned,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub subscription_id: SubscriptionId,
    pub transfer_snapshot: Value,
    pub attempts: u32,
    pub next_attempt_at: Timestamp,
    pub state: NotificationState,
}

impl Notification {
    pub fn new(subscription_id: SubscriptionId, transfer_snapshot: Value, now: Timestamp) -> Self {
        Self {
            id: NotificationId::new(),
            subscription_id,
            transfer_snapshot,
            attempts: 0,
            next_attempt_at: now,
            state: NotificationState::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            NotificationState::Delivered | NotificationState::Abandoned
        )
    }
}

/// Exponential backoff with a ceiling, per §4.5 / `NOTIFICATION_BACKOFF_CEILING_SECS`.
pub fn backoff_secs(attempts: u32, ceiling_secs: u64) -> u64 {
    let raw = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
    raw.min(ceiling_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        assert_eq!(backoff_secs(0, 60), 1);
        assert_eq!(backoff_secs(3, 60), 8);
        assert_eq!(backoff_secs(10, 60), 60);
        assert_eq!(backoff_secs(63, 60), 60);
    }
}
