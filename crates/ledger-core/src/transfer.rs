//! Transfer: an atomic movement of value from one or more source funds to
//! one or more destination funds, governed by the state machine in
//! `ledger-engine`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AccountName, Amount, TransferId, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransferState {
    Proposed,
    Prepared,
    Completed,
    Rejected,
    Expired,
}

impl TransferState {
    /// A terminal state is never left once entered (invariant 5, §3).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Rejected | TransferState::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Proposed => "proposed",
            TransferState::Prepared => "prepared",
            TransferState::Completed => "completed",
            TransferState::Rejected => "rejected",
            TransferState::Expired => "expired",
        }
    }
}

/// A leg of a transfer debiting `account`. `authorization` is treated as
/// opaque: the engine trusts the auth gate to have bound the principal and
/// reacts only to its presence, not its contents (see the authorization
/// check in `ledger-auth`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SourceFund {
    pub account: AccountName,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DestinationFund {
    pub account: AccountName,
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub source_funds: Vec<SourceFund>,
    pub destination_funds: Vec<DestinationFund>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_condition: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_condition_fulfillment: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    pub state: TransferState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Transfer {
    pub fn source_total(&self) -> Amount {
        self.source_funds.iter().map(|f| f.amount).sum()
    }

    pub fn destination_total(&self) -> Amount {
        self.destination_funds.iter().map(|f| f.amount).sum()
    }

    /// All source funds carry a non-empty `authorization`.
    pub fn all_sources_authorized(&self) -> bool {
        !self.source_funds.is_empty()
            && self.source_funds.iter().all(|f| f.authorization.is_some())
    }

    pub fn has_execution_condition(&self) -> bool {
        self.execution_condition.is_some()
    }

    pub fn has_fulfillment(&self) -> bool {
        self.execution_condition_fulfillment.is_some()
    }

    /// Idempotence comparison for §3 invariant 6 / §4.3 upsert semantics:
    /// ignores `updated_at` and any wire-only formatting differences, since
    /// both sides are already the typed in-memory representation.
    pub fn normalized_eq(&self, other: &Transfer) -> bool {
        self.id == other.id
            && self.source_funds == other.source_funds
            && self.destination_funds == other.destination_funds
            && self.execution_condition == other.execution_condition
            && self.execution_condition_fulfillment == other.execution_condition_fulfillment
            && self.expires_at == other.expires_at
            && self.state == other.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn fund(name: &str, amount: &str) -> SourceFund {
        SourceFund {
            account: AccountName::from(name),
            amount: Amount::from_str(amount).unwrap(),
            authorization: None,
        }
    }

    #[test]
    fn terminal_states() {
        assert!(TransferState::Completed.is_terminal());
        assert!(TransferState::Rejected.is_terminal());
        assert!(TransferState::Expired.is_terminal());
        assert!(!TransferState::Proposed.is_terminal());
        assert!(!TransferState::Prepared.is_terminal());
    }

    #[test]
    fn unauthorized_sources_are_not_all_authorized() {
        let t = Transfer {
            id: TransferId::new(),
            source_funds: vec![fund("alice", "10")],
            destination_funds: vec![],
            execution_condition: None,
            execution_condition_fulfillment: None,
            expires_at: None,
            state: TransferState::Proposed,
            created_at: 0,
            updated_at: 0,
        };
        assert!(!t.all_sources_authorized());
    }
}
