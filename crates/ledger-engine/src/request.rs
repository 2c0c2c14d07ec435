//! Inbound transfer payload and the authenticated principal the auth gate
//! hands to the engine.

use ledger_core::{AccountName, DestinationFund, SourceFund, Timestamp, TransferId};
use serde_json::Value;

/// The identity the auth gate converged on (§4.6). The engine never sees
/// the underlying credential scheme, only this.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    Account(AccountName),
    Admin,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin)
    }

    /// Whether this principal may assert authorization for `account`: an
    /// account can only authorize its own source funds; `admin` can
    /// authorize for anyone.
    pub fn may_authorize(&self, account: &AccountName) -> bool {
        match self {
            Principal::Admin => true,
            Principal::Account(name) => name == account,
        }
    }
}

/// The typed shape of a `PUT /transfers/:id` body, after JSON parsing and
/// path/body `id` normalization have already happened at the HTTP boundary
/// (§6: "payload normalization").
#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub id: TransferId,
    pub source_funds: Vec<SourceFund>,
    pub destination_funds: Vec<DestinationFund>,
    pub execution_condition: Option<Value>,
    pub execution_condition_fulfillment: Option<Value>,
    pub expires_at: Option<Timestamp>,
    /// Explicit reject action by an authorized party (§4.3: "any non-terminal
    /// -> rejected"). Not part of the original wire table in §6, which has no
    /// dedicated reject endpoint; this expansion exposes it as a body field
    /// on the same `PUT /transfers/:id` call rather than adding a new route.
    pub reject: bool,
}

impl TransferRequest {
    /// Drops any source-fund `authorization` whose account the principal is
    /// not entitled to assert for (§4.6: forged/inapplicable authorizations
    /// collapse into "authorization not present").
    pub fn with_authorizations_filtered_by(mut self, principal: &Principal) -> Self {
        for fund in &mut self.source_funds {
            if fund.authorization.is_some() && !principal.may_authorize(&fund.account) {
                fund.authorization = None;
            }
        }
        self
    }
}
