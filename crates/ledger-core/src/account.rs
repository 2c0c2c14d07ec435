//! Account: the owner of a balance, addressable by its durable `name`.

use serde::{Deserialize, Serialize};

use crate::types::{AccountName, Amount};

/// Material used by the auth gate to bind a request to this account's
/// `name` as a principal. The shape depends on the configured scheme
/// (basic credential hash, signature public key, or TLS fingerprint); the
/// engine never inspects its contents, only whether it is present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticationMaterial(pub String);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub name: AccountName,
    pub balance: Amount,
    pub held: Amount,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_material: Option<AuthenticationMaterial>,
}

impl Account {
    pub fn new(name: impl Into<AccountName>) -> Self {
        Self {
            name: name.into(),
            balance: Amount::ZERO,
            held: Amount::ZERO,
            is_admin: false,
            authentication_material: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_has_zero_balances() {
        let a = Account::new("alice");
        assert_eq!(a.balance, Amount::ZERO);
        assert_eq!(a.held, Amount::ZERO);
        assert!(!a.is_admin);
    }
}
