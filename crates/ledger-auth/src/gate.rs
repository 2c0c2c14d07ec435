//! Auth gate (§4.6): three credential schemes that all converge on the same
//! authenticated `Principal`, handed to the authorization check below. The
//! wire-level differences between schemes never leak past this module.

use base64::Engine;
use hmac::{Hmac, Mac};
use ledger_core::{Account, AccountName, LedgerError};
use ledger_engine::Principal;
use ledger_store::Store;
use sha2::Sha256;
use subtle::ConstantTimeEq;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Signature,
    TlsClientCert,
}

/// The authenticated credential extracted from one HTTP request, already
/// picked apart per the configured scheme by the HTTP layer.
pub enum Credential<'a> {
    Basic {
        username: &'a str,
        password: &'a str,
    },
    Signature {
        key_id: &'a str,
        signature_b64: &'a str,
        canonical_request: &'a [u8],
    },
    TlsClientCert {
        fingerprint: &'a str,
    },
}

pub struct AuthGate {
    scheme: AuthScheme,
}

impl AuthGate {
    pub fn new(scheme: AuthScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// Runs the credential through whichever scheme it carries, independent
    /// of `self.scheme` (the HTTP layer only builds the `Credential` variant
    /// that matches the configured scheme, but the gate is fine proving
    /// whichever one it's handed).
    pub fn authenticate(&self, store: &Store, credential: Credential) -> Result<Principal, LedgerError> {
        match credential {
            Credential::Basic { username, password } => self.authenticate_basic(store, username, password),
            Credential::Signature {
                key_id,
                signature_b64,
                canonical_request,
            } => self.authenticate_signature(store, key_id, signature_b64, canonical_request),
            Credential::TlsClientCert { fingerprint } => self.authenticate_tls(store, fingerprint),
        }
    }

    fn authenticate_basic(&self, store: &Store, username: &str, password: &str) -> Result<Principal, LedgerError> {
        let account = lookup(store, username)?;
        let material = material_of(&account)?;
        let expected = blake3::hash(password.as_bytes()).to_hex().to_string();
        if !bytes_eq(material.as_bytes(), expected.as_bytes()) {
            return Err(LedgerError::Unauthorized);
        }
        Ok(principal_for(&account))
    }

    fn authenticate_signature(
        &self,
        store: &Store,
        key_id: &str,
        signature_b64: &str,
        canonical_request: &[u8],
    ) -> Result<Principal, LedgerError> {
        let account = lookup(store, key_id)?;
        let material = material_of(&account)?;
        let key_bytes = hex::decode(material).map_err(|_| LedgerError::Unauthorized)?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key_bytes)
            .map_err(|e| LedgerError::internal(e.to_string()))?;
        mac.update(canonical_request);
        let expected = mac.finalize().into_bytes();

        let supplied = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|_| LedgerError::Unauthorized)?;
        if !bytes_eq(&supplied, &expected) {
            return Err(LedgerError::Unauthorized);
        }
        Ok(principal_for(&account))
    }

    fn authenticate_tls(&self, store: &Store, fingerprint: &str) -> Result<Principal, LedgerError> {
        let accounts = store.list_accounts()?;
        let account = accounts
            .into_iter()
            .find(|a| {
                a.authentication_material
                    .as_ref()
                    .is_some_and(|m| bytes_eq(m.0.as_bytes(), fingerprint.as_bytes()))
            })
            .ok_or(LedgerError::Unauthorized)?;
        Ok(principal_for(&account))
    }
}

fn lookup(store: &Store, name: &str) -> Result<Account, LedgerError> {
    store
        .get_account(&AccountName::from(name))?
        .ok_or(LedgerError::Unauthorized)
}

fn material_of(account: &Account) -> Result<&str, LedgerError> {
    account
        .authentication_material
        .as_ref()
        .map(|m| m.0.as_str())
        .ok_or(LedgerError::Unauthorized)
}

fn principal_for(account: &Account) -> Principal {
    if account.is_admin {
        Principal::Admin
    } else {
        Principal::Account(account.name.clone())
    }
}

fn bytes_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Admin-only endpoints (§4.6, e.g. `GET /accounts`): `Forbidden` otherwise.
pub fn require_admin(principal: &Principal) -> Result<(), LedgerError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(LedgerError::Forbidden("admin principal required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::AuthenticationMaterial;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn basic_auth_succeeds_with_matching_password() {
        let (_dir, s) = store();
        let mut account = Account::new("alice");
        let hash = blake3::hash(b"hunter2").to_hex().to_string();
        account.authentication_material = Some(AuthenticationMaterial(hash));
        s.transaction(|txn| txn.put_account(&account)).unwrap();

        let gate = AuthGate::new(AuthScheme::Basic);
        let principal = gate
            .authenticate(
                &s,
                Credential::Basic {
                    username: "alice",
                    password: "hunter2",
                },
            )
            .unwrap();
        assert_eq!(principal, Principal::Account("alice".into()));
    }

    #[test]
    fn basic_auth_rejects_wrong_password() {
        let (_dir, s) = store();
        let mut account = Account::new("alice");
        let hash = blake3::hash(b"hunter2").to_hex().to_string();
        account.authentication_material = Some(AuthenticationMaterial(hash));
        s.transaction(|txn| txn.put_account(&account)).unwrap();

        let gate = AuthGate::new(AuthScheme::Basic);
        let result = gate.authenticate(
            &s,
            Credential::Basic {
                username: "alice",
                password: "wrong",
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn require_admin_rejects_non_admin_principal() {
        let principal = Principal::Account("alice".into());
        assert!(require_admin(&principal).is_err());
        assert!(require_admin(&Principal::Admin).is_ok());
    }
}
