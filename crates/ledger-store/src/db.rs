use std::path::Path;

use ledger_core::{
    Account, AccountName, LedgerError, Notification, NotificationId, NotificationState,
    Subscription, SubscriptionId, Transfer, TransferId, STORE_TRANSACTION_MAX_RETRIES,
};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::Transactional;

/// Result of a fallible operation inside a [`Store::transaction`] closure.
/// Aborting with `LedgerError` discards every buffered write in the scope;
/// a bare storage failure also aborts, mapped to `LedgerError::Internal` by
/// the caller.
pub type TxResult<T> = Result<T, ConflictableTransactionError<LedgerError>>;

pub fn abort(err: LedgerError) -> ConflictableTransactionError<LedgerError> {
    ConflictableTransactionError::Abort(err)
}

fn get_typed<T: serde::de::DeserializeOwned>(
    tree: &TransactionalTree,
    key: &[u8],
) -> TxResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => {
            let value = bincode::deserialize(&bytes)
                .map_err(|e| abort(LedgerError::internal(e.to_string())))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn put_typed<T: serde::Serialize>(tree: &TransactionalTree, key: &[u8], value: &T) -> TxResult<()> {
    let bytes =
        bincode::serialize(value).map_err(|e| abort(LedgerError::internal(e.to_string())))?;
    tree.insert(key, bytes)?;
    Ok(())
}

/// Persistent, transactional key-path store backed by sled.
///
/// Named trees mirror the top-level path segments of the logical layout:
///   people        — account name (utf8)       → bincode(Account)
///   transfers     — transfer id (utf8 uuid)    → bincode(Transfer)
///   notifications — notification id (utf8 uuid) → bincode(Notification)
///   subscriptions — subscription id (utf8 uuid) → bincode(Subscription)
///   meta          — small operational values, e.g. schema markers
///
/// `people/<name>/subscriptions/<id>` from the logical layout is realized as
/// the `subscriptions` tree keyed by subscription id alone, since lookup by
/// id (not owner) is the access pattern the HTTP surface needs; `Subscription`
/// still carries its `owner` field for owner-scoped queries.
pub struct Store {
    db: sled::Db,
    people: sled::Tree,
    transfers: sled::Tree,
    notifications: sled::Tree,
    subscriptions: sled::Tree,
    meta: sled::Tree,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| LedgerError::internal(e.to_string()))?;
        let people = open_tree(&db, "people")?;
        let transfers = open_tree(&db, "transfers")?;
        let notifications = open_tree(&db, "notifications")?;
        let subscriptions = open_tree(&db, "subscriptions")?;
        let meta = open_tree(&db, "meta")?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(Self {
            db,
            people,
            transfers,
            notifications,
            subscriptions,
            meta,
        })
    }

    pub fn flush(&self) -> Result<(), LedgerError> {
        self.db
            .flush()
            .map_err(|e| LedgerError::internal(e.to_string()))?;
        Ok(())
    }

    /// Used by the health endpoint: a cheap round-trip against the store.
    pub fn ping(&self) -> Result<(), LedgerError> {
        self.meta
            .get(b"ping")
            .map_err(|e| LedgerError::internal(e.to_string()))?;
        Ok(())
    }

    // ── Non-transactional reads (startup reload, listings) ──────────────────

    pub fn get_account(&self, name: &AccountName) -> Result<Option<Account>, LedgerError> {
        self.read(&self.people, name.as_str().as_bytes())
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.scan(&self.people)
    }

    pub fn get_transfer(&self, id: &TransferId) -> Result<Option<Transfer>, LedgerError> {
        self.read(&self.transfers, id.to_key().as_bytes())
    }

    /// All non-terminal transfers, for the Expiry Monitor's startup heap reload.
    pub fn list_non_terminal_transfers(&self) -> Result<Vec<Transfer>, LedgerError> {
        let all: Vec<Transfer> = self.scan(&self.transfers)?;
        Ok(all.into_iter().filter(|t| !t.state.is_terminal()).collect())
    }

    /// Every transfer, regardless of state. Used by the account transfer
    /// stream to detect transitions since the caller's last poll.
    pub fn list_transfers(&self) -> Result<Vec<Transfer>, LedgerError> {
        self.scan(&self.transfers)
    }

    pub fn get_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, LedgerError> {
        self.read(&self.subscriptions, id.to_key().as_bytes())
    }

    pub fn list_subscriptions(&self) -> Result<Vec<Subscription>, LedgerError> {
        self.scan(&self.subscriptions)
    }

    pub fn list_subscriptions_for_owner(
        &self,
        owner: &AccountName,
    ) -> Result<Vec<Subscription>, LedgerError> {
        Ok(self
            .list_subscriptions()?
            .into_iter()
            .filter(|s| &s.owner == owner)
            .collect())
    }

    pub fn get_notification(
        &self,
        id: &NotificationId,
    ) -> Result<Option<Notification>, LedgerError> {
        self.read(&self.notifications, id.to_key().as_bytes())
    }

    fn read<T: serde::de::DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, LedgerError> {
        match tree
            .get(key)
            .map_err(|e| LedgerError::internal(e.to_string()))?
        {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| LedgerError::internal(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, tree: &sled::Tree) -> Result<Vec<T>, LedgerError> {
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, bytes) = item.map_err(|e| LedgerError::internal(e.to_string()))?;
            out.push(
                bincode::deserialize(&bytes).map_err(|e| LedgerError::internal(e.to_string()))?,
            );
        }
        Ok(out)
    }

    // ── Transactions ──────────────────────────────────────────────────────────

    /// Runs `f` under snapshot isolation across all five trees. A `LedgerError`
    /// returned from `f` aborts every buffered write in the scope and is
    /// returned as-is. A storage-level conflict is retried up to
    /// [`STORE_TRANSACTION_MAX_RETRIES`] times before giving up with
    /// `LedgerError::Conflict` (§7: "retried internally up to K times, then 409").
    pub fn transaction<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: Fn(&StoreTxn) -> TxResult<T>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = (
                &self.people,
                &self.transfers,
                &self.notifications,
                &self.subscriptions,
                &self.meta,
            )
                .transaction(|(people, transfers, notifications, subscriptions, meta)| {
                    let txn = StoreTxn {
                        people,
                        transfers,
                        notifications,
                        subscriptions,
                        meta,
                    };
                    f(&txn)
                });

            match outcome {
                Ok(value) => return Ok(value),
                Err(TransactionError::Abort(err)) => return Err(err),
                Err(TransactionError::Storage(err)) => {
                    attempt += 1;
                    if attempt > STORE_TRANSACTION_MAX_RETRIES {
                        tracing::error!(%err, attempt, "store transaction exhausted retries");
                        return Err(LedgerError::Conflict(format!(
                            "store transaction did not succeed after {attempt} attempts: {err}"
                        )));
                    }
                    tracing::warn!(%err, attempt, "store transaction storage error, retrying");
                }
            }
        }
    }
}

fn open_tree(db: &sled::Db, name: &str) -> Result<sled::Tree, LedgerError> {
    db.open_tree(name)
        .map_err(|e| LedgerError::internal(e.to_string()))
}

/// Handle to the five trees inside a running transaction. Every method here
/// returns [`TxResult`] so callers compose with `?` and let a business-rule
/// failure abort the whole transaction.
pub struct StoreTxn<'a> {
    people: &'a TransactionalTree,
    transfers: &'a TransactionalTree,
    notifications: &'a TransactionalTree,
    subscriptions: &'a TransactionalTree,
    #[allow(dead_code)]
    meta: &'a TransactionalTree,
}

impl<'a> StoreTxn<'a> {
    pub fn get_account(&self, name: &AccountName) -> TxResult<Option<Account>> {
        get_typed(self.people, name.as_str().as_bytes())
    }

    pub fn put_account(&self, account: &Account) -> TxResult<()> {
        put_typed(self.people, account.name.as_str().as_bytes(), account)
    }

    pub fn get_transfer(&self, id: &TransferId) -> TxResult<Option<Transfer>> {
        get_typed(self.transfers, id.to_key().as_bytes())
    }

    pub fn put_transfer(&self, transfer: &Transfer) -> TxResult<()> {
        put_typed(self.transfers, transfer.id.to_key().as_bytes(), transfer)
    }

    pub fn put_notification(&self, notification: &Notification) -> TxResult<()> {
        put_typed(
            self.notifications,
            notification.id.to_key().as_bytes(),
            notification,
        )
    }

    pub fn get_notification(&self, id: &NotificationId) -> TxResult<Option<Notification>> {
        get_typed(self.notifications, id.to_key().as_bytes())
    }

    pub fn get_subscription(&self, id: &SubscriptionId) -> TxResult<Option<Subscription>> {
        get_typed(self.subscriptions, id.to_key().as_bytes())
    }

    pub fn put_subscription(&self, subscription: &Subscription) -> TxResult<()> {
        put_typed(
            self.subscriptions,
            subscription.id.to_key().as_bytes(),
            subscription,
        )
    }

    pub fn delete_subscription(&self, id: &SubscriptionId) -> TxResult<()> {
        self.subscriptions.remove(id.to_key().as_bytes())?;
        Ok(())
    }

    /// Subscriptions whose `owner` is one of `owners` and whose event matches
    /// `event_name`, for fan-out at a transfer transition (§4.5).
    pub fn subscriptions_matching(
        &self,
        owners: &[&AccountName],
        event_name: &str,
    ) -> TxResult<Vec<Subscription>> {
        let mut out = Vec::new();
        for item in self.subscriptions.iter() {
            let (_, bytes) = item?;
            let sub: Subscription = bincode::deserialize(&bytes)
                .map_err(|e| abort(LedgerError::internal(e.to_string())))?;
            if sub.event.as_str() == event_name && owners.iter().any(|o| **o == sub.owner) {
                out.push(sub);
            }
        }
        Ok(out)
    }

    /// Claims up to `limit` pending notifications whose `next_attempt_at` has
    /// elapsed, transitioning them to in-flight via compare-and-set so
    /// multiple workers never deliver the same notification concurrently.
    pub fn claim_pending_notifications(
        &self,
        now: ledger_core::Timestamp,
        limit: usize,
    ) -> TxResult<Vec<Notification>> {
        let mut claimed = Vec::new();
        for item in self.notifications.iter() {
            if claimed.len() >= limit {
                break;
            }
            let (key, bytes) = item?;
            let mut notif: Notification = bincode::deserialize(&bytes)
                .map_err(|e| abort(LedgerError::internal(e.to_string())))?;
            if notif.state == NotificationState::Pending && notif.next_attempt_at <= now {
                notif.state = NotificationState::InFlight;
                let serialized = bincode::serialize(&notif)
                    .map_err(|e| abort(LedgerError::internal(e.to_string())))?;
                self.notifications.insert(key, serialized)?;
                claimed.push(notif);
            }
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::Amount;
    use std::str::FromStr;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_get_account_round_trips() {
        let (_dir, store) = open_temp();
        let mut account = Account::new("alice");
        account.balance = Amount::from_str("100").unwrap();
        store
            .transaction(|txn| {
                txn.put_account(&account)?;
                Ok(())
            })
            .unwrap();
        let loaded = store.get_account(&"alice".into()).unwrap().unwrap();
        assert_eq!(loaded.balance, Amount::from_str("100").unwrap());
    }

    #[test]
    fn transaction_abort_discards_buffered_writes() {
        let (_dir, store) = open_temp();
        let result: Result<(), LedgerError> = store.transaction(|txn| {
            txn.put_account(&Account::new("bob"))?;
            Err(abort(LedgerError::InvalidRequest("nope".into())))
        });
        assert!(result.is_err());
        assert!(store.get_account(&"bob".into()).unwrap().is_none());
    }

    #[test]
    fn missing_account_reads_as_none() {
        let (_dir, store) = open_temp();
        assert!(store.get_account(&"ghost".into()).unwrap().is_none());
    }
}
