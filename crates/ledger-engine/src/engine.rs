//! Transfer state machine (§4.3): validate, compute the next state, apply
//! balance deltas and notification fan-out, all inside one store
//! transaction so a failure at any step leaves no partial effect.

use ledger_core::notification::Notification;
use ledger_core::{
    now, Account, AccountName, Amount, LedgerError, SubscriptionEvent, Transfer, TransferId,
    TransferState,
};
use ledger_store::db::abort;
use ledger_store::{Store, StoreTxn, TxResult};
use serde_json::Value;

use crate::request::{Principal, TransferRequest};
use crate::validation::{validate_semantics, validate_structure};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// Stored record returned unchanged; no balance effect (idempotent replay).
    Unchanged,
    Advanced,
}

impl UpsertOutcome {
    pub fn http_status(&self) -> u16 {
        match self {
            UpsertOutcome::Created => 201,
            UpsertOutcome::Unchanged | UpsertOutcome::Advanced => 200,
        }
    }
}

/// Entry point for `PUT /transfers/:id`. `req.id` must already equal the
/// path id (enforced at the HTTP boundary).
pub fn upsert_transfer(
    store: &Store,
    req: TransferRequest,
    principal: &Principal,
) -> Result<(Transfer, UpsertOutcome), LedgerError> {
    if let Err(error) = validate_structure(&req) {
        tracing::warn!(transfer_id = %req.id, kind = error.kind(), %error, "rejected transfer: structural validation failed");
        return Err(error);
    }
    let req = req.with_authorizations_filtered_by(principal);
    let id = req.id;

    store
        .transaction(move |txn| {
            let existing = txn.get_transfer(&id)?;
            match existing {
                None => create_transfer(txn, &req),
                Some(stored) => advance_transfer(txn, stored, &req, principal),
            }
        })
        .map_err(|error| {
            tracing::warn!(transfer_id = %id, kind = error.kind(), %error, "rejected transfer");
            error
        })
}

fn create_transfer(txn: &StoreTxn, req: &TransferRequest) -> TxResult<(Transfer, UpsertOutcome)> {
    validate_semantics(req, txn)?;

    let ts = now();
    let mut transfer = Transfer {
        id: req.id,
        source_funds: req.source_funds.clone(),
        destination_funds: req.destination_funds.clone(),
        execution_condition: req.execution_condition.clone(),
        execution_condition_fulfillment: req.execution_condition_fulfillment.clone(),
        expires_at: req.expires_at,
        state: TransferState::Proposed,
        created_at: ts,
        updated_at: ts,
    };

    transfer.state = initial_state(&transfer);
    apply_balance_effects(txn, None, &transfer)?;
    enqueue_notifications(txn, &transfer)?;
    txn.put_transfer(&transfer)?;
    tracing::info!(
        transfer_id = %transfer.id,
        from = "none",
        to = transfer.state.as_str(),
        "transfer created"
    );
    Ok((transfer, UpsertOutcome::Created))
}

/// Tie-break rule (§4.3): a fulfillment satisfying the execution condition
/// takes the transfer straight to `completed` even on its very first write,
/// ahead of the authorization-only path.
fn initial_state(transfer: &Transfer) -> TransferState {
    if transfer.has_execution_condition() {
        if fulfillment_satisfies_condition(transfer) {
            TransferState::Completed
        } else if transfer.all_sources_authorized() {
            TransferState::Prepared
        } else {
            TransferState::Proposed
        }
    } else if transfer.all_sources_authorized() {
        TransferState::Completed
    } else {
        TransferState::Proposed
    }
}

/// The engine treats the fulfillment as opaque (Non-goal: no cryptographic
/// verification); presence of a fulfillment value is treated as sufficient
/// discharge of the condition.
fn fulfillment_satisfies_condition(transfer: &Transfer) -> bool {
    transfer.has_execution_condition() && transfer.has_fulfillment()
}

fn advance_transfer(
    txn: &StoreTxn,
    stored: Transfer,
    req: &TransferRequest,
    principal: &Principal,
) -> TxResult<(Transfer, UpsertOutcome)> {
    if req.reject {
        return reject_transfer(txn, stored, principal);
    }

    let candidate = Transfer {
        id: stored.id,
        source_funds: req.source_funds.clone(),
        destination_funds: req.destination_funds.clone(),
        execution_condition: req.execution_condition.clone(),
        execution_condition_fulfillment: req.execution_condition_fulfillment.clone(),
        expires_at: req.expires_at,
        state: stored.state.clone(),
        created_at: stored.created_at,
        updated_at: stored.updated_at,
    };

    if candidate.normalized_eq(&stored) {
        return Ok((stored, UpsertOutcome::Unchanged));
    }

    if stored.state.is_terminal() {
        return Err(abort(LedgerError::InvalidTransition {
            id: stored.id.to_string(),
            from: stored.state.as_str().to_string(),
        }));
    }

    validate_semantics(req, txn)?;

    let next_state = match stored.state {
        TransferState::Proposed => {
            if fulfillment_satisfies_condition(&candidate) {
                TransferState::Completed
            } else if candidate.all_sources_authorized() {
                if candidate.has_execution_condition() {
                    TransferState::Prepared
                } else {
                    TransferState::Completed
                }
            } else {
                TransferState::Proposed
            }
        }
        TransferState::Prepared => {
            if fulfillment_satisfies_condition(&candidate) {
                TransferState::Completed
            } else {
                TransferState::Prepared
            }
        }
        _ => {
            return Err(abort(LedgerError::InvalidTransition {
                id: stored.id.to_string(),
                from: stored.state.as_str().to_string(),
            }))
        }
    };

    if next_state == stored.state {
        // Semantically-equal, non-advancing resubmission of a live transfer:
        // no balance effect, but the response reflects the caller's own body
        // per upsert semantics.
        let mut unchanged = candidate;
        unchanged.updated_at = stored.updated_at;
        txn.put_transfer(&unchanged)?;
        return Ok((unchanged, UpsertOutcome::Unchanged));
    }

    let mut next = candidate;
    next.state = next_state;
    next.updated_at = now();

    apply_balance_effects(txn, Some(&stored), &next)?;
    enqueue_notifications(txn, &next)?;
    txn.put_transfer(&next)?;
    tracing::info!(
        transfer_id = %next.id,
        from = stored.state.as_str(),
        to = next.state.as_str(),
        "transfer advanced"
    );
    Ok((next, UpsertOutcome::Advanced))
}

fn reject_transfer(
    txn: &StoreTxn,
    stored: Transfer,
    principal: &Principal,
) -> TxResult<(Transfer, UpsertOutcome)> {
    if stored.state.is_terminal() {
        return Err(abort(LedgerError::InvalidTransition {
            id: stored.id.to_string(),
            from: stored.state.as_str().to_string(),
        }));
    }
    let authorized = principal.is_admin()
        || stored
            .source_funds
            .iter()
            .any(|f| principal.may_authorize(&f.account));
    if !authorized {
        return Err(abort(LedgerError::Forbidden(
            "only an authorized source account or admin may reject a transfer".into(),
        )));
    }

    let mut next = stored.clone();
    next.state = TransferState::Rejected;
    next.updated_at = now();

    apply_balance_effects(txn, Some(&stored), &next)?;
    enqueue_notifications(txn, &next)?;
    txn.put_transfer(&next)?;
    tracing::info!(
        transfer_id = %next.id,
        from = stored.state.as_str(),
        to = next.state.as_str(),
        "transfer rejected"
    );
    Ok((next, UpsertOutcome::Advanced))
}

/// Supplies `PUT /transfers/:id/fulfillment`: sets the fulfillment on a
/// `prepared` transfer and drives it to `completed` if it discharges the
/// condition.
pub fn fulfill_transfer(store: &Store, id: TransferId, fulfillment: Value) -> Result<Transfer, LedgerError> {
    store
        .transaction(move |txn| {
            let stored = txn
                .get_transfer(&id)?
                .ok_or_else(|| abort(LedgerError::NotFound(format!("transfer {id}"))))?;

            if stored.state != TransferState::Prepared {
                return Err(abort(LedgerError::UnprocessableEntity(format!(
                    "transfer {} is not awaiting a fulfillment (state: {})",
                    id,
                    stored.state.as_str()
                ))));
            }

            let mut next = stored.clone();
            next.execution_condition_fulfillment = Some(fulfillment.clone());
            if !fulfillment_satisfies_condition(&next) {
                return Err(abort(LedgerError::UnprocessableEntity(
                    "fulfillment does not discharge the execution condition".into(),
                )));
            }
            next.state = TransferState::Completed;
            next.updated_at = now();

            apply_balance_effects(txn, Some(&stored), &next)?;
            enqueue_notifications(txn, &next)?;
            txn.put_transfer(&next)?;
            tracing::info!(
                transfer_id = %next.id,
                from = stored.state.as_str(),
                to = next.state.as_str(),
                "transfer fulfilled"
            );
            Ok(next)
        })
        .map_err(|error| {
            tracing::warn!(transfer_id = %id, kind = error.kind(), %error, "rejected fulfillment");
            error
        })
}

/// Transitions a still-non-terminal transfer to `expired`, releasing any
/// held funds. Used by the Expiry Monitor (§4.4); no-op if the transfer was
/// already resolved by a concurrent write.
pub fn expire_transfer(store: &Store, id: TransferId) -> Result<Option<Transfer>, LedgerError> {
    store.transaction(move |txn| {
        let stored = match txn.get_transfer(&id)? {
            Some(t) => t,
            None => return Ok(None),
        };
        if stored.state.is_terminal() {
            return Ok(None);
        }
        let mut next = stored.clone();
        next.state = TransferState::Expired;
        next.updated_at = now();

        apply_balance_effects(txn, Some(&stored), &next)?;
        enqueue_notifications(txn, &next)?;
        txn.put_transfer(&next)?;
        tracing::info!(
            transfer_id = %next.id,
            from = stored.state.as_str(),
            to = next.state.as_str(),
            "transfer expired"
        );
        Ok(Some(next))
    })
}

/// Balance/held application rules (§4.3 "Balance application policy").
/// `prior` is `None` for a brand-new transfer.
fn apply_balance_effects(txn: &StoreTxn, prior: Option<&Transfer>, next: &Transfer) -> TxResult<()> {
    let prior_state = prior.map(|t| t.state.clone()).unwrap_or(TransferState::Proposed);
    if prior.is_none() && next.state == TransferState::Proposed {
        return Ok(());
    }
    if prior.is_some() && prior_state == next.state {
        return Ok(());
    }

    match (&prior_state, &next.state) {
        (TransferState::Proposed, TransferState::Prepared) => {
            for fund in &next.source_funds {
                debit_into_held(txn, &fund.account, fund.amount)?;
            }
        }
        (TransferState::Proposed, TransferState::Completed) => {
            for fund in &next.source_funds {
                debit_balance(txn, &fund.account, fund.amount)?;
            }
            for fund in &next.destination_funds {
                credit_balance(txn, &fund.account, fund.amount)?;
            }
        }
        (TransferState::Prepared, TransferState::Completed) => {
            for fund in &next.source_funds {
                release_held_to_settlement(txn, &fund.account, fund.amount)?;
            }
            for fund in &next.destination_funds {
                credit_balance(txn, &fund.account, fund.amount)?;
            }
        }
        (TransferState::Prepared, TransferState::Expired)
        | (TransferState::Prepared, TransferState::Rejected) => {
            for fund in &next.source_funds {
                release_held_to_balance(txn, &fund.account, fund.amount)?;
            }
        }
        (TransferState::Proposed, TransferState::Expired)
        | (TransferState::Proposed, TransferState::Rejected) => {
            // No funds were ever debited out of `balance`; nothing to release.
        }
        (from, to) => {
            return Err(abort(LedgerError::InvalidTransition {
                id: next.id.to_string(),
                from: format!("{} -> {}", from.as_str(), to.as_str()),
            }));
        }
    }
    Ok(())
}

fn load_account(txn: &StoreTxn, name: &AccountName) -> TxResult<Account> {
    txn.get_account(name)?
        .ok_or_else(|| abort(LedgerError::UnprocessableEntity(format!("unknown account: {name}"))))
}

fn debit_balance(txn: &StoreTxn, name: &AccountName, amount: Amount) -> TxResult<()> {
    let mut account = load_account(txn, name)?;
    if account.balance < amount {
        return Err(abort(LedgerError::InsufficientFunds {
            account: name.to_string(),
            need: amount.to_string(),
            have: account.balance.to_string(),
        }));
    }
    account.balance -= amount;
    txn.put_account(&account)
}

fn credit_balance(txn: &StoreTxn, name: &AccountName, amount: Amount) -> TxResult<()> {
    let mut account = load_account(txn, name)?;
    account.balance += amount;
    txn.put_account(&account)
}

fn debit_into_held(txn: &StoreTxn, name: &AccountName, amount: Amount) -> TxResult<()> {
    let mut account = load_account(txn, name)?;
    if account.balance < amount {
        return Err(abort(LedgerError::InsufficientFunds {
            account: name.to_string(),
            need: amount.to_string(),
            have: account.balance.to_string(),
        }));
    }
    account.balance -= amount;
    account.held += amount;
    txn.put_account(&account)
}

fn release_held_to_settlement(txn: &StoreTxn, name: &AccountName, amount: Amount) -> TxResult<()> {
    let mut account = load_account(txn, name)?;
    account.held -= amount;
    txn.put_account(&account)
}

fn release_held_to_balance(txn: &StoreTxn, name: &AccountName, amount: Amount) -> TxResult<()> {
    let mut account = load_account(txn, name)?;
    account.held -= amount;
    account.balance += amount;
    txn.put_account(&account)
}

/// Enumerates subscriptions matching this transfer's accounts and enqueues
/// one pending notification per match (§4.5), inside the same transaction
/// as the transition that triggered it.
fn enqueue_notifications(txn: &StoreTxn, transfer: &Transfer) -> TxResult<()> {
    let owners: Vec<&AccountName> = transfer
        .source_funds
        .iter()
        .map(|f| &f.account)
        .chain(transfer.destination_funds.iter().map(|f| &f.account))
        .collect();

    let matches = txn.subscriptions_matching(&owners, SubscriptionEvent::TransferUpdate.as_str())?;
    if matches.is_empty() {
        return Ok(());
    }
    let snapshot = serde_json::to_value(transfer)
        .map_err(|e| abort(LedgerError::internal(e.to_string())))?;
    let ts = now();
    for sub in matches {
        let notification = Notification::new(sub.id, snapshot.clone(), ts);
        txn.put_notification(&notification)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Account, DestinationFund, SourceFund};
    use ledger_store::Store;
    use std::str::FromStr;

    fn seed(store: &Store, name: &str, balance: &str) {
        let mut account = Account::new(name);
        account.balance = Amount::from_str(balance).unwrap();
        store
            .transaction(|txn| {
                txn.put_account(&account)?;
                Ok(())
            })
            .unwrap();
    }

    fn request(id: TransferId, src_auth: bool, amount: &str, dest_amount: &str) -> TransferRequest {
        TransferRequest {
            id,
            source_funds: vec![SourceFund {
                account: "alice".into(),
                amount: Amount::from_str(amount).unwrap(),
                authorization: if src_auth {
                    Some(Value::Bool(true))
                } else {
                    None
                },
            }],
            destination_funds: vec![DestinationFund {
                account: "bob".into(),
                amount: Amount::from_str(dest_amount).unwrap(),
            }],
            execution_condition: None,
            execution_condition_fulfillment: None,
            expires_at: None,
            reject: false,
        }
    }

    #[test]
    fn simple_completion_debits_and_credits() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        seed(&store, "alice", "100");
        seed(&store, "bob", "0");

        let id = TransferId::new();
        let principal = Principal::Account("alice".into());
        let (transfer, outcome) =
            upsert_transfer(&store, request(id, true, "10", "10"), &principal).unwrap();

        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(transfer.state, TransferState::Completed);
        assert_eq!(
            store.get_account(&"alice".into()).unwrap().unwrap().balance,
            Amount::from_str("90").unwrap()
        );
        assert_eq!(
            store.get_account(&"bob".into()).unwrap().unwrap().balance,
            Amount::from_str("10").unwrap()
        );
    }

    #[test]
    fn proposed_then_authorized_completes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        seed(&store, "alice", "100");
        seed(&store, "bob", "0");

        let id = TransferId::new();
        let principal = Principal::Account("alice".into());
        let (proposed, outcome) =
            upsert_transfer(&store, request(id, false, "10", "10"), &principal).unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(proposed.state, TransferState::Proposed);
        assert_eq!(
            store.get_account(&"alice".into()).unwrap().unwrap().balance,
            Amount::from_str("100").unwrap()
        );

        let (completed, outcome) =
            upsert_transfer(&store, request(id, true, "10", "10"), &principal).unwrap();
        assert_eq!(outcome, UpsertOutcome::Advanced);
        assert_eq!(completed.state, TransferState::Completed);
        assert_eq!(
            store.get_account(&"alice".into()).unwrap().unwrap().balance,
            Amount::from_str("90").unwrap()
        );
    }

    #[test]
    fn insufficient_funds_rejected_with_no_balance_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        seed(&store, "alice", "100");
        seed(&store, "bob", "0");

        let id = TransferId::new();
        let principal = Principal::Account("alice".into());
        let result = upsert_transfer(&store, request(id, true, "101", "101"), &principal);
        assert!(result.is_err());
        assert_eq!(
            store.get_account(&"alice".into()).unwrap().unwrap().balance,
            Amount::from_str("100").unwrap()
        );
    }

    #[test]
    fn idempotent_replay_of_terminal_transfer_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        seed(&store, "alice", "100");
        seed(&store, "bob", "0");

        let id = TransferId::new();
        let principal = Principal::Account("alice".into());
        let (_, _) = upsert_transfer(&store, request(id, true, "10", "10"), &principal).unwrap();
        let (_, outcome) = upsert_transfer(&store, request(id, true, "10", "10"), &principal).unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(
            store.get_account(&"alice".into()).unwrap().unwrap().balance,
            Amount::from_str("90").unwrap()
        );
    }

    #[test]
    fn unauthorized_principal_cannot_assert_anothers_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        seed(&store, "alice", "100");
        seed(&store, "bob", "0");

        let id = TransferId::new();
        // bob tries to authorize alice's source fund; the engine collapses
        // it to "not present", so the transfer stays proposed.
        let principal = Principal::Account("bob".into());
        let (transfer, _) = upsert_transfer(&store, request(id, true, "10", "10"), &principal).unwrap();
        assert_eq!(transfer.state, TransferState::Proposed);
    }
}
