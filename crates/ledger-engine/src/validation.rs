//! Inbound transfer validation (§4.2). Structural failures surface as
//! `InvalidRequest` (400); well-formed but semantically invalid payloads
//! surface as `UnprocessableEntity` (422).

use ledger_core::{Amount, LedgerError};
use ledger_store::{StoreTxn, TxResult};

use crate::request::TransferRequest;

/// Checks independent of store state: required fields present.
pub fn validate_structure(req: &TransferRequest) -> Result<(), LedgerError> {
    if req.source_funds.is_empty() {
        return Err(LedgerError::InvalidRequest(
            "source_funds must not be empty".into(),
        ));
    }
    if req.destination_funds.is_empty() {
        return Err(LedgerError::InvalidRequest(
            "destination_funds must not be empty".into(),
        ));
    }
    Ok(())
}

/// Checks that need store state: every amount strictly positive, conservation
/// of value, account existence. Runs inside the upsert transaction so a
/// concurrently-deleted account (not that the engine ever deletes one) can't
/// slip past the check.
pub fn validate_semantics(req: &TransferRequest, txn: &StoreTxn) -> TxResult<()> {
    for fund in &req.source_funds {
        if fund.amount <= Amount::ZERO {
            return Err(ledger_store::db::abort(LedgerError::UnprocessableEntity(
                format!("source fund for {} must have amount > 0", fund.account),
            )));
        }
    }
    for fund in &req.destination_funds {
        if fund.amount <= Amount::ZERO {
            return Err(ledger_store::db::abort(LedgerError::UnprocessableEntity(
                format!("destination fund for {} must have amount > 0", fund.account),
            )));
        }
    }

    let source_total: Amount = req.source_funds.iter().map(|f| f.amount).sum();
    let destination_total: Amount = req.destination_funds.iter().map(|f| f.amount).sum();
    if source_total != destination_total {
        return Err(ledger_store::db::abort(LedgerError::UnprocessableEntity(
            format!(
                "source total {source_total} does not equal destination total {destination_total}"
            ),
        )));
    }
    for fund in req.source_funds.iter() {
        if txn.get_account(&fund.account)?.is_none() {
            return Err(ledger_store::db::abort(LedgerError::UnprocessableEntity(
                format!("unknown source account: {}", fund.account),
            )));
        }
    }
    for fund in req.destination_funds.iter() {
        if txn.get_account(&fund.account)?.is_none() {
            return Err(ledger_store::db::abort(LedgerError::UnprocessableEntity(
                format!("unknown destination account: {}", fund.account),
            )));
        }
    }
    Ok(())
}
