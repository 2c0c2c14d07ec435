//! Expiry Monitor (§4.4): a single long-lived task holding an in-memory
//! min-heap of non-terminal transfers keyed by `expires_at`, woken by a
//! bounded signal channel rather than direct heap mutation from other tasks.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use ledger_core::{
    Timestamp, TransferId, EXPIRY_MONITOR_MAX_TICK_SECS, EXPIRY_MONITOR_MIN_TICK_MS,
    EXPIRY_SIGNAL_CHANNEL_CAPACITY,
};
use ledger_store::Store;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Pushed onto the monitor's heap whenever a write gives a transfer a new
/// (or first) `expires_at`.
#[derive(Clone, Copy, Debug)]
pub struct ExpirySignal {
    pub id: TransferId,
    pub expires_at: Timestamp,
}

pub type ExpirySender = mpsc::Sender<ExpirySignal>;

/// Spawns the monitor task and returns its join handle plus the sender side
/// of its signal channel. `shutdown` should flip to `true` to drain it.
pub fn spawn(store: Arc<Store>, mut shutdown: watch::Receiver<bool>) -> (JoinHandle<()>, ExpirySender) {
    let (tx, mut rx) = mpsc::channel(EXPIRY_SIGNAL_CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut heap = reload_heap(&store);
        tracing::info!(pending = heap.len(), "expiry monitor started");

        loop {
            let tick = next_tick(&heap);
            tokio::select! {
                _ = tokio::time::sleep(tick) => {
                    drain_due(&store, &mut heap).await;
                }
                signal = rx.recv() => {
                    match signal {
                        Some(signal) => heap.push(Reverse((signal.expires_at, signal.id))),
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("expiry monitor draining for shutdown");
                        drain_due(&store, &mut heap).await;
                        break;
                    }
                }
            }
        }
    });

    (handle, tx)
}

fn reload_heap(store: &Store) -> BinaryHeap<Reverse<(Timestamp, TransferId)>> {
    let mut heap = BinaryHeap::new();
    match store.list_non_terminal_transfers() {
        Ok(transfers) => {
            for transfer in transfers {
                if let Some(expires_at) = transfer.expires_at {
                    heap.push(Reverse((expires_at, transfer.id)));
                }
            }
        }
        Err(error) => {
            tracing::error!(%error, "failed to reload expiry heap at startup");
        }
    }
    heap
}

fn next_tick(heap: &BinaryHeap<Reverse<(Timestamp, TransferId)>>) -> Duration {
    match heap.peek() {
        Some(Reverse((expires_at, _))) => {
            let remaining = expires_at - ledger_core::now();
            if remaining <= 0 {
                Duration::from_millis(EXPIRY_MONITOR_MIN_TICK_MS)
            } else {
                Duration::from_secs(remaining as u64)
                    .min(Duration::from_secs(EXPIRY_MONITOR_MAX_TICK_SECS))
            }
        }
        None => Duration::from_secs(EXPIRY_MONITOR_MAX_TICK_SECS),
    }
}

async fn drain_due(store: &Store, heap: &mut BinaryHeap<Reverse<(Timestamp, TransferId)>>) {
    let now = ledger_core::now();
    while let Some(&Reverse((expires_at, id))) = heap.peek() {
        if expires_at > now {
            break;
        }
        heap.pop();
        // The transition commits only if the transfer is still non-terminal
        // at commit time; a concurrent write that already resolved it wins.
        match ledger_engine::expire_transfer(store, id) {
            Ok(Some(transfer)) => {
                tracing::info!(transfer_id = %transfer.id, "expired transfer");
            }
            Ok(None) => {}
            Err(error) => {
                tracing::error!(transfer_id = %id, %error, "failed to expire transfer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_tick_is_bounded_below_by_min_tick() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((ledger_core::now() - 5, TransferId::new())));
        assert_eq!(next_tick(&heap), Duration::from_millis(EXPIRY_MONITOR_MIN_TICK_MS));
    }

    #[test]
    fn next_tick_defaults_to_max_when_heap_is_empty() {
        let heap: BinaryHeap<Reverse<(Timestamp, TransferId)>> = BinaryHeap::new();
        assert_eq!(next_tick(&heap), Duration::from_secs(EXPIRY_MONITOR_MAX_TICK_SECS));
    }

    /// Scenario 8: a `prepared` transfer past its `expires_at` is actually
    /// driven to `expired` by the spawned monitor task, releasing the held
    /// source funds back to balance.
    #[tokio::test]
    async fn spawned_monitor_expires_a_due_transfer() {
        use ledger_core::{Account, Amount, DestinationFund, SourceFund, Transfer, TransferState};
        use std::str::FromStr;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());

        let mut alice = Account::new("alice");
        alice.held = Amount::from_str("10").unwrap();
        let bob = Account::new("bob");
        store
            .transaction(|txn| {
                txn.put_account(&alice)?;
                txn.put_account(&bob)?;
                Ok(())
            })
            .unwrap();

        let id = TransferId::new();
        let now = ledger_core::now();
        let transfer = Transfer {
            id,
            source_funds: vec![SourceFund {
                account: "alice".into(),
                amount: Amount::from_str("10").unwrap(),
                authorization: None,
            }],
            destination_funds: vec![DestinationFund {
                account: "bob".into(),
                amount: Amount::from_str("10").unwrap(),
            }],
            execution_condition: None,
            execution_condition_fulfillment: None,
            expires_at: Some(now - 5),
            state: TransferState::Prepared,
            created_at: now - 10,
            updated_at: now - 10,
        };
        store.transaction(|txn| txn.put_transfer(&transfer)).unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_handle, _tx) = spawn(Arc::clone(&store), shutdown_rx);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stored = store.get_transfer(&id).unwrap().unwrap();
            if stored.state == TransferState::Expired {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "transfer did not expire in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let alice_after = store.get_account(&"alice".into()).unwrap().unwrap();
        assert_eq!(alice_after.held, Amount::ZERO);
        assert_eq!(alice_after.balance, Amount::from_str("10").unwrap());
    }
}
