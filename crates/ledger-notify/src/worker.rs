//! Notification Worker (§4.5): a small fixed pool of cooperative tasks that
//! claim pending notifications, deliver an HTTP POST of the transfer
//! snapshot, and retry with backoff on failure.

use std::sync::Arc;
use std::time::Duration;

use ledger_core::notification::{backoff_secs, NotificationState};
use ledger_core::{now, Notification};
use ledger_store::Store;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const CLAIM_BATCH_SIZE: usize = 16;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct NotifyConfig {
    pub pool_size: usize,
    pub per_attempt_timeout: Duration,
    pub backoff_ceiling_secs: u64,
    pub max_attempts: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            pool_size: ledger_core::DEFAULT_NOTIFICATION_POOL_SIZE,
            per_attempt_timeout: Duration::from_secs(ledger_core::DEFAULT_NOTIFICATION_TIMEOUT_SECS),
            backoff_ceiling_secs: ledger_core::NOTIFICATION_BACKOFF_CEILING_SECS,
            max_attempts: ledger_core::NOTIFICATION_MAX_ATTEMPTS,
        }
    }
}

/// Spawns `config.pool_size` worker tasks sharing one claim queue through
/// the store's compare-and-set transaction (§4.5: "safe under multiple
/// workers because claims are acquired via the store's transaction").
pub fn spawn(store: Arc<Store>, config: NotifyConfig, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let client = reqwest::Client::new();
    (0..config.pool_size.max(1))
        .map(|worker_id| {
            let store = store.clone();
            let client = client.clone();
            let config = config.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    let claimed = match store.transaction(|txn| txn.claim_pending_notifications(now(), CLAIM_BATCH_SIZE)) {
                        Ok(batch) => batch,
                        Err(error) => {
                            tracing::error!(worker_id, %error, "failed to claim notifications");
                            Vec::new()
                        }
                    };

                    if claimed.is_empty() {
                        tokio::select! {
                            _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                            _ = shutdown.changed() => {}
                        }
                        continue;
                    }

                    for notification in claimed {
                        deliver(&client, &store, notification, &config, worker_id).await;
                    }
                }
                tracing::info!(worker_id, "notification worker shut down");
            })
        })
        .collect()
}

async fn deliver(
    client: &reqwest::Client,
    store: &Store,
    mut notification: Notification,
    config: &NotifyConfig,
    worker_id: usize,
) {
    let subscription = match store.get_subscription(&notification.subscription_id) {
        Ok(Some(sub)) => sub,
        Ok(None) => {
            // Subscription was deleted after the notification was enqueued;
            // nothing left to deliver to.
            notification.state = NotificationState::Abandoned;
            let _ = store.transaction(|txn| txn.put_notification(&notification));
            return;
        }
        Err(error) => {
            tracing::error!(worker_id, %error, "failed to load subscription for notification");
            return;
        }
    };

    let outcome = client
        .post(&subscription.target_uri)
        .timeout(config.per_attempt_timeout)
        .json(&notification.transfer_snapshot)
        .send()
        .await;

    match outcome {
        Ok(response) if response.status().is_success() => {
            notification.state = NotificationState::Delivered;
            tracing::info!(worker_id, notification_id = %notification.id, "notification delivered");
        }
        Ok(response) => {
            tracing::warn!(
                worker_id,
                notification_id = %notification.id,
                status = response.status().as_u16(),
                "notification delivery rejected"
            );
            record_failed_attempt(&mut notification, config);
        }
        Err(error) => {
            tracing::warn!(worker_id, notification_id = %notification.id, %error, "notification delivery failed");
            record_failed_attempt(&mut notification, config);
        }
    }

    if let Err(error) = store.transaction(|txn| txn.put_notification(&notification)) {
        tracing::error!(worker_id, %error, "failed to persist notification outcome");
    }
}

fn record_failed_attempt(notification: &mut Notification, config: &NotifyConfig) {
    notification.attempts += 1;
    if notification.attempts >= config.max_attempts {
        notification.state = NotificationState::Abandoned;
    } else {
        notification.state = NotificationState::Pending;
        notification.next_attempt_at =
            now() + backoff_secs(notification.attempts, config.backoff_ceiling_secs) as i64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{AccountName, Subscription, SubscriptionEvent, SubscriptionId};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scenario 9: a pending notification is actually delivered by a spawned
    /// worker to a subscription's `target_uri`.
    #[tokio::test]
    async fn worker_delivers_a_pending_notification() {
        let received = Arc::new(AtomicBool::new(false));
        let received_for_handler = Arc::clone(&received);
        let app = axum::Router::new().route(
            "/webhook",
            axum::routing::post(move |axum::Json(_body): axum::Json<serde_json::Value>| {
                let received = Arc::clone(&received_for_handler);
                async move {
                    received.store(true, Ordering::SeqCst);
                    axum::http::StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());

        let sub = Subscription {
            id: SubscriptionId::new(),
            owner: AccountName::from("alice"),
            event: SubscriptionEvent::TransferUpdate,
            target_uri: format!("http://{addr}/webhook"),
            created_at: now(),
        };
        let notification = Notification::new(sub.id, serde_json::json!({ "hello": "world" }), now());
        let notification_id = notification.id;
        store
            .transaction(|txn| {
                txn.put_subscription(&sub)?;
                txn.put_notification(&notification)?;
                Ok(())
            })
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = spawn(Arc::clone(&store), NotifyConfig::default(), shutdown_rx);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !received.load(Ordering::SeqCst) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "notification was not delivered in time"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stored = store.get_notification(&notification_id).unwrap().unwrap();
            if stored.state == NotificationState::Delivered {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "notification state was not persisted as delivered in time"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for handle in handles {
            handle.abort();
        }
    }
}
