//! ─── Ledger service constants ───────────────────────────────────────────────

// ── Notification delivery ────────────────────────────────────────────────────

/// Default size of the Notification Worker's fixed task pool.
pub const DEFAULT_NOTIFICATION_POOL_SIZE: usize = 4;

/// Per-attempt HTTP timeout for notification delivery.
pub const DEFAULT_NOTIFICATION_TIMEOUT_SECS: u64 = 10;

/// Exponential backoff ceiling between delivery attempts.
pub const NOTIFICATION_BACKOFF_CEILING_SECS: u64 = 60;

/// Notifications are abandoned after this many failed attempts.
pub const NOTIFICATION_MAX_ATTEMPTS: u32 = 10;

// ── Store transactions ───────────────────────────────────────────────────────

/// Bounded retry count for a caller observing a store `Conflict`.
pub const STORE_TRANSACTION_MAX_RETRIES: u32 = 5;

// ── Expiry monitor ────────────────────────────────────────────────────────────

/// Lower bound on the monitor's sleep between heap checks, to avoid a busy
/// loop when the heap head is already due.
pub const EXPIRY_MONITOR_MIN_TICK_MS: u64 = 10;

/// Upper bound on the monitor's sleep when the heap is empty; it still wakes
/// periodically so a missed signal cannot stall it forever.
pub const EXPIRY_MONITOR_MAX_TICK_SECS: u64 = 30;

/// Capacity of the bounded signal channel writers use to wake the monitor.
pub const EXPIRY_SIGNAL_CHANNEL_CAPACITY: usize = 256;

// ── Pagination ────────────────────────────────────────────────────────────────

/// Maximum accounts returned from a single `GET /accounts` call.
pub const MAX_ACCOUNTS_PER_QUERY: usize = 500;
