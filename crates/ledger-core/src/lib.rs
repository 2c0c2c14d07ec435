pub mod account;
pub mod constants;
pub mod error;
pub mod notification;
pub mod subscription;
pub mod transfer;
pub mod types;

pub use account::{Account, AuthenticationMaterial};
pub use constants::*;
pub use error::LedgerError;
pub use notification::{backoff_secs, Notification, NotificationState};
pub use subscription::{Subscription, SubscriptionEvent};
pub use transfer::{DestinationFund, SourceFund, Transfer, TransferState};
pub use types::{now, AccountName, Amount, NotificationId, SubscriptionId, Timestamp, TransferId};
