pub mod monitor;

pub use monitor::{spawn, ExpirySender, ExpirySignal};
