pub mod engine;
pub mod request;
pub mod validation;

pub use engine::{expire_transfer, fulfill_transfer, upsert_transfer, UpsertOutcome};
pub use request::{Principal, TransferRequest};
