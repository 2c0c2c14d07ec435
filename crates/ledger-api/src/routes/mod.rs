pub mod accounts;
pub mod ambient;
pub mod subscriptions;
pub mod transfers;
pub mod ws;
