pub mod gate;

pub use gate::{require_admin, AuthGate, AuthScheme, Credential};
