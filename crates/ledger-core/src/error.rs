use thiserror::Error;

/// Unified error type for the ledger. Every fallible engine and store
/// operation returns `Result<_, LedgerError>`; the HTTP boundary maps each
/// variant to a status code via [`LedgerError::status_code`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unprocessable: {0}")]
    UnprocessableEntity(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient funds: account {account} needs {need}, has {have}")]
    InsufficientFunds {
        account: String,
        need: String,
        have: String,
    },

    #[error("invalid transition: transfer {id} cannot move from {from} given this request")]
    InvalidTransition { id: String, from: String },

    #[error("internal error [{correlation_id}]: {message}")]
    Internal {
        correlation_id: String,
        message: String,
    },
}

impl LedgerError {
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::InvalidRequest(_) => 400,
            LedgerError::Unauthorized => 403,
            LedgerError::Forbidden(_) => 403,
            LedgerError::NotFound(_) => 404,
            LedgerError::UnprocessableEntity(_) => 422,
            LedgerError::Conflict(_) => 409,
            LedgerError::InsufficientFunds { .. } => 422,
            LedgerError::InvalidTransition { .. } => 422,
            LedgerError::Internal { .. } => 500,
        }
    }

    /// The `kind` field of the JSON error body; never includes internal
    /// detail such as file paths or store internals.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidRequest(_) => "InvalidRequest",
            LedgerError::Unauthorized => "Unauthorized",
            LedgerError::Forbidden(_) => "Forbidden",
            LedgerError::NotFound(_) => "NotFound",
            LedgerError::UnprocessableEntity(_) => "UnprocessableEntity",
            LedgerError::Conflict(_) => "Conflict",
            LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
            LedgerError::InvalidTransition { .. } => "InvalidTransition",
            LedgerError::Internal { .. } => "Internal",
        }
    }

    /// Message safe to return to the client: for `Internal`, only the
    /// correlation id, never the underlying detail.
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::Internal { correlation_id, .. } => {
                format!("internal error, reference {correlation_id}")
            }
            other => other.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LedgerError::Internal {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
        }
    }
}
