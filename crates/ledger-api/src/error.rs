use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ledger_core::LedgerError;
use serde::Serialize;

/// Wire-level error body (§7): `{ "error": <kind>, "message": <text> }`,
/// with no internal detail crossing the boundary.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if matches!(self.0, LedgerError::Internal { .. }) {
            tracing::error!(error = %self.0, "internal error");
        }
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.client_message(),
        };
        (status, Json(body)).into_response()
    }
}
