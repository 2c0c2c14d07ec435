use axum::http::{HeaderMap, Method, Uri};
use base64::Engine;
use ledger_auth::{AuthScheme, Credential};
use ledger_core::LedgerError;
use ledger_engine::Principal;

use crate::state::AppState;

/// Authenticates a request against `state`'s configured scheme, producing
/// the principal the engine's authorization check consumes (§4.6). The
/// wire-level differences between schemes are resolved here and nowhere
/// else in the API layer.
pub fn authenticate(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Principal, LedgerError> {
    match state.auth_gate.scheme() {
        AuthScheme::Basic => {
            let (username, password) = parse_basic(headers)?;
            state
                .auth_gate
                .authenticate(&state.store, Credential::Basic { username: &username, password: &password })
        }
        AuthScheme::Signature => {
            let (key_id, signature_b64) = parse_signature(headers)?;
            let canonical = canonical_request(method, uri);
            state.auth_gate.authenticate(
                &state.store,
                Credential::Signature {
                    key_id: &key_id,
                    signature_b64: &signature_b64,
                    canonical_request: canonical.as_bytes(),
                },
            )
        }
        AuthScheme::TlsClientCert => {
            let fingerprint = headers
                .get("x-client-cert-fingerprint")
                .and_then(|v| v.to_str().ok())
                .ok_or(LedgerError::Unauthorized)?;
            state
                .auth_gate
                .authenticate(&state.store, Credential::TlsClientCert { fingerprint })
        }
    }
}

fn parse_basic(headers: &HeaderMap) -> Result<(String, String), LedgerError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(LedgerError::Unauthorized)?;
    let encoded = header.strip_prefix("Basic ").ok_or(LedgerError::Unauthorized)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| LedgerError::Unauthorized)?;
    let text = String::from_utf8(decoded).map_err(|_| LedgerError::Unauthorized)?;
    let (user, pass) = text.split_once(':').ok_or(LedgerError::Unauthorized)?;
    Ok((user.to_string(), pass.to_string()))
}

/// Parses a simplified `Authorization: Signature keyId="...",signature="..."`
/// header. A production deployment would follow the full HTTP Signatures
/// draft (covering headers, algorithm negotiation); this keeps the shape
/// the auth gate needs without pulling that in.
fn parse_signature(headers: &HeaderMap) -> Result<(String, String), LedgerError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(LedgerError::Unauthorized)?;
    let rest = header.strip_prefix("Signature ").ok_or(LedgerError::Unauthorized)?;
    let key_id = extract_field(rest, "keyId").ok_or(LedgerError::Unauthorized)?;
    let signature = extract_field(rest, "signature").ok_or(LedgerError::Unauthorized)?;
    Ok((key_id, signature))
}

fn extract_field(input: &str, field: &str) -> Option<String> {
    let needle = format!("{field}=\"");
    let start = input.find(&needle)? + needle.len();
    let end = input[start..].find('"')? + start;
    Some(input[start..end].to_string())
}

fn canonical_request(method: &Method, uri: &Uri) -> String {
    format!("{method} {}", uri.path())
}
