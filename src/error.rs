//! Error types for the Sanchaya driver
//!
//! Three non-overlapping signal categories reach callers:
//! - whole-call failures (`Transport`, `Cancelled`, `Protocol`, `Auth`, `NoEndpoints`),
//! - per-item application failures (`Api`),
//! - the iteration-termination sentinel (`NoMoreDocuments`).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Server error number: document with the given key does not exist.
pub const ERROR_DOCUMENT_NOT_FOUND: i64 = 1202;
/// Server error number: write-write revision conflict.
pub const ERROR_REVISION_CONFLICT: i64 = 1200;
/// Server error number: unique constraint violated on insert.
pub const ERROR_UNIQUE_CONSTRAINT_VIOLATED: i64 = 1210;
/// Server error number: an `If-Match` revision precondition did not hold.
pub const ERROR_PRECONDITION_FAILED: i64 = 1465;
/// Server error number: session token no longer valid.
pub const ERROR_AUTH_TOKEN_EXPIRED: i64 = 1106;
/// Server error number: the requested queue time bound was exceeded.
pub const ERROR_QUEUE_TIME_VIOLATED: i64 = 21004;

/// Structured error record produced by the server for one operation or
/// one batch item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Always `true` on the wire; kept so error items are recognizable in a
    /// result stream.
    #[serde(default)]
    pub error: bool,
    /// HTTP status code the server assigned to this item.
    #[serde(default)]
    pub code: u16,
    /// Internal error number from the server's error catalog.
    #[serde(rename = "errorNum", default)]
    pub error_num: i64,
    /// Human-readable message.
    #[serde(rename = "errorMessage", default)]
    pub error_message: String,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (code {}, errorNum {})",
            self.error_message, self.code, self.error_num
        )
    }
}

/// Errors that can occur when using the Sanchaya driver
#[derive(Error, Debug)]
pub enum SanchayaError {
    /// Network-level failure: connect refused, TLS failure, broken stream.
    /// Subject to retry/failover.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller's deadline expired or the call was aborted. Distinct from
    /// any server-side outcome.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Malformed envelope or unexpected content. Never retried.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Structured application error produced by the server.
    #[error("server error: {0}")]
    Api(ServerError),

    /// Exhaustion sentinel: a batch reader has delivered all of its results.
    /// Purely an iteration-termination marker, not a failure.
    #[error("no more documents")]
    NoMoreDocuments,

    /// The endpoint set is empty. A configuration error, not retryable.
    #[error("no endpoints configured")]
    NoEndpoints,

    /// Credential or token exchange failure.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Payload (de)serialization failure on the client side.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SanchayaError {
    /// Build an `Api` error from its parts.
    pub fn api(code: u16, error_num: i64, message: impl Into<String>) -> Self {
        SanchayaError::Api(ServerError {
            error: true,
            code,
            error_num,
            error_message: message.into(),
        })
    }

    /// The server reported that the addressed document does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SanchayaError::Api(e)
            if e.error_num == ERROR_DOCUMENT_NOT_FOUND || (e.error_num == 0 && e.code == 404))
    }

    /// The server reported a write conflict (revision or unique constraint).
    pub fn is_conflict(&self) -> bool {
        matches!(self, SanchayaError::Api(e)
            if e.error_num == ERROR_REVISION_CONFLICT
                || e.error_num == ERROR_UNIQUE_CONSTRAINT_VIOLATED
                || (e.error_num == 0 && e.code == 409))
    }

    /// An `If-Match` revision check failed; no mutation was performed.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, SanchayaError::Api(e)
            if e.error_num == ERROR_PRECONDITION_FAILED || e.code == 412)
    }

    /// The session token expired and must be renewed.
    pub fn is_auth_token_expired(&self) -> bool {
        matches!(self, SanchayaError::Api(e)
            if e.error_num == ERROR_AUTH_TOKEN_EXPIRED || (e.error_num == 0 && e.code == 401))
    }

    /// The requested queue time bound was exceeded (backpressure signal).
    pub fn is_queue_time_violated(&self) -> bool {
        matches!(self, SanchayaError::Api(e) if e.error_num == ERROR_QUEUE_TIME_VIOLATED)
    }

    /// Iteration-termination sentinel check for batch readers.
    pub fn is_no_more_documents(&self) -> bool {
        matches!(self, SanchayaError::NoMoreDocuments)
    }

    /// Deadline expiry / abort check.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SanchayaError::Cancelled(_))
    }

    /// Network-level failure check.
    pub fn is_transport(&self) -> bool {
        matches!(self, SanchayaError::Transport(_))
    }
}

pub type SanchayaResult<T> = Result<T, SanchayaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_by_error_num() {
        let err = SanchayaError::api(404, ERROR_DOCUMENT_NOT_FOUND, "document not found");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert!(!err.is_no_more_documents());
    }

    #[test]
    fn test_not_found_by_status_only() {
        // Some proxies strip the body; the bare status still classifies.
        let err = SanchayaError::api(404, 0, "not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_conflict_variants() {
        assert!(SanchayaError::api(409, ERROR_REVISION_CONFLICT, "conflict").is_conflict());
        assert!(SanchayaError::api(409, ERROR_UNIQUE_CONSTRAINT_VIOLATED, "dup").is_conflict());
        assert!(!SanchayaError::api(412, ERROR_PRECONDITION_FAILED, "stale").is_conflict());
    }

    #[test]
    fn test_precondition_failed() {
        let err = SanchayaError::api(412, ERROR_PRECONDITION_FAILED, "revision mismatch");
        assert!(err.is_precondition_failed());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_sentinel_is_not_an_api_error() {
        let err = SanchayaError::NoMoreDocuments;
        assert!(err.is_no_more_documents());
        assert!(!err.is_not_found());
        assert!(!err.is_transport());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_server_error_wire_shape() {
        let raw = r#"{"error":true,"code":404,"errorNum":1202,"errorMessage":"document not found"}"#;
        let parsed: ServerError = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.code, 404);
        assert_eq!(parsed.error_num, ERROR_DOCUMENT_NOT_FOUND);
        assert!(SanchayaError::Api(parsed).is_not_found());
    }
}
