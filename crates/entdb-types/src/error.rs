//! Stable error taxonomy (spec.md §7). Every crate's local `thiserror` enum
//! maps onto one of these codes at its public boundary.

use serde::{Deserialize, Serialize};

/// The eight stable error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed envelope, bad alias reference, unknown operation kind.
    InvalidRequest,
    /// Payload failed schema validation.
    ValidationError,
    /// Actor principals do not satisfy the operation's required
    /// visibility.
    Forbidden,
    /// Read-side miss for a concrete id.
    NotFound,
    /// Optimistic version mismatch on update.
    Conflict,
    /// WAL broker quorum lost, or the applier has exceeded the configured
    /// stale-read threshold for `wait_for_applied`.
    ServiceUnavailable,
    /// Deadline exceeded while waiting on WAL ack or apply.
    Timeout,
    /// Unexpected fault; carries a correlation id.
    Internal,
}

/// A single field-level validation failure, with an optional list of
/// Levenshtein-ranked name suggestions (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    /// Offending field name as submitted by the caller.
    pub field: String,
    /// Human-readable description of the failure.
    pub message: String,
    /// Nearby known field names, ranked by edit distance.
    pub suggestions: Vec<String>,
}

/// Top-level error envelope returned to callers: `code`, `message`,
/// `details`, and a `correlation_id` linking the coordinator log, the WAL
/// record (if appended), and the applier log (spec.md §7).
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct EntError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Field-level validation errors, populated only for
    /// `ErrorCode::ValidationError`.
    pub field_errors: Vec<FieldError>,
    /// Correlation id threading this error through coordinator, WAL and
    /// applier logs.
    pub correlation_id: uuid::Uuid,
}

impl EntError {
    /// Build an error with no field-level detail.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field_errors: Vec::new(),
            correlation_id: uuid::Uuid::new_v4(),
        }
    }

    /// Build a `ValidationError` carrying field-level detail.
    pub fn validation(field_errors: Vec<FieldError>) -> Self {
        Self {
            code: ErrorCode::ValidationError,
            message: "payload failed schema validation".to_string(),
            field_errors,
            correlation_id: uuid::Uuid::new_v4(),
        }
    }
}
