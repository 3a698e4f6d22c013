//! Error taxonomy for the omx core.
//!
//! Every failure that crosses a component boundary is an [`OmxError`]: a
//! kind (the taxonomy), a stable machine-readable code, a human message, an
//! optional correlation id, and structured extension fields. Transports
//! render these as a [`Problem`] envelope; the core never leaks internal
//! detail (SQL text, stack traces) into either.
//!
//! | Kind                   | Code          | HTTP | Recovery                          |
//! |------------------------|---------------|------|-----------------------------------|
//! | Validation             | OMS-VAL-001   | 400  | return to caller, no retry        |
//! | InvalidStateTransition | OMS-STATE-001 | 409  | return to caller                  |
//! | NotFound               | OMS-ORDER-002 | 404  | return to caller                  |
//! | Duplicate              | OMS-ORDER-001 | 409  | idempotent success or report      |
//! | Conflict               | OMS-ORDER-003 | 409  | processor retries bounded times   |
//! | DataIntegrity          | OMS-DATA-001  | 409  | log + return                      |
//! | External               | OMS-EXT-001   | 503  | publisher retries, caller doesn't |
//! | Internal               | OMS-INT-001   | 500  | log + opaque message              |

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;

mod problem;

pub use problem::Problem;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// The failure taxonomy. Kinds are closed: new failure modes must map onto
/// one of these, not extend the set ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    InvalidStateTransition,
    NotFound,
    Duplicate,
    Conflict,
    DataIntegrity,
    External,
    Internal,
}

impl ErrorKind {
    /// HTTP-equivalent status a transport should render for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidStateTransition
            | ErrorKind::Duplicate
            | ErrorKind::Conflict
            | ErrorKind::DataIntegrity => 409,
            ErrorKind::External => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Whether the command processor may retry this failure in-process.
    ///
    /// Only optimistic-lock collisions are retryable; everything else is
    /// deterministic and client-visible.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict)
    }

    /// Default machine code for the kind.
    pub fn default_code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => codes::VALIDATION,
            ErrorKind::InvalidStateTransition => codes::STATE_TRANSITION,
            ErrorKind::NotFound => codes::NOT_FOUND,
            ErrorKind::Duplicate => codes::DUPLICATE,
            ErrorKind::Conflict => codes::CONFLICT,
            ErrorKind::DataIntegrity => codes::DATA_INTEGRITY,
            ErrorKind::External => codes::EXTERNAL,
            ErrorKind::Internal => codes::INTERNAL,
        }
    }

    /// Lowercase slug used in problem `type` URIs.
    pub fn slug(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::InvalidStateTransition => "invalid-state-transition",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Conflict => "conflict",
            ErrorKind::DataIntegrity => "data-integrity",
            ErrorKind::External => "external",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

// ---------------------------------------------------------------------------
// Machine codes
// ---------------------------------------------------------------------------

/// Stable machine-readable codes. These are an external contract: operators
/// alert on them and clients branch on them, so existing values never change.
pub mod codes {
    pub const VALIDATION: &str = "OMS-VAL-001";
    pub const STATE_TRANSITION: &str = "OMS-STATE-001";
    pub const DUPLICATE: &str = "OMS-ORDER-001";
    pub const NOT_FOUND: &str = "OMS-ORDER-002";
    pub const CONFLICT: &str = "OMS-ORDER-003";
    pub const DATA_INTEGRITY: &str = "OMS-DATA-001";
    pub const EXTERNAL: &str = "OMS-EXT-001";
    pub const INTERNAL: &str = "OMS-INT-001";
}

// ---------------------------------------------------------------------------
// OmxError
// ---------------------------------------------------------------------------

/// A typed failure surfaced by the core.
///
/// Carried inside `TaskResult`s and `ProcessingResult`s rather than thrown;
/// truly unexpected conditions are wrapped as [`ErrorKind::Internal`] at the
/// processor boundary.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("[{code}] {message}")]
pub struct OmxError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub correlation_id: Option<Uuid>,
    /// Structured context (order_id, from_state, to_state, ...). Sorted map
    /// so serialized output is deterministic.
    pub extensions: BTreeMap<String, String>,
}

impl OmxError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code().to_string(),
            message: message.into(),
            correlation_id: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Aggregate a list of rule failures into one validation error.
    pub fn validation_errors(errors: &[String]) -> Self {
        Self::new(ErrorKind::Validation, errors.join("; "))
            .with_extension("error_count", errors.len().to_string())
    }

    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        Self::new(
            ErrorKind::InvalidStateTransition,
            format!("invalid state transition {from:?} -> {to:?}"),
        )
        .with_extension("from_state", format!("{from:?}"))
        .with_extension("to_state", format!("{to:?}"))
    }

    pub fn order_not_found(order_id: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("order {order_id} not found"))
            .with_extension("order_id", order_id.to_string())
    }

    pub fn duplicate(session_id: &str, cl_ord_id: &str) -> Self {
        Self::new(
            ErrorKind::Duplicate,
            format!("order with session_id={session_id} cl_ord_id={cl_ord_id} already exists"),
        )
        .with_extension("session_id", session_id.to_string())
        .with_extension("cl_ord_id", cl_ord_id.to_string())
    }

    pub fn conflict(order_id: &str, expected_tx_nr: i64) -> Self {
        Self::new(
            ErrorKind::Conflict,
            format!("concurrent modification of order {order_id} (expected tx_nr {expected_tx_nr})"),
        )
        .with_extension("order_id", order_id.to_string())
        .with_extension("expected_tx_nr", expected_tx_nr.to_string())
    }

    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataIntegrity, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, message)
    }

    /// The full message is retained for logs; [`Problem`] rendering replaces
    /// it with an opaque detail line.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = code.to_string();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Render the transport-facing problem envelope.
    pub fn to_problem(&self) -> Problem {
        Problem::from_error(self)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_http_status_mapping() {
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::InvalidStateTransition.http_status(), 409);
        assert_eq!(ErrorKind::Conflict.http_status(), 409);
        assert_eq!(ErrorKind::External.http_status(), 503);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn only_conflict_is_retryable() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::InvalidStateTransition,
            ErrorKind::NotFound,
            ErrorKind::Duplicate,
            ErrorKind::DataIntegrity,
            ErrorKind::External,
            ErrorKind::Internal,
        ] {
            assert!(!kind.is_retryable(), "{kind} must not be retryable");
        }
        assert!(ErrorKind::Conflict.is_retryable());
    }

    #[test]
    fn display_carries_code_and_message() {
        let err = OmxError::order_not_found("O-42");
        assert_eq!(err.to_string(), "[OMS-ORDER-002] order O-42 not found");
    }

    #[test]
    fn invalid_transition_captures_states() {
        let err = OmxError::invalid_transition("Filled", "Live");
        assert_eq!(err.kind, ErrorKind::InvalidStateTransition);
        assert_eq!(err.code, codes::STATE_TRANSITION);
        assert_eq!(err.extensions.get("from_state").unwrap(), "\"Filled\"");
        assert_eq!(err.extensions.get("to_state").unwrap(), "\"Live\"");
    }

    #[test]
    fn validation_errors_aggregates() {
        let err = OmxError::validation_errors(&[
            "orderQty must be positive".to_string(),
            "price required for LIMIT".to_string(),
        ]);
        assert!(err.message.contains("orderQty must be positive"));
        assert!(err.message.contains("price required for LIMIT"));
        assert_eq!(err.extensions.get("error_count").unwrap(), "2");
    }
}
