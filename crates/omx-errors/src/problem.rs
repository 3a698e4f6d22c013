//! Transport-facing problem envelope.
//!
//! The core produces the typed [`OmxError`](crate::OmxError); transports
//! serialize this envelope. Shape follows RFC 7807 plus the omx extension
//! fields (code, timestamp, correlation id, structured context).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ErrorKind, OmxError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    /// URI identifying the problem class.
    #[serde(rename = "type")]
    pub type_uri: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    /// Kind-specific extension members (order_id, from_state, ...).
    #[serde(flatten)]
    pub extensions: BTreeMap<String, String>,
}

impl Problem {
    pub fn from_error(err: &OmxError) -> Self {
        // Internal detail is never exposed; the correlation id is the
        // operator's bridge into the logs.
        let detail = if err.kind == ErrorKind::Internal {
            "an internal error occurred".to_string()
        } else {
            err.message.clone()
        };

        Self {
            type_uri: format!("urn:omx:error:{}", err.kind.slug()),
            title: title_for(err.kind),
            status: err.kind.http_status(),
            detail,
            code: err.code.clone(),
            timestamp: Utc::now(),
            correlation_id: err.correlation_id,
            extensions: err.extensions.clone(),
        }
    }
}

fn title_for(kind: ErrorKind) -> String {
    match kind {
        ErrorKind::Validation => "Validation failure",
        ErrorKind::InvalidStateTransition => "Invalid state transition",
        ErrorKind::NotFound => "Not found",
        ErrorKind::Duplicate => "Duplicate submission",
        ErrorKind::Conflict => "Concurrent modification",
        ErrorKind::DataIntegrity => "Data integrity violation",
        ErrorKind::External => "Downstream unavailable",
        ErrorKind::Internal => "Internal error",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_detail_is_opaque() {
        let err = OmxError::internal("sqlx: connection reset by peer at 10.0.0.3:5432");
        let problem = err.to_problem();
        assert_eq!(problem.status, 500);
        assert!(!problem.detail.contains("sqlx"));
        assert!(!problem.detail.contains("10.0.0.3"));
    }

    #[test]
    fn validation_detail_is_verbatim() {
        let err = OmxError::validation("orderQty must be positive");
        let problem = err.to_problem();
        assert_eq!(problem.status, 400);
        assert_eq!(problem.detail, "orderQty must be positive");
        assert_eq!(problem.code, "OMS-VAL-001");
        assert_eq!(problem.type_uri, "urn:omx:error:validation");
    }

    #[test]
    fn extensions_flatten_into_envelope() {
        let err = OmxError::order_not_found("O-7").with_correlation_id(Uuid::new_v4());
        let json = serde_json::to_value(err.to_problem()).unwrap();
        assert_eq!(json["order_id"], "O-7");
        assert_eq!(json["status"], 404);
        assert!(json["correlation_id"].is_string());
    }
}
