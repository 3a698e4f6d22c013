//! Processing outcomes.

use uuid::Uuid;

use omx_domain::{Order, OrderState};
use omx_errors::OmxError;

/// Identity and version of the order a command landed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub order_id: String,
    pub session_id: String,
    pub cl_ord_id: String,
    pub state: OrderState,
    pub tx_nr: i64,
}

impl From<&Order> for TxInfo {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            session_id: order.session_id.clone(),
            cl_ord_id: order.cl_ord_id.clone(),
            state: order.state,
            tx_nr: order.tx_nr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    /// Command applied and committed.
    Ok,
    /// Idempotent replay: the work had already been done; nothing written.
    Replayed,
    /// Rolled back; see the error.
    Failed,
}

/// What the transport gets back from `process`.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub status: ProcessingStatus,
    pub tx_info: Option<TxInfo>,
    pub error: Option<OmxError>,
    pub correlation_id: Uuid,
    pub message: String,
}

impl ProcessingResult {
    pub fn ok(correlation_id: Uuid, tx_info: TxInfo) -> Self {
        Self {
            status: ProcessingStatus::Ok,
            tx_info: Some(tx_info),
            error: None,
            correlation_id,
            message: String::new(),
        }
    }

    pub fn replayed(correlation_id: Uuid, tx_info: TxInfo) -> Self {
        Self {
            status: ProcessingStatus::Replayed,
            tx_info: Some(tx_info),
            error: None,
            correlation_id,
            message: "idempotent replay".to_string(),
        }
    }

    pub fn failed(correlation_id: Uuid, error: OmxError) -> Self {
        let error = if error.correlation_id.is_none() {
            error.with_correlation_id(correlation_id)
        } else {
            error
        };
        Self {
            status: ProcessingStatus::Failed,
            tx_info: None,
            message: error.to_string(),
            error: Some(error),
            correlation_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ProcessingStatus::Ok | ProcessingStatus::Replayed
        )
    }
}
