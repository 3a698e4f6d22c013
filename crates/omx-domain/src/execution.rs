//! Execution reports.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{round_px, round_qty};
use crate::types::ExecutionState;

/// One execution (fill) increment against an order.
///
/// `exec_id` is the exchange-assigned identifier and the idempotency key:
/// applying the same `exec_id` twice mutates the order once. `cum_qty` and
/// `avg_px` reflect the ORDER's state after this execution was applied; they
/// are snapshot fields written at apply time, not inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub exec_id: String,
    pub order_id: String,
    pub session_id: String,
    /// Quantity filled by this execution.
    pub last_qty: Decimal,
    /// Price of this execution.
    pub last_px: Decimal,
    /// Order cumulative quantity after applying this execution.
    pub cum_qty: Decimal,
    /// Order average price after applying this execution.
    pub avg_px: Decimal,
    pub state: ExecutionState,
    pub transact_time: DateTime<Utc>,
}

impl Execution {
    pub fn new(
        exec_id: String,
        order_id: String,
        session_id: String,
        last_qty: Decimal,
        last_px: Decimal,
    ) -> Self {
        Self {
            exec_id,
            order_id,
            session_id,
            last_qty: round_qty(last_qty),
            last_px: round_px(last_px),
            cum_qty: Decimal::ZERO,
            avg_px: Decimal::ZERO,
            state: ExecutionState::New,
            transact_time: Utc::now(),
        }
    }

    /// Stamp the post-apply order snapshot onto this execution.
    pub fn applied(&self, cum_qty: Decimal, avg_px: Decimal) -> Execution {
        Execution {
            cum_qty: round_qty(cum_qty),
            avg_px: round_px(avg_px),
            state: ExecutionState::Applied,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_execution_normalizes_scales() {
        let e = Execution::new(
            "E1".into(),
            "O-1".into(),
            "S1".into(),
            dec!(10.00005),
            dec!(1.0000005),
        );
        assert_eq!(e.last_qty, dec!(10.0000));
        assert_eq!(e.last_px, dec!(1.000000));
        assert_eq!(e.state, ExecutionState::New);
    }

    #[test]
    fn applied_stamps_post_state() {
        let e = Execution::new("E1".into(), "O-1".into(), "S1".into(), dec!(40), dec!(10));
        let applied = e.applied(dec!(40), dec!(10));
        assert_eq!(applied.state, ExecutionState::Applied);
        assert_eq!(applied.cum_qty, dec!(40));
        // Receiver untouched.
        assert_eq!(e.state, ExecutionState::New);
    }
}
