//! The Order aggregate.
//!
//! # Invariants
//!
//! After every mutation helper:
//!
//! - `leaves_qty == order_qty - cum_qty`
//! - `0 <= cum_qty <= order_qty`
//! - `order_qty` never changes after creation
//!
//! Helpers are pure: each returns a new [`Order`] and leaves the receiver
//! untouched. They do NOT validate lifecycle edges (the state machine task
//! does that) and they do NOT bump `tx_nr` (the store does, atomically with
//! the row update).

use chrono::{DateTime, Utc};
use omx_errors::OmxError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{round_px, round_qty};
use crate::execution::Execution;
use crate::types::{AssetClass, CancelState, OrdType, OrderState, Side};

// ---------------------------------------------------------------------------
// NewOrder
// ---------------------------------------------------------------------------

/// Creation parameters for an [`Order`]. Explicit struct instead of a long
/// constructor argument list; field meanings match the order itself.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: String,
    pub session_id: String,
    pub cl_ord_id: String,
    pub parent_order_id: Option<String>,
    /// Defaults to `order_id` (root of its own tree) when `None`.
    pub root_order_id: Option<String>,
    pub account: String,
    pub symbol: String,
    pub side: Side,
    pub ord_type: OrdType,
    pub asset_class: AssetClass,
    pub order_qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_px: Option<Decimal>,
    pub place_qty: Option<Decimal>,
    pub alloc_qty: Option<Decimal>,
    pub currency: Option<String>,
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Business-unique order identifier.
    pub order_id: String,
    /// Store-assigned sequence key; `None` until persisted.
    pub order_nr: Option<i64>,
    pub session_id: String,
    pub cl_ord_id: String,
    /// Set on replacements: the `cl_ord_id` of the replaced order.
    pub orig_cl_ord_id: Option<String>,
    pub parent_order_id: Option<String>,
    /// Equals `order_id` for tree roots.
    pub root_order_id: String,
    pub account: String,
    pub symbol: String,
    pub side: Side,
    pub ord_type: OrdType,
    pub asset_class: AssetClass,
    /// Immutable after creation.
    pub order_qty: Decimal,
    /// Monotonically non-decreasing.
    pub cum_qty: Decimal,
    /// Always `order_qty - cum_qty`.
    pub leaves_qty: Decimal,
    pub place_qty: Option<Decimal>,
    pub alloc_qty: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stop_px: Option<Decimal>,
    /// Volume-weighted average fill price; zero until the first fill.
    pub avg_px: Decimal,
    pub currency: Option<String>,
    pub state: OrderState,
    pub cancel_state: CancelState,
    /// Optimistic-concurrency version; bumped by the store on each update.
    pub tx_nr: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a fresh order in `NEW` with canonical scales applied.
    pub fn create(params: NewOrder) -> Self {
        let now = Utc::now();
        let order_qty = round_qty(params.order_qty);
        let root_order_id = params
            .root_order_id
            .unwrap_or_else(|| params.order_id.clone());

        Self {
            order_id: params.order_id,
            order_nr: None,
            session_id: params.session_id,
            cl_ord_id: params.cl_ord_id,
            orig_cl_ord_id: None,
            parent_order_id: params.parent_order_id,
            root_order_id,
            account: params.account,
            symbol: params.symbol,
            side: params.side,
            ord_type: params.ord_type,
            asset_class: params.asset_class,
            order_qty,
            cum_qty: Decimal::ZERO,
            leaves_qty: order_qty,
            place_qty: params.place_qty.map(round_qty),
            alloc_qty: params.alloc_qty.map(round_qty),
            price: params.price.map(round_px),
            stop_px: params.stop_px.map(round_px),
            avg_px: Decimal::ZERO,
            currency: params.currency,
            state: OrderState::New,
            cancel_state: CancelState::None,
            tx_nr: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.root_order_id == self.order_id
    }

    // -----------------------------------------------------------------------
    // Fill application
    // -----------------------------------------------------------------------

    /// Apply one execution increment, producing the post-fill order.
    ///
    /// Updates `cum_qty`, `leaves_qty`, `avg_px` (VWAP, HALF_EVEN at price
    /// scale) and moves the state to `PARTIALLY_FILLED` or `FILLED`.
    ///
    /// # Errors
    /// `Validation` when `last_qty` is not positive or the fill would
    /// overfill the order (`cum_qty` may never exceed `order_qty`).
    pub fn apply_execution(&self, exec: &Execution) -> Result<Order, OmxError> {
        let last_qty = round_qty(exec.last_qty);
        let last_px = round_px(exec.last_px);

        if last_qty <= Decimal::ZERO {
            return Err(OmxError::validation(format!(
                "lastQty must be positive, got {last_qty}"
            ))
            .with_extension("exec_id", exec.exec_id.clone()));
        }

        let cum_qty = self.cum_qty + last_qty;
        if cum_qty > self.order_qty {
            return Err(OmxError::validation(format!(
                "fill of {last_qty} would overfill order {}: cumQty {cum_qty} > orderQty {}",
                self.order_id, self.order_qty
            ))
            .with_extension("exec_id", exec.exec_id.clone())
            .with_extension("order_id", self.order_id.clone()));
        }

        // VWAP over all fills so far.
        let notional = self.avg_px * self.cum_qty + last_px * last_qty;
        let avg_px = round_px(notional / cum_qty);

        let leaves_qty = self.order_qty - cum_qty;
        let state = if leaves_qty.is_zero() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };

        Ok(Order {
            cum_qty,
            leaves_qty,
            avg_px,
            state,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle helpers
    // -----------------------------------------------------------------------

    /// Exchange/session acknowledged the order.
    pub fn mark_unacknowledged(&self) -> Order {
        self.with_state(OrderState::Unack)
    }

    pub fn mark_live(&self) -> Order {
        self.with_state(OrderState::Live)
    }

    pub fn mark_canceled(&self) -> Order {
        let mut next = self.with_state(OrderState::Canceled);
        next.cancel_state = CancelState::None;
        next
    }

    pub fn mark_rejected(&self) -> Order {
        self.with_state(OrderState::Rejected)
    }

    pub fn mark_expired(&self) -> Order {
        self.with_state(OrderState::Expired)
    }

    pub fn mark_closed(&self) -> Order {
        self.with_state(OrderState::Closed)
    }

    fn with_state(&self, state: OrderState) -> Order {
        Order {
            state,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    // -----------------------------------------------------------------------
    // Cancel/replace intent
    // -----------------------------------------------------------------------

    /// Raise a cancel intent. Only legal while the order is working and no
    /// other intent is in flight.
    pub fn request_cancel(&self) -> Result<Order, OmxError> {
        self.raise_intent(CancelState::PendingCancel)
    }

    /// Raise a replace intent (same rules as cancel).
    pub fn request_replace(&self) -> Result<Order, OmxError> {
        self.raise_intent(CancelState::PendingReplace)
    }

    /// Clear a resolved intent (cancel/replace applied or rejected).
    pub fn clear_cancel_intent(&self) -> Order {
        Order {
            cancel_state: CancelState::None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    fn raise_intent(&self, intent: CancelState) -> Result<Order, OmxError> {
        if !self.state.is_executable() {
            return Err(OmxError::invalid_transition(self.state, intent)
                .with_extension("order_id", self.order_id.clone()));
        }
        if self.cancel_state != CancelState::None {
            return Err(OmxError::conflict(&self.order_id, self.tx_nr).with_extension(
                "cancel_state",
                self.cancel_state.as_str().to_string(),
            ));
        }
        Ok(Order {
            cancel_state: intent,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    // -----------------------------------------------------------------------
    // Replacement
    // -----------------------------------------------------------------------

    /// Build the replacement order for a REPLACE command: a new order
    /// carrying the replaced order's lineage and any amended terms.
    pub fn build_replacement(
        &self,
        new_order_id: String,
        new_cl_ord_id: String,
        order_qty: Option<Decimal>,
        price: Option<Decimal>,
    ) -> Order {
        let now = Utc::now();
        let order_qty = round_qty(order_qty.unwrap_or(self.order_qty));
        Order {
            order_id: new_order_id,
            order_nr: None,
            cl_ord_id: new_cl_ord_id,
            orig_cl_ord_id: Some(self.cl_ord_id.clone()),
            parent_order_id: Some(self.order_id.clone()),
            root_order_id: self.root_order_id.clone(),
            order_qty,
            cum_qty: Decimal::ZERO,
            leaves_qty: order_qty,
            price: price.map(round_px).or(self.price),
            avg_px: Decimal::ZERO,
            state: OrderState::New,
            cancel_state: CancelState::None,
            tx_nr: 0,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Check the computed-quantity invariant; used by persistence as a last
    /// line of defense and by property tests.
    pub fn quantities_consistent(&self) -> bool {
        self.leaves_qty == self.order_qty - self.cum_qty
            && self.cum_qty >= Decimal::ZERO
            && self.cum_qty <= self.order_qty
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit_order(qty: Decimal) -> Order {
        Order::create(NewOrder {
            order_id: "O-1".into(),
            session_id: "S1".into(),
            cl_ord_id: "C1".into(),
            parent_order_id: None,
            root_order_id: None,
            account: "ACC1".into(),
            symbol: "AAPL".into(),
            side: Side::Buy,
            ord_type: OrdType::Limit,
            asset_class: AssetClass::Equity,
            order_qty: qty,
            price: Some(dec!(150.00)),
            stop_px: None,
            place_qty: None,
            alloc_qty: None,
            currency: Some("USD".into()),
        })
    }

    fn exec(id: &str, qty: Decimal, px: Decimal) -> Execution {
        Execution::new(id.into(), "O-1".into(), "S1".into(), qty, px)
    }

    #[test]
    fn create_starts_new_with_full_leaves() {
        let o = limit_order(dec!(100));
        assert_eq!(o.state, OrderState::New);
        assert_eq!(o.cum_qty, Decimal::ZERO);
        assert_eq!(o.leaves_qty, o.order_qty);
        assert_eq!(o.tx_nr, 0);
        assert!(o.is_root());
        assert!(o.quantities_consistent());
    }

    #[test]
    fn partial_fill_then_full_fill() {
        let o = limit_order(dec!(100)).mark_live();

        let after_e1 = o.apply_execution(&exec("E1", dec!(40), dec!(10.00))).unwrap();
        assert_eq!(after_e1.state, OrderState::PartiallyFilled);
        assert_eq!(after_e1.cum_qty, dec!(40));
        assert_eq!(after_e1.leaves_qty, dec!(60));
        // The receiver is untouched.
        assert_eq!(o.cum_qty, Decimal::ZERO);

        let after_e2 = after_e1
            .apply_execution(&exec("E2", dec!(60), dec!(10.50)))
            .unwrap();
        assert_eq!(after_e2.state, OrderState::Filled);
        assert_eq!(after_e2.cum_qty, dec!(100));
        assert_eq!(after_e2.leaves_qty, dec!(0));
        assert_eq!(after_e2.avg_px, dec!(10.30));
        assert!(after_e2.quantities_consistent());
    }

    #[test]
    fn single_full_fill_sets_avg_px() {
        let o = limit_order(dec!(100)).mark_live();
        let filled = o.apply_execution(&exec("E1", dec!(100), dec!(150.00))).unwrap();
        assert_eq!(filled.state, OrderState::Filled);
        assert_eq!(filled.avg_px, dec!(150.00));
    }

    #[test]
    fn overfill_is_rejected_without_mutation() {
        let o = limit_order(dec!(100)).mark_live();
        let err = o.apply_execution(&exec("E1", dec!(101), dec!(10))).unwrap_err();
        assert_eq!(err.kind(), omx_errors::ErrorKind::Validation);
        assert!(err.message.contains("overfill"));
        assert_eq!(o.cum_qty, Decimal::ZERO);
    }

    #[test]
    fn zero_qty_fill_is_rejected() {
        let o = limit_order(dec!(100)).mark_live();
        let err = o.apply_execution(&exec("E1", dec!(0), dec!(10))).unwrap_err();
        assert_eq!(err.kind(), omx_errors::ErrorKind::Validation);
    }

    #[test]
    fn mark_canceled_clears_intent() {
        let o = limit_order(dec!(100)).mark_live().request_cancel().unwrap();
        assert_eq!(o.cancel_state, CancelState::PendingCancel);
        let canceled = o.mark_canceled();
        assert_eq!(canceled.state, OrderState::Canceled);
        assert_eq!(canceled.cancel_state, CancelState::None);
    }

    #[test]
    fn intent_refused_when_not_working() {
        let o = limit_order(dec!(100));
        let err = o.request_cancel().unwrap_err();
        assert_eq!(err.kind(), omx_errors::ErrorKind::InvalidStateTransition);
    }

    #[test]
    fn second_intent_refused_while_one_in_flight() {
        let o = limit_order(dec!(100)).mark_live().request_cancel().unwrap();
        let err = o.request_replace().unwrap_err();
        assert_eq!(err.kind(), omx_errors::ErrorKind::Conflict);
    }

    #[test]
    fn replacement_carries_lineage() {
        let orig = limit_order(dec!(100)).mark_live();
        let repl = orig.build_replacement("O-2".into(), "C2".into(), Some(dec!(50)), None);
        assert_eq!(repl.orig_cl_ord_id.as_deref(), Some("C1"));
        assert_eq!(repl.parent_order_id.as_deref(), Some("O-1"));
        assert_eq!(repl.root_order_id, "O-1");
        assert_eq!(repl.order_qty, dec!(50));
        assert_eq!(repl.state, OrderState::New);
        assert_eq!(repl.price, orig.price);
        assert!(repl.quantities_consistent());
    }

    #[test]
    fn avg_px_rounds_half_even() {
        let o = limit_order(dec!(3)).mark_live();
        let a = o.apply_execution(&exec("E1", dec!(1), dec!(10.000001))).unwrap();
        let b = a.apply_execution(&exec("E2", dec!(1), dec!(10.000002))).unwrap();
        let c = b.apply_execution(&exec("E3", dec!(1), dec!(10.000002))).unwrap();
        // (10.000001 + 10.000002 + 10.000002) / 3 = 10.000001666... -> 10.000002
        assert_eq!(c.avg_px, dec!(10.000002));
    }
}
