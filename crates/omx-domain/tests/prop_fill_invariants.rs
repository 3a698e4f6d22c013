//! Property tests for the fill-application invariants.
//!
//! For any sequence of positive fill increments, after every accepted
//! application: `leaves_qty == order_qty - cum_qty`, `cum_qty` never
//! decreases, never exceeds `order_qty`, and the terminal fill flips the
//! state to FILLED exactly when leaves reach zero.

use proptest::prelude::*;
use rust_decimal::Decimal;

use omx_domain::{AssetClass, Execution, NewOrder, OrdType, Order, OrderState, Side};

fn order_with_qty(qty: Decimal) -> Order {
    Order::create(NewOrder {
        order_id: "O-prop".into(),
        session_id: "S1".into(),
        cl_ord_id: "C1".into(),
        parent_order_id: None,
        root_order_id: None,
        account: "ACC".into(),
        symbol: "AAPL".into(),
        side: Side::Buy,
        ord_type: OrdType::Limit,
        asset_class: AssetClass::Equity,
        order_qty: qty,
        price: Some(Decimal::new(15000, 2)),
        stop_px: None,
        place_qty: None,
        alloc_qty: None,
        currency: None,
    })
    .mark_live()
}

proptest! {
    #[test]
    fn fills_preserve_quantity_invariants(
        order_qty in 1i64..=1_000_000,
        fill_qtys in proptest::collection::vec(1i64..=10_000, 1..20),
        px_cents in 1i64..=100_000,
    ) {
        let order_qty = Decimal::new(order_qty, 2);
        let px = Decimal::new(px_cents, 2);
        let mut order = order_with_qty(order_qty);

        for (i, q) in fill_qtys.iter().enumerate() {
            let exec = Execution::new(
                format!("E{i}"),
                order.order_id.clone(),
                order.session_id.clone(),
                Decimal::new(*q, 2),
                px,
            );
            match order.apply_execution(&exec) {
                Ok(next) => {
                    prop_assert!(next.quantities_consistent());
                    prop_assert!(next.cum_qty >= order.cum_qty, "cum_qty must not decrease");
                    prop_assert!(next.cum_qty <= next.order_qty);
                    prop_assert_eq!(next.order_qty, order.order_qty, "order_qty is immutable");
                    if next.leaves_qty.is_zero() {
                        prop_assert_eq!(next.state, OrderState::Filled);
                    } else {
                        prop_assert_eq!(next.state, OrderState::PartiallyFilled);
                    }
                    order = next;
                }
                Err(_) => {
                    // Overfill refused: the order must be untouched and the
                    // rejected increment must indeed not have fit.
                    prop_assert!(order.cum_qty + Decimal::new(*q, 2) > order.order_qty);
                }
            }
        }
    }

    #[test]
    fn single_price_fills_yield_that_avg_px(
        order_qty in 1i64..=10_000,
        px_cents in 1i64..=100_000,
    ) {
        let qty = Decimal::new(order_qty, 0);
        let px = Decimal::new(px_cents, 2);
        let order = order_with_qty(qty);
        let exec = Execution::new(
            "E1".into(),
            order.order_id.clone(),
            order.session_id.clone(),
            qty,
            px,
        );
        let filled = order.apply_execution(&exec).unwrap();
        prop_assert_eq!(filled.state, OrderState::Filled);
        prop_assert_eq!(filled.avg_px, px);
    }
}
