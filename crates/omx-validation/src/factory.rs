//! Asset-class rule selection.
//!
//! Engines are assembled once at startup, at pipeline construction time,
//! and shared read-only afterwards. The asset-class discriminator on the
//! order decides which extension rules join the base catalog.

use rust_decimal::Decimal;

use omx_domain::{AssetClass, Order};

use crate::order_rules::{
    AllocQtyConstraint, CumQtyConstraint, EquityRoundLot, ExecutableState, FxMinNotional,
    FxSymbolFormat, Price, Quantity, RequiredFields,
};
use crate::ValidationEngine;

/// Configured bounds for the rule catalog (`validation.*` options).
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    pub max_order_qty: Decimal,
    pub equity_round_lot: u32,
    pub fx_min_notional: Decimal,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_order_qty: Decimal::from(1_000_000),
            equity_round_lot: 100,
            fx_min_notional: Decimal::from(1_000),
        }
    }
}

/// Build the order-validation engine for an asset class.
///
/// Base rules run for every class; extensions are appended per
/// discriminator. Errors aggregate (no stop-on-first) so a caller sees the
/// full defect list in one round trip.
pub fn order_engine(asset_class: AssetClass, limits: &ValidationLimits) -> ValidationEngine<Order> {
    let engine = ValidationEngine::new(format!("order-{}", asset_class.as_str()))
        .add_rule(RequiredFields)
        .add_rule(Quantity {
            max_order_qty: limits.max_order_qty,
        })
        .add_rule(Price)
        .add_rule(CumQtyConstraint)
        .add_rule(AllocQtyConstraint);

    match asset_class {
        AssetClass::Equity => engine.add_rule(EquityRoundLot {
            lot: limits.equity_round_lot,
        }),
        AssetClass::Fx => engine.add_rule(FxSymbolFormat::new()).add_rule(FxMinNotional {
            min_notional: limits.fx_min_notional,
        }),
        AssetClass::FixedIncome => engine,
    }
}

/// Build the engine guarding execution application: the order must be in an
/// executable state and its quantity invariant intact. Stops on first
/// failure; an inapplicable order makes further checks noise.
pub fn execution_engine() -> ValidationEngine<Order> {
    ValidationEngine::new("execution-apply")
        .stop_on_first_failure(true)
        .add_rule(ExecutableState)
        .add_rule(CumQtyConstraint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_domain::{NewOrder, OrdType, Side};
    use rust_decimal_macros::dec;

    fn order(asset_class: AssetClass, symbol: &str, qty: Decimal) -> Order {
        Order::create(NewOrder {
            order_id: "O-1".into(),
            session_id: "S1".into(),
            cl_ord_id: "C1".into(),
            parent_order_id: None,
            root_order_id: None,
            account: "ACC1".into(),
            symbol: symbol.into(),
            side: Side::Buy,
            ord_type: OrdType::Limit,
            asset_class,
            order_qty: qty,
            price: Some(dec!(50.00)),
            stop_px: None,
            place_qty: None,
            alloc_qty: None,
            currency: None,
        })
    }

    #[test]
    fn equity_engine_includes_round_lot() {
        let limits = ValidationLimits::default();
        let engine = order_engine(AssetClass::Equity, &limits);
        assert!(engine
            .validate(&order(AssetClass::Equity, "AAPL", dec!(100)))
            .is_valid());
        let result = engine.validate(&order(AssetClass::Equity, "AAPL", dec!(150)));
        assert!(!result.is_valid());
        assert!(result.errors()[0].contains("round lot"));
    }

    #[test]
    fn fx_engine_includes_symbol_and_notional() {
        let limits = ValidationLimits::default();
        let engine = order_engine(AssetClass::Fx, &limits);
        assert!(engine
            .validate(&order(AssetClass::Fx, "EUR/USD", dec!(100000)))
            .is_valid());
        let result = engine.validate(&order(AssetClass::Fx, "EURUSD", dec!(1)));
        // Bad symbol format AND below min notional.
        assert_eq!(result.errors().len(), 2);
    }

    #[test]
    fn fixed_income_uses_base_rules_only() {
        let limits = ValidationLimits::default();
        let engine = order_engine(AssetClass::FixedIncome, &limits);
        // 150 is not a round lot, but that rule only applies to equities.
        assert!(engine
            .validate(&order(AssetClass::FixedIncome, "T 4.25 2034", dec!(150)))
            .is_valid());
    }

    #[test]
    fn execution_engine_rejects_non_executable_order() {
        let engine = execution_engine();
        let o = order(AssetClass::Equity, "AAPL", dec!(100));
        assert!(!engine.validate(&o).is_valid());
        assert!(engine.validate(&o.mark_live()).is_valid());
    }
}
