//! The order rule catalog.
//!
//! Each rule is a small stateless (or config-carrying) struct; the factory
//! assembles them per asset class. Enum-typed fields (side, ordType) cannot
//! be absent in the typed model (their presence is enforced at command
//! deserialization), so RequiredFields covers the string and quantity
//! fields only.

use regex::Regex;
use rust_decimal::Decimal;

use omx_domain::{OrdType, Order};

use crate::{ValidationResult, ValidationRule};

// ---------------------------------------------------------------------------
// RequiredFields
// ---------------------------------------------------------------------------

/// `sessionId`, `clOrdId`, `symbol`, `account` non-empty; `orderQty`
/// non-zero.
pub struct RequiredFields;

impl ValidationRule<Order> for RequiredFields {
    fn name(&self) -> &str {
        "RequiredFields"
    }

    fn validate(&self, order: &Order) -> ValidationResult {
        let mut errors = Vec::new();
        for (field, value) in [
            ("sessionId", &order.session_id),
            ("clOrdId", &order.cl_ord_id),
            ("symbol", &order.symbol),
            ("account", &order.account),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{field} is required"));
            }
        }
        if order.order_qty.is_zero() {
            errors.push("orderQty is required".to_string());
        }
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(errors)
        }
    }
}

// ---------------------------------------------------------------------------
// Quantity
// ---------------------------------------------------------------------------

/// `0 < orderQty <= max`.
pub struct Quantity {
    pub max_order_qty: Decimal,
}

impl ValidationRule<Order> for Quantity {
    fn name(&self) -> &str {
        "Quantity"
    }

    fn validate(&self, order: &Order) -> ValidationResult {
        if order.order_qty <= Decimal::ZERO {
            return ValidationResult::invalid(format!(
                "orderQty must be positive, got {}",
                order.order_qty
            ));
        }
        if order.order_qty > self.max_order_qty {
            return ValidationResult::invalid(format!(
                "orderQty {} exceeds maximum {}",
                order.order_qty, self.max_order_qty
            ));
        }
        ValidationResult::Valid
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

/// Price requirements by order type: LIMIT/STOP_LIMIT need a positive
/// `price`, STOP/STOP_LIMIT a positive `stopPx`, MARKET must not carry a
/// price.
pub struct Price;

impl ValidationRule<Order> for Price {
    fn name(&self) -> &str {
        "Price"
    }

    fn validate(&self, order: &Order) -> ValidationResult {
        let mut errors = Vec::new();

        if order.ord_type.requires_price() {
            match order.price {
                Some(px) if px > Decimal::ZERO => {}
                Some(px) => errors.push(format!(
                    "price must be positive for {}, got {px}",
                    order.ord_type.as_str()
                )),
                None => errors.push(format!(
                    "price is required for {}",
                    order.ord_type.as_str()
                )),
            }
        }

        if order.ord_type.requires_stop_px() {
            match order.stop_px {
                Some(px) if px > Decimal::ZERO => {}
                Some(px) => errors.push(format!(
                    "stopPx must be positive for {}, got {px}",
                    order.ord_type.as_str()
                )),
                None => errors.push(format!(
                    "stopPx is required for {}",
                    order.ord_type.as_str()
                )),
            }
        }

        if order.ord_type == OrdType::Market && order.price.is_some() {
            errors.push("price must be absent for MARKET".to_string());
        }

        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(errors)
        }
    }
}

// ---------------------------------------------------------------------------
// CumQtyConstraint
// ---------------------------------------------------------------------------

/// `cumQty <= orderQty`, and the computed `leavesQty` agrees.
pub struct CumQtyConstraint;

impl ValidationRule<Order> for CumQtyConstraint {
    fn name(&self) -> &str {
        "CumQtyConstraint"
    }

    fn validate(&self, order: &Order) -> ValidationResult {
        if order.cum_qty > order.order_qty {
            return ValidationResult::invalid(format!(
                "cumQty {} exceeds orderQty {}",
                order.cum_qty, order.order_qty
            ));
        }
        if !order.quantities_consistent() {
            return ValidationResult::invalid(format!(
                "leavesQty {} != orderQty {} - cumQty {}",
                order.leaves_qty, order.order_qty, order.cum_qty
            ));
        }
        ValidationResult::Valid
    }
}

// ---------------------------------------------------------------------------
// AllocQtyConstraint
// ---------------------------------------------------------------------------

/// `allocQty`, when present, is non-negative and never exceeds `cumQty`.
pub struct AllocQtyConstraint;

impl ValidationRule<Order> for AllocQtyConstraint {
    fn name(&self) -> &str {
        "AllocQtyConstraint"
    }

    fn validate(&self, order: &Order) -> ValidationResult {
        match order.alloc_qty {
            None => ValidationResult::Valid,
            Some(alloc) if alloc < Decimal::ZERO => {
                ValidationResult::invalid(format!("allocQty must not be negative, got {alloc}"))
            }
            Some(alloc) if alloc > order.cum_qty => ValidationResult::invalid(format!(
                "allocQty {alloc} exceeds cumQty {}",
                order.cum_qty
            )),
            Some(_) => ValidationResult::Valid,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutableState
// ---------------------------------------------------------------------------

/// The order must be LIVE or PARTIALLY_FILLED for an execution to apply.
pub struct ExecutableState;

impl ValidationRule<Order> for ExecutableState {
    fn name(&self) -> &str {
        "ExecutableState"
    }

    fn validate(&self, order: &Order) -> ValidationResult {
        if order.state.is_executable() {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid(format!(
                "order {} is {} and cannot accept executions",
                order.order_id,
                order.state.as_str()
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Asset-class rules
// ---------------------------------------------------------------------------

/// Equity round lot: `orderQty % lot == 0`.
pub struct EquityRoundLot {
    pub lot: u32,
}

impl ValidationRule<Order> for EquityRoundLot {
    fn name(&self) -> &str {
        "EquityRoundLot"
    }

    fn validate(&self, order: &Order) -> ValidationResult {
        let lot = Decimal::from(self.lot);
        if lot.is_zero() {
            return ValidationResult::Valid;
        }
        if (order.order_qty % lot).is_zero() {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid(format!(
                "orderQty {} is not a multiple of the {} round lot",
                order.order_qty, self.lot
            ))
        }
    }
}

/// FX symbols must be `CCY1/CCY2`.
pub struct FxSymbolFormat {
    pattern: Regex,
}

impl FxSymbolFormat {
    pub fn new() -> Self {
        Self {
            // Three uppercase letters, slash, three uppercase letters.
            pattern: Regex::new("^[A-Z]{3}/[A-Z]{3}$").expect("static regex"),
        }
    }
}

impl Default for FxSymbolFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationRule<Order> for FxSymbolFormat {
    fn name(&self) -> &str {
        "FxSymbolFormat"
    }

    fn validate(&self, order: &Order) -> ValidationResult {
        if self.pattern.is_match(&order.symbol) {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid(format!(
                "FX symbol must be CCY1/CCY2, got {}",
                order.symbol
            ))
        }
    }
}

/// FX minimum notional: `orderQty * price` (or bare `orderQty` for orders
/// without a limit price) must reach the configured floor.
pub struct FxMinNotional {
    pub min_notional: Decimal,
}

impl ValidationRule<Order> for FxMinNotional {
    fn name(&self) -> &str {
        "FxMinNotional"
    }

    fn validate(&self, order: &Order) -> ValidationResult {
        let notional = match order.price {
            Some(px) => order.order_qty * px,
            None => order.order_qty,
        };
        if notional >= self.min_notional {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid(format!(
                "notional {notional} below FX minimum {}",
                self.min_notional
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use omx_domain::{AssetClass, NewOrder, Side};
    use rust_decimal_macros::dec;

    fn base_order() -> Order {
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
            order_qty: dec!(100),
            price: Some(dec!(150.00)),
            stop_px: None,
            place_qty: None,
            alloc_qty: None,
            currency: None,
        })
    }

    #[test]
    fn required_fields_pass_on_complete_order() {
        assert!(RequiredFields.validate(&base_order()).is_valid());
    }

    #[test]
    fn required_fields_report_each_missing_field() {
        let mut order = base_order();
        order.session_id = String::new();
        order.account = "  ".into();
        let result = RequiredFields.validate(&order);
        assert_eq!(result.errors().len(), 2);
        assert!(result.errors()[0].contains("sessionId"));
        assert!(result.errors()[1].contains("account"));
    }

    #[test]
    fn quantity_zero_fails() {
        let mut order = base_order();
        order.order_qty = Decimal::ZERO;
        let result = Quantity {
            max_order_qty: dec!(1000000),
        }
        .validate(&order);
        assert!(!result.is_valid());
        assert!(result.errors()[0].contains("positive"));
    }

    #[test]
    fn quantity_above_max_fails() {
        let result = Quantity {
            max_order_qty: dec!(10),
        }
        .validate(&base_order());
        assert!(!result.is_valid());
        assert!(result.errors()[0].contains("maximum"));
    }

    #[test]
    fn limit_without_price_fails() {
        let mut order = base_order();
        order.price = None;
        let result = Price.validate(&order);
        assert!(!result.is_valid());
        assert!(result.errors()[0].contains("price is required"));
    }

    #[test]
    fn market_with_price_fails() {
        let mut order = base_order();
        order.ord_type = OrdType::Market;
        let result = Price.validate(&order);
        assert!(!result.is_valid());
        assert!(result.errors()[0].contains("absent"));
    }

    #[test]
    fn stop_limit_needs_both_prices() {
        let mut order = base_order();
        order.ord_type = OrdType::StopLimit;
        order.price = None;
        order.stop_px = None;
        let result = Price.validate(&order);
        assert_eq!(result.errors().len(), 2);
    }

    #[test]
    fn cum_qty_over_order_qty_fails() {
        let mut order = base_order();
        order.cum_qty = dec!(150);
        order.leaves_qty = order.order_qty - order.cum_qty;
        let result = CumQtyConstraint.validate(&order);
        assert!(!result.is_valid());
    }

    #[test]
    fn executable_state_accepts_live_only() {
        let mut order = base_order();
        assert!(!ExecutableState.validate(&order).is_valid());
        order = order.mark_live();
        assert!(ExecutableState.validate(&order).is_valid());
    }

    #[test]
    fn round_lot_multiple_passes() {
        let rule = EquityRoundLot { lot: 100 };
        assert!(rule.validate(&base_order()).is_valid());
        let mut odd = base_order();
        odd.order_qty = dec!(150);
        assert!(!rule.validate(&odd).is_valid());
    }

    #[test]
    fn fx_symbol_format() {
        let rule = FxSymbolFormat::new();
        let mut order = base_order();
        order.symbol = "EUR/USD".into();
        assert!(rule.validate(&order).is_valid());
        order.symbol = "EURUSD".into();
        assert!(!rule.validate(&order).is_valid());
    }

    #[test]
    fn fx_min_notional_uses_price_when_present() {
        let rule = FxMinNotional {
            min_notional: dec!(10000),
        };
        let mut order = base_order();
        order.symbol = "EUR/USD".into();
        order.order_qty = dec!(100);
        order.price = Some(dec!(1.08));
        // 100 * 1.08 = 108 < 10000
        assert!(!rule.validate(&order).is_valid());
        order.order_qty = dec!(100000);
        assert!(rule.validate(&order).is_valid());
    }

    #[test]
    fn alloc_qty_bounded_by_cum_qty() {
        let mut order = base_order();
        order.alloc_qty = Some(dec!(10));
        assert!(!AllocQtyConstraint.validate(&order).is_valid());
        order.cum_qty = dec!(50);
        order.leaves_qty = order.order_qty - order.cum_qty;
        assert!(AllocQtyConstraint.validate(&order).is_valid());
    }
}
