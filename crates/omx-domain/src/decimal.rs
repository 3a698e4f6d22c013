//! Fixed-precision arithmetic policy.
//!
//! Quantities are scale 4, prices scale 6. Rounding mode is HALF_EVEN
//! (banker's rounding) for every derived value. Floating point must never
//! touch a money or quantity field.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal scale for quantity fields (`order_qty`, `cum_qty`, ...).
pub const QTY_SCALE: u32 = 4;

/// Decimal scale for price fields (`price`, `stop_px`, `avg_px`, ...).
pub const PX_SCALE: u32 = 6;

/// Round a quantity to its canonical scale.
pub fn round_qty(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QTY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Round a price to its canonical scale.
pub fn round_px(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PX_SCALE, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn qty_rounds_half_even_at_scale_4() {
        assert_eq!(round_qty(dec!(1.00005)), dec!(1.0000));
        assert_eq!(round_qty(dec!(1.00015)), dec!(1.0002));
        assert_eq!(round_qty(dec!(1.00025)), dec!(1.0002));
    }

    #[test]
    fn px_rounds_half_even_at_scale_6() {
        assert_eq!(round_px(dec!(10.0000005)), dec!(10.000000));
        assert_eq!(round_px(dec!(10.0000015)), dec!(10.000002));
    }
}
