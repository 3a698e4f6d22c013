//! Quotes.
//!
//! Quotes participate in the lifecycle machinery (see
//! [`machines::quote_lifecycle`](crate::machines::quote_lifecycle)) but have
//! no command pipeline of their own in the core; they are carried for the
//! sessions that stream them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{round_px, round_qty};
use crate::types::QuoteState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub quote_id: String,
    pub session_id: String,
    pub symbol: String,
    pub bid_px: Option<Decimal>,
    pub offer_px: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub offer_size: Option<Decimal>,
    pub state: QuoteState,
    pub created_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(quote_id: String, session_id: String, symbol: String) -> Self {
        Self {
            quote_id,
            session_id,
            symbol,
            bid_px: None,
            offer_px: None,
            bid_size: None,
            offer_size: None,
            state: QuoteState::New,
            created_at: Utc::now(),
        }
    }

    pub fn with_bid(mut self, px: Decimal, size: Decimal) -> Self {
        self.bid_px = Some(round_px(px));
        self.bid_size = Some(round_qty(size));
        self
    }

    pub fn with_offer(mut self, px: Decimal, size: Decimal) -> Self {
        self.offer_px = Some(round_px(px));
        self.offer_size = Some(round_qty(size));
        self
    }

    pub fn mark_open(&self) -> Quote {
        Quote {
            state: QuoteState::Open,
            ..self.clone()
        }
    }

    pub fn mark_canceled(&self) -> Quote {
        Quote {
            state: QuoteState::Canceled,
            ..self.clone()
        }
    }

    pub fn mark_expired(&self) -> Quote {
        Quote {
            state: QuoteState::Expired,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn two_sided_quote_normalizes_scales() {
        let q = Quote::new("Q1".into(), "S1".into(), "EUR/USD".into())
            .with_bid(dec!(1.0834505), dec!(1000000))
            .with_offer(dec!(1.0835515), dec!(1000000));
        assert_eq!(q.bid_px, Some(dec!(1.083450)));
        assert_eq!(q.offer_px, Some(dec!(1.083552)));
        assert_eq!(q.state, QuoteState::New);
    }
}
