//! State and attribute enums shared across the core.
//!
//! Every enum has `as_str`/`parse` for the text columns the store uses;
//! serde uses the same SCREAMING_SNAKE_CASE spelling on the wire.

use omx_errors::OmxError;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OrderState
// ---------------------------------------------------------------------------

/// Primary order lifecycle. Terminal states are `Closed` and `Expired`;
/// which edges are legal is declared in [`machines`](crate::machines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    New,
    Unack,
    Live,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Closed,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::New => "NEW",
            OrderState::Unack => "UNACK",
            OrderState::Live => "LIVE",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::Filled => "FILLED",
            OrderState::Canceled => "CANCELED",
            OrderState::Rejected => "REJECTED",
            OrderState::Expired => "EXPIRED",
            OrderState::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OmxError> {
        match s {
            "NEW" => Ok(OrderState::New),
            "UNACK" => Ok(OrderState::Unack),
            "LIVE" => Ok(OrderState::Live),
            "PARTIALLY_FILLED" => Ok(OrderState::PartiallyFilled),
            "FILLED" => Ok(OrderState::Filled),
            "CANCELED" => Ok(OrderState::Canceled),
            "REJECTED" => Ok(OrderState::Rejected),
            "EXPIRED" => Ok(OrderState::Expired),
            "CLOSED" => Ok(OrderState::Closed),
            other => Err(OmxError::data_integrity(format!(
                "invalid order state: {other}"
            ))),
        }
    }

    /// True for states an execution may be applied in.
    pub fn is_executable(&self) -> bool {
        matches!(self, OrderState::Live | OrderState::PartiallyFilled)
    }
}

// ---------------------------------------------------------------------------
// CancelState
// ---------------------------------------------------------------------------

/// In-flight cancel/replace intent, tracked independently of the primary
/// lifecycle. `PendingCancel`/`PendingReplace` map to the FIX PCXL/PMOD
/// working states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelState {
    None,
    PendingCancel,
    PendingReplace,
}

impl CancelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelState::None => "NONE",
            CancelState::PendingCancel => "PENDING_CANCEL",
            CancelState::PendingReplace => "PENDING_REPLACE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OmxError> {
        match s {
            "NONE" => Ok(CancelState::None),
            "PENDING_CANCEL" => Ok(CancelState::PendingCancel),
            "PENDING_REPLACE" => Ok(CancelState::PendingReplace),
            other => Err(OmxError::data_integrity(format!(
                "invalid cancel state: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

/// Execution report lifecycle: a report is applied to its order exactly
/// once, or rejected without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    New,
    Applied,
    Rejected,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::New => "NEW",
            ExecutionState::Applied => "APPLIED",
            ExecutionState::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OmxError> {
        match s {
            "NEW" => Ok(ExecutionState::New),
            "APPLIED" => Ok(ExecutionState::Applied),
            "REJECTED" => Ok(ExecutionState::Rejected),
            other => Err(OmxError::data_integrity(format!(
                "invalid execution state: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// QuoteState
// ---------------------------------------------------------------------------

/// Quote lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteState {
    New,
    Open,
    Canceled,
    Expired,
}

impl QuoteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteState::New => "NEW",
            QuoteState::Open => "OPEN",
            QuoteState::Canceled => "CANCELED",
            QuoteState::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OmxError> {
        match s {
            "NEW" => Ok(QuoteState::New),
            "OPEN" => Ok(QuoteState::Open),
            "CANCELED" => Ok(QuoteState::Canceled),
            "EXPIRED" => Ok(QuoteState::Expired),
            other => Err(OmxError::data_integrity(format!(
                "invalid quote state: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Side / OrdType / AssetClass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OmxError> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(OmxError::data_integrity(format!("invalid side: {other}"))),
        }
    }
}

/// Order type. Price requirements per type are enforced by the validation
/// rule catalog: LIMIT/STOP_LIMIT need `price`, STOP/STOP_LIMIT need
/// `stop_px`, MARKET must not carry a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrdType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrdType::Market => "MARKET",
            OrdType::Limit => "LIMIT",
            OrdType::Stop => "STOP",
            OrdType::StopLimit => "STOP_LIMIT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OmxError> {
        match s {
            "MARKET" => Ok(OrdType::Market),
            "LIMIT" => Ok(OrdType::Limit),
            "STOP" => Ok(OrdType::Stop),
            "STOP_LIMIT" => Ok(OrdType::StopLimit),
            other => Err(OmxError::data_integrity(format!(
                "invalid ord type: {other}"
            ))),
        }
    }

    pub fn requires_price(&self) -> bool {
        matches!(self, OrdType::Limit | OrdType::StopLimit)
    }

    pub fn requires_stop_px(&self) -> bool {
        matches!(self, OrdType::Stop | OrdType::StopLimit)
    }
}

/// Asset-class discriminator. Selects additional validation rules at
/// pipeline construction; there is no per-class entity subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    Equity,
    Fx,
    FixedIncome,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Equity => "EQUITY",
            AssetClass::Fx => "FX",
            AssetClass::FixedIncome => "FIXED_INCOME",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OmxError> {
        match s {
            "EQUITY" => Ok(AssetClass::Equity),
            "FX" => Ok(AssetClass::Fx),
            "FIXED_INCOME" => Ok(AssetClass::FixedIncome),
            other => Err(OmxError::data_integrity(format!(
                "invalid asset class: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_state_round_trips_through_text() {
        for s in [
            OrderState::New,
            OrderState::Unack,
            OrderState::Live,
            OrderState::PartiallyFilled,
            OrderState::Filled,
            OrderState::Canceled,
            OrderState::Rejected,
            OrderState::Expired,
            OrderState::Closed,
        ] {
            assert_eq!(OrderState::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn unknown_state_text_is_data_integrity() {
        let err = OrderState::parse("BOGUS").unwrap_err();
        assert_eq!(err.kind(), omx_errors::ErrorKind::DataIntegrity);
    }

    #[test]
    fn executable_states() {
        assert!(OrderState::Live.is_executable());
        assert!(OrderState::PartiallyFilled.is_executable());
        assert!(!OrderState::New.is_executable());
        assert!(!OrderState::Filled.is_executable());
    }

    #[test]
    fn ord_type_price_requirements() {
        assert!(OrdType::Limit.requires_price());
        assert!(OrdType::StopLimit.requires_price());
        assert!(!OrdType::Market.requires_price());
        assert!(OrdType::Stop.requires_stop_px());
        assert!(OrdType::StopLimit.requires_stop_px());
        assert!(!OrdType::Limit.requires_stop_px());
    }
}
