//! Transport-agnostic envelopes: inbound commands and outbound events.
//!
//! # Evolution contract
//!
//! The event wire format evolves by compatible addition only: new fields
//! must carry `#[serde(default)]` so old consumers keep decoding. Removing
//! or retyping a field is a breaking change and requires a new topic or
//! schema version.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use omx_domain::{AssetClass, CancelState, OrdType, Order, OrderState, Side};
use omx_errors::OmxError;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// One topic per entity family; the partition key is always `order_id`, so
/// per-order emission order is preserved on the bus.
pub mod topics {
    pub const ORDER_EVENTS: &str = "order-events";
    pub const EXECUTION_EVENTS: &str = "execution-events";
}

// ---------------------------------------------------------------------------
// Commands (inbound)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Create,
    Accept,
    Cancel,
    Replace,
    Execute,
    Expire,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Create => "CREATE",
            CommandKind::Accept => "ACCEPT",
            CommandKind::Cancel => "CANCEL",
            CommandKind::Replace => "REPLACE",
            CommandKind::Execute => "EXECUTE",
            CommandKind::Expire => "EXPIRE",
        }
    }
}

/// Common envelope all commands share (§6.1). Transports deserialize into
/// this and hand it to the matching processor; the core never sees the
/// transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub kind: CommandKind,
    /// Opaque tracing id; minted by the transport, echoed on every error
    /// and event.
    pub correlation_id: Uuid,
    pub session_id: String,
    /// Required for order-creating commands.
    pub cl_ord_id: Option<String>,
    /// Required for non-CREATE commands.
    pub order_id: Option<String>,
    /// Required for REPLACE and CANCEL.
    pub orig_cl_ord_id: Option<String>,
    /// Absolute deadline; pipelines abort at task boundaries once passed.
    pub deadline: Option<DateTime<Utc>>,
    pub payload: CommandPayload,
}

impl CommandEnvelope {
    /// The `order_id`, or a Validation error naming the missing field.
    pub fn require_order_id(&self) -> Result<&str, OmxError> {
        self.order_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                OmxError::validation("orderId is required")
                    .with_correlation_id(self.correlation_id)
            })
    }

    pub fn require_cl_ord_id(&self) -> Result<&str, OmxError> {
        self.cl_ord_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                OmxError::validation("clOrdId is required")
                    .with_correlation_id(self.correlation_id)
            })
    }

    pub fn require_orig_cl_ord_id(&self) -> Result<&str, OmxError> {
        self.orig_cl_ord_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                OmxError::validation("origClOrdId is required")
                    .with_correlation_id(self.correlation_id)
            })
    }

    pub fn deadline_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}

/// Kind-specific command fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandPayload {
    Create(CreateOrder),
    Accept(AcceptOrder),
    Cancel(CancelOrder),
    Replace(ReplaceOrder),
    Execute(ExecuteOrder),
    Expire(ExpireOrder),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrder {
    pub symbol: String,
    pub side: Side,
    pub ord_type: OrdType,
    pub asset_class: AssetClass,
    pub account: String,
    pub order_qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_px: Option<Decimal>,
    #[serde(default)]
    pub place_qty: Option<Decimal>,
    #[serde(default)]
    pub alloc_qty: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub parent_order_id: Option<String>,
}

/// Session verdict on a pending order. `reject: true` drives UNACK ->
/// REJECTED instead of UNACK -> LIVE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptOrder {
    #[serde(default)]
    pub reject: bool,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrder {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceOrder {
    /// clOrdId of the replacement order.
    pub new_cl_ord_id: String,
    /// Amended quantity; `None` keeps the original.
    pub order_qty: Option<Decimal>,
    /// Amended limit price; `None` keeps the original.
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteOrder {
    pub exec_id: String,
    pub last_qty: Decimal,
    pub last_px: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpireOrder {}

// ---------------------------------------------------------------------------
// Events (outbound)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventKind {
    NewOrder,
    OrderAccepted,
    OrderFilled,
    OrderPartiallyFilled,
    OrderCanceled,
    OrderReplaced,
    OrderRejected,
    OrderExpired,
}

impl OrderEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventKind::NewOrder => "NEW_ORDER",
            OrderEventKind::OrderAccepted => "ORDER_ACCEPTED",
            OrderEventKind::OrderFilled => "ORDER_FILLED",
            OrderEventKind::OrderPartiallyFilled => "ORDER_PARTIALLY_FILLED",
            OrderEventKind::OrderCanceled => "ORDER_CANCELED",
            OrderEventKind::OrderReplaced => "ORDER_REPLACED",
            OrderEventKind::OrderRejected => "ORDER_REJECTED",
            OrderEventKind::OrderExpired => "ORDER_EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OmxError> {
        match s {
            "NEW_ORDER" => Ok(OrderEventKind::NewOrder),
            "ORDER_ACCEPTED" => Ok(OrderEventKind::OrderAccepted),
            "ORDER_FILLED" => Ok(OrderEventKind::OrderFilled),
            "ORDER_PARTIALLY_FILLED" => Ok(OrderEventKind::OrderPartiallyFilled),
            "ORDER_CANCELED" => Ok(OrderEventKind::OrderCanceled),
            "ORDER_REPLACED" => Ok(OrderEventKind::OrderReplaced),
            "ORDER_REJECTED" => Ok(OrderEventKind::OrderRejected),
            "ORDER_EXPIRED" => Ok(OrderEventKind::OrderExpired),
            other => Err(OmxError::data_integrity(format!(
                "invalid event kind: {other}"
            ))),
        }
    }

    /// Which topic this event family publishes to.
    pub fn topic(&self) -> &'static str {
        match self {
            OrderEventKind::OrderFilled | OrderEventKind::OrderPartiallyFilled => {
                topics::EXECUTION_EVENTS
            }
            _ => topics::ORDER_EVENTS,
        }
    }
}

/// Outbound wire envelope (§6.2): the event identity plus the full updated
/// order snapshot, so consumers never need a read-back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event-log sequence id; monotonic per store, totally ordered per
    /// order. Consumers deduplicate on this.
    pub event_id: i64,
    pub event_kind: OrderEventKind,
    pub order_id: String,
    pub session_id: String,
    pub cl_ord_id: String,
    pub correlation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order: OrderSnapshot,
    /// Present on execution-family events.
    #[serde(default)]
    pub execution: Option<ExecutionSnapshot>,
}

/// Full order state snapshot carried on every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub session_id: String,
    pub cl_ord_id: String,
    #[serde(default)]
    pub orig_cl_ord_id: Option<String>,
    #[serde(default)]
    pub parent_order_id: Option<String>,
    pub root_order_id: String,
    pub account: String,
    pub symbol: String,
    pub side: Side,
    pub ord_type: OrdType,
    pub asset_class: AssetClass,
    pub order_qty: Decimal,
    pub cum_qty: Decimal,
    pub leaves_qty: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_px: Option<Decimal>,
    pub avg_px: Decimal,
    pub state: OrderState,
    pub cancel_state: CancelState,
    pub tx_nr: i64,
}

impl From<&Order> for OrderSnapshot {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            session_id: order.session_id.clone(),
            cl_ord_id: order.cl_ord_id.clone(),
            orig_cl_ord_id: order.orig_cl_ord_id.clone(),
            parent_order_id: order.parent_order_id.clone(),
            root_order_id: order.root_order_id.clone(),
            account: order.account.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            ord_type: order.ord_type,
            asset_class: order.asset_class,
            order_qty: order.order_qty,
            cum_qty: order.cum_qty,
            leaves_qty: order.leaves_qty,
            price: order.price,
            stop_px: order.stop_px,
            avg_px: order.avg_px,
            state: order.state,
            cancel_state: order.cancel_state,
            tx_nr: order.tx_nr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub exec_id: String,
    pub order_id: String,
    pub last_qty: Decimal,
    pub last_px: Decimal,
    pub cum_qty: Decimal,
    pub avg_px: Decimal,
    pub transact_time: DateTime<Utc>,
}

impl From<&omx_domain::Execution> for ExecutionSnapshot {
    fn from(exec: &omx_domain::Execution) -> Self {
        Self {
            exec_id: exec.exec_id.clone(),
            order_id: exec.order_id.clone(),
            last_qty: exec.last_qty,
            last_px: exec.last_px,
            cum_qty: exec.cum_qty,
            avg_px: exec.avg_px,
            transact_time: exec.transact_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_envelope() -> CommandEnvelope {
        CommandEnvelope {
            kind: CommandKind::Create,
            correlation_id: Uuid::new_v4(),
            session_id: "S1".into(),
            cl_ord_id: Some("C1".into()),
            order_id: None,
            orig_cl_ord_id: None,
            deadline: None,
            payload: CommandPayload::Create(CreateOrder {
                symbol: "AAPL".into(),
                side: Side::Buy,
                ord_type: OrdType::Limit,
                asset_class: AssetClass::Equity,
                account: "ACC1".into(),
                order_qty: dec!(100),
                price: Some(dec!(150.00)),
                stop_px: None,
                place_qty: None,
                alloc_qty: None,
                currency: None,
                parent_order_id: None,
            }),
        }
    }

    #[test]
    fn command_round_trips_through_json() {
        let envelope = create_envelope();
        let json = serde_json::to_string(&envelope).unwrap();
        let back: CommandEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, CommandKind::Create);
        assert_eq!(back.session_id, "S1");
        match back.payload {
            CommandPayload::Create(create) => {
                assert_eq!(create.order_qty, dec!(100));
                assert_eq!(create.side, Side::Buy);
            }
            other => panic!("wrong payload variant: {other:?}"),
        }
    }

    #[test]
    fn require_helpers_name_the_missing_field() {
        let envelope = create_envelope();
        let err = envelope.require_order_id().unwrap_err();
        assert!(err.message.contains("orderId"));
        assert_eq!(envelope.require_cl_ord_id().unwrap(), "C1");
    }

    #[test]
    fn deadline_expiry() {
        let mut envelope = create_envelope();
        assert!(!envelope.deadline_expired(Utc::now()));
        envelope.deadline = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(envelope.deadline_expired(Utc::now()));
    }

    #[test]
    fn event_kind_text_round_trip() {
        for kind in [
            OrderEventKind::NewOrder,
            OrderEventKind::OrderAccepted,
            OrderEventKind::OrderFilled,
            OrderEventKind::OrderPartiallyFilled,
            OrderEventKind::OrderCanceled,
            OrderEventKind::OrderReplaced,
            OrderEventKind::OrderRejected,
            OrderEventKind::OrderExpired,
        ] {
            assert_eq!(OrderEventKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn fills_route_to_execution_topic() {
        assert_eq!(OrderEventKind::OrderFilled.topic(), topics::EXECUTION_EVENTS);
        assert_eq!(
            OrderEventKind::OrderPartiallyFilled.topic(),
            topics::EXECUTION_EVENTS
        );
        assert_eq!(OrderEventKind::NewOrder.topic(), topics::ORDER_EVENTS);
        assert_eq!(OrderEventKind::OrderCanceled.topic(), topics::ORDER_EVENTS);
    }

    #[test]
    fn envelope_decodes_without_optional_execution() {
        // A pre-execution-snapshot producer must still decode: additive
        // evolution only.
        let json = serde_json::json!({
            "event_id": 7,
            "event_kind": "NEW_ORDER",
            "order_id": "O-1",
            "session_id": "S1",
            "cl_ord_id": "C1",
            "correlation_id": Uuid::new_v4(),
            "occurred_at": Utc::now(),
            "order": {
                "order_id": "O-1",
                "session_id": "S1",
                "cl_ord_id": "C1",
                "root_order_id": "O-1",
                "account": "ACC1",
                "symbol": "AAPL",
                "side": "BUY",
                "ord_type": "LIMIT",
                "asset_class": "EQUITY",
                "order_qty": "100",
                "cum_qty": "0",
                "leaves_qty": "100",
                "avg_px": "0",
                "state": "NEW",
                "cancel_state": "NONE",
                "tx_nr": 0
            }
        });
        let envelope: EventEnvelope = serde_json::from_value(json).unwrap();
        assert!(envelope.execution.is_none());
        assert_eq!(envelope.order.state, OrderState::New);
    }
}
