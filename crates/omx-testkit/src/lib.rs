//! Test helpers: an in-memory recording bus with failure injection,
//! command builders, and processor wiring with test defaults.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use omx_domain::{AssetClass, MachineSet, MachineVariant, OrdType, Side};
use omx_pipeline::NoopMetrics;
use omx_processor::{ProcessorSet, RetryPolicy};
use omx_publisher::{BusError, BusProducer};
use omx_schemas::{
    AcceptOrder, CancelOrder, CommandEnvelope, CommandKind, CommandPayload, CreateOrder,
    EventEnvelope, ExecuteOrder, ExpireOrder, ReplaceOrder,
};
use omx_validation::ValidationLimits;

// ---------------------------------------------------------------------------
// RecordingBus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub envelope: EventEnvelope,
}

/// In-memory [`BusProducer`] capturing everything it acknowledges, with
/// optional failure injection (`fail_next`) for outage scenarios.
#[derive(Default)]
pub struct RecordingBus {
    messages: Mutex<Vec<PublishedMessage>>,
    fail_remaining: AtomicU32,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publish calls fail as transient outages.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().expect("bus mutex").clone()
    }

    /// Event ids acknowledged for one partition key, in publish order.
    pub fn event_ids_for_key(&self, key: &str) -> Vec<i64> {
        self.messages()
            .into_iter()
            .filter(|m| m.key == key)
            .map(|m| m.envelope.event_id)
            .collect()
    }
}

#[async_trait]
impl BusProducer for RecordingBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BusError::Unavailable("injected outage".to_string()));
        }

        let envelope: EventEnvelope = serde_json::from_slice(payload)
            .map_err(|e| BusError::Rejected(format!("undecodable envelope: {e}")))?;
        self.messages.lock().expect("bus mutex").push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            envelope,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

/// Processors with the standard machine, default limits and a tight retry
/// schedule, suitable for scenario tests.
pub fn test_processors(pool: sqlx::PgPool) -> ProcessorSet {
    ProcessorSet::new(
        pool,
        Arc::new(MachineSet::new(MachineVariant::Standard)),
        ValidationLimits::default(),
        Arc::new(NoopMetrics),
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: std::time::Duration::from_millis(5),
            max_backoff: std::time::Duration::from_millis(50),
            ..RetryPolicy::default()
        },
    )
}

pub fn unique_session() -> String {
    format!("S-{}", Uuid::new_v4())
}

// ---------------------------------------------------------------------------
// Command builders
// ---------------------------------------------------------------------------

fn envelope(kind: CommandKind, session_id: &str, payload: CommandPayload) -> CommandEnvelope {
    CommandEnvelope {
        kind,
        correlation_id: Uuid::new_v4(),
        session_id: session_id.to_string(),
        cl_ord_id: None,
        order_id: None,
        orig_cl_ord_id: None,
        deadline: None,
        payload,
    }
}

/// A limit-order CREATE for an equity symbol.
pub fn create_cmd(
    session_id: &str,
    cl_ord_id: &str,
    symbol: &str,
    qty: Decimal,
    price: Decimal,
) -> CommandEnvelope {
    let mut cmd = envelope(
        CommandKind::Create,
        session_id,
        CommandPayload::Create(CreateOrder {
            symbol: symbol.to_string(),
            side: Side::Buy,
            ord_type: OrdType::Limit,
            asset_class: AssetClass::Equity,
            account: "ACC-TEST".to_string(),
            order_qty: qty,
            price: Some(price),
            stop_px: None,
            place_qty: None,
            alloc_qty: None,
            currency: Some("USD".to_string()),
            parent_order_id: None,
        }),
    );
    cmd.cl_ord_id = Some(cl_ord_id.to_string());
    cmd
}

pub fn accept_cmd(session_id: &str, order_id: &str) -> CommandEnvelope {
    let mut cmd = envelope(
        CommandKind::Accept,
        session_id,
        CommandPayload::Accept(AcceptOrder {
            reject: false,
            reject_reason: None,
        }),
    );
    cmd.order_id = Some(order_id.to_string());
    cmd
}

pub fn reject_cmd(session_id: &str, order_id: &str, reason: &str) -> CommandEnvelope {
    let mut cmd = envelope(
        CommandKind::Accept,
        session_id,
        CommandPayload::Accept(AcceptOrder {
            reject: true,
            reject_reason: Some(reason.to_string()),
        }),
    );
    cmd.order_id = Some(order_id.to_string());
    cmd
}

pub fn cancel_cmd(session_id: &str, order_id: &str, orig_cl_ord_id: &str) -> CommandEnvelope {
    let mut cmd = envelope(
        CommandKind::Cancel,
        session_id,
        CommandPayload::Cancel(CancelOrder {}),
    );
    cmd.order_id = Some(order_id.to_string());
    cmd.orig_cl_ord_id = Some(orig_cl_ord_id.to_string());
    cmd
}

pub fn replace_cmd(
    session_id: &str,
    order_id: &str,
    orig_cl_ord_id: &str,
    new_cl_ord_id: &str,
    qty: Option<Decimal>,
    price: Option<Decimal>,
) -> CommandEnvelope {
    let mut cmd = envelope(
        CommandKind::Replace,
        session_id,
        CommandPayload::Replace(ReplaceOrder {
            new_cl_ord_id: new_cl_ord_id.to_string(),
            order_qty: qty,
            price,
        }),
    );
    cmd.order_id = Some(order_id.to_string());
    cmd.orig_cl_ord_id = Some(orig_cl_ord_id.to_string());
    cmd
}

pub fn execute_cmd(
    session_id: &str,
    order_id: &str,
    exec_id: &str,
    last_qty: Decimal,
    last_px: Decimal,
) -> CommandEnvelope {
    let mut cmd = envelope(
        CommandKind::Execute,
        session_id,
        CommandPayload::Execute(ExecuteOrder {
            exec_id: exec_id.to_string(),
            last_qty,
            last_px,
        }),
    );
    cmd.order_id = Some(order_id.to_string());
    cmd
}

pub fn expire_cmd(session_id: &str, order_id: &str) -> CommandEnvelope {
    let mut cmd = envelope(
        CommandKind::Expire,
        session_id,
        CommandPayload::Expire(ExpireOrder {}),
    );
    cmd.order_id = Some(order_id.to_string());
    cmd
}
