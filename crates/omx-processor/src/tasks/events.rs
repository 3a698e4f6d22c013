//! Event append and outbox tasks.
//!
//! AppendEvent writes the immutable log row(s) and queues a
//! [`PendingEvent`](crate::context::PendingEvent) for each; WriteOutbox
//! turns every pending event into an outbox row carrying the serialized
//! wire envelope. Both run inside the command's transaction, which is what
//! makes entity + event + outbox atomic.

use async_trait::async_trait;
use serde_json::json;

use omx_domain::{Order, OrderState};
use omx_errors::OmxError;
use omx_pipeline::{Task, TaskResult};
use omx_schemas::{
    EventEnvelope, ExecutionSnapshot, OrderEventKind, OrderSnapshot,
};
use omx_store::{NewOrderEvent, NewOutboxRow};

use crate::context::{OrderTaskContext, PendingEvent};

// ---------------------------------------------------------------------------
// AppendEventTask
// ---------------------------------------------------------------------------

/// How the event kind is chosen at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKindSpec {
    Static(OrderEventKind),
    /// ORDER_FILLED vs ORDER_PARTIALLY_FILLED by post-fill state.
    FillOutcome,
    /// ORDER_ACCEPTED vs ORDER_REJECTED by the accept verdict.
    AcceptOutcome,
    /// REPLACE: ORDER_REPLACED for the original, NEW_ORDER for the
    /// replacement.
    ReplacePair,
}

pub struct AppendEventTask {
    spec: EventKindSpec,
}

impl AppendEventTask {
    pub fn new(spec: EventKindSpec) -> Self {
        Self { spec }
    }

    fn resolve(&self, order: &Order) -> OrderEventKind {
        match self.spec {
            EventKindSpec::Static(kind) => kind,
            EventKindSpec::FillOutcome => {
                if order.state == OrderState::Filled {
                    OrderEventKind::OrderFilled
                } else {
                    OrderEventKind::OrderPartiallyFilled
                }
            }
            EventKindSpec::AcceptOutcome => {
                if order.state == OrderState::Rejected {
                    OrderEventKind::OrderRejected
                } else {
                    OrderEventKind::OrderAccepted
                }
            }
            EventKindSpec::ReplacePair => OrderEventKind::OrderReplaced,
        }
    }
}

async fn append_one(
    ctx: &mut OrderTaskContext,
    kind: OrderEventKind,
    order: &Order,
    execution: Option<ExecutionSnapshot>,
) -> Result<(), OmxError> {
    let command = serde_json::to_value(&ctx.command)
        .map_err(|e| OmxError::internal(format!("command serialization failed: {e}")))?;
    let snapshot = OrderSnapshot::from(order);
    let payload = json!({
        "command": command,
        "order": &snapshot,
        "execution": &execution,
    });

    let correlation_id = ctx.command.correlation_id;
    let exec_id = execution.as_ref().map(|e| e.exec_id.clone());
    let order_id = order.order_id.clone();

    let tx = ctx.tx_mut()?;
    let row = omx_store::events::append_order_event(
        tx,
        &NewOrderEvent {
            order_id,
            kind,
            exec_id,
            correlation_id,
            payload,
        },
    )
    .await?;

    ctx.pending_events.push(PendingEvent {
        event_id: row.id,
        kind,
        order: snapshot,
        execution,
        occurred_at: row.created_at,
    });
    Ok(())
}

#[async_trait]
impl Task<OrderTaskContext> for AppendEventTask {
    fn name(&self) -> &str {
        "AppendEvent"
    }

    fn order(&self) -> i32 {
        60
    }

    fn precondition(&self, ctx: &OrderTaskContext) -> bool {
        !ctx.replayed
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let order = match ctx.order_ref() {
            Ok(order) => order.clone(),
            Err(err) => return TaskResult::failed(err),
        };
        let kind = self.resolve(&order);
        let execution = ctx.execution.as_ref().map(ExecutionSnapshot::from);

        if let Err(err) = append_one(ctx, kind, &order, execution).await {
            return TaskResult::failed(err);
        }

        // The replacement gets its own NEW_ORDER entry in the same log.
        if self.spec == EventKindSpec::ReplacePair {
            let replacement = match ctx.replacement.clone() {
                Some(replacement) => replacement,
                None => {
                    return TaskResult::failed(OmxError::internal(
                        "no replacement in task context",
                    ))
                }
            };
            if let Err(err) =
                append_one(ctx, OrderEventKind::NewOrder, &replacement, None).await
            {
                return TaskResult::failed(err);
            }
        }

        TaskResult::success()
    }
}

// ---------------------------------------------------------------------------
// WriteOutboxTask
// ---------------------------------------------------------------------------

/// One outbox row per appended event, carrying the full wire envelope.
/// Partition key is the order id; topic comes from the event family.
pub struct WriteOutboxTask;

#[async_trait]
impl Task<OrderTaskContext> for WriteOutboxTask {
    fn name(&self) -> &str {
        "WriteOutbox"
    }

    fn order(&self) -> i32 {
        70
    }

    fn precondition(&self, ctx: &OrderTaskContext) -> bool {
        !ctx.replayed
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let pending = std::mem::take(&mut ctx.pending_events);
        if pending.is_empty() {
            return TaskResult::failed(OmxError::internal(
                "WriteOutbox ran with no appended events",
            ));
        }

        for event in &pending {
            let envelope = EventEnvelope {
                event_id: event.event_id,
                event_kind: event.kind,
                order_id: event.order.order_id.clone(),
                session_id: event.order.session_id.clone(),
                cl_ord_id: event.order.cl_ord_id.clone(),
                correlation_id,
                occurred_at: event.occurred_at,
                order: event.order.clone(),
                execution: event.execution.clone(),
            };
            let payload = match serde_json::to_value(&envelope) {
                Ok(payload) => payload,
                Err(e) => {
                    return TaskResult::failed(OmxError::internal(format!(
                        "event envelope serialization failed: {e}"
                    )))
                }
            };

            let row = NewOutboxRow {
                order_id: envelope.order_id.clone(),
                topic: event.kind.topic().to_string(),
                payload,
            };
            let tx = match ctx.tx_mut() {
                Ok(tx) => tx,
                Err(err) => return TaskResult::failed(err),
            };
            if let Err(err) = omx_store::outbox::insert_outbox(tx, &row).await {
                return TaskResult::failed(err.with_correlation_id(correlation_id));
            }
        }

        TaskResult::success_with(format!("{} outbox row(s)", pending.len()))
    }
}
