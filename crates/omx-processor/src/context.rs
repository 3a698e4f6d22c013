//! The per-invocation task context.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use omx_domain::{Execution, Order};
use omx_errors::OmxError;
use omx_pipeline::PipelineContext;
use omx_schemas::{CommandEnvelope, ExecutionSnapshot, OrderEventKind, OrderSnapshot};
use omx_store::PgTx;

/// An event appended by the pipeline, waiting for its outbox row.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event_id: i64,
    pub kind: OrderEventKind,
    pub order: OrderSnapshot,
    pub execution: Option<ExecutionSnapshot>,
    pub occurred_at: DateTime<Utc>,
}

/// Mutable carrier passed through one pipeline execution. Never shared
/// across executions; the processor builds a fresh one per attempt.
pub struct OrderTaskContext {
    pub command: CommandEnvelope,
    /// The open transaction all store writes go through. Taken back by the
    /// processor for commit/rollback.
    tx: Option<PgTx>,
    /// The entity under mutation.
    pub order: Option<Order>,
    /// The row as loaded, before mutation; its `tx_nr` is the optimistic
    /// version the update must match.
    pub original: Option<Order>,
    /// REPLACE only: the replacement order.
    pub replacement: Option<Order>,
    /// EXECUTE only: the execution being applied.
    pub execution: Option<Execution>,
    /// Events appended so far, awaiting outbox rows.
    pub pending_events: Vec<PendingEvent>,
    /// Accumulated validation errors.
    pub errors: Vec<OmxError>,
    /// True when the command was recognized as an idempotent replay;
    /// mutation tasks skip themselves.
    pub replayed: bool,
    /// Generic inter-task attributes.
    pub attributes: HashMap<String, Value>,
}

impl OrderTaskContext {
    pub fn new(command: CommandEnvelope, tx: PgTx) -> Self {
        Self {
            command,
            tx: Some(tx),
            order: None,
            original: None,
            replacement: None,
            execution: None,
            pending_events: Vec::new(),
            errors: Vec::new(),
            replayed: false,
            attributes: HashMap::new(),
        }
    }

    /// The open transaction, or Internal if it was already taken.
    pub fn tx_mut(&mut self) -> Result<&mut PgTx, OmxError> {
        self.tx
            .as_mut()
            .ok_or_else(|| OmxError::internal("task context has no open transaction"))
    }

    /// Hand the transaction back to the processor for commit/rollback.
    pub fn take_tx(&mut self) -> Option<PgTx> {
        self.tx.take()
    }

    /// The entity under mutation, or Internal if an earlier task was
    /// supposed to load/build it and did not run.
    pub fn order_ref(&self) -> Result<&Order, OmxError> {
        self.order
            .as_ref()
            .ok_or_else(|| OmxError::internal("no order in task context"))
    }

    /// The `tx_nr` the persistence task must match.
    pub fn expected_tx_nr(&self) -> Result<i64, OmxError> {
        Ok(self
            .original
            .as_ref()
            .ok_or_else(|| OmxError::internal("no original order in task context"))?
            .tx_nr)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

impl PipelineContext for OrderTaskContext {
    fn correlation_id(&self) -> Uuid {
        self.command.correlation_id
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        self.command.deadline
    }
}
