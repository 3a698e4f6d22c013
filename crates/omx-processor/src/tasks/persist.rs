//! Persistence tasks. All writes go through the context's transaction;
//! nothing here commits; that is the processor's decision.

use async_trait::async_trait;

use omx_errors::OmxError;
use omx_pipeline::{Task, TaskResult};
use omx_store::ExecutionInsert;

use crate::context::OrderTaskContext;

// ---------------------------------------------------------------------------
// PersistOrderTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    /// CREATE: fresh row.
    Insert,
    /// Everything else: version-checked update against `original.tx_nr`.
    Update,
}

pub struct PersistOrderTask {
    mode: PersistMode,
}

impl PersistOrderTask {
    pub fn new(mode: PersistMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl Task<OrderTaskContext> for PersistOrderTask {
    fn name(&self) -> &str {
        "PersistOrder"
    }

    fn order(&self) -> i32 {
        50
    }

    fn precondition(&self, ctx: &OrderTaskContext) -> bool {
        !ctx.replayed
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let order = match ctx.order_ref() {
            Ok(order) => order.clone(),
            Err(err) => return TaskResult::failed(err),
        };

        let persisted = match self.mode {
            PersistMode::Insert => {
                let tx = match ctx.tx_mut() {
                    Ok(tx) => tx,
                    Err(err) => return TaskResult::failed(err),
                };
                omx_store::orders::insert_order(tx, &order).await
            }
            PersistMode::Update => {
                let expected = match ctx.expected_tx_nr() {
                    Ok(expected) => expected,
                    Err(err) => return TaskResult::failed(err),
                };
                let tx = match ctx.tx_mut() {
                    Ok(tx) => tx,
                    Err(err) => return TaskResult::failed(err),
                };
                omx_store::orders::update_order(tx, &order, expected).await
            }
        };

        match persisted {
            Ok(persisted) => {
                ctx.order = Some(persisted);
                TaskResult::success()
            }
            Err(err) => TaskResult::failed(err.with_correlation_id(correlation_id)),
        }
    }
}

// ---------------------------------------------------------------------------
// PersistReplacementTask
// ---------------------------------------------------------------------------

/// REPLACE persists both sides: the canceled original (version-checked) and
/// the fresh replacement row, in that order, in one transaction.
pub struct PersistReplacementTask;

#[async_trait]
impl Task<OrderTaskContext> for PersistReplacementTask {
    fn name(&self) -> &str {
        "PersistBoth"
    }

    fn order(&self) -> i32 {
        50
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let orig = match ctx.order_ref() {
            Ok(order) => order.clone(),
            Err(err) => return TaskResult::failed(err),
        };
        let replacement = match ctx.replacement.clone() {
            Some(replacement) => replacement,
            None => return TaskResult::failed(OmxError::internal("no replacement in task context")),
        };
        let expected = match ctx.expected_tx_nr() {
            Ok(expected) => expected,
            Err(err) => return TaskResult::failed(err),
        };

        let tx = match ctx.tx_mut() {
            Ok(tx) => tx,
            Err(err) => return TaskResult::failed(err),
        };

        let orig = match omx_store::orders::update_order(tx, &orig, expected).await {
            Ok(orig) => orig,
            Err(err) => return TaskResult::failed(err.with_correlation_id(correlation_id)),
        };
        let replacement = match omx_store::orders::insert_order(tx, &replacement).await {
            Ok(replacement) => replacement,
            Err(err) => return TaskResult::failed(err.with_correlation_id(correlation_id)),
        };

        ctx.order = Some(orig);
        ctx.replacement = Some(replacement);
        TaskResult::success()
    }
}

// ---------------------------------------------------------------------------
// PersistOrderAndExecutionTask
// ---------------------------------------------------------------------------

/// FILL persists the post-fill order (version-checked) and the execution
/// row. The exec_id probe ran earlier in this same transaction, so an
/// AlreadyApplied outcome here means the log and the entity disagree.
pub struct PersistOrderAndExecutionTask;

#[async_trait]
impl Task<OrderTaskContext> for PersistOrderAndExecutionTask {
    fn name(&self) -> &str {
        "PersistOrderAndExecution"
    }

    fn order(&self) -> i32 {
        50
    }

    fn precondition(&self, ctx: &OrderTaskContext) -> bool {
        !ctx.replayed
    }

    async fn execute(&self, ctx: &mut OrderTaskContext) -> TaskResult {
        let correlation_id = ctx.command.correlation_id;
        let order = match ctx.order_ref() {
            Ok(order) => order.clone(),
            Err(err) => return TaskResult::failed(err),
        };
        let execution = match ctx.execution.clone() {
            Some(execution) => execution,
            None => return TaskResult::failed(OmxError::internal("no execution in task context")),
        };
        let expected = match ctx.expected_tx_nr() {
            Ok(expected) => expected,
            Err(err) => return TaskResult::failed(err),
        };

        let tx = match ctx.tx_mut() {
            Ok(tx) => tx,
            Err(err) => return TaskResult::failed(err),
        };

        let persisted = match omx_store::orders::update_order(tx, &order, expected).await {
            Ok(persisted) => persisted,
            Err(err) => return TaskResult::failed(err.with_correlation_id(correlation_id)),
        };

        match omx_store::executions::insert_execution(tx, &execution).await {
            Ok(ExecutionInsert::Inserted) => {}
            Ok(ExecutionInsert::AlreadyApplied) => {
                return TaskResult::failed(
                    OmxError::data_integrity(format!(
                        "execID {} reappeared mid-transaction",
                        execution.exec_id
                    ))
                    .with_correlation_id(correlation_id),
                )
            }
            Err(err) => return TaskResult::failed(err.with_correlation_id(correlation_id)),
        }

        ctx.order = Some(persisted);
        TaskResult::success()
    }
}
