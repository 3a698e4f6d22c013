//! The command processors and their startup wiring.
//!
//! Pipelines are composed explicitly here (constructor wiring, no runtime
//! discovery), so the exact task sequence per command kind is visible in
//! one place and testable.

use std::sync::Arc;

use sqlx::PgPool;

use omx_domain::MachineSet;
use omx_errors::{ErrorKind, OmxError};
use omx_pipeline::{MetricsSink, Orchestrator, Pipeline};
use omx_schemas::{CommandEnvelope, CommandKind, OrderEventKind};
use omx_validation::ValidationLimits;

use crate::context::OrderTaskContext;
use crate::result::{ProcessingResult, ProcessingStatus, TxInfo};
use crate::retry::{BackoffSchedule, RetryPolicy};
use crate::tasks::{
    AppendEventTask, ApplyExecutionTask, AssignOrderIdTask, CreateReplacementTask, EventKindSpec,
    LoadOrderTask, PersistMode, PersistOrderAndExecutionTask, PersistOrderTask,
    PersistReplacementTask, StateTransitionTask, TransitionGoal, ValidateCancelAllowedTask,
    ValidateCommandTask, ValidateExecutionTask, ValidateOrderTask, ValidateReplaceAllowedTask,
    WriteOutboxTask,
};

// ---------------------------------------------------------------------------
// CommandProcessor
// ---------------------------------------------------------------------------

/// One command kind, one statically composed pipeline, one transaction per
/// invocation.
pub struct CommandProcessor {
    kind: CommandKind,
    pool: PgPool,
    pipeline: Pipeline<OrderTaskContext>,
    orchestrator: Orchestrator,
    retry: RetryPolicy,
}

impl CommandProcessor {
    /// Process one command end-to-end: open a transaction, run the
    /// pipeline, commit on success, roll back on any FAILED task.
    ///
    /// Conflict failures retry up to the policy's budget with jittered
    /// backoff; every other failure kind is deterministic and surfaces
    /// immediately.
    pub async fn process(&self, cmd: CommandEnvelope) -> ProcessingResult {
        let correlation_id = cmd.correlation_id;

        if cmd.kind != self.kind {
            return ProcessingResult::failed(
                correlation_id,
                OmxError::internal(format!(
                    "processor for {} received {}",
                    self.kind.as_str(),
                    cmd.kind.as_str()
                )),
            );
        }

        // Idempotent replay probe: a CREATE whose natural key already
        // exists returns the existing order and writes nothing.
        if self.kind == CommandKind::Create {
            match self.probe_replay(&cmd).await {
                Ok(Some(result)) => return result,
                Ok(None) => {}
                Err(err) => return ProcessingResult::failed(correlation_id, err),
            }
        }

        let mut schedule = BackoffSchedule::new(&self.retry);
        loop {
            match self.attempt(&cmd).await {
                Ok(result) => return result,
                Err(err) if err.kind() == ErrorKind::Conflict => match schedule.next_backoff() {
                    Some(delay) => {
                        tracing::warn!(
                            command = cmd.kind.as_str(),
                            %correlation_id,
                            attempt = schedule.attempts_made(),
                            delay_ms = delay.as_millis() as u64,
                            "optimistic-lock conflict; retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return ProcessingResult::failed(correlation_id, err),
                },
                // CREATE race: a concurrent writer won the unique index.
                // Re-probe and hand back the winner as a replay.
                Err(err)
                    if err.kind() == ErrorKind::Duplicate && self.kind == CommandKind::Create =>
                {
                    return match self.probe_replay(&cmd).await {
                        Ok(Some(result)) => result,
                        Ok(None) => ProcessingResult::failed(correlation_id, err),
                        Err(probe_err) => ProcessingResult::failed(correlation_id, probe_err),
                    };
                }
                Err(err) => return ProcessingResult::failed(correlation_id, err),
            }
        }
    }

    async fn probe_replay(
        &self,
        cmd: &CommandEnvelope,
    ) -> Result<Option<ProcessingResult>, OmxError> {
        let cl_ord_id = match cmd.cl_ord_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            // Shape errors are the pipeline's to report.
            _ => return Ok(None),
        };
        let existing = omx_store::orders::find_by_session_and_cl_ord_id(
            &self.pool,
            &cmd.session_id,
            cl_ord_id,
        )
        .await?;

        Ok(existing.map(|order| {
            tracing::info!(
                order_id = %order.order_id,
                session_id = %order.session_id,
                cl_ord_id = %order.cl_ord_id,
                correlation_id = %cmd.correlation_id,
                "duplicate create replayed"
            );
            ProcessingResult::replayed(cmd.correlation_id, TxInfo::from(&order))
        }))
    }

    /// One transactional attempt.
    async fn attempt(&self, cmd: &CommandEnvelope) -> Result<ProcessingResult, OmxError> {
        let correlation_id = cmd.correlation_id;
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transaction begin failed");
                OmxError::internal("transaction begin failed")
            })?;

        let mut ctx = OrderTaskContext::new(cmd.clone(), tx);
        let result = self.orchestrator.execute(&self.pipeline, &mut ctx).await;
        let tx = ctx.take_tx();

        if result.success {
            if let Some(tx) = tx {
                tx.commit().await.map_err(|e| {
                    tracing::error!(error = %e, "transaction commit failed");
                    OmxError::internal("transaction commit failed")
                })?;
            }

            // REPLACE answers with the replacement's identity.
            let subject = ctx.replacement.as_ref().or(ctx.order.as_ref());
            let tx_info = subject
                .map(TxInfo::from)
                .ok_or_else(|| OmxError::internal("pipeline succeeded without an order"))?;

            Ok(if ctx.replayed {
                ProcessingResult::replayed(correlation_id, tx_info)
            } else {
                ProcessingResult::ok(correlation_id, tx_info)
            })
        } else {
            // Any FAILED task rolls the whole transaction back; the entity,
            // event log and outbox stay untouched.
            if let Some(tx) = tx {
                if let Err(e) = tx.rollback().await {
                    tracing::error!(error = %e, "transaction rollback failed");
                }
            }
            Err(result
                .first_error()
                .cloned()
                .unwrap_or_else(|| OmxError::internal("pipeline failed without an error")))
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn pipeline_name(&self) -> &str {
        self.pipeline.name()
    }
}

// ---------------------------------------------------------------------------
// ProcessorSet
// ---------------------------------------------------------------------------

/// All processors, built once at startup with their pipelines.
pub struct ProcessorSet {
    pub create: CommandProcessor,
    pub accept: CommandProcessor,
    pub cancel: CommandProcessor,
    pub replace: CommandProcessor,
    pub execute: CommandProcessor,
    pub expire: CommandProcessor,
}

impl ProcessorSet {
    pub fn new(
        pool: PgPool,
        machines: Arc<MachineSet>,
        limits: ValidationLimits,
        metrics: Arc<dyn MetricsSink>,
        retry: RetryPolicy,
    ) -> Self {
        let processor = |kind: CommandKind, pipeline: Pipeline<OrderTaskContext>| CommandProcessor {
            kind,
            pool: pool.clone(),
            pipeline,
            orchestrator: Orchestrator::new(Arc::clone(&metrics)),
            retry: retry.clone(),
        };

        let create = processor(
            CommandKind::Create,
            Pipeline::new("create-order")
                .add_task(ValidateCommandTask)
                .add_task(ValidateOrderTask::new(&limits))
                .add_task(AssignOrderIdTask)
                .add_task(StateTransitionTask::new(
                    Arc::clone(&machines),
                    TransitionGoal::CreateEntry,
                ))
                .add_task(PersistOrderTask::new(PersistMode::Insert))
                .add_task(AppendEventTask::new(EventKindSpec::Static(
                    OrderEventKind::NewOrder,
                )))
                .add_task(WriteOutboxTask),
        );

        let accept = processor(
            CommandKind::Accept,
            Pipeline::new("accept-order")
                .add_task(ValidateCommandTask)
                .add_task(LoadOrderTask)
                .add_task(StateTransitionTask::new(
                    Arc::clone(&machines),
                    TransitionGoal::Accept,
                ))
                .add_task(PersistOrderTask::new(PersistMode::Update))
                .add_task(AppendEventTask::new(EventKindSpec::AcceptOutcome))
                .add_task(WriteOutboxTask),
        );

        let cancel = processor(
            CommandKind::Cancel,
            Pipeline::new("cancel-order")
                .add_task(ValidateCommandTask)
                .add_task(LoadOrderTask)
                .add_task(ValidateCancelAllowedTask::new(Arc::clone(&machines)))
                .add_task(StateTransitionTask::new(
                    Arc::clone(&machines),
                    TransitionGoal::Cancel,
                ))
                .add_task(PersistOrderTask::new(PersistMode::Update))
                .add_task(AppendEventTask::new(EventKindSpec::Static(
                    OrderEventKind::OrderCanceled,
                )))
                .add_task(WriteOutboxTask),
        );

        let replace = processor(
            CommandKind::Replace,
            Pipeline::new("replace-order")
                .add_task(ValidateCommandTask)
                .add_task(LoadOrderTask)
                .add_task(ValidateReplaceAllowedTask::new(Arc::clone(&machines)))
                .add_task(CreateReplacementTask::new(&limits))
                .add_task(StateTransitionTask::new(
                    Arc::clone(&machines),
                    TransitionGoal::ReplaceOrig,
                ))
                .add_task(PersistReplacementTask)
                .add_task(AppendEventTask::new(EventKindSpec::ReplacePair))
                .add_task(WriteOutboxTask),
        );

        let execute = processor(
            CommandKind::Execute,
            Pipeline::new("apply-execution")
                .add_task(ValidateCommandTask)
                .add_task(LoadOrderTask)
                .add_task(ValidateExecutionTask::new())
                .add_task(ApplyExecutionTask::new(Arc::clone(&machines)))
                .add_task(PersistOrderAndExecutionTask)
                .add_task(AppendEventTask::new(EventKindSpec::FillOutcome))
                .add_task(WriteOutboxTask),
        );

        let expire = processor(
            CommandKind::Expire,
            Pipeline::new("expire-order")
                .add_task(ValidateCommandTask)
                .add_task(LoadOrderTask)
                .add_task(StateTransitionTask::new(
                    Arc::clone(&machines),
                    TransitionGoal::Expire,
                ))
                .add_task(PersistOrderTask::new(PersistMode::Update))
                .add_task(AppendEventTask::new(EventKindSpec::Static(
                    OrderEventKind::OrderExpired,
                )))
                .add_task(WriteOutboxTask),
        );

        Self {
            create,
            accept,
            cancel,
            replace,
            execute,
            expire,
        }
    }

    /// Route a command to its processor.
    pub async fn dispatch(&self, cmd: CommandEnvelope) -> ProcessingResult {
        let processor = match cmd.kind {
            CommandKind::Create => &self.create,
            CommandKind::Accept => &self.accept,
            CommandKind::Cancel => &self.cancel,
            CommandKind::Replace => &self.replace,
            CommandKind::Execute => &self.execute,
            CommandKind::Expire => &self.expire,
        };
        let result = processor.process(cmd).await;
        if result.status == ProcessingStatus::Failed {
            tracing::warn!(
                correlation_id = %result.correlation_id,
                error = %result.message,
                "command failed"
            );
        }
        result
    }
}
