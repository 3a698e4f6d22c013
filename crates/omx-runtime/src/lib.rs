//! Runtime wiring: the command worker pool and publisher fleet.
//!
//! Scheduling model (one command, one worker, end-to-end):
//!
//! ```text
//! transport ──► CommandGateway::submit ──► mpsc ──► worker 1..N
//!                                                    └── ProcessorSet::dispatch
//!                                                          └── one transaction
//! order_outbox ──► OutboxPublisher 1..M ──► BusProducer
//! ```
//!
//! Workers share one queue (mutex-held receiver); a command never runs on
//! two workers. Shutdown is cooperative: the watch flag flips, workers
//! finish their in-flight command, publishers finish their round.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use omx_config::OmxConfig;
use omx_domain::{MachineSet, MachineVariant};
use omx_errors::OmxError;
use omx_pipeline::TracingMetrics;
use omx_processor::{ProcessingResult, ProcessorSet, RetryPolicy};
use omx_publisher::{BusProducer, OutboxPublisher, PublisherConfig};
use omx_schemas::CommandEnvelope;
use omx_validation::ValidationLimits;

mod log_bus;

pub use log_bus::LogBus;

// ---------------------------------------------------------------------------
// Command intake
// ---------------------------------------------------------------------------

struct CommandSubmission {
    envelope: CommandEnvelope,
    reply: oneshot::Sender<ProcessingResult>,
}

/// The transport-facing handle: submit a command, await its result.
/// Cloneable; transports are expected to hold one each.
#[derive(Clone)]
pub struct CommandGateway {
    tx: mpsc::Sender<CommandSubmission>,
    default_deadline_ms: u64,
}

impl CommandGateway {
    pub async fn submit(&self, mut envelope: CommandEnvelope) -> Result<ProcessingResult, OmxError> {
        // Fallback deadline: transports that propagate none get the
        // configured budget.
        if envelope.deadline.is_none() && self.default_deadline_ms > 0 {
            envelope.deadline =
                Some(Utc::now() + chrono::Duration::milliseconds(self.default_deadline_ms as i64));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CommandSubmission {
                envelope,
                reply: reply_tx,
            })
            .await
            .map_err(|_| OmxError::internal("command workers are shut down"))?;

        reply_rx
            .await
            .map_err(|_| OmxError::internal("command worker dropped the reply"))
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub struct OmxRuntime {
    pub gateway: CommandGateway,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Build the machines, processors, workers and publishers from config and
/// start everything.
pub async fn start<B: BusProducer + 'static>(
    cfg: &OmxConfig,
    pool: sqlx::PgPool,
    bus: Arc<B>,
) -> Result<OmxRuntime> {
    let variant = MachineVariant::parse(&cfg.state_machine.variant)
        .map_err(|e| anyhow::anyhow!(e))
        .context("state_machine.variant")?;
    let machines = Arc::new(MachineSet::new(variant));

    let limits = ValidationLimits {
        max_order_qty: cfg.validation.max_order_qty,
        equity_round_lot: cfg.validation.equity_round_lot,
        fx_min_notional: cfg.validation.fx_min_notional,
    };

    let retry = RetryPolicy {
        max_attempts: cfg.retry.max_attempts,
        initial_backoff: std::time::Duration::from_millis(cfg.retry.initial_backoff_ms),
        max_backoff: std::time::Duration::from_millis(cfg.retry.max_backoff_ms),
        ..RetryPolicy::default()
    };

    let processors = Arc::new(ProcessorSet::new(
        pool.clone(),
        machines,
        limits,
        Arc::new(TracingMetrics),
        retry,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (cmd_tx, cmd_rx) = mpsc::channel::<CommandSubmission>(cfg.worker.count * 16);
    let cmd_rx = Arc::new(Mutex::new(cmd_rx));

    let mut handles = Vec::new();

    for worker_nr in 0..cfg.worker.count {
        let processors = Arc::clone(&processors);
        let cmd_rx = Arc::clone(&cmd_rx);
        let mut shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            tracing::debug!(worker_nr, "command worker started");
            loop {
                let submission = {
                    let mut rx = cmd_rx.lock().await;
                    tokio::select! {
                        submission = rx.recv() => submission,
                        _ = shutdown.changed() => None,
                    }
                };
                let Some(submission) = submission else {
                    break;
                };

                let result = processors.dispatch(submission.envelope).await;
                // A gone transport is not an error for the worker.
                let _ = submission.reply.send(result);
            }
            tracing::debug!(worker_nr, "command worker stopped");
        }));
    }

    let publisher_cfg = PublisherConfig {
        batch_size: cfg.outbox.batch_size,
        poll_interval: cfg.outbox.poll_interval(),
        backoff_initial: cfg.outbox.backoff_initial(),
        backoff_max: cfg.outbox.backoff_max(),
        ack_timeout: cfg.outbox.ack_timeout(),
        quarantine_after: cfg.outbox.quarantine_after,
    };

    for publisher_nr in 0..cfg.outbox.publisher_count {
        let publisher = OutboxPublisher::new(
            pool.clone(),
            Arc::clone(&bus),
            publisher_cfg.clone(),
            format!("publisher-{publisher_nr}"),
        );
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            publisher.run(shutdown).await;
        }));
    }

    // Backlog gauge: a growing outbox means the bus is slower than the
    // write path and operators need to know before it matters.
    {
        let pool = pool.clone();
        let mut shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {}
                    _ = shutdown.changed() => break,
                }
                match omx_store::outbox::backlog(&pool).await {
                    Ok(backlog) if backlog > 0 => {
                        tracing::info!(backlog, "outbox backlog");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "outbox backlog probe failed"),
                }
            }
        }));
    }

    tracing::info!(
        workers = cfg.worker.count,
        publishers = cfg.outbox.publisher_count,
        variant = %cfg.state_machine.variant,
        "omx runtime started"
    );

    Ok(OmxRuntime {
        gateway: CommandGateway {
            tx: cmd_tx,
            default_deadline_ms: cfg.deadline.default_ms,
        },
        shutdown_tx,
        handles,
    })
}

impl OmxRuntime {
    /// Cooperative shutdown: flag every worker, then wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        drop(self.gateway);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("omx runtime stopped");
    }
}
