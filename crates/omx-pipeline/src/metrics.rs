//! Pluggable metrics sink.
//!
//! The core reports timings through this trait; wiring to a real metrics
//! backend is the deployment's concern. [`TracingMetrics`] is the default:
//! structured log lines an operator can aggregate.

use std::time::Duration;

use crate::task::TaskStatus;

pub trait MetricsSink: Send + Sync {
    fn record_task(&self, pipeline: &str, task: &str, status: TaskStatus, duration: Duration);

    fn record_pipeline(&self, pipeline: &str, success: bool, duration: Duration);

    fn record_counter(&self, name: &str, value: u64);
}

/// Discards everything.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_task(&self, _: &str, _: &str, _: TaskStatus, _: Duration) {}
    fn record_pipeline(&self, _: &str, _: bool, _: Duration) {}
    fn record_counter(&self, _: &str, _: u64) {}
}

/// Emits structured `tracing` events.
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_task(&self, pipeline: &str, task: &str, status: TaskStatus, duration: Duration) {
        tracing::debug!(
            pipeline,
            task,
            status = status.as_str(),
            duration_ms = duration.as_millis() as u64,
            "task executed"
        );
    }

    fn record_pipeline(&self, pipeline: &str, success: bool, duration: Duration) {
        tracing::info!(
            pipeline,
            success,
            duration_ms = duration.as_millis() as u64,
            "pipeline executed"
        );
    }

    fn record_counter(&self, name: &str, value: u64) {
        tracing::debug!(counter = name, value, "counter");
    }
}
