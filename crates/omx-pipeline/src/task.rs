//! The task contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use omx_errors::OmxError;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskStatus / TaskResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Success,
    Skipped,
    Failed,
    Warning,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Skipped => "SKIPPED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Warning => "WARNING",
        }
    }
}

/// Outcome of one task invocation.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub message: String,
    /// The typed failure when `status == Failed`.
    pub error: Option<OmxError>,
    /// Non-fatal observations collected during the task.
    pub warnings: Vec<String>,
}

impl TaskResult {
    pub fn success() -> Self {
        Self {
            status: TaskStatus::Success,
            message: String::new(),
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::success()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Skipped,
            message: reason.into(),
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(error: OmxError) -> Self {
        Self {
            status: TaskStatus::Failed,
            message: error.to_string(),
            error: Some(error),
            warnings: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            status: TaskStatus::Warning,
            message: message.into(),
            error: None,
            warnings,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

// ---------------------------------------------------------------------------
// PipelineContext
// ---------------------------------------------------------------------------

/// What the orchestrator needs from a context: identity for logging and an
/// optional deadline checked at task boundaries.
pub trait PipelineContext: Send {
    fn correlation_id(&self) -> Uuid;

    fn deadline(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn deadline_expired(&self) -> bool {
        self.deadline().map(|d| Utc::now() >= d).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One validation/mutation step.
///
/// Tasks are constructed at startup and shared; all per-invocation state
/// lives in the context. `execute` runs on the caller's worker, inside the
/// caller's transaction.
#[async_trait]
pub trait Task<Ctx: Send>: Send + Sync {
    fn name(&self) -> &str;

    /// Ordering key; lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Conditional tasks return `false` to be recorded as SKIPPED.
    fn precondition(&self, _ctx: &Ctx) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut Ctx) -> TaskResult;
}
