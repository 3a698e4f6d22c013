//! Command processors.
//!
//! One processor per command kind, each holding a pipeline composed once at
//! startup. The processor is the ONLY layer that manages transaction
//! lifecycle: it opens the transaction, hands it to the task context, and
//! commits on pipeline success or rolls back on any FAILED task result.
//!
//! Deterministic failures (Validation, InvalidStateTransition, NotFound,
//! Duplicate, DataIntegrity) surface immediately. Optimistic-lock
//! Conflicts are retried a bounded number of times with jittered
//! exponential backoff, then surfaced.

mod context;
mod processor;
mod result;
mod retry;
pub mod tasks;

pub use context::{OrderTaskContext, PendingEvent};
pub use processor::{CommandProcessor, ProcessorSet};
pub use result::{ProcessingResult, ProcessingStatus, TxInfo};
pub use retry::{BackoffSchedule, RetryPolicy};
