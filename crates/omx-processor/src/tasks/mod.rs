//! Task implementations.
//!
//! Every task is a small struct constructed once at startup (explicit
//! registration, no runtime discovery) and shared across invocations; all
//! per-command state lives in the [`OrderTaskContext`].
//!
//! Order keys: validate 10, load/build 20, command-specific guards 30,
//! derive 35, transition/apply 40, persist 50, append event 60, outbox 70.

mod events;
mod mutate;
mod persist;
mod transition;
mod validate;

pub use events::{AppendEventTask, EventKindSpec, WriteOutboxTask};
pub use mutate::{ApplyExecutionTask, AssignOrderIdTask, CreateReplacementTask};
pub use persist::{PersistMode, PersistOrderAndExecutionTask, PersistOrderTask, PersistReplacementTask};
pub use transition::{StateTransitionTask, TransitionGoal};
pub use validate::{
    LoadOrderTask, ValidateCancelAllowedTask, ValidateCommandTask, ValidateExecutionTask,
    ValidateOrderTask, ValidateReplaceAllowedTask,
};
