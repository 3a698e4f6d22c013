//! Domain model: orders, executions, quotes and their lifecycles.
//!
//! Entities are immutable-by-default: every behavioral helper returns a new
//! value and leaves the receiver untouched. Quantity fields carry scale 4,
//! price fields scale 6, both rounded HALF_EVEN; see [`decimal`].
//!
//! Lifecycle rules live in [`machines`] as prebuilt
//! [`StateMachine`](omx_statemachine::StateMachine) configs; the entities
//! themselves never validate transitions; that is the pipeline's job.

pub mod decimal;
pub mod machines;

mod execution;
mod order;
mod quote;
mod types;

pub use execution::Execution;
pub use machines::{MachineSet, MachineVariant};
pub use order::{NewOrder, Order};
pub use quote::Quote;
pub use types::{AssetClass, CancelState, ExecutionState, OrdType, OrderState, QuoteState, Side};
