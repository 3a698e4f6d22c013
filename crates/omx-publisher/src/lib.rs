//! Outbox publisher: drains `order_outbox` to the message bus.
//!
//! Delivery is at-least-once. Rows are claimed in ascending id order under
//! `SKIP LOCKED`, published one at a time keyed by `order_id`, and deleted
//! only after the bus acknowledges. A failed row stops the batch at that
//! point (the already-published prefix is deleted, so per-order order
//! holds), the claim is released, and the worker backs off. Nothing is
//! ever dropped: transient failures retry indefinitely, poisoned rows move
//! to quarantine after the configured attempt budget.

mod bus;
mod publisher;

pub use bus::{BusError, BusProducer};
pub use publisher::{OutboxPublisher, PublisherConfig};
