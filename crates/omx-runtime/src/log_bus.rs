//! Default producer for the reference binary.
//!
//! Deployments wire a real broker producer into [`start`](crate::start);
//! the reference harness emits every event as a structured log line so the
//! whole write path can run without broker infrastructure.

use async_trait::async_trait;

use omx_publisher::{BusError, BusProducer};

pub struct LogBus;

#[async_trait]
impl BusProducer for LogBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        tracing::info!(
            topic,
            key,
            payload = %String::from_utf8_lossy(payload),
            "event published"
        );
        Ok(())
    }
}
