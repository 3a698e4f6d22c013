//! The message-bus port.
//!
//! The core publishes through this trait and nothing else; the concrete
//! producer (Kafka, NATS, a test recorder) is wired in at startup.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Transient: broker down, connection refused. Retried forever.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// Producer acknowledgement did not arrive in time. Retried forever.
    #[error("publish not acknowledged within {0:?}")]
    AckTimeout(Duration),

    /// The bus refused the payload itself (schema registry, size cap).
    /// Retrying cannot help; counts toward quarantine.
    #[error("payload rejected: {0}")]
    Rejected(String),
}

impl BusError {
    /// Whether another attempt with the identical payload can succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, BusError::Rejected(_))
    }
}

/// Minimal producer contract: publish one message to `topic`, partitioned
/// by `key`, and return once the bus acknowledged it.
#[async_trait]
pub trait BusProducer: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_is_not_transient() {
        assert!(BusError::Unavailable("down".into()).is_transient());
        assert!(BusError::AckTimeout(Duration::from_secs(5)).is_transient());
        assert!(!BusError::Rejected("schema mismatch".into()).is_transient());
    }
}
