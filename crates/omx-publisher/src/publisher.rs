//! The publisher worker loop.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sqlx::PgPool;
use tokio::sync::watch;

use omx_errors::OmxError;
use omx_store::outbox;

use crate::bus::{BusError, BusProducer};

// ---------------------------------------------------------------------------
// PublisherConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Max rows claimed per round.
    pub batch_size: i64,
    /// Idle sleep when the outbox is empty (`outbox.poll.interval`).
    pub poll_interval: Duration,
    /// First backoff after a transient failure (`outbox.backoff.initial`).
    pub backoff_initial: Duration,
    /// Backoff ceiling (`outbox.backoff.max`).
    pub backoff_max: Duration,
    /// Producer acknowledgement budget per message.
    pub ack_timeout: Duration,
    /// Move a non-transiently-failing row to quarantine after this many
    /// attempts. 0 disables quarantine.
    pub quarantine_after: i32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(250),
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(5),
            quarantine_after: 10,
        }
    }
}

/// Double, cap, and add ±20% jitter so stalled publishers do not stampede
/// the broker in lockstep when it comes back.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    let doubled = current.saturating_mul(2).min(max);
    let ms = doubled.as_millis() as f64;
    let spread = ms * 0.2;
    let jittered = ms + rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_millis(jittered.max(1.0) as u64)
}

// ---------------------------------------------------------------------------
// Round outcome
// ---------------------------------------------------------------------------

enum RoundOutcome {
    /// Nothing claimable.
    Idle,
    /// Every claimed row published and deleted.
    Drained(usize),
    /// Published a prefix, then hit a transient failure; back off.
    Stalled { published: usize },
}

// ---------------------------------------------------------------------------
// OutboxPublisher
// ---------------------------------------------------------------------------

/// One worker. Run several (`outbox.publisher.count`) against the same
/// pool; `SKIP LOCKED` keeps their claims disjoint.
pub struct OutboxPublisher<B: BusProducer> {
    pool: PgPool,
    bus: Arc<B>,
    cfg: PublisherConfig,
    worker: String,
}

impl<B: BusProducer> OutboxPublisher<B> {
    pub fn new(pool: PgPool, bus: Arc<B>, cfg: PublisherConfig, worker: impl Into<String>) -> Self {
        Self {
            pool,
            bus,
            cfg,
            worker: worker.into(),
        }
    }

    /// Worker loop: poll, publish, back off on failure, stop on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.cfg.backoff_initial;
        tracing::info!(worker = %self.worker, "outbox publisher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let sleep_for = match self.publish_round().await {
                Ok(RoundOutcome::Drained(n)) => {
                    tracing::debug!(worker = %self.worker, published = n, "outbox round drained");
                    backoff = self.cfg.backoff_initial;
                    // More may be waiting; go straight back.
                    continue;
                }
                Ok(RoundOutcome::Idle) => {
                    backoff = self.cfg.backoff_initial;
                    self.cfg.poll_interval
                }
                Ok(RoundOutcome::Stalled { published }) => {
                    let delay = backoff;
                    backoff = next_backoff(backoff, self.cfg.backoff_max);
                    tracing::warn!(
                        worker = %self.worker,
                        published,
                        delay_ms = delay.as_millis() as u64,
                        "bus unavailable; backing off"
                    );
                    delay
                }
                Err(err) => {
                    let delay = backoff;
                    backoff = next_backoff(backoff, self.cfg.backoff_max);
                    tracing::error!(worker = %self.worker, error = %err, "outbox round failed");
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!(worker = %self.worker, "outbox publisher stopped");
    }

    /// Claim a batch and publish it in id order.
    ///
    /// Stops at the first failed row: the published prefix is deleted and
    /// committed, the rest of the claim is released. Stopping (rather than
    /// skipping) is what preserves per-order emission order.
    async fn publish_round(&self) -> Result<RoundOutcome, OmxError> {
        let mut batch = outbox::claim_batch(&self.pool, self.cfg.batch_size).await?;
        if batch.rows.is_empty() {
            return Ok(RoundOutcome::Idle);
        }

        let rows = batch.rows.clone();
        let total = rows.len();
        let mut published: Vec<i64> = Vec::with_capacity(total);
        let mut stalled = false;
        let mut poisoned: Option<(i64, String, i32)> = None;

        for row in &rows {
            let payload = match serde_json::to_vec(&row.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    // Undeliverable by construction; alert and leave the
                    // row for the quarantine path below.
                    tracing::error!(
                        worker = %self.worker,
                        outbox_id = row.id,
                        order_id = %row.order_id,
                        error = %e,
                        "outbox payload failed to serialize"
                    );
                    poisoned = Some((row.id, format!("serialization: {e}"), row.attempt_count));
                    break;
                }
            };

            let result = tokio::time::timeout(
                self.cfg.ack_timeout,
                self.bus.publish(&row.topic, &row.order_id, &payload),
            )
            .await;

            match result {
                Ok(Ok(())) => published.push(row.id),
                Ok(Err(err)) if !err.is_transient() => {
                    tracing::error!(
                        worker = %self.worker,
                        outbox_id = row.id,
                        order_id = %row.order_id,
                        error = %err,
                        "bus rejected outbox payload"
                    );
                    poisoned = Some((row.id, err.to_string(), row.attempt_count));
                    break;
                }
                Ok(Err(err)) => {
                    tracing::debug!(outbox_id = row.id, error = %err, "transient publish failure");
                    stalled = true;
                    break;
                }
                Err(_elapsed) => {
                    tracing::debug!(outbox_id = row.id, "publish ack timed out");
                    stalled = true;
                    break;
                }
            }
        }

        // Delete what the bus acknowledged, release the rest.
        let published_count = published.len();
        outbox::delete_rows(&mut batch.tx, &published).await?;
        batch.commit().await?;

        if let Some((id, reason, attempts)) = poisoned {
            if self.cfg.quarantine_after > 0 && attempts + 1 >= self.cfg.quarantine_after {
                tracing::error!(
                    worker = %self.worker,
                    outbox_id = id,
                    attempts = attempts + 1,
                    "quarantining poisoned outbox row"
                );
                outbox::quarantine(&self.pool, id, &reason).await?;
            } else {
                outbox::record_attempt(&self.pool, &[id]).await?;
            }
            return Ok(RoundOutcome::Stalled {
                published: published_count,
            });
        }

        if stalled {
            // The failed row (and everything after it) was released with
            // the claim; count the failed round against it.
            if let Some(failed_id) = rows.get(published_count).map(|r| r.id) {
                outbox::record_attempt(&self.pool, &[failed_id]).await?;
            }
            return Ok(RoundOutcome::Stalled {
                published: published_count,
            });
        }

        Ok(RoundOutcome::Drained(published_count))
    }

    /// Current backlog, for the monitoring loop.
    pub async fn backlog(&self) -> Result<i64, OmxError> {
        outbox::backlog(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let max = Duration::from_secs(2);
        let mut current = Duration::from_millis(100);
        for _ in 0..10 {
            current = next_backoff(current, max);
        }
        // ±20% jitter around the 2s cap.
        assert!(current >= Duration::from_millis(1600));
        assert!(current <= Duration::from_millis(2400));
    }

    #[test]
    fn backoff_never_reaches_zero() {
        let d = next_backoff(Duration::from_millis(0), Duration::from_secs(1));
        assert!(d >= Duration::from_millis(1));
    }
}
