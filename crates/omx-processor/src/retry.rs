//! Bounded retry with jittered exponential backoff.
//!
//! Only Conflict (optimistic-lock) failures are ever retried by a
//! processor; the policy here supplies the schedule. The jitter factor
//! spreads concurrent losers apart so they do not collide again on the
//! same row.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// ±fraction applied to each delay (0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Per-invocation state walking a [`RetryPolicy`].
#[derive(Debug)]
pub struct BackoffSchedule {
    attempt: u32,
    max_attempts: u32,
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter_factor: f64,
}

impl BackoffSchedule {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts,
            initial_ms: policy.initial_backoff.as_millis() as u64,
            max_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// The delay before the next retry, or `None` when attempts are
    /// exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let exp = self.multiplier.powi(self.attempt as i32 - 1);
        let base_ms = ((self.initial_ms as f64) * exp).min(self.max_ms as f64);

        let jittered = if self.jitter_factor > 0.0 {
            let spread = base_ms * self.jitter_factor;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (base_ms + offset).max(1.0)
        } else {
            base_ms
        };

        Some(Duration::from_millis(jittered as u64))
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(400),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let mut schedule = BackoffSchedule::new(&no_jitter(5));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(400)));
        // Capped at max_backoff.
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(schedule.next_backoff(), None);
    }

    #[test]
    fn exhaustion_after_max_attempts() {
        let mut schedule = BackoffSchedule::new(&no_jitter(1));
        assert_eq!(schedule.next_backoff(), None);

        let mut schedule = BackoffSchedule::new(&no_jitter(2));
        assert!(schedule.next_backoff().is_some());
        assert_eq!(schedule.next_backoff(), None);
    }

    #[test]
    fn jitter_stays_within_spread() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 1.0,
            jitter_factor: 0.2,
        };
        let mut schedule = BackoffSchedule::new(&policy);
        for _ in 0..50 {
            let d = schedule.next_backoff().unwrap();
            let ms = d.as_millis() as u64;
            assert!((80..=120).contains(&ms), "jittered delay {ms}ms out of band");
        }
    }
}
