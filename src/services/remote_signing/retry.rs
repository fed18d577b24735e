// src/services/remote_signing/retry.rs
//! Backoff schedule for signer retries.
//!
//! Exponential, starting at `initial_delay_ms` and doubling up to
//! `max_delay_ms`, with symmetric relative jitter. Plugs into `backon` as a
//! [`BackoffBuilder`].

use crate::config::RetryPolicy;
use backon::BackoffBuilder;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct JitteredBackoffBuilder {
    policy: RetryPolicy,
}

impl JitteredBackoffBuilder {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl BackoffBuilder for JitteredBackoffBuilder {
    type Backoff = JitteredBackoff;

    fn build(self) -> Self::Backoff {
        JitteredBackoff {
            next_delay: Duration::from_millis(self.policy.initial_delay_ms),
            max_delay: Duration::from_millis(self.policy.max_delay_ms),
            jitter: self.policy.jitter,
            remaining: self.policy.max_attempts.saturating_sub(1),
        }
    }
}

/// Yields one delay per retry; the first attempt is not delayed.
#[derive(Debug, Clone)]
pub struct JitteredBackoff {
    next_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    remaining: u32,
}

impl Iterator for JitteredBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.next_delay.min(self.max_delay);
        self.next_delay = base.saturating_mul(2).min(self.max_delay);

        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        Some(base.mul_f64(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(policy: RetryPolicy) -> Vec<Duration> {
        JitteredBackoffBuilder::new(policy).build().collect()
    }

    #[test]
    fn test_default_policy_retries_twice_within_bounds() {
        let delays = delays(RetryPolicy::default());
        assert_eq!(delays.len(), 2);
        assert!(delays[0] >= Duration::from_millis(500) && delays[0] <= Duration::from_millis(1500));
        assert!(delays[1] >= Duration::from_millis(1000) && delays[1] <= Duration::from_millis(3000));
    }

    #[test]
    fn test_delays_double_and_cap_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            jitter: 0.0,
        };
        assert_eq!(
            delays(policy),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert!(delays(policy).is_empty());
    }
}
