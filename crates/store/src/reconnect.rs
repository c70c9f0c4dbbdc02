//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

/// Controls how the change feed reconnects after a connection drop.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    /// Cap between attempts.
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Consecutive failures before giving up. `0` means unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before the given attempt (0-indexed), with up to 25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt.min(32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = capped_ms * 0.25 * spread(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Deterministic fraction in [0, 1) derived from the attempt number.
fn spread(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_caps() {
        let p = ReconnectBackoff::default();
        assert!(p.delay_for_attempt(1) > p.delay_for_attempt(0));
        assert!(p.delay_for_attempt(2) > p.delay_for_attempt(1));
        assert!(p.delay_for_attempt(40) <= Duration::from_millis(75_000));
    }

    #[test]
    fn give_up_only_when_limited() {
        let p = ReconnectBackoff {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(!p.should_give_up(2));
        assert!(p.should_give_up(3));
        assert!(!ReconnectBackoff::default().should_give_up(1_000_000));
    }
}
