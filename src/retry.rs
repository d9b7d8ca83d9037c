use std::time::Duration;

const MAX_DELAY_MS: u64 = 10_000;

/// Attempt bound and backoff schedule for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// No sleeping between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay after the given failed attempt (1-based): exponential from the
    /// base delay, capped at 10s, with +/-25% jitter.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let delay_ms = base_ms.saturating_mul(2_u64.pow(exponent)).min(MAX_DELAY_MS);
        let jitter_range = (delay_ms as f64 * 0.25) as u64;
        let jitter = fastrand::u64(0..=jitter_range * 2);
        Duration::from_millis(delay_ms.saturating_sub(jitter_range).saturating_add(jitter))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}
