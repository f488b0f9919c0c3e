use std::time::Duration;

/// Backoff tuning for the supervised sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    /// Create a policy with a base and a cap, both in milliseconds.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Start a fresh attempt counter under this policy.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}

/// Stateful exponential backoff: doubles per failed attempt, honors a
/// server-provided retry-after hint when larger, and caps at the
/// policy maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    /// Delay before the next attempt, advancing the counter.
    pub fn next_delay(&mut self, retry_after_hint_ms: Option<u64>) -> Duration {
        let shift = self.attempt.min(20);
        self.attempt = self.attempt.saturating_add(1);
        let calculated = self.policy.base_delay_ms.saturating_mul(1_u64 << shift);
        let hinted = retry_after_hint_ms.unwrap_or(0);
        Duration::from_millis(calculated.max(hinted).min(self.policy.max_delay_ms))
    }

    /// Reset after a success so the next failure starts from the base
    /// delay again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
