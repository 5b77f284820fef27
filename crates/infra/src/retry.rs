use std::time::Duration;

use rand::Rng;

use stockledger_core::LedgerResult;

/// Jittered exponential backoff for retryable ledger failures.
///
/// Only errors with `LedgerError::is_retryable()` are retried; every other
/// error is returned on the first attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let clamped_base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: clamped_base,
            max_delay_ms: max_delay_ms.max(clamped_base),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, 1, 1, 0.0)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        let jittered = if self.jitter_pct > 0.0 {
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(jittered)
    }

    /// Run `op` until it succeeds, fails definitively, or attempts run out.
    pub fn retry<T>(&self, mut op: impl FnMut(usize) -> LedgerResult<T>) -> LedgerResult<T> {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if !err.is_retryable() || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.next_delay(attempt - 1);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 5, 100, 0.2)
    }
}
