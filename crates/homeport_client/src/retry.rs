use std::time::Duration;

/// Bounded reconnect schedule for the chat transport.
///
/// Attempt 1 fires immediately; after failure `n` the binder waits
/// `delay_after(n)` before attempt `n + 1`. With the defaults that is 1s,
/// 2s, 4s, 8s between five total attempts, after which the failure is
/// terminal. The schedule is deterministic so tests can pin exact delays.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub base: Duration,
	pub factor: u32,
	pub cap: Duration,
	pub max_attempts: u32,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			base: Duration::from_secs(1),
			factor: 2,
			cap: Duration::from_secs(16),
			max_attempts: 5,
		}
	}
}

impl RetryPolicy {
	/// Delay to wait after the `failure`-th consecutive failure (1-based).
	pub fn delay_after(&self, failure: u32) -> Duration {
		let exp = failure.saturating_sub(1).min(31);
		let factor = (self.factor as u64).saturating_pow(exp);
		let delay_ms = (self.base.as_millis() as u64).saturating_mul(factor);
		Duration::from_millis(delay_ms).min(self.cap)
	}

	/// Whether `failures` consecutive failures exhaust the attempt bound.
	pub fn attempts_exhausted(&self, failures: u32) -> bool {
		failures >= self.max_attempts
	}
}
