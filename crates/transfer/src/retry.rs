use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff with additive jitter.
///
/// Attempt `n` (1-based) waits `min(base * 2^(n-1) + jitter, max_delay)`
/// with `jitter` drawn from `[0, base)`. Since the exponential step
/// always grows by at least `base`, successive delays never decrease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, the first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt`, with random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_nanos = self.base_delay.as_nanos().min(u64::MAX as u128) as u64;
        let jitter = if base_nanos == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rand::thread_rng().gen_range(0..base_nanos))
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay after failed attempt `attempt` with an explicit jitter.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let step = self
            .base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay);
        step.saturating_add(jitter).min(self.max_delay)
    }

    /// Delay honouring a server `Retry-After` hint, still capped.
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        match hint {
            Some(h) => delay.max(h).min(self.max_delay),
            None => delay,
        }
    }
}

/// Attempt budget and delay history for one retried unit of work.
///
/// Delays never shrink within one budget: a long `Retry-After` hint keeps
/// later waits at least as long, up to `max_delay`.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    last_delay: Duration,
}

impl<'a> Backoff<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Failed attempts counted so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Counts one failed attempt and returns the wait before the next one,
    /// or `None` once the budget is spent.
    pub fn fail(&mut self, hint: Option<Duration>) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self
            .policy
            .delay_with_hint(self.attempts, hint)
            .max(self.last_delay)
            .min(self.policy.max_delay);
        self.last_delay = delay;
        Some(delay)
    }

    /// Starts a fresh budget after forward progress.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_delay = Duration::ZERO;
    }
}
