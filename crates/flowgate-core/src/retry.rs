//! Retry policy for task HTTP calls
//!
//! Capped exponential backoff with full jitter. The policy itself is pure:
//! it does no I/O and, given a fixed [`JitterSource`], is deterministic.

use std::time::Duration;

use flowgate_contracts::RetrySpec;
use rand::Rng;

/// Source of the jitter multiplier, pluggable for deterministic tests
pub trait JitterSource: Send + Sync {
    /// A sample in `[0, 1)`
    fn unit(&self) -> f64;
}

/// Default jitter source backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn unit(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..1.0)
    }
}

/// Jitter source that always returns the same multiplier.
///
/// `FixedJitter(1.0)` makes delays exactly `min(cap, base * factor^(n-1))`,
/// which is what timing-sensitive tests want.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn unit(&self) -> f64 {
        self.0
    }
}

/// Compiled retry policy, merged from invocation, task, and engine defaults
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Delay base before the second attempt
    pub base_delay: Duration,
    /// Backoff multiplier
    pub factor: f64,
    /// Upper bound on any single delay (also clamps server retry hints)
    pub cap: Duration,
    /// Statuses that warrant a retry; transport errors always do
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySpec::default().into()
    }
}

impl From<RetrySpec> for RetryPolicy {
    fn from(spec: RetrySpec) -> Self {
        Self::from(&spec)
    }
}

impl From<&RetrySpec> for RetryPolicy {
    fn from(spec: &RetrySpec) -> Self {
        Self {
            max_attempts: spec.max_attempts.max(1),
            base_delay: spec.base_delay,
            factor: spec.factor,
            cap: spec.cap,
            retryable_statuses: spec.retryable_statuses.clone(),
        }
    }
}

impl RetryPolicy {
    /// Whether this HTTP status warrants another attempt
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Jittered delay after a failed `attempt` (1-based):
    /// `min(cap, base * factor^(attempt-1)) * unit`.
    pub fn delay_for_attempt(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        let capped = raw.min(self.cap.as_secs_f64());
        Duration::from_secs_f64(capped * jitter.unit().clamp(0.0, 1.0))
    }

    /// Decide whether to retry after a retryable failure of `attempt`.
    ///
    /// Returns the delay to sleep before the next attempt, or `None` when
    /// attempts are exhausted. A server-supplied hint (e.g. `Retry-After`
    /// on a 429) overrides the computed backoff, clamped to the cap.
    pub fn next_delay(
        &self,
        attempt: u32,
        hint: Option<Duration>,
        jitter: &dyn JitterSource,
    ) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        match hint {
            Some(hint) => Some(hint.min(self.cap)),
            None => Some(self.delay_for_attempt(attempt, jitter)),
        }
    }
}
