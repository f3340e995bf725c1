use std::time::Duration;

use chunkup_protocol::constants::DEFAULT_RETRY_DELAYS_MS;

use crate::TransportErrorKind;

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Repeat the same operation after the delay.
    RetryAfter(Duration),
    /// Stop retrying.
    GiveUp,
}

/// Fixed backoff schedule for transient transport failures.
///
/// The policy holds no state: the caller owns the attempt counter and
/// increments it before each call to [`decide`](Self::decide).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_RETRY_DELAYS_MS)
    }
}

impl RetryPolicy {
    /// Creates a policy from an ordered delay schedule.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Creates a policy from delays in milliseconds.
    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self::new(delays_ms.iter().copied().map(Duration::from_millis).collect())
    }

    /// A policy that never retries.
    pub fn never() -> Self {
        Self::new(Vec::new())
    }

    /// The delay schedule.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Number of retries allowed before giving up.
    pub fn max_retries(&self) -> u32 {
        self.delays.len() as u32
    }

    /// Decides whether the `attempt`-th consecutive failure (1-based) should
    /// be retried.
    ///
    /// `serverRejected` never retries. Otherwise failure `n` waits
    /// `delays[n - 1]`; once `n` exceeds the schedule the answer is
    /// [`RetryDecision::GiveUp`].
    pub fn decide(&self, kind: TransportErrorKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::GiveUp;
        }
        let index = attempt.saturating_sub(1) as usize;
        match self.delays.get(index) {
            Some(&delay) => RetryDecision::RetryAfter(delay),
            None => RetryDecision::GiveUp,
        }
    }
}
