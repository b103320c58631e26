//! Shared token-bucket gate in front of checker invocations.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use tokio_util::sync::CancellationToken;

/// Token-bucket limiter shared by all workers of a run. A rate of 0
/// disables limiting entirely; otherwise the bucket refills at
/// `rate_per_sec` with burst = `rate_per_sec`.
pub(crate) struct RateGate {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateGate {
    pub(crate) fn new(rate_per_sec: u32) -> Self {
        let limiter =
            NonZeroU32::new(rate_per_sec).map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self { limiter }
    }

    /// Wait for one token. Returns false if the run was cancelled while
    /// waiting.
    pub(crate) async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let Some(limiter) = &self.limiter else {
            return !cancel.is_cancelled();
        };
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = limiter.until_ready() => true,
        }
    }
}
