//! The checker contract and per-call context.

use async_trait::async_trait;
use seca_proto::{CheckResult, ERROR_CANCELLED, ERROR_TIMEOUT};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-call context handed to a checker by the dispatcher.
///
/// `cancel` is a child token the dispatcher cancels at the per-call deadline
/// and that also observes outer run cancellation. Checkers must select on it
/// around their I/O and return promptly once it fires.
pub struct CheckContext {
    cancel: CancellationToken,
    outer: CancellationToken,
    timeout: Duration,
}

impl CheckContext {
    pub fn new(cancel: CancellationToken, outer: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            outer,
            timeout,
        }
    }

    /// Resolves when the call must stop (deadline or outer cancellation).
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True when the per-call deadline fired rather than the outer run
    /// being cancelled.
    pub fn is_timed_out(&self) -> bool {
        self.cancel.is_cancelled() && !self.outer.is_cancelled()
    }

    /// The error string a checker should report when aborted by this
    /// context: `timeout` for a deadline, `cancelled` otherwise.
    pub fn abort_error(&self) -> &'static str {
        if self.is_timed_out() {
            ERROR_TIMEOUT
        } else {
            ERROR_CANCELLED
        }
    }

    /// The configured per-call budget, for checkers that also set client
    /// level timeouts.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// A component that turns one target into one [`CheckResult`].
///
/// Contract: honor cancellation promptly, never panic, populate
/// `checked_at` and `status`, and on failure set `status = "error"` with a
/// non-empty `error`. Side effects are limited to read-only network
/// operations and an optional raw-capture callback provided at
/// construction.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, ctx: &CheckContext, target: &str) -> CheckResult;
}
