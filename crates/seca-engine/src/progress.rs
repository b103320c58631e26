//! Optional live progress feed from the dispatcher.

use tracing::info;

/// Receives one notification per completed checker invocation. Reporters
/// are advisory: they cannot fail and never affect run correctness.
pub trait ProgressReporter: Send + Sync {
    fn on_result(&self, completed: usize, total: usize, target: &str, status: &str);
}

/// Reporter that discards everything.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn on_result(&self, _completed: usize, _total: usize, _target: &str, _status: &str) {}
}

/// Reporter that emits one structured log line per completion.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn on_result(&self, completed: usize, total: usize, target: &str, status: &str) {
        info!(completed, total, target, status, "check completed");
    }
}
