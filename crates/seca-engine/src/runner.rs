//! Rate-limited bounded-worker dispatcher.

use crate::checker::{CheckContext, Checker};
use crate::limiter::RateGate;
use crate::progress::{NoProgress, ProgressReporter};
use parking_lot::Mutex;
use seca_proto::CheckResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Audit sink invoked synchronously with `(target, result, duration_secs)`
/// after every checker invocation. An error aborts that target's path (the
/// result is dropped) but never the run.
pub type AuditCallback = Arc<
    dyn Fn(&str, &CheckResult, f64) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum checker invocations in flight. Clamped to at least 1.
    pub concurrency: usize,
    /// Token-bucket rate in checks per second, burst = rate. 0 disables.
    pub rate_limit: u32,
    /// Per-call deadline.
    pub timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit: 10,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Dispatches one checker over an ordered target list.
pub struct Runner {
    config: RunnerConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Run the checker over `targets`.
    ///
    /// Spawns `min(concurrency, targets.len())` workers that pull indices
    /// from a shared cursor. Each invocation acquires a rate token first
    /// (cancellation-aware), then runs under a child token the dispatcher
    /// cancels at the deadline. Results come back in input order; targets
    /// never dispatched are absent from the returned slice.
    pub async fn run(
        &self,
        targets: &[String],
        checker: Arc<dyn Checker>,
        audit: AuditCallback,
        cancel: &CancellationToken,
    ) -> Vec<CheckResult> {
        if targets.is_empty() {
            return Vec::new();
        }

        let total = targets.len();
        let workers = self.config.concurrency.max(1).min(total);
        let timeout = self.config.timeout;

        let gate = Arc::new(RateGate::new(self.config.rate_limit));
        let targets = Arc::new(targets.to_vec());
        let results: Arc<Mutex<HashMap<usize, CheckResult>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let cursor = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        debug!(
            total,
            workers,
            rate_limit = self.config.rate_limit,
            checker = checker.name(),
            "dispatching targets"
        );

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let gate = Arc::clone(&gate);
            let targets = Arc::clone(&targets);
            let results = Arc::clone(&results);
            let cursor = Arc::clone(&cursor);
            let completed = Arc::clone(&completed);
            let checker = Arc::clone(&checker);
            let audit = Arc::clone(&audit);
            let progress = Arc::clone(&self.progress);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    if idx >= targets.len() {
                        break;
                    }
                    if !gate.acquire(&cancel).await {
                        break;
                    }

                    let target = &targets[idx];
                    let child = cancel.child_token();
                    let ctx = CheckContext::new(child.clone(), cancel.clone(), timeout);
                    let deadline = tokio::spawn({
                        let child = child.clone();
                        async move {
                            tokio::time::sleep(timeout).await;
                            child.cancel();
                        }
                    });

                    let started = Instant::now();
                    let mut result = checker.check(&ctx, target).await;
                    let duration = started.elapsed().as_secs_f64();
                    deadline.abort();

                    // Keyed storage and retry accounting rely on the target
                    // field matching the dispatched string.
                    result.target = target.clone();

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.on_result(done, total, target, &result.status);

                    if let Err(e) = audit(target, &result, duration) {
                        warn!(target = %target, error = %e, "audit callback failed, dropping result");
                        continue;
                    }
                    results.lock().insert(idx, result);
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch worker terminated abnormally");
            }
        }

        let mut map = std::mem::take(&mut *results.lock());
        (0..total).filter_map(|idx| map.remove(&idx)).collect()
    }
}
