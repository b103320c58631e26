//! Retry supervisor over the dispatcher.

use crate::checker::Checker;
use crate::runner::{AuditCallback, Runner};
use seca_proto::{AttemptOutcome, CheckResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run the checker with `retry_count + 1` attempts (minimum 1).
///
/// After each attempt, targets whose latest result is missing or not ok are
/// requeued in their original relative order. The last observed result per
/// target wins. Cancellation halts further attempts; results from completed
/// attempts are kept. The returned slice follows the original target list.
pub async fn run_with_retries(
    runner: &Runner,
    targets: &[String],
    checker: Arc<dyn Checker>,
    audit: AuditCallback,
    cancel: &CancellationToken,
    retry_count: usize,
) -> Vec<CheckResult> {
    let attempts = retry_count + 1;
    let mut last: HashMap<String, CheckResult> = HashMap::new();
    let mut pending: Vec<String> = targets.to_vec();

    for attempt in 1..=attempts {
        if pending.is_empty() || cancel.is_cancelled() {
            break;
        }
        if attempt > 1 {
            debug!(attempt, pending = pending.len(), "retrying non-ok targets");
        }

        let results = runner
            .run(&pending, Arc::clone(&checker), Arc::clone(&audit), cancel)
            .await;
        for result in results {
            last.insert(result.target.clone(), result);
        }

        pending.retain(|t| {
            last.get(t)
                .is_none_or(|r| AttemptOutcome::classify(r).needs_retry())
        });
    }

    targets.iter().filter_map(|t| last.remove(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckContext;
    use crate::runner::RunnerConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails each target's first `fail_first` attempts, then succeeds.
    struct FlakyChecker {
        fail_first: usize,
        calls: Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl Checker for FlakyChecker {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn check(&self, _ctx: &CheckContext, target: &str) -> CheckResult {
            let attempt = {
                let mut calls = self.calls.lock();
                let n = calls.entry(target.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            if attempt <= self.fail_first {
                CheckResult::error(target, "flaky")
            } else {
                CheckResult::ok(target)
            }
        }
    }

    fn runner() -> Runner {
        Runner::new(RunnerConfig {
            concurrency: 2,
            rate_limit: 0,
            timeout: Duration::from_secs(1),
        })
    }

    fn no_audit() -> AuditCallback {
        Arc::new(|_, _, _| Ok(()))
    }

    #[tokio::test]
    async fn test_retry_converges_to_ok() {
        let checker = Arc::new(FlakyChecker {
            fail_first: 2,
            calls: Mutex::new(HashMap::new()),
        });
        let targets = vec!["https://a.test/".to_string(), "https://b.test/".to_string()];

        let results = run_with_retries(
            &runner(),
            &targets,
            Arc::clone(&checker) as Arc<dyn Checker>,
            no_audit(),
            &CancellationToken::new(),
            2,
        )
        .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        let calls = checker.calls.lock();
        assert!(calls.values().all(|&n| n == 3));
    }

    #[tokio::test]
    async fn test_only_failing_targets_requeued() {
        // a succeeds immediately, b fails once: second attempt sees only b.
        struct OneBad {
            calls: Mutex<HashMap<String, usize>>,
        }

        #[async_trait]
        impl Checker for OneBad {
            fn name(&self) -> &str {
                "one-bad"
            }

            async fn check(&self, _ctx: &CheckContext, target: &str) -> CheckResult {
                let attempt = {
                    let mut calls = self.calls.lock();
                    let n = calls.entry(target.to_string()).or_insert(0);
                    *n += 1;
                    *n
                };
                if target.contains("b.test") && attempt == 1 {
                    CheckResult::error(target, "first attempt fails")
                } else {
                    CheckResult::ok(target)
                }
            }
        }

        let checker = Arc::new(OneBad {
            calls: Mutex::new(HashMap::new()),
        });
        let targets = vec!["https://a.test/".to_string(), "https://b.test/".to_string()];
        let results = run_with_retries(
            &runner(),
            &targets,
            Arc::clone(&checker) as Arc<dyn Checker>,
            no_audit(),
            &CancellationToken::new(),
            1,
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        let calls = checker.calls.lock();
        assert_eq!(calls["https://a.test/"], 1);
        assert_eq!(calls["https://b.test/"], 2);
    }

    #[tokio::test]
    async fn test_last_result_wins_when_attempts_exhausted() {
        let checker = Arc::new(FlakyChecker {
            fail_first: 10,
            calls: Mutex::new(HashMap::new()),
        });
        let targets = vec!["https://a.test/".to_string()];
        let results = run_with_retries(
            &runner(),
            &targets,
            checker,
            no_audit(),
            &CancellationToken::new(),
            1,
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, "error");
    }

    #[tokio::test]
    async fn test_cancellation_halts_attempts() {
        struct CancelAfterFirst {
            cancel: CancellationToken,
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Checker for CancelAfterFirst {
            fn name(&self) -> &str {
                "cancel-after-first"
            }

            async fn check(&self, _ctx: &CheckContext, target: &str) -> CheckResult {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.cancel.cancel();
                CheckResult::error(target, "flaky")
            }
        }

        let cancel = CancellationToken::new();
        let checker = Arc::new(CancelAfterFirst {
            cancel: cancel.clone(),
            calls: AtomicUsize::new(0),
        });
        let targets = vec!["https://a.test/".to_string()];

        let results = run_with_retries(
            &Runner::new(RunnerConfig {
                concurrency: 1,
                rate_limit: 0,
                timeout: Duration::from_secs(1),
            }),
            &targets,
            Arc::clone(&checker) as Arc<dyn Checker>,
            no_audit(),
            &cancel,
            5,
        )
        .await;

        // First attempt's result is kept, but no further attempts run.
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, "error");
    }

    #[tokio::test]
    async fn test_final_order_follows_input() {
        let checker = Arc::new(FlakyChecker {
            fail_first: 1,
            calls: Mutex::new(HashMap::new()),
        });
        let targets: Vec<String> = (0..5).map(|i| format!("https://t{i}.test/")).collect();
        let results = run_with_retries(
            &runner(),
            &targets,
            checker,
            no_audit(),
            &CancellationToken::new(),
            1,
        )
        .await;

        let got: Vec<&str> = results.iter().map(|r| r.target.as_str()).collect();
        let want: Vec<&str> = targets.iter().map(String::as_str).collect();
        assert_eq!(got, want);
    }
}
