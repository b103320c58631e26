//! Concurrent check execution engine for SECA.
//!
//! A [`Runner`] fans an ordered target list across a bounded worker pool,
//! throttled by a shared token-bucket rate limiter and driven by a single
//! cooperative cancellation handle. The [`retry`] supervisor wraps the
//! runner with N+1 attempts for non-ok targets. Results always come back in
//! input target order.

#![forbid(unsafe_code)]

mod checker;
mod limiter;
mod progress;
mod retry;
mod runner;

pub use checker::{CheckContext, Checker};
pub use progress::{NoProgress, ProgressReporter, TracingProgress};
pub use retry::run_with_retries;
pub use runner::{AuditCallback, Runner, RunnerConfig};
