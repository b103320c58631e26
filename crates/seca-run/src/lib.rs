//! Check run orchestration.
//!
//! [`execute`] drives one engagement run end to end: authorization gate,
//! scope build and optional crawl expansion, rate-limited dispatch with
//! retries, per-result audit rows, two-pass bundle sealing, optional
//! signing/encryption, and the telemetry record. Cancellation surfaces as a
//! successful outcome with `cancelled = true` and partial results persisted.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use seca_audit::{AuditEntry, AuditError, AuditLog};
use seca_bundle::{BundleError, BundlePaths, Encryptor, HashAlgorithm, Signer, write_bundle};
use seca_engage::{EngageError, Engagement, EngagementStore};
use seca_engine::{
    AuditCallback, Checker, ProgressReporter, Runner, RunnerConfig, run_with_retries,
};
use seca_proto::{CheckResult, ResultBundle, RunMetadata, RunState, TelemetryRecord};
use seca_scope::{CrawlOptions, Crawler, TargetSet, expand_scope};
use seca_telemetry::{TelemetryError, TelemetryRecorder};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Engage(#[from] EngageError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid run state transition from {from} to {to}")]
    State { from: RunState, to: RunState },

    #[error("audit log failure: {0}")]
    Audit(#[from] AuditError),

    #[error("bundle finalization failure: {0}")]
    Bundle(#[from] BundleError),

    #[error("telemetry failure: {0}")]
    Telemetry(#[from] TelemetryError),
}

// ─── Run state machine ───────────────────────────────────────────────────────

/// Lifecycle tracker for one run: `NEW → RUNNING → COMPLETED | CANCELLED |
/// ERRORED`. The audit log stays valid through the last successful append
/// whatever the terminal state.
#[derive(Debug)]
pub struct CheckRun {
    state: RunState,
    started_at: DateTime<Utc>,
}

impl CheckRun {
    pub fn new() -> Self {
        Self {
            state: RunState::New,
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn start(&mut self) -> Result<(), RunError> {
        self.transition(RunState::New, RunState::Running)
    }

    pub fn complete(&mut self) -> Result<(), RunError> {
        self.transition(RunState::Running, RunState::Completed)
    }

    pub fn cancel(&mut self) -> Result<(), RunError> {
        self.transition(RunState::Running, RunState::Cancelled)
    }

    pub fn fail(&mut self) -> Result<(), RunError> {
        self.transition(RunState::Running, RunState::Errored)
    }

    fn transition(&mut self, from: RunState, to: RunState) -> Result<(), RunError> {
        if self.state != from {
            return Err(RunError::State {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for CheckRun {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Run request & outcome ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Command string recorded in every audit row (`plugin <name>` for
    /// external checkers).
    pub command: String,
    pub operator: Option<String>,
    pub concurrency: usize,
    pub rate_limit: u32,
    pub timeout: Duration,
    pub retry_count: usize,
    /// Raw hash algorithm selection; parsed before anything touches disk.
    pub hash: String,
    pub crawl: Option<CrawlOptions>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            command: "check".to_string(),
            operator: None,
            concurrency: 5,
            rate_limit: 10,
            timeout: Duration::from_secs(10),
            retry_count: 0,
            hash: String::new(),
            crawl: None,
        }
    }
}

/// Everything one run needs. Adapters are optional seams; absence means a
/// plaintext bundle and no scope expansion.
pub struct RunRequest<'a> {
    pub store: &'a EngagementStore,
    pub results_root: &'a Path,
    pub engagement_id: &'a str,
    pub checker: Arc<dyn Checker>,
    pub options: RunOptions,
    pub crawler: Option<Arc<dyn Crawler>>,
    pub signer: Option<Arc<dyn Signer>>,
    pub encryptor: Option<Arc<dyn Encryptor>>,
    pub progress: Option<Arc<dyn ProgressReporter>>,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub engagement_id: String,
    pub operator: String,
    pub state: RunState,
    /// True when the run was cancelled and the persisted results are
    /// partial.
    pub cancelled: bool,
    pub results: Vec<CheckResult>,
    pub bundle: ResultBundle,
    pub paths: BundlePaths,
    pub telemetry: TelemetryRecord,
}

// ─── Execution ───────────────────────────────────────────────────────────────

/// Run one engagement check end to end.
///
/// Configuration and authorization are validated before any filesystem path
/// is derived, so a rejected run leaves no trace on disk.
pub async fn execute(req: RunRequest<'_>) -> Result<RunOutcome, RunError> {
    let algo: HashAlgorithm = req
        .options
        .hash
        .parse()
        .map_err(|e: BundleError| RunError::InvalidConfig(e.to_string()))?;

    let signature_fingerprint = match &req.signer {
        Some(signer) if signer.fingerprint().is_empty() => {
            return Err(RunError::InvalidConfig(
                "signing requested without a signing identity".to_string(),
            ));
        }
        Some(signer) => signer.fingerprint().to_string(),
        None => String::new(),
    };

    let (engagement, operator) =
        req.store
            .authorize(req.engagement_id, req.options.operator.as_deref(), None)?;
    if engagement.scope.is_empty() {
        return Err(EngageError::ScopeViolation {
            engagement_id: engagement.id.clone(),
            detail: "engagement scope is empty".to_string(),
        }
        .into());
    }
    let engagement = engagement.clone();

    let mut targets = TargetSet::from_raw(&engagement.scope);
    if let Some(crawler) = &req.crawler {
        let opts = req.options.crawl.clone().unwrap_or_default();
        let added = expand_scope(&mut targets, crawler.as_ref(), &opts).await;
        info!(
            engagement_id = %engagement.id,
            seeds = engagement.scope.len(),
            added,
            "scope expansion finished"
        );
    }

    let mut run = CheckRun::new();
    run.start()?;
    info!(
        engagement_id = %engagement.id,
        operator = %operator,
        targets = targets.len(),
        checker = req.checker.name(),
        "check run started"
    );

    let dir = req.results_root.join(&engagement.id);
    let audit_log = Arc::new(AuditLog::open(&dir)?);
    let audit = audit_callback(
        Arc::clone(&audit_log),
        &engagement.id,
        &operator,
        &req.options.command,
    );

    let mut runner = Runner::new(RunnerConfig {
        concurrency: req.options.concurrency,
        rate_limit: req.options.rate_limit,
        timeout: req.options.timeout,
    });
    if let Some(progress) = &req.progress {
        runner = runner.with_progress(Arc::clone(progress));
    }

    let results = run_with_retries(
        &runner,
        targets.targets(),
        Arc::clone(&req.checker),
        audit,
        &req.cancel,
        req.options.retry_count,
    )
    .await;

    let cancelled = req.cancel.is_cancelled();
    if cancelled {
        warn!(
            engagement_id = %engagement.id,
            observed = results.len(),
            of = targets.len(),
            "run cancelled, finalizing partial results"
        );
    }

    match finalize(&req, &engagement, &operator, &run, algo, signature_fingerprint, results) {
        Ok((bundle, paths, telemetry, results)) => {
            if cancelled {
                run.cancel()?;
            } else {
                run.complete()?;
            }
            info!(
                engagement_id = %engagement.id,
                state = %run.state(),
                total = bundle.metadata.total_targets,
                "check run finished"
            );
            Ok(RunOutcome {
                engagement_id: engagement.id,
                operator,
                state: run.state(),
                cancelled,
                results,
                bundle,
                paths,
                telemetry,
            })
        }
        Err(e) => {
            run.fail()?;
            Err(e)
        }
    }
}

fn audit_callback(
    audit_log: Arc<AuditLog>,
    engagement_id: &str,
    operator: &str,
    command: &str,
) -> AuditCallback {
    let engagement_id = engagement_id.to_string();
    let operator = operator.to_string();
    let command = command.to_string();
    Arc::new(move |target, result, duration_seconds| {
        audit_log
            .append(&AuditEntry {
                engagement_id: engagement_id.clone(),
                operator: operator.clone(),
                command: command.clone(),
                target: target.to_string(),
                status: result.status.clone(),
                http_status: result.http_status,
                tls_expiry: result.tls_expiry.clone(),
                notes: result.notes.clone(),
                error: result.error.clone(),
                duration_seconds,
            })
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    })
}

type Finalized = (ResultBundle, BundlePaths, TelemetryRecord, Vec<CheckResult>);

fn finalize(
    req: &RunRequest<'_>,
    engagement: &Engagement,
    operator: &str,
    run: &CheckRun,
    algo: HashAlgorithm,
    signature_fingerprint: String,
    results: Vec<CheckResult>,
) -> Result<Finalized, RunError> {
    let dir = req.results_root.join(&engagement.id);
    let metadata = RunMetadata {
        operator: operator.to_string(),
        engagement_id: engagement.id.clone(),
        engagement_name: engagement.name.clone(),
        owner: engagement.owner.clone(),
        started_at: run.started_at(),
        completed_at: run.started_at(),
        audit_hash: String::new(),
        legacy_audit_hash: String::new(),
        hash_algorithm: String::new(),
        signature_fingerprint,
        total_targets: 0,
    };

    let stem = format!("{}_results", req.checker.name());
    let (bundle, paths) = write_bundle(&dir, &stem, metadata, results, algo)?;

    if let Some(signer) = &req.signer {
        signer.sign(&paths.audit_artifact)?;
        signer.sign(&paths.bundle_artifact)?;
    }
    if let Some(encryptor) = &req.encryptor {
        let ciphertext = encryptor.encrypt(&paths.audit)?;
        info!(path = %ciphertext.display(), "audit log encrypted");
    }

    let duration_seconds =
        (Utc::now() - run.started_at()).num_milliseconds() as f64 / 1000.0;
    let telemetry = TelemetryRecord::summarize(
        &req.options.command,
        &engagement.id,
        &bundle.results,
        duration_seconds,
    );
    TelemetryRecorder::new(&dir).record(&telemetry)?;

    let results = bundle.results.clone();
    Ok((bundle, paths, telemetry, results))
}
