//! Data model for SECA engagement check runs.
//!
//! Defines the result, metadata, bundle, and telemetry types shared between
//! the check engine, the evidence writers, and the CLI. Serde field order on
//! these structs is the canonical JSON field order of the archived files.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Check status ────────────────────────────────────────────────────────────

/// Status string for a successful check.
pub const STATUS_OK: &str = "ok";
/// Status string for a failed check.
pub const STATUS_ERROR: &str = "error";

/// Error string a checker reports when its deadline expired.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Error string a checker reports when the run was cancelled from outside.
pub const ERROR_CANCELLED: &str = "cancelled";

// ─── Check results ───────────────────────────────────────────────────────────

/// A single observation attached to a check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub severity: String,
    pub detail: String,
}

/// Outcome of one checker invocation against one target.
///
/// `status` is a plain string rather than an enum because plugin checkers
/// report it over a process boundary; comparisons are ASCII case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub target: String,
    pub checked_at: DateTime<Utc>,
    pub status: String,
    #[serde(default, skip_serializing_if = "http_status_is_unset")]
    pub http_status: u16,
    #[serde(default)]
    pub tls_expiry: String,
    #[serde(default)]
    pub server_header: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub error: String,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

fn http_status_is_unset(status: &u16) -> bool {
    *status == 0
}

impl CheckResult {
    /// A successful result stamped with the current time.
    pub fn ok(target: &str) -> Self {
        Self::base(target, STATUS_OK)
    }

    /// A failed result stamped with the current time. `error` must be
    /// non-empty per the checker contract.
    pub fn error(target: &str, error: impl Into<String>) -> Self {
        let mut r = Self::base(target, STATUS_ERROR);
        r.error = error.into();
        r
    }

    fn base(target: &str, status: &str) -> Self {
        Self {
            target: target.to_string(),
            checked_at: Utc::now(),
            status: status.to_string(),
            http_status: 0,
            tls_expiry: String::new(),
            server_header: String::new(),
            notes: String::new(),
            error: String::new(),
            response_time_ms: 0,
            findings: Vec::new(),
        }
    }

    /// Whether this result counts as a success (case-insensitive).
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_OK)
    }
}

// ─── Per-target attempt outcome ──────────────────────────────────────────────

/// Terminal classification of one dispatch attempt, used by the retry
/// supervisor to decide requeueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Ok,
    Error,
    Timeout,
}

impl AttemptOutcome {
    pub fn classify(result: &CheckResult) -> Self {
        if result.is_ok() {
            Self::Ok
        } else if result.error.eq_ignore_ascii_case(ERROR_TIMEOUT) {
            Self::Timeout
        } else {
            Self::Error
        }
    }

    /// Attempts that did not succeed are eligible for another attempt.
    pub fn needs_retry(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

// ─── Run state machine ───────────────────────────────────────────────────────

/// Lifecycle of one check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    #[default]
    New,
    Running,
    Completed,
    Cancelled,
    Errored,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Errored => "ERRORED",
        };
        write!(f, "{s}")
    }
}

// ─── Run metadata & bundle ───────────────────────────────────────────────────

/// Metadata block of a result bundle. Field order here is the canonical JSON
/// field order of the archived `*_results.json` files.
///
/// `legacy_audit_hash` serializes as `audit_sha256` and is populated only
/// when the hash algorithm is sha256, so sha512 digests are never aliased
/// under a misleading name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub operator: String,
    pub engagement_id: String,
    pub engagement_name: String,
    pub owner: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub audit_hash: String,
    #[serde(rename = "audit_sha256", default)]
    pub legacy_audit_hash: String,
    pub hash_algorithm: String,
    pub signature_fingerprint: String,
    pub total_targets: usize,
}

/// The canonical per-run evidence document: metadata plus results in input
/// target order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBundle {
    pub metadata: RunMetadata,
    pub results: Vec<CheckResult>,
}

// ─── Telemetry ───────────────────────────────────────────────────────────────

/// One line of the per-engagement `telemetry.jsonl` feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub engagement_id: String,
    pub target_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub success_rate: f64,
    pub duration_seconds: f64,
    pub avg_duration_per_check: f64,
}

impl TelemetryRecord {
    /// Summarize the final results of a run.
    pub fn summarize(
        command: &str,
        engagement_id: &str,
        results: &[CheckResult],
        duration_seconds: f64,
    ) -> Self {
        let total = results.len();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let (rate, avg) = if total > 0 {
            (
                100.0 * ok as f64 / total as f64,
                duration_seconds / total as f64,
            )
        } else {
            (0.0, 0.0)
        };
        Self {
            timestamp: Utc::now(),
            command: command.to_string(),
            engagement_id: engagement_id.to_string(),
            target_count: total,
            success_count: ok,
            error_count: total - ok,
            success_rate: rate,
            duration_seconds,
            avg_duration_per_check: avg,
        }
    }
}
