//! Append-only CSV audit log for SECA check runs.
//!
//! One `audit.csv` per engagement records every checker invocation. The file
//! is the audit of record: rows are appended once, flushed before the append
//! returns, and never rewritten. A [`RawRecorder`] writes optional
//! `raw_<unixnano>.txt` sidecars that are excluded from hashing.

#![forbid(unsafe_code)]

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Audit file basename inside an engagement's results directory.
pub const AUDIT_FILE: &str = "audit.csv";

/// Fixed column order of the audit log.
pub const AUDIT_COLUMNS: [&str; 11] = [
    "timestamp",
    "engagement_id",
    "operator",
    "command",
    "target",
    "status",
    "http_status",
    "tls_expiry",
    "notes",
    "error",
    "duration_seconds",
];

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// One audit row, minus the timestamp (stamped at append time).
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub engagement_id: String,
    pub operator: String,
    pub command: String,
    pub target: String,
    pub status: String,
    pub http_status: u16,
    pub tls_expiry: String,
    pub notes: String,
    pub error: String,
    pub duration_seconds: f64,
}

// ─── Audit log ───────────────────────────────────────────────────────────────

/// Append-only writer over an engagement's `audit.csv`.
///
/// The CSV writer is owned by a mutex for the lifetime of the run so no two
/// workers can interleave fields of a row.
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl AuditLog {
    /// Open (creating if necessary) the audit log inside `dir`. The header
    /// row is written iff the file did not previously exist.
    pub fn open(dir: &Path) -> Result<Self, AuditError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(AUDIT_FILE);
        let is_new = !path.exists();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(AUDIT_COLUMNS)?;
            writer.flush()?;
            debug!(path = %path.display(), "created audit log");
        }

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// Create `path` as an empty audit log (header only) if it is absent.
    /// Used by the bundle writer so a hash can always be taken.
    pub fn ensure(path: &Path) -> Result<(), AuditError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(AUDIT_COLUMNS)?;
        writer.flush()?;
        Ok(())
    }

    /// Append one row and flush it to disk before returning. The timestamp
    /// is RFC3339 UTC at the moment of append; the duration is fixed
    /// 3-decimal.
    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let http_status = entry.http_status.to_string();
        let duration = format!("{:.3}", entry.duration_seconds);

        let mut writer = self.writer.lock();
        writer.write_record([
            timestamp.as_str(),
            entry.engagement_id.as_str(),
            entry.operator.as_str(),
            entry.command.as_str(),
            entry.target.as_str(),
            entry.status.as_str(),
            http_status.as_str(),
            entry.tls_expiry.as_str(),
            entry.notes.as_str(),
            entry.error.as_str(),
            duration.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ─── Raw capture sidecars ────────────────────────────────────────────────────

/// Writes `raw_<unixnano>.txt` sidecars with all response headers and a
/// bounded body snippet.
pub struct RawRecorder {
    dir: PathBuf,
    max_body: usize,
}

impl RawRecorder {
    pub fn new(dir: &Path, max_body: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            max_body,
        }
    }

    /// Write one capture. Returns the sidecar path.
    pub fn capture(
        &self,
        target: &str,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<PathBuf, AuditError> {
        std::fs::create_dir_all(&self.dir)?;
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = self.dir.join(format!("raw_{nanos}.txt"));

        let mut content = format!("target: {target}\n\n");
        for (name, value) in headers {
            content.push_str(name);
            content.push_str(": ");
            content.push_str(value);
            content.push('\n');
        }
        content.push('\n');
        let snippet: String = body.chars().take(self.max_body).collect();
        content.push_str(&snippet);
        content.push('\n');

        std::fs::write(&path, content)?;
        Ok(path)
    }
}
