//! Newline-delimited per-run telemetry for trend analysis.
//!
//! One [`TelemetryRecord`] is appended per run to the engagement's
//! `telemetry.jsonl`, newest at the file end. Each append is a single write
//! of one JSON line.

#![forbid(unsafe_code)]

use seca_proto::TelemetryRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Telemetry file basename inside an engagement's results directory.
pub const TELEMETRY_FILE: &str = "telemetry.jsonl";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Appends run summaries to an engagement's telemetry log.
pub struct TelemetryRecorder {
    path: PathBuf,
}

impl TelemetryRecorder {
    /// Recorder for `dir` (`<results_root>/<engagement_id>`).
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(TELEMETRY_FILE),
        }
    }

    /// Append one record as a single `line + \n` write.
    pub fn record(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read the newest `limit` records for an engagement, oldest first.
/// Malformed lines are skipped with a warning rather than failing the read.
pub fn read_recent(
    dir: &Path,
    engagement_id: &str,
    limit: usize,
) -> Result<Vec<TelemetryRecord>, TelemetryError> {
    let path = dir.join(TELEMETRY_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(&path)?;
    let mut records = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TelemetryRecord>(line) {
            Ok(record) if record.engagement_id == engagement_id => records.push(record),
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed telemetry line"),
        }
    }

    if records.len() > limit {
        records.drain(..records.len() - limit);
    }
    Ok(records)
}
