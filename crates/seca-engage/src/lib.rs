//! Engagement catalog and authorization gate.
//!
//! An engagement is the written testing contract a run executes under. The
//! gate enforces, in order: filesystem-safe engagement id, acknowledged
//! rules of engagement, activity window, operator identity, and scope
//! membership. Every failure surfaces as a distinct error kind so callers
//! can map them to exit codes.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use seca_scope::TargetSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngageError {
    #[error("engagement '{0}' not found")]
    NotFound(String),

    #[error("invalid engagement id {0:?}: must be a non-empty filesystem-safe segment")]
    InvalidId(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("scope violation in engagement '{engagement_id}': {detail}")]
    ScopeViolation {
        engagement_id: String,
        detail: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ─── Engagement model ────────────────────────────────────────────────────────

/// An authorized testing contract. Read-only to the check engine; the
/// catalog is maintained externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engagement {
    pub id: String,
    pub name: String,
    pub owner: String,
    /// Rules-of-engagement text the operator must acknowledge.
    pub roe: String,
    pub roe_acknowledged: bool,
    /// Raw scope entries in the order the contract lists them.
    pub scope: Vec<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Engagement {
    /// Whether `target` is inside the engagement scope, compared on
    /// canonical forms.
    pub fn in_scope(&self, target: &str) -> bool {
        TargetSet::from_raw(&self.scope).contains(target)
    }

    /// Whether `now` falls inside the activity window. Open bounds pass.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        if self.start.is_some_and(|s| now < s) {
            return false;
        }
        if self.end.is_some_and(|e| now > e) {
            return false;
        }
        true
    }
}

/// Validate that an engagement id is safe to use as a filesystem path
/// segment. Dots are rejected entirely, which also covers `.` and `..`.
pub fn validate_engagement_id(id: &str) -> Result<(), EngageError> {
    if id.is_empty() || id.contains(['/', '\\', '.']) {
        return Err(EngageError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Resolve the operator identity: caller-supplied, else `USER`, else
/// `LOGNAME`. A run without an operator is unauthorized.
pub fn resolve_operator(explicit: Option<&str>) -> Result<String, EngageError> {
    if let Some(op) = explicit {
        let op = op.trim();
        if !op.is_empty() {
            return Ok(op.to_string());
        }
    }
    for var in ["USER", "LOGNAME"] {
        if let Ok(v) = std::env::var(var)
            && !v.is_empty()
        {
            return Ok(v);
        }
    }
    Err(EngageError::Unauthorized(
        "operator identity not supplied and not present in environment".to_string(),
    ))
}

// ─── Engagement store ────────────────────────────────────────────────────────

/// Read-only view of the engagement catalog, loaded from a JSON file that
/// maps engagement id to [`Engagement`].
pub struct EngagementStore {
    engagements: HashMap<String, Engagement>,
}

impl EngagementStore {
    /// Load the catalog from disk. A missing or corrupt file yields an
    /// empty catalog; lookups then fail with `NotFound`.
    pub fn load(path: &Path) -> Self {
        let engagements = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt engagement catalog, treating as empty");
                HashMap::new()
            }),
            Err(_) => {
                debug!(path = %path.display(), "no engagement catalog at path");
                HashMap::new()
            }
        };
        Self { engagements }
    }

    /// Build a store directly from engagements (tests, embedding callers).
    pub fn from_engagements<I: IntoIterator<Item = Engagement>>(items: I) -> Self {
        Self {
            engagements: items.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Result<&Engagement, EngageError> {
        self.engagements
            .get(id)
            .ok_or_else(|| EngageError::NotFound(id.to_string()))
    }

    /// Engagements sorted by id.
    pub fn list(&self) -> Vec<&Engagement> {
        let mut all: Vec<&Engagement> = self.engagements.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Run the full authorization gate for a prospective run. Returns the
    /// engagement and the resolved operator identity.
    ///
    /// Order matters: the id is validated before any lookup so an unsafe id
    /// can never reach a filesystem path.
    pub fn authorize(
        &self,
        engagement_id: &str,
        operator: Option<&str>,
        target: Option<&str>,
    ) -> Result<(&Engagement, String), EngageError> {
        validate_engagement_id(engagement_id)?;
        let engagement = self.get(engagement_id)?;

        if !engagement.roe_acknowledged {
            return Err(EngageError::Unauthorized(format!(
                "rules of engagement not acknowledged for '{engagement_id}'"
            )));
        }
        if !engagement.window_contains(Utc::now()) {
            return Err(EngageError::Unauthorized(format!(
                "engagement '{engagement_id}' is outside its activity window"
            )));
        }

        let operator = resolve_operator(operator)?;

        if let Some(target) = target
            && !engagement.in_scope(target)
        {
            return Err(EngageError::ScopeViolation {
                engagement_id: engagement_id.to_string(),
                detail: format!("target '{target}' is not in scope"),
            });
        }

        debug!(engagement_id, operator = %operator, "authorization gate passed");
        Ok((engagement, operator))
    }
}
