//! Result bundle writer and integrity artifacts.
//!
//! The bundle must carry the audit-log hash, yet the bundle file is hashed
//! too, so the writer runs two passes: pass one with an empty `audit_hash`,
//! then the audit file is hashed and sealed, then pass two rewrites the
//! bundle with the hash filled in and hashes that final byte stream. The
//! bundle's own hash lives only in its sidecar artifact.

#![forbid(unsafe_code)]

use chrono::Utc;
use seca_audit::{AUDIT_FILE, AuditLog};
use seca_proto::{CheckResult, ResultBundle, RunMetadata};
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Legacy bundle file stem accepted on read-back only.
pub const LEGACY_RESULTS_STEM: &str = "results";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("unknown hash algorithm {0:?} (expected sha256 or sha512)")]
    UnknownAlgorithm(String),

    #[error("no result bundle found under {0}")]
    BundleNotFound(PathBuf),

    #[error("missing hash artifact {0}")]
    MissingArtifact(PathBuf),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("audit log error: {0}")]
    Audit(#[from] seca_audit::AuditError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ─── Hash algorithms ─────────────────────────────────────────────────────────

/// Supported digest algorithms for evidence files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Artifact file extension (equals the algorithm name).
    pub fn extension(&self) -> &'static str {
        self.name()
    }

    /// Lowercase hex digest of a file's bytes.
    pub fn digest_file(&self, path: &Path) -> Result<String, BundleError> {
        let mut file = File::open(path)?;
        let digest = match self {
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                std::io::copy(&mut file, &mut hasher)?;
                hex::encode(hasher.finalize())
            }
            Self::Sha512 => {
                let mut hasher = Sha512::new();
                std::io::copy(&mut file, &mut hasher)?;
                hex::encode(hasher.finalize())
            }
        };
        Ok(digest)
    }
}

impl FromStr for HashAlgorithm {
    type Err = BundleError;

    /// Case-insensitive, whitespace-trimmed; the empty string selects
    /// sha256.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(BundleError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ─── Hash artifacts ──────────────────────────────────────────────────────────

/// Path of the hash artifact that seals `file`.
pub fn artifact_path(file: &Path, algo: HashAlgorithm) -> PathBuf {
    let mut name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(algo.extension());
    file.with_file_name(name)
}

/// Hash `file` and write its sidecar artifact, `"<hex>  <basename>\n"`
/// (two spaces, sha*sum convention). Returns the artifact path and digest.
pub fn write_artifact(
    file: &Path,
    algo: HashAlgorithm,
) -> Result<(PathBuf, String), BundleError> {
    let digest = algo.digest_file(file)?;
    let basename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let artifact = artifact_path(file, algo);
    std::fs::write(&artifact, format!("{digest}  {basename}\n"))?;
    debug!(file = %file.display(), algo = algo.name(), "hash artifact written");
    Ok((artifact, digest))
}

/// Re-hash `file` and compare against its artifact's recorded digest.
pub fn verify_artifact(file: &Path, algo: HashAlgorithm) -> Result<bool, BundleError> {
    let artifact = artifact_path(file, algo);
    if !artifact.exists() {
        return Err(BundleError::MissingArtifact(artifact));
    }
    let recorded = std::fs::read_to_string(&artifact)?;
    let recorded_hex = recorded.split_whitespace().next().unwrap_or_default();
    Ok(recorded_hex == algo.digest_file(file)?)
}

// ─── Bundle writer ───────────────────────────────────────────────────────────

/// Everything the two-pass write produced.
#[derive(Debug, Clone)]
pub struct BundlePaths {
    pub bundle: PathBuf,
    pub bundle_artifact: PathBuf,
    pub bundle_hash: String,
    pub audit: PathBuf,
    pub audit_artifact: PathBuf,
    pub audit_hash: String,
}

fn canonical_json(bundle: &ResultBundle) -> Result<String, BundleError> {
    // 2-space indent, struct declaration order; one trailing newline so the
    // file matches what sha*sum-style tooling expects to hash.
    let mut json = serde_json::to_string_pretty(bundle)?;
    json.push('\n');
    Ok(json)
}

/// Write the canonical result bundle for a run into `dir`
/// (`<results_root>/<engagement_id>`), sealing the audit log on the way.
///
/// `metadata` arrives without completion fields; this writer stamps
/// `completed_at`, `total_targets`, `hash_algorithm`, and both audit-hash
/// fields. The bundle file is `<stem>.json` (e.g. `http_results.json`).
pub fn write_bundle(
    dir: &Path,
    stem: &str,
    mut metadata: RunMetadata,
    results: Vec<CheckResult>,
    algo: HashAlgorithm,
) -> Result<(ResultBundle, BundlePaths), BundleError> {
    std::fs::create_dir_all(dir)?;
    let bundle_path = dir.join(format!("{stem}.json"));
    let audit_path = dir.join(AUDIT_FILE);

    metadata.completed_at = Utc::now();
    metadata.total_targets = results.len();
    metadata.hash_algorithm = algo.name().to_string();
    metadata.audit_hash = String::new();
    metadata.legacy_audit_hash = String::new();

    let mut bundle = ResultBundle { metadata, results };

    // Pass one: bundle with an empty audit hash, so the audit file can be
    // sealed while the bundle already exists on disk.
    std::fs::write(&bundle_path, canonical_json(&bundle)?)?;

    // Seal the audit log as it stands. A run that never appended still
    // gets a header-only file so verification always has a subject.
    AuditLog::ensure(&audit_path)?;
    let (audit_artifact, audit_hash) = write_artifact(&audit_path, algo)?;

    // Pass two: identical bundle with the audit hash filled in; only this
    // byte stream is hashed.
    bundle.metadata.audit_hash = audit_hash.clone();
    bundle.metadata.legacy_audit_hash = match algo {
        HashAlgorithm::Sha256 => audit_hash.clone(),
        HashAlgorithm::Sha512 => String::new(),
    };
    std::fs::write(&bundle_path, canonical_json(&bundle)?)?;
    let (bundle_artifact, bundle_hash) = write_artifact(&bundle_path, algo)?;

    info!(
        bundle = %bundle_path.display(),
        targets = bundle.metadata.total_targets,
        algo = algo.name(),
        "result bundle sealed"
    );

    Ok((
        bundle,
        BundlePaths {
            bundle: bundle_path,
            bundle_artifact,
            bundle_hash,
            audit: audit_path,
            audit_artifact,
            audit_hash,
        },
    ))
}

/// Read a bundle back from `dir`. Tries `<stem>.json`, then the legacy
/// `results.json` name kept for pre-existing archives.
pub fn read_bundle(dir: &Path, stem: &str) -> Result<ResultBundle, BundleError> {
    for candidate in [stem, LEGACY_RESULTS_STEM] {
        let path = dir.join(format!("{candidate}.json"));
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            return Ok(serde_json::from_str(&content)?);
        }
    }
    Err(BundleError::BundleNotFound(dir.to_path_buf()))
}

/// Verification outcome for one archived run.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub audit_matches: bool,
    pub bundle_matches: bool,
    /// Whether the audit hash recorded inside the bundle equals the audit
    /// artifact's digest.
    pub metadata_matches: bool,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.audit_matches && self.bundle_matches && self.metadata_matches
    }
}

/// Verify an engagement directory: audit file against its artifact, bundle
/// file against its artifact, and the in-bundle audit hash against the
/// freshly computed one.
pub fn verify_dir(dir: &Path, stem: &str, algo: HashAlgorithm) -> Result<VerifyReport, BundleError> {
    let audit_path = dir.join(AUDIT_FILE);
    let bundle = read_bundle(dir, stem)?;
    let bundle_path = dir.join(format!("{stem}.json"));

    let audit_matches = verify_artifact(&audit_path, algo)?;
    let bundle_matches = verify_artifact(&bundle_path, algo)?;
    let metadata_matches = bundle.metadata.audit_hash == algo.digest_file(&audit_path)?;

    Ok(VerifyReport {
        audit_matches,
        bundle_matches,
        metadata_matches,
    })
}

// ─── Signing & encryption seams ──────────────────────────────────────────────

/// Detached-signature producer invoked on each hash artifact after bundle
/// finalization. Implementations (external GPG and the like) live outside
/// the core.
pub trait Signer: Send + Sync {
    /// Identity recorded in the bundle metadata.
    fn fingerprint(&self) -> &str;

    fn sign(&self, path: &Path) -> Result<(), BundleError>;
}

/// Encrypts the audit log after sealing, returning the ciphertext path
/// (`<audit>.<ext>`).
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, path: &Path) -> Result<PathBuf, BundleError>;
}
