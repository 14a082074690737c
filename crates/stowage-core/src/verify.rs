//! Integrity verification of finished downloads.
//!
//! The verifier hashes a file with SHA-256 and compares the result against
//! the digest registered for the artifact's name. What happens when no
//! digest is registered is decided by [`VerificationPolicy`].

use crate::config::VerificationPolicy;
use crate::error::{Result, StowageError};
use crate::registry::ArtifactRegistry;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Chunk size for reading files (8MB).
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Why a verification failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// The file hashed to something other than the registered digest.
    DigestDiffers { expected: String, actual: String },
    /// No digest is registered and the policy requires one.
    NoDigestRegistered { actual: String },
}

/// Outcome of verifying one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// No digest registered; trusted under the trust-on-first-use policy.
    Skipped,
    Passed,
    Failed(Mismatch),
}

impl VerificationResult {
    /// Whether the install pipeline may proceed.
    pub fn is_acceptable(&self) -> bool {
        !matches!(self, VerificationResult::Failed(_))
    }

    /// Convert a failed result into a `VerificationFailure` error.
    pub fn into_result(self, artifact_name: &str) -> Result<Self> {
        match self {
            VerificationResult::Failed(Mismatch::DigestDiffers { expected, actual }) => {
                Err(StowageError::VerificationFailure {
                    artifact: artifact_name.to_string(),
                    expected,
                    actual,
                })
            }
            VerificationResult::Failed(Mismatch::NoDigestRegistered { actual }) => {
                Err(StowageError::VerificationFailure {
                    artifact: artifact_name.to_string(),
                    expected: "<none registered>".to_string(),
                    actual,
                })
            }
            other => Ok(other),
        }
    }
}

/// Compute the SHA-256 of a file as lowercase hex.
pub fn compute_sha256_blocking(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| StowageError::io_with_path(e, path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| StowageError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 of a file on the blocking thread pool.
pub async fn compute_sha256(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || compute_sha256_blocking(&path))
        .await
        .map_err(|e| StowageError::Other(format!("Hash computation task failed: {}", e)))?
}

/// Compare a file against an optional expected digest under a policy.
///
/// Deterministic: the result depends only on the file bytes, `expected`
/// and `policy`. Hex comparison ignores case.
pub fn check_digest(
    path: &Path,
    expected: Option<&str>,
    policy: VerificationPolicy,
) -> Result<VerificationResult> {
    match (expected, policy) {
        (None, VerificationPolicy::TrustOnFirstUse) => Ok(VerificationResult::Skipped),
        (None, VerificationPolicy::RequireDigest) => {
            let actual = compute_sha256_blocking(path)?;
            Ok(VerificationResult::Failed(Mismatch::NoDigestRegistered {
                actual,
            }))
        }
        (Some(expected), _) => {
            let actual = compute_sha256_blocking(path)?;
            if actual.eq_ignore_ascii_case(expected.trim()) {
                Ok(VerificationResult::Passed)
            } else {
                Ok(VerificationResult::Failed(Mismatch::DigestDiffers {
                    expected: expected.trim().to_ascii_lowercase(),
                    actual,
                }))
            }
        }
    }
}

/// Verifies files against the registry's expected digests.
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    registry: Arc<ArtifactRegistry>,
    policy: VerificationPolicy,
}

impl IntegrityVerifier {
    pub fn new(registry: Arc<ArtifactRegistry>, policy: VerificationPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    /// Verify `path` as the artifact `artifact_name`.
    ///
    /// Errors only when the file cannot be read; a digest mismatch is a
    /// [`VerificationResult::Failed`], not an error.
    pub async fn verify(
        &self,
        path: impl AsRef<Path>,
        artifact_name: &str,
    ) -> Result<VerificationResult> {
        let path = path.as_ref().to_path_buf();
        let expected = self
            .registry
            .expected_digest(artifact_name)
            .map(str::to_string);
        let policy = self.policy;

        if expected.is_none() && policy == VerificationPolicy::TrustOnFirstUse {
            debug!("No digest registered for {}, skipping verification", artifact_name);
            return Ok(VerificationResult::Skipped);
        }

        let result = tokio::task::spawn_blocking(move || {
            check_digest(&path, expected.as_deref(), policy)
        })
        .await
        .map_err(|e| StowageError::Other(format!("Verification task failed: {}", e)))??;

        match &result {
            VerificationResult::Failed(Mismatch::DigestDiffers { expected, actual }) => warn!(
                "Digest mismatch for {}: expected {}, got {}",
                artifact_name, expected, actual
            ),
            VerificationResult::Failed(Mismatch::NoDigestRegistered { actual }) => warn!(
                "No digest registered for {} under {} policy (sha256 {})",
                artifact_name, policy, actual
            ),
            _ => debug!("Verified {}: {:?}", artifact_name, result),
        }
        Ok(result)
    }
}
