//! Centralized configuration for Stowage.
//!
//! Compile-time constants live on unit structs grouped by concern. Runtime
//! settings that differ per installation live on [`ProvisionConfig`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Install pipeline constants.
pub struct InstallConfig;

impl InstallConfig {
    /// Files smaller than this are treated as corrupt (100 KB).
    pub const MIN_VALID_SIZE: u64 = 100_000;
    /// Extension the catalog accepts for model artifacts.
    pub const ARTIFACT_EXTENSION: &'static str = "gguf";
    /// Bytes previewed in logs when a download turns out to be too small.
    pub const CORRUPT_PREVIEW_BYTES: usize = 512;
    /// Suffix of the copy that is renamed over the destination once complete.
    pub const STAGING_SUFFIX: &'static str = ".partial";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Idle timeout between body reads (5 minutes).
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
    /// Upper bound for a whole transfer (1 day).
    pub const RESOURCE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
    pub const DOWNLOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const USER_AGENT: &'static str = "Stowage/0.1";
}

/// Event bus configuration.
pub struct EventsConfig;

impl EventsConfig {
    /// Events buffered per subscriber before new ones are dropped for it.
    pub const SUBSCRIBER_BUFFER: usize = 1024;
}

/// Storage handle configuration.
pub struct HandleConfig;

impl HandleConfig {
    /// Default lifetime of a storage handle before it must be renewed (30 days).
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);
}

/// Shared directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const APP_DIR_NAME: &'static str = "stowage";
    pub const MODELS_DIR_NAME: &'static str = "models";
    pub const CATALOG_DB_NAME: &'static str = "catalog.sqlite";
    pub const REGISTRY_FILE_NAME: &'static str = "registry.json";
    pub const INCOMING_DIR_NAME: &'static str = "stowage-incoming";
}

/// How the verifier treats artifacts with no registered digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPolicy {
    /// Skip verification when no digest is registered.
    #[default]
    TrustOnFirstUse,
    /// Fail verification when no digest is registered.
    RequireDigest,
}

impl VerificationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationPolicy::TrustOnFirstUse => "trust_on_first_use",
            VerificationPolicy::RequireDigest => "require_digest",
        }
    }
}

impl std::fmt::Display for VerificationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime configuration for one provisioning service instance.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Managed storage root; installed artifacts live directly under it.
    pub storage_root: PathBuf,
    /// Where transfers write their temporary files.
    pub incoming_dir: PathBuf,
    /// Size floor applied after download and after copy.
    pub min_valid_size: u64,
    /// Extension accepted by the catalog (without the dot).
    pub artifact_extension: String,
    pub verification_policy: VerificationPolicy,
    /// Lifetime of freshly issued storage handles.
    pub handle_lifetime: Duration,
}

impl ProvisionConfig {
    /// Defaults for a storage root; temp files go to the system temp dir.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            incoming_dir: std::env::temp_dir().join(PathsConfig::INCOMING_DIR_NAME),
            min_valid_size: InstallConfig::MIN_VALID_SIZE,
            artifact_extension: InstallConfig::ARTIFACT_EXTENSION.to_string(),
            verification_policy: VerificationPolicy::default(),
            handle_lifetime: HandleConfig::DEFAULT_LIFETIME,
        }
    }

    pub fn with_incoming_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.incoming_dir = dir.into();
        self
    }

    pub fn with_min_valid_size(mut self, bytes: u64) -> Self {
        self.min_valid_size = bytes;
        self
    }

    pub fn with_artifact_extension(mut self, extension: impl Into<String>) -> Self {
        self.artifact_extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_verification_policy(mut self, policy: VerificationPolicy) -> Self {
        self.verification_policy = policy;
        self
    }

    pub fn with_handle_lifetime(mut self, lifetime: Duration) -> Self {
        self.handle_lifetime = lifetime;
        self
    }
}
