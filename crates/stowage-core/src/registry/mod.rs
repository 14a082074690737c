//! Known-artifact registry: expected digests and backup sources.
//!
//! The registry is static data consulted by the verifier (expected SHA-256
//! per artifact name) and by callers deciding where to retry a failed
//! download (alternate source locators per artifact name). It is loaded from
//! a JSON file layered over the built-in backup table.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_json};

use crate::error::{Result, StowageError};
use crate::source::SourceLocator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Backup sources shipped with the crate, keyed by artifact file name.
const BUILTIN_BACKUPS: &[(&str, &str)] = &[
    (
        "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
        "https://huggingface.co/bartowski/Llama-3.2-3B-Instruct-GGUF/resolve/main/Llama-3.2-3B-Instruct-Q4_K_M.gguf?download=true",
    ),
    (
        "llama-3-8b-instruct.Q4_K_M.gguf",
        "https://huggingface.co/bartowski/Llama-3-8B-GGUF/resolve/main/llama-3-8b-instruct.Q4_K_M.gguf?download=true",
    ),
    (
        "phi-3-mini-4k-instruct-q4_k_m.gguf",
        "https://huggingface.co/bartowski/phi-3-mini-4k-instruct-GGUF/resolve/main/phi-3-mini-4k-instruct-q4_k_m.gguf?download=true",
    ),
    (
        "ReWiz-Phi-4-14B.Q4_K_M.gguf",
        "https://huggingface.co/theprint/ReWiz-Phi-4-14B-GGUF/resolve/main/ReWiz-Phi-4-14B.Q4_K_M.gguf?download=true",
    ),
];

/// Alternate source locators per artifact file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupSourceTable {
    entries: BTreeMap<String, Vec<SourceLocator>>,
}

impl BackupSourceTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The table shipped with the crate.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (name, url) in BUILTIN_BACKUPS {
            match SourceLocator::parse(url) {
                Ok(source) => table.insert(*name, source),
                Err(e) => warn!("Skipping invalid built-in backup for {}: {}", name, e),
            }
        }
        table
    }

    /// Append a backup source for an artifact. Duplicates are ignored.
    pub fn insert(&mut self, artifact_name: impl Into<String>, source: SourceLocator) {
        let sources = self.entries.entry(artifact_name.into()).or_default();
        if !sources.contains(&source) {
            sources.push(source);
        }
    }

    /// All backup sources for an artifact, in preference order.
    pub fn sources_for(&self, artifact_name: &str) -> &[SourceLocator] {
        self.entries
            .get(artifact_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First backup source for an artifact that is not in `tried`.
    pub fn next_untried(
        &self,
        artifact_name: &str,
        tried: &[SourceLocator],
    ) -> Option<&SourceLocator> {
        self.sources_for(artifact_name)
            .iter()
            .find(|candidate| !tried.contains(candidate))
    }

    /// Layer `other` on top of this table; its sources come first.
    pub fn merge(&mut self, other: BackupSourceTable) {
        for (name, sources) in other.entries {
            let existing = self.entries.remove(&name).unwrap_or_default();
            let mut merged = sources;
            for source in existing {
                if !merged.contains(&source) {
                    merged.push(source);
                }
            }
            self.entries.insert(name, merged);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// On-disk shape of `registry.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    digests: BTreeMap<String, String>,
    #[serde(default)]
    backups: BackupSourceTable,
}

/// Expected digests and backup sources for known artifacts.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    digests: BTreeMap<String, String>,
    backups: BackupSourceTable,
}

impl ArtifactRegistry {
    /// A registry with no digests and no backups.
    pub fn empty() -> Self {
        Self::default()
    }

    /// No digests, built-in backup sources.
    pub fn builtin() -> Self {
        Self {
            digests: BTreeMap::new(),
            backups: BackupSourceTable::builtin(),
        }
    }

    /// Load a registry file layered over the built-in table.
    ///
    /// A missing file yields the built-in registry.
    pub fn load(path: &Path) -> Result<Self> {
        let mut registry = Self::builtin();
        match atomic_read_json::<RegistryFile>(path)? {
            Some(file) => {
                for (name, digest) in file.digests {
                    registry.register_digest(name, &digest)?;
                }
                registry.backups.merge(file.backups);
                info!(
                    "Loaded registry {} ({} digests, {} backup entries)",
                    path.display(),
                    registry.digests.len(),
                    registry.backups.len()
                );
            }
            None => debug!("No registry at {}, using built-in table", path.display()),
        }
        Ok(registry)
    }

    /// Persist digests and backups to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = RegistryFile {
            digests: self.digests.clone(),
            backups: self.backups.clone(),
        };
        atomic_write_json(path, &file, true)
    }

    /// Register the expected SHA-256 for an artifact name.
    ///
    /// The digest must be 64 hex characters; it is stored lowercase.
    pub fn register_digest(
        &mut self,
        artifact_name: impl Into<String>,
        hex_digest: &str,
    ) -> Result<()> {
        let artifact_name = artifact_name.into();
        let normalized = hex_digest.trim().to_ascii_lowercase();
        if normalized.len() != 64 || !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StowageError::Config {
                message: format!(
                    "Digest for {} is not a SHA-256 hex string: {}",
                    artifact_name, hex_digest
                ),
            });
        }
        self.digests.insert(artifact_name, normalized);
        Ok(())
    }

    /// Expected digest for an artifact name, if registered.
    pub fn expected_digest(&self, artifact_name: &str) -> Option<&str> {
        self.digests.get(artifact_name).map(String::as_str)
    }

    pub fn backups(&self) -> &BackupSourceTable {
        &self.backups
    }

    pub fn backups_mut(&mut self) -> &mut BackupSourceTable {
        &mut self.backups
    }
}
