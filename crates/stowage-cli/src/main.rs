//! Stowage CLI - download, verify and manage local model artifacts.
//!
//! This binary is a thin caller of stowage-core. It renders orchestrator
//! events as log lines and owns the retry-from-backup decision.

mod commands;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use stowage_core::config::PathsConfig;
use stowage_core::gallery::ModelCategory;
use stowage_core::{ArtifactRegistry, ProvisionConfig, SqliteCatalog, VerificationPolicy};
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "stowage")]
#[command(about = "Download and catalogue local model artifacts")]
struct Args {
    /// Managed storage root (defaults to <data dir>/stowage/models)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Directory holding the catalog database and registry (defaults to <data dir>/stowage)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Registry file with expected digests and backup sources
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Reject artifacts that have no registered digest
    #[arg(long, global = true)]
    strict: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and install an artifact from a URL or gallery model name
    Fetch {
        target: String,
        /// Do not retry from backup sources on failure
        #[arg(long)]
        no_backup: bool,
    },
    /// List the curated model gallery
    Gallery {
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,
    },
    /// List installed artifacts
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an installed artifact and its catalog record
    Remove { name: String },
    /// Check a file against the registered digest
    Verify {
        file: PathBuf,
        /// Artifact name to look up (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the SHA-256 of a file
    Digest {
        file: PathBuf,
        /// Record the digest in the registry under this artifact name
        #[arg(long)]
        register: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CategoryArg {
    Small,
    Medium,
    Large,
}

impl From<CategoryArg> for ModelCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Small => ModelCategory::Small,
            CategoryArg::Medium => ModelCategory::Medium,
            CategoryArg::Large => ModelCategory::Large,
        }
    }
}

/// Resolved locations and policy shared by every command.
pub(crate) struct Context {
    pub storage_root: PathBuf,
    pub state_dir: PathBuf,
    pub registry_path: PathBuf,
    pub policy: VerificationPolicy,
}

impl Context {
    fn from_args(args: &Args) -> Result<Self> {
        let app_dir = || {
            dirs::data_dir()
                .map(|dir| dir.join(PathsConfig::APP_DIR_NAME))
                .context("Could not determine the user data directory; pass --root and --state-dir")
        };

        let state_dir = match &args.state_dir {
            Some(dir) => dir.clone(),
            None => app_dir()?,
        };
        let storage_root = match &args.root {
            Some(root) => root.clone(),
            None => app_dir()?.join(PathsConfig::MODELS_DIR_NAME),
        };
        let registry_path = args
            .registry
            .clone()
            .unwrap_or_else(|| state_dir.join(PathsConfig::REGISTRY_FILE_NAME));
        let policy = if args.strict {
            VerificationPolicy::RequireDigest
        } else {
            VerificationPolicy::TrustOnFirstUse
        };

        Ok(Self {
            storage_root,
            state_dir,
            registry_path,
            policy,
        })
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.state_dir.join(PathsConfig::CATALOG_DB_NAME)
    }

    pub fn provision_config(&self) -> ProvisionConfig {
        ProvisionConfig::new(&self.storage_root).with_verification_policy(self.policy)
    }

    pub fn load_registry(&self) -> Result<ArtifactRegistry> {
        ArtifactRegistry::load(&self.registry_path)
            .with_context(|| format!("Failed to load registry {}", self.registry_path.display()))
    }

    pub fn open_catalog(&self) -> Result<SqliteCatalog> {
        let path = self.catalog_path();
        SqliteCatalog::open(&path)
            .with_context(|| format!("Failed to open catalog {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG overrides --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let ctx = Context::from_args(&args)?;
    debug!(
        "Storage root {}, state dir {}",
        ctx.storage_root.display(),
        ctx.state_dir.display()
    );

    match args.command {
        Command::Fetch { target, no_backup } => commands::fetch(&ctx, &target, no_backup).await,
        Command::Gallery { category } => {
            commands::list_gallery(category.map(ModelCategory::from));
            Ok(())
        }
        Command::List { json } => commands::list(&ctx, json),
        Command::Remove { name } => commands::remove(&ctx, &name),
        Command::Verify { file, name } => commands::verify(&ctx, &file, name.as_deref()).await,
        Command::Digest { file, register } => {
            commands::digest(&ctx, &file, register.as_deref()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_paths_and_strict_policy() {
        let args = Args::parse_from([
            "stowage",
            "--root",
            "/data/models",
            "--state-dir",
            "/data/state",
            "--strict",
            "list",
        ]);
        let ctx = Context::from_args(&args).unwrap();

        assert_eq!(ctx.storage_root, PathBuf::from("/data/models"));
        assert_eq!(ctx.catalog_path(), PathBuf::from("/data/state/catalog.sqlite"));
        assert_eq!(ctx.registry_path, PathBuf::from("/data/state/registry.json"));
        assert_eq!(ctx.policy, VerificationPolicy::RequireDigest);
    }

    #[test]
    fn test_fetch_flags_parse() {
        let args = Args::parse_from(["stowage", "fetch", "Gemma-3-1B-Instruct", "--no-backup"]);
        match args.command {
            Command::Fetch { target, no_backup } => {
                assert_eq!(target, "Gemma-3-1B-Instruct");
                assert!(no_backup);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
