//! Command implementations.

use crate::Context;
use anyhow::{bail, Context as _, Result};
use std::path::Path;
use std::sync::Arc;
use stowage_core::gallery::{self, ModelCategory};
use stowage_core::{
    compute_sha256, CatalogStore, DownloadEvent, DownloadOrchestrator, IntegrityVerifier, Mismatch,
    SourceLocator, StatusBoard, VerificationResult,
};
use tracing::{info, warn};

/// Accept either a URL or the name of a gallery model.
fn resolve_target(target: &str) -> Result<SourceLocator> {
    if let Some(model) = gallery::find(target) {
        info!("Using gallery model {} ({})", model.name, model.size);
        return Ok(model.source()?);
    }
    Ok(SourceLocator::parse(target)?)
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

pub async fn fetch(ctx: &Context, target: &str, no_backup: bool) -> Result<()> {
    let mut current = resolve_target(target)?;
    let registry = Arc::new(ctx.load_registry()?);
    let orchestrator = DownloadOrchestrator::builder(ctx.provision_config())
        .auto_create_dirs(true)
        .with_catalog_path(ctx.catalog_path())
        .with_registry(Arc::clone(&registry))
        .build()?;

    let mut events = orchestrator.subscribe();
    let mut board = StatusBoard::new();
    let mut last_step: Option<u64> = None;

    board.mark_started(&current);
    orchestrator.start(&current)?;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = &mut interrupt => {
                warn!("Interrupted, cancelling download of {}", current);
                orchestrator.shutdown().await;
                bail!("Download of {} interrupted", current);
            }
        };
        let Some(event) = event else {
            bail!("Event bus closed before {} finished", current);
        };
        if event.source() != &current {
            continue;
        }
        board.apply(&event);

        match event {
            DownloadEvent::Progress {
                fraction,
                bytes_written,
                bytes_expected,
                ..
            } => {
                // One line per ten percent.
                let step = (fraction * 10.0).floor() as u64;
                if last_step != Some(step) {
                    last_step = Some(step);
                    info!(
                        "{:>3.0}% {} / {}",
                        fraction * 100.0,
                        format_bytes(bytes_written),
                        format_bytes(bytes_expected)
                    );
                }
            }
            DownloadEvent::Completed {
                local_path,
                artifact_id,
                ..
            } => {
                info!("Installed {} as {}", local_path.display(), artifact_id);
                println!("{}", local_path.display());
                orchestrator.shutdown().await;
                return Ok(());
            }
            DownloadEvent::Failed { source, error } => {
                warn!("Download from {} failed ({}): {}", source, error.kind, error.message);
                let backup = if no_backup {
                    None
                } else {
                    board.retry_source(&registry, &source)
                };
                match backup {
                    Some(backup) => {
                        info!("Retrying from backup source {}", backup);
                        board.mark_started(&backup);
                        orchestrator.start(&backup)?;
                        current = backup;
                        last_step = None;
                    }
                    None => {
                        orchestrator.shutdown().await;
                        bail!("Download of {} failed: {}", source, error.message);
                    }
                }
            }
            DownloadEvent::Cancelled { source, .. } => {
                orchestrator.shutdown().await;
                bail!("Download of {} was cancelled", source);
            }
        }
    }
}

pub fn list_gallery(category: Option<ModelCategory>) {
    let models = gallery::models()
        .iter()
        .filter(|model| category.map_or(true, |c| model.category == c));

    for model in models {
        let capabilities: Vec<&str> = model.capabilities.iter().map(|c| c.label()).collect();
        println!(
            "{:<28} {:>8}  {:<14} {:<10} ctx {:<5} {}",
            model.name,
            model.size,
            model.category.label(),
            model.provider,
            model.context_window,
            capabilities.join(", ")
        );
        println!("    {}", model.url);
    }
}

pub fn list(ctx: &Context, json: bool) -> Result<()> {
    let catalog = ctx.open_catalog()?;
    let records = catalog.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        info!("No artifacts installed in {}", ctx.storage_root.display());
        return Ok(());
    }

    for record in &records {
        let location = match catalog.resolve_path(record) {
            Ok(path) => path.display().to_string(),
            Err(e) => format!("<unavailable: {}>", e),
        };
        println!(
            "{:<48} {:>10}  {}  {}",
            record.name,
            format_bytes(record.size_bytes),
            record.installed_at.format("%Y-%m-%d %H:%M"),
            location
        );
    }
    Ok(())
}

pub fn remove(ctx: &Context, name: &str) -> Result<()> {
    let catalog = ctx.open_catalog()?;
    let Some(record) = catalog.query_by_name(name)? else {
        bail!("No installed artifact named {}", name);
    };

    let path = record.location();
    match std::fs::remove_file(path) {
        Ok(()) => info!("Deleted {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} was already gone", path.display())
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to delete {}", path.display()));
        }
    }
    catalog.delete(&record)?;
    info!("Removed {} from the catalog", record.name);
    Ok(())
}

pub async fn verify(ctx: &Context, file: &Path, name: Option<&str>) -> Result<()> {
    let artifact_name = match name {
        Some(name) => name.to_string(),
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot derive an artifact name from {}", file.display()))?,
    };

    let registry = Arc::new(ctx.load_registry()?);
    let verifier = IntegrityVerifier::new(registry, ctx.policy);
    match verifier.verify(file, &artifact_name).await? {
        VerificationResult::Passed => {
            println!("{}: OK", artifact_name);
            Ok(())
        }
        VerificationResult::Skipped => {
            println!("{}: no digest registered, not checked", artifact_name);
            Ok(())
        }
        VerificationResult::Failed(Mismatch::DigestDiffers { expected, actual }) => {
            bail!("{}: digest mismatch (expected {}, got {})", artifact_name, expected, actual)
        }
        VerificationResult::Failed(Mismatch::NoDigestRegistered { actual }) => {
            bail!(
                "{}: no digest registered under strict policy (sha256 {})",
                artifact_name,
                actual
            )
        }
    }
}

pub async fn digest(ctx: &Context, file: &Path, register: Option<&str>) -> Result<()> {
    let digest = compute_sha256(file)
        .await
        .with_context(|| format!("Failed to hash {}", file.display()))?;
    println!("{}  {}", digest, file.display());

    if let Some(name) = register {
        let mut registry = ctx.load_registry()?;
        registry.register_digest(name, &digest)?;
        registry.save(&ctx.registry_path)?;
        info!(
            "Registered digest for {} in {}",
            name,
            ctx.registry_path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::VerificationPolicy;
    use tempfile::TempDir;

    fn test_context(dir: &TempDir) -> Context {
        Context {
            storage_root: dir.path().join("models"),
            state_dir: dir.path().join("state"),
            registry_path: dir.path().join("state").join("registry.json"),
            policy: VerificationPolicy::RequireDigest,
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1_550_000_000), "1.55 GB");
        assert_eq!(format_bytes(2_500_000), "2.50 MB");
    }

    #[test]
    fn test_resolve_target_prefers_gallery() {
        let source = resolve_target("Gemma-3-1B-Instruct").unwrap();
        assert_eq!(source.file_name(), "gemma-3-1b-it-Q4_K_M.gguf");

        let source = resolve_target("https://mirror.example/x.gguf").unwrap();
        assert_eq!(source.file_name(), "x.gguf");
        assert!(resolve_target("not a url").is_err());
    }

    #[tokio::test]
    async fn test_digest_register_then_verify() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let file = dir.path().join("model.gguf");
        std::fs::write(&file, b"weights").unwrap();

        assert!(verify(&ctx, &file, None).await.is_err());

        digest(&ctx, &file, Some("model.gguf")).await.unwrap();
        verify(&ctx, &file, None).await.unwrap();

        std::fs::write(&file, b"tampered").unwrap();
        assert!(verify(&ctx, &file, None).await.is_err());
    }

    #[test]
    fn test_remove_deletes_file_and_record() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        std::fs::create_dir_all(&ctx.storage_root).unwrap();
        let file = ctx.storage_root.join("model.gguf");
        std::fs::write(&file, vec![0u8; 1024]).unwrap();
        ctx.open_catalog().unwrap().create(&file).unwrap();

        remove(&ctx, "model.gguf").unwrap();

        assert!(!file.exists());
        assert!(ctx
            .open_catalog()
            .unwrap()
            .query_by_name("model.gguf")
            .unwrap()
            .is_none());
        assert!(remove(&ctx, "model.gguf").is_err());
    }
}
