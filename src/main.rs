//! Main entry point for the zipsync CLI application.
//!
//! `zipsync index` publishes `.idx` files next to archives, `zipsync update`
//! brings local archives up to date from their published copies.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use zipsync::cli::{Command, UpdateArgs};
use zipsync::index::{self, find_archives};
use zipsync::{Cli, Error, LogProgress, PatchEngine};

const EXIT_USAGE: u8 = 2;
const EXIT_NO_ARCHIVES: u8 = 3;
const EXIT_FAILED: u8 = 4;

/// Argument problems found after clap parsing succeeded.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Command::Update(args) => update(args).await,
        Command::Index { target } => publish(&target).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn exit_code(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<UsageError>().is_some() {
        return EXIT_USAGE;
    }
    match e.downcast_ref::<Error>() {
        Some(Error::NoArchivesFound(_)) => EXIT_NO_ARCHIVES,
        _ => EXIT_FAILED,
    }
}

async fn update(args: UpdateArgs) -> Result<()> {
    if !args.is_http_url() {
        return Err(UsageError(format!("Invalid URL: {}", args.url)).into());
    }
    let url = Url::parse(&args.url).map_err(|e| UsageError(format!("Invalid URL {}: {e}", args.url)))?;

    let mut engine = PatchEngine::new(args.config())?;

    if args.target.is_dir() {
        let targets = directory_targets(&args.target, &url)?;
        engine.add_overall_listener(Arc::new(LogProgress::new("overall")));
        engine.add_progress_listener(Arc::new(LogProgress::new("archive")));

        let changed = engine.update_all(&targets).await?;
        info!("{} of {} archives updated", changed, targets.len());
    } else {
        if !args.target.exists() {
            warn!(
                "Update target doesn't exist, creating placeholder: {}",
                args.target.display()
            );
            create_placeholder(&args.target)?;
        }
        engine.add_progress_listener(Arc::new(LogProgress::new(
            args.target.display().to_string(),
        )));
        engine.update(&args.target, url).await?;
    }
    Ok(())
}

/// Pair every archive in `dir` with `<base>/<file name>`.
fn directory_targets(dir: &Path, base: &Url) -> Result<Vec<(PathBuf, Url)>> {
    let archives = find_archives(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    if archives.is_empty() {
        return Err(Error::NoArchivesFound(dir.to_path_buf()).into());
    }

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }

    archives
        .into_iter()
        .map(|archive| {
            let name = archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let url = base
                .join(&name)
                .with_context(|| format!("Failed to build URL for {}", archive.display()))?;
            Ok((archive, url))
        })
        .collect()
}

/// Write a one-entry archive so an update can populate it from scratch.
fn create_placeholder(path: &Path) -> Result<()> {
    let mut writer = ZipWriter::new(File::create(path)?);
    writer.start_file("placeholder", SimpleFileOptions::default())?;
    writer.write_all(&[0xCA, 0xFE])?;
    writer.finish()?;
    Ok(())
}

async fn publish(target: &Path) -> Result<()> {
    let written = index::index_path(target).await?;
    for path in &written {
        info!("Wrote {}", path.display());
    }
    Ok(())
}
