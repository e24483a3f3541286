//! Command-line interface for courier.
//!
//! Provides commands for delivering staged content, fetching source files,
//! packing directories, resolving links and cleaning up sessions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde::Deserialize;
use tracing::warn;

use crate::adapters::{StorageCli, TelegramTransport, Transport};
use crate::config::{self, paths, ResolvedConfig};
use crate::core::{
    pack_single, pack_split, ActiveSessions, FetchOptions, Fetcher, LinkResolver, Orchestrator,
};
use crate::domain::{ContentItem, DeliveryContext, DeliveryReport, DeliveryState};

/// courier - Media packaging and delivery engine
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deliver staged content described by one or more manifests
    Deliver {
        /// Manifest files (YAML with `context` and `item`)
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },

    /// Download a file with retries
    Fetch {
        /// URL to download
        url: String,

        /// Destination file
        output: PathBuf,

        /// Total attempts (defaults to fetch.max_retries)
        #[arg(long)]
        retries: Option<u32>,

        /// Per-attempt timeout in seconds (defaults to fetch.timeout_seconds)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Pack a directory into zip archives (source files are moved into the archive)
    Pack {
        /// Directory to pack
        dir: PathBuf,

        /// Split into parts no larger than --max-size
        #[arg(long)]
        split: bool,

        /// Part size limit in bytes (defaults to delivery.max_artifact_size)
        #[arg(long)]
        max_size: Option<u64>,
    },

    /// Print the links for a path under the staging root
    Link {
        /// Local path
        path: PathBuf,
    },

    /// Remove a session's staging directory
    Clean {
        /// Session ID
        session: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// One delivery request
#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub context: DeliveryContext,
    pub item: ContentItem,
}

/// Load a manifest; configured preferences replace whatever it carries.
/// The item must sit in its session's staging directory.
pub fn load_manifest(path: &Path, cfg: &ResolvedConfig) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;

    let mut manifest: Manifest = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
    manifest.context.preferences = cfg.preferences();

    // Items live under {staging}/{session}/{Provider}
    let expected = paths::staging_dir(
        &cfg.staging,
        &manifest.context.session_id,
        manifest.item.provider(),
    );
    if !manifest.item.local_path().starts_with(&expected) {
        anyhow::bail!(
            "{}: {} is outside the session staging directory {}",
            path.display(),
            manifest.item.local_path().display(),
            expected.display()
        );
    }

    Ok(manifest)
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Deliver { manifests } => deliver(&manifests).await,
            Commands::Fetch {
                url,
                output,
                retries,
                timeout,
            } => fetch(&url, &output, retries, timeout).await,
            Commands::Pack {
                dir,
                split,
                max_size,
            } => pack(&dir, split, max_size).await,
            Commands::Link { path } => link(&path).await,
            Commands::Clean { session } => clean(&session).await,
            Commands::Config => show_config().await,
        }
    }
}

fn build_orchestrator(cfg: &ResolvedConfig) -> Result<Orchestrator> {
    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(cfg.telegram_config()?));
    let storage = storage_cli(cfg);
    let links = LinkResolver::new(
        cfg.links.mode,
        storage.clone(),
        cfg.links.index_root.clone(),
    );

    Ok(Orchestrator::new(transport, storage, links, cfg.staging.clone()))
}

fn storage_cli(cfg: &ResolvedConfig) -> Option<Arc<dyn StorageCli>> {
    cfg.rclone().map(|cli| Arc::new(cli) as Arc<dyn StorageCli>)
}

/// Deliver every manifest concurrently, one delivery per session key at a time
async fn deliver(manifest_paths: &[PathBuf]) -> Result<()> {
    let cfg = config::config()?;
    let orchestrator = build_orchestrator(cfg)?;
    let sessions = ActiveSessions::new(cfg.delivery.anti_spam);

    let manifests = manifest_paths
        .iter()
        .map(|path| load_manifest(path, cfg))
        .collect::<Result<Vec<_>>>()?;

    let sessions = &sessions;
    let orchestrator = &orchestrator;
    let deliveries = manifests.iter().map(|manifest| async move {
        let ctx = &manifest.context;
        let _guard = match sessions.try_begin(ctx.user_id, ctx.chat_id) {
            Ok(guard) => guard,
            Err(busy) => {
                warn!(error = %busy, title = %manifest.item.title(), "Skipped delivery");
                return None;
            }
        };

        Some(match orchestrator.deliver(&manifest.item, ctx).await {
            Ok(report) => report,
            Err(failure) => failure.report,
        })
    });

    let reports: Vec<DeliveryReport> = join_all(deliveries)
        .await
        .into_iter()
        .flatten()
        .collect();
    let skipped = manifests.len() - reports.len();

    println!("{:<38} {:<10} {:<30} {:<10}", "DELIVERY ID", "KIND", "TITLE", "STATE");
    println!("{}", "-".repeat(90));

    let mut failed = 0;
    for report in &reports {
        let state = match &report.state {
            DeliveryState::Delivered => "delivered".to_string(),
            DeliveryState::Failed { reason } => {
                failed += 1;
                format!("failed: {}", reason)
            }
            other => format!("{:?}", other).to_lowercase(),
        };
        println!(
            "{:<38} {:<10} {:<30} {}",
            report.id,
            report.kind.to_string(),
            truncate(&report.title, 30),
            state
        );
        if !report.cleaned_up {
            eprintln!("  [warning: some local files could not be removed]");
        }
    }

    if skipped > 0 {
        eprintln!("\n[{} delivery(ies) skipped: session busy]", skipped);
    }
    if failed > 0 || skipped > 0 {
        eprintln!("\n[{} of {} deliveries failed]", failed + skipped, manifests.len());
        std::process::exit(1);
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

async fn fetch(url: &str, output: &Path, retries: Option<u32>, timeout: Option<u64>) -> Result<()> {
    let cfg = config::config()?;
    let options = FetchOptions {
        max_retries: retries.unwrap_or(cfg.fetch.max_retries),
        timeout_seconds: timeout.unwrap_or(cfg.fetch.timeout_seconds),
        ..cfg.fetch.clone()
    };

    let bytes = Fetcher::new()
        .fetch(url, output, &options)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    println!("Saved {} bytes to {}", bytes, output.display());
    Ok(())
}

async fn pack(dir: &Path, split: bool, max_size: Option<u64>) -> Result<()> {
    let artifact = if split {
        let max_size = match max_size {
            Some(size) => size,
            None => config::config()?.delivery.max_artifact_size,
        };
        pack_split(dir, max_size).await?
    } else {
        pack_single(dir).await?
    };

    if artifact.is_empty() {
        println!("Nothing to pack in {}", dir.display());
        return Ok(());
    }

    for part in &artifact.parts {
        println!(
            "{}  ({} files, {} bytes)",
            part.path.display(),
            part.file_count,
            part.size_bytes
        );
    }
    Ok(())
}

async fn link(path: &Path) -> Result<()> {
    let cfg = config::config()?;
    let resolver = LinkResolver::new(
        cfg.links.mode,
        storage_cli(cfg),
        cfg.links.index_root.clone(),
    );

    let links = resolver.resolve(path, &cfg.staging).await?;
    if links.is_empty() {
        println!("No links available (links.mode: {:?})", cfg.links.mode);
        return Ok(());
    }

    if let Some(direct) = &links.direct {
        println!("Direct: {}", direct);
    }
    if let Some(index) = &links.index {
        println!("Index:  {}", index);
    }
    Ok(())
}

async fn clean(session: &str) -> Result<()> {
    if !paths::is_valid_session_id(session) {
        anyhow::bail!("Invalid session ID: {}", session);
    }

    let dir = paths::configured_session_dir(session)?;
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => println!("Removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("Nothing to clean at {}", dir.display())
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to remove {}", dir.display()));
        }
    }
    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;
    let prefs = cfg.preferences();

    println!("Config file: {}", cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    println!("Paths:");
    println!("  Home:    {}", cfg.home.display());
    println!("  Staging: {}", cfg.staging.display());
    println!();
    println!("Delivery:");
    println!("  Channel:           {:?}", prefs.channel);
    println!("  Max artifact size: {} bytes", prefs.max_artifact_size);
    println!("  Concurrency:       {}", prefs.concurrency);
    println!("  Archive album:     {}", prefs.archive.album);
    println!("  Archive artist:    {}", prefs.archive.artist);
    println!("  Archive playlist:  {}", prefs.archive.playlist);
    println!("  Anti-spam:         {:?}", cfg.delivery.anti_spam);
    println!("  Art poster:        {}", prefs.art_poster);
    println!();
    println!("Links:");
    println!("  Mode:       {:?}", cfg.links.mode);
    println!("  Index root: {}", cfg.links.index_root.as_deref().unwrap_or("(none)"));
    println!();
    println!("Storage:");
    match &cfg.storage {
        Some(storage) => {
            println!("  Remote:          {}", storage.remote);
            println!("  Binary:          {}", storage.binary);
            println!("  Archive uploads: {}", storage.archive_uploads);
        }
        None => println!("  (not configured)"),
    }
    println!();
    println!("Transport:");
    println!("  Bot token: {}", if cfg.bot_token.is_some() { "(set)" } else { "(missing)" });
    println!("  Max flood wait: {}s", cfg.telegram.max_flood_wait_seconds.unwrap_or(300));
    println!();
    println!("Fetch:");
    println!("  Attempts: {}", cfg.fetch.max_retries);
    println!("  Timeout:  {}s", cfg.fetch.timeout_seconds);

    Ok(())
}
