//! Configuration for courier.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (COURIER_HOME, COURIER_STAGING, COURIER_BOT_TOKEN)
//! 2. Config file (.courier/config.yaml)
//! 3. Defaults (~/.courier)
//!
//! Config file discovery:
//! - Searches current directory and parents for .courier/config.yaml
//! - Relative paths in the file are resolved against the project root
//!   (the directory holding .courier/)

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::{RcloneCli, TelegramConfig};
use crate::core::{AntiSpamMode, FetchOptions};
use crate::domain::{
    ArchivePolicy, Channel, DeliveryPreferences, LinkMode, DEFAULT_MAX_ARTIFACT_SIZE,
};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub fetch: FetchOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .courier/)
    pub home: Option<String>,
    /// Staging root (relative to the project root)
    pub staging: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub channel: Channel,
    #[serde(default = "default_max_artifact_size")]
    pub max_artifact_size: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub archive: ArchivePolicy,
    #[serde(default)]
    pub anti_spam: AntiSpamMode,
    /// Post album and playlist cover art before delivering
    #[serde(default)]
    pub art_poster: bool,
}

fn default_max_artifact_size() -> u64 {
    DEFAULT_MAX_ARTIFACT_SIZE
}
fn default_concurrency() -> usize {
    5
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            channel: Channel::default(),
            max_artifact_size: default_max_artifact_size(),
            concurrency: default_concurrency(),
            archive: ArchivePolicy::default(),
            anti_spam: AntiSpamMode::default(),
            art_poster: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinksConfig {
    #[serde(default)]
    pub mode: LinkMode,
    pub index_root: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// rclone destination, e.g. `gdrive:music`
    pub remote: String,
    #[serde(default = "default_storage_binary")]
    pub binary: String,
    pub config_file: Option<String>,
    #[serde(default)]
    pub archive_uploads: bool,
}

fn default_storage_binary() -> String {
    "rclone".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramSection {
    pub api_base: Option<String>,
    pub max_flood_wait_seconds: Option<u64>,
}

/// Values taken from the environment
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<PathBuf>,
    pub staging: Option<PathBuf>,
    pub bot_token: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            home: std::env::var("COURIER_HOME").ok().map(PathBuf::from),
            staging: std::env::var("COURIER_STAGING").ok().map(PathBuf::from),
            bot_token: std::env::var("COURIER_BOT_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to courier home (state)
    pub home: PathBuf,
    /// Root of the staging tree: `{staging}/{session}/{provider}/...`
    pub staging: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub delivery: DeliveryConfig,
    pub links: LinksConfig,
    pub storage: Option<StorageConfig>,
    pub telegram: TelegramSection,
    pub fetch: FetchOptions,
    /// Bot token, only ever read from the environment
    pub bot_token: Option<String>,
}

impl ResolvedConfig {
    /// Preferences placed in every delivery context
    pub fn preferences(&self) -> DeliveryPreferences {
        DeliveryPreferences {
            channel: self.delivery.channel,
            archive: self.delivery.archive,
            max_artifact_size: self.delivery.max_artifact_size,
            concurrency: self.delivery.concurrency,
            link_mode: self.links.mode,
            archive_uploads: self
                .storage
                .as_ref()
                .map(|s| s.archive_uploads)
                .unwrap_or(false),
            art_poster: self.delivery.art_poster,
        }
    }

    /// Transport settings; fails without a bot token
    pub fn telegram_config(&self) -> Result<TelegramConfig> {
        let token = self
            .bot_token
            .clone()
            .context("COURIER_BOT_TOKEN is not set")?;

        let mut config = TelegramConfig::new(token);
        if let Some(api_base) = &self.telegram.api_base {
            config.api_base = api_base.clone();
        }
        if let Some(wait) = self.telegram.max_flood_wait_seconds {
            config.max_flood_wait_seconds = wait;
        }
        Ok(config)
    }

    /// Storage CLI for the configured remote, if any
    pub fn rclone(&self) -> Option<RcloneCli> {
        self.storage.as_ref().map(|storage| {
            let cli = RcloneCli::new(&storage.remote).with_binary_path(&storage.binary);
            match &storage.config_file {
                Some(file) => cli.with_config_file(file),
                None => cli,
            }
        })
    }

    fn validate(&self) -> Result<()> {
        if self.delivery.concurrency == 0 {
            anyhow::bail!("delivery.concurrency must be at least 1");
        }
        if self.delivery.max_artifact_size == 0 {
            anyhow::bail!("delivery.max_artifact_size must be positive");
        }
        if self.delivery.channel == Channel::RemoteStorage && self.storage.is_none() {
            anyhow::bail!("delivery.channel is remote_storage but no storage section is set");
        }
        Ok(())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".courier").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file (if any) with environment overrides
fn resolve(
    file: Option<(PathBuf, ConfigFile)>,
    env: EnvOverrides,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), config),
        None => (None, ConfigFile::default()),
    };

    // .courier/ and the project root around it
    let courier_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let base_dir = courier_dir.parent().unwrap_or(Path::new("."));

    let home = match (env.home, &config.paths.home) {
        (Some(home), _) => home,
        (None, Some(home)) if config_file.is_some() => resolve_path(courier_dir, home),
        _ => default_home,
    };

    let staging = match (env.staging, &config.paths.staging) {
        (Some(staging), _) => staging,
        (None, Some(staging)) if config_file.is_some() => resolve_path(base_dir, staging),
        _ => home.join("staging"),
    };

    let storage = config.storage.map(|mut storage| {
        if let Some(file) = &storage.config_file {
            storage.config_file = Some(resolve_path(base_dir, file).display().to_string());
        }
        storage
    });

    let resolved = ResolvedConfig {
        home,
        staging,
        config_file,
        delivery: config.delivery,
        links: config.links,
        storage,
        telegram: config.telegram,
        fetch: config.fetch,
        bot_token: env.bot_token,
    };
    resolved.validate()?;
    Ok(resolved)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".courier");

    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(file, EnvOverrides::from_env(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the staging root.
pub fn staging_root() -> Result<PathBuf> {
    Ok(config()?.staging.clone())
}
