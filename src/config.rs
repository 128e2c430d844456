//! Configuration management for khobor using the prefer crate.
//!
//! Settings come from three layers, later layers winning: built-in
//! defaults, a config file (explicit `--config`, one next to the data
//! directory, or prefer discovery), then environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::DEFAULT_PROBE_TIMEOUT_MS;
use crate::providers::cache::DEFAULT_TTL as DEFAULT_PROVIDER_CACHE_TTL;
use crate::providers::health::{DEFAULT_LOG_RETENTION, DEFAULT_RECOVERY_COOLDOWN};
use crate::store::DocumentStore;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "khobor.db";

/// Default listen address for `khobor serve`.
pub const DEFAULT_BIND: &str = "127.0.0.1:3030";

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// Listen address for the HTTP server.
    pub bind: String,
    /// HS256 secret used to verify admin identity tokens.
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    /// Bearer secret required by the scheduled health endpoint, if set.
    pub cron_secret: Option<String>,
    /// Probe timeout for providers without their own `timeout_ms`.
    pub probe_timeout_ms: u64,
    /// How long a failed provider stays paused.
    pub recovery_cooldown: Duration,
    /// Lifetime of the active-provider cache.
    pub provider_cache_ttl: Duration,
    /// Number of health-check logs kept.
    pub health_log_retention: usize,
}

impl Default for Settings {
    fn default() -> Self {
        // ~/Documents/khobor, falling back to home, then the current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("khobor");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            bind: DEFAULT_BIND.to_string(),
            jwt_secret: None,
            jwt_issuer: None,
            jwt_audience: None,
            cron_secret: None,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            recovery_cooldown: DEFAULT_RECOVERY_COOLDOWN,
            provider_cache_ttl: DEFAULT_PROVIDER_CACHE_TTL,
            health_log_retention: DEFAULT_LOG_RETENTION,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Get the full path to the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }

    /// Open the document store these settings point at.
    pub fn open_store(&self) -> DocumentStore {
        DocumentStore::open(&self.database_url())
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_secret: Option<String>,
}

/// `[health]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct HealthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_cooldown_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_cache_ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_retention: Option<u64>,
}

/// Configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    /// Data directory, relative to the config file unless absolute.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "target")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default)]
    #[prefer(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    #[prefer(default)]
    pub health: HealthConfig,
    /// Where this config was loaded from.
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer for discovery.
    pub async fn load() -> Self {
        match prefer::load("khobor").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_else(|e| {
                    tracing::warn!("{}", e);
                    Self::default()
                }),
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, String> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Directory of the config file, if it was loaded from one.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a possibly relative, possibly `~`-prefixed path.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref bind) = self.bind {
            settings.bind = bind.clone();
        }

        if self.auth.jwt_secret.is_some() {
            settings.jwt_secret = self.auth.jwt_secret.clone();
        }
        if self.auth.jwt_issuer.is_some() {
            settings.jwt_issuer = self.auth.jwt_issuer.clone();
        }
        if self.auth.jwt_audience.is_some() {
            settings.jwt_audience = self.auth.jwt_audience.clone();
        }
        if self.auth.cron_secret.is_some() {
            settings.cron_secret = self.auth.cron_secret.clone();
        }

        if let Some(ms) = self.health.probe_timeout_ms {
            settings.probe_timeout_ms = ms;
        }
        if let Some(secs) = self.health.recovery_cooldown_secs {
            settings.recovery_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = self.health.provider_cache_ttl_secs {
            settings.provider_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(keep) = self.health.log_retention {
            settings.health_log_retention = keep as usize;
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory or database file (--target flag).
    pub data: Option<PathBuf>,
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

fn is_database_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "db" || ext == "sqlite" || ext == "sqlite3")
        || (path.exists() && path.is_file())
}

/// Split a `--target` value into a data directory and optional filename.
fn resolve_target(path: &Path) -> (PathBuf, Option<String>) {
    let path = absolute(path);
    if is_database_file(&path) {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        (dir, filename)
    } else {
        (path, None)
    }
}

/// Look for khobor.{ext} or config.{ext} inside `data_dir`.
fn find_config_in_dir(data_dir: &Path) -> Option<PathBuf> {
    let extensions = ["toml", "yaml", "yml", "json"];
    let basenames = ["khobor", "config"];

    basenames
        .iter()
        .flat_map(|base| extensions.iter().map(move |ext| format!("{}.{}", base, ext)))
        .map(|name| data_dir.join(name))
        .find(|path| path.exists())
}

async fn load_file_config(options: &LoadOptions, data_dir: Option<&Path>) -> Config {
    if let Some(ref config_path) = options.config_path {
        return Config::load_from_path(config_path)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("{}", e);
                Config::default()
            });
    }

    if let Some(data_dir) = data_dir {
        if let Some(config_path) = find_config_in_dir(data_dir) {
            tracing::debug!("Found config in data dir: {}", config_path.display());
            return Config::load_from_path(&config_path)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("{}", e);
                    Config::default()
                });
        }
    }

    Config::load().await
}

fn non_empty_env(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|s| !s.trim().is_empty())
}

fn numeric_env(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = non_empty_env(lookup, key)?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a number", key, raw);
            None
        }
    }
}

/// Apply environment overrides read through `lookup`.
pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = non_empty_env(&lookup, "DATABASE_URL") {
        tracing::debug!("Using DATABASE_URL from environment: {}", url);
        settings.database_url = Some(url);
    }
    if let Some(secret) = non_empty_env(&lookup, "KHOBOR_JWT_SECRET") {
        settings.jwt_secret = Some(secret);
    }
    if let Some(issuer) = non_empty_env(&lookup, "KHOBOR_JWT_ISSUER") {
        settings.jwt_issuer = Some(issuer);
    }
    if let Some(audience) = non_empty_env(&lookup, "KHOBOR_JWT_AUDIENCE") {
        settings.jwt_audience = Some(audience);
    }
    if let Some(secret) = non_empty_env(&lookup, "CRON_SECRET") {
        settings.cron_secret = Some(secret);
    }
    if let Some(bind) = non_empty_env(&lookup, "KHOBOR_BIND") {
        settings.bind = bind;
    }
    if let Some(ms) = numeric_env(&lookup, "KHOBOR_PROBE_TIMEOUT_MS") {
        settings.probe_timeout_ms = ms;
    }
    if let Some(secs) = numeric_env(&lookup, "KHOBOR_RECOVERY_COOLDOWN_SECS") {
        settings.recovery_cooldown = Duration::from_secs(secs);
    }
    if let Some(secs) = numeric_env(&lookup, "KHOBOR_PROVIDER_CACHE_TTL_SECS") {
        settings.provider_cache_ttl = Duration::from_secs(secs);
    }
    if let Some(keep) = numeric_env(&lookup, "KHOBOR_HEALTH_LOG_RETENTION") {
        settings.health_log_retention = keep as usize;
    }
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let target = options.data.as_deref().map(resolve_target);
    let config = load_file_config(&options, target.as_ref().map(|(dir, _)| dir.as_path())).await;

    let mut settings = Settings::default();

    let base_dir = if options.use_cwd {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    } else {
        config
            .base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    };

    config.apply_to_settings(&mut settings, &base_dir);

    // --target wins over the config file
    if let Some((data_dir, filename)) = target {
        settings.data_dir = data_dir;
        if let Some(filename) = filename {
            settings.database_filename = filename;
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    (settings, config)
}
