//! Configuration loading
//!
//! Bootstrap configuration comes from a TOML file located in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `DEI_MAILER_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/<app>/config.toml`, then `/etc/<app>/config.toml`)
//! 4. Compiled defaults (fallback, with a warning)
//!
//! Individual values can then be overridden by environment variables
//! (`DEI_RESEND_API_KEY`, `DEI_DATABASE_PATH`, `DEI_EMAIL_FROM`,
//! `DEI_CRON_SECRET`).

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "DEI_MAILER_CONFIG";
/// Environment variable overriding the Resend API key
pub const API_KEY_ENV_VAR: &str = "DEI_RESEND_API_KEY";
/// Environment variable overriding the database path
pub const DATABASE_ENV_VAR: &str = "DEI_DATABASE_PATH";
/// Environment variable overriding the sender address
pub const FROM_ENV_VAR: &str = "DEI_EMAIL_FROM";
/// Environment variable overriding the cron trigger secret
pub const CRON_SECRET_ENV_VAR: &str = "DEI_CRON_SECRET";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Path to SQLite database file. Falls back to the platform data dir.
    pub database_path: Option<PathBuf>,

    /// HTTP port for the operational API
    pub port: u16,

    /// Email provider settings
    pub resend: ResendConfig,

    /// Outbound send rate limit
    pub rate_limit: RateLimitConfig,

    /// Transient failure retry policy
    pub retry: RetryConfig,

    /// Processor polling and batching
    pub scheduler: SchedulerConfig,

    /// Replacement sequence catalog (TOML). Built-in catalog when absent.
    pub sequences_file: Option<PathBuf>,

    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: 5790,
            resend: ResendConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            sequences_file: None,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResendConfig {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub from: String,
    pub reply_to: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://api.resend.com".to_string(),
            from: "Daily Event Insurance <leads@dailyeventinsurance.com>".to_string(),
            reply_to: None,
            timeout_secs: 30,
        }
    }
}

/// Sliding-window rate limit: at most `max_requests` per `window_secs`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
        }
    }
}

/// Exponential backoff: `base_delay_ms * 2^n`, capped at `max_delay_ms`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub batch_size: u32,
    /// Rows left in `processing` longer than this are considered abandoned
    pub stale_after_secs: u64,
    /// Bearer token required by `POST /api/process`; open when unset
    pub cron_secret: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            batch_size: 100,
            stale_after_secs: 900,
            cron_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` if given, otherwise fall back to defaults.
    ///
    /// A missing file is not fatal: the service starts with defaults and a
    /// warning. A file that exists but does not parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let config = Self::load(path)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Apply `DEI_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = non_empty_env(API_KEY_ENV_VAR) {
            self.resend.api_key = Some(key);
        }
        if let Some(path) = non_empty_env(DATABASE_ENV_VAR) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(from) = non_empty_env(FROM_ENV_VAR) {
            self.resend.from = from;
        }
        if let Some(secret) = non_empty_env(CRON_SECRET_ENV_VAR) {
            self.scheduler.cron_secret = Some(secret);
        }
    }

    /// Reject values that would make the pipeline stall or spin
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 {
            return Err(Error::Config("rate_limit.max_requests must be > 0".to_string()));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(Error::Config("rate_limit.window_secs must be > 0".to_string()));
        }
        if self.scheduler.batch_size == 0 {
            return Err(Error::Config("scheduler.batch_size must be > 0".to_string()));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(Error::Config("scheduler.poll_interval_secs must be > 0".to_string()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::Config(
                "retry.max_delay_ms must be >= retry.base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Database path, or `<data dir>/mailer.db` when not configured
    pub fn database_path(&self, app_name: &str) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir(app_name).join("mailer.db"))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the config file path following the documented priority order.
///
/// Returns `None` when no candidate exists; callers then use defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, app_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Some(path) = non_empty_env(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: Platform config locations
    let user_config = dirs::config_dir().map(|d| d.join(app_name).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc").join(app_name).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default data folder
pub fn default_data_dir(app_name: &str) -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(app_name))
        .unwrap_or_else(|| PathBuf::from(format!("./{}_data", app_name)))
}
