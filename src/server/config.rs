//! Configuration loading for heimdalld.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.heimdall/config.toml` (user)
//! 3. `/etc/heimdall/config.toml` (system)
//! 4. built-in defaults
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.heimdall/secrets.toml` (user, must be 0600)
//! 2. `/etc/heimdall/secrets.toml` (system, must be 0600)
//! 3. `UPSTREAM_API_KEY` environment variable

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{HeimdallError, Result};

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cache: CacheSection,
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:9742).
    #[serde(default = "default_address")]
    pub address: String,
    /// Shared secret required (via `x-metrics-secret`) to read the metrics
    /// endpoint. Unset = open, for local/dev use.
    #[serde(default)]
    pub metrics_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            metrics_secret: None,
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:9742".to_string()
}

/// Upstream provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Provider base URL override (default: the provider's public API).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Image model (default: gpt-image-1).
    #[serde(default)]
    pub model: Option<String>,
    /// Output size (default: 1024x1024).
    #[serde(default)]
    pub size: Option<String>,
    /// Per-attempt timeout in seconds (default: 90).
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
    /// Maximum attempts per generation, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            size: None,
            timeout_secs: default_upstream_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_upstream_timeout() -> u64 {
    90
}

fn default_max_attempts() -> u32 {
    3
}

/// Usage and concurrency limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent upstream calls (default: 8).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Minimum seconds between accepted requests per client (default: 10).
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    /// Daily cap for free-tier clients (default: 3).
    #[serde(default = "default_free_cap")]
    pub free_daily_cap: u32,
    /// Daily cap for paid-tier clients (default: 25).
    #[serde(default = "default_paid_cap")]
    pub paid_daily_cap: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            min_interval_secs: default_min_interval(),
            free_daily_cap: default_free_cap(),
            paid_daily_cap: default_paid_cap(),
        }
    }
}

fn default_max_in_flight() -> usize {
    8
}

fn default_min_interval() -> u64 {
    10
}

fn default_free_cap() -> u32 {
    3
}

fn default_paid_cap() -> u32 {
    25
}

/// Generation cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Time-to-live in seconds (default: 180).
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Maximum entries (default: 1024).
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    180
}

fn default_cache_entries() -> u64 {
    1024
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub upstream: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

/// Environment variable consulted when no secrets file carries a key.
const UPSTREAM_KEY_ENV: &str = "UPSTREAM_API_KEY";

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist; otherwise the standard locations are
    /// tried and built-in defaults apply when none is present.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match Self::resolve_config_path(explicit_path)? {
            Some(path) => path,
            None => return Ok(Config::default()),
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path, if any exists.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HeimdallError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".heimdall").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/heimdall/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (the env var may still
    /// provide a key).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".heimdall").join("secrets.toml");
            if user_secrets.exists() {
                Self::check_permissions(&user_secrets)?;
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/heimdall/secrets.toml");
        if system_secrets.exists() {
            Self::check_permissions(&system_secrets)?;
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(HeimdallError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        // Permission check not available on non-Unix platforms
        Ok(())
    }

    /// The upstream API key, falling back to the environment variable.
    pub fn upstream_api_key(&self) -> Option<String> {
        self.upstream
            .as_ref()
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var(UPSTREAM_KEY_ENV).ok())
    }
}
