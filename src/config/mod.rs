//! Configuration management for pocket-sync.
//!
//! Configuration is read from `~/.config/pocket-sync/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::remote::pocket::DEFAULT_PAGE_SIZE;

/// Environment variable that overrides `pocket.consumer_key`.
pub const CONSUMER_KEY_ENV: &str = "POCKET_CONSUMER_KEY";

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pocket: PocketConfig,
    pub sync: SyncConfig,
    pub auth: AuthConfig,
}

/// Remote service connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PocketConfig {
    pub consumer_key: String,
    pub redirect_uri: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for PocketConfig {
    fn default() -> Self {
        Self {
            consumer_key: String::new(),
            redirect_uri: "pocket-sync://auth-complete".into(),
            api_base: "https://getpocket.com".into(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub page_size: u32,
    /// Interval for `watch`, e.g. "30m", "1h", "1d".
    pub interval: String,
    /// Delay before the single automatic retry of a failed mutation.
    pub retry_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            interval: "30m".into(),
            retry_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Request tokens older than this are treated as abandoned.
    pub request_token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            request_token_ttl_secs: 600,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(CONSUMER_KEY_ENV) {
            if !key.trim().is_empty() {
                self.pocket.consumer_key = key.trim().to_string();
            }
        }
    }

    /// Get the default config file path: `~/.config/pocket-sync/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("pocket-sync").join("config.toml"))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# pocket-sync configuration

[pocket]
# Consumer key from https://getpocket.com/developer/apps/
# (POCKET_CONSUMER_KEY in the environment takes precedence)
consumer_key = ""

# Where the service sends the browser after the user grants access
redirect_uri = "pocket-sync://auth-complete"

api_base = "https://getpocket.com"

# Per-request timeout; a timeout counts as a network error
timeout_secs = 15

[sync]
# Items requested per page
page_size = 100

# Interval between syncs in `pocket-sync watch` ("30m", "1h", "1d", or seconds)
interval = "30m"

# Wait before the one automatic retry of a failed archive/favorite/delete
retry_delay_ms = 2000

[auth]
# Request tokens not exchanged within this window are abandoned
request_token_ttl_secs = 600
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl From<ConfigError> for crate::app::PocketSyncError {
    fn from(e: ConfigError) -> Self {
        crate::app::PocketSyncError::Config(e.to_string())
    }
}
