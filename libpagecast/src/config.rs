//! Configuration management for Pagecast
//!
//! A single `Config` is loaded once at startup and passed into every
//! component; no component reads ambient global state.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub media: MediaConfig,
    pub remote: RemoteConfig,
    pub scheduling: SchedulingConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Directory uploaded media files are stored under.
    pub dir: String,
    /// Public base URL the stored files are served from.
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub app_id: String,
    pub app_secret: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// The one fixed IANA timezone every stored instant lives in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Hand posts to the remote service's native scheduler when possible.
    #[serde(default = "default_true")]
    pub use_remote_scheduling: bool,
    /// Published rows older than this are swept by retention cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// The connected operator account whose pages back the token refresh
    /// path.
    #[serde(default = "default_owner_user")]
    pub owner_user: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Path of the token-encryption key file, generated on first use.
    pub key_path: String,
}

fn default_api_base_url() -> String {
    "https://graph.facebook.com/v23.0".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    90
}

fn default_owner_user() -> i64 {
    1
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.tz()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/pagecast/pagecast.db".to_string(),
            },
            media: MediaConfig {
                dir: "~/.local/share/pagecast/media".to_string(),
                base_url: "http://localhost/pagecast/media".to_string(),
            },
            remote: RemoteConfig {
                app_id: String::new(),
                app_secret: String::new(),
                api_base_url: default_api_base_url(),
                timeout_secs: default_timeout_secs(),
            },
            scheduling: SchedulingConfig {
                timezone: default_timezone(),
                use_remote_scheduling: true,
                retention_days: default_retention_days(),
                owner_user: default_owner_user(),
            },
            credentials: CredentialsConfig {
                key_path: "~/.local/share/pagecast/token.key".to_string(),
            },
        }
    }

    /// The configured system timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.scheduling
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.scheduling.timezone.clone()).into())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("PAGECAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("pagecast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("pagecast"))
}
