use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// Default TTL for cached reads, in seconds
  #[serde(default = "default_read_ttl_secs")]
  pub read_ttl_secs: u64,
  /// Treat the platform as offline at startup
  #[serde(default)]
  pub start_offline: bool,
  /// Log filter used when RUST_LOG is not set
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      storage: StorageConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
      read_ttl_secs: default_read_ttl_secs(),
      start_offline: false,
      log_level: default_log_level(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the travel planner API, e.g. https://planner.example.com/api
  pub base_url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Override for the offline database location
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
  /// Evict mutations the server rejects with a 4xx instead of retrying them.
  /// Off by default: every failure consumes a retry.
  #[serde(default)]
  pub fail_fast_on_rejection: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  /// Per-subscriber channel capacity
  #[serde(default = "default_notification_buffer")]
  pub buffer: usize,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      buffer: default_notification_buffer(),
    }
  }
}

fn default_read_ttl_secs() -> u64 {
  300
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_notification_buffer() -> usize {
  32
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tripsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tripsync/config.yaml
  ///
  /// With no file found the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tripsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tripsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to unit, not to an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  pub fn read_ttl(&self) -> Duration {
    Duration::from_secs(self.read_ttl_secs)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    if self.sync.fail_fast_on_rejection {
      RetryPolicy::FailFastOnRejection
    } else {
      RetryPolicy::Uniform
    }
  }

  /// Directory for log files, next to the offline database.
  pub fn log_dir(&self) -> Option<PathBuf> {
    match &self.storage.path {
      Some(p) => p.parent().map(|parent| parent.join("logs")),
      None => dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .map(|d| d.join("tripsync").join("logs")),
    }
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks TRIPSYNC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("TRIPSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
