use color_eyre::{eyre::eyre, Result};
use offsync::cache::{CacheSettings, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MEMORY_BUDGET_BYTES, DEFAULT_TTL};
use offsync::HttpRemoteConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the remote service bearer token.
pub const API_TOKEN_VAR: &str = "OFFSYNC_API_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub remote: RemoteConfig,
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// Base URL of the data service, e.g. `https://api.example.com/v1`
  pub url: String,
  pub timeout_secs: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8080".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub ttl_minutes: u64,
  pub memory_budget_mb: usize,
  pub cleanup_interval_minutes: u64,
  /// Database path (defaults to $XDG_DATA_HOME/offsync/cache.db)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_minutes: DEFAULT_TTL.as_secs() / 60,
      memory_budget_mb: DEFAULT_MEMORY_BUDGET_BYTES / (1024 * 1024),
      cleanup_interval_minutes: DEFAULT_CLEANUP_INTERVAL.as_secs() / 60,
      database: None,
    }
  }
}

impl CacheConfig {
  pub fn settings(&self) -> CacheSettings {
    CacheSettings {
      ttl: Duration::from_secs(self.ttl_minutes.saturating_mul(60)),
      memory_budget_bytes: self.memory_budget_mb.saturating_mul(1024 * 1024),
      cleanup_interval: Duration::from_secs(self.cleanup_interval_minutes.max(1).saturating_mul(60)),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
  ///
  /// Without a file the defaults apply.
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
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file is an empty document, not an error
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  pub fn remote_config(&self) -> HttpRemoteConfig {
    HttpRemoteConfig {
      base_url: self.remote.url.clone(),
      timeout: Duration::from_secs(self.remote.timeout_secs),
      api_token: Self::get_api_token(),
    }
  }

  /// Bearer token for the remote service, if set.
  pub fn get_api_token() -> Option<String> {
    std::env::var(API_TOKEN_VAR).ok().filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
