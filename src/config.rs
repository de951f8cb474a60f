use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::CacheNames;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "shellcache";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the agent serves, e.g. `https://app.example.com`
  pub origin: String,
  /// Path to the resource manifest (flat JSON). Relative paths resolve
  /// against the config file's directory.
  pub manifest: PathBuf,
  /// Shell files fetched during install
  #[serde(default)]
  pub core: Vec<String>,
  #[serde(default)]
  pub caches: CacheNames,
  #[serde(default)]
  pub http: HttpConfig,
  /// Where the cache database and registration live
  pub data_dir: Option<PathBuf>,
  /// Write logs to a file in this directory in addition to stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub timeout_secs: u64,
  pub user_agent: String,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      user_agent: format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shellcache/config.yaml \
         or ./shellcache.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_NAME).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let mut config = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    if config.manifest.is_relative() {
      if let Some(parent) = path.parent() {
        config.manifest = parent.join(&config.manifest);
      }
    }

    Ok(config)
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Directory holding the cache database and registration state.
  ///
  /// SHELLCACHE_DATA_DIR wins over the config file, which wins over the
  /// platform data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SHELLCACHE_DATA_DIR") {
      return Ok(PathBuf::from(dir));
    }
    if let Some(ref dir) = self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_NAME))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("cache.db"))
  }

  pub fn registration_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("registration.json"))
  }
}
