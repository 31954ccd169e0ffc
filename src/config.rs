use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub discogs: DiscogsConfig,
  #[serde(default)]
  pub paging: PagingConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscogsConfig {
  /// API root every resource path is joined onto
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Discogs rejects requests without a user agent
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

impl Default for DiscogsConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      user_agent: default_user_agent(),
    }
  }
}

fn default_base_url() -> String {
  "https://api.discogs.com/".to_string()
}

fn default_user_agent() -> String {
  format!("lom/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagingConfig {
  #[serde(default = "default_releases_page_size")]
  pub releases_page_size: usize,
  #[serde(default = "default_search_page_size")]
  pub search_page_size: usize,
}

impl Default for PagingConfig {
  fn default() -> Self {
    Self {
      releases_page_size: default_releases_page_size(),
      search_page_size: default_search_page_size(),
    }
  }
}

fn default_releases_page_size() -> usize {
  6
}

fn default_search_page_size() -> usize {
  20
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Freshness window for the cached-else-load policy
  #[serde(default = "default_time_interval_secs")]
  pub time_interval_secs: i64,
  /// SQLite file (default: $XDG_DATA_HOME/lom/cache.db)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      time_interval_secs: default_time_interval_secs(),
      database: None,
    }
  }
}

fn default_time_interval_secs() -> i64 {
  crate::cache::DEFAULT_CACHE_TIME_INTERVAL_SECS
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  crate::cache::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lom.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lom/config.yaml
  ///
  /// Without any file the defaults apply.
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
    let local = PathBuf::from("lom.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lom").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    if config.paging.releases_page_size == 0 || config.paging.search_page_size == 0 {
      return Err(eyre!("Page sizes in {} must be positive", path.display()));
    }

    Ok(config)
  }

  /// Discogs credentials from environment variables.
  ///
  /// LOM_DISCOGS_TOKEN wins over the LOM_DISCOGS_KEY / LOM_DISCOGS_SECRET pair.
  /// Without either the API is used anonymously.
  pub fn credentials() -> BTreeMap<String, String> {
    Self::credentials_from(|name| std::env::var(name).ok())
  }

  fn credentials_from(var: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
    let mut credentials = BTreeMap::new();
    if let Some(token) = var("LOM_DISCOGS_TOKEN") {
      credentials.insert("token".to_string(), token);
    } else if let (Some(key), Some(secret)) = (var("LOM_DISCOGS_KEY"), var("LOM_DISCOGS_SECRET")) {
      credentials.insert("key".to_string(), key);
      credentials.insert("secret".to_string(), secret);
    }
    credentials
  }
}
