use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::SqliteStorage;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub app: AppConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub log: LogConfig,
}

/// The application being mirrored.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// App root, e.g. `https://timetagger.app/` or `https://example.com/tt/`
  pub origin: String,
  /// Paths relative to the app root to pre-cache on install
  #[serde(default)]
  pub assets: Vec<String>,
  /// Path of the app shell page; matched as a suffix of the request path
  #[serde(default = "default_app_shell")]
  pub app_shell: String,
  /// Requests whose path contains this are never cached
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
}

fn default_app_shell() -> String {
  "app".to_string()
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  /// Serve from cache, fetch only on a miss
  #[default]
  CacheFirst,
  /// Fetch first, fall back to cache and enter offline mode on failure
  NetworkFirst,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Fixed cache name. When unset, one is derived from the asset contents.
  pub name: Option<String>,
  /// Only caches with this prefix are purged on activation. Without a
  /// prefix every other cache is purged.
  pub prefix: Option<String>,
  #[serde(default)]
  pub strategy: Strategy,
  /// Write cache-first misses back into the cache. Every distinct URL is
  /// kept, so cache-busting query strings (`?v=...`) pile up in the current
  /// cache until a new cache name replaces it on activate.
  #[serde(default = "default_true")]
  pub store_misses: bool,
  /// Database location (default: $XDG_DATA_HOME/swcache/cache.db)
  pub database: Option<PathBuf>,
}

fn default_true() -> bool {
  true
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: None,
      prefix: None,
      strategy: Strategy::default(),
      store_misses: true,
      database: None,
    }
  }
}

/// Prefix used for derived cache names when none is configured.
pub const DEFAULT_CACHE_PREFIX: &str = "swcache";

impl CacheConfig {
  /// Prefix for derived cache names.
  pub fn name_prefix(&self) -> &str {
    self.prefix.as_deref().unwrap_or(DEFAULT_CACHE_PREFIX)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
  /// Give up on upstream requests after this many seconds. No limit by default.
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_listen")]
  pub listen: SocketAddr,
}

fn default_listen() -> SocketAddr {
  SocketAddr::from(([127, 0, 0, 1], 8742))
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: default_listen(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Write daily rolling log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/swcache/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let origin = Url::parse(&self.app.origin)
      .map_err(|e| eyre!("Invalid app origin {}: {}", self.app.origin, e))?;
    if !matches!(origin.scheme(), "http" | "https") {
      return Err(eyre!(
        "App origin must be an http(s) URL, got {}",
        self.app.origin
      ));
    }

    if let (Some(name), Some(prefix)) = (&self.cache.name, &self.cache.prefix) {
      if !name.starts_with(prefix.as_str()) {
        return Err(eyre!(
          "Cache name {} must start with the cache prefix {}",
          name,
          prefix
        ));
      }
    }

    Ok(())
  }

  /// Where the cache database lives.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.cache.database {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("app:\n  origin: https://example.com/\n").unwrap();

    assert!(config.app.assets.is_empty());
    assert_eq!(config.app.app_shell, "app");
    assert_eq!(config.app.api_prefix, "/api/");
    assert_eq!(config.cache.strategy, Strategy::CacheFirst);
    assert!(config.cache.store_misses);
    assert_eq!(config.cache.name_prefix(), DEFAULT_CACHE_PREFIX);
    assert_eq!(config.server.listen, default_listen());
    assert_eq!(config.network.timeout_secs, None);
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
app:
  origin: https://example.com/tt/
  assets: [app, app.js, style.css]
  app_shell: app
cache:
  prefix: timetagger
  name: timetagger_v2
  strategy: network-first
  store_misses: false
network:
  timeout_secs: 10
server:
  listen: 0.0.0.0:9000
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.app.assets, vec!["app", "app.js", "style.css"]);
    assert_eq!(config.cache.strategy, Strategy::NetworkFirst);
    assert!(!config.cache.store_misses);
    assert_eq!(config.cache.name_prefix(), "timetagger");
    assert_eq!(config.network.timeout_secs, Some(10));
    assert_eq!(config.server.listen.port(), 9000);
  }

  #[test]
  fn test_rejects_name_without_prefix() {
    let yaml = "app:\n  origin: https://example.com/\ncache:\n  prefix: timetagger\n  name: other_v1\n";
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("must start with"));
  }

  #[test]
  fn test_rejects_non_http_origin() {
    assert!(Config::from_yaml("app:\n  origin: file:///srv/app/\n").is_err());
    assert!(Config::from_yaml("app:\n  origin: not a url\n").is_err());
  }

  #[test]
  fn test_rejects_unknown_strategy() {
    let yaml = "app:\n  origin: https://example.com/\ncache:\n  strategy: stale-while-revalidate\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_load_missing_explicit_path() {
    let result = Config::load(Some(Path::new("/nonexistent/swcache.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swcache.yaml");
    std::fs::write(&path, "app:\n  origin: http://localhost:8000/\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.app.origin, "http://localhost:8000/");
  }
}
