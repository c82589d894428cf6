use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the static assets are served from (e.g. "https://field.example.com")
  pub origin: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub replay: ReplayConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Version-tagged cache name; bumping it invalidates every older generation
  pub version: String,
  /// Root-relative asset paths cached at install time
  pub manifest: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "fieldsync-cache-v1.1.0".to_string(),
      manifest: [
        "/",
        "/index.html",
        "/manifest.json",
        "/favicon.ico",
        "/logo192.png",
        "/logo512.png",
        "/static/js/main.js",
        "/static/css/main.css",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Database file (defaults to $XDG_DATA_HOME/fieldsync/fieldsync.db)
  pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
  /// Pause between replayed entries
  pub delay_ms: u64,
  /// Fallback timer delay when background sync is unavailable
  pub fallback_delay_secs: u64,
  /// Whether sync registrations are honoured; when false the fallback timer is used
  pub background_sync: bool,
}

impl Default for ReplayConfig {
  fn default() -> Self {
    Self {
      delay_ms: 100,
      fallback_delay_secs: 5,
      background_sync: true,
    }
  }
}

impl ReplayConfig {
  pub fn delay(&self) -> Duration {
    Duration::from_millis(self.delay_ms)
  }

  pub fn fallback_delay(&self) -> Duration {
    Duration::from_secs(self.fallback_delay_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// URL probed to detect restored connectivity; no probing when unset
  pub probe_url: Option<String>,
  pub interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      interval_secs: 10,
    }
  }
}

impl Config {
  /// Load configuration, with `origin` overriding the file's value.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldsync/config.yaml
  ///
  /// Defaults are only used when no file exists and an origin is given; a
  /// file that fails to read or parse is always an error.
  pub fn load(explicit_path: Option<&Path>, origin: Option<&str>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if p.exists() => Some(p.to_path_buf()),
      Some(p) => return Err(eyre!("Config file not found: {}", p.display())),
      None => Self::find_config_file(),
    };
    Self::load_or_default(path.as_deref(), origin)
  }

  fn load_or_default(path: Option<&Path>, origin: Option<&str>) -> Result<Self> {
    let mut config = match (path, origin) {
      (Some(p), _) => Self::load_from_path(p)?,
      (None, Some(origin)) => {
        warn!(origin, "no configuration file found, using defaults");
        Self::from_origin(origin)?
      }
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/fieldsync/config.yaml\n\
                 with at least an `origin:` entry, or pass --origin."
        ))
      }
    };

    if let Some(origin) = origin {
      config.origin = origin.to_string();
      config.origin_url()?;
    }
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fieldsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldsync").join("config.yaml");
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

  /// Defaults for everything but the origin, for running without a file.
  pub fn from_origin(origin: &str) -> Result<Self> {
    let config = Self {
      origin: origin.to_string(),
      cache: CacheConfig::default(),
      queue: QueueConfig::default(),
      replay: ReplayConfig::default(),
      network: NetworkConfig::default(),
      connectivity: ConnectivityConfig::default(),
    };
    config.origin_url()?;
    Ok(config)
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.origin_url()?;
    Ok(config)
  }

  /// The origin as a URL that manifest paths can be joined onto.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }
}
