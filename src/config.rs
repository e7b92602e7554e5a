use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Worker configuration.
///
/// Every section has defaults matching the production deployment, so an
/// empty (or missing) file yields a working configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the app shell is served from; manifest entries resolve against it
  pub origin: String,
  pub cache: CacheConfig,
  /// URL substrings whose requests are never handled by the worker
  pub bypass: Vec<String>,
  pub notifications: NotificationsConfig,
  pub backend: BackendConfig,
  pub generation: GenerationConfig,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      cache: CacheConfig::default(),
      bypass: vec![
        "api.deepseek.com".to_string(),
        "firestore.googleapis.com".to_string(),
        "firebase".to_string(),
      ],
      notifications: NotificationsConfig::default(),
      backend: BackendConfig::default(),
      generation: GenerationConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub prefix: String,
  /// Bumping the version creates a new cache generation on the next install
  pub version: String,
  /// App shell entries, relative to `origin` or absolute
  pub manifest: Vec<String>,
  /// Document served to HTML navigations that miss the cache while offline
  pub offline_document: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "tamy-cache".to_string(),
      version: "v1".to_string(),
      manifest: [
        "/",
        "/index.html",
        "/assets/css/main.css",
        "/assets/js/main.js",
        "/assets/js/firebase.js",
        "/assets/js/deepseek-api.js",
        "/assets/images/logo.png",
        "/assets/images/default-avatar.png",
        "/assets/images/chat-background.png",
        "/assets/icons/icon-192.png",
        "/assets/icons/icon-512.png",
        "/manifest.json",
        "https://fonts.googleapis.com/icon?family=Material+Icons",
        "https://www.gstatic.com/firebasejs/11.6.1/firebase-app.js",
        "https://www.gstatic.com/firebasejs/11.6.1/firebase-firestore.js",
        "https://www.gstatic.com/firebasejs/11.6.1/firebase-analytics.js",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      offline_document: "/index.html".to_string(),
    }
  }
}

impl CacheConfig {
  /// Name of the cache generation this configuration installs.
  pub fn generation_name(&self) -> String {
    format!("{}-{}", self.prefix, self.version)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  /// Title used when a push payload carries none
  pub app_name: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      app_name: "Tâm Ý".to_string(),
      default_body: "Có thông báo mới từ Tâm Ý".to_string(),
      icon: "/assets/icons/icon-192.png".to_string(),
      badge: "/assets/icons/badge-icon.png".to_string(),
      vibrate: vec![100, 50, 100],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  /// Base URL of the message/profile document store REST API
  pub url: String,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8080/api/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
  /// Chat-completion endpoint
  pub url: String,
  pub model: String,
  pub temperature: f32,
  pub max_tokens: u32,
  /// System prompt describing the AI persona
  pub persona: String,
  /// Number of prior messages sent along with a new one
  pub history_window: usize,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self {
      url: "https://api.deepseek.com/v1/chat/completions".to_string(),
      model: "deepseek-chat".to_string(),
      temperature: 0.75,
      max_tokens: 1000,
      persona: "Bạn là Tâm Ý, một người bạn đồng hành AI thân thiện.".to_string(),
      history_window: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter level for this crate when RUST_LOG is unset
  pub level: String,
  /// Also write a daily-rotated log file under the data directory
  pub file: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: false,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tamy-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tamy-sw/config.yaml
  ///
  /// Falls back to the built-in defaults when no file exists.
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
    let local = PathBuf::from("tamy-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tamy-sw").join("config.yaml");
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
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse configuration from YAML text.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not to an empty map
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Parsed origin URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Parsed document store base URL. A trailing slash is added so that
  /// endpoint paths append rather than replace the last segment.
  pub fn backend_url(&self) -> Result<Url> {
    let mut raw = self.backend.url.clone();
    if !raw.ends_with('/') {
      raw.push('/');
    }
    Url::parse(&raw).map_err(|e| eyre!("Invalid backend url '{}': {}", self.backend.url, e))
  }

  /// URL prefixes of the document store and the text-generation endpoint.
  /// Requests to either are never handled by the worker.
  pub fn service_prefixes(&self) -> Result<Vec<String>> {
    Ok(vec![
      self.backend_url()?.to_string(),
      self.generation.url.clone(),
    ])
  }

  /// Get the text-generation API key from environment variables.
  ///
  /// Checks TAMY_API_KEY first, then DEEPSEEK_API_KEY as fallback.
  pub fn get_api_key() -> Option<String> {
    std::env::var("TAMY_API_KEY")
      .or_else(|_| std::env::var("DEEPSEEK_API_KEY"))
      .ok()
  }

  /// Get the optional document store bearer token.
  pub fn get_backend_token() -> Option<String> {
    std::env::var("TAMY_BACKEND_TOKEN").ok()
  }
}
