//! Configuration for rowfile with per-project overrides.
//!
//! Config priority: project-relative (.rowfile.toml) > user (~/.config/rowfile/config.toml) > defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default read block size for chunked line streaming (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 0x10000;

/// Default capacity of the channel between a rewrite's reader and generator
pub const DEFAULT_REWRITE_BUFFER: usize = 256;

/// Suffix appended to a table path while it is being rewritten
pub const DEFAULT_TEMP_SUFFIX: &str = "_temp";

/// Extension of table files (content is JSON Lines)
pub const DEFAULT_TABLE_EXTENSION: &str = "bson";

// ============================================================================
// Store Configuration
// ============================================================================

/// Storage engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Directory holding table files
  /// If not set, uses the platform data dir (see [`crate::dirs::default_data_dir`])
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data_dir: Option<PathBuf>,

  /// Block size for sequential reads in bytes (default: 65536)
  pub chunk_size: usize,

  /// Lines buffered between the reader and the writer of a rewrite (default: 256)
  pub rewrite_buffer: usize,

  /// Suffix for the temporary file used by atomic rewrites (default: "_temp")
  pub temp_suffix: String,

  /// Table file extension without the dot (default: "bson")
  pub table_extension: String,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      data_dir: None,
      chunk_size: DEFAULT_CHUNK_SIZE,
      rewrite_buffer: DEFAULT_REWRITE_BUFFER,
      temp_suffix: DEFAULT_TEMP_SUFFIX.to_string(),
      table_extension: DEFAULT_TABLE_EXTENSION.to_string(),
    }
  }
}

impl StoreConfig {
  /// Resolve the storage root, falling back to the default data dir
  pub fn data_dir(&self) -> PathBuf {
    self.data_dir.clone().unwrap_or_else(crate::dirs::default_data_dir)
  }

  /// Clamp values that would make the engine misbehave
  ///
  /// A chunk must hold at least two bytes (a one byte file is treated as empty),
  /// channels need a non-zero capacity and a rewrite needs a distinct temp path.
  pub fn sanitized(mut self) -> Self {
    self.chunk_size = self.chunk_size.max(2);
    self.rewrite_buffer = self.rewrite_buffer.max(1);
    if self.temp_suffix.is_empty() {
      self.temp_suffix = DEFAULT_TEMP_SUFFIX.to_string();
    }
    let extension = self.table_extension.trim_start_matches('.');
    self.table_extension = if extension.is_empty() {
      DEFAULT_TABLE_EXTENSION.to_string()
    } else {
      extension.to_string()
    };
    self
  }
}

// ============================================================================
// Log Configuration
// ============================================================================

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: "error", "warn", "info", "debug", "trace" (default: "info")
  /// RUST_LOG takes precedence when set
  pub level: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Complete rowfile configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  /// Storage engine settings
  #[serde(default)]
  pub store: StoreConfig,

  /// Logging settings
  #[serde(default)]
  pub log: LogConfig,
}

impl Config {
  /// Load config for a project directory, falling back to user config then defaults
  ///
  /// Unreadable or invalid files are ignored, mirroring how a missing file is treated.
  pub fn load_for_project(project_path: &Path) -> Self {
    // Try project-relative first
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(config) = Self::from_path(&project_config)
    {
      return config;
    }

    // Fall back to user config
    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(config) = Self::from_path(&user_config_path)
    {
      return config;
    }

    Self::default()
  }

  /// Load config from an explicit file, reporting read and parse failures
  pub fn from_path(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content).map_err(|source| Error::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Parse config from TOML text
  pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
    let mut config: Config = toml::from_str(content)?;
    config.store = config.store.sanitized();
    Ok(config)
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    Some(crate::dirs::default_config_dir().join("config.toml"))
  }

  /// Get the project-relative config path
  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(".rowfile.toml")
  }

  /// Render the config as TOML (used by `rowfile config`)
  pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
    toml::to_string_pretty(self)
  }
}
