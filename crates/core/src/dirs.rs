//! Default locations for rowfile data and configuration

use std::path::PathBuf;

/// Get the default base path for table files
///
/// Respects the following environment variables (in order of precedence):
/// 1. DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("DATA_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("rowfile");
  }

  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("rowfile")
}

/// Get the default config directory
///
/// Respects the following environment variables (in order of precedence):
/// 1. XDG_CONFIG_HOME - standard XDG config home directory
/// 2. dirs::config_dir() - platform default
///
/// `CONFIG_DIR` is handled by [`crate::Config::user_config_path`] since it
/// names the directory holding `config.toml` directly.
pub fn default_config_dir() -> PathBuf {
  if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
    return PathBuf::from(xdg_config).join("rowfile");
  }

  dirs::config_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("rowfile")
}
