//! Configuration commands and config resolution

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rowfile_core::Config;
use tracing::{debug, error};

/// Resolve the effective config for a CLI invocation
///
/// An explicit `--config` file must load; otherwise the usual project > user >
/// default lookup applies. `--data-dir` overrides whatever the file says.
pub fn load_config(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Config> {
  let mut config = match config_path {
    Some(path) => Config::from_path(path).with_context(|| format!("Failed to load config {:?}", path))?,
    None => {
      let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
      Config::load_for_project(&cwd)
    }
  };

  if let Some(dir) = data_dir {
    config.store.data_dir = Some(dir);
  }
  Ok(config)
}

/// Show effective configuration
pub async fn cmd_config_show(config: &Config, explicit: Option<&Path>) -> Result<()> {
  let cwd = std::env::current_dir()?;
  let project_config = Config::project_config_path(&cwd);
  let user_config = Config::user_config_path();

  println!("Effective configuration for: {:?}", cwd);
  println!();

  if let Some(path) = explicit {
    println!("Using config: {:?}", path);
  } else if project_config.exists() {
    println!("Using project config: {:?}", project_config);
  } else if let Some(ref user_path) = user_config
    && user_path.exists()
  {
    println!("Using user config: {:?}", user_path);
  } else {
    println!("Using default configuration (no config file found)");
  }
  println!("Data directory: {:?}", config.store.data_dir());
  println!();

  let toml_str = config.to_toml()?;
  println!("{}", toml_str);

  Ok(())
}

/// Write a project config file with the default settings
pub async fn cmd_config_init() -> Result<()> {
  let cwd = std::env::current_dir()?;
  let config_path = Config::project_config_path(&cwd);

  if config_path.exists() {
    error!("Config file already exists: {:?}", config_path);
    println!("Delete it first if you want to regenerate");
    std::process::exit(1);
  }

  let template = Config::default().to_toml()?;
  std::fs::write(&config_path, &template).with_context(|| format!("Failed to write {:?}", config_path))?;
  debug!(path = %config_path.display(), "Wrote project config");

  println!("Created project config: {:?}", config_path);
  println!("Edit the file to customize settings.");

  Ok(())
}
