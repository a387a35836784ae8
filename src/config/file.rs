//! Configuration file loading

use super::Config;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default config file locations
const CONFIG_PATHS: &[&str] = &["/etc/whereabouts/config.toml", "./whereabouts.toml"];

/// Load configuration from `path`, or from the first default location that
/// exists. Built-in defaults apply when no file is found.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return load_from_path(path);
    }
    match find_config_file() {
        Some(path) => load_from_path(&path),
        None => {
            info!("No configuration file found, using defaults. Tried: {:?}", CONFIG_PATHS);
            let config = Config::default();
            super::validate(&config)?;
            Ok(config)
        },
    }
}

/// Find first existing config file
fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// Load and parse config from path
pub fn load_from_path(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    super::validate(&config)?;

    Ok(config)
}
