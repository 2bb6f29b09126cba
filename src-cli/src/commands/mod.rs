//! Subcommand implementations.

pub mod batches;
pub mod config;
pub mod process;
pub mod show;

use std::path::{Path, PathBuf};

use invoicer::config::{apply_env_overrides, load_config, validate_config};
use invoicer::Config;
use tracing::debug;

/// `{config_dir}/invoicer/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("invoicer")
        .join("config.json")
}

/// Explicit file, else the default file if present, else defaults; the
/// environment is overlaid in every case.
pub fn load_settings(config_path: Option<&str>) -> anyhow::Result<Config> {
    let file = match config_path {
        Some(path) => Some(PathBuf::from(path)),
        None => Some(default_config_path()).filter(|p| p.exists()),
    };

    let Some(file) = file else {
        debug!("No config file, using defaults and environment");
        return Ok(Config::from_env()?);
    };

    let mut config = load_config(Path::new(&file))?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    debug!("Using config file {}", file.display());
    Ok(config)
}
