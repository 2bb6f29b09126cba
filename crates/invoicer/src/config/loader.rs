use std::path::Path;

use log::{debug, warn};

use crate::config::schema::{Config, StorageBackend};
use crate::error::ConfigError;

/// Environment variables consulted by [`apply_env_overrides`].
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_S3_BUCKET: &str = "S3_BUCKET";
pub const ENV_REQUESTS_PER_MINUTE: &str = "INVOICER_REQUESTS_PER_MINUTE";
pub const ENV_STORAGE_BACKEND: &str = "INVOICER_STORAGE_BACKEND";

/// Upper bound for `rate_limit.window_secs` (one day).
pub const MAX_WINDOW_SECS: u64 = 86_400;
/// Upper bound for `inference.timeout_secs` (one hour).
pub const MAX_TIMEOUT_SECS: u64 = 3_600;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!("Loaded config file {}", path.display());
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    std::fs::write(path, json).map_err(|e| ConfigError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

impl Config {
    /// Defaults overlaid with the process environment.
    ///
    /// This is the only place the environment feeds configuration; callers
    /// hand the resulting value to `BatchProcessor::from_config`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        validate_config(&config)?;
        Ok(config)
    }
}

/// Overlays environment values onto `config`.
///
/// `lookup` abstracts `std::env::var` so tests don't have to touch the real
/// environment. The Gemini key itself is not copied: the default credential
/// source already points at `GEMINI_API_KEY` and is resolved lazily.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bucket) = lookup(ENV_S3_BUCKET).filter(|b| !b.trim().is_empty()) {
        config.storage.bucket = bucket.trim().to_string();
    }

    if let Some(rpm) = lookup(ENV_REQUESTS_PER_MINUTE) {
        let parsed: u32 = rpm.trim().parse().map_err(|_| ConfigError::Validation {
            message: format!("{} must be a positive integer, got '{}'", ENV_REQUESTS_PER_MINUTE, rpm),
        })?;
        config.rate_limit.max_operations = parsed;
        config.rate_limit.window_secs = 60;
    }

    if let Some(backend) = lookup(ENV_STORAGE_BACKEND) {
        config.storage.backend = backend
            .parse::<StorageBackend>()
            .map_err(|message| ConfigError::Validation { message })?;
    }

    if config.inference.api_key.env_var.as_deref() == Some(ENV_GEMINI_API_KEY)
        && lookup(ENV_GEMINI_API_KEY).is_none()
        && config.inference.api_key.value.is_none()
        && config.inference.api_key.file.is_none()
    {
        warn!(
            "{} is not set; building a batch processor will fail",
            ENV_GEMINI_API_KEY
        );
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.rate_limit.max_operations == 0 {
        return Err(ConfigError::Validation {
            message: "rate_limit.max_operations must be greater than 0".to_string(),
        });
    }

    if config.rate_limit.window_secs == 0 || config.rate_limit.window_secs > MAX_WINDOW_SECS {
        return Err(ConfigError::Validation {
            message: format!(
                "rate_limit.window_secs must be between 1 and {}, got {}",
                MAX_WINDOW_SECS, config.rate_limit.window_secs
            ),
        });
    }

    if config.inference.timeout_secs == 0 || config.inference.timeout_secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::Validation {
            message: format!(
                "inference.timeout_secs must be between 1 and {}, got {}",
                MAX_TIMEOUT_SECS, config.inference.timeout_secs
            ),
        });
    }

    if config.inference.model.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "inference.model must not be empty".to_string(),
        });
    }

    if config.storage.bucket.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "storage.bucket must not be empty".to_string(),
        });
    }

    let prefix = &config.storage.root_prefix;
    if !prefix.is_empty() && !prefix.ends_with('/') {
        return Err(ConfigError::Validation {
            message: format!("storage.root_prefix must end with '/': {}", prefix),
        });
    }
    if prefix.starts_with('/') || prefix.split('/').any(|segment| segment == "..") {
        return Err(ConfigError::Validation {
            message: format!("storage.root_prefix must be a relative key prefix: {}", prefix),
        });
    }

    if let Some(prompt) = &config.inference.prompt {
        if prompt.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "inference.prompt must not be blank when set".to_string(),
            });
        }
    }

    Ok(())
}
