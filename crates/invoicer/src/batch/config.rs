use std::time::Duration;

use crate::config::{
    Config, KeyDisambiguation, DEFAULT_EXTRACTION_PROMPT, MAX_TIMEOUT_SECS, MAX_WINDOW_SECS,
};
use crate::error::ConfigError;

/// Runtime settings the batch pipeline needs, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub prompt: String,
    pub request_timeout: Duration,
    pub max_operations: u32,
    pub rate_window: Duration,
    pub max_retries: u32,
    pub root_prefix: String,
    pub key_disambiguation: KeyDisambiguation,
}

impl BatchConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prompt: config.inference.prompt().to_string(),
            request_timeout: Duration::from_secs(config.inference.timeout_secs),
            max_operations: config.rate_limit.max_operations,
            rate_window: Duration::from_secs(config.rate_limit.window_secs),
            max_retries: config.retry.max_retries,
            root_prefix: config.storage.root_prefix.clone(),
            key_disambiguation: config.storage.key_disambiguation,
        }
    }

    /// Same bounds `validate_config` applies to the file form.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Validation { message });

        if self.max_operations == 0 {
            return invalid("max_operations must be greater than 0".to_string());
        }
        if self.rate_window.is_zero() || self.rate_window > Duration::from_secs(MAX_WINDOW_SECS) {
            return invalid(format!(
                "rate_window must be between 1s and {}s, got {:?}",
                MAX_WINDOW_SECS, self.rate_window
            ));
        }
        if self.request_timeout.is_zero()
            || self.request_timeout > Duration::from_secs(MAX_TIMEOUT_SECS)
        {
            return invalid(format!(
                "request_timeout must be between 1s and {}s, got {:?}",
                MAX_TIMEOUT_SECS, self.request_timeout
            ));
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_EXTRACTION_PROMPT.to_string(),
            request_timeout: Duration::from_secs(120),
            max_operations: 10,
            rate_window: Duration::from_secs(60),
            max_retries: 0,
            root_prefix: "invoice_processing/".to_string(),
            key_disambiguation: KeyDisambiguation::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config_matches_default() {
        let from_config = BatchConfig::from_config(&Config::default());
        let default = BatchConfig::default();

        assert_eq!(from_config.prompt, default.prompt);
        assert_eq!(from_config.request_timeout, default.request_timeout);
        assert_eq!(from_config.max_operations, default.max_operations);
        assert_eq!(from_config.rate_window, default.rate_window);
        assert_eq!(from_config.root_prefix, default.root_prefix);
    }

    #[test]
    fn test_validate_bounds() {
        assert!(BatchConfig::default().validate().is_ok());

        let bad = [
            BatchConfig {
                max_operations: 0,
                ..BatchConfig::default()
            },
            BatchConfig {
                rate_window: Duration::ZERO,
                ..BatchConfig::default()
            },
            BatchConfig {
                rate_window: Duration::MAX,
                ..BatchConfig::default()
            },
            BatchConfig {
                request_timeout: Duration::from_secs(MAX_TIMEOUT_SECS + 1),
                ..BatchConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(ConfigError::Validation { .. })),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_custom_prompt() {
        let mut config = Config::default();
        config.inference.prompt = Some("List totals only".to_string());
        config.inference.timeout_secs = 5;

        let batch = BatchConfig::from_config(&config);
        assert_eq!(batch.prompt, "List totals only");
        assert_eq!(batch.request_timeout, Duration::from_secs(5));
    }
}
