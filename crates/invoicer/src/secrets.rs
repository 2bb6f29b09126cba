//! Credential resolution for the inference API key and storage credentials.
//!
//! A credential can be supplied three ways, checked in this order:
//!
//! 1. **Direct value** in the config file (`"api_key": { "value": "..." }`), handy for local runs
//! 2. **File** containing the value (`"api_key": { "file": "/run/secrets/gemini" }`)
//! 3. **Environment variable** holding the value (`"api_key": { "env_var": "GEMINI_API_KEY" }`)
//!
//! Resolution happens once, when a `BatchProcessor` or storage backend is
//! constructed. Nothing below that layer reads the process environment.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No credential source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read credential from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Credential resolved to an empty value")]
    Empty,
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a single credential comes from. Serialized inline in config sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl CredentialSource {
    /// A source that only reads the given environment variable.
    pub fn env(name: &str) -> Self {
        Self {
            value: None,
            file: None,
            env_var: Some(name.to_string()),
        }
    }

    pub fn resolve(&self) -> Result<SecretString> {
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }

    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        resolve_secret_optional(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }

    /// True when at least one source is named; says nothing about whether it resolves.
    pub fn is_configured(&self) -> bool {
        [&self.value, &self.file, &self.env_var]
            .iter()
            .any(|s| s.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

/// Resolves a credential from the first non-empty source.
///
/// File contents and environment values are trimmed. A source that resolves
/// to an empty string is rejected with [`SecretError::Empty`]; an API key of
/// `""` is a configuration mistake, not a credential.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        return non_empty(content.trim());
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => non_empty(value.trim()),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but an unconfigured or unset source yields `None`.
///
/// Used for optional credentials such as an S3 session token.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) | Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn non_empty(value: &str) -> Result<SecretString> {
    if value.is_empty() {
        Err(SecretError::Empty)
    } else {
        Ok(SecretString::from(value.to_string()))
    }
}

/// Expands a leading `~` to the user's home directory. `~user/...` is not supported.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("INVOICER_TEST_SECRET_1", "env_value");
        let result =
            resolve_secret(Some("direct_value"), None, Some("INVOICER_TEST_SECRET_1")).unwrap();
        assert_eq!(result.expose_secret(), "direct_value");
        std::env::remove_var("INVOICER_TEST_SECRET_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "file_value").unwrap();

        std::env::set_var("INVOICER_TEST_SECRET_2", "env_value");
        let result = resolve_secret(
            None,
            Some(temp_file.path().to_str().unwrap()),
            Some("INVOICER_TEST_SECRET_2"),
        )
        .unwrap();
        assert_eq!(result.expose_secret(), "file_value");
        std::env::remove_var("INVOICER_TEST_SECRET_2");
    }

    #[test]
    #[serial]
    fn test_env_var_fallback_is_trimmed() {
        std::env::set_var("INVOICER_TEST_SECRET_3", "  env_value\n");
        let source = CredentialSource::env("INVOICER_TEST_SECRET_3");
        assert_eq!(source.resolve().unwrap().expose_secret(), "env_value");
        std::env::remove_var("INVOICER_TEST_SECRET_3");
    }

    #[test]
    fn test_no_source_error() {
        let result = CredentialSource::default().resolve();
        assert!(matches!(result, Err(SecretError::NoSourceProvided)));
    }

    #[test]
    #[serial]
    fn test_empty_env_value_rejected() {
        std::env::set_var("INVOICER_TEST_SECRET_4", "   ");
        let result = resolve_secret(None, None, Some("INVOICER_TEST_SECRET_4"));
        assert!(matches!(result, Err(SecretError::Empty)));
        std::env::remove_var("INVOICER_TEST_SECRET_4");
    }

    #[test]
    fn test_file_not_found_error() {
        let result = resolve_secret(None, Some("/nonexistent/path/to/secret"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_env_var_not_set_error() {
        let result = resolve_secret(None, None, Some("INVOICER_DEFINITELY_NOT_SET_12345"));
        assert!(matches!(result, Err(SecretError::EnvVarNotSet { .. })));
    }

    #[test]
    fn test_optional_tolerates_unset_env_var() {
        let source = CredentialSource::env("INVOICER_DEFINITELY_NOT_SET_67890");
        assert!(source.resolve_optional().unwrap().is_none());
        assert!(source.is_configured());
        assert!(!CredentialSource::default().is_configured());
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        assert_eq!(expand_home("/absolute/path"), "/absolute/path");
        assert_eq!(expand_home("relative/path"), "relative/path");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home("~/secret"),
                format!("{}/secret", home.to_string_lossy())
            );
        }
    }
}
