//! Configuration validation
//!
//! Collects every problem in a [`PluginConfig`] instead of stopping at the
//! first one.

use super::plugin_config::PluginConfig;
use crate::JiraLinkError;
use reqwest::Url;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

pub fn validate_config(config: &PluginConfig) -> ValidationResult {
    let mut errors = Vec::new();

    // An empty site URL only disables permalinks
    if !config.site_url.is_empty() {
        match Url::parse(&config.site_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => errors.push(ValidationError::new(
                "site_url",
                format!("Invalid site URL: {}", config.site_url),
            )),
        }
    }

    if config.bot_user_id.trim().is_empty() {
        errors.push(ValidationError::new(
            "bot_user_id",
            "Bot user ID cannot be empty",
        ));
    }

    if config.max_attachment_size.as_i64() <= 0 {
        errors.push(ValidationError::new(
            "max_attachment_size",
            format!(
                "Must be greater than 0, got {}",
                config.max_attachment_size.as_i64()
            ),
        ));
    }

    if config.http.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "http.timeout_secs",
            "Timeout must be greater than 0",
        ));
    }

    if config.store.path.as_os_str().is_empty() {
        errors.push(ValidationError::new("store.path", "Store path cannot be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate configuration and fold all problems into one error
pub fn validate_config_result(config: &PluginConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        JiraLinkError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ByteSize;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        let mut config = PluginConfig::new();
        config.site_url = "https://chat.example.com".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_site_url_allowed() {
        assert!(validate_config(&PluginConfig::new()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = PluginConfig::new();
        config.site_url = "ftp://chat".into();
        config.bot_user_id = " ".into();
        config.max_attachment_size = ByteSize(0);
        config.http.timeout_secs = 0;
        config.store.path = PathBuf::new();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "site_url",
                "bot_user_id",
                "max_attachment_size",
                "http.timeout_secs",
                "store.path"
            ]
        );
    }

    #[test]
    fn test_validate_config_result_joins_messages() {
        let mut config = PluginConfig::new();
        config.http.timeout_secs = 0;
        config.bot_user_id = String::new();

        let err = validate_config_result(&config).unwrap_err().to_string();
        assert!(err.contains("Configuration validation failed"));
        assert!(err.contains("bot_user_id: Bot user ID cannot be empty"));
        assert!(err.contains("http.timeout_secs: Timeout must be greater than 0"));
    }
}
