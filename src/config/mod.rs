//! Configuration system
//!
//! Loads ~/.config/jiralink/config.yaml with:
//! - Host site URL and bot identity
//! - Attachment size limit
//! - HTTP timeout for Jira calls
//! - SQLite store location

mod plugin_config;
pub mod validation;

pub use plugin_config::{HttpConfig, PluginConfig, StoreSettings};
pub use validation::{validate_config, validate_config_result, ValidationError};
