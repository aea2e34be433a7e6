//! jiralink configuration file handling
//!
//! Loads and manages ~/.config/jiralink/config.yaml.

use crate::store::StoreConfig;
use crate::types::ByteSize;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upstream HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds for Jira calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the shared HTTP client
    pub fn build_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.timeout())
            .user_agent(concat!("jiralink/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }
}

/// Where the SQLite store lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_store_path() -> PathBuf {
    StoreConfig::default().path
}

fn default_true() -> bool {
    true
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            wal_mode: true,
        }
    }
}

impl StoreSettings {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.path.clone(),
            wal_mode: self.wal_mode,
        }
    }
}

/// jiralink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Public URL of the messaging host, used for permalinks
    #[serde(default)]
    pub site_url: String,

    /// Host user that bot replies are posted as
    #[serde(default = "default_bot_user_id")]
    pub bot_user_id: String,

    /// Register the slash command with autocomplete data
    #[serde(default = "default_true")]
    pub enable_autocomplete: bool,

    /// Largest file copied to Jira as an attachment
    #[serde(default = "default_max_attachment_size")]
    pub max_attachment_size: ByteSize,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub store: StoreSettings,
}

fn default_bot_user_id() -> String {
    "jira".to_string()
}

fn default_max_attachment_size() -> ByteSize {
    ByteSize::mib(10)
}

impl PluginConfig {
    pub fn new() -> Self {
        Self {
            site_url: String::new(),
            bot_user_id: default_bot_user_id(),
            enable_autocomplete: true,
            max_attachment_size: default_max_attachment_size(),
            http: HttpConfig::default(),
            store: StoreSettings::default(),
        }
    }

    /// Load from the default path, or defaults if the file doesn't exist
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::new());
        }
        Self::load(&path)
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::JiraLinkError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading jiralink configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            site_url = %config.site_url,
            max_attachment_size = %config.max_attachment_size,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving jiralink configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// ~/.config/jiralink/config.yaml
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("jiralink");
        path.push("config.yaml");
        path
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self::new()
    }
}
