//! Installed Jira instances
//!
//! An instance is one installed connection to a Jira deployment. The registry
//! ([`Instances`]) holds only the [`InstanceCommon`] identity records; the
//! full per-flavor record ([`Instance`]) lives in the instance store and is
//! loaded on demand.
//!
//! # Flavors
//!
//! - **Server**: self-hosted Jira; REST lives under the base URL
//! - **CloudOAuth**: Jira Cloud reached through the Atlassian API gateway
//! - **Cloud**: Jira Cloud installed as an app; REST lives under the base URL

pub mod registry;
pub mod update;

pub use registry::{InstanceConfig, Instances, LICENSE_ERROR};
pub use update::{update_instances, update_instances_with};

use crate::client::{Client, CloudClient, JiraClient, ServerClient};
use crate::types::{Id, Keyed};
use crate::user::Connection;
use crate::{JiraLinkError, Result};
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

/// Gateway used by OAuth-connected cloud instances
pub const ATLASSIAN_API_GATEWAY: &str = "https://api.atlassian.com/ex/jira";

/// Upstream flavor of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceType {
    #[serde(rename = "server")]
    Server,
    #[serde(rename = "cloud-oauth")]
    CloudOAuth,
    #[serde(rename = "cloud")]
    Cloud,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Server => "server",
            InstanceType::CloudOAuth => "cloud-oauth",
            InstanceType::Cloud => "cloud",
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstanceType {
    type Err = JiraLinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "server" => Ok(InstanceType::Server),
            "cloud-oauth" | "cloud_oauth" | "oauth" => Ok(InstanceType::CloudOAuth),
            "cloud" => Ok(InstanceType::Cloud),
            other => Err(JiraLinkError::InvalidInput(format!(
                "unknown instance type {:?}; expected server, cloud-oauth or cloud",
                other
            ))),
        }
    }
}

/// Identity record of one installed instance, owned by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCommon {
    #[serde(rename = "InstanceID")]
    pub instance_id: Id,

    #[serde(rename = "Type")]
    pub instance_type: InstanceType,

    #[serde(rename = "Alias", default, skip_serializing_if = "String::is_empty")]
    pub alias: String,

    #[serde(rename = "IsV2Legacy", default)]
    pub is_v2_legacy: bool,
}

impl InstanceCommon {
    pub fn new(instance_id: impl Into<Id>, instance_type: InstanceType) -> Self {
        Self {
            instance_id: instance_id.into(),
            instance_type,
            alias: String::new(),
            is_v2_legacy: false,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn as_config(&self) -> InstanceConfig {
        InstanceConfig {
            instance_id: self.instance_id.clone(),
            instance_type: self.instance_type,
            alias: self.alias.clone(),
            is_v2_legacy: self.is_v2_legacy,
        }
    }
}

impl Keyed for InstanceCommon {
    fn key(&self) -> &Id {
        &self.instance_id
    }
}

/// Self-hosted Jira
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstance {
    #[serde(flatten)]
    pub common: InstanceCommon,

    #[serde(rename = "JiraBaseURL")]
    pub jira_base_url: String,
}

/// Jira Cloud connected through OAuth; API calls go through the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudOAuthInstance {
    #[serde(flatten)]
    pub common: InstanceCommon,

    #[serde(rename = "JiraBaseURL")]
    pub jira_base_url: String,

    #[serde(rename = "JiraCloudID")]
    pub jira_cloud_id: String,
}

/// Jira Cloud installed as an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudInstance {
    #[serde(flatten)]
    pub common: InstanceCommon,

    #[serde(rename = "JiraBaseURL")]
    pub jira_base_url: String,

    #[serde(rename = "AppKey", default)]
    pub app_key: String,
}

/// Full per-instance record, one variant per upstream flavor.
///
/// Serialized as a flat object; the `Type` field selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Instance {
    Server(ServerInstance),
    CloudOAuth(CloudOAuthInstance),
    Cloud(CloudInstance),
}

impl<'de> Deserialize<'de> for Instance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        let value = serde_json::Value::deserialize(deserializer)?;
        let kind: InstanceType = value
            .get("Type")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(D::Error::custom)?
            .ok_or_else(|| D::Error::missing_field("Type"))?;

        let instance = match kind {
            InstanceType::Server => serde_json::from_value(value).map(Instance::Server),
            InstanceType::CloudOAuth => serde_json::from_value(value).map(Instance::CloudOAuth),
            InstanceType::Cloud => serde_json::from_value(value).map(Instance::Cloud),
        };
        instance.map_err(D::Error::custom)
    }
}

impl Instance {
    /// A self-hosted instance identified by its normalized base URL
    pub fn server(jira_url: &str) -> Result<Self> {
        let url = normalize_jira_url(jira_url)?;
        Ok(Instance::Server(ServerInstance {
            common: InstanceCommon::new(url.as_str(), InstanceType::Server),
            jira_base_url: url,
        }))
    }

    /// An OAuth-connected cloud instance
    pub fn cloud_oauth(jira_url: &str, cloud_id: impl Into<String>) -> Result<Self> {
        let url = normalize_jira_url(jira_url)?;
        Ok(Instance::CloudOAuth(CloudOAuthInstance {
            common: InstanceCommon::new(url.as_str(), InstanceType::CloudOAuth),
            jira_base_url: url,
            jira_cloud_id: cloud_id.into(),
        }))
    }

    /// An app-installed cloud instance
    pub fn cloud(jira_url: &str, app_key: impl Into<String>) -> Result<Self> {
        let url = normalize_jira_url(jira_url)?;
        Ok(Instance::Cloud(CloudInstance {
            common: InstanceCommon::new(url.as_str(), InstanceType::Cloud),
            jira_base_url: url,
            app_key: app_key.into(),
        }))
    }

    pub fn common(&self) -> &InstanceCommon {
        match self {
            Instance::Server(i) => &i.common,
            Instance::CloudOAuth(i) => &i.common,
            Instance::Cloud(i) => &i.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut InstanceCommon {
        match self {
            Instance::Server(i) => &mut i.common,
            Instance::CloudOAuth(i) => &mut i.common,
            Instance::Cloud(i) => &mut i.common,
        }
    }

    pub fn id(&self) -> &Id {
        &self.common().instance_id
    }

    pub fn instance_type(&self) -> InstanceType {
        self.common().instance_type
    }

    /// Browser-facing base URL (used for issue links)
    pub fn jira_base_url(&self) -> &str {
        match self {
            Instance::Server(i) => &i.jira_base_url,
            Instance::CloudOAuth(i) => &i.jira_base_url,
            Instance::Cloud(i) => &i.jira_base_url,
        }
    }

    /// Root under which `/rest/api/...` lives
    pub fn rest_root(&self) -> String {
        match self {
            Instance::Server(i) => i.jira_base_url.clone(),
            Instance::CloudOAuth(i) => format!("{}/{}", ATLASSIAN_API_GATEWAY, i.jira_cloud_id),
            Instance::Cloud(i) => i.jira_base_url.clone(),
        }
    }

    /// Link to an issue in the Jira UI
    pub fn browse_url(&self, issue_key: &str) -> String {
        format!("{}/browse/{}", self.jira_base_url(), issue_key)
    }

    /// Build an upstream client for one user's connection
    pub fn get_client(
        &self,
        http: &reqwest::Client,
        connection: &Connection,
    ) -> Result<Arc<dyn Client>> {
        let base = JiraClient::new(http.clone(), &self.rest_root(), connection.credentials.clone())?;
        Ok(match self {
            Instance::Server(_) => Arc::new(ServerClient::new(base)),
            Instance::CloudOAuth(_) | Instance::Cloud(_) => Arc::new(CloudClient::new(base)),
        })
    }
}

/// Normalize a Jira URL into its canonical instance-ID form.
///
/// Accepts bare hosts (`jira.example.com`), defaults the scheme to https,
/// lowercases the host, and drops query, fragment and trailing slashes.
pub fn normalize_jira_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(JiraLinkError::InvalidInput("empty Jira URL".to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| JiraLinkError::InvalidInput(format!("invalid URL {:?}: {}", raw, e)))?;
    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h,
        _ => {
            return Err(JiraLinkError::InvalidInput(format!(
                "invalid URL, no hostname: {:?}",
                raw
            )))
        }
    };

    let mut out = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        out.push_str(&format!(":{}", port));
    }
    out.push_str(url.path().trim_end_matches('/'));
    Ok(out)
}
