//! Registry of installed instances
//!
//! [`Instances`] is the ordered set of [`InstanceCommon`] records persisted
//! as one value. Alias and legacy lookups are linear scans; installs number
//! in the single digits.

use super::{InstanceCommon, InstanceType};
use crate::types::{Id, ValueSet};
use crate::{JiraLinkError, Result};
use serde::{Deserialize, Serialize};

/// Returned when a second instance is installed without enterprise features
pub const LICENSE_ERROR: &str = "You need a valid Mattermost Professional, Enterprise or Enterprise Advanced License to install multiple Jira instances.";

/// Flat, serializable view of one registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub instance_id: Id,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub alias: String,
    pub is_v2_legacy: bool,
}

/// All installed instances, in installation order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instances {
    set: ValueSet<InstanceCommon>,
}

impl Instances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Id) -> Option<&InstanceCommon> {
        self.set.get(id)
    }

    /// Insert or overwrite by instance ID
    pub fn set(&mut self, instance: InstanceCommon) -> Option<InstanceCommon> {
        self.set.set(instance)
    }

    pub fn delete(&mut self, id: &Id) -> Option<InstanceCommon> {
        self.set.delete(id)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.set.contains(id)
    }

    pub fn ids(&self) -> Vec<Id> {
        self.set.ids()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceCommon> {
        self.set.values()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// The instance marked as the legacy (pre-multi-instance) target
    pub fn get_v2_legacy(&self) -> Option<&InstanceCommon> {
        self.set.values().find(|i| i.is_v2_legacy)
    }

    /// Mark `id` as the legacy instance, clearing any previous holder
    pub fn set_v2_legacy(&mut self, id: &Id) -> Result<()> {
        if !self.contains(id) {
            return Err(JiraLinkError::not_found(format!("instance {:?}", id.as_str())));
        }
        for instance in self.set.values_mut() {
            instance.is_v2_legacy = &instance.instance_id == id;
        }
        Ok(())
    }

    /// Alias of `id`, empty when unset or unknown
    pub fn get_alias(&self, id: &Id) -> &str {
        self.get(id).map(|i| i.alias.as_str()).unwrap_or("")
    }

    /// The instance with this alias; an empty alias never matches
    pub fn get_by_alias(&self, alias: &str) -> Option<&InstanceCommon> {
        if alias.is_empty() {
            return None;
        }
        self.set.values().find(|i| i.alias == alias)
    }

    /// `Ok(())` when no other instance uses `alias`, else the ID holding it
    pub fn is_alias_unique(&self, id: &Id, alias: &str) -> std::result::Result<(), Id> {
        match self.get_by_alias(alias) {
            Some(other) if &other.instance_id != id => Err(other.instance_id.clone()),
            _ => Ok(()),
        }
    }

    /// Set or clear (empty string) the alias of an installed instance
    pub fn set_alias(&mut self, id: &Id, alias: &str) -> Result<()> {
        let alias = alias.trim();
        if !self.contains(id) {
            return Err(JiraLinkError::not_found(format!("instance {:?}", id.as_str())));
        }
        if let Err(other) = self.is_alias_unique(id, alias) {
            return Err(JiraLinkError::InvalidInput(format!(
                "alias {:?} is already used by instance {}",
                alias, other
            )));
        }
        if let Some(instance) = self.set.get_mut(id) {
            instance.alias = alias.to_string();
        }
        Ok(())
    }

    /// Ordered snapshot for display and broadcast
    pub fn as_config_map(&self) -> Vec<InstanceConfig> {
        self.set.values().map(InstanceCommon::as_config).collect()
    }
}

impl FromIterator<InstanceCommon> for Instances {
    fn from_iter<I: IntoIterator<Item = InstanceCommon>>(iter: I) -> Self {
        Self {
            set: iter.into_iter().collect(),
        }
    }
}
