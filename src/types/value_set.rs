//! Ordered keyed collection
//!
//! [`ValueSet`] is an insertion-ordered map from [`Id`] to any [`Keyed`]
//! value. Listing order is deterministic: new keys are appended, overwrites
//! keep the original position and deletes preserve the order of the rest.
//! It serializes as a JSON array of its values.

use super::Id;
use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// A value that carries its own key
pub trait Keyed {
    fn key(&self) -> &Id;
}

impl Keyed for Id {
    fn key(&self) -> &Id {
        self
    }
}

/// Insertion-ordered set of keyed values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSet<V> {
    items: IndexMap<Id, V>,
}

/// A plain ordered set of identifiers
pub type IdSet = ValueSet<Id>;

impl<V> Default for ValueSet<V> {
    fn default() -> Self {
        Self {
            items: IndexMap::new(),
        }
    }
}

impl<V: Keyed> ValueSet<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Id) -> Option<&V> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut V> {
        self.items.get_mut(id)
    }

    /// Insert or overwrite by key. Returns the previous value, if any.
    pub fn set(&mut self, value: V) -> Option<V> {
        self.items.insert(value.key().clone(), value)
    }

    /// Remove by key, keeping the relative order of the remaining values.
    pub fn delete(&mut self, id: &Id) -> Option<V> {
        self.items.shift_remove(id)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.items.contains_key(id)
    }

    /// Keys in insertion order
    pub fn ids(&self) -> Vec<Id> {
        self.items.keys().cloned().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.items.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.items.values_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<V: Keyed> FromIterator<V> for ValueSet<V> {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.set(value);
        }
        set
    }
}

impl<V: Serialize> Serialize for ValueSet<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for value in self.items.values() {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

impl<'de, V> Deserialize<'de> for ValueSet<V>
where
    V: Deserialize<'de> + Keyed,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<V>::deserialize(deserializer)?;
        Ok(values.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(set: &IdSet) -> Vec<String> {
        set.ids().into_iter().map(Id::into_string).collect()
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut set = IdSet::new();
        set.set(Id::new("c"));
        set.set(Id::new("a"));
        set.set(Id::new("b"));
        assert_eq!(ids(&set), vec!["c", "a", "b"]);

        // Overwrite keeps position
        set.set(Id::new("a"));
        assert_eq!(ids(&set), vec!["c", "a", "b"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_delete_keeps_order() {
        let mut set: IdSet = ["a", "b", "c", "d"].into_iter().map(Id::new).collect();
        assert!(set.delete(&Id::new("b")).is_some());
        assert!(set.delete(&Id::new("missing")).is_none());
        assert_eq!(ids(&set), vec!["a", "c", "d"]);
        assert!(!set.contains(&Id::new("b")));
    }

    #[test]
    fn test_empty() {
        let mut set = IdSet::new();
        assert!(set.is_empty());
        set.set(Id::new("x"));
        assert!(!set.is_empty());
        set.delete(&Id::new("x"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_serializes_as_ordered_array() {
        let set: IdSet = ["z", "a"].into_iter().map(Id::new).collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["z","a"]"#);

        let back: IdSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_duplicate_keys_collapse_on_load() {
        let set: IdSet = serde_json::from_str(r#"["a","b","a"]"#).unwrap();
        assert_eq!(ids(&set), vec!["a", "b"]);
    }
}
