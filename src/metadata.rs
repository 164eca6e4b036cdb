//! String metadata carried alongside queue payloads.
//!
//! Transports map their header or attribute concept onto [`Metadata`]. Keys
//! are kept sorted so iteration and serialisation are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Ordered `String -> String` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert or replace `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style [`Metadata::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy every entry of `other` into `self`. Keys present in both take
    /// the value from `other`.
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Metadata {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.0.insert(k.into(), v.into());
        }
    }
}

impl IntoIterator for Metadata {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<BTreeMap<String, String>> for Metadata {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let mut md = Metadata::new();
        assert!(md.is_empty());
        assert_eq!(md.set("trace-id", "abc"), None);
        assert_eq!(md.set("trace-id", "def"), Some("abc".to_string()));
        assert_eq!(md.get("trace-id"), Some("def"));
        assert_eq!(md.len(), 1);
        assert_eq!(md.remove("trace-id"), Some("def".to_string()));
        assert!(md.get("trace-id").is_none());
    }

    #[test]
    fn test_merge_right_side_wins() {
        let mut left = Metadata::new().with("a", "1").with("b", "2");
        let right = Metadata::new().with("b", "3").with("c", "4");
        left.merge(&right);
        let entries: Vec<_> = left.iter().collect();
        assert_eq!(entries, vec![("a", "1"), ("b", "3"), ("c", "4")]);
    }

    #[test]
    fn test_serde_flat_object() {
        let md: Metadata = [("z", "last"), ("a", "first")].into_iter().collect();
        let json = serde_json::to_string(&md).unwrap();
        assert_eq!(json, r#"{"a":"first","z":"last"}"#);
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, md);
    }
}
