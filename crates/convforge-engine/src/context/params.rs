//! Insertion-ordered parameter maps.

use std::collections::HashMap;

use convforge_common::CleanupPolicy;

/// A single stored parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// The value, always kept as a string.
    pub value: String,
    /// What to do with the file this value names when the run ends.
    pub cleanup: CleanupPolicy,
}

impl Param {
    /// A parameter that is never cleaned up.
    pub fn keep(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            cleanup: CleanupPolicy::Keep,
        }
    }
}

/// String-keyed parameter map that preserves insertion order.
///
/// Re-inserting an existing name replaces the value but keeps the original
/// position.
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    entries: Vec<(String, Param)>,
    index: HashMap<String, usize>,
}

impl ParamMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a parameter.
    pub fn insert(&mut self, name: impl Into<String>, param: Param) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&pos) => self.entries[pos].1 = param,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, param));
            }
        }
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.index.get(name).map(|&pos| &self.entries[pos].1)
    }

    /// Look up just the value.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|p| p.value.as_str())
    }

    /// Whether a parameter with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_preserved() {
        let mut map = ParamMap::new();
        map.insert("b", Param::keep("2"));
        map.insert("a", Param::keep("1"));
        map.insert("c", Param::keep("3"));

        let names: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut map = ParamMap::new();
        map.insert("first", Param::keep("1"));
        map.insert("second", Param::keep("2"));
        map.insert("first", Param::keep("one"));

        assert_eq!(map.len(), 2);
        assert_eq!(map.value("first"), Some("one"));
        assert_eq!(map.iter().next().unwrap().0, "first");
    }

    #[test]
    fn test_missing_entry() {
        let map = ParamMap::new();
        assert!(map.get("nope").is_none());
        assert!(!map.contains("nope"));
        assert!(map.is_empty());
    }
}
