//! Key safety guard for untrusted property names.
//!
//! Untrusted strings that end up as object or map keys can walk an
//! inherited namespace in dynamically typed consumers (`__proto__`,
//! `constructor.prototype`). Keys are screened here before any insertion,
//! and [`SafeKeyMap`] makes the screening part of the type: its key space
//! is [`SafeKey`], which only this module can construct.

use crate::constants::{MAX_KEY_LENGTH, RESERVED_KEYS, RESERVED_KEY_FRAGMENTS};
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::hash_map::{self, HashMap};
use std::fmt;

/// Check whether a key may be used as a property name for untrusted data.
///
/// # Examples
///
/// ```
/// use query_guard::security::is_safe_key;
///
/// assert!(is_safe_key("username"));
/// assert!(is_safe_key("PROD001"));
/// assert!(!is_safe_key("__proto__"));
/// assert!(!is_safe_key("Constructor"));
/// assert!(!is_safe_key("a.__proto__.b"));
/// ```
pub fn is_safe_key(key: &str) -> bool {
    if key.is_empty() {
        return false;
    }

    let lower = key.to_lowercase();

    if RESERVED_KEYS.contains(&lower.as_str()) {
        return false;
    }

    if RESERVED_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
    {
        return false;
    }

    // Path segments: a.prototype.b, a[prototype], a["prototype"]
    !lower
        .split(['.', '[', ']'])
        .map(|segment| segment.trim_matches(|c| c == '\'' || c == '"'))
        .any(|segment| RESERVED_KEYS.contains(&segment))
}

/// Check a JSON value that is about to be used as a key.
///
/// Non-string keys are rejected outright.
pub fn is_safe_key_value(key: &Value) -> bool {
    match key {
        Value::String(s) => is_safe_key(s),
        _ => false,
    }
}

/// Screen every object key of a JSON document, at any depth.
///
/// Returns the first offending key's reason. Used before merging an
/// untrusted document into stored data so a nested `{"a": {"__proto__": ..}}`
/// cannot slip through a top-level-only check.
pub fn screen_json_keys(value: &Value) -> Result<(), ErrorKind> {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if !is_safe_key(key) {
                    return Err(ErrorKind::UnsafeKey);
                }
                screen_json_keys(nested)?;
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(screen_json_keys),
        _ => Ok(()),
    }
}

/// A property name that passed the key safety guard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SafeKey(String);

impl SafeKey {
    /// Screen a key and wrap it.
    pub fn new(key: &str) -> Result<Self, ErrorKind> {
        if key.is_empty() {
            return Err(ErrorKind::InvalidType);
        }
        if key.chars().count() > MAX_KEY_LENGTH {
            return Err(ErrorKind::TooLong);
        }
        if !is_safe_key(key) {
            return Err(ErrorKind::UnsafeKey);
        }
        Ok(Self(key.to_string()))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SafeKey {
    type Error = ErrorKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<SafeKey> for String {
    fn from(key: SafeKey) -> Self {
        key.0
    }
}

impl Borrow<str> for SafeKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SafeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Map keyed by untrusted-but-screened names.
///
/// Backed by a plain `HashMap`, which has no inherited namespace: a lookup
/// only ever sees entries that were inserted. Insertion requires a
/// [`SafeKey`], so the guard cannot be skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SafeKeyMap<V> {
    entries: HashMap<SafeKey, V>,
}

impl<V> SafeKeyMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert a value under a screened key.
    pub fn insert(&mut self, key: SafeKey, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Screen a raw key, then insert.
    pub fn try_insert(&mut self, key: &str, value: V) -> Result<Option<V>, ErrorKind> {
        let key = SafeKey::new(key)?;
        Ok(self.insert(key, value))
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    /// Get a mutable value by key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Remove a value by key.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key)
    }

    /// Check if a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries.
    pub fn iter(&self) -> hash_map::Iter<'_, SafeKey, V> {
        self.entries.iter()
    }

    /// Iterate over keys.
    pub fn keys(&self) -> hash_map::Keys<'_, SafeKey, V> {
        self.entries.keys()
    }
}

impl<V> Default for SafeKeyMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_keys_rejected() {
        for key in ["__proto__", "Constructor", "PROTOTYPE", "a.__proto__.b"] {
            assert!(!is_safe_key(key), "{key} should be unsafe");
        }
    }

    #[test]
    fn test_ordinary_keys_accepted() {
        for key in ["username", "order_id", "PROD001", "proto", "construct"] {
            assert!(is_safe_key(key), "{key} should be safe");
        }
    }

    #[test]
    fn test_nested_paths_rejected() {
        assert!(!is_safe_key("constructor.prototype.admin"));
        assert!(!is_safe_key("settings.prototype.polluted"));
        assert!(!is_safe_key("a[prototype]"));
        assert!(!is_safe_key("a[\"prototype\"]"));
        assert!(!is_safe_key("x__PROTO__y"));
        assert!(is_safe_key("settings.theme"));
    }

    #[test]
    fn test_empty_and_non_string_keys() {
        assert!(!is_safe_key(""));
        assert!(!is_safe_key_value(&json!(42)));
        assert!(!is_safe_key_value(&json!(null)));
        assert!(!is_safe_key_value(&json!(["username"])));
        assert!(is_safe_key_value(&json!("username")));
    }

    #[test]
    fn test_safe_key_construction() {
        assert_eq!(SafeKey::new("note-1").unwrap().as_str(), "note-1");
        assert_eq!(SafeKey::new("__proto__"), Err(ErrorKind::UnsafeKey));
        assert_eq!(SafeKey::new(""), Err(ErrorKind::InvalidType));
        assert_eq!(
            SafeKey::new(&"k".repeat(MAX_KEY_LENGTH + 1)),
            Err(ErrorKind::TooLong)
        );
    }

    #[test]
    fn test_safe_key_deserialize_screens() {
        let ok: Result<SafeKey, _> = serde_json::from_value(json!("theme"));
        assert!(ok.is_ok());
        let bad: Result<SafeKey, _> = serde_json::from_value(json!("__proto__"));
        assert!(bad.is_err());
    }

    #[test]
    fn test_safe_key_map() {
        let mut map = SafeKeyMap::new();
        assert!(map.try_insert("theme", 1).unwrap().is_none());
        assert_eq!(map.try_insert("theme", 2).unwrap(), Some(1));
        assert_eq!(map.try_insert("__proto__", 3), Err(ErrorKind::UnsafeKey));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("theme"), Some(&2));
        // Lookups of reserved names only ever see inserted entries.
        assert!(map.get("constructor").is_none());
        assert!(map.get("toString").is_none());
    }

    #[test]
    fn test_screen_nested_document() {
        assert!(screen_json_keys(&json!({"a": {"b": [1, {"c": 2}]}})).is_ok());
        assert_eq!(
            screen_json_keys(&json!({"a": {"__proto__": {"admin": true}}})),
            Err(ErrorKind::UnsafeKey)
        );
        assert_eq!(
            screen_json_keys(&json!([{"ok": 1}, {"constructor": {"prototype": 1}}])),
            Err(ErrorKind::UnsafeKey)
        );
    }
}
