//! In-memory record store keyed by screened names.
//!
//! The store is an explicit handle: callers construct one and pass it to
//! whoever needs it. Cloning the handle shares the underlying records.

use crate::error::ErrorKind;
use crate::security::{screen_json_keys, SafeKey, SafeKeyMap};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// A stored JSON document and its timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    fn new(value: Value) -> Self {
        let now = Utc::now();
        Self {
            value,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Shared handle to a set of records.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Arc<RwLock<SafeKeyMap<Record>>>,
}

impl RecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    ///
    /// The key and every object key nested in `value` must be safe. Returns
    /// the previous value, if any.
    pub fn insert(&self, key: &str, value: Value) -> Result<Option<Value>, ErrorKind> {
        let key = SafeKey::new(key)?;
        screen_json_keys(&value)?;

        let mut records = self.records.write();
        let previous = match records.get_mut(key.as_str()) {
            Some(record) => {
                record.updated_at = Utc::now();
                Some(std::mem::replace(&mut record.value, value))
            }
            None => {
                records.insert(key.clone(), Record::new(value));
                None
            }
        };

        debug!("Stored record '{}'", key);
        Ok(previous)
    }

    /// Get a copy of a record.
    pub fn get(&self, key: &str) -> Option<Record> {
        self.records.read().get(key).cloned()
    }

    /// Get a copy of a record's value.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.records.read().get(key).map(|r| r.value.clone())
    }

    /// Remove a record.
    pub fn remove(&self, key: &str) -> Option<Record> {
        self.records.write().remove(key)
    }

    /// Deep-merge `patch` into the record at `key`, creating it if absent.
    ///
    /// The whole patch is screened before anything is written, so a patch
    /// with an unsafe key anywhere leaves the record untouched.
    pub fn merge(&self, key: &str, patch: &Value) -> Result<Record, ErrorKind> {
        let key = SafeKey::new(key)?;
        screen_json_keys(patch)?;

        let mut records = self.records.write();
        let record = match records.get_mut(key.as_str()) {
            Some(record) => {
                merge_value(&mut record.value, patch);
                record.updated_at = Utc::now();
                record.clone()
            }
            None => {
                let mut value = Value::Object(Map::new());
                merge_value(&mut value, patch);
                let record = Record::new(value);
                records.insert(key.clone(), record.clone());
                record
            }
        };

        debug!("Merged into record '{}'", key);
        Ok(record)
    }

    /// Check if a record exists.
    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Sorted list of record keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .read()
            .keys()
            .map(|k| k.as_str().to_string())
            .collect();
        keys.sort();
        keys
    }
}

/// Objects merge recursively; anything else replaces the target.
fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
