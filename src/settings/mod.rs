//! Local reader preferences
//!
//! A flat key-value store of JSON values. Keys are fixed names such as
//! `reader.fontSize`; per-book keys append the book id.

mod file;

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

pub use file::JsonFileSettings;

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Read a typed value; missing or malformed entries yield `None`
pub fn load<T: DeserializeOwned>(store: &dyn SettingsStore, key: &str) -> Option<T> {
    let value = store.get(key)?;
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            tracing::warn!(key, error = %err, "Ignoring malformed setting");
            None
        }
    }
}

pub fn save<T: Serialize>(store: &dyn SettingsStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?)
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_round_trip() {
        let store = MemorySettings::new();
        save(&store, "reader.fontSize", &120u16).unwrap();
        assert_eq!(load::<u16>(&store, "reader.fontSize"), Some(120));
        assert_eq!(load::<u16>(&store, "reader.lineHeight"), None);
    }

    #[test]
    fn test_malformed_value_is_ignored() {
        let store = MemorySettings::new();
        store.set("reader.fontSize", json!("huge")).unwrap();
        assert_eq!(load::<u16>(&store, "reader.fontSize"), None);
    }
}
