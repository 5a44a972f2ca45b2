//! JSON file backed settings
//!
//! The whole map is read once on open and rewritten on every `set`. Writes
//! go to a sibling temp file first and are renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

use super::SettingsStore;
use crate::error::{ReaderError, Result};

#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileSettings {
    /// Open the settings file, starting empty if it does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                ReaderError::Settings(format!("{}: {}", path.display(), e))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(path = %path.display(), entries = values.len(), "Settings opened");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }
}
