//! Persistent user settings.
//!
//! A flat JSON object on disk. Values are held in memory and written back by
//! [`Settings::save_if_needed`] only after something changed.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Keys the host stores
pub mod keys {
    /// The serialized graph document, rewritten on every graph change
    pub const NODE_GRAPH_STATE: &str = "nodeGraphState";
    /// The known plugin list
    pub const PLUGIN_LIST: &str = "pluginList";
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    path: Option<PathBuf>,
    values: Map<String, Value>,
    dirty: bool,
}

impl Settings {
    /// Settings that are never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the settings file at `path`. A missing file yields empty settings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();

        let values = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| SettingsError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings at {}, starting empty", path.display());
                Map::new()
            }
            Err(e) => return Err(SettingsError::Io(e.to_string())),
        };

        Ok(Self {
            path: Some(path),
            values,
            dirty: false,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if self.values.get(&key) != Some(&value) {
            self.values.insert(key, value);
            self.dirty = true;
        }
    }

    pub fn remove_value(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Deserialize a stored value
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        self.value(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| SettingsError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// Serialize and store a value
    pub fn set_as<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), SettingsError> {
        let value = serde_json::to_value(value).map_err(|e| SettingsError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write to disk if anything changed since the last write.
    ///
    /// Returns whether a write happened.
    pub fn save_if_needed(&mut self) -> Result<bool, SettingsError> {
        if !self.dirty {
            return Ok(false);
        }
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(false);
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }

        let text = serde_json::to_string_pretty(&self.values).map_err(|e| {
            SettingsError::InvalidValue {
                key: String::new(),
                message: e.to_string(),
            }
        })?;
        std::fs::write(path, text).map_err(|e| SettingsError::Io(e.to_string()))?;

        tracing::debug!("Saved settings to {}", path.display());
        self.dirty = false;
        Ok(true)
    }
}

/// Errors from the settings store
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Cannot parse settings file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
