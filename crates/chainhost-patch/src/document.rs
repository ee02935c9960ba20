//! Persisted graph documents.
//!
//! A [`GraphDocument`] is a plain snapshot of the topology plus each plugin's
//! descriptor and opaque state. It is stored as RON on disk and as JSON inside
//! the settings store. Plugin state is base64 text.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chainhost_plugin::PluginDescriptor;
use serde::{Deserialize, Serialize};

use crate::topology::{NodeRole, Position};

/// Newest document format this build reads and writes
pub const DOCUMENT_VERSION: u32 = 1;

const fn current_version() -> u32 {
    DOCUMENT_VERSION
}

/// One node as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: u32,
    #[serde(rename = "type")]
    pub role: NodeRole,
    pub name: String,
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_file_or_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_state_base64: Option<String>,
}

impl NodeRecord {
    /// A device endpoint record
    pub fn endpoint(id: u32, role: NodeRole, name: impl Into<String>, position: Position) -> Self {
        Self {
            id,
            role,
            name: name.into(),
            x: position.x,
            y: position.y,
            plugin_name: None,
            plugin_format: None,
            plugin_file_or_identifier: None,
            plugin_state_base64: None,
        }
    }

    /// A plugin record carrying its descriptor and current state
    pub fn plugin(
        id: u32,
        name: impl Into<String>,
        position: Position,
        descriptor: &PluginDescriptor,
        state: &[u8],
    ) -> Self {
        Self {
            plugin_name: Some(descriptor.name.clone()),
            plugin_format: Some(descriptor.format.clone()),
            plugin_file_or_identifier: Some(descriptor.file_or_identifier.clone()),
            plugin_state_base64: Some(encode_state(state)),
            ..Self::endpoint(id, NodeRole::Plugin, name, position)
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    /// Descriptor as saved. `None` if the record carries no identifier.
    pub fn descriptor(&self) -> Option<PluginDescriptor> {
        let identifier = self.plugin_file_or_identifier.as_deref()?;
        Some(PluginDescriptor::new(
            self.plugin_name.clone().unwrap_or_else(|| self.name.clone()),
            self.plugin_format.clone().unwrap_or_default(),
            identifier,
        ))
    }

    /// Decoded plugin state, if any was saved
    pub fn state(&self) -> Result<Option<Vec<u8>>, DocumentError> {
        self.plugin_state_base64
            .as_deref()
            .map(decode_state)
            .transpose()
    }
}

/// One wire as persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireRecord {
    pub from: u32,
    pub to: u32,
}

/// The complete persisted graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Format version for future compatibility
    #[serde(default = "current_version")]
    pub version: u32,

    #[serde(rename = "Nodes", default)]
    pub nodes: Vec<NodeRecord>,

    #[serde(rename = "Wires", default)]
    pub wires: Vec<WireRecord>,
}

impl Default for GraphDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphDocument {
    /// Create an empty document at the current version
    pub fn new() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            nodes: Vec::new(),
            wires: Vec::new(),
        }
    }

    pub fn to_ron(&self) -> Result<String, DocumentError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| DocumentError::SerializationFailed(e.to_string()))
    }

    pub fn from_ron(text: &str) -> Result<Self, DocumentError> {
        let document: Self =
            ron::from_str(text).map_err(|e| DocumentError::DeserializationFailed(e.to_string()))?;
        document.check_version()
    }

    pub fn to_json(&self) -> Result<serde_json::Value, DocumentError> {
        serde_json::to_value(self).map_err(|e| DocumentError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, DocumentError> {
        let document: Self = serde_json::from_value(value)
            .map_err(|e| DocumentError::DeserializationFailed(e.to_string()))?;
        document.check_version()
    }

    /// Save document to a RON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DocumentError> {
        let text = self.to_ron()?;
        std::fs::write(path.as_ref(), text).map_err(|e| DocumentError::IoError(e.to_string()))
    }

    /// Load document from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DocumentError::IoError(e.to_string()))?;
        Self::from_ron(&text)
    }

    fn check_version(self) -> Result<Self, DocumentError> {
        if self.version > DOCUMENT_VERSION {
            return Err(DocumentError::UnsupportedVersion(self.version));
        }
        Ok(self)
    }
}

pub fn encode_state(state: &[u8]) -> String {
    STANDARD.encode(state)
}

pub fn decode_state(text: &str) -> Result<Vec<u8>, DocumentError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| DocumentError::InvalidState(e.to_string()))
}

/// Errors that can occur reading or writing documents
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Unsupported document version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid plugin state encoding: {0}")]
    InvalidState(String),
}
