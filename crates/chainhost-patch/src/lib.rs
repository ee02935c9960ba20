//! The patch bay: the logical signal graph the user edits.
//!
//! A [`PatchBay`] holds a [`Topology`] of device endpoints and plugin nodes
//! and keeps an [`AudioGraph`](chainhost_audio::AudioGraph) in step with it.
//! Each logical wire becomes a pair of channel connections in the engine.
//! Graphs persist as [`GraphDocument`]s, and user preferences as [`Settings`].

pub mod connection;
pub mod document;
pub mod layout;
pub mod lifecycle;
pub mod patchbay;
pub mod settings;
pub mod topology;

pub use connection::{WireRejection, is_valid_wire, validate_wire};
pub use document::{
    DOCUMENT_VERSION, DocumentError, GraphDocument, NodeRecord, WireRecord, decode_state,
    encode_state,
};
pub use layout::CanvasLayout;
pub use lifecycle::Lifecycle;
pub use patchbay::{GraphChangedCallback, LoadReport, PatchBay};
pub use settings::{Settings, SettingsError, keys};
pub use topology::{Node, NodeId, NodeKind, NodeRole, Position, Topology, Wire};

use chainhost_plugin::PluginError;

/// Errors from patch bay operations
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Could not instantiate plugin {name}: {source}")]
    Instantiation {
        name: String,
        #[source]
        source: PluginError,
    },

    #[error("Invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition { from: Lifecycle, to: Lifecycle },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Plugin not in the known list: {0}")]
    UnknownPlugin(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}
