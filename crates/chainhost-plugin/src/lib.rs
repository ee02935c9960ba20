//! Plugin abstraction layer.
//!
//! This crate defines the `Plugin` trait that every loaded processing unit
//! implements, the descriptor used to re-acquire an instance later, and the
//! `PluginProvider` contract the host uses to turn a descriptor into a live
//! instance. Scanning plugin binaries and negotiating formats happens behind
//! a provider; the host itself never touches plugin binaries.

mod known;

pub use known::KnownPluginList;

use chainhost_core::{ChannelCount, Frames, Sample, SampleRate};
use serde::{Deserialize, Serialize};

/// Audio buffer for processing
///
/// The outer slices are borrowed for a shorter lifetime than the channel
/// data so hosts can build them on the stack for each block.
pub struct AudioBuffer<'a, 'b> {
    pub inputs: &'a [&'b [Sample]],
    pub outputs: &'a mut [&'b mut [Sample]],
    pub frames: Frames,
}

/// Metadata sufficient to re-acquire a plugin instance from a provider.
///
/// `file_or_identifier` is the stable key: a bundle path for file-based
/// formats, an identifier string for the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub format: String,
    pub file_or_identifier: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default = "default_channel_count")]
    pub num_input_channels: ChannelCount,
    #[serde(default = "default_channel_count")]
    pub num_output_channels: ChannelCount,
}

const fn default_channel_count() -> ChannelCount {
    2
}

impl PluginDescriptor {
    /// Create a stereo descriptor with empty version and vendor.
    pub fn new(
        name: impl Into<String>,
        format: impl Into<String>,
        file_or_identifier: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            file_or_identifier: file_or_identifier.into(),
            version: String::new(),
            vendor: String::new(),
            num_input_channels: default_channel_count(),
            num_output_channels: default_channel_count(),
        }
    }

    /// Whether the plugin can sit in a stereo chain.
    pub fn is_stereo_capable(&self) -> bool {
        self.num_input_channels >= 2 && self.num_output_channels >= 2
    }

    /// Settings key for a per-plugin value.
    ///
    /// Keys are built from name, version and format only, so two plugins
    /// sharing all three also share their persisted values.
    pub fn settings_key(&self, kind: PluginValueKind) -> String {
        format!(
            "plugin-{}-{}{}{}",
            kind.as_str(),
            self.name,
            self.version,
            self.format
        )
    }
}

/// The per-plugin values kept in the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginValueKind {
    /// Position of the plugin in the activation order
    Order,
    /// Whether the plugin is bypassed
    Bypass,
    /// Last captured opaque state
    State,
}

impl PluginValueKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Bypass => "bypass",
            Self::State => "state",
        }
    }
}

/// A processing unit hosted in the audio graph
pub trait Plugin: Send {
    /// Descriptor this instance was created from
    fn descriptor(&self) -> &PluginDescriptor;

    /// Prepare the plugin for the given sample rate and max block size
    fn initialize(
        &mut self,
        sample_rate: SampleRate,
        max_block_size: Frames,
    ) -> Result<(), PluginError>;

    /// Process one block of audio
    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), PluginError>;

    /// Get number of input channels
    fn input_channels(&self) -> ChannelCount;

    /// Get number of output channels
    fn output_channels(&self) -> ChannelCount;

    /// Capture the plugin's current internal state as an opaque blob
    fn state(&self) -> Vec<u8>;

    /// Restore a blob previously produced by [`Plugin::state`]
    fn set_state(&mut self, state: &[u8]) -> Result<(), PluginError>;

    /// Deactivate and cleanup
    fn deactivate(&mut self);
}

/// Produces ready-to-run plugin instances from descriptors.
///
/// Implementations may do file I/O or load shared libraries, so calls can
/// take noticeable wall time. They run on the editor thread only.
pub trait PluginProvider {
    fn create_instance(
        &self,
        descriptor: &PluginDescriptor,
        sample_rate: SampleRate,
        block_size: Frames,
    ) -> Result<Box<dyn Plugin>, PluginError>;
}

impl<F> PluginProvider for F
where
    F: Fn(&PluginDescriptor, SampleRate, Frames) -> Result<Box<dyn Plugin>, PluginError>,
{
    fn create_instance(
        &self,
        descriptor: &PluginDescriptor,
        sample_rate: SampleRate,
        block_size: Frames,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        self(descriptor, sample_rate, block_size)
    }
}

/// Plugin-related errors
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Plugin processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Plugin not available: {0}")]
    NotFound(String),

    #[error("Invalid plugin state: {0}")]
    InvalidState(String),

    #[error("Plugin format error: {0}")]
    FormatError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_key_layout() {
        let mut desc = PluginDescriptor::new("Reverb", "VST3", "/plugins/Reverb.vst3");
        desc.version = "1.2".to_string();

        assert_eq!(
            desc.settings_key(PluginValueKind::State),
            "plugin-state-Reverb1.2VST3"
        );
        assert_eq!(
            desc.settings_key(PluginValueKind::Order),
            "plugin-order-Reverb1.2VST3"
        );
    }

    #[test]
    fn test_settings_key_ignores_file() {
        // Same name/version/format from different files share the key
        let a = PluginDescriptor::new("Comp", "VST3", "/a/Comp.vst3");
        let b = PluginDescriptor::new("Comp", "VST3", "/b/Comp.vst3");
        assert_eq!(
            a.settings_key(PluginValueKind::Bypass),
            b.settings_key(PluginValueKind::Bypass)
        );
    }

    #[test]
    fn test_descriptor_defaults_to_stereo() {
        let json = r#"{"name":"Eq","format":"CLAP","file_or_identifier":"com.eq"}"#;
        let desc: PluginDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.num_input_channels, 2);
        assert_eq!(desc.num_output_channels, 2);
        assert!(desc.is_stereo_capable());
    }

    #[test]
    fn test_closure_provider() {
        let provider = |desc: &PluginDescriptor, _sr: SampleRate, _bs: Frames| {
            Err::<Box<dyn Plugin>, _>(PluginError::NotFound(desc.name.clone()))
        };
        let desc = PluginDescriptor::new("Missing", "VST3", "missing.vst3");
        let err = provider.create_instance(&desc, 44100, 512).err().unwrap();
        assert!(err.to_string().contains("Missing"));
    }
}
