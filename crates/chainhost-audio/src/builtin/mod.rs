//! Built-in audio processors.
//!
//! These are simple, essential processors implemented directly in Rust.
//! They implement the `Plugin` trait just like external plugins and are
//! handed out by [`BuiltinProvider`] under the `"Builtin"` format.

pub mod gain;

use chainhost_core::{Frames, SampleRate};
use chainhost_plugin::{Plugin, PluginDescriptor, PluginError, PluginProvider};

/// Format string carried by every built-in descriptor
pub const BUILTIN_FORMAT: &str = "Builtin";

/// Descriptors for every built-in processor
pub fn descriptors() -> Vec<PluginDescriptor> {
    vec![gain::GainProcessor::descriptor_template()]
}

/// Create a built-in processor by identifier
///
/// Returns `None` if the identifier doesn't match any known built-in processor.
///
/// # Examples
///
/// ```
/// use chainhost_audio::builtin;
///
/// let gain = builtin::create_builtin("chainhost.builtin.gain").expect("gain processor exists");
/// assert_eq!(gain.descriptor().name, "Gain");
/// ```
pub fn create_builtin(identifier: &str) -> Option<Box<dyn Plugin>> {
    match identifier {
        gain::GAIN_IDENTIFIER => Some(Box::new(gain::GainProcessor::default())),
        _ => None,
    }
}

/// Provider for the built-in processors
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinProvider;

impl PluginProvider for BuiltinProvider {
    fn create_instance(
        &self,
        descriptor: &PluginDescriptor,
        sample_rate: SampleRate,
        block_size: Frames,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        if descriptor.format != BUILTIN_FORMAT {
            return Err(PluginError::FormatError(format!(
                "{} is not a built-in processor (format {})",
                descriptor.name, descriptor.format
            )));
        }

        let mut plugin = create_builtin(&descriptor.file_or_identifier)
            .ok_or_else(|| PluginError::NotFound(descriptor.file_or_identifier.clone()))?;
        plugin.initialize(sample_rate, block_size)?;
        Ok(plugin)
    }
}
