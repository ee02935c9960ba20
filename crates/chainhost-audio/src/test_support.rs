//! Test plugins shared by the unit tests of this crate.

use std::sync::Arc;

use chainhost_core::{ChannelCount, Frames, SampleRate};
use chainhost_plugin::{AudioBuffer, Plugin, PluginDescriptor, PluginError};
use parking_lot::Mutex;

/// Copies each input channel to the matching output channel
pub struct DummyPlugin {
    descriptor: PluginDescriptor,
    inputs: ChannelCount,
    outputs: ChannelCount,
    pub prepared_at: Arc<Mutex<Option<(SampleRate, Frames)>>>,
    pub fail_initialize: bool,
    pub fail_process: bool,
}

impl DummyPlugin {
    pub fn new(name: &str, inputs: ChannelCount, outputs: ChannelCount) -> Self {
        Self {
            descriptor: PluginDescriptor::new(name, "Test", name),
            inputs,
            outputs,
            prepared_at: Arc::new(Mutex::new(None)),
            fail_initialize: false,
            fail_process: false,
        }
    }
}

impl Plugin for DummyPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn initialize(&mut self, sample_rate: SampleRate, max_block_size: Frames) -> Result<(), PluginError> {
        if self.fail_initialize {
            return Err(PluginError::InitializationFailed(self.descriptor.name.clone()));
        }
        *self.prepared_at.lock() = Some((sample_rate, max_block_size));
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), PluginError> {
        if self.fail_process {
            return Err(PluginError::ProcessingFailed(self.descriptor.name.clone()));
        }
        let frames = audio.frames;
        for (output, input) in audio.outputs.iter_mut().zip(audio.inputs.iter()) {
            output[..frames].copy_from_slice(&input[..frames]);
        }
        Ok(())
    }

    fn input_channels(&self) -> ChannelCount {
        self.inputs
    }

    fn output_channels(&self) -> ChannelCount {
        self.outputs
    }

    fn state(&self) -> Vec<u8> {
        Vec::new()
    }

    fn set_state(&mut self, _state: &[u8]) -> Result<(), PluginError> {
        Ok(())
    }

    fn deactivate(&mut self) {}
}
