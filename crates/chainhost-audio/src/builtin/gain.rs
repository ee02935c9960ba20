//! Gain processor - simple volume control.

use chainhost_core::{ChannelCount, Frames, SampleRate};
use chainhost_plugin::{AudioBuffer, Plugin, PluginDescriptor, PluginError};

use super::BUILTIN_FORMAT;

pub const GAIN_IDENTIFIER: &str = "chainhost.builtin.gain";

/// Simple gain/volume processor
///
/// Multiplies all audio samples by a gain factor.
///
/// ## Range
///
/// Gain: 0.0 to 2.0 (linear)
/// - 0.0 = silence (−∞ dB)
/// - 1.0 = unity gain (0 dB, default)
/// - 2.0 = double amplitude (+6 dB)
///
/// State is the gain as four little-endian bytes.
pub struct GainProcessor {
    gain: f32,
    sample_rate: SampleRate,
    descriptor: PluginDescriptor,
}

impl Default for GainProcessor {
    fn default() -> Self {
        Self {
            // Unity, 0 dB
            gain: 1.0,
            sample_rate: 0,
            descriptor: Self::descriptor_template(),
        }
    }
}

impl GainProcessor {
    pub const MAX_GAIN: f32 = 2.0;

    pub fn descriptor_template() -> PluginDescriptor {
        let mut descriptor = PluginDescriptor::new("Gain", BUILTIN_FORMAT, GAIN_IDENTIFIER);
        descriptor.vendor = "chainhost".to_string();
        descriptor.version = "1.0.0".to_string();
        descriptor
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Set the gain, clamped to `0.0..=MAX_GAIN`
    pub fn set_gain(&mut self, value: f32) {
        self.gain = value.clamp(0.0, Self::MAX_GAIN);
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }
}

impl Plugin for GainProcessor {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn initialize(
        &mut self,
        sample_rate: SampleRate,
        _max_block_size: Frames,
    ) -> Result<(), PluginError> {
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), PluginError> {
        // Ensure we have exactly 2 inputs and 2 outputs (stereo)
        if audio.inputs.len() != 2 || audio.outputs.len() != 2 {
            return Err(PluginError::ProcessingFailed(format!(
                "Gain processor requires stereo, got {} in / {} out",
                audio.inputs.len(),
                audio.outputs.len()
            )));
        }

        let frames = audio.frames;
        for (output, input) in audio.outputs.iter_mut().zip(audio.inputs.iter()) {
            let (Some(output), Some(input)) = (output.get_mut(..frames), input.get(..frames)) else {
                return Err(PluginError::ProcessingFailed(format!(
                    "channel shorter than {frames} frames"
                )));
            };
            for (out, sample) in output.iter_mut().zip(input) {
                *out = sample * self.gain;
            }
        }

        Ok(())
    }

    fn input_channels(&self) -> ChannelCount {
        2 // Stereo
    }

    fn output_channels(&self) -> ChannelCount {
        2 // Stereo
    }

    fn state(&self) -> Vec<u8> {
        self.gain.to_le_bytes().to_vec()
    }

    fn set_state(&mut self, state: &[u8]) -> Result<(), PluginError> {
        let bytes: [u8; 4] = state.try_into().map_err(|_| {
            PluginError::InvalidState(format!("expected 4 bytes of gain, got {}", state.len()))
        })?;
        self.set_gain(f32::from_le_bytes(bytes));
        Ok(())
    }

    fn deactivate(&mut self) {
        // Nothing to clean up
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_default() {
        let processor = GainProcessor::default();
        assert_eq!(processor.gain(), 1.0);
    }

    #[test]
    fn test_gain_clamping() {
        let mut processor = GainProcessor::default();

        processor.set_gain(10.0);
        assert_eq!(processor.gain(), 2.0);

        processor.set_gain(-1.0);
        assert_eq!(processor.gain(), 0.0);
    }

    #[test]
    fn test_gain_processing() {
        let mut processor = GainProcessor::default();
        processor.initialize(48000, 512).unwrap();
        processor.set_gain(0.5);

        let input_l = vec![1.0; 64];
        let input_r = vec![1.0; 64];
        let mut output_l = vec![0.0; 64];
        let mut output_r = vec![0.0; 64];

        let inputs: Vec<&[f32]> = vec![&input_l, &input_r];
        let mut outputs: Vec<&mut [f32]> = vec![&mut output_l, &mut output_r];

        let mut audio = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 64,
        };

        processor.process(&mut audio).unwrap();

        assert!(output_l.iter().chain(&output_r).all(|&s| s == 0.5));
        assert_eq!(processor.sample_rate(), 48000);
    }

    #[test]
    fn test_rejects_mono_buffers() {
        let mut processor = GainProcessor::default();
        let input = vec![1.0; 8];
        let mut output = vec![0.0; 8];
        let inputs: Vec<&[f32]> = vec![&input];
        let mut outputs: Vec<&mut [f32]> = vec![&mut output];

        let mut audio = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 8,
        };
        assert!(processor.process(&mut audio).is_err());
    }

    #[test]
    fn test_state_round_trip() {
        let mut source = GainProcessor::default();
        source.set_gain(0.25);

        let mut restored = GainProcessor::default();
        restored.set_state(&source.state()).unwrap();
        assert_eq!(restored.gain(), 0.25);
    }

    #[test]
    fn test_invalid_state() {
        let mut processor = GainProcessor::default();
        let result = processor.set_state(b"ABC");
        assert!(matches!(result, Err(PluginError::InvalidState(_))));
        assert_eq!(processor.gain(), 1.0);
    }
}
