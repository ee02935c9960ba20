//! Core types, constants, and errors shared across the chainhost crates.
//!
//! Every other chainhost crate depends on this one for the scalar audio types
//! and the host-wide defaults.

/// Sample rate in Hz
pub type SampleRate = u32;

/// Number of audio frames (samples per channel)
pub type Frames = usize;

/// Audio sample type (32-bit float is standard for plugin hosting)
pub type Sample = f32;

/// Number of audio channels
pub type ChannelCount = usize;

/// Index of a single channel on a node port
pub type ChannelIndex = usize;

/// Common sample rates
pub mod sample_rates {
    use super::SampleRate;

    /// 44.1 kHz sample rate (CD quality)
    pub const SR_44100: SampleRate = 44100;
    /// 48 kHz sample rate (professional audio standard)
    pub const SR_48000: SampleRate = 48000;
    /// 96 kHz sample rate (high resolution audio)
    pub const SR_96000: SampleRate = 96000;
}

/// Audio buffer block sizes
pub mod block_sizes {
    use super::Frames;

    /// 64 frames per block (very low latency, ~1.3ms @ 48kHz)
    pub const BLOCK_64: Frames = 64;
    /// 256 frames per block (balanced, ~5.3ms @ 48kHz)
    pub const BLOCK_256: Frames = 256;
    /// 512 frames per block (higher latency, ~10.7ms @ 48kHz)
    pub const BLOCK_512: Frames = 512;
}

/// Rates used when no audio device is open to report its own.
pub mod host_defaults {
    use super::{Frames, SampleRate};

    /// Sample rate plugins are instantiated at without a running device
    pub const SAMPLE_RATE: SampleRate = super::sample_rates::SR_44100;
    /// Block size plugins are prepared for without a running device
    pub const BLOCK_SIZE: Frames = super::block_sizes::BLOCK_512;
}

/// The stereo pair every wire carries. Channels are always connected together.
pub const STEREO_PAIR: [ChannelIndex; 2] = [0, 1];

/// Common error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Audio device or stream error
    #[error("Audio error: {0}")]
    Audio(String),

    /// No usable device matched the request
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
