//! Audio graph engine and device streams.
//!
//! This crate provides the editor-side audio graph, the real-time processor
//! that executes its committed plans, cpal device integration, and the
//! built-in processors.

pub mod builtin;
pub mod engine;
pub mod graph;
pub mod processor;

#[cfg(test)]
mod test_support;

pub use engine::AudioEngine;
pub use graph::{
    AudioGraph, Connection, EngineNode, Endpoint, NodeHandle, NodeProcessor, ReservedSlot,
    SharedPlugin,
};
pub use processor::{GraphProcessor, RenderPlan};

use chainhost_core::{Frames, SampleRate, host_defaults};

/// Audio configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: SampleRate,
    pub block_size: Frames,
    pub input_channels: usize,
    pub output_channels: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: host_defaults::SAMPLE_RATE,
            block_size: host_defaults::BLOCK_SIZE,
            input_channels: 2,
            output_channels: 2,
        }
    }
}
