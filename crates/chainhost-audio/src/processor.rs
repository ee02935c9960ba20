//! Real-time execution of committed render plans.
//!
//! A [`RenderPlan`] is compiled on the editor thread by
//! [`AudioGraph::rebuild`](crate::AudioGraph::rebuild) with every buffer
//! already allocated. [`GraphProcessor`] lives on the audio thread, adopts the
//! newest plan at the start of each call and walks its steps in order. It
//! never allocates, never blocks and never logs.

use chainhost_comms::PlanReceiver;
use chainhost_core::{ChannelIndex, Frames, Sample};
use chainhost_plugin::AudioBuffer;
use smallvec::SmallVec;

use crate::graph::SharedPlugin;

/// Channel references kept inline for plugin calls
const INLINE_CHANNELS: usize = 8;

/// Where one input channel of a step reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelSource {
    /// Index of an earlier step in the plan
    pub step: usize,
    pub channel: ChannelIndex,
}

#[derive(Clone)]
pub(crate) enum StepKind {
    DeviceInput,
    DeviceOutput,
    Plugin(SharedPlugin),
}

#[derive(Clone)]
pub(crate) struct RenderStep {
    kind: StepKind,
    /// Per input channel, the outputs summed into it
    sources: Vec<SmallVec<[ChannelSource; 2]>>,
    inputs: Vec<Vec<Sample>>,
    outputs: Vec<Vec<Sample>>,
}

impl RenderStep {
    pub(crate) fn new(kind: StepKind, inputs: usize, outputs: usize, block_size: Frames) -> Self {
        Self {
            kind,
            sources: vec![SmallVec::new(); inputs],
            inputs: vec![vec![0.0; block_size]; inputs],
            outputs: vec![vec![0.0; block_size]; outputs],
        }
    }

    pub(crate) fn add_source(&mut self, channel: ChannelIndex, source: ChannelSource) {
        if let Some(sources) = self.sources.get_mut(channel) {
            sources.push(source);
        }
    }

    /// Sum every connected upstream output into this step's input buffers
    fn gather(&mut self, upstream: &[Self], frames: Frames) {
        for (buffer, sources) in self.inputs.iter_mut().zip(&self.sources) {
            let buffer = &mut buffer[..frames];
            buffer.fill(0.0);

            for source in sources {
                let Some(data) = upstream
                    .get(source.step)
                    .and_then(|step| step.outputs.get(source.channel))
                else {
                    continue;
                };
                for (dst, src) in buffer.iter_mut().zip(&data[..frames]) {
                    *dst += *src;
                }
            }
        }
    }
}

/// An immutable-topology snapshot of the graph with its working buffers.
#[derive(Clone, Default)]
pub struct RenderPlan {
    steps: Vec<RenderStep>,
    block_size: Frames,
}

impl RenderPlan {
    pub(crate) fn new(steps: Vec<RenderStep>, block_size: Frames) -> Self {
        Self { steps, block_size }
    }

    pub(crate) fn empty(block_size: Frames) -> Self {
        Self {
            steps: Vec::new(),
            block_size,
        }
    }

    /// Number of nodes the plan executes
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn block_size(&self) -> Frames {
        self.block_size
    }

    fn render(
        &mut self,
        device_input: &[&[Sample]],
        device_output: &mut [&mut [Sample]],
        offset: usize,
        frames: Frames,
    ) {
        for index in 0..self.steps.len() {
            let (done, rest) = self.steps.split_at_mut(index);
            let Some(step) = rest.first_mut() else {
                break;
            };
            step.gather(done, frames);

            let RenderStep {
                kind,
                inputs,
                outputs,
                ..
            } = step;

            match kind {
                StepKind::DeviceInput => {
                    for (channel, buffer) in outputs.iter_mut().enumerate() {
                        let buffer = &mut buffer[..frames];
                        match device_input
                            .get(channel)
                            .and_then(|data| data.get(offset..offset + frames))
                        {
                            Some(data) => buffer.copy_from_slice(data),
                            None => buffer.fill(0.0),
                        }
                    }
                }
                StepKind::DeviceOutput => {
                    for (channel, buffer) in inputs.iter().enumerate() {
                        let Some(data) = device_output
                            .get_mut(channel)
                            .and_then(|data| data.get_mut(offset..offset + frames))
                        else {
                            continue;
                        };
                        for (dst, src) in data.iter_mut().zip(&buffer[..frames]) {
                            *dst += *src;
                        }
                    }
                }
                StepKind::Plugin(cell) if cell.is_active() && cell.is_bypassed() => {
                    for (channel, buffer) in outputs.iter_mut().enumerate() {
                        let buffer = &mut buffer[..frames];
                        match inputs.get(channel) {
                            Some(source) => buffer.copy_from_slice(&source[..frames]),
                            None => buffer.fill(0.0),
                        }
                    }
                }
                StepKind::Plugin(cell) => {
                    let processed = match cell.try_lock() {
                        // Retired instances stay silent until the next plan arrives
                        Some(mut plugin) if cell.is_active() => {
                            let ins: SmallVec<[&[Sample]; INLINE_CHANNELS]> =
                                inputs.iter().map(|b| &b[..frames]).collect();
                            let mut outs: SmallVec<[&mut [Sample]; INLINE_CHANNELS]> =
                                outputs.iter_mut().map(|b| &mut b[..frames]).collect();
                            let mut audio = AudioBuffer {
                                inputs: &ins,
                                outputs: &mut outs,
                                frames,
                            };
                            plugin.process(&mut audio).is_ok()
                        }
                        _ => false,
                    };

                    if !processed {
                        for buffer in outputs.iter_mut() {
                            buffer[..frames].fill(0.0);
                        }
                    }
                }
            }
        }
    }
}

/// Audio-thread half of the engine
pub struct GraphProcessor {
    receiver: PlanReceiver<RenderPlan>,
}

impl GraphProcessor {
    pub(crate) fn new(receiver: PlanReceiver<RenderPlan>) -> Self {
        Self { receiver }
    }

    /// Render one device callback's worth of planar audio.
    ///
    /// The newest committed plan is adopted first. `output` is cleared and
    /// then receives the sum of everything routed to the output endpoint.
    /// Buffers longer than the plan's block size are rendered in chunks.
    pub fn process(&mut self, input: &[&[Sample]], output: &mut [&mut [Sample]]) {
        for channel in output.iter_mut() {
            channel.fill(0.0);
        }

        let frames = output.iter().map(|c| c.len()).min().unwrap_or(0);
        let plan = self.receiver.latest();
        if plan.block_size == 0 {
            return;
        }

        let mut offset = 0;
        while offset < frames {
            let chunk = (frames - offset).min(plan.block_size);
            plan.render(input, output, offset, chunk);
            offset += chunk;
        }
    }
}
