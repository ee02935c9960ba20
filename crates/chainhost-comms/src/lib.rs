//! Lockless communication primitives for audio-thread-safe communication.
//!
//! Three bridges cross the editor/audio boundary:
//!
//! - **Plan publication** (`triple_buffer`): the editor thread publishes a
//!   fully built render plan; the audio thread adopts the newest one at the
//!   start of a block. Superseded plans are dropped on the editor side when
//!   their slot is reused, so the audio thread never frees memory.
//! - **Sample bridge** (`rtrb`): captured device input travels from the input
//!   stream callback to the output stream callback.
//! - **Engine events** (`crossbeam-channel`): stream status and errors from
//!   device callbacks back to the editor thread.

pub use rtrb;
pub use triple_buffer;

use chainhost_core::{Frames, Sample, SampleRate};
use crossbeam_channel::{Receiver, Sender};

/// Editor-side handle that publishes new plans
pub struct PlanPublisher<T: Send> {
    input: triple_buffer::Input<T>,
    generation: u64,
}

impl<T: Send> PlanPublisher<T> {
    /// Make `plan` the next plan the audio thread picks up.
    ///
    /// Returns the generation number assigned to it.
    pub fn publish(&mut self, plan: T) -> u64 {
        self.generation += 1;
        self.input.write(plan);
        self.generation
    }

    /// Number of plans published so far
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Audio-side handle that adopts the newest published plan
pub struct PlanReceiver<T: Send> {
    output: triple_buffer::Output<T>,
}

impl<T: Send> PlanReceiver<T> {
    /// Adopt the newest plan if one was published and return it.
    ///
    /// Never blocks and never allocates.
    pub fn latest(&mut self) -> &mut T {
        self.output.update();
        self.output.output_buffer_mut()
    }
}

/// Create a plan publication channel seeded with `initial`
pub fn plan_channel<T: Clone + Send>(initial: &T) -> (PlanPublisher<T>, PlanReceiver<T>) {
    let (input, output) = triple_buffer::TripleBuffer::new(initial).split();
    (
        PlanPublisher {
            input,
            generation: 0,
        },
        PlanReceiver { output },
    )
}

/// Producer side of the captured-input bridge (input stream callback)
pub type SampleProducer = rtrb::Producer<Sample>;
/// Consumer side of the captured-input bridge (output stream callback)
pub type SampleConsumer = rtrb::Consumer<Sample>;

/// Create a bridge holding up to `capacity` interleaved samples
pub fn sample_bridge(capacity: usize) -> (SampleProducer, SampleConsumer) {
    rtrb::RingBuffer::new(capacity)
}

/// Events sent from device callbacks back to the editor thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Streams are running with the given actual configuration
    Started {
        /// Sample rate the device actually runs at
        sample_rate: SampleRate,
        /// Block size the graph was prepared for
        block_size: Frames,
    },
    /// Streams were stopped
    Stopped,
    /// A device stream reported an error
    StreamError(String),
}

/// Sender used inside device callbacks (`try_send` never blocks on unbounded)
pub type EventSender = Sender<EngineEvent>;
/// Receiver polled by the editor thread
pub type EventReceiver = Receiver<EngineEvent>;

/// Create the engine event channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}
