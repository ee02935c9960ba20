//! Audio processing graph.
//!
//! `AudioGraph` is the editor-side half of the engine. It owns every live
//! processing node and the channel-level connections between them. Edits
//! accumulate here without the audio thread seeing them; [`AudioGraph::rebuild`]
//! compiles the current topology into a render plan and publishes it to the
//! [`GraphProcessor`] in one step.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chainhost_comms::{PlanPublisher, plan_channel};
use chainhost_core::{ChannelIndex, Frames, SampleRate};
use chainhost_plugin::{Plugin, PluginError};
use parking_lot::{Mutex, MutexGuard};

use crate::AudioConfig;
use crate::processor::{ChannelSource, GraphProcessor, RenderPlan, RenderStep, StepKind};

/// Identifier of a live node inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The two engine slots that exist before any plugin is added.
///
/// The application installs both with [`AudioGraph::install_io_endpoints`]
/// before restoring a saved graph. Logical Input and Output nodes bind to
/// these slots instead of owning engine entries of their own, so removing
/// such a logical node never removes the device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservedSlot {
    /// Captured device input; outputs only
    AudioInput,
    /// Device output; inputs only
    AudioOutput,
}

impl ReservedSlot {
    const FIRST: u32 = 1_000_000;

    pub const fn handle(self) -> NodeHandle {
        match self {
            Self::AudioInput => NodeHandle(Self::FIRST),
            Self::AudioOutput => NodeHandle(Self::FIRST + 1),
        }
    }

    pub fn from_handle(handle: NodeHandle) -> Option<Self> {
        [Self::AudioInput, Self::AudioOutput]
            .into_iter()
            .find(|slot| slot.handle() == handle)
    }
}

/// One channel on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub node: NodeHandle,
    pub channel: ChannelIndex,
}

impl Endpoint {
    pub const fn new(node: NodeHandle, channel: ChannelIndex) -> Self {
        Self { node, channel }
    }
}

/// Channel-level connection between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Connection {
    pub source: Endpoint,
    pub destination: Endpoint,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source.node, self.source.channel, self.destination.node, self.destination.channel
        )
    }
}

/// A plugin instance shared between the editor thread and committed plans.
///
/// The audio thread only ever `try_lock`s the instance. Once retired, the
/// instance is deactivated under the lock and never processed again, even by
/// a plan the audio thread has not yet replaced.
pub struct PluginCell {
    plugin: Mutex<Box<dyn Plugin>>,
    active: AtomicBool,
    bypassed: AtomicBool,
}

impl PluginCell {
    fn new(plugin: Box<dyn Plugin>) -> Self {
        Self {
            plugin: Mutex::new(plugin),
            active: AtomicBool::new(true),
            bypassed: AtomicBool::new(false),
        }
    }

    /// Lock the instance from the editor thread
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Plugin>> {
        self.plugin.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, Box<dyn Plugin>>> {
        self.plugin.try_lock()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Bypassed instances pass their inputs straight through
    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }

    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Release);
    }

    fn retire(&self) {
        let mut plugin = self.plugin.lock();
        self.active.store(false, Ordering::Release);
        plugin.deactivate();
    }
}

pub type SharedPlugin = Arc<PluginCell>;

/// What a node does when its turn in the plan comes
pub enum NodeProcessor {
    /// Emits the captured device input
    AudioInput,
    /// Sums its inputs into the device output
    AudioOutput,
    /// Runs a hosted plugin
    Plugin(SharedPlugin),
}

/// A live node in the audio graph
pub struct EngineNode {
    handle: NodeHandle,
    processor: NodeProcessor,
    /// Cached input/output channel counts
    inputs: usize,
    outputs: usize,
}

impl EngineNode {
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    pub fn processor(&self) -> &NodeProcessor {
        &self.processor
    }

    /// The hosted plugin, if this is a plugin node
    pub fn plugin(&self) -> Option<&SharedPlugin> {
        match &self.processor {
            NodeProcessor::Plugin(cell) => Some(cell),
            NodeProcessor::AudioInput | NodeProcessor::AudioOutput => None,
        }
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }
}

/// The audio processing graph (editor side)
pub struct AudioGraph {
    nodes: BTreeMap<NodeHandle, EngineNode>,
    connections: BTreeSet<Connection>,
    next_id: u32,

    sample_rate: SampleRate,
    block_size: Frames,
    input_channels: usize,
    output_channels: usize,

    publisher: PlanPublisher<RenderPlan>,

    // Order of the last committed plan
    processing_order: Vec<NodeHandle>,
}

impl AudioGraph {
    /// Create an empty graph and the processor that will execute its plans
    pub fn new(config: AudioConfig) -> (Self, GraphProcessor) {
        let (publisher, receiver) = plan_channel(&RenderPlan::empty(config.block_size));
        let graph = Self {
            nodes: BTreeMap::new(),
            connections: BTreeSet::new(),
            next_id: 1,
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            input_channels: config.input_channels,
            output_channels: config.output_channels,
            publisher,
            processing_order: Vec::new(),
        };
        (graph, GraphProcessor::new(receiver))
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn block_size(&self) -> Frames {
        self.block_size
    }

    /// Number of plans committed so far
    pub fn generation(&self) -> u64 {
        self.publisher.generation()
    }

    /// Update the processing configuration, re-preparing every plugin.
    ///
    /// Commits a new plan with resized buffers.
    pub fn set_config(&mut self, sample_rate: SampleRate, block_size: Frames) {
        self.sample_rate = sample_rate;
        self.block_size = block_size;

        for node in self.nodes.values() {
            if let Some(cell) = node.plugin()
                && let Err(e) = cell.lock().initialize(sample_rate, block_size)
            {
                tracing::error!("Failed to reinitialize plugin {}: {}", node.handle, e);
            }
        }

        self.rebuild();
    }

    /// Remove every node and connection.
    ///
    /// Does not commit; call [`AudioGraph::rebuild`] afterwards.
    pub fn clear(&mut self) {
        for node in self.nodes.values() {
            if let Some(cell) = node.plugin() {
                cell.retire();
            }
        }
        self.nodes.clear();
        self.connections.clear();
        tracing::debug!("Cleared audio graph");
    }

    /// Reset the graph to just the two device endpoint slots and commit.
    pub fn install_io_endpoints(&mut self) {
        self.clear();

        for slot in [ReservedSlot::AudioInput, ReservedSlot::AudioOutput] {
            let (processor, inputs, outputs) = match slot {
                ReservedSlot::AudioInput => (NodeProcessor::AudioInput, 0, self.input_channels),
                ReservedSlot::AudioOutput => (NodeProcessor::AudioOutput, self.output_channels, 0),
            };
            let handle = slot.handle();
            self.nodes.insert(
                handle,
                EngineNode {
                    handle,
                    processor,
                    inputs,
                    outputs,
                },
            );
        }

        tracing::debug!(
            "Installed device endpoints ({} in, {} out)",
            self.input_channels,
            self.output_channels
        );
        self.rebuild();
    }

    /// Add a plugin node. The plugin is prepared at the graph's configuration.
    ///
    /// Does not commit; call [`AudioGraph::rebuild`] afterwards.
    pub fn add_node(&mut self, mut plugin: Box<dyn Plugin>) -> Result<NodeHandle, PluginError> {
        plugin.initialize(self.sample_rate, self.block_size)?;

        let inputs = plugin.input_channels();
        let outputs = plugin.output_channels();
        let handle = self.allocate_handle();

        self.nodes.insert(
            handle,
            EngineNode {
                handle,
                processor: NodeProcessor::Plugin(Arc::new(PluginCell::new(plugin))),
                inputs,
                outputs,
            },
        );

        tracing::debug!("Added node {} ({} inputs, {} outputs)", handle, inputs, outputs);
        Ok(handle)
    }

    /// Remove a node and every connection touching it.
    ///
    /// Does not commit; call [`AudioGraph::rebuild`] afterwards.
    pub fn remove_node(&mut self, handle: NodeHandle) -> bool {
        let Some(node) = self.nodes.remove(&handle) else {
            tracing::warn!("Cannot remove node {}: not in graph", handle);
            return false;
        };

        self.connections
            .retain(|conn| conn.source.node != handle && conn.destination.node != handle);

        if let Some(cell) = node.plugin() {
            cell.retire();
        }

        tracing::debug!("Removed node {}", handle);
        true
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&EngineNode> {
        self.nodes.get(&handle)
    }

    pub fn contains_node(&self, handle: NodeHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &EngineNode> {
        self.nodes.values()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Whether any channel of `source` feeds any channel of `destination`
    pub fn is_connected(&self, source: NodeHandle, destination: NodeHandle) -> bool {
        self.connections
            .iter()
            .any(|c| c.source.node == source && c.destination.node == destination)
    }

    /// Connect one output channel to one input channel.
    ///
    /// Refused connections are logged and leave the graph unchanged.
    /// Does not commit; call [`AudioGraph::rebuild`] afterwards.
    pub fn add_connection(&mut self, source: Endpoint, destination: Endpoint) -> bool {
        let connection = Connection {
            source,
            destination,
        };

        if let Err(reason) = self.check_connection(&connection) {
            tracing::warn!("Refused connection {}: {}", connection, reason);
            return false;
        }

        self.connections.insert(connection);
        tracing::debug!("Connected {}", connection);
        true
    }

    /// Remove one channel connection.
    ///
    /// Does not commit; call [`AudioGraph::rebuild`] afterwards.
    pub fn remove_connection(&mut self, source: Endpoint, destination: Endpoint) -> bool {
        let connection = Connection {
            source,
            destination,
        };
        if self.connections.remove(&connection) {
            tracing::debug!("Disconnected {}", connection);
            true
        } else {
            false
        }
    }

    /// Whether [`AudioGraph::add_connection`] would accept this connection
    pub fn can_connect(&self, connection: &Connection) -> bool {
        self.check_connection(connection).is_ok()
    }

    fn check_connection(&self, connection: &Connection) -> Result<(), &'static str> {
        let Connection {
            source,
            destination,
        } = *connection;

        let source_node = self.nodes.get(&source.node).ok_or("unknown source node")?;
        let destination_node = self
            .nodes
            .get(&destination.node)
            .ok_or("unknown destination node")?;

        if source.node == destination.node {
            return Err("node cannot feed itself");
        }
        if source.channel >= source_node.outputs {
            return Err("source channel out of range");
        }
        if destination.channel >= destination_node.inputs {
            return Err("destination channel out of range");
        }
        if self.connections.contains(connection) {
            return Err("already connected");
        }
        if self.feeds(destination.node, source.node) {
            return Err("would create a feedback loop");
        }
        Ok(())
    }

    /// Whether audio from `start` reaches `target` through existing connections
    fn feeds(&self, start: NodeHandle, target: NodeHandle) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            stack.extend(
                self.connections
                    .iter()
                    .filter(|c| c.source.node == node)
                    .map(|c| c.destination.node),
            );
        }
        false
    }

    fn allocate_handle(&mut self) -> NodeHandle {
        loop {
            let handle = NodeHandle(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if ReservedSlot::from_handle(handle).is_none() && !self.nodes.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Commit the current topology to the audio thread.
    ///
    /// Computes the processing order, compiles a plan with all buffers
    /// allocated here on the editor thread, and publishes it. The processor
    /// adopts it at its next block boundary. This is the only point where
    /// edits become audible.
    pub fn rebuild(&mut self) {
        let order = match self.topological_sort() {
            Ok(order) => order,
            Err(cycle_nodes) => {
                // add_connection refuses loops, so this only guards the invariant
                tracing::warn!(
                    "Graph contains cycle involving nodes: {:?}. Using handle order instead.",
                    cycle_nodes
                );
                self.nodes.keys().copied().collect()
            }
        };

        let plan = self.compile_plan(&order);
        self.processing_order = order;

        let generation = self.publisher.publish(plan);
        tracing::debug!(
            "Committed plan {} ({} nodes, {} connections)",
            generation,
            self.nodes.len(),
            self.connections.len()
        );
    }

    /// Order of the last committed plan
    pub fn processing_order(&self) -> &[NodeHandle] {
        &self.processing_order
    }

    fn compile_plan(&self, order: &[NodeHandle]) -> RenderPlan {
        let position: HashMap<NodeHandle, usize> = order
            .iter()
            .enumerate()
            .map(|(index, &handle)| (handle, index))
            .collect();

        let mut steps: Vec<RenderStep> = order
            .iter()
            .filter_map(|handle| self.nodes.get(handle))
            .map(|node| {
                let kind = match &node.processor {
                    NodeProcessor::AudioInput => StepKind::DeviceInput,
                    NodeProcessor::AudioOutput => StepKind::DeviceOutput,
                    NodeProcessor::Plugin(cell) => StepKind::Plugin(Arc::clone(cell)),
                };
                RenderStep::new(kind, node.inputs, node.outputs, self.block_size)
            })
            .collect();

        for conn in &self.connections {
            let (Some(&from), Some(&to)) = (
                position.get(&conn.source.node),
                position.get(&conn.destination.node),
            ) else {
                continue;
            };
            // Sources must run first; anything else would be a feedback edge
            if from < to {
                steps[to].add_source(
                    conn.destination.channel,
                    ChannelSource {
                        step: from,
                        channel: conn.source.channel,
                    },
                );
            }
        }

        RenderPlan::new(steps, self.block_size)
    }

    /// Perform topological sort using Kahn's algorithm
    ///
    /// Complexity: O(V + E) where V = nodes, E = node-level edges
    ///
    /// Returns Ok(order) if graph is acyclic, `Err(remaining_nodes)` if cycles exist.
    fn topological_sort(&self) -> Result<Vec<NodeHandle>, Vec<NodeHandle>> {
        let mut in_degree: HashMap<NodeHandle, usize> = self.nodes.keys().map(|&h| (h, 0)).collect();

        // Stereo pairs produce two channel connections per node pair; count the edge once
        let edges: HashSet<(NodeHandle, NodeHandle)> = self
            .connections
            .iter()
            .map(|c| (c.source.node, c.destination.node))
            .collect();

        let mut adjacency: HashMap<NodeHandle, Vec<NodeHandle>> =
            HashMap::with_capacity(self.nodes.len());
        for &(from, to) in &edges {
            *in_degree.entry(to).or_insert(0) += 1;
            adjacency.entry(from).or_default().push(to);
        }

        // Min-heap keeps the order deterministic
        let mut queue: BinaryHeap<Reverse<NodeHandle>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&handle, _)| Reverse(handle))
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(handle)) = queue.pop() {
            result.push(handle);

            if let Some(outgoing) = adjacency.get(&handle) {
                for &to in outgoing {
                    if let Some(degree) = in_degree.get_mut(&to) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push(Reverse(to));
                        }
                    }
                }
            }
        }

        if result.len() == self.nodes.len() {
            Ok(result)
        } else {
            let processed: HashSet<NodeHandle> = result.into_iter().collect();
            Err(self
                .nodes
                .keys()
                .filter(|handle| !processed.contains(handle))
                .copied()
                .collect())
        }
    }
}
