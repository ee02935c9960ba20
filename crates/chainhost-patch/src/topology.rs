//! The logical graph: nodes and the wires between them.
//!
//! The topology knows nothing about audio. It records which device endpoints
//! and plugins exist, where they sit on the canvas, and which node feeds
//! which. Engine handles are references only; instances live in the engine.

use std::collections::HashSet;
use std::fmt;

use chainhost_audio::{NodeHandle, ReservedSlot};
use chainhost_plugin::PluginDescriptor;
use serde::{Deserialize, Serialize};

use crate::lifecycle::Lifecycle;

/// Process-local node identifier, never reused while the node exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// First id a document may not carry. Ids from here up are left to the
    /// allocator so it never runs past `u32::MAX`.
    pub const STORABLE_LIMIT: u32 = 1 << 31;

    /// Whether a document may carry this id
    pub const fn is_storable(self) -> bool {
        self.0 < Self::STORABLE_LIMIT
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Input,
    Output,
    Plugin,
}

impl NodeRole {
    /// Output-role nodes only sink audio
    pub const fn has_output_port(self) -> bool {
        !matches!(self, Self::Output)
    }

    /// Input-role nodes only source audio
    pub const fn has_input_port(self) -> bool {
        !matches!(self, Self::Input)
    }

    /// Device endpoint rather than a plugin
    pub const fn is_boundary(self) -> bool {
        !matches!(self, Self::Plugin)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Input => "Input",
            Self::Output => "Output",
            Self::Plugin => "Plugin",
        };
        f.pad(name)
    }
}

/// Canvas coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Role-specific part of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Bound to [`ReservedSlot::AudioInput`]
    Input,
    /// Bound to [`ReservedSlot::AudioOutput`]
    Output,
    Plugin {
        descriptor: PluginDescriptor,
        lifecycle: Lifecycle,
    },
}

impl NodeKind {
    /// An unloaded plugin node
    pub fn plugin(descriptor: PluginDescriptor) -> Self {
        Self::Plugin {
            descriptor,
            lifecycle: Lifecycle::Unloaded,
        }
    }

    pub const fn role(&self) -> NodeRole {
        match self {
            Self::Input => NodeRole::Input,
            Self::Output => NodeRole::Output,
            Self::Plugin { .. } => NodeRole::Plugin,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    pub name: String,
    pub position: Position,
    kind: NodeKind,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, position: Position, kind: NodeKind) -> Self {
        Self {
            id,
            name: name.into(),
            position,
            kind,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> NodeRole {
        self.kind.role()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The engine entry this node is bound to.
    ///
    /// Device endpoints always resolve to their reserved slot; plugin nodes
    /// only once live.
    pub fn engine_handle(&self) -> Option<NodeHandle> {
        match &self.kind {
            NodeKind::Input => Some(ReservedSlot::AudioInput.handle()),
            NodeKind::Output => Some(ReservedSlot::AudioOutput.handle()),
            NodeKind::Plugin { lifecycle, .. } => lifecycle.handle(),
        }
    }

    pub fn descriptor(&self) -> Option<&PluginDescriptor> {
        match &self.kind {
            NodeKind::Plugin { descriptor, .. } => Some(descriptor),
            NodeKind::Input | NodeKind::Output => None,
        }
    }

    pub fn lifecycle(&self) -> Option<Lifecycle> {
        match &self.kind {
            NodeKind::Plugin { lifecycle, .. } => Some(*lifecycle),
            NodeKind::Input | NodeKind::Output => None,
        }
    }
}

/// Directed stereo connection between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Wire {
    pub from: NodeId,
    pub to: NodeId,
}

impl Wire {
    pub const fn new(from: NodeId, to: NodeId) -> Self {
        Self { from, to }
    }

    pub fn touches(&self, id: NodeId) -> bool {
        self.from == id || self.to == id
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Ordered nodes plus wires
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
    wires: Vec<Wire>,
    next_id: u32,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            wires: Vec::new(),
            next_id: 1,
        }
    }

    /// Append a node under the next free id
    pub fn add_node(&mut self, name: impl Into<String>, position: Position, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.nodes.push(Node::new(id, name, position, kind));
        id
    }

    /// Append a node that already has an id (restore path).
    ///
    /// Returns false if the id is taken.
    pub fn insert_node(&mut self, node: Node) -> bool {
        if !node.id.is_storable() || self.contains(node.id) {
            return false;
        }
        self.reserve_id(node.id);
        self.nodes.push(node);
        true
    }

    /// Make sure later allocations never hand out `id`
    pub fn reserve_id(&mut self, id: NodeId) {
        if id.is_storable() {
            self.next_id = self.next_id.max(id.0 + 1);
        }
    }

    /// Id the next [`Topology::add_node`] will use
    pub fn next_id(&self) -> NodeId {
        NodeId(self.next_id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Remove a node and every wire touching it
    pub fn remove_node(&mut self, id: NodeId) -> Option<(Node, Vec<Wire>)> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        let node = self.nodes.remove(index);
        let (removed, kept): (Vec<Wire>, Vec<Wire>) =
            self.wires.iter().copied().partition(|w| w.touches(id));
        self.wires = kept;
        Some((node, removed))
    }

    pub fn move_node(&mut self, id: NodeId, position: Position) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.position = position;
                true
            }
            None => false,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn wires(&self) -> &[Wire] {
        &self.wires
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn count_role(&self, role: NodeRole) -> usize {
        self.nodes.iter().filter(|n| n.role() == role).count()
    }

    pub fn contains_wire(&self, wire: Wire) -> bool {
        self.wires.contains(&wire)
    }

    /// Wires feeding `id`
    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Wire> {
        self.wires.iter().filter(move |w| w.to == id)
    }

    /// Wires leaving `id`
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Wire> {
        self.wires.iter().filter(move |w| w.from == id)
    }

    pub fn wires_touching(&self, id: NodeId) -> Vec<Wire> {
        self.wires.iter().copied().filter(|w| w.touches(id)).collect()
    }

    /// Record a wire. Returns false if it is already present.
    pub fn add_wire(&mut self, wire: Wire) -> bool {
        if self.contains_wire(wire) {
            return false;
        }
        self.wires.push(wire);
        true
    }

    pub fn remove_wire(&mut self, wire: Wire) -> bool {
        let before = self.wires.len();
        self.wires.retain(|w| *w != wire);
        self.wires.len() != before
    }

    /// Whether audio leaving `from` reaches `to` along recorded wires
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];

        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if visited.insert(id) {
                stack.extend(self.outgoing(id).map(|w| w.to));
            }
        }
        false
    }

    /// Drop every node and wire. The id counter keeps counting.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.wires.clear();
    }
}
