//! The patch bay: edits the topology and mirrors every edit into the engine.
//!
//! Every public edit follows the same shape. Validate, change the topology,
//! apply the matching channel edits to the engine, commit with exactly one
//! `rebuild()`, then notify the change listener exactly once. Nothing is
//! committed halfway through an edit, so the audio thread never sees a chain
//! with the old wire removed but the new one not yet in place.

use std::collections::HashMap;

use chainhost_audio::{AudioGraph, Endpoint, NodeHandle, SharedPlugin};
use chainhost_core::{Frames, STEREO_PAIR, SampleRate};
use chainhost_plugin::{KnownPluginList, PluginDescriptor, PluginProvider, PluginValueKind};

use crate::connection::{WireRejection, validate_wire};
use crate::document::{GraphDocument, NodeRecord, WireRecord, encode_state};
use crate::layout::CanvasLayout;
use crate::lifecycle::{self, Lifecycle};
use crate::settings::{Settings, keys};
use crate::topology::{Node, NodeId, NodeKind, NodeRole, Position, Topology, Wire};
use crate::PatchError;

/// Listener invoked once after every completed edit
pub type GraphChangedCallback = Box<dyn FnMut(&PatchBay)>;

/// What a [`PatchBay::load`] could not restore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Nodes whose plugin could not be brought up, with the reason
    pub dropped_nodes: Vec<(NodeId, String)>,
    /// Wires whose endpoints did not both resolve, or that were invalid
    pub dropped_wires: Vec<Wire>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.dropped_nodes.is_empty() && self.dropped_wires.is_empty()
    }
}

pub struct PatchBay {
    topology: Topology,
    graph: AudioGraph,
    provider: Box<dyn PluginProvider>,
    known: KnownPluginList,
    layout: CanvasLayout,
    on_graph_changed: Option<GraphChangedCallback>,
}

impl PatchBay {
    /// Create a patch bay driving `graph`.
    ///
    /// The graph's device endpoint slots are expected to be installed
    /// already (see [`AudioGraph::install_io_endpoints`]).
    pub fn new(graph: AudioGraph, provider: impl PluginProvider + 'static) -> Self {
        Self {
            topology: Topology::new(),
            graph,
            provider: Box::new(provider),
            known: KnownPluginList::new(),
            layout: CanvasLayout::default(),
            on_graph_changed: None,
        }
    }

    pub fn with_known_plugins(mut self, known: KnownPluginList) -> Self {
        self.known = known;
        self
    }

    pub fn with_layout(mut self, layout: CanvasLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Register the change listener, replacing any previous one
    pub fn set_on_graph_changed(&mut self, callback: impl FnMut(&Self) + 'static) {
        self.on_graph_changed = Some(Box::new(callback));
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn known_plugins(&self) -> &KnownPluginList {
        &self.known
    }

    pub fn known_plugins_mut(&mut self) -> &mut KnownPluginList {
        &mut self.known
    }

    pub fn layout(&self) -> CanvasLayout {
        self.layout
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.topology.node(id)
    }

    /// Re-prepare every plugin for a new device rate and block size
    pub fn set_audio_config(&mut self, sample_rate: SampleRate, block_size: Frames) {
        if (sample_rate, block_size) == (self.graph.sample_rate(), self.graph.block_size()) {
            return;
        }
        tracing::info!("Audio format changed to {} Hz / {} frames", sample_rate, block_size);
        self.graph.set_config(sample_rate, block_size);
    }

    fn notify(&mut self) {
        if let Some(mut callback) = self.on_graph_changed.take() {
            callback(self);
            // The callback cannot replace itself, it only sees `&Self`
            self.on_graph_changed = Some(callback);
        }
    }

    fn next_position(&self, role: NodeRole) -> Position {
        self.layout
            .position_for(role, self.topology.count_role(role))
    }

    // ---- Topology edits ----------------------------------------------------

    /// Add a device input endpoint node
    pub fn add_input(&mut self, name: impl Into<String>) -> NodeId {
        self.add_endpoint(NodeKind::Input, name.into())
    }

    /// Add a device output endpoint node
    pub fn add_output(&mut self, name: impl Into<String>) -> NodeId {
        self.add_endpoint(NodeKind::Output, name.into())
    }

    fn add_endpoint(&mut self, kind: NodeKind, name: String) -> NodeId {
        let position = self.next_position(kind.role());
        let role = kind.role();
        let id = self.topology.add_node(name, position, kind);
        tracing::debug!("Added {} node {}", role, id);
        self.notify();
        id
    }

    /// Instantiate a plugin and add it as a node.
    ///
    /// On failure the topology and the engine are left untouched.
    pub fn add_plugin(&mut self, descriptor: &PluginDescriptor) -> Result<NodeId, PatchError> {
        let lifecycle =
            match lifecycle::bring_live(self.provider.as_ref(), &mut self.graph, descriptor, None) {
                Ok(lifecycle) => lifecycle,
                Err(e) => {
                    tracing::warn!("Cannot load plugin {}: {}", descriptor.name, e);
                    return Err(e);
                }
            };

        let position = self.next_position(NodeRole::Plugin);
        let id = self.topology.add_node(
            descriptor.name.clone(),
            position,
            NodeKind::Plugin {
                descriptor: descriptor.clone(),
                lifecycle,
            },
        );

        self.graph.rebuild();
        tracing::info!("Added plugin {} as node {}", descriptor.name, id);
        self.notify();
        Ok(id)
    }

    /// Add a plugin from the known list by its file or identifier
    pub fn add_known_plugin(&mut self, file_or_identifier: &str) -> Result<NodeId, PatchError> {
        let descriptor = self
            .known
            .find_by_identifier(file_or_identifier)
            .cloned()
            .ok_or_else(|| PatchError::UnknownPlugin(file_or_identifier.to_string()))?;
        self.add_plugin(&descriptor)
    }

    /// Remove a node of any role along with its wires.
    ///
    /// Plugin instances are released from the engine. Device endpoint slots
    /// stay in the engine; only the logical node goes. Unknown ids are a no-op.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.topology.node(id) else {
            tracing::debug!("Remove ignored: no node {}", id);
            return false;
        };
        let lifecycle = node.lifecycle();

        let wires = self.topology.wires_touching(id);
        for &wire in &wires {
            self.drop_wire(wire);
        }

        if let Some(lifecycle) = lifecycle
            && let Err(e) = lifecycle::retire(&mut self.graph, lifecycle)
        {
            tracing::warn!("Node {} was not live: {}", id, e);
        }

        if let Some((node, _)) = self.topology.remove_node(id) {
            tracing::debug!(
                "Removed {} node {} ({}) and {} wires",
                node.role(),
                id,
                node.name,
                wires.len()
            );
        }

        self.graph.rebuild();
        self.notify();
        true
    }

    /// Move a node on the canvas. No engine change.
    pub fn move_node(&mut self, id: NodeId, position: Position) -> bool {
        if !self.topology.move_node(id, self.layout.clamp(position)) {
            return false;
        }
        self.notify();
        true
    }

    // ---- Connection management ---------------------------------------------

    /// Wire `from` into `to`, replacing whatever fed `to` before.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), WireRejection> {
        if let Err(rejection) = validate_wire(&self.topology, from, to) {
            tracing::debug!("Rejected wire {} -> {}: {}", from, to, rejection);
            return Err(rejection);
        }

        // Single input per destination
        let replaced: Vec<Wire> = self.topology.incoming(to).copied().collect();
        for wire in replaced {
            self.drop_wire(wire);
        }

        let wire = Wire::new(from, to);
        self.apply_wire(wire);

        self.graph.rebuild();
        tracing::debug!("Connected {}", wire);
        self.notify();
        Ok(())
    }

    /// Remove the wire `from -> to`. Returns false if there was none.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> bool {
        let wire = Wire::new(from, to);
        if !self.topology.contains_wire(wire) {
            return false;
        }

        self.drop_wire(wire);

        self.graph.rebuild();
        tracing::debug!("Disconnected {}", wire);
        self.notify();
        true
    }

    /// Remove every wire touching `id`. Returns how many were removed.
    pub fn disconnect_all(&mut self, id: NodeId) -> usize {
        if !self.topology.contains(id) {
            return 0;
        }

        let wires = self.topology.wires_touching(id);
        for &wire in &wires {
            self.drop_wire(wire);
        }

        self.graph.rebuild();
        tracing::debug!("Disconnected {} wires from node {}", wires.len(), id);
        self.notify();
        wires.len()
    }

    fn wire_handles(&self, wire: Wire) -> Option<(NodeHandle, NodeHandle)> {
        let from = self.topology.node(wire.from)?.engine_handle()?;
        let to = self.topology.node(wire.to)?.engine_handle()?;
        Some((from, to))
    }

    /// Whether another wire in the topology drives the same engine route.
    ///
    /// Endpoint nodes of one role share a reserved slot, so two wires can map
    /// onto the same pair of channel connections.
    fn route_shared(&self, wire: Wire, route: (NodeHandle, NodeHandle)) -> bool {
        self.topology
            .wires()
            .iter()
            .any(|&other| other != wire && self.wire_handles(other) == Some(route))
    }

    /// Record a wire and add its channel pair to the engine. The caller commits.
    fn apply_wire(&mut self, wire: Wire) {
        match self.wire_handles(wire) {
            Some(route) if self.route_shared(wire, route) => {
                tracing::debug!("Wire {} reuses an existing engine route", wire);
            }
            Some((from, to)) => {
                for channel in STEREO_PAIR {
                    if !self
                        .graph
                        .add_connection(Endpoint::new(from, channel), Endpoint::new(to, channel))
                    {
                        tracing::warn!("Engine refused channel {} of wire {}", channel, wire);
                    }
                }
            }
            None => tracing::warn!("Wire {} has an endpoint without an engine node", wire),
        }
        self.topology.add_wire(wire);
    }

    /// Forget a wire and release its channel pair unless another wire still
    /// uses it. The caller commits.
    fn drop_wire(&mut self, wire: Wire) {
        self.topology.remove_wire(wire);

        let Some(route) = self.wire_handles(wire) else {
            return;
        };
        if self.route_shared(wire, route) {
            return;
        }
        let (from, to) = route;
        for channel in STEREO_PAIR {
            self.graph
                .remove_connection(Endpoint::new(from, channel), Endpoint::new(to, channel));
        }
    }

    // ---- Persistence -------------------------------------------------------

    /// Snapshot the topology, capturing each plugin's state right now.
    pub fn save(&self) -> GraphDocument {
        let nodes = self
            .topology
            .nodes()
            .iter()
            .map(|node| match node.kind() {
                NodeKind::Plugin { descriptor, .. } => NodeRecord::plugin(
                    node.id().0,
                    node.name.clone(),
                    node.position,
                    descriptor,
                    &self.capture_state(node).unwrap_or_default(),
                ),
                NodeKind::Input | NodeKind::Output => {
                    NodeRecord::endpoint(node.id().0, node.role(), node.name.clone(), node.position)
                }
            })
            .collect();

        let wires = self
            .topology
            .wires()
            .iter()
            .map(|w| WireRecord {
                from: w.from.0,
                to: w.to.0,
            })
            .collect();

        GraphDocument {
            nodes,
            wires,
            ..GraphDocument::new()
        }
    }

    /// Current state blob of a live plugin node
    fn live_plugin(&self, node: &Node) -> Option<&SharedPlugin> {
        let handle = node.engine_handle()?;
        self.graph.node(handle)?.plugin()
    }

    fn capture_state(&self, node: &Node) -> Option<Vec<u8>> {
        let state = self.live_plugin(node)?.lock().state();
        Some(state)
    }

    /// Rebuild the topology from a document.
    ///
    /// Only the logical model is replaced: the device endpoint slots must
    /// already exist in the engine and are never cleared. Plugins are
    /// re-instantiated from their descriptors, preferring the known-list
    /// entry with the same file or identifier. Nodes that fail to come up
    /// are dropped together with their wires; the rest of the load goes on.
    pub fn load(&mut self, document: &GraphDocument) -> LoadReport {
        self.unload();

        let mut report = LoadReport::default();

        for record in &document.nodes {
            let id = NodeId(record.id);
            if !id.is_storable() {
                tracing::warn!("Node id {} in document is out of range, skipping", id);
                report.dropped_nodes.push((id, "id out of range".to_string()));
                continue;
            }
            self.topology.reserve_id(id);

            if self.topology.contains(id) {
                tracing::warn!("Duplicate node id {} in document, skipping", id);
                report.dropped_nodes.push((id, "duplicate id".to_string()));
                continue;
            }

            let kind = match record.role {
                NodeRole::Input => NodeKind::Input,
                NodeRole::Output => NodeKind::Output,
                NodeRole::Plugin => match self.restore_plugin(record) {
                    Ok(kind) => kind,
                    Err(reason) => {
                        tracing::warn!("Dropping node {} ({}): {}", id, record.name, reason);
                        report.dropped_nodes.push((id, reason));
                        continue;
                    }
                },
            };

            self.topology
                .insert_node(Node::new(id, record.name.clone(), record.position(), kind));
        }

        for record in &document.wires {
            let wire = Wire::new(NodeId(record.from), NodeId(record.to));

            let resolved = self.wire_handles(wire).is_some();
            let valid = validate_wire(&self.topology, wire.from, wire.to).is_ok();
            let free = self.topology.incoming(wire.to).next().is_none();

            if resolved && valid && free {
                self.apply_wire(wire);
            } else {
                tracing::debug!("Dropping saved wire {}", wire);
                report.dropped_wires.push(wire);
            }
        }

        self.graph.rebuild();
        tracing::info!(
            "Restored graph: {} nodes, {} wires ({} nodes and {} wires dropped)",
            self.topology.len(),
            self.topology.wires().len(),
            report.dropped_nodes.len(),
            report.dropped_wires.len()
        );
        report
    }

    /// [`PatchBay::load`] for an interactive replace: the listener hears
    /// about the new graph like any other edit.
    pub fn open_document(&mut self, document: &GraphDocument) -> LoadReport {
        let report = self.load(document);
        self.notify();
        report
    }

    fn restore_plugin(&mut self, record: &NodeRecord) -> Result<NodeKind, String> {
        let saved = record
            .descriptor()
            .ok_or_else(|| "no plugin identifier saved".to_string())?;

        let descriptor = self
            .known
            .find_by_identifier(&saved.file_or_identifier)
            .cloned()
            .unwrap_or(saved);

        let state = match record.state() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Ignoring saved state of {}: {}", record.name, e);
                None
            }
        };

        let lifecycle = lifecycle::bring_live(
            self.provider.as_ref(),
            &mut self.graph,
            &descriptor,
            state.as_deref(),
        )
        .map_err(|e| e.to_string())?;

        tracing::info!("Restored plugin {} [{}]", descriptor.name, descriptor.format);
        Ok(NodeKind::Plugin {
            descriptor,
            lifecycle,
        })
    }

    /// Release every engine reflection of the current topology and clear it.
    fn unload(&mut self) {
        for wire in self.topology.wires().to_vec() {
            self.drop_wire(wire);
        }

        let plugins: Vec<(NodeId, Lifecycle)> = self
            .topology
            .nodes()
            .iter()
            .filter_map(|n| n.lifecycle().map(|l| (n.id(), l)))
            .collect();
        for (id, lifecycle) in plugins {
            if let Err(e) = lifecycle::retire(&mut self.graph, lifecycle) {
                tracing::warn!("Node {} was not live: {}", id, e);
            }
        }

        self.topology.clear();
    }

    /// Current state blob of the plugin at `id`
    pub fn plugin_state(&self, id: NodeId) -> Result<Vec<u8>, PatchError> {
        self.topology
            .node(id)
            .and_then(|node| self.capture_state(node))
            .ok_or(PatchError::UnknownNode(id))
    }

    /// Switch bypass on a live plugin. The running plan picks it up at the
    /// next block; no rebuild is needed.
    ///
    /// Returns false if `id` has no live plugin.
    pub fn set_bypassed(&self, id: NodeId, bypassed: bool) -> bool {
        let Some(cell) = self.topology.node(id).and_then(|n| self.live_plugin(n)) else {
            return false;
        };
        cell.set_bypassed(bypassed);
        tracing::debug!("Node {} bypass {}", id, if bypassed { "on" } else { "off" });
        true
    }

    pub fn is_bypassed(&self, id: NodeId) -> Option<bool> {
        let node = self.topology.node(id)?;
        Some(self.live_plugin(node)?.is_bypassed())
    }

    /// Write the current graph into the settings store
    pub fn store_in_settings(&self, settings: &mut Settings) -> Result<(), PatchError> {
        let document = self.save().to_json()?;
        settings.set_value(keys::NODE_GRAPH_STATE, document);
        Ok(())
    }

    /// Restore the graph saved in the settings store, if there is one
    pub fn restore_from_settings(
        &mut self,
        settings: &Settings,
    ) -> Result<Option<LoadReport>, PatchError> {
        let Some(value) = settings.value(keys::NODE_GRAPH_STATE) else {
            return Ok(None);
        };
        let document = GraphDocument::from_json(value.clone())?;
        Ok(Some(self.load(&document)))
    }

    /// Store each plugin's state and chain position under its settings keys
    pub fn save_plugin_states(&self, settings: &mut Settings) {
        let mut order: HashMap<String, usize> = HashMap::new();

        for (index, node) in self
            .topology
            .nodes()
            .iter()
            .filter(|n| n.role() == NodeRole::Plugin)
            .enumerate()
        {
            let Some(descriptor) = node.descriptor() else {
                continue;
            };
            if let Some(state) = self.capture_state(node) {
                settings.set_value(
                    descriptor.settings_key(PluginValueKind::State),
                    encode_state(&state),
                );
            }
            if let Some(cell) = self.live_plugin(node) {
                settings.set_value(
                    descriptor.settings_key(PluginValueKind::Bypass),
                    cell.is_bypassed(),
                );
            }
            order.insert(descriptor.settings_key(PluginValueKind::Order), index);
        }

        for (key, index) in order {
            settings.set_value(key, index);
        }
    }

    /// Re-apply the bypass flags stored by [`PatchBay::save_plugin_states`]
    pub fn restore_plugin_bypass(&self, settings: &Settings) {
        for node in self.topology.nodes() {
            let (Some(descriptor), Some(cell)) = (node.descriptor(), self.live_plugin(node)) else {
                continue;
            };
            let key = descriptor.settings_key(PluginValueKind::Bypass);
            if let Some(bypassed) = settings.value(&key).and_then(serde_json::Value::as_bool) {
                cell.set_bypassed(bypassed);
            }
        }
    }

    /// Remove every stored plugin state for the plugins in the topology
    pub fn delete_plugin_states(&self, settings: &mut Settings) {
        for descriptor in self.topology.nodes().iter().filter_map(Node::descriptor) {
            settings.remove_value(&descriptor.settings_key(PluginValueKind::State));
        }
    }
}
