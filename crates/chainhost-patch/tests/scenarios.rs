//! End-to-end patch bay behaviour with a recording plugin provider.

use std::sync::{Arc, Mutex};

use chainhost_audio::builtin::{BuiltinProvider, gain::GAIN_IDENTIFIER};
use chainhost_audio::{AudioConfig, AudioGraph, GraphProcessor};
use chainhost_core::{ChannelCount, Frames, SampleRate};
use chainhost_patch::{
    GraphDocument, NodeId, NodeRecord, NodeRole, PatchBay, PatchError, Position, Wire,
    WireRejection,
};
use chainhost_plugin::{AudioBuffer, Plugin, PluginDescriptor, PluginError, PluginProvider};

type StateLog = Arc<Mutex<Vec<Vec<u8>>>>;

struct RecordingPlugin {
    descriptor: PluginDescriptor,
    state: Vec<u8>,
    restored: StateLog,
}

impl Plugin for RecordingPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn initialize(&mut self, _: SampleRate, _: Frames) -> Result<(), PluginError> {
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), PluginError> {
        for (input, output) in audio.inputs.iter().zip(audio.outputs.iter_mut()) {
            output[..audio.frames].copy_from_slice(&input[..audio.frames]);
        }
        Ok(())
    }

    fn input_channels(&self) -> ChannelCount {
        2
    }

    fn output_channels(&self) -> ChannelCount {
        2
    }

    fn state(&self) -> Vec<u8> {
        self.state.clone()
    }

    fn set_state(&mut self, state: &[u8]) -> Result<(), PluginError> {
        self.restored.lock().unwrap().push(state.to_vec());
        self.state = state.to_vec();
        Ok(())
    }

    fn deactivate(&mut self) {}
}

/// Creates recording plugins for every identifier except "missing"
#[derive(Clone, Default)]
struct RecordingProvider {
    restored: StateLog,
}

impl PluginProvider for RecordingProvider {
    fn create_instance(
        &self,
        descriptor: &PluginDescriptor,
        _sample_rate: SampleRate,
        _block_size: Frames,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        if descriptor.file_or_identifier == "missing" {
            return Err(PluginError::NotFound(descriptor.file_or_identifier.clone()));
        }
        Ok(Box::new(RecordingPlugin {
            descriptor: descriptor.clone(),
            state: Vec::new(),
            restored: Arc::clone(&self.restored),
        }))
    }
}

fn engine() -> (AudioGraph, GraphProcessor) {
    let (mut graph, processor) = AudioGraph::new(AudioConfig::default());
    graph.install_io_endpoints();
    (graph, processor)
}

fn recording_bay() -> (PatchBay, StateLog) {
    let provider = RecordingProvider::default();
    let restored = Arc::clone(&provider.restored);
    (PatchBay::new(engine().0, provider), restored)
}

fn reverb() -> PluginDescriptor {
    let mut descriptor = PluginDescriptor::new("Reverb", "VST3", "/p/Reverb.vst3");
    descriptor.version = "1.0".to_string();
    descriptor
}

#[test]
fn mic_reverb_speakers_chain() {
    let (mut bay, _) = recording_bay();

    let mic = bay.add_input("Mic");
    let speakers = bay.add_output("Speakers");
    let fx = bay.add_plugin(&reverb()).unwrap();
    assert_eq!((mic, speakers, fx), (NodeId(1), NodeId(2), NodeId(3)));

    bay.connect(mic, fx).unwrap();
    bay.connect(fx, speakers).unwrap();

    let json = bay.save().to_json().unwrap();
    assert_eq!(json["Nodes"].as_array().unwrap().len(), 3);
    assert_eq!(json["Nodes"][2]["type"], "Plugin");
    assert_eq!(json["Nodes"][2]["pluginFileOrIdentifier"], "/p/Reverb.vst3");
    assert_eq!(json["Wires"][0], serde_json::json!({ "from": 1, "to": 3 }));
    assert_eq!(json["Wires"][1], serde_json::json!({ "from": 3, "to": 2 }));

    // The engine runs input -> plugin -> output
    let step = |id: NodeId| {
        let handle = bay.node(id).unwrap().engine_handle().unwrap();
        bay.graph()
            .processing_order()
            .iter()
            .position(|&h| h == handle)
            .unwrap()
    };
    assert!(step(mic) < step(fx) && step(fx) < step(speakers));
}

#[test]
fn rewiring_the_output_bypasses_the_plugin() {
    let (mut bay, _) = recording_bay();
    let mic = bay.add_input("Mic");
    let speakers = bay.add_output("Speakers");
    let fx = bay.add_plugin(&reverb()).unwrap();
    bay.connect(mic, fx).unwrap();
    bay.connect(fx, speakers).unwrap();

    bay.connect(mic, speakers).unwrap();

    let topology = bay.topology();
    assert!(!topology.contains_wire(Wire::new(fx, speakers)));
    assert!(topology.contains_wire(Wire::new(mic, fx)));
    let incoming: Vec<Wire> = topology.incoming(speakers).copied().collect();
    assert_eq!(incoming, vec![Wire::new(mic, speakers)]);
    // Mic still feeds the plugin, so both device routes stay in the engine
    assert_eq!(bay.graph().connections().count(), 4);
}

#[test]
fn destination_keeps_a_single_input() {
    let (mut bay, _) = recording_bay();
    let mic = bay.add_input("Mic");
    let line = bay.add_input("Line");
    let out = bay.add_output("Out");

    bay.connect(mic, out).unwrap();
    bay.connect(line, out).unwrap();

    assert_eq!(bay.topology().wires(), &[Wire::new(line, out)]);
    assert_eq!(bay.topology().incoming(out).count(), 1);
}

#[test]
fn repeated_connect_is_idempotent() {
    let (mut bay, _) = recording_bay();
    let mic = bay.add_input("Mic");
    let fx = bay.add_plugin(&reverb()).unwrap();

    bay.connect(mic, fx).unwrap();
    let wires = bay.topology().wires().to_vec();
    let connections = bay.graph().connections().count();

    bay.connect(mic, fx).unwrap();
    assert_eq!(bay.topology().wires(), wires.as_slice());
    assert_eq!(bay.graph().connections().count(), connections);
}

#[test]
fn invalid_wires_are_refused() {
    let (mut bay, _) = recording_bay();
    let mic = bay.add_input("Mic");
    let line = bay.add_input("Line");
    let out = bay.add_output("Out");
    let phones = bay.add_output("Phones");
    let fx = bay.add_plugin(&reverb()).unwrap();

    assert_eq!(bay.connect(fx, fx), Err(WireRejection::SelfWire(fx)));
    assert!(bay.connect(mic, line).is_err());
    assert!(bay.connect(out, phones).is_err());
    assert_eq!(bay.connect(out, fx), Err(WireRejection::NoOutputPort(out)));
    assert!(bay.topology().wires().is_empty());
    assert_eq!(bay.graph().connections().count(), 0);
}

#[test]
fn removing_a_node_removes_its_wires() {
    let (mut bay, _) = recording_bay();
    let mic = bay.add_input("Mic");
    let out = bay.add_output("Out");
    let fx = bay.add_plugin(&reverb()).unwrap();
    bay.connect(mic, fx).unwrap();
    bay.connect(fx, out).unwrap();

    assert!(bay.remove_node(fx));
    assert!(bay.topology().wires().iter().all(|w| !w.touches(fx)));
    assert_eq!(bay.topology().len(), 2);
    assert_eq!(bay.graph().connections().count(), 0);
}

#[test]
fn failed_instantiation_leaves_no_trace() {
    let (mut bay, _) = recording_bay();
    bay.add_input("Mic");
    let engine_nodes = bay.graph().nodes().count();
    let topology_nodes = bay.topology().len();

    let result = bay.add_plugin(&PluginDescriptor::new("Ghost", "VST3", "missing"));

    assert!(matches!(result, Err(PatchError::Instantiation { .. })));
    assert_eq!(bay.topology().len(), topology_nodes);
    assert_eq!(bay.graph().nodes().count(), engine_nodes);
}

#[test]
fn saved_state_reaches_the_new_instance() {
    let (mut bay, restored) = recording_bay();

    let mut document = GraphDocument::new();
    let mut record = NodeRecord::plugin(7, "Reverb", Position::new(380, 60), &reverb(), &[]);
    record.plugin_state_base64 = Some("QUJD".to_string());
    document.nodes.push(record);

    let report = bay.load(&document);
    assert!(report.is_complete());
    assert_eq!(*restored.lock().unwrap(), vec![b"ABC".to_vec()]);
    assert_eq!(bay.plugin_state(NodeId(7)).unwrap(), b"ABC");
}

#[test]
fn undecodable_state_loads_without_state() {
    let (mut bay, restored) = recording_bay();

    let mut document = GraphDocument::new();
    let mut record = NodeRecord::plugin(1, "Reverb", Position::default(), &reverb(), &[]);
    record.plugin_state_base64 = Some("%%%".to_string());
    document.nodes.push(record);

    let report = bay.load(&document);
    assert!(report.is_complete());
    assert!(restored.lock().unwrap().is_empty());
    assert_eq!(bay.node(NodeId(1)).unwrap().role(), NodeRole::Plugin);
}

#[test]
fn round_trip_drops_unresolvable_plugin() {
    let (mut bay, _) = recording_bay();
    let mic = bay.add_input("Mic");
    let out = bay.add_output("Speakers");
    let fx = bay.add_plugin(&reverb()).unwrap();
    bay.connect(mic, fx).unwrap();
    bay.connect(fx, out).unwrap();

    let mut document = bay.save();
    let reloaded = GraphDocument::from_ron(&document.to_ron().unwrap()).unwrap();
    assert_eq!(reloaded, document);

    let (mut copy, _) = recording_bay();
    assert!(copy.load(&reloaded).is_complete());
    assert_eq!(copy.topology().wires(), bay.topology().wires());
    for (a, b) in copy.topology().nodes().iter().zip(bay.topology().nodes()) {
        assert_eq!((a.id(), &a.name, a.position), (b.id(), &b.name, b.position));
    }

    // Same document, but the plugin can no longer be found
    document.nodes[2].plugin_file_or_identifier = Some("missing".to_string());
    let (mut broken, _) = recording_bay();
    let report = broken.load(&document);

    assert_eq!(report.dropped_nodes.len(), 1);
    assert_eq!(report.dropped_nodes[0].0, fx);
    assert_eq!(report.dropped_wires.len(), 2);
    assert_eq!(broken.topology().len(), 2);
    assert!(broken.topology().wires().is_empty());

    // Ids of dropped nodes are never handed out again
    let next = broken.add_input("Line");
    assert!(next > fx);
}

/// Run one 64-frame block of a constant stereo signal, return the first output frame
fn run_block(processor: &mut GraphProcessor) -> (f32, f32) {
    let left = [0.5_f32; 64];
    let right = [-0.5_f32; 64];
    let mut out_left = [0.0_f32; 64];
    let mut out_right = [0.0_f32; 64];

    let inputs: [&[f32]; 2] = [&left, &right];
    let mut outputs: [&mut [f32]; 2] = [&mut out_left, &mut out_right];
    processor.process(&inputs, &mut outputs);
    (outputs[0][0], outputs[1][0])
}

#[test]
fn audio_follows_the_wired_chain() {
    let (graph, mut processor) = engine();
    let mut bay = PatchBay::new(graph, BuiltinProvider)
        .with_known_plugins(chainhost_audio::builtin::descriptors().into_iter().collect());
    let mic = bay.add_input("Mic");
    let out = bay.add_output("Speakers");

    assert_eq!(run_block(&mut processor), (0.0, 0.0));

    bay.connect(mic, out).unwrap();
    assert_eq!(run_block(&mut processor), (0.5, -0.5));

    let gain = bay.add_known_plugin(GAIN_IDENTIFIER).unwrap();
    let handle = bay.node(gain).unwrap().engine_handle().unwrap();
    bay.graph()
        .node(handle)
        .unwrap()
        .plugin()
        .unwrap()
        .lock()
        .set_state(&2.0_f32.to_le_bytes())
        .unwrap();

    bay.connect(mic, gain).unwrap();
    bay.connect(gain, out).unwrap();
    assert_eq!(run_block(&mut processor), (1.0, -1.0));

    bay.remove_node(gain);
    assert_eq!(run_block(&mut processor), (0.0, 0.0));
}
