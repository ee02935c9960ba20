//! Structural wire validation.
//!
//! Only roles and topology are checked here. Channel counts and formats are
//! left to the engine, which refuses mismatches on its own.

use crate::topology::{NodeId, NodeRole, Topology};

/// Why a wire was refused. Refusals never change any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireRejection {
    #[error("node {0} cannot be wired to itself")]
    SelfWire(NodeId),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node {0} has no output port")]
    NoOutputPort(NodeId),

    #[error("node {0} has no input port")]
    NoInputPort(NodeId),

    #[error("cannot wire two {0} endpoints together")]
    SameBoundaryRole(NodeRole),

    #[error("wire {from} -> {to} would close a feedback loop")]
    WouldCycle { from: NodeId, to: NodeId },
}

/// Check that `from -> to` may be wired.
///
/// The rules, in order: no self wires, both nodes exist, the source has an
/// output port and the destination an input port, the two are not the same
/// boundary role, and `to` does not already feed `from`.
pub fn validate_wire(topology: &Topology, from: NodeId, to: NodeId) -> Result<(), WireRejection> {
    if from == to {
        return Err(WireRejection::SelfWire(from));
    }

    let source = topology.node(from).ok_or(WireRejection::UnknownNode(from))?;
    let destination = topology.node(to).ok_or(WireRejection::UnknownNode(to))?;

    if !source.role().has_output_port() {
        return Err(WireRejection::NoOutputPort(from));
    }
    if !destination.role().has_input_port() {
        return Err(WireRejection::NoInputPort(to));
    }
    if source.role().is_boundary() && source.role() == destination.role() {
        return Err(WireRejection::SameBoundaryRole(source.role()));
    }
    if topology.reaches(to, from) {
        return Err(WireRejection::WouldCycle { from, to });
    }

    Ok(())
}

pub fn is_valid_wire(topology: &Topology, from: NodeId, to: NodeId) -> bool {
    validate_wire(topology, from, to).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{NodeKind, Position, Wire};
    use chainhost_plugin::PluginDescriptor;

    struct Fixture {
        topology: Topology,
        mic: NodeId,
        line: NodeId,
        speakers: NodeId,
        phones: NodeId,
        fx: NodeId,
    }

    fn fixture() -> Fixture {
        let mut topology = Topology::new();
        let at = Position::default();
        let mic = topology.add_node("Mic", at, NodeKind::Input);
        let line = topology.add_node("Line", at, NodeKind::Input);
        let speakers = topology.add_node("Speakers", at, NodeKind::Output);
        let phones = topology.add_node("Phones", at, NodeKind::Output);
        let fx = topology.add_node(
            "Fx",
            at,
            NodeKind::plugin(PluginDescriptor::new("Fx", "VST3", "fx.vst3")),
        );
        Fixture {
            topology,
            mic,
            line,
            speakers,
            phones,
            fx,
        }
    }

    #[test]
    fn test_valid_chain() {
        let f = fixture();
        assert!(is_valid_wire(&f.topology, f.mic, f.fx));
        assert!(is_valid_wire(&f.topology, f.fx, f.speakers));
        assert!(is_valid_wire(&f.topology, f.mic, f.speakers));
    }

    #[test]
    fn test_self_wire() {
        let f = fixture();
        for id in [f.mic, f.speakers, f.fx] {
            assert_eq!(
                validate_wire(&f.topology, id, id),
                Err(WireRejection::SelfWire(id))
            );
        }
    }

    #[test]
    fn test_unknown_node() {
        let f = fixture();
        let ghost = NodeId(99);
        assert_eq!(
            validate_wire(&f.topology, ghost, f.fx),
            Err(WireRejection::UnknownNode(ghost))
        );
        assert_eq!(
            validate_wire(&f.topology, f.fx, ghost),
            Err(WireRejection::UnknownNode(ghost))
        );
    }

    #[test]
    fn test_port_direction() {
        let f = fixture();
        assert_eq!(
            validate_wire(&f.topology, f.speakers, f.fx),
            Err(WireRejection::NoOutputPort(f.speakers))
        );
        assert_eq!(
            validate_wire(&f.topology, f.fx, f.mic),
            Err(WireRejection::NoInputPort(f.mic))
        );
    }

    #[test]
    fn test_same_boundary_role_is_rejected() {
        let f = fixture();
        assert!(!is_valid_wire(&f.topology, f.mic, f.line));
        assert!(!is_valid_wire(&f.topology, f.speakers, f.phones));
    }

    #[test]
    fn test_feedback_loop() {
        let mut f = fixture();
        let at = Position::default();
        let gain = f.topology.add_node(
            "Gain",
            at,
            NodeKind::plugin(PluginDescriptor::new("Gain", "Builtin", "gain")),
        );
        f.topology.add_wire(Wire::new(f.fx, gain));

        assert_eq!(
            validate_wire(&f.topology, gain, f.fx),
            Err(WireRejection::WouldCycle {
                from: gain,
                to: f.fx
            })
        );
    }
}
