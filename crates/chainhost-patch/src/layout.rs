//! Default canvas placement for new nodes.
//!
//! Inputs stack down the left zone, outputs down the right zone and plugins
//! down the centre column.

use crate::topology::{NodeRole, Position};

/// Width of the left and right device zones
pub const ZONE_WIDTH: i32 = 170;
/// Height of a zone's header strip
pub const HEADER_HEIGHT: i32 = 34;
/// Height of one device endpoint row
pub const SIDE_HEIGHT: i32 = 40;
/// Plugin node size
pub const NODE_WIDTH: i32 = 140;
pub const NODE_HEIGHT: i32 = 56;

const SIDE_GAP: i32 = 6;
const PLUGIN_TOP: i32 = 60;
const PLUGIN_GAP: i32 = 20;

/// Canvas dimensions used for placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasLayout {
    pub width: i32,
    pub height: i32,
}

impl Default for CanvasLayout {
    fn default() -> Self {
        Self {
            width: 900,
            height: 560,
        }
    }
}

impl CanvasLayout {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Position for a new node when `existing` nodes of the same role exist
    pub fn position_for(&self, role: NodeRole, existing: usize) -> Position {
        let index = i32::try_from(existing).unwrap_or(i32::MAX);
        match role {
            NodeRole::Input => Position::new(0, side_row(index)),
            NodeRole::Output => Position::new(self.width - ZONE_WIDTH, side_row(index)),
            NodeRole::Plugin => {
                let centre = (self.width - ZONE_WIDTH * 2) / 2 + ZONE_WIDTH - NODE_WIDTH / 2;
                Position::new(
                    centre,
                    PLUGIN_TOP.saturating_add(index.saturating_mul(NODE_HEIGHT + PLUGIN_GAP)),
                )
            }
        }
    }

    /// Keep a dragged node fully on the canvas
    pub fn clamp(&self, position: Position) -> Position {
        Position::new(
            position.x.clamp(0, (self.width - NODE_WIDTH).max(0)),
            position.y.clamp(0, (self.height - NODE_HEIGHT).max(0)),
        )
    }
}

fn side_row(index: i32) -> i32 {
    (HEADER_HEIGHT + SIDE_GAP).saturating_add(index.saturating_mul(SIDE_HEIGHT + SIDE_GAP))
}
