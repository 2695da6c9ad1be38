use std::collections::BTreeMap;

use super::types::Rect;
use crate::config::Settings;
use crate::ir::{Graph, NodeId, NodeKind, PinDirection, PinId};

/// Title bar height of a provisional node.
pub const TITLE_HEIGHT: f32 = 32.0;
/// Height of one pin row.
pub const PIN_ROW_HEIGHT: f32 = 24.0;
/// Provisional width of a regular node.
pub const NODE_WIDTH: f32 = 200.0;
/// Space below the last pin row.
const BOTTOM_PADDING: f32 = 8.0;
pub const KNOT_WIDTH: f32 = 42.0;
pub const KNOT_HEIGHT: f32 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSize {
    pub width: f32,
    pub height: f32,
}

/// Measured node sizes and pin offsets reported by the host.
#[derive(Debug, Clone, Default)]
pub struct NodeSizeCache {
    sizes: BTreeMap<NodeId, NodeSize>,
    pin_offsets: BTreeMap<PinId, f32>,
}

impl NodeSizeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, width: f32, height: f32) {
        self.sizes.insert(node, NodeSize { width, height });
    }

    pub fn insert_pin_offset(&mut self, pin: PinId, offset_y: f32) {
        self.pin_offsets.insert(pin, offset_y);
    }

    pub fn get(&self, node: NodeId) -> Option<NodeSize> {
        self.sizes.get(&node).copied()
    }

    pub fn pin_offset(&self, pin: PinId) -> Option<f32> {
        self.pin_offsets.get(&pin).copied()
    }

    /// A node whose size has not been measured yet.
    pub fn is_pending(&self, node: NodeId) -> bool {
        !self.sizes.contains_key(&node)
    }

    pub fn invalidate(&mut self, node: NodeId) {
        self.sizes.remove(&node);
        self.pin_offsets.retain(|pin, _| pin.node != node);
    }

    pub fn invalidate_all(&mut self) {
        self.sizes.clear();
        self.pin_offsets.clear();
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

/// Size used until the host reports a measurement.
pub fn provisional_size(graph: &Graph, node: NodeId) -> NodeSize {
    let Some(data) = graph.node(node) else {
        return NodeSize {
            width: 0.0,
            height: 0.0,
        };
    };
    match data.kind {
        NodeKind::Knot => NodeSize {
            width: KNOT_WIDTH,
            height: KNOT_HEIGHT,
        },
        NodeKind::Comment => {
            let (width, height) = data
                .comment
                .as_ref()
                .map(|comment| (comment.width, comment.height))
                .unwrap_or((0.0, 0.0));
            NodeSize { width, height }
        }
        NodeKind::Normal | NodeKind::Event => {
            let inputs = data
                .pins
                .iter()
                .filter(|pin| pin.direction == PinDirection::Input)
                .count();
            let rows = inputs.max(data.pins.len() - inputs);
            NodeSize {
                width: NODE_WIDTH,
                height: TITLE_HEIGHT + rows as f32 * PIN_ROW_HEIGHT + BOTTOM_PADDING,
            }
        }
    }
}

/// Read access to positions and sizes shared by every layout pass.
pub struct LayoutCx<'a> {
    pub graph: &'a mut Graph,
    pub sizes: &'a NodeSizeCache,
    pub settings: &'a Settings,
}

impl<'a> LayoutCx<'a> {
    pub fn new(graph: &'a mut Graph, sizes: &'a NodeSizeCache, settings: &'a Settings) -> Self {
        Self {
            graph,
            sizes,
            settings,
        }
    }

    pub fn node_size(&self, node: NodeId) -> NodeSize {
        if self.graph.is_comment(node) {
            return provisional_size(self.graph, node);
        }
        self.sizes
            .get(node)
            .unwrap_or_else(|| provisional_size(self.graph, node))
    }

    pub fn node_bounds(&self, node: NodeId) -> Rect {
        let (x, y) = self.graph.position(node);
        let size = self.node_size(node);
        Rect::from_point_size(x, y, size.width, size.height)
    }

    /// Union of the nodes' bounds, an empty rectangle at the origin when
    /// there are none.
    pub fn bounds_for_nodes<I>(&self, nodes: I) -> Rect
    where
        I: IntoIterator<Item = NodeId>,
    {
        Rect::union_all(
            nodes
                .into_iter()
                .filter(|node| self.graph.is_live(*node))
                .map(|node| self.node_bounds(node)),
        )
        .unwrap_or_default()
    }

    /// Vertical offset of a pin from the top of its node.
    pub fn pin_offset(&self, pin: PinId) -> f32 {
        if let Some(offset) = self.sizes.pin_offset(pin) {
            return offset;
        }
        let Some(node) = self.graph.node(pin.node) else {
            return 0.0;
        };
        if node.kind == NodeKind::Knot {
            return KNOT_HEIGHT * 0.5;
        }
        let Some(data) = node.pins.get(pin.index as usize) else {
            return 0.0;
        };
        if let Some(offset) = data.offset_y {
            return offset;
        }
        let row = node.pins[..pin.index as usize]
            .iter()
            .filter(|other| other.direction == data.direction)
            .count();
        TITLE_HEIGHT + row as f32 * PIN_ROW_HEIGHT + PIN_ROW_HEIGHT * 0.5
    }

    pub fn pin_y(&self, pin: PinId) -> f32 {
        self.graph.y(pin.node) + self.pin_offset(pin)
    }

    /// Inputs sit on the left edge, outputs on the right edge.
    pub fn pin_pos(&self, pin: PinId) -> (f32, f32) {
        let bounds = self.node_bounds(pin.node);
        let x = match self.graph.pin_direction(pin) {
            Some(PinDirection::Output) => bounds.right,
            _ => bounds.left,
        };
        (x, self.pin_y(pin))
    }

    /// Midpoint between the highest and lowest pin.
    pub fn pins_center_y(&self, pins: &[PinId]) -> f32 {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for pin in pins {
            let y = self.pin_y(*pin);
            min = min.min(y);
            max = max.max(y);
        }
        if pins.is_empty() { 0.0 } else { (min + max) * 0.5 }
    }

    /// Moves `other`'s node vertically so both pins share a height.
    pub fn straighten_pin(&mut self, pin: PinId, other: PinId) {
        let delta = self.pin_y(pin) - self.pin_y(other);
        self.graph.translate(other.node, 0.0, delta);
    }

    /// Centers a knot on `pos`.
    pub fn place_knot(&mut self, knot: NodeId, pos: (f32, f32)) {
        let size = self.node_size(knot);
        self.graph
            .set_position(knot, pos.0 - size.width * 0.5, pos.1 - size.height * 0.5);
    }
}
