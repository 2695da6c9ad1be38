use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Generation-checked handle into the node arena. A handle outlives the node
/// it names; `Graph::is_live` tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinId {
    pub node: NodeId,
    pub index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDirection {
    Input,
    Output,
}

impl PinDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinKind {
    Exec,
    Delegate,
    Parameter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Normal,
    Event,
    Knot,
    Comment,
}

#[derive(Debug, Clone)]
pub struct Pin {
    pub name: String,
    pub direction: PinDirection,
    pub kind: PinKind,
    pub data_type: Option<String>,
    /// Measured vertical offset from the node top, when the host knows it.
    pub offset_y: Option<f32>,
    pub linked_to: Vec<PinId>,
}

impl Pin {
    pub fn new(name: impl Into<String>, direction: PinDirection, kind: PinKind) -> Self {
        Self {
            name: name.into(),
            direction,
            kind,
            data_type: None,
            offset_y: None,
            linked_to: Vec::new(),
        }
    }

    pub fn exec_in(name: impl Into<String>) -> Self {
        Self::new(name, PinDirection::Input, PinKind::Exec)
    }

    pub fn exec_out(name: impl Into<String>) -> Self {
        Self::new(name, PinDirection::Output, PinKind::Exec)
    }

    pub fn param_in(name: impl Into<String>) -> Self {
        Self::new(name, PinDirection::Input, PinKind::Parameter)
    }

    pub fn param_out(name: impl Into<String>) -> Self {
        Self::new(name, PinDirection::Output, PinKind::Parameter)
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn with_offset(mut self, offset_y: f32) -> Self {
        self.offset_y = Some(offset_y);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommentData {
    pub members: Vec<NodeId>,
    pub depth: i32,
    pub title_height: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// Host class name, used to recognise extra root node types.
    pub class: String,
    pub x: f32,
    pub y: f32,
    pub pins: Vec<Pin>,
    pub comment: Option<CommentData>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            class: String::new(),
            x: 0.0,
            y: 0.0,
            pins: Vec::new(),
            comment: None,
        }
    }

    pub fn comment(name: impl Into<String>, width: f32, height: f32) -> Self {
        let mut node = Self::new(name, NodeKind::Comment);
        node.comment = Some(CommentData {
            title_height: 36.0,
            width,
            height,
            ..CommentData::default()
        });
        node
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    pub fn with_pin(mut self, pin: Pin) -> Self {
        self.pins.push(pin);
        self
    }
}

/// One directed wire as seen from the node that discovered it. `from` is the
/// pin on the discovering node, `to` the pin on `node`. The root of a walk
/// has neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinLink {
    pub from: Option<PinId>,
    pub to: Option<PinId>,
    pub node: NodeId,
}

impl PinLink {
    pub fn new(from: PinId, to: PinId) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            node: to.node,
        }
    }

    pub fn root(node: NodeId) -> Self {
        Self {
            from: None,
            to: None,
            node,
        }
    }

    pub fn from_node(&self) -> Option<NodeId> {
        self.from.map(|pin| pin.node)
    }

    pub fn reversed(&self) -> Option<Self> {
        match (self.from, self.to) {
            (Some(from), Some(to)) => Some(Self::new(to, from)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    dirty: u64,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Arena ────────────────────────────────────────────────────────────

    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.dirty += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Removes a node, detaching every link and comment membership first.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        if !self.is_live(id) {
            return Err(GraphError::DeadNode(id));
        }
        for pin in self.pin_ids(id) {
            self.break_pin_links(pin);
        }
        for comment in self.comments() {
            self.remove_node_from_comment(comment, id);
        }
        let slot = &mut self.slots[id.index()];
        let node = slot.node.take().ok_or(GraphError::DeadNode(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.dirty += 1;
        Ok(node)
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|slot| slot.generation == id.generation && slot.node.is_some())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|_| NodeId {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }

    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.node_ids()
            .find(|id| self.node(*id).is_some_and(|node| node.name == name))
    }

    pub fn name(&self, id: NodeId) -> &str {
        self.node(id).map(|node| node.name.as_str()).unwrap_or("<dead>")
    }

    pub fn dirty_count(&self) -> u64 {
        self.dirty
    }

    // ── Positions ────────────────────────────────────────────────────────

    /// Position of a node, or the origin for a stale handle.
    pub fn position(&self, id: NodeId) -> (f32, f32) {
        self.node(id).map(|node| (node.x, node.y)).unwrap_or((0.0, 0.0))
    }

    pub fn x(&self, id: NodeId) -> f32 {
        self.position(id).0
    }

    pub fn y(&self, id: NodeId) -> f32 {
        self.position(id).1
    }

    pub fn set_position(&mut self, id: NodeId, x: f32, y: f32) -> bool {
        let Some(node) = self.node_mut(id) else {
            return false;
        };
        node.x = x;
        node.y = y;
        self.dirty += 1;
        true
    }

    pub fn set_x(&mut self, id: NodeId, x: f32) -> bool {
        let y = self.y(id);
        self.set_position(id, x, y)
    }

    pub fn set_y(&mut self, id: NodeId, y: f32) -> bool {
        let x = self.x(id);
        self.set_position(id, x, y)
    }

    pub fn translate(&mut self, id: NodeId, dx: f32, dy: f32) -> bool {
        let (x, y) = self.position(id);
        self.set_position(id, x + dx, y + dy)
    }

    // ── Classification ───────────────────────────────────────────────────

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).map(|node| node.kind)
    }

    pub fn is_knot(&self, id: NodeId) -> bool {
        self.kind(id) == Some(NodeKind::Knot)
    }

    pub fn is_comment(&self, id: NodeId) -> bool {
        self.kind(id) == Some(NodeKind::Comment)
    }

    pub fn is_event(&self, id: NodeId) -> bool {
        self.kind(id) == Some(NodeKind::Event)
    }

    /// Data-only node: evaluated on demand, never owns an execution wire.
    pub fn is_pure(&self, id: NodeId) -> bool {
        match self.node(id) {
            Some(node) if matches!(node.kind, NodeKind::Normal | NodeKind::Event) => {
                !node.pins.iter().any(|pin| pin.kind == PinKind::Exec)
            }
            _ => false,
        }
    }

    pub fn is_impure(&self, id: NodeId) -> bool {
        match self.node(id) {
            Some(node) if matches!(node.kind, NodeKind::Normal | NodeKind::Event) => {
                node.pins.iter().any(|pin| pin.kind == PinKind::Exec)
            }
            _ => false,
        }
    }

    // ── Pins ─────────────────────────────────────────────────────────────

    pub fn pin(&self, id: PinId) -> Option<&Pin> {
        self.node(id.node)?.pins.get(id.index as usize)
    }

    fn pin_mut(&mut self, id: PinId) -> Option<&mut Pin> {
        self.node_mut(id.node)?.pins.get_mut(id.index as usize)
    }

    pub fn pin_ids(&self, node: NodeId) -> Vec<PinId> {
        let count = self.node(node).map(|n| n.pins.len()).unwrap_or(0);
        (0..count)
            .map(|index| PinId {
                node,
                index: index as u16,
            })
            .collect()
    }

    pub fn find_pin(&self, node: NodeId, name: &str) -> Option<PinId> {
        let index = self.node(node)?.pins.iter().position(|pin| pin.name == name)?;
        Some(PinId {
            node,
            index: index as u16,
        })
    }

    pub fn pins_by_direction(&self, node: NodeId, direction: PinDirection) -> Vec<PinId> {
        self.pin_ids(node)
            .into_iter()
            .filter(|pin| self.pin_direction(*pin) == Some(direction))
            .collect()
    }

    /// Pins of `node` that carry at least one link, optionally by direction.
    pub fn linked_pins(&self, node: NodeId, direction: Option<PinDirection>) -> Vec<PinId> {
        self.pin_ids(node)
            .into_iter()
            .filter(|pin| {
                self.pin(*pin).is_some_and(|p| {
                    !p.linked_to.is_empty() && direction.is_none_or(|d| p.direction == d)
                })
            })
            .collect()
    }

    pub fn linked_to(&self, pin: PinId) -> &[PinId] {
        self.pin(pin).map(|p| p.linked_to.as_slice()).unwrap_or(&[])
    }

    pub fn linked_nodes(&self, node: NodeId, direction: Option<PinDirection>) -> Vec<NodeId> {
        let mut out = Vec::new();
        for pin in self.linked_pins(node, direction) {
            for other in self.linked_to(pin) {
                if !out.contains(&other.node) {
                    out.push(other.node);
                }
            }
        }
        out
    }

    pub fn pin_direction(&self, pin: PinId) -> Option<PinDirection> {
        self.pin(pin).map(|p| p.direction)
    }

    pub fn pin_kind(&self, pin: PinId) -> Option<PinKind> {
        self.pin(pin).map(|p| p.kind)
    }

    pub fn is_exec_pin(&self, pin: PinId) -> bool {
        self.pin_kind(pin) == Some(PinKind::Exec)
    }

    pub fn is_delegate_pin(&self, pin: PinId) -> bool {
        self.pin_kind(pin) == Some(PinKind::Delegate)
    }

    pub fn is_parameter_pin(&self, pin: PinId) -> bool {
        self.pin_kind(pin) == Some(PinKind::Parameter)
    }

    pub fn exec_pins(&self, node: NodeId, direction: PinDirection) -> Vec<PinId> {
        self.pins_by_direction(node, direction)
            .into_iter()
            .filter(|pin| self.is_exec_pin(*pin))
            .collect()
    }

    pub fn parameter_pins(&self, node: NodeId, direction: PinDirection) -> Vec<PinId> {
        self.pins_by_direction(node, direction)
            .into_iter()
            .filter(|pin| self.is_parameter_pin(*pin))
            .collect()
    }

    /// Direction of travel for a link: the `from` pin's direction, output for a root.
    pub fn link_direction(&self, link: &PinLink) -> PinDirection {
        link.from
            .and_then(|pin| self.pin_direction(pin))
            .unwrap_or(PinDirection::Output)
    }

    pub fn pin_name(&self, pin: PinId) -> String {
        match self.pin(pin) {
            Some(p) => format!("{}.{}", self.name(pin.node), p.name),
            None => "<dead>".to_string(),
        }
    }

    // ── Links ────────────────────────────────────────────────────────────

    pub fn are_linked(&self, a: PinId, b: PinId) -> bool {
        self.linked_to(a).contains(&b)
    }

    /// Links two pins. Returns `false` without touching the graph when the
    /// pins are missing, share a direction or node, or carry different kinds.
    /// Execution outputs and parameter inputs hold a single link; an existing
    /// link on such a pin is replaced.
    pub fn try_create_link(&mut self, a: PinId, b: PinId) -> bool {
        let (Some(pa), Some(pb)) = (self.pin(a), self.pin(b)) else {
            return false;
        };
        if a.node == b.node || pa.direction == pb.direction || pa.kind != pb.kind {
            return false;
        }
        if let (Some(ta), Some(tb)) = (&pa.data_type, &pb.data_type)
            && ta != tb
        {
            return false;
        }
        let (output, input) = if pa.direction == PinDirection::Output {
            (a, b)
        } else {
            (b, a)
        };
        if self.are_linked(output, input) {
            return true;
        }
        let kind = pa.kind;
        if kind == PinKind::Exec {
            self.break_pin_links(output);
        }
        if kind == PinKind::Parameter {
            self.break_pin_links(input);
        }
        if let Some(pin) = self.pin_mut(output) {
            pin.linked_to.push(input);
        }
        if let Some(pin) = self.pin_mut(input) {
            pin.linked_to.push(output);
        }
        self.dirty += 1;
        true
    }

    pub fn break_link(&mut self, a: PinId, b: PinId) -> bool {
        if !self.are_linked(a, b) {
            return false;
        }
        if let Some(pin) = self.pin_mut(a) {
            pin.linked_to.retain(|other| *other != b);
        }
        if let Some(pin) = self.pin_mut(b) {
            pin.linked_to.retain(|other| *other != a);
        }
        self.dirty += 1;
        true
    }

    pub fn break_pin_links(&mut self, pin: PinId) {
        let linked: Vec<PinId> = self.linked_to(pin).to_vec();
        for other in linked {
            self.break_link(pin, other);
        }
    }

    // ── Knots ────────────────────────────────────────────────────────────

    /// Creates an unlinked pass-through node carrying wires of `kind`.
    pub fn create_knot(&mut self, x: f32, y: f32, kind: PinKind, data_type: Option<String>) -> NodeId {
        let mut input = Pin::new("in", PinDirection::Input, kind);
        let mut output = Pin::new("out", PinDirection::Output, kind);
        input.data_type = data_type.clone();
        output.data_type = data_type;
        let node = Node::new("Knot", NodeKind::Knot)
            .with_class("K2Node_Knot")
            .at(x, y)
            .with_pin(input)
            .with_pin(output);
        self.add_node(node)
    }

    pub fn knot_input(&self, knot: NodeId) -> Option<PinId> {
        self.pins_by_direction(knot, PinDirection::Input).first().copied()
    }

    pub fn knot_output(&self, knot: NodeId) -> Option<PinId> {
        self.pins_by_direction(knot, PinDirection::Output).first().copied()
    }

    /// Links `pin` to the side of `knot` facing it.
    pub fn link_knot_to(&mut self, knot: NodeId, pin: PinId) -> bool {
        let knot_pin = match self.pin_direction(pin) {
            Some(PinDirection::Input) => self.knot_output(knot),
            Some(PinDirection::Output) => self.knot_input(knot),
            None => None,
        };
        match knot_pin {
            Some(knot_pin) => self.try_create_link(knot_pin, pin),
            None => false,
        }
    }

    /// Removes a knot and joins whatever fed it to whatever it fed.
    pub fn disconnect_knot(&mut self, knot: NodeId) {
        let (Some(input), Some(output)) = (self.knot_input(knot), self.knot_output(knot)) else {
            return;
        };
        let sources: Vec<PinId> = self.linked_to(input).to_vec();
        let targets: Vec<PinId> = self.linked_to(output).to_vec();
        self.break_pin_links(input);
        self.break_pin_links(output);
        for source in &sources {
            for target in &targets {
                self.try_create_link(*source, *target);
            }
        }
    }

    // ── Comments ─────────────────────────────────────────────────────────

    pub fn comments(&self) -> Vec<NodeId> {
        self.node_ids().filter(|id| self.is_comment(*id)).collect()
    }

    pub fn comment_data(&self, comment: NodeId) -> Option<&CommentData> {
        self.node(comment)?.comment.as_ref()
    }

    /// Live members of a comment, in declaration order.
    pub fn comment_members(&self, comment: NodeId) -> Vec<NodeId> {
        self.comment_data(comment)
            .map(|data| {
                data.members
                    .iter()
                    .copied()
                    .filter(|member| self.is_live(*member))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_node_to_comment(&mut self, comment: NodeId, node: NodeId) -> Result<(), GraphError> {
        if !self.is_live(node) {
            return Err(GraphError::DeadNode(node));
        }
        let data = self
            .node_mut(comment)
            .ok_or(GraphError::DeadNode(comment))?
            .comment
            .as_mut()
            .ok_or(GraphError::NotAComment(comment))?;
        if !data.members.contains(&node) {
            data.members.push(node);
        }
        self.dirty += 1;
        Ok(())
    }

    pub fn remove_node_from_comment(&mut self, comment: NodeId, node: NodeId) -> bool {
        let Some(data) = self.node_mut(comment).and_then(|n| n.comment.as_mut()) else {
            return false;
        };
        let before = data.members.len();
        data.members.retain(|member| *member != node);
        let removed = data.members.len() != before;
        if removed {
            self.dirty += 1;
        }
        removed
    }

    pub fn set_comment_bounds(&mut self, comment: NodeId, left: f32, top: f32, right: f32, bottom: f32) {
        let Some(node) = self.node_mut(comment) else {
            return;
        };
        node.x = left;
        node.y = top;
        if let Some(data) = node.comment.as_mut() {
            data.width = right - left;
            data.height = bottom - top;
        }
        self.dirty += 1;
    }

    // ── Walks ────────────────────────────────────────────────────────────

    /// Every node reachable from `start` across links accepted by `filter`,
    /// in discovery order. `start` is always first.
    pub fn node_tree_with_filter<F>(&self, start: NodeId, filter: F) -> Vec<NodeId>
    where
        F: Fn(&Graph, &PinLink) -> bool,
    {
        let mut out = Vec::new();
        if !self.is_live(start) {
            return out;
        }
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        seen.insert(start);
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            out.push(current);
            for pin in self.linked_pins(current, None) {
                for other in self.linked_to(pin) {
                    if seen.contains(&other.node) {
                        continue;
                    }
                    let link = PinLink::new(pin, *other);
                    if !filter(self, &link) {
                        continue;
                    }
                    seen.insert(other.node);
                    queue.push_back(other.node);
                }
            }
        }
        out
    }

    pub fn node_tree(&self, start: NodeId) -> Vec<NodeId> {
        self.node_tree_with_filter(start, |_, _| true)
    }

    /// Nodes reachable from `start` by following execution pins in one direction.
    pub fn exec_tree(&self, start: NodeId, direction: PinDirection) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if !out.insert(current) {
                continue;
            }
            for pin in self.exec_pins(current, direction) {
                for other in self.linked_to(pin) {
                    if !out.contains(&other.node) {
                        stack.push(other.node);
                    }
                }
            }
        }
        out
    }

    /// Whether `to` shares an execution wire path with `from` in either direction.
    pub fn has_execution_to(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let filter = |graph: &Graph, link: &PinLink| {
            link.from.is_some_and(|pin| graph.is_exec_pin(pin))
                || graph.is_pure(link.node)
                || link.from_node().is_some_and(|node| graph.is_pure(node))
        };
        self.node_tree_with_filter(from, filter).contains(&to)
    }
}
