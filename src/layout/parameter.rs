use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use super::bounds::LayoutCx;
use super::types::Rect;
use crate::config::ParameterStyle;
use crate::ir::{NodeId, PinDirection, PinId};

/// How a parameter node feeds its consumer inside the cluster.
#[derive(Debug, Clone, Copy)]
struct ParameterLink {
    consumer: NodeId,
    /// output pin on the parameter node
    output: PinId,
    /// input pin on the consumer
    input: PinId,
}

/// Lays out the pure nodes feeding one node as a cluster on its input side.
#[derive(Debug, Clone)]
pub struct ParameterFormatter {
    root: NodeId,
    ignored: BTreeSet<NodeId>,
    formatted_input_nodes: BTreeSet<NodeId>,
    /// root first, then parameter nodes in discovery order
    formatted_nodes: Vec<NodeId>,
    links: BTreeMap<NodeId, ParameterLink>,
    children: BTreeMap<NodeId, Vec<NodeId>>,
    relative_offsets: BTreeMap<NodeId, (f32, f32)>,
    initialized: bool,
    using_helixing: bool,
}

impl ParameterFormatter {
    pub fn new(root: NodeId) -> Self {
        Self {
            root,
            ignored: BTreeSet::new(),
            formatted_input_nodes: BTreeSet::new(),
            formatted_nodes: vec![root],
            links: BTreeMap::new(),
            children: BTreeMap::new(),
            relative_offsets: BTreeMap::new(),
            initialized: false,
            using_helixing: false,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn formatted_nodes(&self) -> &[NodeId] {
        &self.formatted_nodes
    }

    pub fn formatted_input_nodes(&self) -> &BTreeSet<NodeId> {
        &self.formatted_input_nodes
    }

    pub fn is_using_helixing(&self) -> bool {
        self.using_helixing
    }

    pub fn set_ignored_nodes(&mut self, ignored: BTreeSet<NodeId>) {
        self.ignored = ignored;
    }

    /// Gives up a node claimed by another cluster.
    pub fn remove_node(&mut self, node: NodeId) {
        if node == self.root {
            return;
        }
        self.formatted_input_nodes.remove(&node);
        self.formatted_nodes.retain(|other| *other != node);
        self.relative_offsets.remove(&node);
        self.links.remove(&node);
        for children in self.children.values_mut() {
            children.retain(|child| *child != node);
        }
        self.ignored.insert(node);
    }

    /// Positions the cluster. Once initialised this only replays the saved
    /// offsets so the cluster follows its root.
    pub fn format_node(&mut self, cx: &mut LayoutCx) {
        if !cx.graph.is_live(self.root) {
            return;
        }
        if self.initialized {
            self.apply_relative_offsets(cx);
            return;
        }

        self.collect(cx);
        self.using_helixing =
            cx.settings.parameter_style == ParameterStyle::Helixing && self.can_helix(cx);
        if self.using_helixing {
            self.format_helixing(cx);
        } else {
            self.format_left_side(cx, self.root);
        }
        debug!(
            root = cx.graph.name(self.root),
            nodes = self.formatted_input_nodes.len(),
            helixing = self.using_helixing,
            "formatted parameters"
        );
    }

    fn collect(&mut self, cx: &LayoutCx) {
        let graph = &*cx.graph;
        self.formatted_input_nodes.clear();
        self.formatted_nodes = vec![self.root];
        self.links.clear();
        self.children.clear();

        let mut queue = VecDeque::from([self.root]);
        while let Some(current) = queue.pop_front() {
            for pin in graph.linked_pins(current, Some(PinDirection::Input)) {
                if graph.is_exec_pin(pin) {
                    continue;
                }
                for other in graph.linked_to(pin) {
                    let node = other.node;
                    if node == self.root
                        || !graph.is_pure(node)
                        || self.ignored.contains(&node)
                        || self.formatted_input_nodes.contains(&node)
                    {
                        continue;
                    }
                    self.formatted_input_nodes.insert(node);
                    self.formatted_nodes.push(node);
                    self.links.insert(
                        node,
                        ParameterLink {
                            consumer: current,
                            output: *other,
                            input: pin,
                        },
                    );
                    self.children.entry(current).or_default().push(node);
                    queue.push_back(node);
                }
            }
        }
    }

    fn can_helix(&self, cx: &LayoutCx) -> bool {
        if self.formatted_input_nodes.is_empty() {
            return false;
        }
        let mut total = 0.0;
        for node in &self.formatted_input_nodes {
            let height = cx.node_size(*node).height;
            if height > cx.settings.single_node_max_height {
                return false;
            }
            total += height;
        }
        total += cx.settings.parameter_padding.y * (self.formatted_input_nodes.len() - 1) as f32;
        total <= cx.settings.helixing_height_max
    }

    /// Target top for a parameter node so its output lines up with the pin it feeds.
    fn aligned_top(cx: &LayoutCx, link: &ParameterLink) -> f32 {
        cx.pin_y(link.input) - cx.pin_offset(link.output)
    }

    /// One right-aligned column on the root's input side.
    fn format_helixing(&mut self, cx: &mut LayoutCx) {
        let padding = cx.settings.parameter_padding;
        let column_right = cx.node_bounds(self.root).left - padding.x;
        let mut cursor: Option<f32> = None;
        for node in self.formatted_nodes.iter().skip(1) {
            let Some(link) = self.links.get(node) else {
                continue;
            };
            let size = cx.node_size(*node);
            let target = Self::aligned_top(cx, link);
            let y = cursor.map_or(target, |c| target.max(c));
            cx.graph.set_position(*node, column_right - size.width, y);
            cursor = Some(y + size.height + padding.y);
        }
    }

    /// Each parameter to the left of its consumer, sibling subtrees stacked.
    fn format_left_side(&mut self, cx: &mut LayoutCx, node: NodeId) -> Rect {
        let node_bounds = cx.node_bounds(node);
        let mut subtree = node_bounds;
        let Some(children) = self.children.get(&node).cloned() else {
            return subtree;
        };

        let mut cursor: Option<f32> = None;
        for child in &children {
            let Some(link) = self.links.get(child).copied() else {
                continue;
            };
            let width = cx.node_size(*child).width;
            let target = Self::aligned_top(cx, &link);
            let y = cursor.map_or(target, |c| target.max(c));
            cx.graph.set_position(
                *child,
                node_bounds.left - cx.settings.parameter_padding.x - width,
                y,
            );
            let child_bounds = self.format_left_side(cx, *child);
            cursor = Some(child_bounds.bottom + cx.settings.parameter_vertical_pin_spacing);
            subtree = subtree.expand(&child_bounds);
        }

        if cx.settings.center_parameter_branches
            && children.len() >= cx.settings.num_required_parameter_branches
        {
            let inputs: Vec<PinId> = children
                .iter()
                .filter_map(|child| self.links.get(child).map(|link| link.input))
                .collect();
            let outputs: Vec<PinId> = children
                .iter()
                .filter_map(|child| self.links.get(child).map(|link| link.output))
                .collect();
            let offset = cx.pins_center_y(&inputs) - cx.pins_center_y(&outputs);
            if offset != 0.0 {
                for child in &children {
                    for moved in self.subtree(*child) {
                        cx.graph.translate(moved, 0.0, offset);
                    }
                }
                subtree = cx.bounds_for_nodes(
                    children
                        .iter()
                        .flat_map(|child| self.subtree(*child))
                        .chain([node]),
                );
            }
        }
        subtree
    }

    /// A parameter node and every parameter node feeding it.
    fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = vec![node];
        let mut index = 0;
        while index < out.len() {
            if let Some(children) = self.children.get(&out[index]) {
                out.extend(children.iter().copied());
            }
            index += 1;
        }
        out
    }

    /// Pushes parameter nodes further left when their wire would be steeper
    /// than the height it spans allows.
    pub fn expand_by_height(&mut self, cx: &mut LayoutCx) {
        for node in self.formatted_nodes.clone().into_iter().skip(1) {
            let Some(link) = self.links.get(&node).copied() else {
                continue;
            };
            let from = cx.pin_pos(link.output);
            let to = cx.pin_pos(link.input);
            let expand = (to.1 - from.1).abs() * 0.75 - (to.0 - from.0).abs();
            if expand > 0.0 {
                for moved in self.subtree(node) {
                    cx.graph.translate(moved, -expand.round(), 0.0);
                }
            }
        }
    }

    pub fn save_relative_positions(&mut self, cx: &LayoutCx) {
        let (root_x, root_y) = cx.graph.position(self.root);
        self.relative_offsets = self
            .formatted_nodes
            .iter()
            .filter(|node| cx.graph.is_live(**node))
            .map(|node| {
                let (x, y) = cx.graph.position(*node);
                (*node, (x - root_x, y - root_y))
            })
            .collect();
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    fn apply_relative_offsets(&self, cx: &mut LayoutCx) {
        let (root_x, root_y) = cx.graph.position(self.root);
        for (node, (dx, dy)) in &self.relative_offsets {
            if *node == self.root || self.ignored.contains(node) {
                continue;
            }
            cx.graph.set_position(*node, root_x + dx, root_y + dy);
        }
    }

    /// Consumer node of a parameter node inside this cluster.
    pub fn consumer_of(&self, node: NodeId) -> Option<NodeId> {
        self.links.get(&node).map(|link| link.consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::ir::{Graph, Node, NodeKind, Pin};
    use crate::layout::bounds::NodeSizeCache;

    /// `Print(Add(Get, Get))`
    fn cluster() -> (Graph, NodeId, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let print = graph.add_node(
            Node::new("Print", NodeKind::Normal)
                .at(500.0, 100.0)
                .with_pin(Pin::exec_in("exec"))
                .with_pin(Pin::param_in("value"))
                .with_pin(Pin::exec_out("then")),
        );
        let add = graph.add_node(
            Node::new("Add", NodeKind::Normal)
                .with_pin(Pin::param_in("a"))
                .with_pin(Pin::param_in("b"))
                .with_pin(Pin::param_out("result")),
        );
        let get_a = graph.add_node(Node::new("GetA", NodeKind::Normal).with_pin(Pin::param_out("value")));
        let get_b = graph.add_node(Node::new("GetB", NodeKind::Normal).with_pin(Pin::param_out("value")));
        let link = |graph: &mut Graph, a: NodeId, pa: &str, b: NodeId, pb: &str| {
            let pa = graph.find_pin(a, pa).unwrap();
            let pb = graph.find_pin(b, pb).unwrap();
            assert!(graph.try_create_link(pa, pb));
        };
        link(&mut graph, add, "result", print, "value");
        link(&mut graph, get_a, "value", add, "a");
        link(&mut graph, get_b, "value", add, "b");
        (graph, print, add, get_a, get_b)
    }

    #[test]
    fn helixing_stacks_a_single_column() {
        let (mut graph, print, add, get_a, get_b) = cluster();
        let sizes = NodeSizeCache::new();
        let settings = Settings::default();
        let mut cx = LayoutCx::new(&mut graph, &sizes, &settings);
        let mut formatter = ParameterFormatter::new(print);
        formatter.format_node(&mut cx);

        assert!(formatter.is_using_helixing());
        assert_eq!(formatter.formatted_nodes(), &[print, add, get_a, get_b]);
        let right = cx.node_bounds(print).left - 40.0;
        for node in [add, get_a, get_b] {
            assert_eq!(cx.node_bounds(node).right, right);
        }
        let value = cx.graph.find_pin(print, "value").unwrap();
        let result = cx.graph.find_pin(add, "result").unwrap();
        assert_eq!(cx.pin_y(value), cx.pin_y(result));
        assert!(cx.node_bounds(get_a).top > cx.node_bounds(add).bottom);
        assert!(cx.node_bounds(get_b).top > cx.node_bounds(get_a).bottom);
    }

    #[test]
    fn left_side_places_inputs_left_of_their_consumer() {
        let (mut graph, print, add, get_a, get_b) = cluster();
        let sizes = NodeSizeCache::new();
        let settings = Settings {
            parameter_style: ParameterStyle::LeftSide,
            ..Settings::default()
        };
        let mut cx = LayoutCx::new(&mut graph, &sizes, &settings);
        let mut formatter = ParameterFormatter::new(print);
        formatter.format_node(&mut cx);

        assert!(!formatter.is_using_helixing());
        assert_eq!(cx.node_bounds(add).right, cx.node_bounds(print).left - 40.0);
        assert_eq!(cx.node_bounds(get_a).right, cx.node_bounds(add).left - 40.0);
        assert!(cx.node_bounds(get_b).top >= cx.node_bounds(get_a).bottom);
    }

    #[test]
    fn initialized_cluster_follows_root() {
        let (mut graph, print, add, _, _) = cluster();
        let sizes = NodeSizeCache::new();
        let settings = Settings::default();
        let mut cx = LayoutCx::new(&mut graph, &sizes, &settings);
        let mut formatter = ParameterFormatter::new(print);
        formatter.format_node(&mut cx);
        formatter.save_relative_positions(&cx);
        formatter.mark_initialized();
        let before = cx.graph.position(add);

        cx.graph.translate(print, 100.0, -50.0);
        formatter.format_node(&mut cx);
        assert_eq!(cx.graph.position(add), (before.0 + 100.0, before.1 - 50.0));
    }

    #[test]
    fn stolen_nodes_are_ignored() {
        let (mut graph, print, add, get_a, get_b) = cluster();
        let sizes = NodeSizeCache::new();
        let settings = Settings::default();
        let mut cx = LayoutCx::new(&mut graph, &sizes, &settings);
        let mut formatter = ParameterFormatter::new(print);
        formatter.set_ignored_nodes(BTreeSet::from([add]));
        formatter.format_node(&mut cx);
        assert_eq!(formatter.formatted_nodes(), &[print]);

        let mut formatter = ParameterFormatter::new(print);
        formatter.format_node(&mut cx);
        formatter.remove_node(get_a);
        assert_eq!(formatter.formatted_nodes(), &[print, add, get_b]);
        assert_eq!(formatter.consumer_of(get_b), Some(add));
    }
}
