use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{Graph, NodeId, PinId};

/// Position of a node relative to the anchor plus the wires it carried at
/// the end of the last pass.
#[derive(Debug, Clone, PartialEq)]
struct NodeChangeInfo {
    offset: (f32, f32),
    links: BTreeSet<(PinId, PinId)>,
}

fn node_links(graph: &Graph, node: NodeId) -> BTreeSet<(PinId, PinId)> {
    let mut out = BTreeSet::new();
    for pin in graph.linked_pins(node, None) {
        for other in graph.linked_to(pin) {
            out.insert((pin, *other));
        }
    }
    out
}

/// Snapshot of a finished layout used to skip re-formatting when nothing
/// relevant changed.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    infos: BTreeMap<NodeId, NodeChangeInfo>,
    node_tree: BTreeSet<NodeId>,
    comment_members: BTreeMap<NodeId, BTreeSet<NodeId>>,
    anchor: Option<NodeId>,
    valid: bool,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every formatted node relative to `anchor`, the node tree and
    /// the membership of comments touching it.
    pub fn save(&mut self, graph: &Graph, anchor: Option<NodeId>, formatted: &[NodeId], node_tree: &[NodeId]) {
        self.infos.clear();
        self.comment_members.clear();
        self.anchor = anchor.filter(|anchor| graph.is_live(*anchor));
        self.node_tree = node_tree.iter().copied().collect();

        let Some(anchor) = self.anchor else {
            self.valid = false;
            return;
        };
        let (ax, ay) = graph.position(anchor);
        for node in formatted {
            if !graph.is_live(*node) {
                continue;
            }
            let (x, y) = graph.position(*node);
            self.infos.insert(
                *node,
                NodeChangeInfo {
                    offset: (x - ax, y - ay),
                    links: node_links(graph, *node),
                },
            );
        }

        for comment in graph.comments() {
            let members: BTreeSet<NodeId> = graph.comment_members(comment).into_iter().collect();
            if members.iter().any(|member| self.node_tree.contains(member)) {
                self.comment_members.insert(comment, members);
            }
        }
        self.valid = true;
    }

    /// True when the graph around `node_tree` no longer matches the snapshot:
    /// a tracked node moved relative to the anchor or changed its wires, the
    /// tree gained or lost nodes, or comment membership changed.
    pub fn is_formatting_required(&self, graph: &Graph, node_tree: &[NodeId]) -> bool {
        if !self.valid {
            return true;
        }
        let Some(anchor) = self.anchor.filter(|anchor| graph.is_live(*anchor)) else {
            return true;
        };
        let tree: BTreeSet<NodeId> = node_tree.iter().copied().collect();
        if tree != self.node_tree || !tree.contains(&anchor) {
            return true;
        }

        let (ax, ay) = graph.position(anchor);
        for (node, info) in &self.infos {
            if !graph.is_live(*node) {
                return true;
            }
            let (x, y) = graph.position(*node);
            if (x - ax, y - ay) != info.offset {
                return true;
            }
            if node_links(graph, *node) != info.links {
                return true;
            }
        }
        for comment in graph.comments() {
            let members: BTreeSet<NodeId> = graph.comment_members(comment).into_iter().collect();
            match self.comment_members.get(&comment) {
                Some(saved) if *saved != members => return true,
                None if members.iter().any(|member| tree.contains(member)) => return true,
                _ => {}
            }
        }
        self.comment_members
            .keys()
            .any(|comment| !graph.is_live(*comment))
    }

    /// Saved offsets from the anchor.
    pub fn offsets(&self) -> impl Iterator<Item = (NodeId, (f32, f32))> + '_ {
        self.infos.iter().map(|(node, info)| (*node, info.offset))
    }

    pub fn invalidate(&mut self, node: NodeId) {
        if self.infos.contains_key(&node) || self.node_tree.contains(&node) || self.anchor == Some(node) {
            self.valid = false;
        }
    }

    pub fn invalidate_all(&mut self) {
        self.infos.clear();
        self.node_tree.clear();
        self.comment_members.clear();
        self.anchor = None;
        self.valid = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Node, NodeKind, Pin};

    fn pair() -> (Graph, NodeId, NodeId) {
        let mut graph = Graph::new();
        let a = graph.add_node(
            Node::new("A", NodeKind::Normal)
                .at(0.0, 0.0)
                .with_pin(Pin::exec_out("then")),
        );
        let b = graph.add_node(
            Node::new("B", NodeKind::Normal)
                .at(300.0, 0.0)
                .with_pin(Pin::exec_in("exec")),
        );
        let out = graph.find_pin(a, "then").unwrap();
        let input = graph.find_pin(b, "exec").unwrap();
        assert!(graph.try_create_link(out, input));
        (graph, a, b)
    }

    #[test]
    fn unchanged_graph_needs_no_format() {
        let (mut graph, a, b) = pair();
        let mut tracker = ChangeTracker::new();
        assert!(tracker.is_formatting_required(&graph, &[a, b]));
        tracker.save(&graph, Some(a), &[a, b], &[a, b]);
        assert!(!tracker.is_formatting_required(&graph, &[a, b]));

        // moving everything together keeps the relative layout
        graph.translate(a, 50.0, 50.0);
        graph.translate(b, 50.0, 50.0);
        assert!(!tracker.is_formatting_required(&graph, &[a, b]));
    }

    #[test]
    fn moved_node_or_new_link_requires_format() {
        let (mut graph, a, b) = pair();
        let mut tracker = ChangeTracker::new();
        tracker.save(&graph, Some(a), &[a, b], &[a, b]);
        graph.translate(b, 10.0, 0.0);
        assert!(tracker.is_formatting_required(&graph, &[a, b]));

        graph.translate(b, -10.0, 0.0);
        let out = graph.find_pin(a, "then").unwrap();
        graph.break_pin_links(out);
        assert!(tracker.is_formatting_required(&graph, &[a, b]));
    }

    #[test]
    fn invalidate_forces_format() {
        let (graph, a, b) = pair();
        let mut tracker = ChangeTracker::new();
        tracker.save(&graph, Some(a), &[a, b], &[a, b]);
        tracker.invalidate(b);
        assert!(tracker.is_formatting_required(&graph, &[a, b]));
    }
}
