use std::collections::BTreeSet;

use tracing::warn;

use super::bounds::LayoutCx;
use super::formatter::EdGraphFormatter;
use super::tree::InfoIndex;
use crate::config::FormattingStyle;
use crate::ir::{NodeId, PinDirection, PinLink};

/// Upper bound on stack pops for one horizontal pass.
const MAX_STEPS: usize = 100_000;

/// A node reached over `link`, waiting to be placed under `parent`.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    link: PinLink,
    parent: Option<InfoIndex>,
}

impl EdGraphFormatter {
    /// Horizontal position for the node at the end of `link`, clear of the
    /// parent (or its cluster and comment boxes) by the node padding.
    pub(super) fn child_x(&self, cx: &LayoutCx, link: &PinLink, use_cluster: bool) -> f32 {
        let mut ignored = BTreeSet::new();
        let Some(from) = link.from else {
            return self
                .relative_node_bounds(cx, link.node, None, &mut ignored, use_cluster)
                .left;
        };
        let parent = from.node;
        let child = link.node;
        let direction = cx.graph.pin_direction(from).unwrap_or(PinDirection::Output);

        let mut parent_bounds = if use_cluster {
            self.cluster_bounds(cx, parent)
        } else {
            cx.node_bounds(parent)
        };

        let mut relative_nodes = BTreeSet::new();
        let relative = self.relative_node_bounds(cx, parent, Some(child), &mut relative_nodes, use_cluster);
        if self.same_row.contains(link) {
            parent_bounds = relative;
        } else if !relative_nodes.is_empty() {
            let nodes_bounds = cx.bounds_for_nodes(relative_nodes);
            let is_same = match direction {
                PinDirection::Output => nodes_bounds.right == parent_bounds.right,
                PinDirection::Input => nodes_bounds.left == parent_bounds.left,
            };
            if is_same {
                parent_bounds = relative;
            }
        }

        let child_bounds = cx.node_bounds(child);
        let larger = self.relative_node_bounds(cx, child, Some(parent), &mut ignored, use_cluster);
        let x = match direction {
            PinDirection::Input => parent_bounds.left - (larger.right - child_bounds.left) - self.padding.x,
            PinDirection::Output => parent_bounds.right + (child_bounds.left - larger.left) + self.padding.x,
        };
        x.round()
    }

    /// Depth-first horizontal placement over execution wires. Builds the
    /// spanning tree; a node already placed takes a new parent when that
    /// parent pushes it further along the wire's direction.
    pub(super) fn format_x(&mut self, cx: &mut LayoutCx, use_parameter: bool) {
        let Some(root) = self.root else {
            return;
        };
        self.x_tree.clear();
        self.nodes_to_expand.clear();
        self.locked_x.clear();

        let root_link = PinLink::root(root);
        self.x_tree.insert(root_link, None);

        let mut output_stack = vec![Candidate {
            link: root_link,
            parent: None,
        }];
        let mut input_stack: Vec<Candidate> = Vec::new();
        let mut pending: BTreeSet<NodeId> = BTreeSet::from([root]);
        let mut visited_links: BTreeSet<PinLink> = BTreeSet::new();
        let mut last_direction = PinDirection::Output;
        let expanded = cx.settings.formatting_style == FormattingStyle::Expanded;
        let mut steps = 0usize;

        loop {
            let candidate = match last_direction {
                PinDirection::Output => output_stack.pop().or_else(|| input_stack.pop()),
                PinDirection::Input => input_stack.pop().or_else(|| output_stack.pop()),
            };
            let Some(candidate) = candidate else {
                break;
            };
            steps += 1;
            if steps > MAX_STEPS {
                warn!(root = cx.graph.name(root), "horizontal placement did not settle");
                break;
            }

            last_direction = cx.graph.link_direction(&candidate.link);
            let node = candidate.link.node;
            let new_x = self.child_x(cx, &candidate.link, use_parameter);

            let current = match self.x_tree.get(node) {
                None => {
                    let index = self.x_tree.insert(candidate.link, candidate.parent);
                    if !self.locked_x.contains(&node) {
                        cx.graph.set_x(node, new_x);
                    }
                    if use_parameter {
                        self.apply_sub_graph(cx, node);
                        self.refresh_parameters(cx, node);
                    }
                    self.path.insert(candidate.link);
                    index
                }
                Some(existing) => {
                    self.try_reparent(
                        cx,
                        existing,
                        candidate,
                        new_x,
                        use_parameter,
                        &mut output_stack,
                        &mut input_stack,
                    );
                    existing
                }
            };

            let mut linked_pins = self.exec_links(cx, node, None);
            linked_pins.reverse();

            for (pin, linked) in linked_pins {
                let link = PinLink::new(pin, linked);
                if !visited_links.insert(link) {
                    continue;
                }
                if !self.in_pool(linked.node) || cx.graph.is_pure(linked.node) {
                    continue;
                }
                let next = Candidate {
                    link,
                    parent: Some(current),
                };
                match cx.graph.pin_direction(pin) {
                    Some(PinDirection::Output) => output_stack.push(next),
                    _ => {
                        if expanded {
                            self.mark_for_expansion(cx, current, linked.node, &pending);
                        }
                        input_stack.push(next);
                    }
                }
                pending.insert(linked.node);
            }
        }

        if expanded {
            self.expand_pending_nodes(cx, use_parameter);
        }
    }

    fn try_reparent(
        &mut self,
        cx: &mut LayoutCx,
        existing: InfoIndex,
        candidate: Candidate,
        new_x: f32,
        use_parameter: bool,
        output_stack: &mut Vec<Candidate>,
        input_stack: &mut Vec<Candidate>,
    ) {
        let node = candidate.link.node;
        let has_no_parent = candidate.link.from.is_none();
        if !has_no_parent {
            let Some(parent) = candidate.parent else {
                return;
            };
            let parent_node = self.x_tree.node(parent);
            if parent_node == node
                || self
                    .x_tree
                    .children(existing, cx.graph, None, false)
                    .contains(&parent_node)
            {
                return;
            }
        }

        let old_link = self.x_tree.info(existing).link;
        if self.x_tree.info(existing).parent.is_none() {
            return;
        }

        let take = has_no_parent || {
            let old_x = cx.graph.x(node);
            let better = match cx.graph.link_direction(&candidate.link) {
                PinDirection::Output => new_x > old_x,
                PinDirection::Input => new_x < old_x,
            };
            let old_to = old_link.to.and_then(|pin| cx.graph.pin_direction(pin));
            let new_to = candidate.link.to.and_then(|pin| cx.graph.pin_direction(pin));
            better && old_to == new_to
        };
        if !take {
            return;
        }

        self.x_tree.set_link(existing, candidate.link);
        self.x_tree.set_parent(existing, candidate.parent);
        if !self.locked_x.contains(&node) {
            cx.graph.set_x(node, new_x);
        }
        if use_parameter {
            self.refresh_parameters(cx, node);
        }
        for child in self.x_tree.info(existing).children.clone() {
            let info = self.x_tree.info(child);
            let again = Candidate {
                link: info.link,
                parent: info.parent,
            };
            match cx.graph.link_direction(&info.link) {
                PinDirection::Output => output_stack.push(again),
                PinDirection::Input => input_stack.push(again),
            }
        }
        self.path.insert(candidate.link);
    }

    /// A node reached over an output wire that also reads execution from a
    /// node other than its parent gets pushed clear of that input later.
    fn mark_for_expansion(&mut self, cx: &LayoutCx, current: InfoIndex, linked: NodeId, pending: &BTreeSet<NodeId>) {
        let current_node = self.x_tree.node(current);
        let has_cycle =
            pending.contains(&linked) || cx.graph.exec_tree(linked, PinDirection::Input).contains(&current_node);
        if has_cycle {
            return;
        }
        let info = self.x_tree.info(current);
        if cx.graph.link_direction(&info.link) != PinDirection::Output {
            return;
        }
        if info.parent.is_some_and(|parent| self.x_tree.node(parent) == linked) {
            return;
        }
        if !self.nodes_to_expand.contains(&current) {
            self.nodes_to_expand.push(current);
        }
    }

    /// Moves each marked node, with its subtree, right of the nodes feeding
    /// into it from the input side.
    fn expand_pending_nodes(&mut self, cx: &mut LayoutCx, use_parameter: bool) {
        for index in self.nodes_to_expand.clone() {
            let Some(parent) = self.x_tree.parent_node(index) else {
                continue;
            };
            let node = self.x_tree.node(index);
            let input_children = self.x_tree.children(index, cx.graph, Some(PinDirection::Input), false);
            if input_children.is_empty() {
                continue;
            }

            let (input_bounds, parent_bounds) = if self.account_for_comments {
                let mut ignored = BTreeSet::new();
                (
                    self.relative_bounds_for_nodes(cx, &input_children, Some(parent), &mut ignored, use_parameter),
                    self.relative_node_bounds(cx, parent, Some(node), &mut ignored, use_parameter),
                )
            } else if use_parameter {
                (
                    self.cluster_bounds_for_nodes(cx, &input_children),
                    self.cluster_bounds(cx, parent),
                )
            } else {
                (
                    cx.bounds_for_nodes(input_children.iter().copied()),
                    cx.node_bounds(parent),
                )
            };

            if parent_bounds.right > input_bounds.left {
                let delta = parent_bounds.right - input_bounds.left + self.padding.x;
                cx.graph.translate(node, delta, 0.0);
                if use_parameter {
                    self.refresh_parameters(cx, node);
                }
                for child in self.x_tree.children(index, cx.graph, None, false) {
                    cx.graph.translate(child, delta, 0.0);
                    if use_parameter {
                        self.refresh_parameters(cx, child);
                    }
                }
            }
        }
    }
}
