use std::collections::BTreeSet;

use super::bounds::LayoutCx;
use super::formatter::EdGraphFormatter;
use super::types::{ChildBranch, Margin, Rect};
use crate::ir::{NodeId, PinDirection, PinId, PinLink};

/// Collision sweeps per node before giving up.
const MAX_COLLISION_PASSES: usize = 30;

/// Nodes already stacked by the vertical pass, in placement order.
#[derive(Debug, Default)]
struct PlacedNodes {
    order: Vec<NodeId>,
    set: BTreeSet<NodeId>,
    visited_links: BTreeSet<PinLink>,
}

impl PlacedNodes {
    fn insert(&mut self, node: NodeId) {
        if self.set.insert(node) {
            self.order.push(node);
        }
    }

    fn contains(&self, node: NodeId) -> bool {
        self.set.contains(&node)
    }
}

impl EdGraphFormatter {
    /// Stacks the spanning tree vertically. Runs once ignoring comments and
    /// once with them when comments are accounted for.
    pub(super) fn format_y(&mut self, cx: &mut LayoutCx) {
        let Some(root) = self.root else {
            return;
        };
        self.height_levels.clear();
        self.height_levels.insert(root, 0);

        let account_for_comments = self.account_for_comments;
        self.account_for_comments = false;
        let mut placed = PlacedNodes::default();
        let mut children = BTreeSet::new();
        self.format_y_recursive(cx, root, None, None, &mut placed, true, &mut children);

        self.account_for_comments = account_for_comments;
        let mut placed = PlacedNodes::default();
        children.clear();
        self.format_y_recursive(cx, root, None, None, &mut placed, true, &mut children);
    }

    fn collision_bounds(&self, cx: &LayoutCx, node: NodeId, asking: NodeId, to_move: &mut BTreeSet<NodeId>) -> Rect {
        if self.account_for_comments {
            self.relative_node_bounds(cx, node, Some(asking), to_move, true)
        } else {
            self.cluster_bounds(cx, node)
        }
    }

    /// Pushes `node` down until it clears every node placed before it.
    fn resolve_collisions(&mut self, cx: &mut LayoutCx, node: NodeId, parent_pin: Option<PinId>, placed: &PlacedNodes) {
        for _ in 0..MAX_COLLISION_PASSES {
            let mut no_collision = true;
            let mut pending = placed.order.clone();
            while let Some(other) = pending.pop() {
                if other == node || parent_pin.is_some_and(|pin| pin.node == other) {
                    continue;
                }
                let mut to_move = BTreeSet::new();
                let mine = self.collision_bounds(cx, node, other, &mut to_move);
                let theirs = self
                    .collision_bounds(cx, other, node, &mut BTreeSet::new())
                    .extend_by(Margin::bottom(self.padding.y));
                if !mine.intersects(&theirs) {
                    continue;
                }
                no_collision = false;
                let delta = (theirs.bottom - mine.top).trunc() + 1.0;
                if to_move.is_empty() {
                    cx.graph.translate(node, 0.0, delta);
                    self.refresh_parameters(cx, node);
                } else {
                    for moved in &to_move {
                        cx.graph.translate(*moved, 0.0, delta);
                        self.refresh_parameters(cx, *moved);
                    }
                    pending.retain(|candidate| !to_move.contains(candidate));
                }
            }
            if no_collision {
                break;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn format_y_recursive(
        &mut self,
        cx: &mut LayoutCx,
        node: NodeId,
        current_pin: Option<PinId>,
        parent_pin: Option<PinId>,
        placed: &mut PlacedNodes,
        same_row: bool,
        children: &mut BTreeSet<NodeId>,
    ) {
        self.resolve_collisions(cx, node, parent_pin, placed);
        placed.insert(node);

        let parent_direction = parent_pin
            .and_then(|pin| cx.graph.pin_direction(pin))
            .unwrap_or(PinDirection::Output);
        let mut first_pin = true;
        let mut main_pin = current_pin;
        let mut centered_parent = false;

        for direction in [parent_direction, parent_direction.opposite()] {
            let pins: Vec<PinId> = cx
                .graph
                .linked_pins(node, Some(direction))
                .into_iter()
                .filter(|pin| cx.graph.is_exec_pin(*pin) || cx.graph.is_delegate_pin(*pin))
                .collect();

            let mut last_linked = current_pin;
            let mut last_processed: Option<PinId> = None;
            let mut branches: Vec<ChildBranch> = Vec::new();
            let mut delta_y = 0;

            for my_pin in pins {
                for other_pin in cx.graph.linked_to(my_pin).to_vec() {
                    let other = other_pin.node;
                    let link = PinLink::new(my_pin, other_pin);
                    if placed.visited_links.contains(&link)
                        || !self.in_pool(other)
                        || cx.graph.is_pure(other)
                        || placed.contains(other)
                        || !self.path.contains(&link)
                    {
                        continue;
                    }
                    placed.visited_links.insert(link);

                    cx.straighten_pin(my_pin, other_pin);

                    let mut child_same_row = false;
                    let continues_parent = parent_pin
                        .is_none_or(|parent| cx.graph.pin_direction(parent) == cx.graph.pin_direction(my_pin));
                    if first_pin && continues_parent {
                        child_same_row = true;
                        first_pin = false;
                    } else if let Some(last) = last_processed {
                        let y = cx.graph.y(other).max(cx.graph.y(last.node));
                        cx.graph.set_y(other, y);
                    }

                    if !self.height_levels.contains_key(&other) {
                        let level = self.height_levels.get(&node).copied().unwrap_or(0);
                        let level = if child_same_row { level } else { level + delta_y };
                        self.height_levels.insert(other, level);
                    }

                    self.refresh_parameters(cx, other);

                    let mut local = BTreeSet::new();
                    self.format_y_recursive(
                        cx,
                        other,
                        Some(other_pin),
                        Some(my_pin),
                        placed,
                        child_same_row,
                        &mut local,
                    );
                    children.extend(local.iter().copied());

                    let is_direct_child = self
                        .x_tree
                        .get(node)
                        .is_some_and(|index| self.x_tree.immediate_children(index).contains(&other));
                    if is_direct_child {
                        branches.push(ChildBranch {
                            pin: other_pin,
                            parent_pin: my_pin,
                            nodes: local.iter().copied().collect(),
                        });
                    }

                    if !child_same_row && !local.is_empty() {
                        let pin_to_avoid = main_pin.take().or(last_linked);
                        if let Some(avoid) = pin_to_avoid {
                            self.keep_below_pin(cx, node, avoid, &local);
                        }
                    }

                    last_processed = Some(other_pin);
                }
                last_linked = Some(my_pin);
                delta_y += 1;
            }

            if cx.settings.center_branches
                && branches.len() >= cx.settings.num_required_branches
                && parent_direction == PinDirection::Output
            {
                if direction != parent_direction {
                    centered_parent = true;
                }
                self.center_branches(cx, node, &branches, placed);
            }
        }

        children.insert(node);

        if same_row
            && !centered_parent
            && let (Some(current), Some(parent)) = (current_pin, parent_pin)
        {
            cx.straighten_pin(current, parent);
            self.refresh_parameters(cx, parent.node);
        }
    }

    /// Moves a finished branch below `avoid` so its wire does not cross the
    /// pins above it.
    fn keep_below_pin(&mut self, cx: &mut LayoutCx, node: NodeId, avoid: PinId, branch: &BTreeSet<NodeId>) {
        let nodes: Vec<NodeId> = branch.iter().copied().collect();
        let mut to_move = BTreeSet::new();
        let bounds = if self.account_for_comments {
            self.relative_bounds_for_nodes(cx, &nodes, Some(node), &mut to_move, true)
        } else {
            cx.bounds_for_nodes(nodes.iter().copied())
        };
        let delta = cx.pin_y(avoid) + cx.settings.vertical_pin_spacing - bounds.top;
        if delta <= 0.0 {
            return;
        }
        if to_move.is_empty() {
            for child in nodes {
                cx.graph.translate(child, 0.0, delta);
                self.refresh_parameters(cx, child);
            }
        } else {
            for moved in to_move {
                cx.graph.translate(moved, 0.0, delta);
            }
        }
    }

    /// Centers the branches of `node` on its branching pins, then shifts the
    /// group down past anything already placed.
    fn center_branches(&mut self, cx: &mut LayoutCx, node: NodeId, branches: &[ChildBranch], placed: &PlacedNodes) {
        let child_pins: Vec<PinId> = branches.iter().map(|branch| branch.pin).collect();
        let parent_pins: Vec<PinId> = branches.iter().map(|branch| branch.parent_pin).collect();
        let offset = cx.pins_center_y(&parent_pins) - cx.pins_center_y(&child_pins);

        let mut all_nodes = Vec::new();
        for branch in branches {
            for child in &branch.nodes {
                all_nodes.push(*child);
                cx.graph.translate(*child, 0.0, offset);
                self.refresh_parameters(cx, *child);
            }
        }
        all_nodes.push(node);

        let mut all_bounds = if self.account_for_comments {
            self.relative_bounds_for_nodes(cx, &all_nodes, Some(node), &mut BTreeSet::new(), true)
        } else {
            self.cluster_bounds_for_nodes(cx, &all_nodes)
        };
        let initial_top = all_bounds.top;
        for other in &placed.order {
            if all_nodes.contains(other) {
                continue;
            }
            let bounds = self
                .collision_bounds(cx, *other, node, &mut BTreeSet::new())
                .extend_by(Margin::bottom(self.padding.y));
            if bounds.intersects(&all_bounds) {
                all_bounds = all_bounds.offset_by(0.0, bounds.bottom - all_bounds.top);
            }
        }

        let delta = all_bounds.top - initial_top;
        if delta != 0.0 {
            for moved in all_nodes {
                cx.graph.translate(moved, 0.0, delta);
                self.refresh_parameters(cx, moved);
            }
        }
    }
}
