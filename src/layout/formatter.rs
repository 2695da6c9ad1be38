use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::bounds::LayoutCx;
use super::change::ChangeTracker;
use super::comment_graph::CommentSubGraphFormatter;
use super::comments::CommentHandler;
use super::parameter::ParameterFormatter;
use super::routing::KnotTrack;
use super::tree::{FormatXTree, InfoIndex};
use super::types::{Margin, Rect};
use crate::config::Padding;
use crate::ir::{Graph, NodeId, PinDirection, PinId, PinLink};

/// What a formatting request is allowed to touch.
#[derive(Debug, Clone, Default)]
pub struct FormatterParameters {
    /// Restricts formatting to these nodes. Empty means every reachable node.
    pub nodes_to_format: Vec<NodeId>,
    /// Node that keeps its position. Defaults to the root.
    pub anchor: Option<NodeId>,
}

/// Full per-root layout pipeline for execution graphs.
#[derive(Debug, Clone)]
pub struct EdGraphFormatter {
    pub(super) params: FormatterParameters,
    /// Runs inside a comment box: no knots, no comment handling, no snapshot.
    pub(super) comment_formatter: bool,
    pub(super) padding: Padding,
    pub(super) pin_padding: Padding,

    pub(super) root: Option<NodeId>,
    pub(super) anchor: Option<NodeId>,
    pub(super) node_tree: Vec<NodeId>,
    pub(super) node_tree_set: BTreeSet<NodeId>,
    pub(super) node_pool: Vec<NodeId>,
    pub(super) account_for_comments: bool,

    pub(super) main_parameter_formatter: Option<ParameterFormatter>,
    pub(super) parameter_formatters: BTreeMap<NodeId, ParameterFormatter>,
    /// parameter node -> node whose cluster owns it
    pub(super) parameter_parent: BTreeMap<NodeId, NodeId>,

    pub(super) x_tree: FormatXTree,
    pub(super) path: BTreeSet<PinLink>,
    pub(super) same_row: BTreeSet<PinLink>,
    pub(super) nodes_to_expand: Vec<InfoIndex>,
    pub(super) height_levels: BTreeMap<NodeId, i32>,

    pub(super) knot_nodes: BTreeSet<NodeId>,
    pub(super) knot_pool: Vec<NodeId>,
    pub(super) knot_tracks: Vec<KnotTrack>,

    pub(super) comments: CommentHandler,
    pub(super) sub_graphs: BTreeMap<NodeId, CommentSubGraphFormatter>,
    /// Nodes positioned by a comment sub-graph; horizontal placement leaves them alone.
    pub(super) locked_x: BTreeSet<NodeId>,

    pub(super) changes: ChangeTracker,
}

impl EdGraphFormatter {
    pub fn new(params: FormatterParameters, padding: Padding, pin_padding: Padding) -> Self {
        Self {
            params,
            comment_formatter: false,
            padding,
            pin_padding,
            root: None,
            anchor: None,
            node_tree: Vec::new(),
            node_tree_set: BTreeSet::new(),
            node_pool: Vec::new(),
            account_for_comments: false,
            main_parameter_formatter: None,
            parameter_formatters: BTreeMap::new(),
            parameter_parent: BTreeMap::new(),
            x_tree: FormatXTree::new(),
            path: BTreeSet::new(),
            same_row: BTreeSet::new(),
            nodes_to_expand: Vec::new(),
            height_levels: BTreeMap::new(),
            knot_nodes: BTreeSet::new(),
            knot_pool: Vec::new(),
            knot_tracks: Vec::new(),
            comments: CommentHandler::new(),
            sub_graphs: BTreeMap::new(),
            locked_x: BTreeSet::new(),
            changes: ChangeTracker::new(),
        }
    }

    pub(super) fn new_comment_formatter(members: Vec<NodeId>, padding: Padding, pin_padding: Padding) -> Self {
        let mut formatter = Self::new(
            FormatterParameters {
                nodes_to_format: members,
                anchor: None,
            },
            padding,
            pin_padding,
        );
        formatter.comment_formatter = true;
        formatter
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn params(&self) -> &FormatterParameters {
        &self.params
    }

    pub fn set_params(&mut self, params: FormatterParameters) {
        self.params = params;
    }

    pub fn spanning_tree(&self) -> &FormatXTree {
        &self.x_tree
    }

    pub fn knot_nodes(&self) -> &BTreeSet<NodeId> {
        &self.knot_nodes
    }

    /// Parameter cluster owned by an impure pool node.
    pub fn parameter_formatter(&self, node: NodeId) -> Option<&ParameterFormatter> {
        self.parameter_formatters.get(&node)
    }

    /// Drops the change snapshot so the next request runs the full pipeline.
    pub fn invalidate(&mut self) {
        self.changes.invalidate_all();
    }

    // ── Entry point ──────────────────────────────────────────────────────

    pub fn format_node(&mut self, cx: &mut LayoutCx, initial: NodeId) {
        let graph = &*cx.graph;
        if !graph.is_live(initial) || graph.is_comment(initial) || graph.is_knot(initial) {
            return;
        }

        let new_tree = self.compute_node_tree(graph, initial);
        if cx.settings.faster_formatting
            && !self.comment_formatter
            && self.root == Some(initial)
            && !self.changes.is_formatting_required(graph, &new_tree)
        {
            self.simple_relative_formatting(cx);
            return;
        }

        self.reset();
        self.root = Some(initial);
        self.account_for_comments = cx.settings.account_for_comments && !self.comment_formatter;
        self.set_node_tree(new_tree);

        if cx.graph.linked_pins(initial, None).is_empty() {
            self.node_pool = vec![initial];
            self.anchor = Some(initial);
            self.save_formatting_end_info(cx);
            return;
        }

        if !self.comment_formatter {
            self.remove_knot_nodes(cx);
            let tree = self.compute_node_tree(cx.graph, initial);
            self.set_node_tree(tree);
        }

        let anchor = self
            .params
            .anchor
            .filter(|anchor| cx.graph.is_live(*anchor))
            .unwrap_or(initial);
        self.anchor = Some(anchor);
        let saved = cx.graph.position(anchor);

        if cx.graph.is_pure(initial) {
            let mut main = ParameterFormatter::new(initial);
            main.format_node(cx);
            self.node_pool = vec![initial];
            self.main_parameter_formatter = Some(main);
            self.reset_relative_to_anchor(cx, saved);
            self.save_formatting_end_info(cx);
            return;
        }

        self.init_node_pool(cx);
        self.comments.init(cx.graph, Some(&self.node_tree));
        self.pins_of_same_height(cx);

        self.format_x(cx, false);
        self.format_parameter_nodes(cx);
        if self.account_for_comments {
            self.format_comments(cx);
        }
        self.path.clear();
        self.format_x(cx, true);

        if cx.settings.expand_nodes_ahead_of_parameters {
            self.expand_nodes_ahead_of_parameters(cx);
        }
        self.format_y(cx);
        if cx.settings.expand_nodes_by_height {
            self.expand_by_height(cx);
        }
        if cx.settings.create_knot_nodes && !self.comment_formatter {
            self.format_knot_nodes(cx);
        }

        self.delete_unlinked_pooled_knots(cx);
        self.reset_relative_to_anchor(cx, saved);
        if cx.settings.snap_to_grid {
            self.snap_to_grid(cx);
        }
        self.save_formatting_end_info(cx);
        if !self.comment_formatter && cx.settings.try_to_handle_comment_nodes {
            self.modify_comment_nodes(cx);
        }

        let tree = self.compute_node_tree(cx.graph, initial);
        self.set_node_tree(tree);
        debug!(
            root = cx.graph.name(initial),
            nodes = self.node_pool.len(),
            knots = self.knot_nodes.len(),
            tracks = self.knot_tracks.len(),
            "formatted node tree"
        );
    }

    fn reset(&mut self) {
        self.root = None;
        self.anchor = None;
        self.node_pool.clear();
        self.main_parameter_formatter = None;
        self.parameter_formatters.clear();
        self.parameter_parent.clear();
        self.x_tree.clear();
        self.path.clear();
        self.same_row.clear();
        self.nodes_to_expand.clear();
        self.height_levels.clear();
        self.knot_nodes.clear();
        self.knot_pool.clear();
        self.knot_tracks.clear();
        self.comments.reset();
        self.sub_graphs.clear();
        self.locked_x.clear();
    }

    fn compute_node_tree(&self, graph: &Graph, root: NodeId) -> Vec<NodeId> {
        graph.node_tree_with_filter(root, |_, link| self.is_selected(link.node))
    }

    fn set_node_tree(&mut self, tree: Vec<NodeId>) {
        self.node_tree_set = tree.iter().copied().collect();
        self.node_tree = tree;
    }

    // ── Filters ──────────────────────────────────────────────────────────

    pub(super) fn is_selected(&self, node: NodeId) -> bool {
        self.params.nodes_to_format.is_empty() || self.params.nodes_to_format.contains(&node)
    }

    pub(super) fn in_pool(&self, node: NodeId) -> bool {
        self.node_pool.contains(&node)
    }

    /// Delegate wires only drive placement when delegates count as execution
    /// or when a pure node sits on either end.
    pub(super) fn filter_delegate_pin(&self, cx: &LayoutCx, from: PinId, to: PinId) -> bool {
        let graph = &*cx.graph;
        self.is_selected(to.node)
            && (cx.settings.treat_delegates_as_execution_pins
                || !graph.is_delegate_pin(from)
                || graph.is_pure(from.node)
                || graph.is_pure(to.node))
    }

    /// Execution and delegate wires leaving `node` in `direction`, as
    /// (pin on node, linked pin), in pin order.
    pub(super) fn exec_links(&self, cx: &LayoutCx, node: NodeId, direction: Option<PinDirection>) -> Vec<(PinId, PinId)> {
        let graph = &*cx.graph;
        let mut out = Vec::new();
        for pin in graph.linked_pins(node, direction) {
            if !graph.is_exec_pin(pin) && !graph.is_delegate_pin(pin) {
                continue;
            }
            for other in graph.linked_to(pin) {
                if self.filter_delegate_pin(cx, pin, *other) {
                    out.push((pin, *other));
                }
            }
        }
        out
    }

    // ── Bounds ───────────────────────────────────────────────────────────

    /// Bounds of a node together with its parameter cluster.
    pub(super) fn cluster_bounds(&self, cx: &LayoutCx, node: NodeId) -> Rect {
        match self.parameter_formatters.get(&node) {
            Some(formatter) => cx.bounds_for_nodes(formatter.formatted_nodes().iter().copied()),
            None => cx.node_bounds(node),
        }
    }

    pub(super) fn cluster_bounds_for_nodes(&self, cx: &LayoutCx, nodes: &[NodeId]) -> Rect {
        Rect::union_all(nodes.iter().map(|node| self.cluster_bounds(cx, *node))).unwrap_or_default()
    }

    pub(super) fn relative_node_bounds(
        &self,
        cx: &LayoutCx,
        node: NodeId,
        asking: Option<NodeId>,
        relative_nodes: &mut BTreeSet<NodeId>,
        use_cluster: bool,
    ) -> Rect {
        let base = if use_cluster {
            self.cluster_bounds(cx, node)
        } else {
            cx.node_bounds(node)
        };
        if !self.account_for_comments {
            return base;
        }
        self.comments
            .relative_node_bounds(cx, node, asking, base, &self.node_tree_set, relative_nodes)
    }

    pub(super) fn relative_bounds_for_nodes(
        &self,
        cx: &LayoutCx,
        nodes: &[NodeId],
        asking: Option<NodeId>,
        relative_nodes: &mut BTreeSet<NodeId>,
        use_cluster: bool,
    ) -> Rect {
        Rect::union_all(
            nodes
                .iter()
                .map(|node| self.relative_node_bounds(cx, *node, asking, relative_nodes, use_cluster)),
        )
        .unwrap_or_default()
    }

    /// Moves a node's parameter cluster back in place after the node moved.
    pub(super) fn refresh_parameters(&mut self, cx: &mut LayoutCx, node: NodeId) {
        if cx.graph.is_pure(node) {
            return;
        }
        if let Some(formatter) = self.parameter_formatters.get_mut(&node) {
            formatter.format_node(cx);
        }
    }

    // ── Formatted nodes ──────────────────────────────────────────────────

    /// Pool nodes and their parameter clusters, without knots.
    pub fn formatted_graph_nodes(&self) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        if let Some(main) = &self.main_parameter_formatter {
            for node in main.formatted_nodes() {
                if seen.insert(*node) {
                    out.push(*node);
                }
            }
        }
        for node in &self.node_pool {
            let cluster = self
                .parameter_formatters
                .get(node)
                .map(|formatter| formatter.formatted_nodes().to_vec())
                .unwrap_or_else(|| vec![*node]);
            for member in cluster {
                if seen.insert(member) {
                    out.push(member);
                }
            }
        }
        out
    }

    /// Every node the last pass positioned, knots included.
    pub fn formatted_nodes(&self) -> Vec<NodeId> {
        let mut out = self.formatted_graph_nodes();
        out.extend(self.knot_nodes.iter().copied());
        out
    }

    // ── Pool ─────────────────────────────────────────────────────────────

    /// Impure nodes reachable over execution wires, each straightened
    /// against the pin that discovered it.
    fn init_node_pool(&mut self, cx: &mut LayoutCx) {
        let Some(root) = self.root else {
            return;
        };
        self.node_pool.clear();
        let mut output_stack = vec![root];
        let mut input_stack = Vec::new();

        while let Some(current) = output_stack.pop().or_else(|| input_stack.pop()) {
            if !cx.graph.is_live(current)
                || !self.is_selected(current)
                || self.in_pool(current)
                || cx.graph.is_pure(current)
            {
                continue;
            }
            self.node_pool.push(current);

            for direction in [PinDirection::Input, PinDirection::Output] {
                let mut links = self.exec_links(cx, current, Some(direction));
                links.reverse();
                for (pin, linked) in links {
                    if self.in_pool(linked.node) || cx.graph.is_pure(linked.node) {
                        continue;
                    }
                    cx.straighten_pin(pin, linked);
                    match direction {
                        PinDirection::Input => input_stack.push(linked.node),
                        PinDirection::Output => output_stack.push(linked.node),
                    }
                }
            }
        }
    }

    /// Marks, for every node, the first link continuing in its parent's
    /// direction as sharing the parent's row.
    fn pins_of_same_height(&mut self, cx: &LayoutCx) {
        let Some(root) = self.root else {
            return;
        };
        self.same_row.clear();
        let mut visited = BTreeSet::new();
        self.pins_of_same_height_recursive(cx, root, None, &mut visited);
    }

    fn pins_of_same_height_recursive(
        &mut self,
        cx: &LayoutCx,
        node: NodeId,
        parent_pin: Option<PinId>,
        visited: &mut BTreeSet<NodeId>,
    ) {
        visited.insert(node);
        let parent_direction = parent_pin
            .and_then(|pin| cx.graph.pin_direction(pin))
            .unwrap_or(PinDirection::Output);

        let mut first = true;
        for direction in [parent_direction, parent_direction.opposite()] {
            for (pin, linked) in self.exec_links(cx, node, Some(direction)) {
                if !self.in_pool(linked.node) || visited.contains(&linked.node) {
                    continue;
                }
                if first && direction == parent_direction {
                    first = false;
                    self.same_row.insert(PinLink::new(pin, linked));
                    self.same_row.insert(PinLink::new(linked, pin));
                }
                self.pins_of_same_height_recursive(cx, linked.node, Some(pin), visited);
            }
        }
    }

    // ── Parameters ───────────────────────────────────────────────────────

    /// Formats the parameter cluster of every pool node. The first pass
    /// settles which cluster owns a shared parameter node (left-most, then
    /// top-most owner wins); the second lays every cluster out again.
    fn format_parameter_nodes(&mut self, cx: &mut LayoutCx) {
        let mut pool = self.node_pool.clone();
        pool.sort_by(|a, b| {
            let (ax, ay) = cx.graph.position(*a);
            let (bx, by) = cx.graph.position(*b);
            ax.total_cmp(&bx).then(ay.total_cmp(&by))
        });

        let mut ignored = BTreeSet::new();
        for node in &pool {
            let mut formatter = ParameterFormatter::new(*node);
            formatter.set_ignored_nodes(ignored.clone());
            formatter.format_node(cx);

            for member in formatter.formatted_nodes().to_vec() {
                if member == *node {
                    continue;
                }
                if let Some(owner) = self.parameter_parent.get(&member).copied()
                    && owner != *node
                    && let Some(previous) = self.parameter_formatters.get_mut(&owner)
                {
                    previous.remove_node(member);
                }
                self.parameter_parent.insert(member, *node);
            }
            ignored.extend(formatter.formatted_input_nodes().iter().copied());
            self.parameter_formatters.insert(*node, formatter);
        }

        for node in &pool {
            if let Some(formatter) = self.parameter_formatters.get_mut(node) {
                formatter.format_node(cx);
            }
        }

        for formatter in self.parameter_formatters.values_mut() {
            if cx.settings.expand_parameters_by_height {
                formatter.expand_by_height(cx);
            }
            formatter.save_relative_positions(cx);
            formatter.mark_initialized();
        }
    }

    /// Pushes a node right of parameter nodes it reads from that belong to
    /// another, non-helixing cluster.
    fn expand_nodes_ahead_of_parameters(&mut self, cx: &mut LayoutCx) {
        for node in self.node_pool.clone() {
            let Some(info) = self.x_tree.get(node) else {
                continue;
            };
            let mut largest = 0.0f32;
            for parameter in cx.graph.linked_nodes(node, Some(PinDirection::Input)) {
                if !cx.graph.is_pure(parameter) {
                    continue;
                }
                let Some(owner) = self.parameter_parent.get(&parameter) else {
                    continue;
                };
                if *owner == node {
                    continue;
                }
                let Some(owner_formatter) = self.parameter_formatters.get(owner) else {
                    continue;
                };
                if owner_formatter.is_using_helixing() {
                    continue;
                }
                let delta =
                    (cx.node_bounds(parameter).right + self.pin_padding.x - cx.graph.x(node)).round();
                largest = largest.max(delta);
            }

            if largest > 0.0 {
                cx.graph.translate(node, largest, 0.0);
                self.refresh_parameters(cx, node);
                for child in self.x_tree.children(info, cx.graph, Some(PinDirection::Output), false) {
                    cx.graph.translate(child, largest, 0.0);
                    self.refresh_parameters(cx, child);
                }
            }
        }
    }

    /// Widens columns so wires leaving a node stay under a 45 degree slope.
    fn expand_by_height(&mut self, cx: &mut LayoutCx) {
        for node in self.node_pool.clone() {
            let Some(info) = self.x_tree.get(node) else {
                continue;
            };
            let links = self.x_tree.child_links(info, cx.graph, PinDirection::Output);
            if cx.settings.center_branches && links.len() < cx.settings.num_required_branches {
                continue;
            }
            let mut largest = 0.0f32;
            for link in &links {
                let (Some(from), Some(to)) = (link.from, link.to) else {
                    continue;
                };
                let a = cx.pin_pos(from);
                let b = cx.pin_pos(to);
                largest = largest.max((b.1 - a.1).abs() * 0.75 - (b.0 - a.0).abs());
            }
            if largest > 0.0 {
                let delta = largest.round();
                for child in self.x_tree.children(info, cx.graph, Some(PinDirection::Output), false) {
                    cx.graph.translate(child, delta, 0.0);
                    self.refresh_parameters(cx, child);
                }
            }
        }
    }

    // ── Comments ─────────────────────────────────────────────────────────

    /// Formats the contents of each comment box on its own so the box keeps
    /// a consistent interior layout.
    fn format_comments(&mut self, cx: &mut LayoutCx) {
        let entries: Vec<(NodeId, Vec<NodeId>)> = self
            .comments
            .comments()
            .map(|(comment, members)| {
                let members = members
                    .iter()
                    .copied()
                    .filter(|member| self.in_pool(*member))
                    .collect::<Vec<_>>();
                (comment, members)
            })
            .collect();

        for (comment, members) in entries {
            // a comment wrapping the whole pool is just the outer layout
            if members.len() < 2 || self.node_pool.iter().all(|node| members.contains(node)) {
                continue;
            }
            let Some(entry) = self.node_pool.iter().copied().find(|node| members.contains(node)) else {
                continue;
            };
            if self.sub_graphs.contains_key(&entry) {
                continue;
            }
            let mut sub_graph = CommentSubGraphFormatter::new(comment, members, self.padding, self.pin_padding);
            sub_graph.format(cx, entry);
            self.sub_graphs.insert(entry, sub_graph);
        }
    }

    /// Applies a formatted comment sub-graph once its entry node is placed.
    pub(super) fn apply_sub_graph(&mut self, cx: &mut LayoutCx, entry: NodeId) {
        let Some(sub_graph) = self.sub_graphs.get(&entry) else {
            return;
        };
        if !sub_graph.has_been_formatted() {
            return;
        }
        for moved in sub_graph.apply(cx) {
            self.locked_x.insert(moved);
            self.refresh_parameters(cx, moved);
        }
    }

    /// Resizes each comment box holding formatted nodes to wrap its members.
    fn modify_comment_nodes(&mut self, cx: &mut LayoutCx) {
        let formatted: BTreeSet<NodeId> = self.formatted_graph_nodes().into_iter().collect();
        let padding = cx.settings.comment_node_padding;
        for comment in cx.graph.comments() {
            let members: Vec<NodeId> = cx
                .graph
                .comment_members(comment)
                .into_iter()
                .filter(|member| !cx.graph.is_comment(*member) && !cx.graph.is_knot(*member))
                .collect();
            if !members.iter().any(|member| formatted.contains(member)) {
                continue;
            }
            let title = cx
                .graph
                .comment_data(comment)
                .map(|data| data.title_height)
                .unwrap_or(0.0);
            let bounds = cx
                .bounds_for_nodes(members)
                .extend_by(Margin::new(padding.x, padding.y + title, padding.x, padding.y));
            cx.graph
                .set_comment_bounds(comment, bounds.left, bounds.top, bounds.right, bounds.bottom);
        }
    }

    // ── Knots ────────────────────────────────────────────────────────────

    /// Takes routing knots out of the tree, joining the wires they carried.
    fn remove_knot_nodes(&mut self, cx: &mut LayoutCx) {
        let Some(root) = self.root else {
            return;
        };
        let tree = cx
            .graph
            .node_tree_with_filter(root, |_, link| self.is_selected(link.node));
        for node in tree {
            if !cx.graph.is_knot(node) {
                continue;
            }
            cx.graph.disconnect_knot(node);
            for comment in cx.graph.comments() {
                cx.graph.remove_node_from_comment(comment, node);
            }
            if cx.settings.use_knot_node_pool {
                self.knot_pool.push(node);
            } else if let Err(err) = cx.graph.remove_node(node) {
                debug!(%err, "knot already removed");
            }
        }
    }

    fn delete_unlinked_pooled_knots(&mut self, cx: &mut LayoutCx) {
        for knot in std::mem::take(&mut self.knot_pool) {
            if cx.graph.is_live(knot)
                && cx.graph.linked_pins(knot, None).is_empty()
                && let Err(err) = cx.graph.remove_node(knot)
            {
                warn!(%err, "failed to remove pooled knot");
            }
        }
    }

    // ── Finish ───────────────────────────────────────────────────────────

    /// Translates everything formatted so the anchor ends where it started.
    fn reset_relative_to_anchor(&mut self, cx: &mut LayoutCx, saved: (f32, f32)) {
        let Some(anchor) = self.anchor else {
            return;
        };
        if !cx.graph.is_live(anchor) {
            return;
        }
        let (x, y) = cx.graph.position(anchor);
        let (dx, dy) = (saved.0 - x, saved.1 - y);
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        for node in self.formatted_nodes() {
            if node != anchor {
                cx.graph.translate(node, dx, dy);
            }
        }
        cx.graph.set_position(anchor, saved.0, saved.1);
    }

    fn snap_to_grid(&mut self, cx: &mut LayoutCx) {
        let grid = cx.settings.grid_size;
        if grid <= 0.0 {
            return;
        }
        for node in self.formatted_nodes() {
            if Some(node) == self.anchor {
                continue;
            }
            let x = (cx.graph.x(node) / grid).round() * grid;
            cx.graph.set_x(node, x);
        }
    }

    fn save_formatting_end_info(&mut self, cx: &LayoutCx) {
        if self.comment_formatter {
            return;
        }
        let formatted = self.formatted_nodes();
        let tree = self
            .root
            .map(|root| self.compute_node_tree(cx.graph, root))
            .unwrap_or_default();
        self.changes.save(cx.graph, self.anchor, &formatted, &tree);
    }

    /// Replays the saved offsets relative to the anchor.
    fn simple_relative_formatting(&mut self, cx: &mut LayoutCx) {
        let Some(anchor) = self.anchor.filter(|anchor| cx.graph.is_live(*anchor)) else {
            return;
        };
        let (ax, ay) = cx.graph.position(anchor);
        for (node, (dx, dy)) in self.changes.offsets() {
            if node != anchor {
                cx.graph.set_position(node, ax + dx, ay + dy);
            }
        }
        self.save_formatting_end_info(cx);
        if cx.settings.try_to_handle_comment_nodes {
            self.modify_comment_nodes(cx);
        }
        debug!(root = cx.graph.name(anchor), "replayed cached layout");
    }
}
