use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, info, warn};

use crate::config::{AutoFormatting, GraphType, Settings};
use crate::error::GraphError;
use crate::ir::{Graph, Node, NodeId, PinDirection, PinId};
use crate::layout::{
    FormattedTree, FormatterParameters, GraphFormatter, LayoutCx, NodeSizeCache, format_all, root_node,
};

/// Vertical gap left between a freshly formatted tree and a tree pushed out of its way.
const UNRELATED_NODE_GAP: f32 = 20.0;
/// Upper bound on trees visited while moving unrelated nodes.
const MAX_UNRELATED_ITERATIONS: usize = 10_000;

/// Formatters from earlier runs, keyed by the root they started from.
#[derive(Debug, Clone, Default)]
pub struct FormatterCache {
    by_root: BTreeMap<NodeId, GraphFormatter>,
    /// formatted node -> root of the formatter that last placed it
    owner: BTreeMap<NodeId, NodeId>,
}

impl FormatterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_root.is_empty()
    }

    pub fn get(&self, root: NodeId) -> Option<&GraphFormatter> {
        self.by_root.get(&root)
    }

    /// Root of the cached formatter whose last run placed `node`.
    pub fn lookup(&self, node: NodeId) -> Option<NodeId> {
        if self.by_root.contains_key(&node) {
            return Some(node);
        }
        self.owner.get(&node).copied()
    }

    fn take(&mut self, node: NodeId) -> Option<GraphFormatter> {
        let root = self.lookup(node)?;
        let formatter = self.by_root.remove(&root)?;
        self.owner.retain(|_, owner| *owner != root);
        Some(formatter)
    }

    fn insert(&mut self, root: NodeId, formatter: GraphFormatter) {
        self.owner.retain(|_, owner| *owner != root);
        for node in formatter.formatted_nodes() {
            // a node belongs to the latest formatter that placed it
            if let Some(previous) = self.owner.insert(node, root)
                && previous != root
                && let Some(stale) = self.by_root.get_mut(&previous)
            {
                stale.invalidate();
            }
        }
        self.by_root.insert(root, formatter);
    }

    /// Forces a full pipeline on the next run of every formatter.
    pub fn invalidate_all(&mut self) {
        for formatter in self.by_root.values_mut() {
            formatter.invalidate();
        }
    }

    /// Drops everything cached about `node`.
    pub fn forget(&mut self, node: NodeId) {
        if self.by_root.remove(&node).is_some() {
            self.owner.retain(|_, owner| *owner != node);
            return;
        }
        if let Some(root) = self.owner.remove(&node)
            && let Some(formatter) = self.by_root.get_mut(&root)
        {
            formatter.invalidate();
        }
    }

    /// Knots created by the cached formatters' last runs.
    pub fn knot_count(&self) -> usize {
        self.by_root.values().map(GraphFormatter::knot_count).sum()
    }

    pub fn clear(&mut self) {
        self.by_root.clear();
        self.owner.clear();
    }
}

/// Finds the root for `node`, reuses or creates its formatter, runs it and
/// caches it. Returns the root and every node the run placed.
fn run_formatter(
    cx: &mut LayoutCx,
    formatters: &mut FormatterCache,
    graph_type: GraphType,
    node: NodeId,
    params: FormatterParameters,
) -> Option<(NodeId, Vec<NodeId>)> {
    let direction = GraphFormatter::for_graph(cx.settings, graph_type, params.clone())?.direction();
    let Some(root) = root_node(cx.graph, cx.settings, node, &params.nodes_to_format, direction) else {
        debug!(node = cx.graph.name(node), "no root node to format from");
        return None;
    };

    let mut formatter = match formatters.take(root) {
        Some(mut cached) => {
            cached.set_params(params);
            cached
        }
        None => GraphFormatter::for_graph(cx.settings, graph_type, params)?,
    };
    formatter.format_node(cx, root);
    let formatted = formatter.formatted_nodes();
    formatters.insert(root, formatter);
    Some((root, formatted))
}

/// Pushes every node tree that overlaps the freshly formatted nodes below
/// them. Only applies when the formatter started from an event.
pub fn move_unrelated_nodes(cx: &mut LayoutCx, root: NodeId, formatted: &[NodeId]) {
    if !cx.graph.is_event(root) || formatted.is_empty() {
        return;
    }
    let formatted_set: BTreeSet<NodeId> = formatted.iter().copied().collect();
    let formatted_bounds = cx.bounds_for_nodes(formatted.iter().copied());

    let mut remaining: Vec<NodeId> = cx.graph.node_ids().collect();
    let mut iterations = 0usize;
    while let Some(next) = remaining.pop() {
        if cx.graph.is_comment(next) {
            continue;
        }
        let tree = cx.graph.node_tree(next);
        remaining.retain(|node| !tree.contains(node));
        if tree.iter().any(|node| formatted_set.contains(node)) {
            continue;
        }

        let tree_bounds = cx.bounds_for_nodes(tree.iter().copied());
        if formatted_bounds.intersects(&tree_bounds) {
            let offset = formatted_bounds.bottom - tree_bounds.top + UNRELATED_NODE_GAP;
            for node in &tree {
                cx.graph.translate(*node, 0.0, offset);
            }
        }

        iterations += 1;
        if iterations > MAX_UNRELATED_ITERATIONS {
            error!("infinite loop detected while moving unrelated nodes");
            break;
        }
    }
}

/// One editable graph with everything needed to format it incrementally:
/// measured sizes, formatters from earlier runs and the auto-format queue.
#[derive(Debug, Clone)]
pub struct GraphSession {
    graph: Graph,
    settings: Settings,
    graph_type: GraphType,
    sizes: NodeSizeCache,
    formatters: FormatterCache,
    pending: Vec<NodeId>,
    pending_params: FormatterParameters,
    pending_format_all: bool,
    /// Nodes the host has been asked to measure.
    pending_size: BTreeSet<NodeId>,
    formatting: bool,
}

impl GraphSession {
    pub fn new(graph: Graph, settings: Settings, graph_type: GraphType) -> Self {
        Self {
            graph,
            settings,
            graph_type,
            sizes: NodeSizeCache::new(),
            formatters: FormatterCache::new(),
            pending: Vec::new(),
            pending_params: FormatterParameters::default(),
            pending_format_all: false,
            pending_size: BTreeSet::new(),
            formatting: false,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Direct edits bypass the caches; call `on_node_added` or
    /// `on_node_removed` for structural changes.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn graph_type(&self) -> GraphType {
        self.graph_type
    }

    pub fn sizes(&self) -> &NodeSizeCache {
        &self.sizes
    }

    pub fn formatters(&self) -> &FormatterCache {
        &self.formatters
    }

    pub fn formatter_for(&self, node: NodeId) -> Option<&GraphFormatter> {
        self.formatters.get(self.formatters.lookup(node)?)
    }

    /// Geometry view over the session's graph, sizes and settings.
    pub fn layout_cx(&mut self) -> LayoutCx<'_> {
        LayoutCx::new(&mut self.graph, &self.sizes, &self.settings)
    }

    pub fn is_formatting(&self) -> bool {
        self.formatting
    }

    // ── Sizes ────────────────────────────────────────────────────────────

    /// Records a measured size. Completes any outstanding size request.
    pub fn set_node_size(&mut self, node: NodeId, width: f32, height: f32) {
        if !self.graph.is_live(node) {
            return;
        }
        self.sizes.insert(node, width, height);
        self.pending_size.remove(&node);
    }

    /// Records a measured pin offset from the node's top edge.
    pub fn set_pin_offset(&mut self, pin: PinId, offset_y: f32) -> Result<(), GraphError> {
        if self.graph.pin(pin).is_none() {
            return Err(GraphError::InvalidPin {
                node: pin.node,
                index: pin.index,
            });
        }
        self.sizes.insert_pin_offset(pin, offset_y);
        Ok(())
    }

    /// Asks the host to measure `node`. Knots and comments never need it.
    pub fn request_size(&mut self, node: NodeId) {
        if self.graph.is_live(node) && !self.graph.is_knot(node) && !self.graph.is_comment(node) {
            self.pending_size.insert(node);
        }
    }

    /// Requests a size for every unmeasured node.
    pub fn request_missing_sizes(&mut self) {
        let missing: Vec<NodeId> = self
            .graph
            .node_ids()
            .filter(|node| self.sizes.is_pending(*node))
            .collect();
        for node in missing {
            self.request_size(node);
        }
    }

    pub fn nodes_awaiting_size(&self) -> Vec<NodeId> {
        self.pending_size
            .iter()
            .copied()
            .filter(|node| self.graph.is_live(*node))
            .collect()
    }

    /// Gives up on outstanding measurements; layout falls back to provisional sizes.
    pub fn discard_size_requests(&mut self) {
        self.pending_size.clear();
    }

    // ── Formatting ───────────────────────────────────────────────────────

    /// Formats the tree containing `node`. Returns the nodes placed, or
    /// `None` when nothing ran.
    pub fn format_from_node(
        &mut self,
        node: NodeId,
        nodes_to_format: Vec<NodeId>,
        anchor: Option<NodeId>,
    ) -> Option<Vec<NodeId>> {
        self.format_with_params(
            node,
            FormatterParameters {
                nodes_to_format,
                anchor,
            },
        )
        .map(|(_, formatted)| formatted)
    }

    fn format_with_params(&mut self, node: NodeId, params: FormatterParameters) -> Option<(NodeId, Vec<NodeId>)> {
        if self.formatting {
            debug!("ignoring format request while formatting");
            return None;
        }
        if !self.graph.is_live(node) {
            return None;
        }
        self.formatting = true;
        let mut cx = LayoutCx::new(&mut self.graph, &self.sizes, &self.settings);
        let result = run_formatter(&mut cx, &mut self.formatters, self.graph_type, node, params);
        self.formatting = false;
        result
    }

    /// Formats every root tree and arranges the trees in columns.
    pub fn format_all(&mut self) -> Vec<FormattedTree> {
        if self.formatting {
            debug!("ignoring format all while formatting");
            return Vec::new();
        }
        self.formatting = true;
        let graph_type = self.graph_type;
        let formatters = &mut self.formatters;
        let mut cx = LayoutCx::new(&mut self.graph, &self.sizes, &self.settings);
        let trees = format_all(&mut cx, |cx, node| {
            run_formatter(cx, formatters, graph_type, node, FormatterParameters::default())
                .map(|(root, nodes)| FormattedTree { root, nodes })
        });
        self.formatting = false;
        self.pending_format_all = false;
        info!(trees = trees.len(), "formatted all nodes");
        trees
    }

    /// Replaces the settings. Cached layouts were computed under the old ones.
    pub fn update_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.formatters.invalidate_all();
    }

    pub fn set_graph_type(&mut self, graph_type: GraphType) {
        if graph_type != self.graph_type {
            self.graph_type = graph_type;
            self.formatters.clear();
        }
    }

    /// Removes a node from the graph and every cache.
    pub fn remove_node(&mut self, node: NodeId) -> Result<Node, GraphError> {
        let removed = self.graph.remove_node(node)?;
        self.on_node_removed(node);
        Ok(removed)
    }

    /// Forgets a node the host already deleted.
    pub fn on_node_removed(&mut self, node: NodeId) {
        self.sizes.invalidate(node);
        self.formatters.forget(node);
        self.pending.retain(|pending| *pending != node);
        self.pending_size.remove(&node);
    }

    // ── Auto formatting ──────────────────────────────────────────────────

    /// Reacts to a single node the user just created. Linked nodes are
    /// queued for formatting according to the graph type's policy.
    pub fn on_node_added(&mut self, node: NodeId) -> bool {
        self.on_nodes_added(&[node])
    }

    /// Reacts to newly created nodes. With several nodes, formatting only
    /// happens when exactly one of them is impure.
    pub fn on_nodes_added(&mut self, nodes: &[NodeId]) -> bool {
        for node in nodes {
            if self.sizes.is_pending(*node) {
                self.request_size(*node);
            }
        }
        let Some(policy) = self
            .settings
            .formatter_settings(self.graph_type)
            .map(|entry| entry.auto_formatting)
        else {
            return false;
        };
        if policy == AutoFormatting::Never {
            return false;
        }

        let node = match nodes {
            [single] => *single,
            _ => {
                let impure: Vec<NodeId> = nodes.iter().copied().filter(|node| self.graph.is_impure(*node)).collect();
                match impure.as_slice() {
                    [single] => *single,
                    _ => return false,
                }
            }
        };
        if !self.graph.is_live(node) {
            return false;
        }

        if self.settings.auto_position_event_nodes && self.graph.is_event(node) {
            self.pending_format_all = true;
            return true;
        }
        if self.graph.linked_nodes(node, None).is_empty() {
            return false;
        }

        let mut params = FormatterParameters::default();
        if policy == AutoFormatting::FormatSingleConnected {
            let mut nodes_to_format = self.graph.linked_nodes(node, Some(PinDirection::Input));
            if nodes_to_format.is_empty() {
                nodes_to_format = self.graph.linked_nodes(node, Some(PinDirection::Output));
            }
            nodes_to_format.push(node);
            params.nodes_to_format = nodes_to_format;
        }
        self.enqueue(node, params);
        true
    }

    /// Queues `node` for the next formatting pass.
    pub fn enqueue(&mut self, node: NodeId, params: FormatterParameters) {
        if self.graph.is_live(node) && !self.graph.is_comment(node) && !self.graph.is_knot(node) {
            self.pending_params = params;
            if !self.pending.contains(&node) {
                self.pending.push(node);
            }
        }
        if self.settings.refresh_node_size_before_formatting {
            for member in self.graph.node_tree(node) {
                if self.sizes.is_pending(member) {
                    self.request_size(member);
                }
            }
        }
    }

    pub fn request_format_all(&mut self) {
        self.pending_format_all = true;
    }

    pub fn pending_nodes(&self) -> &[NodeId] {
        &self.pending
    }

    /// Drops every queued request.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
        self.pending_params = FormatterParameters::default();
        self.pending_format_all = false;
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.pending_format_all
    }

    /// Formats everything queued. Each run removes the nodes it placed from
    /// the queue; the queue is dropped when it fails to drain.
    pub fn format_pending(&mut self) -> usize {
        self.pending.retain(|node| self.graph.is_live(*node));
        let mut remaining_attempts = self.pending.len();
        let mut formatted_count = 0;

        while let Some(node) = self.pending.pop() {
            if remaining_attempts == 0 {
                warn!("Failed to format all nodes");
                self.pending.clear();
                break;
            }
            remaining_attempts -= 1;

            let params = self.pending_params.clone();
            let Some((root, formatted)) = self.format_with_params(node, params) else {
                continue;
            };
            self.pending.retain(|pending| !formatted.contains(pending));
            formatted_count += formatted.len();

            let mut cx = LayoutCx::new(&mut self.graph, &self.sizes, &self.settings);
            move_unrelated_nodes(&mut cx, root, &formatted);
        }
        self.pending_params = FormatterParameters::default();

        if self.pending_format_all {
            formatted_count += self.format_all().iter().map(|tree| tree.nodes.len()).sum::<usize>();
        }
        formatted_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{NodeKind, Pin};

    fn exec_node(graph: &mut Graph, name: &str, kind: NodeKind, x: f32, y: f32) -> NodeId {
        let mut node = Node::new(name, kind).at(x, y).with_pin(Pin::exec_out("then"));
        if kind != NodeKind::Event {
            node = node.with_pin(Pin::exec_in("exec"));
        }
        graph.add_node(node)
    }

    fn link(graph: &mut Graph, a: NodeId, b: NodeId) {
        let out = graph.find_pin(a, "then").unwrap();
        let input = graph.find_pin(b, "exec").unwrap();
        assert!(graph.try_create_link(out, input));
    }

    fn chain_session() -> (GraphSession, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let event = exec_node(&mut graph, "BeginPlay", NodeKind::Event, 0.0, 0.0);
        let a = exec_node(&mut graph, "A", NodeKind::Normal, 40.0, 300.0);
        let b = exec_node(&mut graph, "B", NodeKind::Normal, 90.0, -200.0);
        link(&mut graph, event, a);
        link(&mut graph, a, b);
        (
            GraphSession::new(graph, Settings::default(), GraphType::Blueprint),
            event,
            a,
            b,
        )
    }

    #[test]
    fn format_from_node_caches_formatter_by_root() {
        let (mut session, event, a, b) = chain_session();
        let formatted = session.format_from_node(b, Vec::new(), None).unwrap();
        assert!(formatted.contains(&event) && formatted.contains(&a) && formatted.contains(&b));
        assert_eq!(session.formatters().len(), 1);
        assert_eq!(session.formatters().lookup(a), Some(event));
        assert!(session.formatter_for(b).is_some());

        session.format_from_node(a, Vec::new(), None).unwrap();
        assert_eq!(session.formatters().len(), 1);
    }

    #[test]
    fn unknown_graph_type_formats_nothing() {
        let (session, _, a, _) = chain_session();
        let mut session = GraphSession::new(session.into_graph(), Settings::default(), GraphType::Unknown);
        assert!(session.format_from_node(a, Vec::new(), None).is_none());
        assert!(session.formatters().is_empty());
    }

    #[test]
    fn removing_root_drops_its_formatter() {
        let (mut session, event, a, _) = chain_session();
        session.format_from_node(a, Vec::new(), None);
        session.remove_node(event).unwrap();
        assert!(session.formatters().is_empty());
        assert!(session.remove_node(event).is_err());
    }

    #[test]
    fn added_linked_node_is_queued() {
        let (mut session, _, a, _) = chain_session();
        let c = exec_node(session.graph_mut(), "C", NodeKind::Normal, 900.0, 900.0);
        assert!(!session.on_node_added(c));

        let graph = session.graph_mut();
        let d = exec_node(graph, "D", NodeKind::Normal, 900.0, 900.0);
        let out = graph.find_pin(d, "then").unwrap();
        let input = graph.find_pin(a, "exec").unwrap();
        assert!(graph.try_create_link(out, input));
        assert!(session.on_node_added(d));
        assert_eq!(session.pending_nodes(), &[d]);
        assert!(session.nodes_awaiting_size().contains(&d));

        session.discard_size_requests();
        assert!(session.format_pending() > 0);
        assert!(!session.has_pending());
    }

    #[test]
    fn never_policy_ignores_new_nodes() {
        let (session, _, a, _) = chain_session();
        let mut session = GraphSession::new(session.into_graph(), Settings::default(), GraphType::MaterialGraph);
        let graph = session.graph_mut();
        let c = exec_node(graph, "C", NodeKind::Normal, 0.0, 0.0);
        let out = graph.find_pin(a, "then").unwrap();
        let input = graph.find_pin(c, "exec").unwrap();
        assert!(graph.try_create_link(out, input));
        assert!(!session.on_node_added(c));
        assert!(!session.has_pending());
    }

    #[test]
    fn unrelated_tree_moves_below_event_layout() {
        let mut graph = Graph::new();
        let event = exec_node(&mut graph, "BeginPlay", NodeKind::Event, 0.0, 0.0);
        let stray = exec_node(&mut graph, "Stray", NodeKind::Normal, 50.0, 10.0);
        let sizes = NodeSizeCache::new();
        let settings = Settings::default();
        let mut cx = LayoutCx::new(&mut graph, &sizes, &settings);
        let event_bottom = cx.node_bounds(event).bottom;

        move_unrelated_nodes(&mut cx, event, &[event]);
        assert_eq!(cx.graph.y(stray), event_bottom + UNRELATED_NODE_GAP);

        let before = cx.graph.position(stray);
        move_unrelated_nodes(&mut cx, event, &[event]);
        assert_eq!(cx.graph.position(stray), before);
    }

    #[test]
    fn pin_offsets_need_a_real_pin() {
        let (mut session, event, _, _) = chain_session();
        let then = session.graph().find_pin(event, "then").unwrap();
        session.set_pin_offset(then, 40.0).unwrap();
        assert_eq!(session.sizes().pin_offset(then), Some(40.0));

        let missing = PinId { node: event, index: 9 };
        assert!(matches!(
            session.set_pin_offset(missing, 10.0),
            Err(GraphError::InvalidPin { index: 9, .. })
        ));
    }

    #[test]
    fn settings_and_graph_type_changes_reset_formatters() {
        let (mut session, event, a, _) = chain_session();
        session.format_from_node(a, Vec::new(), None).unwrap();
        assert!(!session.is_formatting());

        let settings = Settings {
            faster_formatting: true,
            ..Settings::default()
        };
        session.update_settings(settings);
        assert!(session.settings().faster_formatting);
        assert_eq!(session.formatters().len(), 1);

        session.set_graph_type(GraphType::BehaviorTree);
        assert_eq!(session.graph_type(), GraphType::BehaviorTree);
        assert!(session.formatters().is_empty());
        assert!(session.formatters().lookup(event).is_none());
    }

    #[test]
    fn queued_format_all_runs_with_pending_pass() {
        let (mut session, event, _, _) = chain_session();
        session.request_format_all();
        assert!(session.has_pending());
        assert!(session.format_pending() >= 3);
        assert!(!session.has_pending());
        assert_eq!(session.graph().position(event), (0.0, 0.0));
    }
}
