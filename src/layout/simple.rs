use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::bounds::LayoutCx;
use super::formatter::FormatterParameters;
use crate::config::Padding;
use crate::ir::{NodeId, PinDirection};

/// Single-direction tree layout for graph kinds without execution flow.
/// Children sit one column further along `direction`, stacked and centered
/// on their parent. No knots, no comment handling.
#[derive(Debug, Clone)]
pub struct SimpleFormatter {
    params: FormatterParameters,
    direction: PinDirection,
    padding: Padding,
    root: Option<NodeId>,
    formatted: Vec<NodeId>,
}

impl SimpleFormatter {
    pub fn new(params: FormatterParameters, direction: PinDirection, padding: Padding) -> Self {
        Self {
            params,
            direction,
            padding,
            root: None,
            formatted: Vec::new(),
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn direction(&self) -> PinDirection {
        self.direction
    }

    pub fn set_params(&mut self, params: FormatterParameters) {
        self.params = params;
    }

    pub fn formatted_nodes(&self) -> &[NodeId] {
        &self.formatted
    }

    pub fn invalidate(&mut self) {
        self.formatted.clear();
    }

    fn is_selected(&self, node: NodeId) -> bool {
        self.params.nodes_to_format.is_empty() || self.params.nodes_to_format.contains(&node)
    }

    pub fn format_node(&mut self, cx: &mut LayoutCx, initial: NodeId) {
        let graph = &*cx.graph;
        if !graph.is_live(initial) || graph.is_comment(initial) || graph.is_knot(initial) {
            return;
        }
        self.root = Some(initial);
        let anchor = self
            .params
            .anchor
            .filter(|anchor| cx.graph.is_live(*anchor))
            .unwrap_or(initial);
        let saved = cx.graph.position(anchor);

        let children = self.collect_children(cx, initial);
        let mut heights = BTreeMap::new();
        subtree_height(cx, initial, &children, &mut heights, self.padding.y);
        let bounds = cx.node_bounds(initial);
        self.assign_positions(cx, initial, bounds.center().1, &children, &heights);

        self.formatted = vec![initial];
        self.formatted.extend(children.values().flatten().copied());

        let (x, y) = cx.graph.position(anchor);
        let (dx, dy) = (saved.0 - x, saved.1 - y);
        if dx != 0.0 || dy != 0.0 {
            for node in &self.formatted {
                cx.graph.translate(*node, dx, dy);
            }
        }
        debug!(
            root = cx.graph.name(initial),
            nodes = self.formatted.len(),
            "formatted simple tree"
        );
    }

    /// Breadth-first spanning tree over links leaving in `direction`; each
    /// node keeps the first parent that reached it.
    fn collect_children(&self, cx: &LayoutCx, root: NodeId) -> BTreeMap<NodeId, Vec<NodeId>> {
        let graph = &*cx.graph;
        let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        let mut visited = BTreeSet::from([root]);
        let mut queue = vec![root];
        let mut next = 0;
        while next < queue.len() {
            let node = queue[next];
            next += 1;
            for pin in graph.linked_pins(node, Some(self.direction)) {
                for other in graph.linked_to(pin) {
                    let child = other.node;
                    if !self.is_selected(child) || graph.is_comment(child) || !visited.insert(child) {
                        continue;
                    }
                    children.entry(node).or_default().push(child);
                    queue.push(child);
                }
            }
        }
        children
    }

    fn assign_positions(
        &self,
        cx: &mut LayoutCx,
        node: NodeId,
        center_y: f32,
        children: &BTreeMap<NodeId, Vec<NodeId>>,
        heights: &BTreeMap<NodeId, f32>,
    ) {
        let size = cx.node_size(node);
        cx.graph.set_y(node, center_y - size.height * 0.5);
        let Some(kids) = children.get(&node) else {
            return;
        };
        let parent = cx.node_bounds(node);
        let mut total: f32 = kids.iter().map(|kid| heights.get(kid).copied().unwrap_or(0.0)).sum();
        if kids.len() > 1 {
            total += self.padding.y * (kids.len() as f32 - 1.0);
        }
        let mut cursor = center_y - total * 0.5;
        for kid in kids {
            let kid_height = heights.get(kid).copied().unwrap_or(0.0);
            let width = cx.node_size(*kid).width;
            let x = match self.direction {
                PinDirection::Output => parent.right + self.padding.x,
                PinDirection::Input => parent.left - self.padding.x - width,
            };
            cx.graph.set_x(*kid, x);
            self.assign_positions(cx, *kid, cursor + kid_height * 0.5, children, heights);
            cursor += kid_height + self.padding.y;
        }
    }
}

fn subtree_height(
    cx: &LayoutCx,
    node: NodeId,
    children: &BTreeMap<NodeId, Vec<NodeId>>,
    memo: &mut BTreeMap<NodeId, f32>,
    spacing: f32,
) -> f32 {
    if let Some(value) = memo.get(&node) {
        return *value;
    }
    let mut height = cx.node_size(node).height;
    if let Some(kids) = children.get(&node)
        && !kids.is_empty()
    {
        let mut total = 0.0;
        for kid in kids {
            total += subtree_height(cx, *kid, children, memo, spacing);
        }
        total += spacing * (kids.len() as f32 - 1.0);
        height = height.max(total);
    }
    memo.insert(node, height);
    height
}
