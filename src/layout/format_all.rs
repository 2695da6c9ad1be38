use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::bounds::LayoutCx;
use super::types::Rect;
use crate::config::{ColumnStyle, FormatAllStyle, Settings};
use crate::ir::{Graph, NodeId, PinDirection};

/// Upper bound on trees placed by one format-all run.
const MAX_FORMAT_ALL_ITERATIONS: usize = 10_000;

/// A root tree laid out by one formatter run.
#[derive(Debug, Clone)]
pub struct FormattedTree {
    pub root: NodeId,
    pub nodes: Vec<NodeId>,
}

fn class_of(graph: &Graph, node: NodeId) -> &str {
    graph.node(node).map(|data| data.class.as_str()).unwrap_or("")
}

/// Root nodes grouped into columns, each column sorted for placement.
pub fn format_all_columns(graph: &Graph, settings: &Settings) -> Vec<Vec<NodeId>> {
    let mut extra = Vec::new();
    let mut actor_events = Vec::new();
    let mut custom_events = Vec::new();
    let mut input_events = Vec::new();
    let mut component_events = Vec::new();
    let mut other = Vec::new();

    for node in graph.node_ids() {
        let class = class_of(graph, node);
        let extra_root = settings.is_extra_root_class(class);
        match settings.format_all_column_style {
            ColumnStyle::NodeType => {
                if extra_root {
                    extra.push(node);
                } else if class == "K2Node_CustomEvent" {
                    custom_events.push(node);
                } else if class.starts_with("K2Node_Input") {
                    input_events.push(node);
                } else if class == "K2Node_ComponentBoundEvent" {
                    component_events.push(node);
                } else if class == "K2Node_Event" {
                    actor_events.push(node);
                } else if graph.is_event(node) {
                    other.push(node);
                }
            }
            ColumnStyle::Simple => {
                if graph.is_event(node) || extra_root {
                    other.push(node);
                }
            }
        }
    }

    let top_most = |a: &NodeId, b: &NodeId| graph.y(*a).total_cmp(&graph.y(*b));
    match settings.format_all_column_style {
        ColumnStyle::NodeType => {
            extra.sort_by_key(|node| graph.pins_by_direction(*node, PinDirection::Input).len());
            let mut columns = vec![extra];
            for mut column in [actor_events, custom_events, input_events, component_events, other] {
                column.sort_by(top_most);
                columns.push(column);
            }
            columns
        }
        ColumnStyle::Simple => {
            other.sort_by(top_most);
            vec![other]
        }
    }
}

fn tree_bounds(cx: &LayoutCx, tree: &FormattedTree) -> Rect {
    cx.bounds_for_nodes(tree.nodes.iter().copied())
}

fn translate_tree(cx: &mut LayoutCx, tree: &FormattedTree, dx: f32, dy: f32) {
    for node in &tree.nodes {
        cx.graph.translate(*node, dx, dy);
    }
}

/// Moves `trees` into one column at `column_x`, the first root at y = 0 and
/// every later tree below the previous ones. Returns the column bounds.
fn stack_column(cx: &mut LayoutCx, trees: &[FormattedTree], column_x: f32, padding_y: f32) -> Option<Rect> {
    let mut column: Option<Rect> = None;
    for tree in trees {
        if !cx.graph.is_live(tree.root) {
            continue;
        }
        let (rx, ry) = cx.graph.position(tree.root);
        let dy = if column.is_none() { -ry } else { 0.0 };
        translate_tree(cx, tree, column_x - rx, dy);

        let current = tree_bounds(cx, tree);
        column = Some(match column {
            None => current,
            Some(bounds) => {
                let delta = bounds.bottom + padding_y - current.top;
                translate_tree(cx, tree, 0.0, delta);
                bounds.expand(&tree_bounds(cx, tree))
            }
        });
    }
    column
}

/// Formats every root tree and lays the trees out in columns. `format`
/// runs one formatter from a root and reports what it placed.
pub fn format_all<F>(cx: &mut LayoutCx, mut format: F) -> Vec<FormattedTree>
where
    F: FnMut(&mut LayoutCx, NodeId) -> Option<FormattedTree>,
{
    let columns = format_all_columns(cx.graph, cx.settings);
    let padding = cx.settings.format_all_padding;
    let result = match cx.settings.format_all_style {
        FormatAllStyle::Simple => simple_format_all(cx, &columns, padding.x, padding.y, &mut format),
        FormatAllStyle::Smart => smart_format_all(cx, &columns, padding.x, padding.y, &mut format),
    };
    debug!(trees = result.len(), "formatted all roots");
    result
}

fn simple_format_all<F>(
    cx: &mut LayoutCx,
    columns: &[Vec<NodeId>],
    padding_x: f32,
    padding_y: f32,
    format: &mut F,
) -> Vec<FormattedTree>
where
    F: FnMut(&mut LayoutCx, NodeId) -> Option<FormattedTree>,
{
    let mut formatted: BTreeSet<NodeId> = BTreeSet::new();
    let mut out = Vec::new();
    let mut column_x = 0.0;
    let mut iterations = 0usize;

    for column in columns {
        let mut trees = Vec::new();
        for node in column {
            iterations += 1;
            if iterations > MAX_FORMAT_ALL_ITERATIONS {
                warn!("format all did not finish, stopping");
                return out;
            }
            if formatted.contains(node) || !cx.graph.is_live(*node) {
                continue;
            }
            let Some(tree) = format(cx, *node) else {
                continue;
            };
            formatted.extend(tree.nodes.iter().copied());
            trees.push(tree);
        }
        if let Some(bounds) = stack_column(cx, &trees, column_x, padding_y) {
            column_x = bounds.right + padding_x;
        }
        out.extend(trees);
    }
    out
}

/// Formats every tree first, then builds columns from whichever trees
/// overlap the left-most remaining tree horizontally.
fn smart_format_all<F>(
    cx: &mut LayoutCx,
    columns: &[Vec<NodeId>],
    padding_x: f32,
    padding_y: f32,
    format: &mut F,
) -> Vec<FormattedTree>
where
    F: FnMut(&mut LayoutCx, NodeId) -> Option<FormattedTree>,
{
    let mut formatted: BTreeSet<NodeId> = BTreeSet::new();
    let mut pending: Vec<FormattedTree> = Vec::new();
    for node in columns.iter().flatten() {
        if formatted.contains(node) || !cx.graph.is_live(*node) {
            continue;
        }
        if let Some(tree) = format(cx, *node) {
            formatted.extend(tree.nodes.iter().copied());
            pending.push(tree);
        }
    }

    let mut out = Vec::new();
    let mut column_x = 0.0;
    let mut iterations = 0usize;
    while !pending.is_empty() {
        iterations += 1;
        if iterations > MAX_FORMAT_ALL_ITERATIONS {
            warn!("format all did not finish, stopping");
            break;
        }
        pending.sort_by(|a, b| {
            let (ax, ay) = cx.graph.position(a.root);
            let (bx, by) = cx.graph.position(b.root);
            ax.total_cmp(&bx).then(ay.total_cmp(&by))
        });

        let left_most = tree_bounds(cx, &pending[0]);
        let mut column_right = column_x + left_most.width();
        let mut in_column = vec![0];
        for (index, tree) in pending.iter().enumerate().skip(1) {
            let bounds = tree_bounds(cx, tree);
            if bounds.left < column_right {
                column_right = column_right.max(column_x + bounds.width());
                in_column.push(index);
            }
        }

        let mut column: Vec<FormattedTree> = Vec::new();
        for index in in_column.into_iter().rev() {
            column.push(pending.remove(index));
        }
        column.sort_by(|a, b| {
            let (ax, ay) = cx.graph.position(a.root);
            let (bx, by) = cx.graph.position(b.root);
            ay.total_cmp(&by).then(ax.total_cmp(&bx))
        });

        stack_column(cx, &column, column_x, padding_y);
        column_x = column_right + padding_x;
        out.extend(column);
    }
    out
}
