mod bounds;
mod change;
mod comment_graph;
mod comments;
mod format_all;
mod format_x;
mod format_y;
mod formatter;
mod parameter;
mod roots;
mod routing;
mod simple;
mod tree;
pub(crate) mod types;

pub use bounds::{KNOT_HEIGHT, KNOT_WIDTH, LayoutCx, NodeSize, NodeSizeCache, provisional_size};
pub use change::ChangeTracker;
pub use comment_graph::CommentSubGraphFormatter;
pub use comments::CommentHandler;
pub use format_all::{FormattedTree, format_all, format_all_columns};
pub use formatter::{EdGraphFormatter, FormatterParameters};
pub use parameter::ParameterFormatter;
pub use roots::{root_node, sort_by_direction, top_most_with_filter};
pub use routing::{KnotCreation, KnotTrack};
pub use simple::SimpleFormatter;
pub use tree::{FormatXInfo, FormatXTree, InfoIndex};
pub use types::*;

use tracing::info;

use crate::config::{FormatterEngine, GraphType, Settings};
use crate::ir::{Graph, NodeId, PinDirection};

/// The layout engine chosen for a graph type.
#[derive(Debug, Clone)]
pub enum GraphFormatter {
    Full(EdGraphFormatter),
    Simple(SimpleFormatter),
}

impl GraphFormatter {
    /// Formatter for `graph_type`, `None` when formatting is disabled or the
    /// type has no settings.
    pub fn for_graph(settings: &Settings, graph_type: GraphType, params: FormatterParameters) -> Option<Self> {
        let Some(entry) = settings.formatter_settings(graph_type) else {
            info!(?graph_type, "no formatter for graph type");
            return None;
        };
        Some(match entry.engine {
            FormatterEngine::Full => Self::Full(EdGraphFormatter::new(params, entry.padding, entry.pin_padding)),
            FormatterEngine::Simple => Self::Simple(SimpleFormatter::new(params, entry.direction, entry.padding)),
        })
    }

    pub fn format_node(&mut self, cx: &mut LayoutCx, node: NodeId) {
        match self {
            Self::Full(formatter) => formatter.format_node(cx, node),
            Self::Simple(formatter) => formatter.format_node(cx, node),
        }
    }

    pub fn formatted_nodes(&self) -> Vec<NodeId> {
        match self {
            Self::Full(formatter) => formatter.formatted_nodes(),
            Self::Simple(formatter) => formatter.formatted_nodes().to_vec(),
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        match self {
            Self::Full(formatter) => formatter.root(),
            Self::Simple(formatter) => formatter.root(),
        }
    }

    /// Direction the layout grows in; root selection walks against it.
    pub fn direction(&self) -> PinDirection {
        match self {
            Self::Full(_) => PinDirection::Output,
            Self::Simple(formatter) => formatter.direction(),
        }
    }

    pub fn set_params(&mut self, params: FormatterParameters) {
        match self {
            Self::Full(formatter) => formatter.set_params(params),
            Self::Simple(formatter) => formatter.set_params(params),
        }
    }

    pub fn invalidate(&mut self) {
        match self {
            Self::Full(formatter) => formatter.invalidate(),
            Self::Simple(formatter) => formatter.invalidate(),
        }
    }

    pub fn knot_count(&self) -> usize {
        match self {
            Self::Full(formatter) => formatter.knot_nodes().len(),
            Self::Simple(_) => 0,
        }
    }
}

/// One-shot formatting: picks the root for `node`, runs the formatter for
/// `graph_type` and returns it with its results. `None` when the graph type
/// has no formatter or no root can be found.
pub fn format_graph(
    graph: &mut Graph,
    sizes: &NodeSizeCache,
    settings: &Settings,
    graph_type: GraphType,
    node: NodeId,
    params: FormatterParameters,
) -> Option<GraphFormatter> {
    let mut formatter = GraphFormatter::for_graph(settings, graph_type, params.clone())?;
    let root = root_node(graph, settings, node, &params.nodes_to_format, formatter.direction())?;
    let mut cx = LayoutCx::new(graph, sizes, settings);
    formatter.format_node(&mut cx, root);
    Some(formatter)
}
