use std::collections::BTreeMap;

use tracing::trace;

use super::bounds::LayoutCx;
use super::formatter::EdGraphFormatter;
use crate::config::Padding;
use crate::ir::NodeId;

/// Lays out the members of one comment box on their own, then replays that
/// interior layout wherever the outer pass puts the entry node.
#[derive(Debug, Clone)]
pub struct CommentSubGraphFormatter {
    comment: NodeId,
    inner: Box<EdGraphFormatter>,
    entry: Option<NodeId>,
    /// member -> offset from the entry node
    offsets: BTreeMap<NodeId, (f32, f32)>,
    has_been_formatted: bool,
}

impl CommentSubGraphFormatter {
    pub fn new(comment: NodeId, members: Vec<NodeId>, padding: Padding, pin_padding: Padding) -> Self {
        Self {
            comment,
            inner: Box::new(EdGraphFormatter::new_comment_formatter(members, padding, pin_padding)),
            entry: None,
            offsets: BTreeMap::new(),
            has_been_formatted: false,
        }
    }

    pub fn comment(&self) -> NodeId {
        self.comment
    }

    pub fn has_been_formatted(&self) -> bool {
        self.has_been_formatted
    }

    /// Formats the members starting from `entry`, which keeps its position.
    pub fn format(&mut self, cx: &mut LayoutCx, entry: NodeId) {
        self.inner.format_node(cx, entry);
        let (ex, ey) = cx.graph.position(entry);
        self.offsets = self
            .inner
            .formatted_graph_nodes()
            .into_iter()
            .filter(|node| *node != entry && cx.graph.is_live(*node))
            .map(|node| {
                let (x, y) = cx.graph.position(node);
                (node, (x - ex, y - ey))
            })
            .collect();
        self.entry = Some(entry);
        self.has_been_formatted = true;
        trace!(
            comment = cx.graph.name(self.comment),
            members = self.offsets.len(),
            "formatted comment interior"
        );
    }

    /// Moves every member back to its offset from the entry's current
    /// position. Returns the members that were placed.
    pub fn apply(&self, cx: &mut LayoutCx) -> Vec<NodeId> {
        let Some(entry) = self.entry.filter(|entry| cx.graph.is_live(*entry)) else {
            return Vec::new();
        };
        let (ex, ey) = cx.graph.position(entry);
        let mut moved = Vec::with_capacity(self.offsets.len());
        for (node, (dx, dy)) in &self.offsets {
            if cx.graph.set_position(*node, ex + dx, ey + dy) {
                moved.push(*node);
            }
        }
        moved
    }
}
