use std::collections::{BTreeMap, BTreeSet};

use tracing::error;

use super::bounds::LayoutCx;
use super::types::{Margin, Rect};
use crate::ir::{Graph, NodeId};

/// Bounds larger than this are treated as corrupt comment geometry.
const SANITY_EXTENT: f32 = 99999.0;

/// Which comment boxes hold which nodes, restricted to the nodes being
/// formatted.
#[derive(Debug, Clone, Default)]
pub struct CommentHandler {
    /// node -> containing comments, deepest first
    parent_comments: BTreeMap<NodeId, Vec<NodeId>>,
    /// comment -> members that are part of the formatted tree
    comment_contains: BTreeMap<NodeId, Vec<NodeId>>,
    /// Nodes the handler was initialised for; `None` means every node.
    scope: Option<BTreeSet<NodeId>>,
}

impl CommentHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.parent_comments.clear();
        self.comment_contains.clear();
        self.scope = None;
    }

    /// Rebuilds both maps from the graph's comments, deepest comments first so
    /// every node lists its innermost container before the outer ones.
    pub fn init(&mut self, graph: &Graph, scope: Option<&[NodeId]>) {
        self.reset();
        self.scope = scope.map(|nodes| nodes.iter().copied().collect());

        let mut comments = graph.comments();
        comments.sort_by_key(|comment| {
            std::cmp::Reverse(graph.comment_data(*comment).map(|data| data.depth).unwrap_or(0))
        });

        for comment in comments {
            for member in graph.comment_members(comment) {
                if graph.is_comment(member) || !self.in_scope(member) {
                    continue;
                }
                self.parent_comments.entry(member).or_default().push(comment);
                self.comment_contains.entry(comment).or_default().push(member);
            }
        }
    }

    fn in_scope(&self, node: NodeId) -> bool {
        self.scope.as_ref().is_none_or(|scope| scope.contains(&node))
    }

    pub fn is_empty(&self) -> bool {
        self.comment_contains.is_empty()
    }

    pub fn parent_comments(&self, node: NodeId) -> &[NodeId] {
        self.parent_comments
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_parent_comment(&self, node: NodeId, comment: NodeId) -> bool {
        self.parent_comments(node).contains(&comment)
    }

    pub fn comments(&self) -> impl Iterator<Item = (NodeId, &[NodeId])> + '_ {
        self.comment_contains
            .iter()
            .map(|(comment, members)| (*comment, members.as_slice()))
    }

    pub fn contained_nodes(&self, comment: NodeId) -> &[NodeId] {
        self.comment_contains
            .get(&comment)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Bounds a comment needs to wrap its members: the union of its
    /// non-comment members and nested comments the asking node is not
    /// inside, plus comment padding and the title bar.
    pub fn comment_bounds(&self, cx: &LayoutCx, comment: NodeId, asking: Option<NodeId>) -> Rect {
        let graph: &Graph = &*cx.graph;
        let members = graph.comment_members(comment);
        if members.is_empty() {
            return cx.node_bounds(comment);
        }

        let (nested, nodes): (Vec<NodeId>, Vec<NodeId>) =
            members.into_iter().partition(|member| graph.is_comment(*member));

        let mut bounds = Rect::union_all(nodes.iter().map(|node| cx.node_bounds(*node)));
        for inner in nested {
            if graph.comment_members(inner).is_empty() {
                continue;
            }
            if asking.is_some_and(|node| self.has_parent_comment(node, inner)) {
                continue;
            }
            let inner_bounds = self.comment_bounds(cx, inner, asking);
            bounds = Some(match bounds {
                Some(current) => current.expand(&inner_bounds),
                None => inner_bounds,
            });
        }

        let Some(bounds) = bounds else {
            return cx.node_bounds(comment);
        };
        let padding = cx.settings.comment_node_padding;
        let title = graph
            .comment_data(comment)
            .map(|data| data.title_height)
            .unwrap_or(0.0);
        bounds.extend_by(Margin::new(padding.x, padding.y + title, padding.x, padding.y))
    }

    /// Bounds of `node` grown to every comment holding it that does not also
    /// hold `asking`. Non-comment members of those comments are added to
    /// `relative_nodes` since they move as one block.
    pub fn relative_node_bounds(
        &self,
        cx: &LayoutCx,
        node: NodeId,
        asking: Option<NodeId>,
        base: Rect,
        node_tree: &BTreeSet<NodeId>,
        relative_nodes: &mut BTreeSet<NodeId>,
    ) -> Rect {
        let graph: &Graph = &*cx.graph;
        let mut bounds = base;
        let asking_comments = asking.map(|a| self.parent_comments(a)).unwrap_or(&[]);

        for comment in self.parent_comments(node) {
            if asking_comments.contains(comment) {
                continue;
            }
            let members = graph.comment_members(*comment);
            let Some(first) = members.first().copied() else {
                continue;
            };

            let comment_tree = graph.node_tree_with_filter(first, |_, link| members.contains(&link.node));
            let malformed = members.iter().any(|member| {
                !graph.is_comment(*member)
                    && !graph.is_knot(*member)
                    && (!comment_tree.contains(member) || !node_tree.contains(member))
            });
            if malformed {
                continue;
            }

            let shares_member = asking_comments
                .iter()
                .filter(|other| *other != comment)
                .filter(|other| !graph.comment_members(**other).contains(comment))
                .any(|other| {
                    graph
                        .comment_members(*other)
                        .iter()
                        .any(|member| members.contains(member))
                });
            if shares_member {
                continue;
            }

            bounds = bounds.expand(&self.comment_bounds(cx, *comment, asking));
            relative_nodes.extend(
                members
                    .iter()
                    .copied()
                    .filter(|member| !graph.is_comment(*member)),
            );
        }

        let sentinel = Rect::new(-SANITY_EXTENT, -SANITY_EXTENT, SANITY_EXTENT, SANITY_EXTENT);
        if !bounds.is_finite() || !sentinel.contains(&bounds) {
            error!(
                node = graph.name(node),
                ?bounds,
                "relative bounds out of range, using node bounds"
            );
            relative_nodes.clear();
            return base;
        }
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::ir::{Node, NodeKind, Pin};
    use crate::layout::bounds::NodeSizeCache;

    fn exec_node(graph: &mut Graph, name: &str, x: f32, y: f32) -> NodeId {
        graph.add_node(
            Node::new(name, NodeKind::Normal)
                .at(x, y)
                .with_pin(Pin::exec_in("exec"))
                .with_pin(Pin::exec_out("then")),
        )
    }

    #[test]
    fn nodes_list_innermost_comment_first() {
        let mut graph = Graph::new();
        let a = exec_node(&mut graph, "A", 0.0, 0.0);
        let outer = graph.add_node(Node::comment("Outer", 800.0, 800.0));
        let inner = graph.add_node(Node::comment("Inner", 400.0, 400.0));
        graph.node_mut(inner).unwrap().comment.as_mut().unwrap().depth = 1;
        graph.add_node_to_comment(outer, a).unwrap();
        graph.add_node_to_comment(outer, inner).unwrap();
        graph.add_node_to_comment(inner, a).unwrap();

        let mut handler = CommentHandler::new();
        handler.init(&graph, None);
        assert_eq!(handler.parent_comments(a), &[inner, outer]);
        assert_eq!(handler.contained_nodes(outer), &[a]);
    }

    #[test]
    fn comment_bounds_pad_members_and_title() {
        let mut graph = Graph::new();
        let a = exec_node(&mut graph, "A", 100.0, 100.0);
        let comment = graph.add_node(Node::comment("Group", 10.0, 10.0));
        graph.add_node_to_comment(comment, a).unwrap();
        let sizes = NodeSizeCache::new();
        let settings = Settings::default();
        let cx = LayoutCx::new(&mut graph, &sizes, &settings);
        let handler = CommentHandler::new();
        let bounds = handler.comment_bounds(&cx, comment, None);
        let node = cx.node_bounds(a);
        assert_eq!(bounds.left, node.left - 30.0);
        assert_eq!(bounds.top, node.top - 30.0 - 36.0);
        assert_eq!(bounds.bottom, node.bottom + 30.0);
    }
}
