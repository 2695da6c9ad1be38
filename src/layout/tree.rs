use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{Graph, NodeId, PinDirection, PinLink};

/// Index of an entry in a [`FormatXTree`].
pub type InfoIndex = usize;

/// Spanning-tree entry: the link that placed a node and its place in the tree.
#[derive(Debug, Clone)]
pub struct FormatXInfo {
    pub link: PinLink,
    pub parent: Option<InfoIndex>,
    pub children: Vec<InfoIndex>,
}

impl FormatXInfo {
    pub fn node(&self) -> NodeId {
        self.link.node
    }
}

/// Spanning tree built by horizontal placement. Entries live in an arena and
/// reference each other by index; re-parenting moves an index between child
/// lists.
#[derive(Debug, Clone, Default)]
pub struct FormatXTree {
    infos: Vec<FormatXInfo>,
    by_node: BTreeMap<NodeId, InfoIndex>,
}

impl FormatXTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.infos.clear();
        self.by_node.clear();
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    /// Adds an entry for `link.node` attached under `parent`.
    pub fn insert(&mut self, link: PinLink, parent: Option<InfoIndex>) -> InfoIndex {
        let index = self.infos.len();
        self.infos.push(FormatXInfo {
            link,
            parent: None,
            children: Vec::new(),
        });
        self.set_parent(index, parent);
        self.by_node.insert(link.node, index);
        index
    }

    pub fn get(&self, node: NodeId) -> Option<InfoIndex> {
        self.by_node.get(&node).copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.by_node.contains_key(&node)
    }

    pub fn info(&self, index: InfoIndex) -> &FormatXInfo {
        &self.infos[index]
    }

    pub fn node(&self, index: InfoIndex) -> NodeId {
        self.infos[index].node()
    }

    pub fn parent_node(&self, index: InfoIndex) -> Option<NodeId> {
        self.infos[index].parent.map(|parent| self.node(parent))
    }

    pub fn set_link(&mut self, index: InfoIndex, link: PinLink) {
        self.infos[index].link = link;
    }

    /// Detaches the entry from its current parent and appends it to `parent`.
    pub fn set_parent(&mut self, index: InfoIndex, parent: Option<InfoIndex>) {
        if let Some(old) = self.infos[index].parent {
            self.infos[old].children.retain(|child| *child != index);
        }
        if let Some(new) = parent {
            self.infos[new].children.push(index);
        }
        self.infos[index].parent = parent;
    }

    pub fn immediate_children(&self, index: InfoIndex) -> Vec<NodeId> {
        self.infos[index]
            .children
            .iter()
            .map(|child| self.node(*child))
            .collect()
    }

    /// Descendants of an entry, optionally only those reached through links
    /// leaving in `direction`. With `initial_direction_only` the filter is
    /// applied to the first level only.
    pub fn children(
        &self,
        index: InfoIndex,
        graph: &Graph,
        direction: Option<PinDirection>,
        initial_direction_only: bool,
    ) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::from([self.node(index)]);
        let mut stack: Vec<(InfoIndex, bool)> = vec![(index, true)];
        while let Some((current, first_level)) = stack.pop() {
            for child in &self.infos[current].children {
                let info = &self.infos[*child];
                let filtered = !initial_direction_only || first_level;
                if filtered && direction.is_some_and(|dir| graph.link_direction(&info.link) != dir) {
                    continue;
                }
                if !seen.insert(info.node()) {
                    continue;
                }
                out.push(info.node());
                stack.push((*child, false));
            }
        }
        out
    }

    /// Links from this entry to its direct children leaving in `direction`.
    pub fn child_links(&self, index: InfoIndex, graph: &Graph, direction: PinDirection) -> Vec<PinLink> {
        self.infos[index]
            .children
            .iter()
            .map(|child| self.infos[*child].link)
            .filter(|link| graph.link_direction(link) == direction)
            .collect()
    }

    /// Walks parents up to the root; `None` if the walk revisits an entry.
    pub fn root_of(&self, index: InfoIndex) -> Option<InfoIndex> {
        let mut seen = BTreeSet::new();
        let mut current = index;
        while let Some(parent) = self.infos[current].parent {
            if !seen.insert(current) {
                return None;
            }
            current = parent;
        }
        Some(current)
    }

    /// Every node registered in the tree with its parent node.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, Option<NodeId>)> + '_ {
        self.by_node
            .iter()
            .map(|(node, index)| (*node, self.parent_node(*index)))
    }

    pub fn indices(&self) -> impl Iterator<Item = InfoIndex> + '_ {
        self.by_node.values().copied()
    }
}
