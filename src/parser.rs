use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GraphType;
use crate::error::GraphError;
use crate::ir::{Graph, Node, NodeId, NodeKind, Pin, PinDirection, PinId, PinKind};
use crate::layout::NodeSizeCache;

/// Comment boxes without a declared size get this one.
const DEFAULT_COMMENT_SIZE: (f32, f32) = (400.0, 200.0);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_type: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
    #[serde(default)]
    pub links: Vec<LinkDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDocument {
    pub name: String,
    #[serde(default = "default_node_kind")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class: String,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pins: Vec<PinDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<CommentDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinDocument {
    pub name: String,
    pub direction: PinDirection,
    #[serde(default = "default_pin_kind")]
    pub kind: PinKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_y: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDocument {
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub depth: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_height: Option<f32>,
}

/// A wire between two pins, each written as `Node.pin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDocument {
    pub from: String,
    pub to: String,
}

fn default_node_kind() -> NodeKind {
    NodeKind::Normal
}

fn default_pin_kind() -> PinKind {
    PinKind::Parameter
}

/// A parsed document: the graph plus whatever the document said about it.
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub graph: Graph,
    pub graph_type: Option<GraphType>,
    /// Sizes declared in the document, keyed by the created node.
    pub sizes: NodeSizeCache,
}

pub fn parse_document(input: &str) -> Result<ParseOutput, GraphError> {
    let document: GraphDocument = serde_json::from_str(input)?;
    build_graph(&document)
}

pub fn build_graph(document: &GraphDocument) -> Result<ParseOutput, GraphError> {
    let mut graph = Graph::new();
    let mut sizes = NodeSizeCache::new();
    let mut by_name: BTreeMap<&str, NodeId> = BTreeMap::new();

    for node_doc in &document.nodes {
        if by_name.contains_key(node_doc.name.as_str()) {
            return Err(GraphError::DuplicateNode(node_doc.name.clone()));
        }
        let mut node = match node_doc.kind {
            NodeKind::Comment => {
                let width = node_doc.width.unwrap_or(DEFAULT_COMMENT_SIZE.0);
                let height = node_doc.height.unwrap_or(DEFAULT_COMMENT_SIZE.1);
                let mut comment = Node::comment(&node_doc.name, width, height);
                if let (Some(data), Some(info)) = (comment.comment.as_mut(), node_doc.comment.as_ref()) {
                    data.depth = info.depth;
                    if let Some(title_height) = info.title_height {
                        data.title_height = title_height;
                    }
                }
                comment
            }
            kind => Node::new(&node_doc.name, kind),
        };
        node = node.with_class(&node_doc.class).at(node_doc.x, node_doc.y);
        for pin_doc in &node_doc.pins {
            let mut pin = Pin::new(&pin_doc.name, pin_doc.direction, pin_doc.kind);
            pin.data_type = pin_doc.data_type.clone();
            pin.offset_y = pin_doc.offset_y;
            node = node.with_pin(pin);
        }

        let id = graph.add_node(node);
        if node_doc.kind != NodeKind::Comment
            && let (Some(width), Some(height)) = (node_doc.width, node_doc.height)
        {
            sizes.insert(id, width, height);
        }
        by_name.insert(&node_doc.name, id);
    }

    for node_doc in &document.nodes {
        let Some(info) = node_doc.comment.as_ref() else {
            continue;
        };
        let comment = by_name[node_doc.name.as_str()];
        for member in &info.members {
            let member = by_name
                .get(member.as_str())
                .copied()
                .ok_or_else(|| GraphError::UnknownNode(member.clone()))?;
            graph.add_node_to_comment(comment, member)?;
        }
    }

    for link in &document.links {
        let from = resolve_pin(&graph, &by_name, &link.from)?;
        let to = resolve_pin(&graph, &by_name, &link.to)?;
        if !graph.try_create_link(from, to) {
            return Err(GraphError::IncompatibleLink {
                from: link.from.clone(),
                to: link.to.clone(),
            });
        }
    }

    let graph_type = document
        .graph_type
        .as_deref()
        .and_then(|name| name.parse::<GraphType>().ok());
    debug!(
        nodes = graph.node_count(),
        links = document.links.len(),
        "parsed graph document"
    );
    Ok(ParseOutput {
        graph,
        graph_type,
        sizes,
    })
}

/// Resolves `Node.pin`. Node names may contain dots, so every split point
/// is tried from the left.
fn resolve_pin(graph: &Graph, by_name: &BTreeMap<&str, NodeId>, reference: &str) -> Result<PinId, GraphError> {
    for (index, _) in reference.match_indices('.') {
        let (node_name, pin_name) = (&reference[..index], &reference[index + 1..]);
        if let Some(node) = by_name.get(node_name)
            && let Some(pin) = graph.find_pin(*node, pin_name)
        {
            return Ok(pin);
        }
    }
    match reference.split_once('.') {
        Some((node_name, _)) if by_name.contains_key(node_name) => Err(GraphError::UnknownPin(reference.to_string())),
        Some((node_name, _)) => Err(GraphError::UnknownNode(node_name.to_string())),
        None => Err(GraphError::UnknownPin(reference.to_string())),
    }
}

/// Unique document names. Repeated names (synthesized knots) get the slot
/// index appended.
fn document_names(graph: &Graph) -> BTreeMap<NodeId, String> {
    let mut used = BTreeSet::new();
    let mut names = BTreeMap::new();
    for node in graph.node_ids() {
        let base = graph.name(node);
        let mut name = base.to_string();
        if !used.insert(name.clone()) {
            name = format!("{base}_{}", node.index());
            let mut suffix = 1;
            while !used.insert(name.clone()) {
                name = format!("{base}_{}_{suffix}", node.index());
                suffix += 1;
            }
        }
        names.insert(node, name);
    }
    names
}

/// Writes the graph back out in document form, measured sizes included.
pub fn to_document(graph: &Graph, graph_type: Option<GraphType>, sizes: &NodeSizeCache) -> GraphDocument {
    let names = document_names(graph);
    let name_of = |node: NodeId| names.get(&node).cloned().unwrap_or_default();

    let mut nodes = Vec::new();
    let mut links = Vec::new();
    for id in graph.node_ids() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let (width, height) = match node.comment.as_ref() {
            Some(data) => (Some(data.width), Some(data.height)),
            None => sizes
                .get(id)
                .map(|size| (Some(size.width), Some(size.height)))
                .unwrap_or((None, None)),
        };
        let comment = node.comment.as_ref().map(|data| CommentDocument {
            members: graph.comment_members(id).into_iter().map(name_of).collect(),
            depth: data.depth,
            title_height: Some(data.title_height),
        });
        let pins = node
            .pins
            .iter()
            .map(|pin| PinDocument {
                name: pin.name.clone(),
                direction: pin.direction,
                kind: pin.kind,
                data_type: pin.data_type.clone(),
                offset_y: pin.offset_y,
            })
            .collect();

        for pin in graph.pins_by_direction(id, PinDirection::Output) {
            for other in graph.linked_to(pin) {
                links.push(LinkDocument {
                    from: format!("{}.{}", name_of(id), graph.pin_name(pin)),
                    to: format!("{}.{}", name_of(other.node), graph.pin_name(*other)),
                });
            }
        }

        nodes.push(NodeDocument {
            name: name_of(id),
            kind: node.kind,
            class: node.class.clone(),
            x: node.x,
            y: node.y,
            width,
            height,
            pins,
            comment,
        });
    }

    GraphDocument {
        graph_type: graph_type.map(graph_type_name),
        nodes,
        links,
    }
}

fn graph_type_name(graph_type: GraphType) -> String {
    match graph_type {
        GraphType::Unknown => "unknown",
        GraphType::Blueprint => "blueprint",
        GraphType::SoundCue => "soundCue",
        GraphType::BehaviorTree => "behaviorTree",
        GraphType::MaterialGraph => "materialGraph",
        GraphType::NiagaraGraph => "niagaraGraph",
        GraphType::AnimGraph => "animGraph",
        GraphType::ControlRigGraph => "controlRigGraph",
        GraphType::MetasoundGraph => "metasoundGraph",
    }
    .to_string()
}
