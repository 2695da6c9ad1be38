use thiserror::Error;

use crate::ir::NodeId;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0:?} is no longer live")]
    DeadNode(NodeId),
    #[error("pin {index} does not exist on node {node:?}")]
    InvalidPin { node: NodeId, index: u16 },
    #[error("node {0:?} is not a comment")]
    NotAComment(NodeId),
    #[error("unknown node `{0}`")]
    UnknownNode(String),
    #[error("duplicate node name `{0}`")]
    DuplicateNode(String),
    #[error("unknown pin `{0}`")]
    UnknownPin(String),
    #[error("links `{from}` -> `{to}` are not compatible")]
    IncompatibleLink { from: String, to: String },
    #[error("failed to parse graph document: {0}")]
    Parse(#[from] serde_json::Error),
}
