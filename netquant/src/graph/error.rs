use super::{Edge, NodeId};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
    #[error("node {node} has no input slot {index}")]
    InputSlotOutOfRange { node: NodeId, index: usize },
    #[error("node {node} has no output slot {index}")]
    OutputSlotOutOfRange { node: NodeId, index: usize },
    #[error("input slot {0} is already connected")]
    AlreadyConnected(Edge),
    #[error("input slot {0} is not connected")]
    MissingConnection(Edge),
    #[error("no connection from output {from} to input {to}")]
    EdgeNotFound { from: Edge, to: Edge },
    #[error("graph contains a cycle through {0} node(s)")]
    Cycle(usize),
    #[error("node {node} is still in the graph above watermark {watermark}")]
    LiveAboveWatermark { node: NodeId, watermark: usize },
}
