use crate::{
    graph::{GraphError, NodeId},
    layers::LayerKind,
    tensor::TensorError,
};

pub type Result<T, E = QuantizationError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum QuantizationError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no range recorded for output {slot} of layer {layer}")]
    RangeNotFound { layer: NodeId, slot: usize },
    #[error("layer {0} was reached before the layers feeding it were quantized")]
    TraversalOrder(NodeId),
    #[error("layer kind {0} cannot be quantized")]
    Unsupported(LayerKind),
    #[error("calibration pass failed: {0}")]
    RuntimeFailure(anyhow::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl From<anyhow::Error> for QuantizationError {
    fn from(error: anyhow::Error) -> Self {
        QuantizationError::RuntimeFailure(error)
    }
}
