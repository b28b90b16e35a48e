use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

use crate::{
    layers::{Layer, LayerKind},
    tensor::TensorInfo,
};

/// Stable identity of a node inside a [`super::Graph`]. Ids are never reused.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    From,
    Display,
)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Represents one slot of a node: the output slot `index` of the producer when it describes
/// a source, the input slot `index` of the consumer when it describes a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{node}:{index}")]
pub struct Edge {
    pub node: NodeId,
    pub index: usize,
}

impl Edge {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

/// Output slot of a node: its tensor description and every input slot it feeds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSlot {
    pub(crate) info: TensorInfo,
    // an output can be used as input by many nodes
    pub(crate) connections: Vec<Edge>,
}

impl OutputSlot {
    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    pub fn connections(&self) -> &[Edge] {
        &self.connections
    }
}

/// Represents a node in a graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub(crate) name: Option<String>,
    pub(crate) layer: Layer,
    // source output slot of each input, `None` while the input is not connected
    pub(crate) inputs: Vec<Option<Edge>>,
    pub(crate) outputs: Vec<OutputSlot>,
}

impl Node {
    pub(crate) fn new(layer: Layer, name: Option<String>) -> Self {
        Self {
            inputs: vec![None; layer.num_inputs()],
            outputs: vec![OutputSlot::default(); layer.num_outputs()],
            name,
            layer,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    pub fn kind(&self) -> LayerKind {
        self.layer.kind()
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Source of input slot `index`, if connected.
    pub fn input(&self, index: usize) -> Option<Edge> {
        self.inputs.get(index).copied().flatten()
    }

    pub fn inputs(&self) -> &[Option<Edge>] {
        &self.inputs
    }

    pub fn output(&self, index: usize) -> Option<&OutputSlot> {
        self.outputs.get(index)
    }

    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    /// Name used in logs and generated node names.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.kind().to_string(),
        }
    }
}
