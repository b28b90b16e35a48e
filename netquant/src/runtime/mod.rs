//! Execution backend used by calibration. The quantizer only needs to run the probe-augmented
//! network on sample inputs and to read back what every probe observed.
mod reference;

use crate::{
    graph::{Edge, Graph, NodeId},
    layers::BindingId,
    tensor::ConstTensor,
};
pub use reference::ReferenceRuntime;

/// Min and max of the values that went through a probe during one inference.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeObservation {
    pub probe: NodeId,
    /// Output slot the probe sits behind.
    pub observed: Edge,
    pub min: f32,
    pub max: f32,
}

pub trait InferenceRuntime {
    /// Runs one inference of `graph` on the sample tensors bound to its Input layers and returns
    /// the observations of every probe the data went through.
    fn execute(
        &mut self,
        graph: &Graph,
        inputs: &[(BindingId, ConstTensor)],
    ) -> anyhow::Result<Vec<ProbeObservation>>;
}
