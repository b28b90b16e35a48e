//! Post-training static quantization of inference graphs.
//!
//! The pass records a value range for every output slot of a float network, either from literal
//! per-kind ranges or from calibration runs on sample data, derives scale and offset pairs from
//! those ranges for the requested encoding and rewrites the network into a quantized copy.
//!
//! ```ignore
//! let mut quantizer = NetworkQuantizer::new(&mut network, QuantizerOptions::default());
//! quantizer.refine(&samples)?;
//! let quantized = quantizer.export_network()?;
//! ```
pub mod graph;
pub mod layers;
pub mod quantization;
pub mod quantizer;
pub mod ranges;
pub mod rewriter;
pub mod runtime;
pub mod tensor;

#[cfg(test)]
mod testing;

pub use graph::{Edge, Graph, GraphError, NodeId};
pub use layers::{BindingId, Layer, LayerKind};
pub use quantization::{
    MinMaxRange, OffsetScalePair, QuantizationError, QuantizationScheme, RangeTracker, Result,
    scheme_for,
};
pub use quantizer::{NetworkQuantizer, QuantizerOptions, QuantizerState};
pub use runtime::{InferenceRuntime, ProbeObservation, ReferenceRuntime};
pub use tensor::{ConstTensor, DataType, TensorData, TensorInfo};
