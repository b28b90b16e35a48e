pub mod activation;
pub mod descriptors;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumDiscriminants, EnumString};

use crate::tensor::ConstTensor;
pub use activation::{ActivationDescriptor, ActivationFunction};
pub use descriptors::*;

/// Position of an Input or Output layer in the external I/O contract of a network.
pub type BindingId = i32;

/// Operator carried by a graph node, together with its parameters.
///
/// [`LayerKind`] is the parameter-less discriminant, used for dispatch tables and logging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(LayerKind), derive(Hash, Display, EnumString, Serialize, Deserialize))]
pub enum Layer {
    Input(BindingId),
    Output(BindingId),
    Activation(ActivationDescriptor),
    Addition,
    Subtraction,
    Multiplication,
    ArgMinMax(ArgMinMaxDescriptor),
    BatchNormalization {
        desc: BatchNormalizationDescriptor,
        mean: ConstTensor,
        variance: ConstTensor,
        beta: ConstTensor,
        gamma: ConstTensor,
    },
    BatchToSpaceNd(BatchToSpaceNdDescriptor),
    Comparison(ComparisonDescriptor),
    Concat(OriginsDescriptor),
    Constant(ConstTensor),
    Convolution2d {
        desc: Convolution2dDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
    },
    DepthToSpace(SpaceToDepthDescriptor),
    DepthwiseConvolution2d {
        desc: Convolution2dDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
    },
    ElementwiseUnary(ElementwiseUnaryDescriptor),
    Fill(FillDescriptor),
    FullyConnected {
        desc: FullyConnectedDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
    },
    InstanceNormalization(InstanceNormalizationDescriptor),
    LogSoftmax(SoftmaxDescriptor),
    Mean(MeanDescriptor),
    Normalization(NormalizationDescriptor),
    Pad(PadDescriptor),
    Permute(PermuteDescriptor),
    Pooling2d(Pooling2dDescriptor),
    Prelu,
    Reshape(ReshapeDescriptor),
    Resize(ResizeDescriptor),
    Slice(SliceDescriptor),
    Softmax(SoftmaxDescriptor),
    SpaceToBatchNd(SpaceToBatchNdDescriptor),
    SpaceToDepth(SpaceToDepthDescriptor),
    Splitter(ViewsDescriptor),
    Stack(StackDescriptor),
    StridedSlice(StridedSliceDescriptor),
    Transpose(PermuteDescriptor),
    TransposeConvolution2d {
        desc: Convolution2dDescriptor,
        weights: ConstTensor,
        bias: Option<ConstTensor>,
    },
    Quantize,
    Dequantize,
    /// Calibration probe, a pass-through operator observing one output slot.
    Debug(DebugDescriptor),
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        self.into()
    }

    pub fn num_inputs(&self) -> usize {
        match self {
            Layer::Input(_) | Layer::Constant(_) => 0,
            Layer::Addition
            | Layer::Subtraction
            | Layer::Multiplication
            | Layer::Comparison(_)
            | Layer::Prelu => 2,
            Layer::Concat(desc) => desc.num_views,
            Layer::Stack(desc) => desc.num_inputs,
            _ => 1,
        }
    }

    pub fn num_outputs(&self) -> usize {
        match self {
            Layer::Output(_) => 0,
            Layer::Splitter(desc) => desc.num_views(),
            _ => 1,
        }
    }

    pub fn binding_id(&self) -> Option<BindingId> {
        match self {
            Layer::Input(id) | Layer::Output(id) => Some(*id),
            _ => None,
        }
    }

    /// Weights of the layers that multiply their input by a constant tensor.
    pub fn weights(&self) -> Option<&ConstTensor> {
        match self {
            Layer::Convolution2d { weights, .. }
            | Layer::DepthwiseConvolution2d { weights, .. }
            | Layer::FullyConnected { weights, .. }
            | Layer::TransposeConvolution2d { weights, .. } => Some(weights),
            _ => None,
        }
    }

    pub fn bias(&self) -> Option<&ConstTensor> {
        match self {
            Layer::Convolution2d { bias, .. }
            | Layer::DepthwiseConvolution2d { bias, .. }
            | Layer::FullyConnected { bias, .. }
            | Layer::TransposeConvolution2d { bias, .. } => bias.as_ref(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Input(id) => write!(f, "Input({id})"),
            Layer::Output(id) => write!(f, "Output({id})"),
            Layer::Activation(desc) => write!(f, "Activation({})", desc.function),
            Layer::Debug(desc) => write!(f, "Debug({})", desc.observed),
            _ => write!(f, "{}", self.kind()),
        }
    }
}
