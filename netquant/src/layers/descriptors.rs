//! Operator parameters that are not tensors. The rewriter copies them verbatim.
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::graph::Edge;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum DataLayout {
    #[default]
    Nchw,
    Nhwc,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgMinMaxFunction {
    Min,
    #[default]
    Max,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgMinMaxDescriptor {
    pub function: ArgMinMaxFunction,
    pub axis: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchNormalizationDescriptor {
    pub eps: f32,
    pub data_layout: DataLayout,
}

impl Default for BatchNormalizationDescriptor {
    fn default() -> Self {
        Self {
            eps: 1e-4,
            data_layout: DataLayout::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchToSpaceNdDescriptor {
    pub block_shape: Vec<usize>,
    pub crops: Vec<(usize, usize)>,
    pub data_layout: DataLayout,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceToBatchNdDescriptor {
    pub block_shape: Vec<usize>,
    pub pad_list: Vec<(usize, usize)>,
    pub data_layout: DataLayout,
}

/// Concatenation of `num_views` inputs along `axis`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OriginsDescriptor {
    pub num_views: usize,
    pub axis: usize,
}

impl OriginsDescriptor {
    pub fn new(num_views: usize, axis: usize) -> Self {
        Self { num_views, axis }
    }
}

/// Shared by plain, depthwise and transposed 2d convolutions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Convolution2dDescriptor {
    pub pad_left: usize,
    pub pad_right: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
    pub stride_x: usize,
    pub stride_y: usize,
    pub dilation_x: usize,
    pub dilation_y: usize,
    pub data_layout: DataLayout,
}

impl Default for Convolution2dDescriptor {
    fn default() -> Self {
        Self {
            pad_left: 0,
            pad_right: 0,
            pad_top: 0,
            pad_bottom: 0,
            stride_x: 1,
            stride_y: 1,
            dilation_x: 1,
            dilation_y: 1,
            data_layout: DataLayout::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FullyConnectedDescriptor {
    /// Weights are stored as `[outputs, inputs]` instead of `[inputs, outputs]`.
    pub transpose_weight_matrix: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanDescriptor {
    pub axis: Vec<usize>,
    pub keep_dims: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationDescriptor {
    pub norm_size: usize,
    pub alpha: f32,
    pub beta: f32,
    pub k: f32,
    pub data_layout: DataLayout,
}

impl Default for NormalizationDescriptor {
    fn default() -> Self {
        Self {
            norm_size: 5,
            alpha: 1e-4,
            beta: 0.75,
            k: 2.0,
            data_layout: DataLayout::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PadDescriptor {
    pub pad_list: Vec<(usize, usize)>,
    pub pad_value: f32,
}

/// Dimension mapping of Permute and Transpose layers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PermuteDescriptor {
    pub mappings: Vec<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolingAlgorithm {
    #[default]
    Max,
    Average,
    L2,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pooling2dDescriptor {
    pub algorithm: PoolingAlgorithm,
    pub pool_width: usize,
    pub pool_height: usize,
    pub stride_x: usize,
    pub stride_y: usize,
    pub padding: [usize; 4],
    pub data_layout: DataLayout,
}

impl Default for Pooling2dDescriptor {
    fn default() -> Self {
        Self {
            algorithm: PoolingAlgorithm::default(),
            pool_width: 2,
            pool_height: 2,
            stride_x: 2,
            stride_y: 2,
            padding: [0; 4],
            data_layout: DataLayout::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReshapeDescriptor {
    pub target_shape: Vec<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeMethod {
    #[default]
    NearestNeighbor,
    Bilinear,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResizeDescriptor {
    pub method: ResizeMethod,
    pub target_width: usize,
    pub target_height: usize,
    pub data_layout: DataLayout,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceDescriptor {
    pub begin: Vec<usize>,
    pub size: Vec<usize>,
}

/// Softmax and LogSoftmax parameters. A negative axis counts from the last dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxDescriptor {
    pub beta: f32,
    pub axis: i32,
}

impl Default for SoftmaxDescriptor {
    fn default() -> Self {
        Self {
            beta: 1.0,
            axis: -1,
        }
    }
}

/// Block size of SpaceToDepth and DepthToSpace layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpaceToDepthDescriptor {
    pub block_size: usize,
    pub data_layout: DataLayout,
}

impl Default for SpaceToDepthDescriptor {
    fn default() -> Self {
        Self {
            block_size: 1,
            data_layout: DataLayout::default(),
        }
    }
}

/// Split of one tensor into `view_sizes.len()` views.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewsDescriptor {
    pub view_sizes: Vec<Vec<usize>>,
    pub axis: usize,
}

impl ViewsDescriptor {
    pub fn num_views(&self) -> usize {
        self.view_sizes.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StackDescriptor {
    pub axis: usize,
    pub num_inputs: usize,
    pub input_shape: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StridedSliceDescriptor {
    pub begin: Vec<i32>,
    pub end: Vec<i32>,
    pub stride: Vec<i32>,
    pub begin_mask: i32,
    pub end_mask: i32,
    pub shrink_axis_mask: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ComparisonOperation {
    #[default]
    Equal,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    NotEqual,
}

/// Elementwise comparison of two tensors. The output holds Boolean values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonDescriptor {
    pub operation: ComparisonOperation,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum UnaryOperation {
    #[default]
    Abs,
    Exp,
    Sqrt,
    Rsqrt,
    Neg,
    LogicalNot,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementwiseUnaryDescriptor {
    pub operation: UnaryOperation,
}

/// Fills a tensor, whose shape is given by the input, with a single value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FillDescriptor {
    pub value: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceNormalizationDescriptor {
    pub gamma: f32,
    pub beta: f32,
    pub eps: f32,
    pub data_layout: DataLayout,
}

impl Default for InstanceNormalizationDescriptor {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            beta: 0.0,
            eps: 1e-12,
            data_layout: DataLayout::default(),
        }
    }
}

/// Calibration probe parameters: which output slot the probe observes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebugDescriptor {
    pub observed: Edge,
}
