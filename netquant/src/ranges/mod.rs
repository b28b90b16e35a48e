//! Range policies decide, per layer kind, the range recorded for every output slot.
//!
//! All the policies share the rule table of [`range_rule`] and walk the graph through the
//! [`LayerVisitor`] abstraction, in topological order so that the ranges of the inputs of a
//! layer are known when the layer is visited.
mod dynamic;
mod override_input;
mod static_range;

use tracing::trace;

use crate::{
    graph::{Edge, Graph, NodeId},
    layers::{ActivationDescriptor, ActivationFunction, Layer},
    quantization::{MinMaxRange, QuantizationError, RangeTracker, Result},
};
pub use dynamic::{Bucket, CalibrationPlan, DynamicRangePolicy, calibration_bucket};
pub use override_input::OverrideInputRangeVisitor;
pub use static_range::StaticRangePolicy;

/// Something that visits the layers of a graph one at a time.
pub trait LayerVisitor {
    fn visit(&mut self, graph: &Graph, id: NodeId) -> Result<()>;
}

/// Visits the layers of `order` with `visitor`, stopping at the first error.
pub fn visit_layers<V: LayerVisitor + ?Sized>(
    graph: &Graph,
    order: &[NodeId],
    visitor: &mut V,
) -> Result<()> {
    for id in order {
        visitor.visit(graph, *id)?;
    }
    Ok(())
}

/// How the range of a layer kind is obtained.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RangeRule {
    /// Literal range, independent of the data.
    Fixed(MinMaxRange),
    /// Min and max of the embedded constant tensor.
    FromConstant,
    /// Union of the ranges of all the inputs.
    Aggregate,
    /// Range of input 0, for layers that move values around without changing them.
    Forward,
    /// Nothing is recorded.
    Untracked,
}

pub fn range_rule(layer: &Layer) -> RangeRule {
    match layer {
        Layer::Activation(desc) => RangeRule::Fixed(activation_range(desc)),
        Layer::Addition => RangeRule::Fixed((-20.0, 20.0)),
        Layer::Softmax(_) => RangeRule::Fixed((0.0, 1.0)),
        Layer::BatchNormalization { .. }
        | Layer::Convolution2d { .. }
        | Layer::DepthwiseConvolution2d { .. }
        | Layer::FullyConnected { .. }
        | Layer::Normalization(_)
        | Layer::TransposeConvolution2d { .. } => RangeRule::Fixed((-15.0, 15.0)),
        Layer::Constant(_) => RangeRule::FromConstant,
        Layer::Concat(_) => RangeRule::Aggregate,
        Layer::ArgMinMax(_)
        | Layer::BatchToSpaceNd(_)
        | Layer::DepthToSpace(_)
        | Layer::Permute(_)
        | Layer::Pooling2d(_)
        | Layer::Reshape(_)
        | Layer::Resize(_)
        | Layer::Slice(_)
        | Layer::SpaceToBatchNd(_)
        | Layer::SpaceToDepth(_)
        | Layer::Splitter(_)
        | Layer::StridedSlice(_)
        | Layer::Transpose(_) => RangeRule::Forward,
        // default range when static, calibrated from it otherwise
        Layer::Comparison(_)
        | Layer::ElementwiseUnary(_)
        | Layer::Fill(_)
        | Layer::InstanceNormalization(_) => RangeRule::Untracked,
        _ => RangeRule::Untracked,
    }
}

pub fn activation_range(desc: &ActivationDescriptor) -> MinMaxRange {
    match desc.function {
        ActivationFunction::Abs
        | ActivationFunction::Linear
        | ActivationFunction::ReLu
        | ActivationFunction::SoftReLu => (0.0, 15.0),
        ActivationFunction::BoundedReLu => (0.0, desc.a),
        ActivationFunction::TanH => (-1.0, 1.0),
        ActivationFunction::LeakyReLu => (-5.0, 15.0),
        _ => (-15.0, 15.0),
    }
}

/// Records the range of `id` according to `rule`.
pub(crate) fn apply_rule(
    graph: &Graph,
    id: NodeId,
    rule: RangeRule,
    ranges: &mut RangeTracker,
) -> Result<()> {
    match rule {
        RangeRule::Fixed((min, max)) => ranges.set_range(id, 0, min, max),
        RangeRule::FromConstant => {
            let (min, max) = constant_range(graph.layer(id)?)?;
            ranges.set_range(id, 0, min, max)
        }
        RangeRule::Aggregate => {
            let union = aggregate_input_ranges(graph, id, |source| {
                ranges.get_range(source.node, source.index)
            })?;
            if let Some((min, max)) = union {
                ranges.set_range(id, 0, min, max)?;
            }
            Ok(())
        }
        RangeRule::Forward => forward_parent_range(graph, id, ranges),
        RangeRule::Untracked => Ok(()),
    }
}

fn constant_range(layer: &Layer) -> Result<MinMaxRange> {
    let Layer::Constant(tensor) = layer else {
        return Err(QuantizationError::InvalidArgument(format!(
            "{layer} does not hold constant data"
        )));
    };
    let values = tensor.min_max().map_err(|_| {
        QuantizationError::InvalidArgument(format!(
            "constant of type {} cannot be quantized, only Float32 is supported",
            tensor.data_type()
        ))
    })?;
    Ok(values.unwrap_or((0.0, 0.0)))
}

/// Union of the ranges `range_of` gives for the producers of every input of `id`.
pub(crate) fn aggregate_input_ranges(
    graph: &Graph,
    id: NodeId,
    range_of: impl Fn(Edge) -> Result<MinMaxRange>,
) -> Result<Option<MinMaxRange>> {
    let node = graph.node(id)?;
    let mut union: Option<MinMaxRange> = None;
    for index in 0..node.num_inputs() {
        let source = graph.connection(id, index)?;
        let (min, max) = range_of(source)?;
        union = Some(match union {
            Some((lo, hi)) => (lo.min(min), hi.max(max)),
            None => (min, max),
        });
    }
    Ok(union)
}

/// Copies the range of input 0 onto every output slot of `id`. A layer without output slots,
/// like an Output layer, still gets slot 0.
pub(crate) fn forward_parent_range(
    graph: &Graph,
    id: NodeId,
    ranges: &mut RangeTracker,
) -> Result<()> {
    let source = graph.connection(id, 0)?;
    let (min, max) = ranges.get_range(source.node, source.index)?;
    let slots = graph.node(id)?.num_outputs().max(1);
    for slot in 0..slots {
        ranges.set_range(id, slot, min, max)?;
    }
    trace!("forwarded [{min}, {max}] from {source} to {id}");
    Ok(())
}
