//! Builds the quantized copy of a network from the recorded ranges.
//!
//! Layers are visited in topological order and re-created one by one in a fresh [`Graph`].
//! Every connection of the original is reproduced, and the producing output slot of each
//! connection receives the quantization parameters computed from its recorded range. Constant
//! payloads are re-encoded on the way.
use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::{
    graph::{Edge, Graph, NodeId},
    layers::Layer,
    quantization::{
        QuantizationError, QuantizationScheme, RangeTracker, Result, quantize_bias,
        quantize_constant,
    },
    ranges::LayerVisitor,
    tensor::ConstTensor,
};

pub struct QuantizingRewriter<'a> {
    ranges: &'a RangeTracker,
    scheme: &'a dyn QuantizationScheme,
    preserve_type: bool,
    graph: Graph,
    /// Original node to the node of the new graph standing in for its outputs. Nodes of the new
    /// graph are reached through `graph` by id, so no map from new id to node is kept.
    mapping: HashMap<NodeId, NodeId>,
}

impl<'a> QuantizingRewriter<'a> {
    pub fn new(
        ranges: &'a RangeTracker,
        scheme: &'a dyn QuantizationScheme,
        preserve_type: bool,
    ) -> Self {
        Self {
            ranges,
            scheme,
            preserve_type,
            graph: Graph::new(),
            mapping: HashMap::new(),
        }
    }

    /// Hands over the quantized graph.
    pub fn finish(self) -> Graph {
        debug!(
            "quantized network: {} layers, {} original layers mapped",
            self.graph.len(),
            self.mapping.len()
        );
        self.graph
    }

    fn record(&mut self, original: NodeId, new: NodeId) {
        self.mapping.insert(original, new);
    }

    fn mapped(&self, original: NodeId) -> Result<NodeId> {
        self.mapping
            .get(&original)
            .copied()
            .ok_or(QuantizationError::TraversalOrder(original))
    }

    /// Reproduces every input connection of `original` on `new`, and stamps the quantization
    /// parameters of the source range onto the new producing slot.
    fn connect_quantized_inputs(
        &mut self,
        graph: &Graph,
        original: NodeId,
        new: NodeId,
    ) -> Result<()> {
        for index in 0..graph.node(original)?.num_inputs() {
            let source = graph.connection(original, index)?;
            let new_source = Edge::new(self.mapped(source.node)?, source.index);
            self.graph.connect(new_source, Edge::new(new, index))?;

            let mut info = graph.tensor_info(source)?.clone();
            if info.data_type.accepts_quantization_params() {
                let (min, max) = self.ranges.get_range(source.node, source.index)?;
                let params = self.scheme.compute_scheme(min.into(), max.into())?;
                info = info.with_quantization(self.scheme.data_type(), params.scale, params.offset);
                trace!(
                    "{new_source}: [{min}, {max}] -> scale {} offset {}",
                    params.scale, params.offset
                );
            } else {
                warn!("{new_source}: {} tensors keep their encoding", info.data_type);
            }
            self.graph.set_tensor_info(new_source, info)?;
        }
        Ok(())
    }

    /// Scale the scheme gives to the tensor feeding input 0 of `original`.
    fn input_scale(&self, graph: &Graph, original: NodeId) -> Result<f32> {
        let source = graph.connection(original, 0)?;
        // the producer must have been rewritten already
        self.mapped(source.node)?;
        let (min, max) = self.ranges.get_range(source.node, source.index)?;
        Ok(self.scheme.compute_scheme(min.into(), max.into())?.scale)
    }

    /// Quantized weights and bias of a weighted layer. The bias scale is the product of the
    /// input scale and the weight scale.
    fn weights_and_bias(
        &self,
        graph: &Graph,
        original: NodeId,
        weights: &ConstTensor,
        bias: Option<&ConstTensor>,
    ) -> Result<(ConstTensor, Option<ConstTensor>)> {
        let weights = quantize_constant(weights)?;
        let bias = bias
            .map(|bias| {
                let input_scale = self.input_scale(graph, original)?;
                quantize_bias(bias, input_scale, weights.info().quantization_scale)
            })
            .transpose()?;
        Ok((weights, bias))
    }

    /// Copy of `layer` with every constant payload re-encoded.
    fn quantized_layer(&self, graph: &Graph, original: NodeId, layer: &Layer) -> Result<Layer> {
        let layer = match layer {
            Layer::Constant(tensor) => Layer::Constant(quantize_constant(tensor)?),
            Layer::BatchNormalization {
                desc,
                mean,
                variance,
                beta,
                gamma,
            } => Layer::BatchNormalization {
                desc: desc.clone(),
                mean: quantize_constant(mean)?,
                variance: quantize_constant(variance)?,
                beta: quantize_constant(beta)?,
                gamma: quantize_constant(gamma)?,
            },
            Layer::Convolution2d {
                desc,
                weights,
                bias,
            } => {
                let (weights, bias) =
                    self.weights_and_bias(graph, original, weights, bias.as_ref())?;
                Layer::Convolution2d {
                    desc: desc.clone(),
                    weights,
                    bias,
                }
            }
            Layer::DepthwiseConvolution2d {
                desc,
                weights,
                bias,
            } => {
                let (weights, bias) =
                    self.weights_and_bias(graph, original, weights, bias.as_ref())?;
                Layer::DepthwiseConvolution2d {
                    desc: desc.clone(),
                    weights,
                    bias,
                }
            }
            Layer::FullyConnected {
                desc,
                weights,
                bias,
            } => {
                let (weights, bias) =
                    self.weights_and_bias(graph, original, weights, bias.as_ref())?;
                Layer::FullyConnected {
                    desc: desc.clone(),
                    weights,
                    bias,
                }
            }
            Layer::TransposeConvolution2d {
                desc,
                weights,
                bias,
            } => {
                let (weights, bias) =
                    self.weights_and_bias(graph, original, weights, bias.as_ref())?;
                Layer::TransposeConvolution2d {
                    desc: desc.clone(),
                    weights,
                    bias,
                }
            }
            Layer::Quantize | Layer::Dequantize | Layer::Debug(_) => {
                return Err(QuantizationError::Unsupported(layer.kind()));
            }
            other => other.clone(),
        };
        Ok(layer)
    }

    fn visit_input(&mut self, graph: &Graph, id: NodeId, name: Option<&str>) -> Result<()> {
        let layer = graph.layer(id)?.clone();
        let original_info = graph.tensor_info(Edge::new(id, 0))?.clone();
        let input = self.graph.add_layer(layer, name);
        if self.preserve_type && original_info.data_type.is_float() {
            let quantize = self.graph.add_layer(Layer::Quantize, None);
            self.graph
                .connect(Edge::new(input, 0), Edge::new(quantize, 0))?;
            self.graph.set_tensor_info(Edge::new(input, 0), original_info)?;
            self.record(id, quantize);
        } else {
            self.record(id, input);
        }
        Ok(())
    }

    fn visit_output(&mut self, graph: &Graph, id: NodeId, name: Option<&str>) -> Result<()> {
        let source_info = graph.tensor_info(graph.connection(id, 0)?)?.clone();
        let output = self.graph.add_layer(graph.layer(id)?.clone(), name);
        if self.preserve_type && source_info.data_type.is_float() {
            let dequantize = self.graph.add_layer(Layer::Dequantize, None);
            self.record(id, dequantize);
            self.connect_quantized_inputs(graph, id, dequantize)?;
            self.graph
                .connect(Edge::new(dequantize, 0), Edge::new(output, 0))?;
            self.graph
                .set_tensor_info(Edge::new(dequantize, 0), source_info)?;
        } else {
            self.record(id, output);
            self.connect_quantized_inputs(graph, id, output)?;
        }
        Ok(())
    }
}

impl LayerVisitor for QuantizingRewriter<'_> {
    fn visit(&mut self, graph: &Graph, id: NodeId) -> Result<()> {
        let node = graph.node(id)?;
        match node.layer() {
            Layer::Input(_) => self.visit_input(graph, id, node.name()),
            Layer::Output(_) => self.visit_output(graph, id, node.name()),
            layer => {
                let quantized = self.quantized_layer(graph, id, layer)?;
                let new = self.graph.add_layer(quantized, node.name());
                self.record(id, new);
                self.connect_quantized_inputs(graph, id, new)
            }
        }
    }
}
