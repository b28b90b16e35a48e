//! Arena graph of layers. Nodes live in a growable vector and are addressed by [`NodeId`];
//! connections are pairs of [`Edge`]s, one on the producer output side and one on the consumer
//! input side.
pub mod error;
mod node;

use std::{cmp::Reverse, collections::BinaryHeap};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    layers::{BindingId, DebugDescriptor, Layer, LayerKind},
    tensor::TensorInfo,
};
pub use error::GraphError;
pub use node::{Edge, Node, NodeId, OutputSlot};

pub type Result<T, E = GraphError> = std::result::Result<T, E>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    // erased nodes leave a hole so that ids stay stable
    nodes: Vec<Option<Node>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a disconnected node. Slot counts derive from the layer.
    pub fn add_layer(&mut self, layer: Layer, name: Option<&str>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(Some(Node::new(layer, name.map(str::to_string))));
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(GraphError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn layer(&self, id: NodeId) -> Result<&Layer> {
        self.node(id).map(Node::layer)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i), n)))
    }

    fn output_slot(&self, slot: Edge) -> Result<&OutputSlot> {
        self.node(slot.node)?
            .outputs
            .get(slot.index)
            .ok_or(GraphError::OutputSlotOutOfRange {
                node: slot.node,
                index: slot.index,
            })
    }

    fn output_slot_mut(&mut self, slot: Edge) -> Result<&mut OutputSlot> {
        self.node_mut(slot.node)?
            .outputs
            .get_mut(slot.index)
            .ok_or(GraphError::OutputSlotOutOfRange {
                node: slot.node,
                index: slot.index,
            })
    }

    fn input_slot_mut(&mut self, slot: Edge) -> Result<&mut Option<Edge>> {
        self.node_mut(slot.node)?
            .inputs
            .get_mut(slot.index)
            .ok_or(GraphError::InputSlotOutOfRange {
                node: slot.node,
                index: slot.index,
            })
    }

    /// Connects output slot `from` to input slot `to`. An input accepts a single connection.
    pub fn connect(&mut self, from: Edge, to: Edge) -> Result<()> {
        self.output_slot(from)?;
        let input = self.input_slot_mut(to)?;
        if input.is_some() {
            return Err(GraphError::AlreadyConnected(to));
        }
        *input = Some(from);
        self.output_slot_mut(from)?.connections.push(to);
        Ok(())
    }

    pub fn disconnect(&mut self, from: Edge, to: Edge) -> Result<()> {
        let connections = &mut self.output_slot_mut(from)?.connections;
        let position = connections
            .iter()
            .position(|e| *e == to)
            .ok_or(GraphError::EdgeNotFound { from, to })?;
        connections.remove(position);
        *self.input_slot_mut(to)? = None;
        Ok(())
    }

    /// Output slot feeding input slot `index` of `node`.
    pub fn connection(&self, node: NodeId, index: usize) -> Result<Edge> {
        let slot = Edge::new(node, index);
        self.node(node)?
            .inputs
            .get(index)
            .ok_or(GraphError::InputSlotOutOfRange { node, index })?
            .ok_or(GraphError::MissingConnection(slot))
    }

    /// Input slots fed by output slot `from`, in connection order.
    pub fn connections(&self, from: Edge) -> Result<&[Edge]> {
        Ok(&self.output_slot(from)?.connections)
    }

    pub fn tensor_info(&self, slot: Edge) -> Result<&TensorInfo> {
        Ok(&self.output_slot(slot)?.info)
    }

    pub fn set_tensor_info(&mut self, slot: Edge, info: TensorInfo) -> Result<()> {
        self.output_slot_mut(slot)?.info = info;
        Ok(())
    }

    /// Disconnects every slot of the node and removes it from the graph.
    pub fn erase_layer(&mut self, id: NodeId) -> Result<Node> {
        let node = self.node(id)?;
        let inputs = node
            .inputs
            .iter()
            .enumerate()
            .filter_map(|(i, src)| src.map(|src| (src, Edge::new(id, i))))
            .collect::<Vec<_>>();
        let outputs = node
            .outputs
            .iter()
            .enumerate()
            .flat_map(|(o, slot)| {
                slot.connections
                    .iter()
                    .map(move |dst| (Edge::new(id, o), *dst))
            })
            .collect::<Vec<_>>();
        for (from, to) in inputs.into_iter().chain(outputs) {
            self.disconnect(from, to)?;
        }
        self.nodes[id.0].take().ok_or(GraphError::UnknownNode(id))
    }

    /// Length of the node arena, erased nodes included. Nodes added from now on get ids at or
    /// above it.
    pub fn high_watermark(&self) -> usize {
        self.nodes.len()
    }

    /// Shrinks the arena back to `watermark`, forgetting the holes left above it. Every node at
    /// or above the watermark must have been erased already.
    pub fn truncate(&mut self, watermark: usize) -> Result<()> {
        if let Some(live) = self.nodes().map(|(id, _)| id).find(|id| id.0 >= watermark) {
            return Err(GraphError::LiveAboveWatermark {
                node: live,
                watermark,
            });
        }
        self.nodes.truncate(watermark);
        Ok(())
    }

    fn layers_of_kind(&self, kind: LayerKind) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.kind() == kind)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn input_layers(&self) -> Vec<NodeId> {
        self.layers_of_kind(LayerKind::Input)
    }

    pub fn output_layers(&self) -> Vec<NodeId> {
        self.layers_of_kind(LayerKind::Output)
    }

    pub fn debug_layers(&self) -> Vec<NodeId> {
        self.layers_of_kind(LayerKind::Debug)
    }

    pub fn find_input_layer(&self, binding: BindingId) -> Option<NodeId> {
        self.nodes()
            .find(|(_, n)| matches!(n.layer, Layer::Input(id) if id == binding))
            .map(|(id, _)| id)
    }

    /// Orders the nodes so that every node comes after the producers of its inputs. Among the
    /// nodes ready at the same time the lowest id goes first, which makes the order deterministic.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>> {
        let mut pending = vec![0usize; self.nodes.len()];
        let mut ready = BinaryHeap::new();
        for (id, node) in self.nodes() {
            pending[id.0] = node.inputs.iter().flatten().count();
            if pending[id.0] == 0 {
                ready.push(Reverse(id));
            }
        }
        let mut order = Vec::with_capacity(pending.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for slot in &self.node(id)?.outputs {
                for consumer in &slot.connections {
                    pending[consumer.node.0] -= 1;
                    if pending[consumer.node.0] == 0 {
                        ready.push(Reverse(consumer.node));
                    }
                }
            }
        }
        let total = self.len();
        if order.len() != total {
            return Err(GraphError::Cycle(total - order.len()));
        }
        Ok(order)
    }

    /// Inserts a probe behind every connected output slot of `id`. The probe takes over all the
    /// consumers of the slot and copies its tensor info. Returns the new probes.
    pub fn insert_debug_layer_after(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let node = self.node(id)?;
        let label = node.label();
        let slots = node
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.connections.is_empty())
            .map(|(index, slot)| (index, slot.info.clone(), slot.connections.clone()))
            .collect::<Vec<_>>();

        let mut probes = Vec::with_capacity(slots.len());
        for (index, info, consumers) in slots {
            let observed = Edge::new(id, index);
            let name = format!("DebugLayerAfter{label}_{index}");
            let probe = self.add_layer(Layer::Debug(DebugDescriptor { observed }), Some(&name));
            let probe_out = Edge::new(probe, 0);
            for consumer in consumers {
                self.disconnect(observed, consumer)?;
                self.connect(probe_out, consumer)?;
            }
            self.connect(observed, Edge::new(probe, 0))?;
            self.set_tensor_info(probe_out, info)?;
            trace!("inserted probe {probe} after {observed}");
            probes.push(probe);
        }
        Ok(probes)
    }
}
