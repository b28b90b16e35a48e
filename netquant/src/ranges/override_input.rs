use tracing::debug;

use super::LayerVisitor;
use crate::{
    graph::{Graph, NodeId},
    layers::{BindingId, Layer},
    quantization::{MinMaxRange, RangeTracker, Result},
};

/// Force-sets the range of the Input layer bound to `binding`. Other layers are left alone.
pub struct OverrideInputRangeVisitor<'a> {
    ranges: &'a mut RangeTracker,
    binding: BindingId,
    range: MinMaxRange,
}

impl<'a> OverrideInputRangeVisitor<'a> {
    pub fn new(ranges: &'a mut RangeTracker, binding: BindingId, range: MinMaxRange) -> Self {
        Self {
            ranges,
            binding,
            range,
        }
    }
}

impl LayerVisitor for OverrideInputRangeVisitor<'_> {
    fn visit(&mut self, graph: &Graph, id: NodeId) -> Result<()> {
        match graph.layer(id)? {
            Layer::Input(binding) if *binding == self.binding => {
                let (min, max) = self.range;
                debug!("input {binding} ({id}) range overridden to [{min}, {max}]");
                self.ranges.set_range(id, 0, min, max)
            }
            _ => Ok(()),
        }
    }
}
