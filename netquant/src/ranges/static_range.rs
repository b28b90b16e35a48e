use tracing::trace;

use super::{LayerVisitor, apply_rule, range_rule};
use crate::{
    graph::{Graph, NodeId},
    quantization::{RangeTracker, Result},
};

/// Records literal, constant, aggregated or forwarded ranges without any sample data.
pub struct StaticRangePolicy<'a> {
    ranges: &'a mut RangeTracker,
}

impl<'a> StaticRangePolicy<'a> {
    pub fn new(ranges: &'a mut RangeTracker) -> Self {
        Self { ranges }
    }
}

impl LayerVisitor for StaticRangePolicy<'_> {
    fn visit(&mut self, graph: &Graph, id: NodeId) -> Result<()> {
        let layer = graph.layer(id)?;
        let rule = range_rule(layer);
        trace!("static range of {id} ({layer}): {rule:?}");
        apply_rule(graph, id, rule, self.ranges)
    }
}
