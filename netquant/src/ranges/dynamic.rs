use tracing::{debug, trace, warn};

use super::{
    LayerVisitor, RangeRule, aggregate_input_ranges, apply_rule, forward_parent_range, range_rule,
};
use crate::{
    graph::{Edge, Graph, NodeId},
    layers::Layer,
    quantization::{RangeTracker, Result},
};

/// What a calibration run does with a layer once real data flowed through the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    /// The output is probed and its range refined from observed values.
    Calibrated,
    /// The range is copied from the parent once the parent range is final.
    NonCalibrated,
}

/// Bucket of a layer in a calibration run, `None` for constants and probes whose range never
/// depends on the sample data.
pub fn calibration_bucket(layer: &Layer) -> Option<Bucket> {
    match (layer, range_rule(layer)) {
        (Layer::Debug(_), _) | (_, RangeRule::FromConstant) => None,
        (Layer::Output(_), _) | (_, RangeRule::Forward) => Some(Bucket::NonCalibrated),
        _ => Some(Bucket::Calibrated),
    }
}

/// Collection walk of a calibration run. It records the starting range of every layer and
/// tags the layers into the calibrated and non-calibrated buckets.
pub struct DynamicRangePolicy<'a> {
    ranges: &'a mut RangeTracker,
    plan: CalibrationPlan,
}

impl<'a> DynamicRangePolicy<'a> {
    pub fn new(ranges: &'a mut RangeTracker) -> Self {
        Self {
            ranges,
            plan: CalibrationPlan::default(),
        }
    }

    /// Inserts a probe behind every calibrated layer and hands over the plan. If an insertion
    /// fails, the probes inserted so far are removed before the error is returned.
    pub fn finish_visit(self, graph: &mut Graph) -> Result<CalibrationPlan> {
        let mut plan = self.plan;
        plan.watermark = Some(graph.high_watermark());
        for id in plan.calibrated.clone() {
            match graph.insert_debug_layer_after(id) {
                Ok(probes) => plan.probes.extend(probes),
                Err(err) => {
                    plan.remove_debug_layers(graph)?;
                    return Err(err.into());
                }
            }
        }
        debug!(
            "calibration plan: {} calibrated, {} non calibrated, {} probes",
            plan.calibrated.len(),
            plan.non_calibrated.len(),
            plan.probes.len()
        );
        Ok(plan)
    }
}

impl LayerVisitor for DynamicRangePolicy<'_> {
    fn visit(&mut self, graph: &Graph, id: NodeId) -> Result<()> {
        let layer = graph.layer(id)?;
        let rule = range_rule(layer);
        match calibration_bucket(layer) {
            None => {
                apply_rule(graph, id, rule, self.ranges)?;
            }
            Some(Bucket::NonCalibrated) => self.plan.non_calibrated.push(id),
            Some(Bucket::Calibrated) => {
                match (layer, rule) {
                    (Layer::Input(_), _) => self.ranges.set_range(id, 0, 0.0, 0.0)?,
                    (_, RangeRule::Aggregate) => {
                        // deferred parents have no range yet, count them with the default one
                        let union = aggregate_input_ranges(graph, id, |source| {
                            Ok(self.ranges.range_or_default(source.node, source.index))
                        })?;
                        if let Some((min, max)) = union {
                            self.ranges.set_range(id, 0, min, max)?;
                        }
                    }
                    (_, RangeRule::Untracked) => {
                        // no literal range for this kind, start from the default one
                        let (min, max) = self.ranges.default_range();
                        for slot in 0..graph.node(id)?.num_outputs() {
                            self.ranges.set_range(id, slot, min, max)?;
                        }
                    }
                    _ => apply_rule(graph, id, rule, self.ranges)?,
                }
                self.plan.calibrated.push(id);
            }
        }
        trace!("dynamic range of {id} ({layer}): {rule:?}");
        Ok(())
    }
}

/// Outcome of the collection walk: the buckets and the probes currently in the graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationPlan {
    calibrated: Vec<NodeId>,
    non_calibrated: Vec<NodeId>,
    probes: Vec<NodeId>,
    /// Arena length before the first probe went in.
    watermark: Option<usize>,
}

impl CalibrationPlan {
    pub fn calibrated(&self) -> &[NodeId] {
        &self.calibrated
    }

    pub fn non_calibrated(&self) -> &[NodeId] {
        &self.non_calibrated
    }

    pub fn probes(&self) -> &[NodeId] {
        &self.probes
    }

    /// Splices every probe out of the graph: the observed output slot is reconnected to every
    /// input the probe fed, then the probe is erased. The arena is then cut back to its length
    /// before the probes went in, which leaves the graph as it was. Calling it again is a no-op.
    pub fn remove_debug_layers(&mut self, graph: &mut Graph) -> Result<()> {
        for probe in std::mem::take(&mut self.probes) {
            if !graph.contains(probe) {
                warn!("probe {probe} is already gone from the graph");
                continue;
            }
            let probe_in = Edge::new(probe, 0);
            let probe_out = Edge::new(probe, 0);
            let source = graph.connection(probe, 0)?;
            graph.disconnect(source, probe_in)?;
            for consumer in graph.connections(probe_out)?.to_vec() {
                graph.disconnect(probe_out, consumer)?;
                graph.connect(source, consumer)?;
            }
            graph.erase_layer(probe)?;
            trace!("removed probe {probe} after {source}");
        }
        if let Some(watermark) = self.watermark.take() {
            graph.truncate(watermark)?;
        }
        Ok(())
    }

    /// Removes the probes, then gives every non-calibrated layer the final range of its parent.
    pub fn visit_non_calibrated_layers(
        &mut self,
        graph: &mut Graph,
        ranges: &mut RangeTracker,
    ) -> Result<()> {
        self.remove_debug_layers(graph)?;
        for id in &self.non_calibrated {
            forward_parent_range(graph, *id, ranges)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        layers::{OriginsDescriptor, ReshapeDescriptor, SoftmaxDescriptor},
        quantization::QuantizationError,
        ranges::visit_layers,
        tensor::ConstTensor,
        testing::relu_layer as relu,
    };

    /// input -> relu1 -> relu2, relu1 -> add.0, relu2 -> add.1, add -> output
    fn branching() -> (Graph, [NodeId; 5]) {
        let mut g = Graph::new();
        let input = g.add_layer(Layer::Input(0), Some("input"));
        let relu1 = g.add_layer(relu(), Some("relu1"));
        let relu2 = g.add_layer(relu(), Some("relu2"));
        let add = g.add_layer(Layer::Addition, Some("add"));
        let output = g.add_layer(Layer::Output(0), Some("output"));
        g.connect(Edge::new(input, 0), Edge::new(relu1, 0)).unwrap();
        g.connect(Edge::new(relu1, 0), Edge::new(relu2, 0)).unwrap();
        g.connect(Edge::new(relu1, 0), Edge::new(add, 0)).unwrap();
        g.connect(Edge::new(relu2, 0), Edge::new(add, 1)).unwrap();
        g.connect(Edge::new(add, 0), Edge::new(output, 0)).unwrap();
        (g, [input, relu1, relu2, add, output])
    }

    fn collect(graph: &mut Graph, ranges: &mut RangeTracker) -> CalibrationPlan {
        ranges.set_dynamic_mode(true);
        let order = graph.topological_sort().unwrap();
        let mut policy = DynamicRangePolicy::new(ranges);
        visit_layers(graph, &order, &mut policy).unwrap();
        policy.finish_visit(graph).unwrap()
    }

    #[test]
    fn test_buckets() {
        assert_eq!(calibration_bucket(&Layer::Input(0)), Some(Bucket::Calibrated));
        assert_eq!(calibration_bucket(&Layer::Addition), Some(Bucket::Calibrated));
        assert_eq!(calibration_bucket(&relu()), Some(Bucket::Calibrated));
        assert_eq!(
            calibration_bucket(&Layer::Softmax(SoftmaxDescriptor::default())),
            Some(Bucket::Calibrated)
        );
        assert_eq!(calibration_bucket(&Layer::Output(0)), Some(Bucket::NonCalibrated));
        assert_eq!(
            calibration_bucket(&Layer::Reshape(ReshapeDescriptor::default())),
            Some(Bucket::NonCalibrated)
        );
        let constant = ConstTensor::from_f32(vec![1], vec![1.0]).unwrap();
        assert_eq!(calibration_bucket(&Layer::Constant(constant)), None);
    }

    #[test]
    fn test_collection_inserts_probes() {
        let (mut g, [input, relu1, relu2, add, output]) = branching();
        let original = g.clone();
        let mut ranges = RangeTracker::default();
        let plan = collect(&mut g, &mut ranges);

        assert_eq!(plan.calibrated(), &[input, relu1, relu2, add]);
        assert_eq!(plan.non_calibrated(), &[output]);
        assert_eq!(plan.probes().len(), 4);
        assert_eq!(g.debug_layers().len(), 4);
        assert_eq!(ranges.get_range(input, 0).unwrap(), (0.0, 0.0));
        assert_eq!(ranges.get_range(relu1, 0).unwrap(), (0.0, 15.0));
        assert_eq!(ranges.get_range(add, 0).unwrap(), (-20.0, 20.0));
        // the output range is deferred
        assert!(matches!(
            ranges.get_range(output, 0),
            Err(QuantizationError::RangeNotFound { .. })
        ));
        assert_ne!(g, original);
    }

    #[test]
    fn test_remove_debug_layers_restores_topology() {
        let (mut g, [_, relu1, relu2, add, _]) = branching();
        let original = g.clone();
        let mut ranges = RangeTracker::default();
        let mut plan = collect(&mut g, &mut ranges);
        plan.remove_debug_layers(&mut g).unwrap();

        assert!(g.debug_layers().is_empty());
        assert!(plan.probes().is_empty());
        assert_eq!(
            g.connections(Edge::new(relu1, 0)).unwrap(),
            &[Edge::new(relu2, 0), Edge::new(add, 0)]
        );
        assert_eq!(g.connection(add, 1).unwrap(), Edge::new(relu2, 0));
        let (fresh, _) = branching();
        assert_eq!(g.topological_sort().unwrap(), fresh.topological_sort().unwrap());

        assert_eq!(g, original);

        // second call is a no-op
        plan.remove_debug_layers(&mut g).unwrap();
        assert_eq!(g.len(), 5);
    }

    #[test]
    fn test_repeated_runs_do_not_grow_the_arena() {
        let (mut g, _) = branching();
        let original = g.clone();
        for _ in 0..3 {
            let mut ranges = RangeTracker::default();
            let mut plan = collect(&mut g, &mut ranges);
            plan.visit_non_calibrated_layers(&mut g, &mut ranges).unwrap();
            assert_eq!(g, original);
            assert_eq!(g.high_watermark(), original.high_watermark());
        }
    }

    #[test]
    fn test_concat_of_deferred_parent_starts_from_default() {
        // input -> reshape -> concat.0, input -> concat.1
        let mut g = Graph::new();
        let input = g.add_layer(Layer::Input(0), None);
        let reshape = g.add_layer(
            Layer::Reshape(ReshapeDescriptor {
                target_shape: vec![1, 4],
            }),
            None,
        );
        let concat = g.add_layer(Layer::Concat(OriginsDescriptor::new(2, 1)), None);
        let output = g.add_layer(Layer::Output(0), None);
        g.connect(Edge::new(input, 0), Edge::new(reshape, 0)).unwrap();
        g.connect(Edge::new(reshape, 0), Edge::new(concat, 0)).unwrap();
        g.connect(Edge::new(input, 0), Edge::new(concat, 1)).unwrap();
        g.connect(Edge::new(concat, 0), Edge::new(output, 0)).unwrap();

        let mut ranges = RangeTracker::new((-4.0, 2.0));
        let mut plan = collect(&mut g, &mut ranges);
        assert!(plan.calibrated().contains(&concat));
        assert_eq!(plan.non_calibrated(), &[reshape, output]);
        // default range of the reshape joined with the (0, 0) of the input
        assert_eq!(ranges.get_range(concat, 0).unwrap(), (-4.0, 2.0));

        ranges.reset_min_max(input, 0, -1.0, 3.0).unwrap();
        plan.visit_non_calibrated_layers(&mut g, &mut ranges).unwrap();
        assert_eq!(ranges.get_range(reshape, 0).unwrap(), (-1.0, 3.0));
    }

    #[test]
    fn test_non_calibrated_layers_follow_final_parent_range() {
        let (mut g, [_, _, _, add, output]) = branching();
        let mut ranges = RangeTracker::default();
        let mut plan = collect(&mut g, &mut ranges);
        ranges.reset_min_max(add, 0, -77.0, 98.0).unwrap();
        plan.visit_non_calibrated_layers(&mut g, &mut ranges).unwrap();
        assert!(g.debug_layers().is_empty());
        assert_eq!(ranges.get_range(output, 0).unwrap(), (-77.0, 98.0));
    }

    #[test]
    fn test_untracked_kinds_start_from_default() {
        let mut g = Graph::new();
        let a = g.add_layer(Layer::Input(0), None);
        let b = g.add_layer(Layer::Input(1), None);
        let sub = g.add_layer(Layer::Subtraction, None);
        let output = g.add_layer(Layer::Output(0), None);
        g.connect(Edge::new(a, 0), Edge::new(sub, 0)).unwrap();
        g.connect(Edge::new(b, 0), Edge::new(sub, 1)).unwrap();
        g.connect(Edge::new(sub, 0), Edge::new(output, 0)).unwrap();
        let mut ranges = RangeTracker::new((-3.0, 3.0));
        let plan = collect(&mut g, &mut ranges);
        assert!(plan.calibrated().contains(&sub));
        assert_eq!(ranges.get_range(sub, 0).unwrap(), (-3.0, 3.0));
    }
}
