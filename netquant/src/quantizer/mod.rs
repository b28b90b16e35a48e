//! Public entry point of the quantization pass.
//!
//! A [`NetworkQuantizer`] works in one of two modes. Without any [`NetworkQuantizer::refine`]
//! call, [`NetworkQuantizer::export_network`] records literal per-kind ranges and rewrites the
//! network straight away. The first `refine` call switches to calibration instead: probes are
//! spliced into the network, every call runs one inference on sample data and widens the ranges
//! from what the probes observed, and the next export removes the probes and freezes the ranges.
mod options;

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use crate::{
    graph::Graph,
    layers::BindingId,
    quantization::{MinMaxRange, QuantizationError, RangeTracker, Result, scheme_for},
    ranges::{
        CalibrationPlan, DynamicRangePolicy, OverrideInputRangeVisitor, StaticRangePolicy,
        visit_layers,
    },
    rewriter::QuantizingRewriter,
    runtime::{InferenceRuntime, ReferenceRuntime},
    tensor::ConstTensor,
};
pub use options::{ACTIVATION_FORMAT_VAR, DEFAULT_RANGE_VAR, PRESERVE_TYPE_VAR, QuantizerOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantizerState {
    /// No calibration started, exports use the static ranges.
    Idle,
    /// Probes are in the network and at least one calibration pass went through.
    Calibrating,
    /// Calibration is over, the ranges are final.
    Done,
}

pub struct NetworkQuantizer<'a> {
    graph: &'a mut Graph,
    options: QuantizerOptions,
    ranges: RangeTracker,
    runtime: Box<dyn InferenceRuntime>,
    overrides: BTreeMap<BindingId, MinMaxRange>,
    state: QuantizerState,
    plan: Option<CalibrationPlan>,
    refine_count: usize,
}

impl<'a> NetworkQuantizer<'a> {
    pub fn new(graph: &'a mut Graph, options: QuantizerOptions) -> Self {
        let ranges = RangeTracker::new(options.default_range);
        Self {
            graph,
            options,
            ranges,
            runtime: Box::new(ReferenceRuntime),
            overrides: BTreeMap::new(),
            state: QuantizerState::Idle,
            plan: None,
            refine_count: 0,
        }
    }

    /// Replaces the backend running the calibration passes.
    pub fn with_runtime(mut self, runtime: impl InferenceRuntime + 'static) -> Self {
        self.runtime = Box::new(runtime);
        self
    }

    pub fn options(&self) -> &QuantizerOptions {
        &self.options
    }

    pub fn ranges(&self) -> &RangeTracker {
        &self.ranges
    }

    pub fn state(&self) -> QuantizerState {
        self.state
    }

    /// Forces the range of the Input layer bound to `binding`. The override is kept and wins
    /// over static and calibrated ranges alike. Unknown bindings are ignored.
    pub fn override_input_range(&mut self, binding: BindingId, min: f32, max: f32) -> Result<()> {
        if !(min <= max) {
            return Err(QuantizationError::InvalidArgument(format!(
                "override range [{min}, {max}] of input {binding} is not ordered"
            )));
        }
        if self.graph.find_input_layer(binding).is_none() {
            debug!("no input bound to {binding}, override only remembered");
        }
        self.overrides.insert(binding, (min, max));
        let inputs = self.graph.input_layers();
        visit_layers(
            self.graph,
            &inputs,
            &mut OverrideInputRangeVisitor::new(&mut self.ranges, binding, (min, max)),
        )
    }

    fn apply_overrides(&mut self) -> Result<()> {
        let inputs = self.graph.input_layers();
        for (binding, range) in &self.overrides {
            visit_layers(
                self.graph,
                &inputs,
                &mut OverrideInputRangeVisitor::new(&mut self.ranges, *binding, *range),
            )?;
        }
        Ok(())
    }

    /// Runs one calibration pass on `inputs`. The first call inserts the probes; any failure
    /// removes them again and brings the quantizer back to [`QuantizerState::Idle`].
    #[instrument(name = "NetworkQuantizer::refine", skip_all, fields(pass = self.refine_count))]
    pub fn refine(&mut self, inputs: &[(BindingId, ConstTensor)]) -> Result<()> {
        match self.state {
            QuantizerState::Done => {
                return Err(QuantizationError::InvalidArgument(
                    "calibration is over, the network was already exported".to_string(),
                ));
            }
            QuantizerState::Idle => self.start_calibration()?,
            QuantizerState::Calibrating => {}
        }
        if let Err(err) = self.calibration_pass(inputs) {
            warn!("calibration pass {} failed: {err}", self.refine_count);
            self.abort_calibration();
            return Err(err);
        }
        self.refine_count += 1;
        self.state = QuantizerState::Calibrating;
        Ok(())
    }

    fn start_calibration(&mut self) -> Result<()> {
        self.ranges.set_dynamic_mode(true);
        self.ranges.reset();
        self.refine_count = 0;
        match self.collect_dynamic_ranges() {
            Ok(plan) => {
                info!("calibration started with {} probes", plan.probes().len());
                self.plan = Some(plan);
                Ok(())
            }
            Err(err) => {
                self.abort_calibration();
                Err(err)
            }
        }
    }

    fn collect_dynamic_ranges(&mut self) -> Result<CalibrationPlan> {
        let order = self.graph.topological_sort()?;
        let mut policy = DynamicRangePolicy::new(&mut self.ranges);
        visit_layers(self.graph, &order, &mut policy)?;
        policy.finish_visit(self.graph)
    }

    fn calibration_pass(&mut self, inputs: &[(BindingId, ConstTensor)]) -> Result<()> {
        let observations = self
            .runtime
            .execute(self.graph, inputs)
            .map_err(QuantizationError::RuntimeFailure)?;
        for observation in &observations {
            let (node, slot) = (observation.observed.node, observation.observed.index);
            if self.refine_count == 0 {
                // data replaces the literal starting range
                self.ranges
                    .reset_min_max(node, slot, observation.min, observation.max)?;
            } else {
                self.ranges.refine_min(node, slot, observation.min)?;
                self.ranges.refine_max(node, slot, observation.max)?;
            }
        }
        debug!(
            "calibration pass {} refined {} ranges",
            self.refine_count,
            observations.len()
        );
        Ok(())
    }

    fn remove_probes(&mut self) {
        if let Some(mut plan) = self.plan.take() {
            if let Err(err) = plan.remove_debug_layers(self.graph) {
                warn!("failed to remove the calibration probes: {err}");
            }
        }
    }

    fn abort_calibration(&mut self) {
        self.remove_probes();
        self.ranges.reset();
        self.ranges.set_dynamic_mode(false);
        self.refine_count = 0;
        self.state = QuantizerState::Idle;
    }

    /// Builds the quantized copy of the network. Without calibration the static ranges are
    /// recomputed on every call; after calibration the first call freezes the ranges and the
    /// next ones reuse them.
    #[instrument(name = "NetworkQuantizer::export_network", skip_all, fields(state = ?self.state))]
    pub fn export_network(&mut self) -> Result<Graph> {
        let scheme = scheme_for(self.options.activation_format)?;
        match self.state {
            QuantizerState::Idle => {
                self.ranges.set_dynamic_mode(false);
                self.ranges.reset();
                let order = self.graph.topological_sort()?;
                visit_layers(
                    self.graph,
                    &order,
                    &mut StaticRangePolicy::new(&mut self.ranges),
                )?;
                self.apply_overrides()?;
            }
            QuantizerState::Calibrating => {
                let finalized = match self.plan.as_mut() {
                    Some(plan) => plan.visit_non_calibrated_layers(self.graph, &mut self.ranges),
                    None => Ok(()),
                };
                if let Err(err) = finalized {
                    self.abort_calibration();
                    return Err(err);
                }
                self.plan = None;
                self.apply_overrides()?;
                self.state = QuantizerState::Done;
                info!(
                    "calibration finished after {} passes, {} ranges",
                    self.refine_count,
                    self.ranges.len()
                );
            }
            QuantizerState::Done => {}
        }
        let order = self.graph.topological_sort()?;
        let mut rewriter =
            QuantizingRewriter::new(&self.ranges, scheme.as_ref(), self.options.preserve_type);
        visit_layers(self.graph, &order, &mut rewriter)?;
        Ok(rewriter.finish())
    }
}

impl Drop for NetworkQuantizer<'_> {
    fn drop(&mut self) {
        self.remove_probes();
    }
}
