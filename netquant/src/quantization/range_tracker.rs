use std::collections::HashMap;

use super::{QuantizationError, Result};
use crate::graph::NodeId;

/// `(min, max)` span of the values an output slot takes.
pub type MinMaxRange = (f32, f32);

/// Range assumed for an output slot nobody recorded, in static mode.
pub const DEFAULT_RANGE: MinMaxRange = (-15.0, 15.0);

/// Records the range of every `(node, output slot)` pair visited by a range policy.
///
/// In static mode a missing entry resolves to the default range. In dynamic mode a missing entry
/// is an error: the calibration must have produced every range the rewriter asks for.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeTracker {
    ranges: HashMap<NodeId, Vec<Option<MinMaxRange>>>,
    default_range: MinMaxRange,
    dynamic: bool,
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RANGE)
    }
}

fn check_range(layer: NodeId, slot: usize, min: f32, max: f32) -> Result<()> {
    if !(min <= max) {
        return Err(QuantizationError::InvalidArgument(format!(
            "range [{min}, {max}] for output {slot} of layer {layer} has min > max"
        )));
    }
    Ok(())
}

impl RangeTracker {
    pub fn new(default_range: MinMaxRange) -> Self {
        Self {
            ranges: HashMap::new(),
            default_range,
            dynamic: false,
        }
    }

    /// Records or overwrites the range of output `slot` of `layer`.
    pub fn set_range(&mut self, layer: NodeId, slot: usize, min: f32, max: f32) -> Result<()> {
        check_range(layer, slot, min, max)?;
        let slots = self.ranges.entry(layer).or_default();
        if slots.len() <= slot {
            slots.resize(slot + 1, None);
        }
        slots[slot] = Some((min, max));
        Ok(())
    }

    fn recorded(&self, layer: NodeId, slot: usize) -> Option<MinMaxRange> {
        self.ranges
            .get(&layer)
            .and_then(|slots| slots.get(slot).copied().flatten())
    }

    fn recorded_mut(&mut self, layer: NodeId, slot: usize) -> Result<&mut MinMaxRange> {
        self.ranges
            .get_mut(&layer)
            .and_then(|slots| slots.get_mut(slot))
            .and_then(Option::as_mut)
            .ok_or(QuantizationError::RangeNotFound { layer, slot })
    }

    pub fn get_range(&self, layer: NodeId, slot: usize) -> Result<MinMaxRange> {
        match self.recorded(layer, slot) {
            Some(range) => Ok(range),
            None if self.dynamic => Err(QuantizationError::RangeNotFound { layer, slot }),
            None => Ok(self.default_range),
        }
    }

    /// Recorded range, or the default range when nothing is recorded yet, in either mode.
    pub fn range_or_default(&self, layer: NodeId, slot: usize) -> MinMaxRange {
        self.recorded(layer, slot).unwrap_or(self.default_range)
    }

    /// Lowers the minimum of an existing entry if `new_min` is smaller.
    pub fn refine_min(&mut self, layer: NodeId, slot: usize, new_min: f32) -> Result<()> {
        let range = self.recorded_mut(layer, slot)?;
        if new_min < range.0 {
            range.0 = new_min;
        }
        Ok(())
    }

    /// Raises the maximum of an existing entry if `new_max` is larger.
    pub fn refine_max(&mut self, layer: NodeId, slot: usize, new_max: f32) -> Result<()> {
        let range = self.recorded_mut(layer, slot)?;
        if new_max > range.1 {
            range.1 = new_max;
        }
        Ok(())
    }

    /// Overwrites an existing entry.
    pub fn reset_min_max(&mut self, layer: NodeId, slot: usize, min: f32, max: f32) -> Result<()> {
        check_range(layer, slot, min, max)?;
        *self.recorded_mut(layer, slot)? = (min, max);
        Ok(())
    }

    pub fn has_ranges(&self, layer: NodeId) -> bool {
        self.ranges.contains_key(&layer)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of recorded `(node, slot)` entries.
    pub fn len(&self) -> usize {
        self.ranges.values().flatten().flatten().count()
    }

    pub fn reset(&mut self) {
        self.ranges.clear();
    }

    pub fn set_dynamic_mode(&mut self, dynamic: bool) {
        self.dynamic = dynamic;
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn default_range(&self) -> MinMaxRange {
        self.default_range
    }
}
