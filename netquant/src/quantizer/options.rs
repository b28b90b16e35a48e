use std::env;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    quantization::{DEFAULT_RANGE, MinMaxRange},
    tensor::DataType,
};

pub const ACTIVATION_FORMAT_VAR: &str = "NETQUANT_ACTIVATION_FORMAT";
pub const PRESERVE_TYPE_VAR: &str = "NETQUANT_PRESERVE_TYPE";
pub const DEFAULT_RANGE_VAR: &str = "NETQUANT_DEFAULT_RANGE";

/// Settings of one quantization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerOptions {
    /// Encoding of the activations. One of `QAsymmU8`, `QAsymmS8`, `QSymmS8` and `QSymmS16`.
    pub activation_format: DataType,
    /// Keep float network inputs and outputs, with Quantize and Dequantize layers at the
    /// boundaries.
    pub preserve_type: bool,
    /// Accepted and carried along for the backend that runs the quantized network. The
    /// quantization pass itself does not read it.
    pub reduce_fp32_to_fp16: bool,
    /// Range of the slots no policy recorded anything for in static mode, and starting range of
    /// the calibrated layers without a literal one.
    pub default_range: MinMaxRange,
}

impl Default for QuantizerOptions {
    fn default() -> Self {
        Self {
            activation_format: DataType::QAsymmU8,
            preserve_type: false,
            reduce_fp32_to_fp16: false,
            default_range: DEFAULT_RANGE,
        }
    }
}

impl QuantizerOptions {
    pub fn new(activation_format: DataType) -> Self {
        Self {
            activation_format,
            ..Default::default()
        }
    }

    pub fn with_activation_format(mut self, activation_format: DataType) -> Self {
        self.activation_format = activation_format;
        self
    }

    pub fn with_preserve_type(mut self, preserve_type: bool) -> Self {
        self.preserve_type = preserve_type;
        self
    }

    pub fn with_reduce_fp32_to_fp16(mut self, reduce: bool) -> Self {
        self.reduce_fp32_to_fp16 = reduce;
        self
    }

    pub fn with_default_range(mut self, default_range: MinMaxRange) -> Self {
        self.default_range = default_range;
        self
    }

    /// Defaults overlaid with the `NETQUANT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overlaid with the values `lookup` returns for the `NETQUANT_*` keys. Values that
    /// do not parse are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(value) = lookup(ACTIVATION_FORMAT_VAR) {
            match value.trim().parse::<DataType>() {
                Ok(format) => options.activation_format = format,
                Err(_) => warn!("ignoring {ACTIVATION_FORMAT_VAR}={value}: unknown data type"),
            }
        }
        if let Some(value) = lookup(PRESERVE_TYPE_VAR) {
            match value.trim().parse::<bool>() {
                Ok(preserve) => options.preserve_type = preserve,
                Err(_) => warn!("ignoring {PRESERVE_TYPE_VAR}={value}: expected true or false"),
            }
        }
        if let Some(value) = lookup(DEFAULT_RANGE_VAR) {
            match parse_range(&value) {
                Some(range) => options.default_range = range,
                None => warn!("ignoring {DEFAULT_RANGE_VAR}={value}: expected `min,max`"),
            }
        }
        options
    }
}

fn parse_range(value: &str) -> Option<MinMaxRange> {
    let (min, max) = value.split_once(',')?;
    let min = min.trim().parse::<f32>().ok()?;
    let max = max.trim().parse::<f32>().ok()?;
    (min <= max).then_some((min, max))
}
