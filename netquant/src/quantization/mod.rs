//! Module that takes care of deriving quantization parameters and re-encoding constant tensors
pub mod error;
mod range_tracker;
mod scheme;

use rayon::prelude::*;
use tracing::trace;

use crate::tensor::{ConstTensor, DataType, TensorInfo};
pub use error::{QuantizationError, Result};
pub use range_tracker::{DEFAULT_RANGE, MinMaxRange, RangeTracker};
pub use scheme::{
    OffsetScalePair, QAsymmS8Scheme, QAsymmU8Scheme, QSymmS8Scheme, QSymmS16Scheme,
    QuantizationScheme, scheme_for,
};

/// Re-encodes a float parameter tensor (weights, statistics, constant data) as `QAsymmU8`,
/// with parameters derived from the tensor's own data range.
pub fn quantize_constant(tensor: &ConstTensor) -> Result<ConstTensor> {
    if tensor.data_type() != DataType::Float32 {
        return Err(QuantizationError::InvalidArgument(format!(
            "cannot quantize a constant of type {}",
            tensor.data_type()
        )));
    }
    let (min, max) = tensor.min_max()?.unwrap_or((0.0, 0.0));
    let params = QAsymmU8Scheme.compute_scheme(f64::from(min), f64::from(max))?;
    trace!(
        "constant {:?} in [{min}, {max}] -> scale {} offset {}",
        tensor.shape(),
        params.scale,
        params.offset
    );
    Ok(tensor.quantize(DataType::QAsymmU8, params.scale, params.offset)?)
}

/// Re-encodes a bias as `Signed32` with `scale = input_scale * weight_scale` and a zero offset,
/// which is the scale of the integer accumulator the bias is added to.
pub fn quantize_bias(bias: &ConstTensor, input_scale: f32, weight_scale: f32) -> Result<ConstTensor> {
    let values = bias.as_f32().map_err(|_| {
        QuantizationError::InvalidArgument(format!(
            "cannot quantize a bias of type {}",
            bias.data_type()
        ))
    })?;
    let scale = input_scale * weight_scale;
    if !(scale.is_finite() && scale > 0.0) {
        return Err(QuantizationError::InvalidArgument(format!(
            "bias scale {input_scale} x {weight_scale} is not a positive number"
        )));
    }
    let inverse = 1.0 / scale;
    // truncation toward zero, saturating at the i32 bounds
    let data = values
        .par_iter()
        .map(|v| (v * inverse) as i32)
        .collect::<Vec<_>>();
    let info = TensorInfo::quantized(bias.shape().to_vec(), DataType::Signed32, scale, 0);
    Ok(ConstTensor::new(info, data)?)
}
