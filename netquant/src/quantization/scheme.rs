//! Mapping of a float range to affine quantization parameters.
//!
//! A float `r` is represented by the integer `q` with `r = (q - offset) * scale`.
use serde::{Deserialize, Serialize};

use super::{QuantizationError, Result};
use crate::tensor::DataType;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OffsetScalePair {
    pub scale: f32,
    pub offset: i32,
}

/// Strategy deriving a scale and an offset from a `(min, max)` range for a fixed bit width.
pub trait QuantizationScheme: std::fmt::Debug + Send + Sync {
    fn compute_scheme(&self, min: f64, max: f64) -> Result<OffsetScalePair>;
    fn num_bits(&self) -> u32;
    fn data_type(&self) -> DataType;
}

fn check_bounds(min: f64, max: f64) -> Result<()> {
    // also rejects NaN bounds
    if !(min <= max) {
        return Err(QuantizationError::InvalidArgument(format!(
            "min > max will result in invalid quantization: [{min}, {max}]"
        )));
    }
    Ok(())
}

/// Asymmetric parameters: the range is extended to contain zero so that zero is exact.
fn asymmetric(min: f64, max: f64, bits: u32) -> Result<OffsetScalePair> {
    check_bounds(min, max)?;
    let min = min.min(0.0);
    let mut max = max.max(0.0);
    if min == 0.0 && max == 0.0 {
        max = 1.0;
    }
    let highest = ((1u64 << bits) - 1) as f64;
    let scale = (max - min) / highest;
    let offset = (-min / scale).clamp(0.0, highest).round();
    Ok(OffsetScalePair {
        scale: scale as f32,
        offset: offset as i32,
    })
}

/// Symmetric parameters: the widest bound decides the scale and the offset is always zero.
fn symmetric(min: f64, max: f64, bits: u32) -> Result<OffsetScalePair> {
    check_bounds(min, max)?;
    let max = if min == 0.0 && max == 0.0 { 1.0 } else { max };
    let highest = ((1u64 << (bits - 1)) - 1) as f64;
    let extent = min.abs().max(max.abs());
    Ok(OffsetScalePair {
        scale: (extent / highest) as f32,
        offset: 0,
    })
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QAsymmU8Scheme;

impl QuantizationScheme for QAsymmU8Scheme {
    fn compute_scheme(&self, min: f64, max: f64) -> Result<OffsetScalePair> {
        asymmetric(min, max, self.num_bits())
    }

    fn num_bits(&self) -> u32 {
        8
    }

    fn data_type(&self) -> DataType {
        DataType::QAsymmU8
    }
}

/// Same parameters as [`QAsymmU8Scheme`] with the offset moved into the signed range.
#[derive(Clone, Copy, Debug, Default)]
pub struct QAsymmS8Scheme;

impl QuantizationScheme for QAsymmS8Scheme {
    fn compute_scheme(&self, min: f64, max: f64) -> Result<OffsetScalePair> {
        let unsigned = asymmetric(min, max, self.num_bits())?;
        Ok(OffsetScalePair {
            offset: unsigned.offset - 128,
            ..unsigned
        })
    }

    fn num_bits(&self) -> u32 {
        8
    }

    fn data_type(&self) -> DataType {
        DataType::QAsymmS8
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QSymmS8Scheme;

impl QuantizationScheme for QSymmS8Scheme {
    fn compute_scheme(&self, min: f64, max: f64) -> Result<OffsetScalePair> {
        symmetric(min, max, self.num_bits())
    }

    fn num_bits(&self) -> u32 {
        8
    }

    fn data_type(&self) -> DataType {
        DataType::QSymmS8
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QSymmS16Scheme;

impl QuantizationScheme for QSymmS16Scheme {
    fn compute_scheme(&self, min: f64, max: f64) -> Result<OffsetScalePair> {
        symmetric(min, max, self.num_bits())
    }

    fn num_bits(&self) -> u32 {
        16
    }

    fn data_type(&self) -> DataType {
        DataType::QSymmS16
    }
}

/// Builds the scheme producing tensors of type `data_type`.
pub fn scheme_for(data_type: DataType) -> Result<Box<dyn QuantizationScheme>> {
    Ok(match data_type {
        DataType::QAsymmU8 => Box::new(QAsymmU8Scheme),
        DataType::QAsymmS8 => Box::new(QAsymmS8Scheme),
        DataType::QSymmS8 => Box::new(QSymmS8Scheme),
        DataType::QSymmS16 => Box::new(QSymmS16Scheme),
        other => {
            return Err(QuantizationError::InvalidArgument(format!(
                "unsupported quantization target {other}"
            )));
        }
    })
}
