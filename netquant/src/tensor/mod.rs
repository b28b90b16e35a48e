//! Tensor descriptions and the constant buffers embedded in layers.
pub mod error;

use itertools::{Itertools, MinMaxResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use error::TensorError;

/// Element type of a tensor.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum DataType {
    #[default]
    Float32,
    Float16,
    QAsymmU8,
    QAsymmS8,
    QSymmS8,
    QSymmS16,
    Signed32,
    Signed64,
    Boolean,
}

impl DataType {
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float16)
    }

    pub fn is_quantized(&self) -> bool {
        matches!(
            self,
            DataType::QAsymmU8 | DataType::QAsymmS8 | DataType::QSymmS8 | DataType::QSymmS16
        )
    }

    /// Whether a tensor of this type may carry a scale and an offset.
    pub fn accepts_quantization_params(&self) -> bool {
        !matches!(
            self,
            DataType::Boolean | DataType::Signed32 | DataType::Signed64
        )
    }
}

/// Shape, element type and affine quantization parameters of a tensor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub shape: Vec<usize>,
    pub data_type: DataType,
    pub quantization_scale: f32,
    pub quantization_offset: i32,
}

impl TensorInfo {
    pub fn new(shape: Vec<usize>, data_type: DataType) -> Self {
        Self {
            shape,
            data_type,
            quantization_scale: 0.0,
            quantization_offset: 0,
        }
    }

    pub fn quantized(shape: Vec<usize>, data_type: DataType, scale: f32, offset: i32) -> Self {
        Self {
            shape,
            data_type,
            quantization_scale: scale,
            quantization_offset: offset,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns a copy of this info re-typed to `data_type` with the given parameters.
    pub fn with_quantization(&self, data_type: DataType, scale: f32, offset: i32) -> Self {
        Self::quantized(self.shape.clone(), data_type, scale, offset)
    }
}

macro_rules! tensor_data_constructor {
    ($(($t:ty, $var:ident, $name:literal)), *) => {
        /// Typed backing storage of a [`ConstTensor`].
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum TensorData {
            $( $var(Vec<$t>) ),*
        }

        impl TensorData {
            pub fn len(&self) -> usize {
                match self {
                    $( TensorData::$var(v) => v.len() ),*
                }
            }

            fn element_name(&self) -> &'static str {
                match self {
                    $( TensorData::$var(_) => $name ),*
                }
            }
        }

        $(
            impl From<Vec<$t>> for TensorData {
                fn from(data: Vec<$t>) -> Self {
                    TensorData::$var(data)
                }
            }
        )*
    };
}

tensor_data_constructor!(
    (f32, F32, "f32"),
    (u8, U8, "u8"),
    (i8, I8, "i8"),
    (i16, I16, "i16"),
    (i32, I32, "i32")
);

impl TensorData {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this buffer can hold the elements of a `data_type` tensor.
    fn backs(&self, data_type: DataType) -> bool {
        matches!(
            (self, data_type),
            (TensorData::F32(_), DataType::Float32)
                | (TensorData::U8(_), DataType::QAsymmU8 | DataType::Boolean)
                | (TensorData::I8(_), DataType::QAsymmS8 | DataType::QSymmS8)
                | (TensorData::I16(_), DataType::QSymmS16)
                | (TensorData::I32(_), DataType::Signed32)
        )
    }
}

/// Immutable tensor with its data, used for weights, biases and constant layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstTensor {
    info: TensorInfo,
    data: TensorData,
}

impl ConstTensor {
    pub fn new(info: TensorInfo, data: impl Into<TensorData>) -> Result<Self, TensorError> {
        let data = data.into();
        if data.len() != info.num_elements() {
            return Err(TensorError::LengthMismatch {
                shape: info.shape.clone(),
                expected: info.num_elements(),
                actual: data.len(),
            });
        }
        if !data.backs(info.data_type) {
            return Err(TensorError::TypeMismatch {
                data_type: info.data_type,
                found: data.element_name(),
            });
        }
        Ok(Self { info, data })
    }

    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
        Self::new(TensorInfo::new(shape, DataType::Float32), data)
    }

    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn data_type(&self) -> DataType {
        self.info.data_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.info.shape
    }

    pub fn as_f32(&self) -> Result<&[f32], TensorError> {
        match &self.data {
            TensorData::F32(v) => Ok(v),
            _ => Err(TensorError::UnsupportedType(self.info.data_type)),
        }
    }

    /// Smallest and largest element of a float tensor, `None` for an empty one.
    pub fn min_max(&self) -> Result<Option<(f32, f32)>, TensorError> {
        let values = self.as_f32()?;
        Ok(
            match values.iter().copied().minmax_by(|a, b| a.total_cmp(b)) {
                MinMaxResult::NoElements => None,
                MinMaxResult::OneElement(v) => Some((v, v)),
                MinMaxResult::MinMax(min, max) => Some((min, max)),
            },
        )
    }

    /// Re-encodes a float tensor as `data_type` using `q = round(v / scale) + offset`,
    /// saturated to the bounds of the target element type.
    pub fn quantize(
        &self,
        data_type: DataType,
        scale: f32,
        offset: i32,
    ) -> Result<ConstTensor, TensorError> {
        let values = self.as_f32()?;
        let data = match data_type {
            DataType::QAsymmU8 => TensorData::U8(quantize_slice(values, scale, offset)),
            DataType::QAsymmS8 | DataType::QSymmS8 => {
                TensorData::I8(quantize_slice(values, scale, offset))
            }
            DataType::QSymmS16 => TensorData::I16(quantize_slice(values, scale, offset)),
            DataType::Signed32 => TensorData::I32(quantize_slice(values, scale, offset)),
            other => return Err(TensorError::UnsupportedType(other)),
        };
        Ok(ConstTensor {
            info: self.info.with_quantization(data_type, scale, offset),
            data,
        })
    }

    /// Decodes the tensor into floats with `(q - offset) * scale`. Float tensors are returned as is.
    pub fn dequantize(&self) -> Vec<f32> {
        let scale = self.info.quantization_scale;
        let offset = self.info.quantization_offset;
        match &self.data {
            TensorData::F32(v) => v.clone(),
            TensorData::U8(v) => dequantize_slice(v, scale, offset),
            TensorData::I8(v) => dequantize_slice(v, scale, offset),
            TensorData::I16(v) => dequantize_slice(v, scale, offset),
            TensorData::I32(v) => dequantize_slice(v, scale, offset),
        }
    }
}

/// Integer element types a float can be quantized into.
pub trait QuantizedElement: Copy + Send + Sync {
    const LOWEST: f64;
    const HIGHEST: f64;
    /// Converts an already clamped value.
    fn from_clamped(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! quantized_element {
    ($($t:ty),*) => {
        $(
            impl QuantizedElement for $t {
                const LOWEST: f64 = <$t>::MIN as f64;
                const HIGHEST: f64 = <$t>::MAX as f64;

                fn from_clamped(value: f64) -> Self {
                    value as $t
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

quantized_element!(u8, i8, i16, i32);

/// Quantizes a single value; out of range values and infinities saturate.
pub fn quantize<T: QuantizedElement>(value: f32, scale: f32, offset: i32) -> T {
    let scaled = (f64::from(value) / f64::from(scale)).round() + f64::from(offset);
    T::from_clamped(scaled.clamp(T::LOWEST, T::HIGHEST))
}

pub fn dequantize<T: QuantizedElement>(value: T, scale: f32, offset: i32) -> f32 {
    ((value.to_f64() - f64::from(offset)) * f64::from(scale)) as f32
}

fn quantize_slice<T: QuantizedElement>(values: &[f32], scale: f32, offset: i32) -> Vec<T> {
    values
        .par_iter()
        .map(|v| quantize(*v, scale, offset))
        .collect()
}

fn dequantize_slice<T: QuantizedElement>(values: &[T], scale: f32, offset: i32) -> Vec<f32> {
    values
        .iter()
        .map(|v| dequantize(*v, scale, offset))
        .collect()
}
