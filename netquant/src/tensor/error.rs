//! Error enum for [`super::ConstTensor`] construction and element conversions

use super::DataType;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("tensor of shape {shape:?} needs {expected} elements, buffer has {actual}")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("buffer of {found} elements cannot back a {data_type} tensor")]
    TypeMismatch {
        data_type: DataType,
        found: &'static str,
    },
    #[error("element type {0} is not supported by this operation")]
    UnsupportedType(DataType),
}
