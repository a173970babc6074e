//! Tensors exchanged between guests and the inference backend.

use image_recognition_common::HostFunctionError;

/// Element type of a tensor, numbered like `TF_DataType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    F32,
    F64,
    I32,
    U8,
    I16,
    I8,
    I64,
    Bool,
    U16,
}

impl DataType {
    /// Decode a `TF_DataType` code.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::InvalidArgument`] for unsupported codes.
    pub fn from_code(code: u32) -> Result<Self, HostFunctionError> {
        match code {
            1 => Ok(Self::F32),
            2 => Ok(Self::F64),
            3 => Ok(Self::I32),
            4 => Ok(Self::U8),
            5 => Ok(Self::I16),
            6 => Ok(Self::I8),
            9 => Ok(Self::I64),
            10 => Ok(Self::Bool),
            17 => Ok(Self::U16),
            other => Err(HostFunctionError::invalid_argument(format!(
                "Unsupported tensor data type {other}"
            ))),
        }
    }

    /// The `TF_DataType` code.
    pub fn code(self) -> u32 {
        match self {
            Self::F32 => 1,
            Self::F64 => 2,
            Self::I32 => 3,
            Self::U8 => 4,
            Self::I16 => 5,
            Self::I8 => 6,
            Self::I64 => 9,
            Self::Bool => 10,
            Self::U16 => 17,
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 | Self::Bool => 1,
            Self::I16 | Self::U16 => 2,
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }
}

/// A dense tensor in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub dtype: DataType,
    pub dims: Vec<i64>,
    pub data: Vec<u8>,
}

impl Tensor {
    /// Create a tensor, checking `data` against `dims` when the shape is
    /// fully known.
    ///
    /// An empty `dims` leaves the shape to the backend; TensorFlow Lite
    /// inputs are passed that way.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::InvalidArgument`] if the shape has a
    /// negative dimension or does not match the data length.
    pub fn new(dtype: DataType, dims: Vec<i64>, data: Vec<u8>) -> Result<Self, HostFunctionError> {
        if !dims.is_empty() {
            let elements = dims.iter().try_fold(1usize, |acc, &d| {
                usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
            });
            let expected = elements.and_then(|n| n.checked_mul(dtype.size()));
            if expected != Some(data.len()) {
                return Err(HostFunctionError::invalid_argument(format!(
                    "Tensor of shape {dims:?} and type {dtype:?} does not fit {} bytes",
                    data.len()
                )));
            }
        }

        Ok(Self { dtype, dims, data })
    }

    /// Raw bytes with an unspecified shape.
    pub fn raw(data: Vec<u8>) -> Self {
        Self {
            dtype: DataType::U8,
            dims: Vec::new(),
            data,
        }
    }

    /// Data length in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// A tensor bound to a graph operation name and output index.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub index: u32,
    pub tensor: Tensor,
}

/// An output the guest asked the session to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub name: String,
    pub index: u32,
}

/// Decode a little-endian `i64` dimension array.
///
/// # Errors
///
/// Returns [`HostFunctionError::InvalidArgument`] if the byte length is not
/// a multiple of eight.
pub fn decode_dims(bytes: &[u8]) -> Result<Vec<i64>, HostFunctionError> {
    if bytes.len() % 8 != 0 {
        return Err(HostFunctionError::invalid_argument(format!(
            "Dimension array of {} bytes is not a whole number of i64s",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            i64::from_le_bytes(buf)
        })
        .collect())
}
