//! Tensor values: a device buffer plus shape and dtype.
//!
//! Cloning a tensor shares the underlying buffer; the last holder frees
//! it. Kernels write results in place through the shared handle of their
//! output argument.

use std::fmt;
use std::sync::{Arc, RwLock};
use tensorvm_ir::DataType;
use thiserror::Error;

/// Device placement of a tensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Host CPU.
    #[default]
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// Error constructing or reading a tensor.
#[derive(Debug, Error)]
pub enum TensorError {
    #[error("dtype mismatch: expected {expected}, got {actual}")]
    DtypeMismatch { expected: String, actual: DataType },

    #[error("unsupported dtype {0}")]
    UnsupportedDtype(DataType),

    #[error("negative dimension {0} in shape")]
    NegativeDim(i64),

    #[error("data length {got} does not match shape element count {expected}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("expected a scalar tensor, got {elements} elements")]
    NotScalar { elements: usize },
}

pub type TensorResult<T> = Result<T, TensorError>;

/// Typed element storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    F32(Vec<f32>),
    I32(Vec<i32>),
    /// Booleans stored one per byte, nonzero meaning true.
    Bool(Vec<u8>),
}

impl Buffer {
    /// Zero-filled storage for a supported dtype.
    pub fn zeroed(dtype: DataType, len: usize) -> TensorResult<Self> {
        if dtype == DataType::float32() {
            Ok(Buffer::F32(vec![0.0; len]))
        } else if dtype == DataType::int32() {
            Ok(Buffer::I32(vec![0; len]))
        } else if dtype == DataType::bool_() {
            Ok(Buffer::Bool(vec![0; len]))
        } else {
            Err(TensorError::UnsupportedDtype(dtype))
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::F32(v) => v.len(),
            Buffer::I32(v) => v.len(),
            Buffer::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A tensor value. The buffer is reference-counted and interior-mutable
/// so kernels can write through the output handle while the same buffer
/// sits on the value stack.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Vec<i64>,
    dtype: DataType,
    device: Device,
    data: Arc<RwLock<Buffer>>,
}

fn element_count(shape: &[i64]) -> TensorResult<usize> {
    let mut count: usize = 1;
    for &dim in shape {
        if dim < 0 {
            return Err(TensorError::NegativeDim(dim));
        }
        count *= dim as usize;
    }
    Ok(count)
}

impl Tensor {
    /// Allocate a zero-filled tensor on the CPU.
    pub fn zeroed(shape: &[i64], dtype: DataType) -> TensorResult<Self> {
        let len = element_count(shape)?;
        Ok(Self {
            shape: shape.to_vec(),
            dtype,
            device: Device::Cpu,
            data: Arc::new(RwLock::new(Buffer::zeroed(dtype, len)?)),
        })
    }

    /// Build a float32 tensor from row-major values.
    pub fn from_f32(shape: &[i64], values: Vec<f32>) -> TensorResult<Self> {
        let expected = element_count(shape)?;
        if values.len() != expected {
            return Err(TensorError::LengthMismatch {
                expected,
                got: values.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            dtype: DataType::float32(),
            device: Device::Cpu,
            data: Arc::new(RwLock::new(Buffer::F32(values))),
        })
    }

    /// Build a rank-0 boolean tensor.
    pub fn scalar_from_bool(value: bool) -> Self {
        Self {
            shape: vec![],
            dtype: DataType::bool_(),
            device: Device::Cpu,
            data: Arc::new(RwLock::new(Buffer::Bool(vec![value as u8]))),
        }
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().map(|&d| d as usize).product()
    }

    /// Run `f` over the buffer contents.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&Buffer) -> R) -> R {
        f(&self.data.read().expect("tensor buffer lock poisoned"))
    }

    /// Run `f` over the buffer contents, mutably. Used by kernels to
    /// write their output argument in place.
    pub fn with_buffer_mut<R>(&self, f: impl FnOnce(&mut Buffer) -> R) -> R {
        f(&mut self.data.write().expect("tensor buffer lock poisoned"))
    }

    /// Copy out as f32 values.
    pub fn to_f32_vec(&self) -> TensorResult<Vec<f32>> {
        self.with_buffer(|buf| match buf {
            Buffer::F32(v) => Ok(v.clone()),
            _ => Err(TensorError::DtypeMismatch {
                expected: DataType::float32().to_string(),
                actual: self.dtype,
            }),
        })
    }

    /// Copy out as booleans.
    pub fn to_bool_vec(&self) -> TensorResult<Vec<bool>> {
        self.with_buffer(|buf| match buf {
            Buffer::Bool(v) => Ok(v.iter().map(|&b| b != 0).collect()),
            _ => Err(TensorError::DtypeMismatch {
                expected: DataType::bool_().to_string(),
                actual: self.dtype,
            }),
        })
    }

    /// Read a scalar boolean condition: requires bool dtype and exactly
    /// one element, and reads byte 0.
    pub fn scalar_bool(&self) -> TensorResult<bool> {
        if !self.dtype.is_bool() {
            return Err(TensorError::DtypeMismatch {
                expected: DataType::bool_().to_string(),
                actual: self.dtype,
            });
        }
        self.with_buffer(|buf| match buf {
            Buffer::Bool(v) if v.len() == 1 => Ok(v[0] != 0),
            buf => Err(TensorError::NotScalar {
                elements: buf.len(),
            }),
        })
    }

    /// Whether two tensors share one buffer.
    pub fn same_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_storage() {
        let t = Tensor::from_f32(&[2], vec![1.0, 2.0]).unwrap();
        let u = t.clone();
        assert!(t.same_storage(&u));
        u.with_buffer_mut(|buf| {
            if let Buffer::F32(v) = buf {
                v[0] = 9.0;
            }
        });
        assert_eq!(t.to_f32_vec().unwrap(), vec![9.0, 2.0]);
    }

    #[test]
    fn zeroed_rejects_unsupported_dtype() {
        let odd = DataType::new(tensorvm_ir::DTypeCode::Float, 16, 1);
        assert!(Tensor::zeroed(&[2], odd).is_err());
        assert!(Tensor::zeroed(&[2, -1], DataType::float32()).is_err());
    }

    #[test]
    fn scalar_bool_checks_dtype_and_rank() {
        assert!(Tensor::scalar_from_bool(true).scalar_bool().unwrap());
        assert!(!Tensor::scalar_from_bool(false).scalar_bool().unwrap());

        let f = Tensor::from_f32(&[1], vec![1.0]).unwrap();
        assert!(f.scalar_bool().is_err());

        let wide = Tensor::zeroed(&[2], DataType::bool_()).unwrap();
        assert!(wide.scalar_bool().is_err());
    }

    #[test]
    fn from_f32_checks_length() {
        assert!(Tensor::from_f32(&[3], vec![1.0]).is_err());
    }
}
