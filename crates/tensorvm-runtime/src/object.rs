//! The tagged VM value.
//!
//! Only tensors are first-class today; the enum is the extension point
//! for closures, tuples, and references, which can be added without
//! reshaping the stack or frame layout.

use crate::tensor::Tensor;
use thiserror::Error;

/// Error downcasting a VM object.
#[derive(Debug, Error)]
#[error("expected a {expected} value, got {actual}")]
pub struct ObjectError {
    pub expected: &'static str,
    pub actual: &'static str,
}

/// A value on the VM stack.
#[derive(Debug, Clone)]
pub enum Object {
    /// Placeholder occupying reserved return slots until `Ret` writes
    /// the real value.
    Null,
    /// A tensor value.
    Tensor(Tensor),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Tensor(_) => "tensor",
        }
    }

    pub fn as_tensor(&self) -> Result<&Tensor, ObjectError> {
        match self {
            Object::Tensor(t) => Ok(t),
            other => Err(ObjectError {
                expected: "tensor",
                actual: other.type_name(),
            }),
        }
    }

    pub fn into_tensor(self) -> Result<Tensor, ObjectError> {
        match self {
            Object::Tensor(t) => Ok(t),
            other => Err(ObjectError {
                expected: "tensor",
                actual: other.type_name(),
            }),
        }
    }
}

impl From<Tensor> for Object {
    fn from(t: Tensor) -> Self {
        Object::Tensor(t)
    }
}
