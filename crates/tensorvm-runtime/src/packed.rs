//! Packed callables: uniform-arity kernel entry points.
//!
//! A packed function receives a slice of type-erased arguments, the last
//! of which is the pre-allocated output tensor it writes in place. It
//! returns synchronously; once it returns, the output is materialized.

use crate::object::{Object, ObjectError};
use std::sync::Arc;
use thiserror::Error;

/// Error reported by a kernel invocation.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel expects {expected} arguments, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("kernel argument {index}: {source}")]
    BadArgument {
        index: usize,
        #[source]
        source: ObjectError,
    },

    #[error("kernel argument {index} has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: Vec<i64>,
        got: Vec<i64>,
    },

    #[error("kernel does not support dtype {0}")]
    UnsupportedDtype(String),
}

pub type KernelResult<T> = Result<T, KernelError>;

/// A compiled kernel behind a uniform calling convention.
pub type PackedFunc = Arc<dyn Fn(&[Object]) -> KernelResult<()> + Send + Sync>;
