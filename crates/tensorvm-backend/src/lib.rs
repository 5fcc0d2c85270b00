//! Kernel oracle: lowering of primitive functions and the backend build
//! step that materializes packed callables.

pub mod codegen;
pub mod lower;

pub use lower::{Engine, KernelExpr, LowerError, LowerResult, LoweredKernel};

use std::collections::HashMap;
use std::fmt;
use tensorvm_runtime::PackedFunc;
use tracing::debug;

/// A compilation target descriptor. The reference backend only has one
/// real codegen path, but the target stays in signatures so multi-target
/// lowering does not have to reshape the API later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target(String);

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The default target.
    pub fn llvm() -> Self {
        Self::new("llvm")
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A built module of packed callables, keyed by kernel name.
pub struct NativeModule {
    funcs: HashMap<String, PackedFunc>,
}

impl NativeModule {
    /// Fetch a packed callable by kernel name.
    pub fn get(&self, name: &str) -> Option<PackedFunc> {
        self.funcs.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

/// Build a native module from a kernel table. Called exactly once per
/// module compilation, after all functions have been lowered.
pub fn build(kernels: &[LoweredKernel], target: &Target) -> NativeModule {
    debug!(kernels = kernels.len(), %target, "building native module");
    let funcs = kernels
        .iter()
        .map(|k| (k.name.clone(), codegen::codegen(k)))
        .collect();
    NativeModule { funcs }
}
