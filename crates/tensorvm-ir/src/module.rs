//! Module: an insertion-ordered map from global names to functions.
//!
//! Insertion order is load-bearing: the bytecode compiler walks the map
//! in order, so the kernel table and function table it produces are
//! reproducible across runs.

use crate::expr::{Expr, Function, GlobalVar};
use indexmap::IndexMap;
use thiserror::Error;

/// Error building or updating a module.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("global `{0}` is already defined")]
    DuplicateGlobal(String),

    #[error("expected a function expression, got a non-function node")]
    NotAFunction,
}

pub type ModuleResult<T> = Result<T, ModuleError>;

/// A collection of named functions.
#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: IndexMap<GlobalVar, Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a bare function expression into a single-entry module under
    /// the global name `main`.
    pub fn from_expr(expr: Expr) -> ModuleResult<Self> {
        let func = match expr {
            Expr::Func(f) => f,
            _ => return Err(ModuleError::NotAFunction),
        };
        let mut module = Self::new();
        module.add(GlobalVar::new("main"), func, false)?;
        Ok(module)
    }

    /// Add a function under a global name. Re-adding an existing name
    /// requires `allow_update`.
    pub fn add(&mut self, gvar: GlobalVar, func: Function, allow_update: bool) -> ModuleResult<()> {
        if !allow_update && self.functions.contains_key(&gvar) {
            return Err(ModuleError::DuplicateGlobal(gvar.name));
        }
        self.functions.insert(gvar, func);
        Ok(())
    }

    pub fn lookup(&self, gvar: &GlobalVar) -> Option<&Function> {
        self.functions.get(gvar)
    }

    /// Functions in insertion order.
    pub fn functions(&self) -> impl Iterator<Item = (&GlobalVar, &Function)> {
        self.functions.iter()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
