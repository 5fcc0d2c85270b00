//! Typed functional IR for tensor computation programs.

pub mod dce;
pub mod expr;
pub mod module;
pub mod ty;

pub use expr::{ElemOp, Expr, Function, GlobalVar, Param, Var};
pub use module::{Module, ModuleError, ModuleResult};
pub use ty::{DTypeCode, DataType, DynamicShapeError, FuncType, ShapeDim, TensorType, Type};
