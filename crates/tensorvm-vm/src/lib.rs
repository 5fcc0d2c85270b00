//! Bytecode VM for tensor-computation IR programs.
//!
//! The pipeline: the primitive inliner normalizes a module so every
//! call has a primitive (or global) operator, the bytecode compiler
//! turns each function into stack instructions and a kernel list, the
//! module linker builds the kernel table into packed callables, and the
//! interpreter runs the result against user tensors.

pub mod compile;
pub mod inline;
pub mod instruction;
pub mod vm;

pub use compile::{compile_func, compile_module, CompileError, CompileResult, MAX_KERNEL_ARGS};
pub use inline::inline_primitives;
pub use instruction::{Instruction, ParseError, VmFunction};
pub use vm::{ExecError, ExecResult, VirtualMachine};

use tensorvm_backend::Target;
use tensorvm_ir::{Expr, Module, ModuleError};
use tensorvm_runtime::{Object, ObjectError, Tensor};
use thiserror::Error;
use tracing::debug;

/// Error surface of the one-shot evaluation entry points.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("module has no functions to invoke")]
    EmptyModule,

    #[error("result is not a tensor: {0}")]
    NonTensorResult(#[from] ObjectError),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Inline, compile, link, and run a module's entry function (its first
/// function in insertion order) against the given tensors.
pub fn evaluate(module: &Module, args: Vec<Tensor>) -> EvalResult<Tensor> {
    if module.is_empty() {
        return Err(EvalError::EmptyModule);
    }
    let module = inline_primitives(module);
    let mut vm = compile_module(&module, &Target::llvm())?;
    debug!("entry function:\n{}", vm.functions()[0]);

    let args = args.into_iter().map(Object::Tensor).collect();
    let result = vm.invoke(0, args)?;
    Ok(result.into_tensor()?)
}

/// Evaluate a bare function expression by wrapping it into a
/// single-entry module first.
pub fn evaluate_expr(expr: Expr, args: Vec<Tensor>) -> EvalResult<Tensor> {
    let module = Module::from_expr(expr)?;
    evaluate(&module, args)
}
