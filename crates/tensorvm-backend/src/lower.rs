//! Lowering: primitive IR functions to kernel descriptions.
//!
//! A primitive body is an intrinsic operator tree over the function's
//! parameters. Lowering flattens it into a `KernelExpr`, names it, and
//! hands it to codegen at build time. One primitive yields exactly one
//! kernel in this backend.

use crate::Target;
use std::collections::HashMap;
use tensorvm_ir::{ElemOp, Expr, Function, Var};
use thiserror::Error;
use tracing::debug;

/// Error lowering a primitive function.
#[derive(Debug, Error)]
pub enum LowerError {
    #[error("cannot lower a non-primitive function")]
    NotPrimitive,

    #[error("primitive body references `{0}`, which is not a parameter")]
    UnboundVar(String),

    #[error("unsupported node in primitive body: {0}")]
    Unsupported(&'static str),

    #[error("operator `{op}` takes {expected} operands, got {got}")]
    OpArity {
        op: ElemOp,
        expected: usize,
        got: usize,
    },
}

pub type LowerResult<T> = Result<T, LowerError>;

/// The lowered form of a primitive body: an operator tree whose leaves
/// are parameter indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelExpr {
    /// The i-th kernel input.
    Input(usize),
    /// An elementwise operator over sub-expressions.
    Elem(ElemOp, Vec<KernelExpr>),
}

impl KernelExpr {
    /// Operator names in evaluation order, used to synthesize kernel
    /// names.
    fn collect_ops(&self, out: &mut Vec<&'static str>) {
        if let KernelExpr::Elem(op, args) = self {
            for arg in args {
                arg.collect_ops(out);
            }
            out.push(op.name());
        }
    }
}

/// A kernel produced by lowering, prior to codegen.
#[derive(Debug, Clone)]
pub struct LoweredKernel {
    /// Unique name, the key into the built native module.
    pub name: String,
    /// The operator tree to compile.
    pub expr: KernelExpr,
    /// Number of inputs (excluding the output argument).
    pub inputs: usize,
}

/// The kernel-lowering engine. Kernel names are unique per engine, so
/// one engine must span a whole module compilation.
#[derive(Debug, Default)]
pub struct Engine {
    next_id: usize,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower a primitive function for the given target. Returns exactly
    /// one kernel per primitive in this backend.
    pub fn lower(&mut self, func: &Function, target: &Target) -> LowerResult<Vec<LoweredKernel>> {
        if !func.is_primitive() {
            return Err(LowerError::NotPrimitive);
        }
        let param_index: HashMap<&Var, usize> = func
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| (&p.var, i))
            .collect();
        let expr = lower_body(&func.body, &param_index)?;

        let mut ops = Vec::new();
        expr.collect_ops(&mut ops);
        let stem = if ops.is_empty() { "copy".to_string() } else { ops.join("_") };
        let name = format!("fused_{}_{}", stem, self.next_id);
        self.next_id += 1;

        debug!(kernel = %name, %target, inputs = func.params.len(), "lowered primitive");
        Ok(vec![LoweredKernel {
            name,
            expr,
            inputs: func.params.len(),
        }])
    }
}

fn lower_body(expr: &Expr, params: &HashMap<&Var, usize>) -> LowerResult<KernelExpr> {
    match expr {
        Expr::Var(v) => params
            .get(v)
            .map(|&i| KernelExpr::Input(i))
            .ok_or_else(|| LowerError::UnboundVar(v.name().to_string())),
        Expr::Call { op, args, .. } => match op.as_ref() {
            Expr::Op(elem) => {
                if args.len() != elem.arity() {
                    return Err(LowerError::OpArity {
                        op: *elem,
                        expected: elem.arity(),
                        got: args.len(),
                    });
                }
                let args = args
                    .iter()
                    .map(|a| lower_body(a, params))
                    .collect::<LowerResult<Vec<_>>>()?;
                Ok(KernelExpr::Elem(*elem, args))
            }
            _ => Err(LowerError::Unsupported("call to a non-intrinsic operator")),
        },
        Expr::Let { .. } => Err(LowerError::Unsupported("let-binding")),
        Expr::If { .. } => Err(LowerError::Unsupported("conditional")),
        Expr::Func(_) => Err(LowerError::Unsupported("nested function")),
        Expr::Global(_) => Err(LowerError::Unsupported("global reference")),
        Expr::Op(_) => Err(LowerError::Unsupported("bare operator outside call")),
    }
}
