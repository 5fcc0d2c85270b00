//! Primitive inlining: ensure primitives only appear in call position.
//!
//! ANF-style front ends lift primitive functions into let-bindings:
//!
//! ```text
//! let prim = fn primitive (...) { ... };
//! prim(...)
//! ```
//!
//! becomes
//!
//! ```text
//! (fn primitive (...) { ... })(...)
//! ```
//!
//! After this pass every call's operator is either a primitive function
//! literal or a global reference, which is the invariant the bytecode
//! compiler dispatches on. Dead aliases left behind are swept up by
//! dead-code elimination.

use std::collections::HashMap;
use tensorvm_ir::{dce, Expr, Function, Module, Type, Var};
use tracing::debug;

struct PrimitiveInliner {
    /// Let-bound variables mapped to their (already rewritten) values.
    var_map: HashMap<Var, Expr>,
}

impl PrimitiveInliner {
    fn new() -> Self {
        Self {
            var_map: HashMap::new(),
        }
    }

    fn rewrite(&mut self, expr: &Expr) -> Expr {
        match expr {
            Expr::Let {
                var,
                ty,
                value,
                body,
            } => {
                let value = self.rewrite(value);
                self.var_map.insert(var.clone(), value.clone());
                Expr::Let {
                    var: var.clone(),
                    ty: ty.clone(),
                    value: Box::new(value),
                    body: Box::new(self.rewrite(body)),
                }
            }

            Expr::Call { op, args, ty_args } => {
                // Collapse the chain of variables to see if the operator
                // points at a primitive function.
                let mut resolved = op.as_ref().clone();
                loop {
                    match &resolved {
                        Expr::Var(v) => match self.var_map.get(v) {
                            Some(bound) => {
                                debug!(var = v.name(), "collapsing operator alias");
                                resolved = bound.clone();
                            }
                            None => return self.rewrite_call(op, args, ty_args),
                        },
                        _ => break,
                    }
                }

                match resolved {
                    Expr::Func(f) if f.is_primitive() => Expr::Call {
                        op: Box::new(Expr::Func(f)),
                        args: args.iter().map(|a| self.rewrite(a)).collect(),
                        ty_args: ty_args.clone(),
                    },
                    Expr::Global(g) => Expr::Call {
                        op: Box::new(Expr::Global(g)),
                        args: args.iter().map(|a| self.rewrite(a)).collect(),
                        ty_args: ty_args.clone(),
                    },
                    _ => self.rewrite_call(op, args, ty_args),
                }
            }

            // Primitive literals reached outside call position are left
            // as-is; the compiler rejects them if they survive to a
            // position it cannot handle.
            Expr::Func(f) if f.is_primitive() => expr.clone(),

            Expr::Func(f) => Expr::Func(Function {
                body: Box::new(self.rewrite(&f.body)),
                ..f.clone()
            }),

            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => Expr::If {
                cond: Box::new(self.rewrite(cond)),
                then_branch: Box::new(self.rewrite(then_branch)),
                else_branch: Box::new(self.rewrite(else_branch)),
            },

            Expr::Var(_) | Expr::Global(_) | Expr::Op(_) => expr.clone(),
        }
    }

    /// Default call traversal: rewrite operator and arguments.
    fn rewrite_call(&mut self, op: &Expr, args: &[Expr], ty_args: &[Type]) -> Expr {
        Expr::Call {
            op: Box::new(self.rewrite(op)),
            args: args.iter().map(|a| self.rewrite(a)).collect(),
            ty_args: ty_args.to_vec(),
        }
    }

    fn inline_function(&mut self, func: &Function) -> Function {
        let body = dce::eliminate(self.rewrite(&func.body));
        Function {
            body: Box::new(body),
            ..func.clone()
        }
    }
}

/// Rewrite every function of a module so primitives only appear in call
/// position. Pure and idempotent.
///
/// Functions are rewritten in module insertion order and written back
/// afterwards; aliasing of primitives through globals in *other*
/// functions is not resolved by this single pass.
pub fn inline_primitives(module: &Module) -> Module {
    let mut updates = Vec::new();
    for (gvar, func) in module.functions() {
        let mut inliner = PrimitiveInliner::new();
        debug!(global = %gvar, "inlining primitives");
        updates.push((gvar.clone(), inliner.inline_function(func)));
    }

    let mut rewritten = module.clone();
    for (gvar, func) in updates {
        rewritten
            .add(gvar, func, true)
            .expect("update of existing global cannot fail");
    }
    rewritten
}
