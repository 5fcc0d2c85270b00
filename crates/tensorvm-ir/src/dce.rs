//! Dead-code elimination for let-bindings.
//!
//! Runs after primitive inlining: a binding whose sole use was an alias
//! to a now-inlined primitive has zero remaining uses and is dropped.
//! The IR is pure, so discarding an unused bound value is sound.

use crate::expr::{Expr, Function};

/// Remove let-bindings whose variable is unused in the (already
/// simplified) body.
pub fn eliminate(expr: Expr) -> Expr {
    match expr {
        Expr::Let {
            var,
            ty,
            value,
            body,
        } => {
            let body = eliminate(*body);
            if body.uses(&var) {
                Expr::Let {
                    var,
                    ty,
                    value: Box::new(eliminate(*value)),
                    body: Box::new(body),
                }
            } else {
                body
            }
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => Expr::If {
            cond: Box::new(eliminate(*cond)),
            then_branch: Box::new(eliminate(*then_branch)),
            else_branch: Box::new(eliminate(*else_branch)),
        },
        Expr::Func(f) => Expr::Func(Function {
            body: Box::new(eliminate(*f.body)),
            ..f
        }),
        Expr::Call { op, args, ty_args } => Expr::Call {
            op: Box::new(eliminate(*op)),
            args: args.into_iter().map(eliminate).collect(),
            ty_args,
        },
        Expr::Var(_) | Expr::Global(_) | Expr::Op(_) => expr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Var;

    #[test]
    fn drops_unused_binding() {
        let x = Var::new("x");
        let dead = Var::new("dead");
        let expr = Expr::let_(dead, Expr::var(&x), Expr::var(&x));
        assert_eq!(eliminate(expr), Expr::var(&x));
    }

    #[test]
    fn keeps_used_binding() {
        let x = Var::new("x");
        let t = Var::new("t");
        let expr = Expr::let_(t.clone(), Expr::var(&x), Expr::var(&t));
        assert_eq!(eliminate(expr.clone()), expr);
    }

    #[test]
    fn drops_chained_aliases() {
        // let p = x; let q = p; x: both bindings dead.
        let x = Var::new("x");
        let p = Var::new("p");
        let q = Var::new("q");
        let expr = Expr::let_(
            p.clone(),
            Expr::var(&x),
            Expr::let_(q, Expr::var(&p), Expr::var(&x)),
        );
        assert_eq!(eliminate(expr), Expr::var(&x));
    }
}
