//! Bytecode compiler: one IR function to a `VmFunction` plus the
//! kernels it references.
//!
//! The compiler assumes the primitive-inlining invariant: every call it
//! sees has a primitive function literal (or a global reference, which
//! is still unimplemented) in operator position. It lays arguments out
//! on the value stack left to right, allocates the output tensor as the
//! last kernel argument, and leaves exactly one value per compiled
//! sub-expression.

use crate::instruction::{Instruction, VmFunction};
use crate::vm::VirtualMachine;
use std::collections::HashMap;
use tensorvm_backend::{build, Engine, LowerError, LoweredKernel, Target};
use tensorvm_ir::{DynamicShapeError, Expr, Function, Module, Type, Var};
use thiserror::Error;
use tracing::debug;

/// Kernel arguments (inputs plus the output slot) are marshalled into a
/// fixed-size buffer; widen it to raise this cap.
pub const MAX_KERNEL_ARGS: usize = 10;

/// A compile-time failure. All of these are hard errors; there is no
/// recovery path.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("nested function literals cannot be compiled")]
    NestedFunction,

    #[error("call operator is {found}, not a primitive function (did inlining run?)")]
    OperatorNotPrimitive { found: &'static str },

    #[error("cross-function call to `{0}`: the `invoke` opcode is reserved")]
    CrossFunctionCall(String),

    #[error("intrinsic operator outside call position")]
    BareOperator,

    #[error("call result type {0} is not a tensor type")]
    NonTensorResult(Type),

    #[error(transparent)]
    DynamicShape(#[from] DynamicShapeError),

    #[error("lowering returned {got} kernels for one primitive, expected exactly 1")]
    KernelCount { got: usize },

    #[error("kernel arity {arity} exceeds the argument-buffer cap of 10")]
    ArityTooLarge { arity: usize },

    #[error(transparent)]
    Lower(#[from] LowerError),

    #[error("native module is missing kernel `{0}`")]
    MissingKernel(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

fn expr_kind(expr: &Expr) -> &'static str {
    match expr {
        Expr::Var(_) => "a variable",
        Expr::Global(_) => "a global reference",
        Expr::Op(_) => "an intrinsic operator",
        Expr::Let { .. } => "a let-binding",
        Expr::If { .. } => "a conditional",
        Expr::Func(f) if f.is_primitive() => "a primitive function",
        Expr::Func(_) => "a non-primitive function",
        Expr::Call { .. } => "a call",
    }
}

/// Per-function compilation state.
struct FunctionCompiler<'e> {
    instructions: Vec<Instruction>,
    /// Variable to stack slot, relative to the base pointer.
    var_map: HashMap<Var, usize>,
    /// Next free stack slot.
    stack_index: usize,
    seen_func: bool,
    kernels: Vec<LoweredKernel>,
    engine: &'e mut Engine,
    target: &'e Target,
}

impl<'e> FunctionCompiler<'e> {
    fn new(engine: &'e mut Engine, target: &'e Target) -> Self {
        Self {
            instructions: Vec::new(),
            var_map: HashMap::new(),
            stack_index: 0,
            seen_func: false,
            kernels: Vec::new(),
            engine,
            target,
        }
    }

    fn emit(&mut self, instr: Instruction) {
        self.instructions.push(instr);
    }

    fn enter_function(&mut self, func: &Function) -> CompileResult<()> {
        if self.seen_func {
            return Err(CompileError::NestedFunction);
        }
        self.seen_func = true;
        for param in &func.params {
            self.var_map.insert(param.var.clone(), self.stack_index);
            self.stack_index += 1;
        }
        self.visit(&func.body)
    }

    fn visit(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Var(v) => {
                let slot = *self
                    .var_map
                    .get(v)
                    .ok_or_else(|| CompileError::UnknownVariable(v.name().to_string()))?;
                self.emit(Instruction::Push { index: slot });
                Ok(())
            }

            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.visit(cond)?;
                let after_cond = self.instructions.len();
                self.emit(Instruction::If {
                    true_offset: 0,
                    false_offset: 0,
                });
                self.visit(then_branch)?;
                // The branch value is the function result; without an
                // unconditional jump in the instruction set, the true
                // branch must return rather than fall through into the
                // false branch.
                self.emit(Instruction::Ret);
                let after_true = self.instructions.len();
                self.visit(else_branch)?;
                // Patch the placeholder: the true branch starts right
                // after the `if`, the false branch starts after the
                // whole true branch.
                self.instructions[after_cond] = Instruction::If {
                    true_offset: 1,
                    false_offset: (after_true - after_cond) as isize,
                };
                Ok(())
            }

            Expr::Let {
                var, value, body, ..
            } => {
                // The value nets exactly one new stack slot; bind the
                // variable to it.
                self.visit(value)?;
                self.var_map.insert(var.clone(), self.stack_index);
                self.stack_index += 1;
                self.visit(body)
            }

            Expr::Call { op, args, .. } => self.visit_call(op, args),

            Expr::Func(_) => Err(CompileError::NestedFunction),

            Expr::Global(g) => Err(CompileError::CrossFunctionCall(g.name.clone())),

            Expr::Op(_) => Err(CompileError::BareOperator),
        }
    }

    fn visit_call(&mut self, op: &Expr, args: &[Expr]) -> CompileResult<()> {
        let func = match op {
            Expr::Func(f) if f.is_primitive() => f,
            Expr::Global(g) => return Err(CompileError::CrossFunctionCall(g.name.clone())),
            other => {
                return Err(CompileError::OperatorNotPrimitive {
                    found: expr_kind(other),
                })
            }
        };

        // Arguments populate the stack left to right.
        for arg in args {
            self.visit(arg)?;
        }

        // Allocate space for the result tensor; it rides along as the
        // kernel's final argument.
        let ttype = func
            .ret_ty
            .as_tensor()
            .ok_or_else(|| CompileError::NonTensorResult(func.ret_ty.clone()))?;
        let shape = ttype.static_shape()?;
        self.emit(Instruction::AllocTensor {
            shape,
            dtype: ttype.dtype,
        });

        let lowered = self.engine.lower(func, self.target)?;
        if lowered.len() != 1 {
            return Err(CompileError::KernelCount { got: lowered.len() });
        }
        let index = self.kernels.len();
        self.kernels.extend(lowered);

        let arity = func.params.len() + 1;
        if arity >= MAX_KERNEL_ARGS {
            return Err(CompileError::ArityTooLarge { arity });
        }
        self.emit(Instruction::InvokePacked { index, arity });
        Ok(())
    }
}

/// Compile one function. Returns the kernels it references alongside
/// the compiled form; the module linker owns the concatenation.
pub fn compile_func(
    func: &Function,
    engine: &mut Engine,
    target: &Target,
) -> CompileResult<(Vec<LoweredKernel>, VmFunction)> {
    let mut compiler = FunctionCompiler::new(engine, target);
    compiler.enter_function(func)?;
    compiler.emit(Instruction::Ret);
    Ok((
        compiler.kernels,
        VmFunction::new(func.params.len(), compiler.instructions),
    ))
}

/// Compile a whole (already inlined) module and link its kernel table.
///
/// Per-function kernel lists concatenate in module insertion order, the
/// backend build runs once over the table, and packed callables land in
/// the VM in the same order, so the indices embedded in `InvokePacked`
/// stay valid.
pub fn compile_module(module: &Module, target: &Target) -> CompileResult<VirtualMachine> {
    let mut kernel_table: Vec<LoweredKernel> = Vec::new();
    let mut functions = Vec::new();
    let mut engine = Engine::new();

    for (gvar, func) in module.functions() {
        debug!(global = %gvar, "compiling function");
        let (kernels, vm_func) = compile_func(func, &mut engine, target)?;
        kernel_table.extend(kernels);
        functions.push(vm_func);
    }

    let native = build(&kernel_table, target);
    let mut packed_funcs = Vec::with_capacity(kernel_table.len());
    for kernel in &kernel_table {
        let packed = native
            .get(&kernel.name)
            .ok_or_else(|| CompileError::MissingKernel(kernel.name.clone()))?;
        packed_funcs.push(packed);
    }

    Ok(VirtualMachine::new(functions, packed_funcs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorvm_ir::{DataType, ElemOp, Param, TensorType};

    fn f32_ty(shape: Vec<i64>) -> Type {
        Type::tensor(shape, DataType::float32())
    }

    fn elementwise_primitive(op: ElemOp, inputs: usize, shape: Vec<i64>) -> Function {
        let params: Vec<Param> = (0..inputs)
            .map(|i| Param::new(Var::new(format!("p{}", i)), f32_ty(shape.clone())))
            .collect();
        let mut args: Vec<Expr> = params.iter().map(|p| Expr::var(&p.var)).collect();
        // Fold n-ary inputs into a chain of binary ops.
        let mut body = args.remove(0);
        for arg in args {
            body = Expr::call(Expr::Op(op), vec![body, arg]);
        }
        Function::primitive(params, body, f32_ty(shape))
    }

    fn compile(func: &Function) -> CompileResult<(Vec<LoweredKernel>, VmFunction)> {
        let mut engine = Engine::new();
        compile_func(func, &mut engine, &Target::llvm())
    }

    #[test]
    fn identity_compiles_to_push_ret() {
        let x = Var::new("x");
        let ty = f32_ty(vec![2, 2]);
        let func = Function::new(vec![Param::new(x.clone(), ty.clone())], Expr::var(&x), ty);
        let (kernels, vm_func) = compile(&func).unwrap();
        assert!(kernels.is_empty());
        assert_eq!(
            vm_func.instructions.as_ref(),
            [Instruction::Push { index: 0 }, Instruction::Ret]
        );
    }

    #[test]
    fn single_primitive_call_layout() {
        let a = Var::new("a");
        let b = Var::new("b");
        let ty = f32_ty(vec![4]);
        let prim = elementwise_primitive(ElemOp::Add, 2, vec![4]);
        let func = Function::new(
            vec![
                Param::new(a.clone(), ty.clone()),
                Param::new(b.clone(), ty.clone()),
            ],
            Expr::call(Expr::Func(prim), vec![Expr::var(&a), Expr::var(&b)]),
            ty,
        );
        let (kernels, vm_func) = compile(&func).unwrap();
        assert_eq!(kernels.len(), 1);
        assert_eq!(
            vm_func.instructions.as_ref(),
            [
                Instruction::Push { index: 0 },
                Instruction::Push { index: 1 },
                Instruction::AllocTensor {
                    shape: vec![4],
                    dtype: DataType::float32()
                },
                Instruction::InvokePacked { index: 0, arity: 3 },
                Instruction::Ret,
            ]
        );
    }

    #[test]
    fn conditional_backpatching() {
        let c = Var::new("c");
        let x = Var::new("x");
        let y = Var::new("y");
        let func = Function::new(
            vec![
                Param::new(c.clone(), Type::Tensor(TensorType::scalar_bool())),
                Param::new(x.clone(), f32_ty(vec![1])),
                Param::new(y.clone(), f32_ty(vec![1])),
            ],
            Expr::if_(Expr::var(&c), Expr::var(&x), Expr::var(&y)),
            f32_ty(vec![1]),
        );
        let (_, vm_func) = compile(&func).unwrap();
        assert_eq!(
            vm_func.instructions.as_ref(),
            [
                Instruction::Push { index: 0 },
                Instruction::If {
                    true_offset: 1,
                    false_offset: 3
                },
                Instruction::Push { index: 1 },
                Instruction::Ret,
                Instruction::Push { index: 2 },
                Instruction::Ret,
            ]
        );
    }

    #[test]
    fn let_bound_call_results_get_slots() {
        // let t = mul(a, b); add(t, a)
        let a = Var::new("a");
        let b = Var::new("b");
        let t = Var::new("t");
        let ty = f32_ty(vec![4]);
        let mul = elementwise_primitive(ElemOp::Mul, 2, vec![4]);
        let add = elementwise_primitive(ElemOp::Add, 2, vec![4]);
        let body = Expr::let_(
            t.clone(),
            Expr::call(Expr::Func(mul), vec![Expr::var(&a), Expr::var(&b)]),
            Expr::call(Expr::Func(add), vec![Expr::var(&t), Expr::var(&a)]),
        );
        let func = Function::new(
            vec![
                Param::new(a.clone(), ty.clone()),
                Param::new(b.clone(), ty.clone()),
            ],
            body,
            ty,
        );
        let (kernels, vm_func) = compile(&func).unwrap();
        assert_eq!(kernels.len(), 2);
        assert_eq!(
            vm_func.instructions.as_ref(),
            [
                Instruction::Push { index: 0 },
                Instruction::Push { index: 1 },
                Instruction::AllocTensor {
                    shape: vec![4],
                    dtype: DataType::float32()
                },
                Instruction::InvokePacked { index: 0, arity: 3 },
                // t landed in slot 2; add(t, a) reads it back.
                Instruction::Push { index: 2 },
                Instruction::Push { index: 0 },
                Instruction::AllocTensor {
                    shape: vec![4],
                    dtype: DataType::float32()
                },
                Instruction::InvokePacked { index: 1, arity: 3 },
                Instruction::Ret,
            ]
        );
    }

    #[test]
    fn arity_cap_is_enforced() {
        // 9 inputs -> runtime arity 10 -> rejected; 8 inputs passes.
        let ty = f32_ty(vec![2]);
        for (inputs, ok) in [(8, true), (9, false)] {
            let prim = elementwise_primitive(ElemOp::Add, inputs, vec![2]);
            let params: Vec<Param> = (0..inputs)
                .map(|i| Param::new(Var::new(format!("x{}", i)), ty.clone()))
                .collect();
            let args = params.iter().map(|p| Expr::var(&p.var)).collect();
            let func = Function::new(
                params,
                Expr::call(Expr::Func(prim), args),
                ty.clone(),
            );
            let result = compile(&func);
            if ok {
                assert!(result.is_ok(), "{} inputs should compile", inputs);
            } else {
                assert!(
                    matches!(result, Err(CompileError::ArityTooLarge { arity: 10 })),
                    "{} inputs should hit the arity cap",
                    inputs
                );
            }
        }
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let x = Var::new("x");
        let stray = Var::new("stray");
        let ty = f32_ty(vec![1]);
        let func = Function::new(vec![Param::new(x, ty.clone())], Expr::var(&stray), ty);
        assert!(matches!(
            compile(&func),
            Err(CompileError::UnknownVariable(_))
        ));
    }

    #[test]
    fn nested_function_is_rejected() {
        let x = Var::new("x");
        let ty = f32_ty(vec![1]);
        let inner = Function::new(
            vec![Param::new(Var::new("y"), ty.clone())],
            Expr::var(&x),
            ty.clone(),
        );
        let func = Function::new(
            vec![Param::new(x.clone(), ty.clone())],
            Expr::Func(inner),
            ty,
        );
        assert!(matches!(compile(&func), Err(CompileError::NestedFunction)));
    }

    #[test]
    fn non_tensor_call_result_is_rejected() {
        let a = Var::new("a");
        let ty = f32_ty(vec![1]);
        let func_ty = Type::Func(tensorvm_ir::FuncType {
            params: vec![ty.clone()],
            ret: Box::new(ty.clone()),
        });
        let prim = Function {
            ret_ty: func_ty,
            ..elementwise_primitive(ElemOp::Add, 2, vec![1])
        };
        let func = Function::new(
            vec![Param::new(a.clone(), ty.clone())],
            Expr::call(Expr::Func(prim), vec![Expr::var(&a), Expr::var(&a)]),
            ty,
        );
        assert!(matches!(
            compile(&func),
            Err(CompileError::NonTensorResult(_))
        ));
    }

    #[test]
    fn symbolic_shape_is_rejected() {
        let a = Var::new("a");
        let ty = f32_ty(vec![2]);
        let mut prim = elementwise_primitive(ElemOp::Add, 2, vec![2]);
        prim.ret_ty = Type::Tensor(TensorType {
            shape: vec![tensorvm_ir::ShapeDim::Sym("n".into())],
            dtype: DataType::float32(),
        });
        let func = Function::new(
            vec![Param::new(a.clone(), ty.clone())],
            Expr::call(Expr::Func(prim), vec![Expr::var(&a), Expr::var(&a)]),
            ty,
        );
        assert!(matches!(compile(&func), Err(CompileError::DynamicShape(_))));
    }
}
