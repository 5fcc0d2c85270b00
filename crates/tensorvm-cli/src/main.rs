//! Command-line driver: build demo IR programs, compile them, and run
//! them on the VM.

use clap::{Parser, Subcommand, ValueEnum};
use tensorvm_backend::Target;
use tensorvm_ir::{DataType, ElemOp, Expr, Function, Module, Param, TensorType, Type, Var};
use tensorvm_runtime::Tensor;
use tensorvm_vm::{compile_module, evaluate, inline_primitives};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error("evaluation failed: {0}")]
    Eval(#[from] tensorvm_vm::EvalError),

    #[error("compilation failed: {0}")]
    Compile(#[from] tensorvm_vm::CompileError),

    #[error("bad input tensor: {0}")]
    Tensor(#[from] tensorvm_runtime::TensorError),
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "tensorvm", version)]
#[command(about = "Bytecode VM for tensor IR programs", long_about = None)]
struct Cli {
    /// Log per-instruction execution traces (same as RUST_LOG=trace)
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a built-in demo program
    Run {
        #[arg(value_enum)]
        program: Demo,
    },

    /// Compile a demo program and print its entry bytecode
    Dump {
        #[arg(value_enum)]
        program: Demo,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Demo {
    /// fn(x) { x }
    Identity,
    /// fn(a, b) { add(a, b) }
    Add,
    /// fn(a, b) { let t = mul(a, b); add(t, a) }
    Chain,
    /// fn(c, x, y) { if c then x else y }
    Select,
}

fn f32_ty(shape: Vec<i64>) -> Type {
    Type::tensor(shape, DataType::float32())
}

fn binary_primitive(op: ElemOp, shape: Vec<i64>) -> Function {
    let a = Var::new("a");
    let b = Var::new("b");
    let ty = f32_ty(shape);
    Function::primitive(
        vec![
            Param::new(a.clone(), ty.clone()),
            Param::new(b.clone(), ty.clone()),
        ],
        Expr::call(Expr::Op(op), vec![Expr::var(&a), Expr::var(&b)]),
        ty,
    )
}

/// Build a demo: the program plus its canned input tensors.
fn build_demo(demo: Demo) -> CliResult<(Function, Vec<Tensor>)> {
    match demo {
        Demo::Identity => {
            let x = Var::new("x");
            let ty = f32_ty(vec![2, 2]);
            let func = Function::new(vec![Param::new(x.clone(), ty.clone())], Expr::var(&x), ty);
            let input = Tensor::from_f32(&[2, 2], vec![1.0, 2.0, 3.0, 4.0])?;
            Ok((func, vec![input]))
        }
        Demo::Add => {
            let a = Var::new("a");
            let b = Var::new("b");
            let ty = f32_ty(vec![4]);
            let add = binary_primitive(ElemOp::Add, vec![4]);
            let func = Function::new(
                vec![
                    Param::new(a.clone(), ty.clone()),
                    Param::new(b.clone(), ty.clone()),
                ],
                Expr::call(Expr::Func(add), vec![Expr::var(&a), Expr::var(&b)]),
                ty,
            );
            let lhs = Tensor::from_f32(&[4], vec![1.0, 1.0, 1.0, 1.0])?;
            let rhs = Tensor::from_f32(&[4], vec![2.0, 3.0, 4.0, 5.0])?;
            Ok((func, vec![lhs, rhs]))
        }
        Demo::Chain => {
            let a = Var::new("a");
            let b = Var::new("b");
            let t = Var::new("t");
            let ty = f32_ty(vec![4]);
            let mul = binary_primitive(ElemOp::Mul, vec![4]);
            let add = binary_primitive(ElemOp::Add, vec![4]);
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
            let lhs = Tensor::from_f32(&[4], vec![1.0, 2.0, 3.0, 4.0])?;
            let rhs = Tensor::from_f32(&[4], vec![2.0, 3.0, 4.0, 5.0])?;
            Ok((func, vec![lhs, rhs]))
        }
        Demo::Select => {
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
            let cond = Tensor::scalar_from_bool(true);
            let x = Tensor::from_f32(&[1], vec![7.0])?;
            let y = Tensor::from_f32(&[1], vec![9.0])?;
            Ok((func, vec![cond, x, y]))
        }
    }
}

fn run(demo: Demo) -> CliResult<()> {
    let (func, args) = build_demo(demo)?;
    let module = Module::from_expr(Expr::Func(func)).expect("demo is a function");
    info!(?demo, "running demo");
    let result = evaluate(&module, args)?;
    println!(
        "result: shape {:?} {} {:?}",
        result.shape(),
        result.dtype(),
        result.to_f32_vec()?
    );
    Ok(())
}

fn dump(demo: Demo) -> CliResult<()> {
    let (func, _) = build_demo(demo)?;
    let module = Module::from_expr(Expr::Func(func)).expect("demo is a function");
    let inlined = inline_primitives(&module);
    let vm = compile_module(&inlined, &Target::llvm())?;
    print!("{}", vm.functions()[0]);
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let outcome = match cli.command {
        Commands::Run { program } => run(program),
        Commands::Dump { program } => dump(program),
    };
    if let Err(err) = outcome {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
