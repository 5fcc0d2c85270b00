//! Reference CPU codegen: turn a lowered kernel into a packed callable.
//!
//! The generated kernel evaluates the operator tree once per output
//! element, reading inputs as f64 and writing the result through the
//! output argument's buffer in whatever dtype that buffer carries.

use crate::lower::{KernelExpr, LoweredKernel};
use std::sync::Arc;
use tensorvm_ir::ElemOp;
use tensorvm_runtime::{Buffer, KernelError, KernelResult, Object, PackedFunc, Tensor};

/// Compile a lowered kernel into its packed form.
pub fn codegen(kernel: &LoweredKernel) -> PackedFunc {
    let expr = kernel.expr.clone();
    let inputs = kernel.inputs;
    Arc::new(move |args: &[Object]| invoke(&expr, inputs, args))
}

fn invoke(expr: &KernelExpr, inputs: usize, args: &[Object]) -> KernelResult<()> {
    if args.len() != inputs + 1 {
        return Err(KernelError::Arity {
            expected: inputs + 1,
            got: args.len(),
        });
    }

    let tensor_arg = |index: usize| -> KernelResult<&Tensor> {
        args[index]
            .as_tensor()
            .map_err(|source| KernelError::BadArgument { index, source })
    };

    let output = tensor_arg(args.len() - 1)?;
    let mut lanes: Vec<Vec<f64>> = Vec::with_capacity(inputs);
    for i in 0..inputs {
        let t = tensor_arg(i)?;
        if t.shape() != output.shape() {
            return Err(KernelError::ShapeMismatch {
                index: i,
                expected: output.shape().to_vec(),
                got: t.shape().to_vec(),
            });
        }
        lanes.push(read_lane(t));
    }

    let count = output.num_elements();
    output.with_buffer_mut(|buf| {
        for idx in 0..count {
            let v = eval(expr, &lanes, idx);
            match buf {
                Buffer::F32(out) => out[idx] = v as f32,
                Buffer::I32(out) => out[idx] = v as i32,
                Buffer::Bool(out) => out[idx] = (v != 0.0) as u8,
            }
        }
    });
    Ok(())
}

fn read_lane(t: &Tensor) -> Vec<f64> {
    t.with_buffer(|buf| match buf {
        Buffer::F32(v) => v.iter().map(|&x| x as f64).collect(),
        Buffer::I32(v) => v.iter().map(|&x| x as f64).collect(),
        Buffer::Bool(v) => v.iter().map(|&x| (x != 0) as u8 as f64).collect(),
    })
}

fn eval(expr: &KernelExpr, lanes: &[Vec<f64>], idx: usize) -> f64 {
    match expr {
        KernelExpr::Input(i) => lanes[*i][idx],
        KernelExpr::Elem(op, args) => {
            let a = eval(&args[0], lanes, idx);
            match op {
                ElemOp::Neg => -a,
                ElemOp::Add => a + eval(&args[1], lanes, idx),
                ElemOp::Sub => a - eval(&args[1], lanes, idx),
                ElemOp::Mul => a * eval(&args[1], lanes, idx),
                ElemOp::Div => a / eval(&args[1], lanes, idx),
                ElemOp::Maximum => a.max(eval(&args[1], lanes, idx)),
                ElemOp::Equal => (a == eval(&args[1], lanes, idx)) as u8 as f64,
                ElemOp::Less => (a < eval(&args[1], lanes, idx)) as u8 as f64,
                ElemOp::Greater => (a > eval(&args[1], lanes, idx)) as u8 as f64,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorvm_ir::DataType;

    fn run(expr: KernelExpr, inputs: usize, args: &[Object]) -> KernelResult<()> {
        let kernel = LoweredKernel {
            name: "test".into(),
            expr,
            inputs,
        };
        codegen(&kernel)(args)
    }

    #[test]
    fn add_kernel_writes_output_in_place() {
        let a = Tensor::from_f32(&[4], vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        let b = Tensor::from_f32(&[4], vec![2.0, 3.0, 4.0, 5.0]).unwrap();
        let out = Tensor::zeroed(&[4], DataType::float32()).unwrap();
        run(
            KernelExpr::Elem(ElemOp::Add, vec![KernelExpr::Input(0), KernelExpr::Input(1)]),
            2,
            &[a.into(), b.into(), Object::Tensor(out.clone())],
        )
        .unwrap();
        assert_eq!(out.to_f32_vec().unwrap(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn comparison_kernel_fills_bool_output() {
        let a = Tensor::from_f32(&[], vec![2.0]).unwrap();
        let b = Tensor::from_f32(&[], vec![3.0]).unwrap();
        let out = Tensor::zeroed(&[], DataType::bool_()).unwrap();
        run(
            KernelExpr::Elem(ElemOp::Less, vec![KernelExpr::Input(0), KernelExpr::Input(1)]),
            2,
            &[a.into(), b.into(), Object::Tensor(out.clone())],
        )
        .unwrap();
        assert!(out.scalar_bool().unwrap());
    }

    #[test]
    fn arity_and_shape_are_checked() {
        let out = Tensor::zeroed(&[2], DataType::float32()).unwrap();
        let expr = KernelExpr::Input(0);
        assert!(matches!(
            run(expr.clone(), 1, &[Object::Tensor(out.clone())]),
            Err(KernelError::Arity { .. })
        ));

        let short = Tensor::from_f32(&[1], vec![1.0]).unwrap();
        assert!(matches!(
            run(expr, 1, &[short.into(), Object::Tensor(out)]),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }
}
