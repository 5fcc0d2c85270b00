//! The virtual machine: a value stack, a frame stack, and a dispatch
//! loop over the six opcodes.
//!
//! Stack layout at function entry, growing upward from `bp - 1`: one
//! reserved return slot, then the arguments in order, then temporaries.
//! `bp` points at the first argument. `Ret` copies the top of stack
//! into the reserved slot, drops the arguments, and restores the
//! caller's frame; the dispatch loop exits once the frame stack is back
//! at its depth from before `invoke` pushed the entry frame.

use crate::instruction::{Instruction, VmFunction};
use std::sync::Arc;
use tensorvm_runtime::{KernelError, Object, ObjectError, PackedFunc, Tensor, TensorError};
use thiserror::Error;
use tracing::trace;

/// A runtime failure. All of these are fatal to the invocation; the
/// machine's state is not guaranteed reusable afterwards.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("no function at index {index} (table has {len})")]
    FunctionOutOfRange { index: usize, len: usize },

    #[error("function takes {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("no packed function at index {index} (table has {len})")]
    PackedOutOfRange { index: usize, len: usize },

    #[error("stack slot {slot} is out of range (stack size {stack_size})")]
    SlotOutOfRange { slot: usize, stack_size: usize },

    #[error("stack underflow: needed {needed} values, have {have}")]
    StackUnderflow { needed: usize, have: usize },

    #[error("`ret` with an empty frame stack")]
    EmptyFrameStack,

    #[error("program counter {pc} is outside the code (length {len})")]
    PcOutOfRange { pc: usize, len: usize },

    #[error("the `invoke` opcode is reserved and cannot be executed (func {func_index})")]
    InvokeReserved { func_index: usize },

    #[error("branch condition: {0}")]
    Condition(#[from] TensorError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("allocation failed: {0}")]
    Alloc(TensorError),
}

pub type ExecResult<T> = Result<T, ExecError>;

/// Caller context saved across a call.
#[derive(Debug, Clone)]
struct Frame {
    /// Program counter to resume at.
    pc: usize,
    /// Saved base pointer.
    bp: usize,
    /// Saved function index.
    func_index: usize,
    /// Argument count of the call that produced this frame.
    args: usize,
    /// Saved code of the caller.
    code: Arc<[Instruction]>,
}

/// A compiled module ready to execute. Single-threaded and
/// non-reentrant per instance; independent instances may run in
/// parallel.
pub struct VirtualMachine {
    functions: Vec<VmFunction>,
    packed_funcs: Vec<PackedFunc>,
    frames: Vec<Frame>,
    stack: Vec<Object>,
    func_index: usize,
    code: Arc<[Instruction]>,
    pc: usize,
    bp: usize,
}

impl VirtualMachine {
    /// Build a machine over linked function and kernel tables.
    pub fn new(functions: Vec<VmFunction>, packed_funcs: Vec<PackedFunc>) -> Self {
        Self {
            functions,
            packed_funcs,
            frames: Vec::new(),
            stack: Vec::new(),
            func_index: 0,
            code: Arc::from(Vec::new()),
            pc: 0,
            bp: 0,
        }
    }

    /// The function table, in module insertion order.
    pub fn functions(&self) -> &[VmFunction] {
        &self.functions
    }

    /// Execute the function at `func_index` against the given arguments
    /// and return its single result.
    pub fn invoke(&mut self, func_index: usize, args: Vec<Object>) -> ExecResult<Object> {
        let func = self
            .functions
            .get(func_index)
            .ok_or(ExecError::FunctionOutOfRange {
                index: func_index,
                len: self.functions.len(),
            })?
            .clone();
        if args.len() != func.params {
            return Err(ExecError::ArgumentCount {
                expected: func.params,
                got: args.len(),
            });
        }

        // Frame depth before the entry frame: `run` exits once `ret`
        // brings the frame stack back down to it.
        let entry_depth = self.frames.len();

        // Reserved return slot, then the arguments in order.
        self.stack.push(Object::Null);
        for arg in args {
            self.stack.push(arg);
        }

        self.push_frame(func.params, self.pc + 1);
        self.func_index = func_index;
        self.code = func.instructions.clone();
        self.pc = 0;
        self.bp = self.stack.len() - func.params;
        trace!(bp = self.bp, stack = self.stack.len(), "entering function");

        self.run(entry_depth)?;

        Ok(self
            .stack
            .last()
            .cloned()
            .expect("return discipline leaves the result on top"))
    }

    fn push_frame(&mut self, arg_count: usize, ret_pc: usize) {
        self.frames.push(Frame {
            pc: ret_pc,
            bp: self.bp,
            func_index: self.func_index,
            args: arg_count,
            code: self.code.clone(),
        });
    }

    /// Pop a frame: write the return value into the reserved slot, drop
    /// the arguments, and restore the caller context. Returns the new
    /// frame depth.
    fn pop_frame(&mut self) -> ExecResult<usize> {
        let frame = self.frames.pop().ok_or(ExecError::EmptyFrameStack)?;
        let stack_size = self.stack.len();
        if frame.args + 1 > stack_size {
            return Err(ExecError::StackUnderflow {
                needed: frame.args + 1,
                have: stack_size,
            });
        }
        // Copy the result into the reserved return slot and drop the
        // argument block above it.
        self.stack[stack_size - frame.args - 1] = self.stack[stack_size - 1].clone();
        self.stack.truncate(stack_size - frame.args);
        self.bp = frame.bp;
        self.pc = frame.pc;
        self.func_index = frame.func_index;
        self.code = frame.code;
        Ok(self.frames.len())
    }

    fn run(&mut self, entry_depth: usize) -> ExecResult<()> {
        loop {
            let instr = self
                .code
                .get(self.pc)
                .ok_or(ExecError::PcOutOfRange {
                    pc: self.pc,
                    len: self.code.len(),
                })?
                .clone();
            trace!(pc = self.pc, stack = self.stack.len(), %instr, "executing");

            match instr {
                Instruction::Push { index } => {
                    let slot = self.bp + index;
                    if slot >= self.stack.len() {
                        return Err(ExecError::SlotOutOfRange {
                            slot,
                            stack_size: self.stack.len(),
                        });
                    }
                    self.stack.push(self.stack[slot].clone());
                    self.pc += 1;
                }

                Instruction::AllocTensor { shape, dtype } => {
                    let tensor = Tensor::zeroed(&shape, dtype).map_err(ExecError::Alloc)?;
                    self.stack.push(Object::Tensor(tensor));
                    self.pc += 1;
                }

                Instruction::InvokePacked { index, arity } => {
                    self.invoke_packed(index, arity)?;
                    self.pc += 1;
                }

                Instruction::If {
                    true_offset,
                    false_offset,
                } => {
                    let cond = self.stack.pop().ok_or(ExecError::StackUnderflow {
                        needed: 1,
                        have: 0,
                    })?;
                    let branch = cond.as_tensor()?.scalar_bool()?;
                    let offset = if branch { true_offset } else { false_offset };
                    self.pc = self.pc.wrapping_add_signed(offset);
                }

                Instruction::Ret => {
                    // If this return restores the frame depth from which
                    // `invoke` started, break out to the caller;
                    // otherwise the restored pc already addresses the
                    // instruction after the call.
                    if self.pop_frame()? == entry_depth {
                        return Ok(());
                    }
                }

                Instruction::Invoke { func_index } => {
                    return Err(ExecError::InvokeReserved { func_index });
                }
            }
        }
    }

    /// Dispatch a packed kernel over the top `arity` stack values, then
    /// collapse them to the single result the kernel wrote into its
    /// output argument.
    fn invoke_packed(&mut self, index: usize, arity: usize) -> ExecResult<()> {
        let func = self
            .packed_funcs
            .get(index)
            .ok_or(ExecError::PackedOutOfRange {
                index,
                len: self.packed_funcs.len(),
            })?
            .clone();
        let stack_size = self.stack.len();
        if arity > stack_size {
            return Err(ExecError::StackUnderflow {
                needed: arity,
                have: stack_size,
            });
        }

        let args_start = stack_size - arity;
        func(&self.stack[args_start..])?;

        // The result sits in the output argument on top; collapse the
        // argument block down to it.
        self.stack[args_start] = self.stack[stack_size - 1].clone();
        self.stack.truncate(args_start + 1);
        Ok(())
    }
}
