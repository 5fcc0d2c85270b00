//! Runtime values for the tensor VM.

pub mod object;
pub mod packed;
pub mod tensor;

pub use object::{Object, ObjectError};
pub use packed::{KernelError, KernelResult, PackedFunc};
pub use tensor::{Buffer, Device, Tensor, TensorError, TensorResult};
