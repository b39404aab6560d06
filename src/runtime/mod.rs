pub mod builtins;
pub mod frames;
pub mod runtime_error;
pub mod scope;
pub mod stack;
pub mod vm;

pub use builtins::Builtins;
pub use runtime_error::{ErrorKind, RuntimeError};
pub use vm::{Halt, Vm, VmConfig};
