//! Kiln: a stack-based bytecode machine.
//!
//! A stream of tagged slots is decoded and label-resolved once at load time,
//! then run by a fetch/decode/execute loop over an operand stack, a chain of
//! scopes and a stack of saved frames. Hosts supply built-ins; the machine
//! defines none.

pub mod bytecode;
pub mod lang;
pub mod runtime;

pub use bytecode::{Bytecode, Emitter, Instruction, LoadError};
pub use lang::value::Value;
pub use runtime::{Builtins, ErrorKind, Halt, RuntimeError, Vm, VmConfig};
