pub mod disasm;
pub mod ir;
pub mod labels;
pub mod load_error;
pub mod op;

pub use ir::{Bytecode, Emitter};
pub use load_error::LoadError;
pub use op::{CallTarget, Instruction, Opcode, Slot};
