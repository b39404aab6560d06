use crate::bytecode::load_error::LoadError;
use crate::bytecode::op::{CallTarget, Instruction, Slot};
use serde::{Deserialize, Serialize};

/// An encoded instruction stream.
///
/// Slot positions are the addresses jumps and calls refer to. The stream is
/// immutable once handed to the machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bytecode {
    pub slots: Vec<Slot>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Encode with postcard.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode a postcard-encoded stream. Structural validation happens at load.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Appends instructions to a stream. Used by hosts and tests; the real
/// compiler lives outside this crate.
#[derive(Debug, Default)]
pub struct Emitter {
    slots: Vec<Slot>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        instruction.encode(&mut self.slots);
        self
    }

    pub fn num(&mut self, n: f64) -> &mut Self {
        self.emit(Instruction::Num(n))
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.emit(Instruction::Str(s.to_string()))
    }

    pub fn label(&mut self, id: i64) -> &mut Self {
        self.emit(Instruction::Label(id))
    }

    pub fn call(&mut self, name: &str) -> &mut Self {
        self.emit(Instruction::Call(CallTarget::Name(name.to_string())))
    }

    pub fn finish(&mut self) -> Bytecode {
        Bytecode::from_slots(std::mem::take(&mut self.slots))
    }
}
