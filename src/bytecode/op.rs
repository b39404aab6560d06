use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bytecode::load_error::LoadError;

// =============================================================================
// OPCODE - Instruction tags
// =============================================================================

/// Instruction tag as it appears in a tag slot.
///
/// The discriminants are the wire tags shared with the compiler. Tag 8 is
/// `Label`; every tag from 12 up is a structural extension used by the
/// calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // literals
    Name = 0,
    Num = 1,
    Str = 2,
    MakeList = 3,

    // frames and scopes
    PushStack = 4,
    PopStack = 5,
    PushScope = 6,
    PopScope = 7,

    // control flow
    Label = 8,
    JumpIf = 9,
    Jump = 10,
    Call = 11,
    Return = 12,

    // bindings
    Define = 13,
    Load = 14,
    Routine = 15,

    Pop = 16,
    Scope = 17,
    Assign = 18,
}

/// The kind of inline operand an opcode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Num,
    Text,
    Label,
    /// `Call` accepts either a label id or a name.
    Target,
}

impl Opcode {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn operand_kind(self) -> OperandKind {
        use Opcode::*;
        match self {
            Num => OperandKind::Num,
            Name | Str | Define | Load | Assign => OperandKind::Text,
            Label | JumpIf | Jump | Routine => OperandKind::Label,
            Call => OperandKind::Target,
            MakeList | PushStack | PopStack | PushScope | PopScope | Return | Pop | Scope => {
                OperandKind::None
            }
        }
    }

    /// Number of stream slots one instruction with this tag occupies.
    pub fn stride(self) -> usize {
        match self.operand_kind() {
            OperandKind::None => 1,
            _ => 2,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Name => "NAME",
            Num => "NUM",
            Str => "STR",
            MakeList => "MAKE_LIST",
            PushStack => "PUSH_STACK",
            PopStack => "POP_STACK",
            PushScope => "PUSH_SCOPE",
            PopScope => "POP_SCOPE",
            Label => "LABEL",
            JumpIf => "JUMP_IF",
            Jump => "JUMP",
            Call => "CALL",
            Return => "RETURN",
            Define => "DEFINE",
            Load => "LOAD",
            Routine => "ROUTINE",
            Pop => "POP",
            Scope => "SCOPE",
            Assign => "ASSIGN",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// =============================================================================
// SLOT - One cell of the instruction stream
// =============================================================================

/// One cell of an encoded instruction stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    Op(Opcode),
    Num(f64),
    Str(String),
    Int(i64),
}

impl Slot {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Slot::Op(_) => "opcode",
            Slot::Num(_) => "number",
            Slot::Str(_) => "text",
            Slot::Int(_) => "integer",
        }
    }
}

// =============================================================================
// INSTRUCTION - Decoded view of one tag (+ operand)
// =============================================================================

/// Where a `CALL` transfers control.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    Label(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Name(String),
    Num(f64),
    Str(String),
    MakeList,
    PushStack,
    PopStack,
    PushScope,
    PopScope,
    Label(i64),
    JumpIf(i64),
    Jump(i64),
    Call(CallTarget),
    Return,
    Define(String),
    Load(String),
    Routine(i64),
    Pop,
    Scope,
    Assign(String),
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Name(_) => Opcode::Name,
            Instruction::Num(_) => Opcode::Num,
            Instruction::Str(_) => Opcode::Str,
            Instruction::MakeList => Opcode::MakeList,
            Instruction::PushStack => Opcode::PushStack,
            Instruction::PopStack => Opcode::PopStack,
            Instruction::PushScope => Opcode::PushScope,
            Instruction::PopScope => Opcode::PopScope,
            Instruction::Label(_) => Opcode::Label,
            Instruction::JumpIf(_) => Opcode::JumpIf,
            Instruction::Jump(_) => Opcode::Jump,
            Instruction::Call(_) => Opcode::Call,
            Instruction::Return => Opcode::Return,
            Instruction::Define(_) => Opcode::Define,
            Instruction::Load(_) => Opcode::Load,
            Instruction::Routine(_) => Opcode::Routine,
            Instruction::Pop => Opcode::Pop,
            Instruction::Scope => Opcode::Scope,
            Instruction::Assign(_) => Opcode::Assign,
        }
    }

    /// The label id this instruction refers to, if it jumps or calls by label.
    pub fn label_ref(&self) -> Option<i64> {
        match self {
            Instruction::JumpIf(id)
            | Instruction::Jump(id)
            | Instruction::Routine(id)
            | Instruction::Call(CallTarget::Label(id)) => Some(*id),
            _ => None,
        }
    }

    /// Encode back into stream slots.
    pub fn encode(&self, out: &mut Vec<Slot>) {
        out.push(Slot::Op(self.opcode()));
        match self {
            Instruction::Name(s)
            | Instruction::Str(s)
            | Instruction::Define(s)
            | Instruction::Load(s)
            | Instruction::Assign(s)
            | Instruction::Call(CallTarget::Name(s)) => out.push(Slot::Str(s.clone())),
            Instruction::Num(n) => out.push(Slot::Num(*n)),
            Instruction::Label(id)
            | Instruction::JumpIf(id)
            | Instruction::Jump(id)
            | Instruction::Routine(id)
            | Instruction::Call(CallTarget::Label(id)) => out.push(Slot::Int(*id)),
            _ => {}
        }
    }
}

/// Decode the instruction whose tag sits at `address`.
///
/// Returns the instruction and its stride. This is the only place stride is
/// computed, so the label resolver and the engine always agree on it.
pub fn decode_at(slots: &[Slot], address: usize) -> Result<(Instruction, usize), LoadError> {
    let opcode = match slots.get(address) {
        Some(Slot::Op(op)) => *op,
        Some(other) => {
            return Err(LoadError::malformed(
                address,
                format!("expected opcode, found {} slot", other.kind_name()),
            ));
        }
        None => return Err(LoadError::malformed(address, "address past end of stream")),
    };

    let kind = opcode.operand_kind();
    if kind == OperandKind::None {
        let instruction = match opcode {
            Opcode::MakeList => Instruction::MakeList,
            Opcode::PushStack => Instruction::PushStack,
            Opcode::PopStack => Instruction::PopStack,
            Opcode::PushScope => Instruction::PushScope,
            Opcode::PopScope => Instruction::PopScope,
            Opcode::Return => Instruction::Return,
            Opcode::Pop => Instruction::Pop,
            Opcode::Scope => Instruction::Scope,
            other => {
                return Err(LoadError::malformed(
                    address,
                    format!("{} has no zero-operand form", other),
                ));
            }
        };
        return Ok((instruction, 1));
    }

    let operand = slots.get(address + 1).ok_or_else(|| {
        LoadError::malformed(address, format!("{} is missing its operand", opcode))
    })?;

    let instruction = match (opcode, operand) {
        (Opcode::Num, Slot::Num(n)) => Instruction::Num(*n),
        (Opcode::Name, Slot::Str(s)) => Instruction::Name(s.clone()),
        (Opcode::Str, Slot::Str(s)) => Instruction::Str(s.clone()),
        (Opcode::Define, Slot::Str(s)) => Instruction::Define(s.clone()),
        (Opcode::Load, Slot::Str(s)) => Instruction::Load(s.clone()),
        (Opcode::Assign, Slot::Str(s)) => Instruction::Assign(s.clone()),
        (Opcode::Label, Slot::Int(id)) => Instruction::Label(*id),
        (Opcode::JumpIf, Slot::Int(id)) => Instruction::JumpIf(*id),
        (Opcode::Jump, Slot::Int(id)) => Instruction::Jump(*id),
        (Opcode::Routine, Slot::Int(id)) => Instruction::Routine(*id),
        (Opcode::Call, Slot::Int(id)) => Instruction::Call(CallTarget::Label(*id)),
        (Opcode::Call, Slot::Str(s)) => Instruction::Call(CallTarget::Name(s.clone())),
        (op, slot) => {
            return Err(LoadError::malformed(
                address,
                format!("{} cannot take a {} operand", op, slot.kind_name()),
            ));
        }
    };

    Ok((instruction, 2))
}
