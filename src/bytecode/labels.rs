//! Label resolution.
//!
//! A single prescan over the stream maps every `LABEL id` to the address of
//! the slot right after the label's own two-slot encoding. Jumps and calls
//! land there. The scan also decodes every instruction, so a stream that
//! loads cleanly has no torn instructions.

use std::collections::HashMap;

use tracing::debug;

use crate::bytecode::load_error::LoadError;
use crate::bytecode::op::{Instruction, Slot, decode_at};

/// Label id -> landing address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    targets: HashMap<i64, usize>,
}

impl LabelTable {
    pub fn get(&self, label: i64) -> Option<usize> {
        self.targets.get(&label).copied()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// The stream decoded once, indexed by slot address.
///
/// Operand slots hold `None`, so a jump into the middle of an instruction is
/// detectable in O(1).
#[derive(Debug, Clone)]
pub struct Resolved {
    pub labels: LabelTable,
    pub decoded: Vec<Option<Instruction>>,
}

/// Decode the stream and build its label table.
///
/// Duplicate label ids are rejected rather than letting the last one win.
/// Every label referenced by a jump, call or routine must be defined.
pub fn resolve(slots: &[Slot]) -> Result<Resolved, LoadError> {
    let mut labels = LabelTable::default();
    let mut defined_at: HashMap<i64, usize> = HashMap::new();
    let mut decoded: Vec<Option<Instruction>> = vec![None; slots.len()];
    let mut references: Vec<(i64, usize)> = Vec::new();

    let mut address = 0;
    while address < slots.len() {
        let (instruction, stride) = decode_at(slots, address)?;

        if let Instruction::Label(id) = instruction {
            if let Some(first) = defined_at.insert(id, address) {
                return Err(LoadError::DuplicateLabel {
                    label: id,
                    first,
                    second: address,
                });
            }
            labels.targets.insert(id, address + stride);
        }

        if let Some(id) = instruction.label_ref() {
            references.push((id, address));
        }

        decoded[address] = Some(instruction);
        address += stride;
    }

    for (label, address) in references {
        if labels.get(label).is_none() {
            return Err(LoadError::UnresolvedLabel { label, address });
        }
    }

    debug!(
        slots = slots.len(),
        labels = labels.len(),
        "resolved instruction stream"
    );

    Ok(Resolved { labels, decoded })
}
