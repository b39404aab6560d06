use crate::bytecode::Bytecode;
use crate::bytecode::op::{CallTarget, Instruction, decode_at};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

/// Print disassembly of a bytecode stream
pub fn print_bc(bc: &Bytecode) {
    println!("=== BYTECODE ===\n");
    print!("{}", disassemble(bc));
}

/// Render one instruction per line.
///
/// Label landing points get a marker. Disassembly stops at the first slot
/// that does not decode and reports it inline.
pub fn disassemble(bc: &Bytecode) -> String {
    let mut out = String::new();
    let instructions = decode_all(bc);
    let targets = collect_label_targets(&instructions);
    let landing: HashSet<usize> = targets.values().copied().collect();

    let _ = writeln!(out, "════════════════════════════════════════");
    let _ = writeln!(out, " {} slots, {} labels", bc.len(), targets.len());
    let _ = writeln!(out, "════════════════════════════════════════");

    for entry in &instructions {
        match entry {
            Ok((address, instruction)) => {
                if landing.contains(address) {
                    let _ = writeln!(out, "      ┌──────────────────────────────────");
                }
                let marker = if landing.contains(address) { "► " } else { "  " };
                let _ = writeln!(
                    out,
                    "{:04} {}{}",
                    address,
                    marker,
                    format_instruction(instruction, &targets)
                );
            }
            Err(message) => {
                let _ = writeln!(out, "!!!! {}", message);
            }
        }
    }

    out
}

fn decode_all(bc: &Bytecode) -> Vec<Result<(usize, Instruction), String>> {
    let mut result = Vec::new();
    let mut address = 0;

    while address < bc.slots.len() {
        match decode_at(&bc.slots, address) {
            Ok((instruction, stride)) => {
                result.push(Ok((address, instruction)));
                address += stride;
            }
            Err(e) => {
                result.push(Err(e.to_string()));
                break;
            }
        }
    }

    result
}

fn collect_label_targets(
    instructions: &[Result<(usize, Instruction), String>],
) -> HashMap<i64, usize> {
    let mut targets = HashMap::new();

    for (address, instruction) in instructions.iter().flatten() {
        if let Instruction::Label(id) = instruction {
            targets.entry(*id).or_insert(address + 2);
        }
    }

    targets
}

fn format_instruction(instruction: &Instruction, targets: &HashMap<i64, usize>) -> String {
    let mnemonic = instruction.opcode().mnemonic();
    let target = |id: &i64| match targets.get(id) {
        Some(address) => format!("L{} (→ {:04})", id, address),
        None => format!("L{} (→ ????)", id),
    };

    match instruction {
        Instruction::Name(s) => format!("{:<11} {}", mnemonic, s),
        Instruction::Num(n) => format!("{:<11} {:?}", mnemonic, n),
        Instruction::Str(s) => format!("{:<11} {:?}", mnemonic, s),
        Instruction::Define(s) | Instruction::Load(s) | Instruction::Assign(s) => {
            format!("{:<11} {}", mnemonic, s)
        }
        Instruction::Label(id) => format!("{:<11} L{}", mnemonic, id),
        Instruction::JumpIf(id) | Instruction::Jump(id) | Instruction::Routine(id) => {
            format!("{:<11} {}", mnemonic, target(id))
        }
        Instruction::Call(CallTarget::Label(id)) => format!("{:<11} {}", mnemonic, target(id)),
        Instruction::Call(CallTarget::Name(name)) => format!("{:<11} \"{}\"", mnemonic, name),
        Instruction::MakeList => format!("{:<11} ; ( v1 .. vn n -- list )", mnemonic),
        Instruction::PopStack => format!("{:<11} ; keeps callee top", mnemonic),
        Instruction::Return => format!("{:<11} ; keeps callee top", mnemonic),
        _ => mnemonic.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Emitter;
    use crate::bytecode::op::{Opcode, Slot};

    #[test]
    fn test_disassemble_marks_landing() {
        let bc = Emitter::new()
            .emit(Instruction::Jump(1))
            .str("skipped")
            .label(1)
            .num(1.0)
            .finish();
        let text = disassemble(&bc);
        assert!(text.contains("JUMP        L1 (→ 0006)"));
        assert!(text.contains("0006 ► NUM"));
        assert!(text.contains("STR         \"skipped\""));
    }

    #[test]
    fn test_disassemble_reports_torn_stream() {
        let bc = Bytecode::from_slots(vec![Slot::Op(Opcode::Pop), Slot::Op(Opcode::Str)]);
        let text = disassemble(&bc);
        assert!(text.contains("0000   POP"));
        assert!(text.contains("!!!! malformed stream at 0001"));
    }

    #[test]
    fn test_disassemble_assign() {
        let bc = Emitter::new()
            .emit(Instruction::Assign("count".to_string()))
            .finish();
        assert!(disassemble(&bc).contains("0000   ASSIGN      count"));
    }
}
