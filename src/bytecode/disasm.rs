use std::collections::HashMap;
use std::fmt::Write;

use indexmap::IndexMap;

use crate::bytecode::Opcode;
use crate::bytecode::ir::{Executable, Instruction, Operand};

/// Full listing of an executable: one block per function, in address order.
pub fn disassemble(exe: &Executable) -> String {
    let mut entries: HashMap<usize, Vec<&str>> = HashMap::new();
    for function in exe.functions.values() {
        entries.entry(function.entry.0).or_default().push(&function.name);
    }

    let mut out = String::new();
    let _ = writeln!(out, "=== {} ({} instructions) ===", exe.name(), exe.len());

    for (index, ins) in exe.code.iter().enumerate() {
        if let Some(names) = entries.get(&index) {
            for name in names {
                let params = exe
                    .function(name)
                    .map(|f| f.params.join(", "))
                    .unwrap_or_default();
                let _ = writeln!(out, "════════════════════════════════════════");
                let _ = writeln!(out, " {}({})", name, params);
                let _ = writeln!(out, "════════════════════════════════════════");
            }
        }
        let _ = writeln!(out, "{}", render_instruction(exe, ins));
    }
    out
}

pub fn print_executable(exe: &Executable) {
    print!("{}", disassemble(exe));
}

/// `[ADDRESS]    OPCODE op1, op2`
pub fn render_instruction(exe: &Executable, ins: &Instruction) -> String {
    let operands: Vec<String> = ins.operands().map(|op| render_operand(exe, op)).collect();
    let line = format!("[{:08X}]    {:<5} {}", ins.address, ins.opcode.mnemonic(), operands.join(", "));
    line.trim_end().to_string()
}

/// Operands with resolved addresses: jump targets as `[ADDRESS]`,
/// functions as `<name@ADDRESS>`.
pub fn render_operand(exe: &Executable, operand: &Operand) -> String {
    match operand {
        Operand::InstructionPointer(id) => match exe.instruction(*id) {
            Some(target) => format!("[{:08X}]", target.address),
            None => "[????????]".to_string(),
        },
        Operand::FunctionPointer(name) => match exe.entry_address(name) {
            Some(address) => format!("<{}@{:08X}>", name, address),
            None => format!("<{}@????????>", name),
        },
        other => other.to_string(),
    }
}

/// Opcode histogram, most frequent first.
pub fn opcode_counts(exe: &Executable) -> IndexMap<Opcode, usize> {
    let mut counts: HashMap<Opcode, usize> = HashMap::new();
    for ins in &exe.code {
        *counts.entry(ins.opcode).or_default() += 1;
    }

    let mut sorted: Vec<(Opcode, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.mnemonic().cmp(b.0.mnemonic())));
    sorted.into_iter().collect()
}
