//! Bytecode optimizer.
//!
//! Rounds of
//!
//! 1. peephole rewriting until no rule fires,
//! 2. reachability-based dead-code elimination,
//! 3. removal of temporaries that are defined but never read,
//!
//! repeat until a whole round leaves the instruction list unchanged, so
//! running the optimizer on its own output is a no-op.
//!
//! Rewrites never shift instructions: a deleted instruction becomes `NOP`.
//! [`cleanup`] later drops the no-ops and retargets every jump and function
//! entry to the next live instruction.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::bytecode::Opcode;
use crate::bytecode::ir::{Executable, InstrId, Instruction, Literal, Operand, is_temporary_name};

/// Counters reported by [`optimize`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub rounds: usize,
    pub rewrites: usize,
    pub unreachable: usize,
    pub dead_temporaries: usize,
    pub before: usize,
    pub after: usize,
}

pub fn optimize(executable: &mut Executable) -> Summary {
    let mut summary = Summary {
        before: executable.len(),
        ..Summary::default()
    };

    loop {
        let snapshot = executable.code.clone();
        summary.rounds += 1;

        summary.rewrites += peephole(executable);
        summary.unreachable += eliminate_dead_code(executable);
        summary.dead_temporaries += eliminate_dead_temporaries(executable);
        cleanup(executable);

        if executable.code == snapshot {
            break;
        }
    }

    summary.after = executable.len();
    debug!(
        script = executable.name(),
        before = summary.before,
        after = summary.after,
        rounds = summary.rounds,
        rewrites = summary.rewrites,
        unreachable = summary.unreachable,
        dead_temporaries = summary.dead_temporaries,
        "optimized"
    );
    summary
}

// =============================================================================
// Peephole
// =============================================================================

type Uses = HashMap<String, usize>;

fn peephole(executable: &mut Executable) -> usize {
    let mut total = 0;
    loop {
        cleanup(executable);
        let fired = scan(executable);
        trace!(fired, "peephole pass");
        if fired == 0 {
            return total;
        }
        total += fired;
    }
}

fn scan(executable: &mut Executable) -> usize {
    let targets = jump_targets(executable);
    let mut uses = count_temporary_uses(&executable.code);
    let mut fired = 0;

    let mut i = 0;
    while i < executable.code.len() {
        if rewrite_at(&mut executable.code, i, &uses, &targets) {
            fired += 1;
            uses = count_temporary_uses(&executable.code);
        } else {
            i += 1;
        }
    }
    fired
}

/// Applies the first rule matching at `i`.
fn rewrite_at(code: &mut [Instruction], i: usize, uses: &Uses, targets: &HashSet<usize>) -> bool {
    match code[i].opcode {
        Opcode::Mov => {
            remove_self_move(code, i)
                || coalesce_temporary(code, i, uses, targets)
                || fold_push(code, i, uses, targets)
                || fold_branch(code, i, uses, targets)
                || fold_base(code, i, uses, targets)
        }
        Opcode::Pop => fold_pop(code, i, uses, targets),
        Opcode::Jz | Opcode::Jnz => resolve_literal_branch(code, i),
        Opcode::Add | Opcode::Sub => use_step_opcode(code, i),
        _ => false,
    }
}

/// `MOV x, x`
fn remove_self_move(code: &mut [Instruction], i: usize) -> bool {
    let ins = &code[i];
    match (&ins.op1, &ins.op2) {
        (Some(dst), Some(src)) if dst.is_assignable() && dst == src => {
            code[i].make_nop();
            true
        }
        _ => false,
    }
}

/// `MOV t, A; OP t, B...; MOV X, t` becomes `MOV X, A; OP X, B...`.
///
/// Covers both the binary and the unary shapes; zero operations turns
/// `MOV t, A; MOV X, t` into `MOV X, A`.
fn coalesce_temporary(
    code: &mut [Instruction],
    i: usize,
    uses: &Uses,
    targets: &HashSet<usize>,
) -> bool {
    let Some(temp) = defined_temporary(&code[i]) else {
        return false;
    };
    if code[i].op2.as_ref().is_none_or(|src| src.mentions(&temp)) {
        return false;
    }

    let mut end = i + 1;
    while end < code.len() && operates_in_place_on(&code[end], &temp) {
        end += 1;
    }

    let Some(last) = code.get(end) else {
        return false;
    };
    if last.opcode != Opcode::Mov || last.op2.as_ref().and_then(Operand::variable_name) != Some(temp.as_str()) {
        return false;
    }
    let Some(dest) = last.op1.clone() else {
        return false;
    };

    if dest.mentions(&temp)
        || use_count(uses, &temp) != end - i + 1
        || (i + 1..=end).any(|j| targets.contains(&j))
    {
        return false;
    }

    // The operations now write `dest` early; none of their sources may
    // observe that.
    let plain = dest.variable_name().is_some();
    let sources_safe = code[i + 1..end].iter().all(|op| match &op.op2 {
        None => true,
        Some(src) if plain => !shares_name(src, &dest),
        Some(src) => src.as_literal().is_some() || (src.is_temporary() && !shares_name(src, &dest)),
    });
    if !sources_safe {
        return false;
    }

    code[i].op1 = Some(dest.clone());
    for op in &mut code[i + 1..end] {
        op.op1 = Some(dest.clone());
    }
    code[end].make_nop();
    true
}

/// `MOV t, A; PUSH t` becomes `PUSH A`.
fn fold_push(code: &mut [Instruction], i: usize, uses: &Uses, targets: &HashSet<usize>) -> bool {
    let Some(temp) = single_use_temporary(code, i, uses, targets) else {
        return false;
    };
    let next = &code[i + 1];
    if next.opcode != Opcode::Push || next.op1.as_ref().and_then(Operand::variable_name) != Some(temp.as_str()) {
        return false;
    }

    let source = code[i].op2.take();
    code[i] = Instruction {
        address: code[i].address,
        opcode: Opcode::Push,
        op1: source,
        op2: None,
    };
    code[i + 1].make_nop();
    true
}

/// `MOV t, C; JZ t, L` becomes `JZ C, L` (same for `JNZ`).
fn fold_branch(code: &mut [Instruction], i: usize, uses: &Uses, targets: &HashSet<usize>) -> bool {
    let Some(temp) = single_use_temporary(code, i, uses, targets) else {
        return false;
    };
    let next = &code[i + 1];
    if !next.opcode.is_conditional_jump()
        || next.op1.as_ref().and_then(Operand::variable_name) != Some(temp.as_str())
    {
        return false;
    }

    let condition = code[i].op2.take();
    code[i + 1].op1 = condition;
    code[i].make_nop();
    true
}

/// `MOV t, a[i]; MOV x, t.f` becomes `MOV x, a[i].f`: a copied access path
/// used once as the base of another access is inlined.
fn fold_base(code: &mut [Instruction], i: usize, uses: &Uses, targets: &HashSet<usize>) -> bool {
    let Some(temp) = single_use_temporary(code, i, uses, targets) else {
        return false;
    };
    let Some(source) = code[i].op2.clone() else {
        return false;
    };
    if !source.is_assignable() {
        return false;
    }

    let mut next = code[i + 1].clone();
    let mut replaced = false;
    for operand in next.operands_mut() {
        replaced |= operand.substitute_base(&temp, &source);
    }
    if !replaced || next.mentions(&temp) {
        return false;
    }

    code[i + 1] = next;
    code[i].make_nop();
    true
}

/// `POP t; MOV X, t` becomes `POP X`.
fn fold_pop(code: &mut [Instruction], i: usize, uses: &Uses, targets: &HashSet<usize>) -> bool {
    let Some(temp) = code[i].op1.as_ref().and_then(Operand::variable_name) else {
        return false;
    };
    if !is_temporary_name(temp) || use_count(uses, temp) != 2 || targets.contains(&(i + 1)) {
        return false;
    }
    let Some(next) = code.get(i + 1) else {
        return false;
    };
    if next.opcode != Opcode::Mov || next.op2.as_ref().and_then(Operand::variable_name) != Some(temp) {
        return false;
    }

    let dest = code[i + 1].op1.take();
    code[i].op1 = dest;
    code[i + 1].make_nop();
    true
}

/// `JZ true, L` is a no-op and `JZ false, L` a plain jump; mirrored for `JNZ`.
fn resolve_literal_branch(code: &mut [Instruction], i: usize) -> bool {
    let Some(Operand::Literal(Literal::Bool(value))) = code[i].op1 else {
        return false;
    };
    let jumps = match code[i].opcode {
        Opcode::Jz => !value,
        _ => value,
    };

    if jumps {
        let target = code[i].op2.take();
        code[i].opcode = Opcode::Jmp;
        code[i].op1 = target;
    } else {
        code[i].make_nop();
    }
    true
}

/// `ADD x, 1` / `SUB x, 1` become `INC x` / `DEC x`.
fn use_step_opcode(code: &mut [Instruction], i: usize) -> bool {
    if code[i].op2 != Some(Operand::int(1)) {
        return false;
    }
    code[i].opcode = match code[i].opcode {
        Opcode::Add => Opcode::Inc,
        _ => Opcode::Dec,
    };
    code[i].op2 = None;
    true
}

// =============================================================================
// Dead code
// =============================================================================

/// Turns every instruction unreachable from a function entry into `NOP`.
fn eliminate_dead_code(executable: &mut Executable) -> usize {
    let len = executable.code.len();
    let mut reached = vec![false; len];
    let mut work: Vec<usize> = executable.functions.values().map(|f| f.entry.0).collect();

    while let Some(at) = work.pop() {
        if at >= len || reached[at] {
            continue;
        }
        reached[at] = true;

        let ins = &executable.code[at];
        match ins.opcode {
            Opcode::Ret => {}
            Opcode::Jmp => work.extend(ins.jump_target().map(|t| t.0)),
            Opcode::Jz | Opcode::Jnz => {
                work.extend(ins.jump_target().map(|t| t.0));
                work.push(at + 1);
            }
            Opcode::Call | Opcode::Run => {
                if let Some(Operand::FunctionPointer(name)) = &ins.op1 {
                    work.extend(executable.functions.get(name).map(|f| f.entry.0));
                }
                work.push(at + 1);
            }
            _ => work.push(at + 1),
        }
    }

    let mut removed = 0;
    for (ins, reached) in executable.code.iter_mut().zip(reached) {
        if !reached && !ins.is_nop() {
            ins.make_nop();
            removed += 1;
        }
    }
    trace!(removed, "dead code pass");
    removed
}

/// Removes definitions of temporaries that nothing reads, until none remain.
fn eliminate_dead_temporaries(executable: &mut Executable) -> usize {
    let mut removed = 0;
    loop {
        let mut read = HashSet::new();
        for ins in &executable.code {
            ins.visit_reads(&mut |name| {
                if is_temporary_name(name) {
                    read.insert(name.to_string());
                }
            });
        }

        let mut pass = 0;
        for ins in &mut executable.code {
            if !matches!(ins.opcode, Opcode::Mov | Opcode::Db | Opcode::Dsb | Opcode::Dc) {
                continue;
            }
            let dead = ins
                .op1
                .as_ref()
                .and_then(Operand::variable_name)
                .is_some_and(|name| is_temporary_name(name) && !read.contains(name));
            if dead {
                ins.make_nop();
                pass += 1;
            }
        }

        trace!(removed = pass, "dead temporary pass");
        if pass == 0 {
            return removed;
        }
        removed += pass;
    }
}

// =============================================================================
// Cleanup
// =============================================================================

/// Drops no-ops, retargets jumps and entries to the next live instruction
/// and renumbers. A targeted trailing `NOP` survives so every jump keeps a
/// target.
pub fn cleanup(executable: &mut Executable) -> usize {
    let len = executable.code.len();
    if len == 0 {
        return 0;
    }

    let targets = jump_targets(executable);
    let mut keep: Vec<bool> = executable.code.iter().map(|i| !i.is_nop()).collect();
    let mut next_live = next_kept(&keep);
    if targets.iter().any(|&t| next_live[t.min(len - 1)].is_none()) {
        keep[len - 1] = true;
        next_live = next_kept(&keep);
    }

    let mut new_index = vec![0; len];
    let mut count = 0;
    for (i, kept) in keep.iter().enumerate() {
        new_index[i] = count;
        if *kept {
            count += 1;
        }
    }

    let remap = |id: InstrId| -> InstrId {
        let at = id.0.min(len - 1);
        InstrId(new_index[next_live[at].unwrap_or(len - 1)])
    };

    let code = std::mem::take(&mut executable.code);
    executable.code = code
        .into_iter()
        .zip(&keep)
        .filter(|(_, kept)| **kept)
        .map(|(mut ins, _)| {
            for operand in ins.operands_mut() {
                if let Operand::InstructionPointer(id) = operand {
                    *id = remap(*id);
                }
            }
            ins
        })
        .collect();

    for function in executable.functions.values_mut() {
        function.entry = remap(function.entry);
    }
    executable.renumber();

    len - executable.code.len()
}

fn next_kept(keep: &[bool]) -> Vec<Option<usize>> {
    let mut next = vec![None; keep.len()];
    let mut upcoming = None;
    for i in (0..keep.len()).rev() {
        if keep[i] {
            upcoming = Some(i);
        }
        next[i] = upcoming;
    }
    next
}

// =============================================================================
// Helpers
// =============================================================================

/// Jump targets and function entries.
fn jump_targets(executable: &Executable) -> HashSet<usize> {
    let mut targets: HashSet<usize> = executable
        .code
        .iter()
        .flat_map(|ins| ins.operands())
        .filter_map(|op| match op {
            Operand::InstructionPointer(id) => Some(id.0),
            _ => None,
        })
        .collect();
    targets.extend(executable.functions.values().map(|f| f.entry.0));
    targets
}

fn count_temporary_uses(code: &[Instruction]) -> Uses {
    let mut uses = Uses::new();
    for ins in code {
        for operand in ins.operands() {
            operand.visit_names(&mut |name| {
                if is_temporary_name(name) {
                    *uses.entry(name.to_string()).or_default() += 1;
                }
            });
        }
    }
    uses
}

fn use_count(uses: &Uses, name: &str) -> usize {
    uses.get(name).copied().unwrap_or(0)
}

/// The temporary a `MOV t, A` defines.
fn defined_temporary(ins: &Instruction) -> Option<String> {
    if ins.opcode != Opcode::Mov {
        return None;
    }
    let name = ins.op1.as_ref()?.variable_name()?;
    is_temporary_name(name).then(|| name.to_string())
}

/// Temporary of `MOV t, A` at `i` when `t` occurs only there and in the
/// following instruction, which is not a jump target.
fn single_use_temporary(
    code: &[Instruction],
    i: usize,
    uses: &Uses,
    targets: &HashSet<usize>,
) -> Option<String> {
    let temp = defined_temporary(&code[i])?;
    let fits = i + 1 < code.len()
        && use_count(uses, &temp) == 2
        && !targets.contains(&(i + 1))
        && code[i].op2.as_ref().is_some_and(|src| !src.mentions(&temp));
    fits.then_some(temp)
}

/// `OP t, B` or `OP t` with `t` as the whole destination and not a source.
fn operates_in_place_on(ins: &Instruction, temp: &str) -> bool {
    (ins.opcode.is_binary() || ins.opcode.is_unary())
        && ins.op1.as_ref().and_then(Operand::variable_name) == Some(temp)
        && ins.op2.as_ref().is_none_or(|src| !src.mentions(temp))
}

fn shares_name(a: &Operand, b: &Operand) -> bool {
    let mut shared = false;
    a.visit_names(&mut |name| shared |= b.mentions(name));
    shared
}
