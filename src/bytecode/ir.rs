use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bytecode::Opcode;
use crate::lang::types::TypeSymbol;
use crate::lang::value::Value;
use crate::runtime::memory::{Memory, MemoryRef};

/// First character of every compiler-generated temporary (`[frame:seq]`).
pub const TEMP_MARKER: char = '[';

pub fn is_temporary_name(name: &str) -> bool {
    name.starts_with(TEMP_MARKER)
}

/// Stable handle of an instruction inside an [`Executable`]'s arena.
///
/// Handles stay valid while instructions are rewritten in place; only the
/// optimizer's cleanup pass rebuilds the arena, and it remaps every handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrId(pub usize);

/// Scalar constant embedded in an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Int(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(String),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(x) => Value::Float(*x),
            Literal::Double(x) => Value::Double(*x),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Char(c) => Value::Char(*c),
            Literal::Str(s) => Value::Str(s.clone()),
        }
    }

    pub fn type_symbol(&self) -> TypeSymbol {
        match self {
            Literal::Null => TypeSymbol::Null,
            Literal::Int(_) => TypeSymbol::Int,
            Literal::Float(_) => TypeSymbol::Float,
            Literal::Double(_) => TypeSymbol::Double,
            Literal::Bool(_) => TypeSymbol::Boolean,
            Literal::Char(_) => TypeSymbol::Char,
            Literal::Str(_) => TypeSymbol::String,
        }
    }
}

impl std::fmt::Display for Literal {
    /// Source-like rendering; strings and chars are quoted and escaped.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(x) => write!(f, "{}f", crate::lang::value::format_double(*x as f64)),
            Literal::Double(x) => write!(f, "{}", crate::lang::value::format_double(*x)),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Char(c) => write!(f, "'{}'", escape(&c.to_string(), '\'')),
            Literal::Str(s) => write!(f, "\"{}\"", escape(s, '"')),
        }
    }
}

fn escape(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\\' => out.push_str("\\\\"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Instruction operand.
///
/// Only `Variable`, `Member` and `Pointer` are assignable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Literal(Literal),
    Variable(String),
    /// `base.key`
    Member(Box<Operand>, String),
    /// `base[index]`, the index held in a variable.
    Pointer(Box<Operand>, String),
    InstructionPointer(InstrId),
    FunctionPointer(String),
    RoutinePointer(String),
}

impl Operand {
    pub fn var(name: impl Into<String>) -> Self {
        Operand::Variable(name.into())
    }

    pub fn int(n: i64) -> Self {
        Operand::Literal(Literal::Int(n))
    }

    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Operand::Variable(_) | Operand::Member(..) | Operand::Pointer(..)
        )
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Operand::Variable(name) if is_temporary_name(name))
    }

    pub fn variable_name(&self) -> Option<&str> {
        match self {
            Operand::Variable(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Operand::Literal(literal) => Some(literal),
            _ => None,
        }
    }

    /// Calls `f` for every variable name this operand reads or addresses.
    pub fn visit_names(&self, f: &mut impl FnMut(&str)) {
        match self {
            Operand::Variable(name) => f(name),
            Operand::Member(base, _) => base.visit_names(f),
            Operand::Pointer(base, index) => {
                base.visit_names(f);
                f(index);
            }
            _ => {}
        }
    }

    /// Names read when this operand is *written*: the base and index of an
    /// access path, but not a plain variable itself.
    pub fn visit_address_names(&self, f: &mut impl FnMut(&str)) {
        match self {
            Operand::Variable(_) => {}
            other => other.visit_names(f),
        }
    }

    pub fn mentions(&self, name: &str) -> bool {
        let mut found = false;
        self.visit_names(&mut |n| found |= n == name);
        found
    }

    /// Replaces `Variable(name)` in base position of an access path.
    pub fn substitute_base(&mut self, name: &str, with: &Operand) -> bool {
        match self {
            Operand::Member(base, _) | Operand::Pointer(base, _) => {
                if base.variable_name() == Some(name) {
                    **base = with.clone();
                    true
                } else {
                    base.substitute_base(name, with)
                }
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Literal(literal) => write!(f, "{}", literal),
            Operand::Variable(name) => write!(f, "{}", name),
            Operand::Member(base, key) => write!(f, "{}.{}", base, key),
            Operand::Pointer(base, index) => write!(f, "{}[{}]", base, index),
            Operand::InstructionPointer(id) => write!(f, "#{}", id.0),
            Operand::FunctionPointer(name) => write!(f, "<{}>", name),
            Operand::RoutinePointer(name) => write!(f, "&{}", name),
        }
    }
}

/// A single bytecode instruction. Deleting means rewriting to `NOP`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub address: usize,
    pub opcode: Opcode,
    pub op1: Option<Operand>,
    pub op2: Option<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode, op1: Option<Operand>, op2: Option<Operand>) -> Self {
        Self {
            address: 0,
            opcode,
            op1,
            op2,
        }
    }

    pub fn is_nop(&self) -> bool {
        self.opcode == Opcode::Nop
    }

    pub fn make_nop(&mut self) {
        self.opcode = Opcode::Nop;
        self.op1 = None;
        self.op2 = None;
    }

    /// Jump target of `JMP`/`JZ`/`JNZ`.
    pub fn jump_target(&self) -> Option<InstrId> {
        let operand = match self.opcode {
            Opcode::Jmp => self.op1.as_ref(),
            Opcode::Jz | Opcode::Jnz => self.op2.as_ref(),
            _ => None,
        };
        match operand {
            Some(Operand::InstructionPointer(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.op1.iter().chain(self.op2.iter())
    }

    pub fn operands_mut(&mut self) -> impl Iterator<Item = &mut Operand> {
        self.op1.iter_mut().chain(self.op2.iter_mut())
    }

    /// Calls `f` for every variable this instruction reads.
    pub fn visit_reads(&self, f: &mut impl FnMut(&str)) {
        if let Some(op1) = &self.op1 {
            if self.opcode.defines_op1() {
                op1.visit_address_names(f);
            } else {
                op1.visit_names(f);
            }
        }
        if let Some(op2) = &self.op2 {
            op2.visit_names(f);
        }
    }

    pub fn reads(&self, name: &str) -> bool {
        let mut found = false;
        self.visit_reads(&mut |n| found |= n == name);
        found
    }

    pub fn mentions(&self, name: &str) -> bool {
        self.operands().any(|op| op.mentions(name))
    }
}

/// A compiled function: name, parameter names and entry instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub entry: InstrId,
}

/// Name of the synthetic function holding script-level initializers.
pub const INIT_FUNCTION: &str = ".init";

/// One compiled script: instruction arena, function table and script memory.
#[derive(Debug)]
pub struct Executable {
    name: String,
    pub code: Vec<Instruction>,
    pub functions: IndexMap<String, Function>,
    memory: MemoryRef,
}

impl Executable {
    pub fn new(name: impl Into<String>, shared: &MemoryRef) -> Self {
        Self {
            name: name.into(),
            code: Vec::new(),
            functions: IndexMap::new(),
            memory: Memory::script(shared),
        }
    }

    /// Reassembles an executable from its parts, with fresh script memory.
    pub fn from_parts(
        name: impl Into<String>,
        code: Vec<Instruction>,
        functions: IndexMap<String, Function>,
        shared: &MemoryRef,
    ) -> Self {
        let mut executable = Self::new(name, shared);
        executable.code = code;
        executable.functions = functions;
        executable.renumber();
        executable
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Script-scope memory, chained to the manager's shared memory.
    pub fn memory(&self) -> &MemoryRef {
        &self.memory
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.code.get(id.0)
    }

    pub fn instruction_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.code.get_mut(id.0)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn emit(&mut self, opcode: Opcode, op1: Option<Operand>, op2: Option<Operand>) -> InstrId {
        let id = InstrId(self.code.len());
        let mut instruction = Instruction::new(opcode, op1, op2);
        instruction.address = id.0;
        self.code.push(instruction);
        id
    }

    /// Drops instructions emitted after `len` (speculative parse rollback).
    pub fn truncate(&mut self, len: usize) {
        self.code.truncate(len);
    }

    /// Re-assigns addresses from arena positions.
    pub fn renumber(&mut self) {
        for (index, instruction) in self.code.iter_mut().enumerate() {
            instruction.address = index;
        }
    }

    /// Address of a function's entry instruction.
    pub fn entry_address(&self, function: &str) -> Option<usize> {
        let entry = self.functions.get(function)?.entry;
        self.instruction(entry).map(|i| i.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_rendering_escapes() {
        let lit = Literal::Str("a\"b\n".to_string());
        assert_eq!(lit.to_string(), r#""a\"b\n""#);
        assert_eq!(Literal::Char('\'').to_string(), r"'\''");
        assert_eq!(Literal::Double(3.0).to_string(), "3.0");
    }

    #[test]
    fn test_operand_reads_for_destination() {
        let target = Operand::Pointer(Box::new(Operand::var("a")), "[0:1]".to_string());
        let instruction = Instruction::new(Opcode::Mov, Some(target), Some(Operand::var("b")));
        assert!(instruction.reads("a"));
        assert!(instruction.reads("[0:1]"));
        assert!(instruction.reads("b"));

        let plain = Instruction::new(Opcode::Mov, Some(Operand::var("x")), Some(Operand::int(1)));
        assert!(!plain.reads("x"));
        assert!(plain.mentions("x"));
    }

    #[test]
    fn test_in_place_ops_read_destination() {
        let add = Instruction::new(Opcode::Add, Some(Operand::var("x")), Some(Operand::int(1)));
        assert!(add.reads("x"));
    }

    #[test]
    fn test_substitute_base() {
        let mut op = Operand::Member(Box::new(Operand::var("[0:1]")), "x".to_string());
        let with = Operand::Pointer(Box::new(Operand::var("a")), "i".to_string());
        assert!(op.substitute_base("[0:1]", &with));
        assert_eq!(op.to_string(), "a[i].x");
    }

    #[test]
    fn test_jump_target() {
        let jz = Instruction::new(
            Opcode::Jz,
            Some(Operand::var("c")),
            Some(Operand::InstructionPointer(InstrId(7))),
        );
        assert_eq!(jz.jump_target(), Some(InstrId(7)));
        let mov = Instruction::new(Opcode::Mov, Some(Operand::var("c")), None);
        assert_eq!(mov.jump_target(), None);
    }
}
