use serde::{Deserialize, Serialize};

// =============================================================================
// OPCODE - Bytecode instructions
// =============================================================================
//
// Instructions are two-address: `op1` is the destination (and, for in-place
// operations, also the left input), `op2` the source.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Nop,

    // data movement
    Mov, // dst, src
    Push, // src
    Pop, // dst

    // arithmetic (dst = dst op src, result typed like dst)
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // comparison (dst = dst cmp src as boolean)
    Ceq,
    Cne,
    Cg,
    Cge,
    Cl,
    Cle,

    // logic
    And,
    Or,
    Not,

    // unary in place
    Neg,
    Inc,
    Dec,

    // bit operations, integers only
    Shl,
    Shr,
    Andb,
    Orb,
    Xor,
    Notb,

    /// Advance iterator: it = key after it in coll (null once exhausted).
    Ptr,
    /// dst = (dst is null)
    Test,

    // ==========================================================================
    // Control flow: targets are instruction pointers
    // ==========================================================================
    Jmp,
    /// Jump when the condition is false.
    Jz,
    /// Jump when the condition is true.
    Jnz,

    // declarations
    /// Declare a variable in the current scope (optional initial value).
    Db,
    /// Declare a shared variable if it does not exist yet.
    Dsb,
    /// Declare a fresh empty container in the current scope.
    Dc,

    // calls
    Call,
    Ret,
    /// Invoke a host routine: routine pointer, argument count.
    Inv,
    /// Invoke a method on a foreign object: member operand, argument count.
    Invm,
    /// Spawn a background job: function pointer, argument count.
    Run,

    // cooperative concurrency
    Lock,
    Free,
    /// Interrupt: end the current `interpret` slice after this instruction.
    Int,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Mov => "MOV",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Ceq => "CEQ",
            Opcode::Cne => "CNE",
            Opcode::Cg => "CG",
            Opcode::Cge => "CGE",
            Opcode::Cl => "CL",
            Opcode::Cle => "CLE",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Not => "NOT",
            Opcode::Neg => "NEG",
            Opcode::Inc => "INC",
            Opcode::Dec => "DEC",
            Opcode::Shl => "SHL",
            Opcode::Shr => "SHR",
            Opcode::Andb => "ANDB",
            Opcode::Orb => "ORB",
            Opcode::Xor => "XOR",
            Opcode::Notb => "NOTB",
            Opcode::Ptr => "PTR",
            Opcode::Test => "TEST",
            Opcode::Jmp => "JMP",
            Opcode::Jz => "JZ",
            Opcode::Jnz => "JNZ",
            Opcode::Db => "DB",
            Opcode::Dsb => "DSB",
            Opcode::Dc => "DC",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Inv => "INV",
            Opcode::Invm => "INVM",
            Opcode::Run => "RUN",
            Opcode::Lock => "LOCK",
            Opcode::Free => "FREE",
            Opcode::Int => "INT",
        }
    }

    /// `dst = dst op src` instructions.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Ceq
                | Opcode::Cne
                | Opcode::Cg
                | Opcode::Cge
                | Opcode::Cl
                | Opcode::Cle
                | Opcode::And
                | Opcode::Or
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Andb
                | Opcode::Orb
                | Opcode::Xor
        )
    }

    /// Single-operand in-place instructions.
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Opcode::Not | Opcode::Neg | Opcode::Inc | Opcode::Dec | Opcode::Notb | Opcode::Test
        )
    }

    pub fn is_conditional_jump(self) -> bool {
        matches!(self, Opcode::Jz | Opcode::Jnz)
    }

    /// Instructions whose `op1` is written without being read.
    pub fn defines_op1(self) -> bool {
        matches!(
            self,
            Opcode::Mov | Opcode::Pop | Opcode::Db | Opcode::Dsb | Opcode::Dc
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
