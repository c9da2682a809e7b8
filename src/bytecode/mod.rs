pub mod disasm;
pub mod image;
pub mod ir;
pub mod op;
pub mod optimize;

pub use ir::{Executable, Function, InstrId, Instruction, Literal, Operand};
pub use op::Opcode;
pub use optimize::optimize;
