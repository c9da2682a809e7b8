//! Executing compiled scripts: memory, the interpreter and its host glue.

pub mod bridge;
pub mod host;
pub mod interpreter;
pub mod locks;
pub mod manager;
pub mod memory;
pub mod ops;
pub mod runtime_error;
