//! Cinder, a small embeddable scripting language.
//!
//! Source lines are lexed, parsed straight into bytecode (there is no syntax
//! tree), optimized, and run by a cooperative [`Interpreter`] that can drive
//! background jobs and named locks.
//!
//! ```no_run
//! use cinder::{FileSourceProvider, ScriptManager};
//!
//! let mut manager = ScriptManager::new(FileSourceProvider::new("scripts"));
//! let result = manager.run("hello")?;
//! println!("{}", result);
//! # Ok::<(), cinder::ScriptError>(())
//! ```

pub mod bytecode;
pub mod error;
pub mod frontend;
pub mod lang;
pub mod runtime;

pub use bytecode::{Executable, Opcode};
pub use error::ScriptError;
pub use frontend::source::{FileSourceProvider, MemorySourceProvider, SourceProvider};
pub use lang::types::TypeSymbol;
pub use lang::value::Value;
pub use runtime::host::{HostError, RoutineRegistry, Routines};
pub use runtime::interpreter::{Environment, Interpreter, InterpreterConfig};
pub use runtime::manager::{CompileOptions, ScriptManager};
pub use runtime::memory::{Memory, MemoryRef};
