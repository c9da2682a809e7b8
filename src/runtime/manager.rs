//! Compiles scripts once and hands out interpreters for them.
//!
//! A [`ScriptManager`] owns the state every script it loads has in common:
//! shared memory, the routine registry, the optional object bridge and the
//! lock table.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::bytecode::ir::{Executable, INIT_FUNCTION};
use crate::bytecode::optimize;
use crate::error::ScriptError;
use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;
use crate::frontend::source::SourceProvider;
use crate::lang::value::Value;
use crate::runtime::bridge::ObjectBridge;
use crate::runtime::host::{RoutineRegistry, Routines};
use crate::runtime::interpreter::{Environment, Interpreter, InterpreterConfig};
use crate::runtime::memory::{Memory, MemoryRef};

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Run the peephole/dead-code optimizer after parsing.
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { optimize: true }
    }
}

pub struct ScriptManager {
    shared: MemoryRef,
    env: Environment,
    sources: Box<dyn SourceProvider>,
    options: CompileOptions,
    config: InterpreterConfig,
    cache: HashMap<String, Rc<Executable>>,
}

impl ScriptManager {
    pub fn new(sources: impl SourceProvider + 'static) -> Self {
        Self {
            shared: Memory::shared(),
            env: Environment::new(Rc::new(Routines::with_builtins())),
            sources: Box::new(sources),
            options: CompileOptions::default(),
            config: InterpreterConfig::default(),
            cache: HashMap::new(),
        }
    }

    pub fn with_routines(mut self, routines: impl RoutineRegistry + 'static) -> Self {
        self.env.routines = Rc::new(routines);
        self
    }

    pub fn with_bridge(mut self, bridge: ObjectBridge) -> Self {
        self.env.bridge = Some(Rc::new(bridge));
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn shared(&self) -> &MemoryRef {
        &self.shared
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Loads, compiles and initializes `name`, or returns the cached result.
    pub fn compile(&mut self, name: &str) -> Result<Rc<Executable>, ScriptError> {
        if let Some(executable) = self.cache.get(name) {
            return Ok(Rc::clone(executable));
        }

        let lines = self
            .sources
            .load(name)
            .map_err(|e| ScriptError::in_script(name, e))?;
        let executable = self.build(name, &lines)?;
        self.cache.insert(name.to_string(), Rc::clone(&executable));
        Ok(executable)
    }

    /// Compiles source text directly, bypassing the provider and the cache.
    pub fn compile_source(&mut self, name: &str, source: &str) -> Result<Rc<Executable>, ScriptError> {
        let lines: Vec<String> = source.lines().map(str::to_string).collect();
        self.build(name, &lines)
    }

    fn build(&self, name: &str, lines: &[String]) -> Result<Rc<Executable>, ScriptError> {
        let tokens = Lexer::new(lines)
            .tokenize()
            .map_err(|e| ScriptError::in_script(name, e))?;
        debug!(script = name, tokens = tokens.len(), "lexed");

        let mut executable = Parser::new(tokens, name, &self.shared, self.env.routines.as_ref())
            .parse()
            .map_err(|e| ScriptError::in_script(name, e))?;
        debug!(script = name, instructions = executable.len(), "parsed");

        if self.options.optimize {
            optimize(&mut executable);
        }

        let executable = Rc::new(executable);
        self.initialize(&executable)
            .map_err(|e| ScriptError::in_script(name, e))?;
        debug!(script = name, "initialized");
        Ok(executable)
    }

    /// Runs `.init`, which declares script variables and shared defaults.
    pub fn initialize(&self, executable: &Rc<Executable>) -> Result<(), ScriptError> {
        if executable.function(INIT_FUNCTION).is_none() {
            return Ok(());
        }
        let mut init = self.interpreter(Rc::clone(executable), INIT_FUNCTION, Vec::new())?;
        init.run_to_completion()?;
        Ok(())
    }

    /// A fresh interpreter for `function` of an already compiled executable.
    pub fn interpreter(
        &self,
        executable: Rc<Executable>,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Interpreter, ScriptError> {
        let interpreter = Interpreter::new(executable, function, args, self.env.clone(), self.config.clone())?;
        Ok(interpreter)
    }

    /// Compiles `name` if needed and prepares `function` for interpretation.
    pub fn spawn(&mut self, name: &str, function: &str, args: Vec<Value>) -> Result<Interpreter, ScriptError> {
        let executable = self.compile(name)?;
        self.interpreter(executable, function, args)
            .map_err(|e| ScriptError::in_script(name, e))
    }

    /// Runs `main` of `name` and every job it starts to completion.
    pub fn run(&mut self, name: &str) -> Result<Value, ScriptError> {
        let mut interpreter = self.spawn(name, "main", Vec::new())?;
        interpreter
            .run_to_completion()
            .map_err(|e| ScriptError::in_script(name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::source::MemorySourceProvider;

    fn manager(scripts: &[(&str, &str)]) -> ScriptManager {
        let mut sources = MemorySourceProvider::new();
        for (name, source) in scripts {
            sources.insert(name, source);
        }
        ScriptManager::new(sources)
    }

    #[test]
    fn test_run_main() {
        let mut manager = manager(&[("main", "function main() { return 6 * 7; }")]);
        assert_eq!(manager.run("main").unwrap(), Value::Int(42));
    }

    #[test]
    fn test_compile_is_cached() {
        let mut manager = manager(&[("main", "var n = 1; function main() { n += 1; return n; }")]);
        let first = manager.compile("main").unwrap();
        let second = manager.compile("main").unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        assert_eq!(manager.run("main").unwrap(), Value::Int(2));
        assert_eq!(manager.run("main").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_scripts_share_memory() {
        let mut manager = manager(&[
            ("a", "shared counter = 10; function main() { counter += 1; return counter; }"),
            ("b", "shared counter = 0; function main() { return counter; }"),
        ]);
        assert_eq!(manager.run("a").unwrap(), Value::Int(11));
        assert_eq!(manager.run("b").unwrap(), Value::Int(11));
    }

    #[test]
    fn test_errors_name_the_script() {
        let mut manager = manager(&[("bad", "function main() { return 1 }")]);
        let err = manager.run("bad").unwrap_err();
        assert!(err.to_string().starts_with("error in script 'bad'"));
        assert!(matches!(err.root_cause(), ScriptError::Parse(_)));
    }

    #[test]
    fn test_missing_script() {
        let mut manager = manager(&[]);
        let err = manager.run("ghost").unwrap_err();
        assert!(matches!(err.root_cause(), ScriptError::Source(_)));
    }

    #[test]
    fn test_spawn_with_arguments() {
        let mut manager = manager(&[("m", "function add(a, b) { return a + b; }")]);
        let mut interpreter = manager.spawn("m", "add", vec![Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(interpreter.run_to_completion().unwrap(), Value::Int(5));

        assert!(manager.spawn("m", "add", vec![Value::Int(2)]).is_err());
    }

    #[test]
    fn test_unoptimized_compile() {
        let mut manager = manager(&[("m", "function main() { var x = 1; x = x + 1; return x; }")])
            .with_options(CompileOptions { optimize: false });
        assert_eq!(manager.run("m").unwrap(), Value::Int(2));
    }
}
