//! Host routine registry.
//!
//! The parser asks the registry whether a name is a routine (and its arity);
//! the interpreter's `INV` opcode validates arguments against the declared
//! signature and calls through [`RoutineRegistry::invoke`].

use std::io::Write;

use indexmap::IndexMap;

use crate::lang::types::TypeSymbol;
use crate::lang::value::Value;

/// Failure raised on the host side of a routine or bridge call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("routine failed: {message}")]
    Failed { message: String },

    #[error("access denied: {access}")]
    Denied { access: String },

    #[error("{operation} is not supported on {type_name}")]
    Unsupported {
        operation: String,
        type_name: String,
    },
}

impl HostError {
    pub fn failed(message: impl Into<String>) -> Self {
        HostError::Failed {
            message: message.into(),
        }
    }
}

/// Declared parameter and result types of a routine.
///
/// `TypeSymbol::Null` accepts any value; a null value is accepted anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineSignature {
    pub params: Vec<TypeSymbol>,
    pub result: TypeSymbol,
}

impl RoutineSignature {
    pub fn new(params: Vec<TypeSymbol>, result: TypeSymbol) -> Self {
        Self { params, result }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn check_args(&self, args: &[Value]) -> Result<(), String> {
        if args.len() != self.params.len() {
            return Err(format!(
                "expected {} arguments, got {}",
                self.params.len(),
                args.len()
            ));
        }
        for (index, (declared, arg)) in self.params.iter().zip(args).enumerate() {
            if !accepts(*declared, arg) {
                return Err(format!(
                    "argument {} must be {}, got {}",
                    index + 1,
                    declared,
                    arg.type_name()
                ));
            }
        }
        Ok(())
    }

    pub fn check_result(&self, result: &Value) -> Result<(), String> {
        if accepts(self.result, result) {
            Ok(())
        } else {
            Err(format!(
                "result must be {}, got {}",
                self.result,
                result.type_name()
            ))
        }
    }
}

fn accepts(declared: TypeSymbol, value: &Value) -> bool {
    declared == TypeSymbol::Null || value.is_null() || value.type_symbol() == Some(declared)
}

pub trait RoutineRegistry {
    fn signature(&self, name: &str) -> Option<&RoutineSignature>;

    fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, HostError>;
}

pub type RoutineFn = Box<dyn Fn(&[Value]) -> Result<Value, HostError>>;

/// Table of closures implementing [`RoutineRegistry`].
#[derive(Default)]
pub struct Routines {
    table: IndexMap<String, (RoutineSignature, RoutineFn)>,
}

impl Routines {
    pub fn new() -> Self {
        Self::default()
    }

    /// `print`, `println`, `str` and `json`.
    pub fn with_builtins() -> Self {
        let mut routines = Self::new();

        routines.register("print", vec![TypeSymbol::Null], TypeSymbol::Null, |args| {
            let mut out = std::io::stdout().lock();
            write!(out, "{}", args[0])
                .and_then(|_| out.flush())
                .map_err(|e| HostError::failed(e.to_string()))?;
            Ok(Value::Null)
        });

        routines.register("println", vec![TypeSymbol::Null], TypeSymbol::Null, |args| {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{}", args[0]).map_err(|e| HostError::failed(e.to_string()))?;
            Ok(Value::Null)
        });

        routines.register("str", vec![TypeSymbol::Null], TypeSymbol::String, |args| {
            Ok(Value::Str(args[0].to_string()))
        });

        routines.register("json", vec![TypeSymbol::Null], TypeSymbol::String, |args| {
            Ok(Value::Str(args[0].to_json().to_string()))
        });

        routines
    }

    pub fn register(
        &mut self,
        name: &str,
        params: Vec<TypeSymbol>,
        result: TypeSymbol,
        routine: impl Fn(&[Value]) -> Result<Value, HostError> + 'static,
    ) {
        self.table.insert(
            name.to_string(),
            (RoutineSignature::new(params, result), Box::new(routine)),
        );
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

impl RoutineRegistry for Routines {
    fn signature(&self, name: &str) -> Option<&RoutineSignature> {
        self.table.get(name).map(|(signature, _)| signature)
    }

    fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, HostError> {
        match self.table.get(name) {
            Some((_, routine)) => routine(args),
            None => Err(HostError::failed(format!("unknown routine '{}'", name))),
        }
    }
}
