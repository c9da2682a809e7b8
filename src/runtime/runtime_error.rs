/// Unrecoverable error raised while executing bytecode.
///
/// `call_stack` collects one entry per frame as the error unwinds out of the
/// interpreter (innermost first).
#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub message: String,
    pub call_stack: Vec<String>,
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "execution error: {}", self.message)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        ExecutionError {
            message: message.into(),
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.call_stack.push(context.into());
        self
    }
}

pub fn type_error(operation: &str, left: &str, right: &str) -> ExecutionError {
    ExecutionError::new(format!(
        "type error: cannot apply {} to {} and {}",
        operation, left, right
    ))
}

pub fn stack_underflow() -> ExecutionError {
    ExecutionError::new("stack underflow: value stack is empty")
}

pub fn division_by_zero() -> ExecutionError {
    ExecutionError::new("division by zero")
}

pub fn undefined_variable(name: &str) -> ExecutionError {
    ExecutionError::new(format!("undefined variable '{}'", name))
}

pub fn not_indexable(type_name: &str) -> ExecutionError {
    ExecutionError::new(format!("value of type {} cannot be indexed", type_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_without_context() {
        let err = ExecutionError::new("boom");
        assert_eq!(err.to_string(), "execution error: boom");
    }

    #[test]
    fn test_display_with_call_stack() {
        let err = division_by_zero()
            .with_context("inner @ 00000004")
            .with_context("main @ 00000010");
        let msg = err.to_string();
        assert!(msg.contains("division by zero"));
        assert!(msg.contains("0: inner @ 00000004"));
        assert!(msg.contains("1: main @ 00000010"));
    }

    #[test]
    fn test_helpers() {
        assert!(type_error("ADD", "boolean", "int").message.contains("ADD"));
        assert!(undefined_variable("x").message.contains("'x'"));
        assert!(not_indexable("int").message.contains("int"));
        assert!(stack_underflow().message.contains("underflow"));
    }
}
