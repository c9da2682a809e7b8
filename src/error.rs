use crate::bytecode::image::ImageError;
use crate::frontend::lexer::LexerError;
use crate::frontend::parser_error::ParserError;
use crate::frontend::source::SourceError;
use crate::runtime::runtime_error::ExecutionError;

/// Anything that can go wrong between loading a script and running it.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error(transparent)]
    Lex(#[from] LexerError),

    #[error(transparent)]
    Parse(#[from] ParserError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("error in script '{name}': {source}")]
    InScript {
        name: String,
        #[source]
        source: Box<ScriptError>,
    },
}

impl ScriptError {
    pub fn in_script(name: &str, error: impl Into<ScriptError>) -> Self {
        ScriptError::InScript {
            name: name.to_string(),
            source: Box::new(error.into()),
        }
    }

    /// The innermost error, past any `InScript` wrappers.
    pub fn root_cause(&self) -> &ScriptError {
        match self {
            ScriptError::InScript { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_keeps_cause_message() {
        let inner = ExecutionError::new("division by zero");
        let err = ScriptError::in_script("outer", ScriptError::in_script("inner", inner));

        let msg = err.to_string();
        assert!(msg.starts_with("error in script 'outer'"));
        assert!(msg.contains("error in script 'inner'"));
        assert!(msg.contains("division by zero"));
        assert!(matches!(err.root_cause(), ScriptError::Execution(_)));
    }
}
