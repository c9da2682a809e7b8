use crate::frontend::lexer::Span;

/// A parsing error with source location.
///
/// `line` is 0-based, `col` 0-based; `text` is the offending source line.
/// The rendered form appends ` Zeile <line+1>, Zeichen <col>: <text>` so
/// diagnostics match what existing script tooling expects.
#[derive(Debug, Clone)]
pub struct ParserError {
    pub message: String,
    pub line: usize,
    pub col: usize,
    pub text: String,
}

impl ParserError {
    pub fn at(message: impl Into<String>, span: &Span) -> Self {
        ParserError {
            message: message.into(),
            line: span.line,
            col: span.col,
            text: span.text.to_string(),
        }
    }
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_located(f, &self.message, self.line, self.col, &self.text)
    }
}

impl std::error::Error for ParserError {}

/// Shared by lexer and parser errors.
pub(crate) fn write_located(
    f: &mut std::fmt::Formatter<'_>,
    message: &str,
    line: usize,
    col: usize,
    text: &str,
) -> std::fmt::Result {
    let col = col.min(text.chars().count());
    write!(f, "{} Zeile {}, Zeichen {}: {}", message, line + 1, col, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_location_suffix() {
        let span = Span {
            line: 2,
            col: 4,
            text: Rc::from("var x = ;"),
        };
        let err = ParserError::at("expression expected", &span);
        assert_eq!(
            err.to_string(),
            "expression expected Zeile 3, Zeichen 4: var x = ;"
        );
    }

    #[test]
    fn test_column_is_clamped_to_line() {
        let span = Span {
            line: 0,
            col: 99,
            text: Rc::from("abc"),
        };
        let err = ParserError::at("oops", &span);
        assert!(err.to_string().ends_with("Zeichen 3: abc"));
    }
}
