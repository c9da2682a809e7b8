use std::io::{self, Write};

use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the lexeme instead of the Debug form
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned], out: &mut impl Write) -> io::Result<()> {
        for s in tokens {
            self.write_one(s, out)?;
        }
        Ok(())
    }

    fn write_one(&self, s: &Spanned, out: &mut impl Write) -> io::Result<()> {
        let line = s.span.line + 1;
        let col = s.span.col + 1;

        let kind = kind(&s.token);
        let colr = if self.color { color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        if self.show_debug_repr {
            writeln!(out, "[{:02}:{:02}] {}{:<8} {:?}{}", line, col, colr, kind, s.token, reset)
        } else {
            writeln!(out, "[{:02}:{:02}] {}{:<8} {}{}", line, col, colr, kind, s.token, reset)
        }
    }
}

fn kind(t: &Token) -> &'static str {
    use Token::*;
    match t {
        Eof => "EOF",

        // literals
        Integer(_) => "INT",
        Float(_) => "FLOAT",
        Double(_) => "DOUBLE",
        Str(_) => "STRING",
        Char(_) => "CHAR",
        True | False => "BOOL",
        Null => "NULL",

        Ident(_) => "IDENT",

        // structure
        LParen | RParen => "PAREN",
        LBracket | RBracket => "BRACKET",
        LBrace | RBrace => "BRACE",
        Dot | Comma | Semicolon | Colon => "PUNCT",

        // ops / comparisons
        Eq | NotEq | Lt | LtEq | Gt | GtEq => "CMP",
        t if t.is_assign_op() => "ASSIGN",
        Plus | PlusPlus | Minus | MinusMinus | Star | Slash | Percent | Not | AndAnd | OrOr
        | Amp | Pipe | Caret | Tilde | Shl | Shr => "OP",

        // everything else = keyword
        _ => "KEYWORD",
    }
}

fn color(t: &Token) -> &'static str {
    use Token::*;
    match t {
        Eof => TokenDumper::DIM,
        Str(_) | Char(_) => TokenDumper::GRN,
        Integer(_) | Float(_) | Double(_) | True | False | Null => TokenDumper::CYN,
        Ident(_) => TokenDumper::YEL,
        Run | Yield | Wait | Lock => TokenDumper::BLU,
        _ => match kind(t) {
            "OP" | "CMP" | "ASSIGN" => TokenDumper::MAG,
            _ => TokenDumper::RESET,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn dump(source: &str, dumper: TokenDumper) -> String {
        let tokens = Lexer::from_source(source).tokenize().unwrap();
        let mut out = Vec::new();
        dumper.dump(&tokens, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_pretty_plain_dump() {
        let text = dump("var x = 1;", TokenDumper::new().no_color().pretty());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "[01:01] KEYWORD  var");
        assert_eq!(lines[1], "[01:05] IDENT    x");
        assert_eq!(lines[2], "[01:07] ASSIGN   =");
        assert_eq!(lines[3], "[01:09] INT      1");
        assert!(lines[5].contains("EOF"));
    }

    #[test]
    fn test_colored_dump_has_escapes() {
        let text = dump("\"s\"", TokenDumper::new());
        assert!(text.contains(TokenDumper::GRN));
        assert!(text.contains("Str(\"s\")"));
    }
}
