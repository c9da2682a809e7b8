use std::rc::Rc;

use crate::frontend::parser_error::write_located;
use crate::frontend::token::Token;

/// Token position: 0-based line and column plus the full source line.
#[derive(Debug, Clone)]
pub struct Span {
    pub line: usize,
    pub col: usize,
    pub text: Rc<str>,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
    pub text: String,
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_located(f, &self.message, self.line, self.col, &self.text)
    }
}

impl std::error::Error for LexerError {}

/// Scanner states. Each two-character operator prefix is `Operator(first)`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    None,
    Operator(char),
    Str,
    StrEscape,
    Char,
    CharEscape,
    CharEnd,
    Integer,
    Float,
    Hex,
    Identifier,
    LineComment,
    BlockComment,
    BlockCommentStar,
}

/// Hand-rolled finite-state scanner over a list of source lines.
///
/// One character of pushback (`undo_char`) lets maximal-munch decisions be
/// taken one character late: `+` vs `++` vs `+=`.
pub struct Lexer {
    chars: Vec<(char, usize, usize)>,
    lines: Vec<Rc<str>>,
    pos: usize,
}

impl Lexer {
    pub fn new(lines: &[String]) -> Self {
        let mut chars = Vec::new();
        let mut texts = Vec::with_capacity(lines.len());

        for (line_no, line) in lines.iter().enumerate() {
            let mut col = 0;
            for ch in line.chars() {
                chars.push((ch, line_no, col));
                col += 1;
            }
            chars.push(('\n', line_no, col));
            texts.push(Rc::from(line.as_str()));
        }

        Lexer {
            chars,
            lines: texts,
            pos: 0,
        }
    }

    pub fn from_source(source: &str) -> Self {
        let lines: Vec<String> = source.lines().map(str::to_string).collect();
        Self::new(&lines)
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).map(|(c, _, _)| *c);
        self.pos += 1;
        ch
    }

    fn undo_char(&mut self) {
        self.pos -= 1;
    }

    /// Position of the character most recently returned by `next_char`.
    fn last_position(&self) -> (usize, usize) {
        match self.chars.get(self.pos.saturating_sub(1)) {
            Some((_, line, col)) => (*line, *col),
            None => self.end_position(),
        }
    }

    fn end_position(&self) -> (usize, usize) {
        match self.chars.last() {
            Some((_, line, col)) => (*line, *col),
            None => (0, 0),
        }
    }

    fn line_text(&self, line: usize) -> Rc<str> {
        self.lines.get(line).cloned().unwrap_or_else(|| Rc::from(""))
    }

    fn span(&self, (line, col): (usize, usize)) -> Span {
        Span {
            line,
            col,
            text: self.line_text(line),
        }
    }

    fn error(&self, message: impl Into<String>, (line, col): (usize, usize)) -> LexerError {
        LexerError {
            message: message.into(),
            line,
            col,
            text: self.line_text(line).to_string(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();
        let mut state = State::None;
        let mut buffer = String::new();
        let mut start = (0, 0);

        loop {
            let ch = self.next_char();

            match state {
                State::None => {
                    let Some(c) = ch else { break };
                    if c.is_whitespace() {
                        continue;
                    }
                    start = self.last_position();
                    buffer.clear();

                    match c {
                        '"' => state = State::Str,
                        '\'' => state = State::Char,
                        '0'..='9' => {
                            buffer.push(c);
                            state = State::Integer;
                        }
                        c if c.is_alphabetic() || c == '_' => {
                            buffer.push(c);
                            state = State::Identifier;
                        }
                        '+' | '-' | '*' | '/' | '%' | '=' | '!' | '<' | '>' | '&' | '|' => {
                            state = State::Operator(c)
                        }
                        c => match single_char_token(c) {
                            Some(token) => tokens.push(self.spanned(token, start)),
                            None => {
                                return Err(
                                    self.error(format!("invalid character '{}'", c), start)
                                );
                            }
                        },
                    }
                }

                State::Operator(first) => {
                    let token = match (first, ch) {
                        ('/', Some('/')) => {
                            state = State::LineComment;
                            continue;
                        }
                        ('/', Some('*')) => {
                            state = State::BlockComment;
                            continue;
                        }
                        ('+', Some('+')) => Token::PlusPlus,
                        ('+', Some('=')) => Token::PlusAssign,
                        ('-', Some('-')) => Token::MinusMinus,
                        ('-', Some('=')) => Token::MinusAssign,
                        ('*', Some('=')) => Token::StarAssign,
                        ('/', Some('=')) => Token::SlashAssign,
                        ('%', Some('=')) => Token::PercentAssign,
                        ('=', Some('=')) => Token::Eq,
                        ('!', Some('=')) => Token::NotEq,
                        ('<', Some('=')) => Token::LtEq,
                        ('<', Some('<')) => Token::Shl,
                        ('>', Some('=')) => Token::GtEq,
                        ('>', Some('>')) => Token::Shr,
                        ('&', Some('&')) => Token::AndAnd,
                        ('|', Some('|')) => Token::OrOr,
                        _ => {
                            self.undo_char();
                            single_operator(first)
                        }
                    };
                    tokens.push(self.spanned(token, start));
                    state = State::None;
                }

                State::Str => match ch {
                    Some('"') => {
                        tokens.push(self.spanned(Token::Str(std::mem::take(&mut buffer)), start));
                        state = State::None;
                    }
                    Some('\\') => state = State::StrEscape,
                    Some('\n') | None => {
                        return Err(self.error("unterminated string literal", start));
                    }
                    Some(c) => buffer.push(c),
                },

                State::StrEscape => match ch.and_then(unescape) {
                    Some(c) => {
                        buffer.push(c);
                        state = State::Str;
                    }
                    None => {
                        return Err(self.error("invalid escape sequence", self.last_position()));
                    }
                },

                State::Char => match ch {
                    Some('\\') => state = State::CharEscape,
                    Some('\'') => return Err(self.error("empty character literal", start)),
                    Some('\n') | None => {
                        return Err(self.error("unterminated character literal", start));
                    }
                    Some(c) => {
                        buffer.push(c);
                        state = State::CharEnd;
                    }
                },

                State::CharEscape => match ch.and_then(unescape) {
                    Some(c) => {
                        buffer.push(c);
                        state = State::CharEnd;
                    }
                    None => {
                        return Err(self.error("invalid escape sequence", self.last_position()));
                    }
                },

                State::CharEnd => match (ch, buffer.chars().next()) {
                    (Some('\''), Some(c)) => {
                        tokens.push(self.spanned(Token::Char(c), start));
                        state = State::None;
                    }
                    _ => return Err(self.error("unterminated character literal", start)),
                },

                State::Integer => match ch {
                    Some(d) if d.is_ascii_digit() => buffer.push(d),
                    Some('.') => {
                        buffer.push('.');
                        state = State::Float;
                    }
                    Some('x') | Some('X') if buffer == "0" => {
                        buffer.clear();
                        state = State::Hex;
                    }
                    Some('b') => {
                        let token = self.integer(&buffer, 2, start)?;
                        tokens.push(self.spanned(token, start));
                        state = State::None;
                    }
                    Some('o') => {
                        let token = self.integer(&buffer, 8, start)?;
                        tokens.push(self.spanned(token, start));
                        state = State::None;
                    }
                    Some(c) if c.is_alphanumeric() || c == '_' => {
                        return Err(self.error("invalid numeric literal", start));
                    }
                    _ => {
                        self.undo_char();
                        let token = self.integer(&buffer, 10, start)?;
                        tokens.push(self.spanned(token, start));
                        state = State::None;
                    }
                },

                State::Float => match ch {
                    Some(d) if d.is_ascii_digit() => buffer.push(d),
                    Some('f') => {
                        let value: f32 = buffer
                            .parse()
                            .map_err(|_| self.error("invalid float literal", start))?;
                        tokens.push(self.spanned(Token::Float(value), start));
                        state = State::None;
                    }
                    Some(c) if c.is_alphanumeric() || c == '_' || c == '.' => {
                        return Err(self.error("invalid numeric literal", start));
                    }
                    _ => {
                        self.undo_char();
                        let value: f64 = buffer
                            .parse()
                            .map_err(|_| self.error("invalid float literal", start))?;
                        tokens.push(self.spanned(Token::Double(value), start));
                        state = State::None;
                    }
                },

                State::Hex => match ch {
                    Some(c) if c.is_alphanumeric() => buffer.push(c),
                    _ => {
                        self.undo_char();
                        if buffer.is_empty() || !buffer.chars().all(|c| c.is_ascii_hexdigit()) {
                            return Err(self.error("invalid hex literal", start));
                        }
                        let token = self.integer(&buffer, 16, start)?;
                        tokens.push(self.spanned(token, start));
                        state = State::None;
                    }
                },

                State::Identifier => match ch {
                    Some(c) if c.is_alphanumeric() || c == '_' => buffer.push(c),
                    _ => {
                        self.undo_char();
                        let token = Token::keyword(&buffer)
                            .unwrap_or_else(|| Token::Ident(std::mem::take(&mut buffer)));
                        tokens.push(self.spanned(token, start));
                        state = State::None;
                    }
                },

                State::LineComment => match ch {
                    Some('\n') | None => state = State::None,
                    Some(_) => {}
                },

                State::BlockComment => match ch {
                    Some('*') => state = State::BlockCommentStar,
                    Some(_) => {}
                    None => return Err(self.error("unterminated block comment", start)),
                },

                State::BlockCommentStar => match ch {
                    Some('/') => state = State::None,
                    Some('*') => {}
                    Some(_) => state = State::BlockComment,
                    None => return Err(self.error("unterminated block comment", start)),
                },
            }

            if ch.is_none() && state == State::None {
                break;
            }
        }

        if state != State::None {
            return Err(self.error("unexpected end of input", start));
        }

        tokens.push(Spanned {
            token: Token::Eof,
            span: self.span(self.end_position()),
        });

        Ok(tokens)
    }

    fn spanned(&self, token: Token, at: (usize, usize)) -> Spanned {
        Spanned {
            token,
            span: self.span(at),
        }
    }

    fn integer(&self, digits: &str, radix: u32, start: (usize, usize)) -> Result<Token, LexerError> {
        i64::from_str_radix(digits, radix)
            .map(Token::Integer)
            .map_err(|_| self.error(format!("invalid base-{} integer literal", radix), start))
    }
}

fn unescape(c: char) -> Option<char> {
    Some(match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        'b' => '\u{8}',
        'f' => '\u{c}',
        '\\' => '\\',
        '"' => '"',
        '\'' => '\'',
        _ => return None,
    })
}

fn single_char_token(c: char) -> Option<Token> {
    Some(match c {
        '^' => Token::Caret,
        '~' => Token::Tilde,
        '.' => Token::Dot,
        ',' => Token::Comma,
        ';' => Token::Semicolon,
        ':' => Token::Colon,
        '(' => Token::LParen,
        ')' => Token::RParen,
        '[' => Token::LBracket,
        ']' => Token::RBracket,
        '{' => Token::LBrace,
        '}' => Token::RBrace,
        _ => return None,
    })
}

fn single_operator(c: char) -> Token {
    match c {
        '+' => Token::Plus,
        '-' => Token::Minus,
        '*' => Token::Star,
        '/' => Token::Slash,
        '%' => Token::Percent,
        '=' => Token::Assign,
        '!' => Token::Not,
        '<' => Token::Lt,
        '>' => Token::Gt,
        '&' => Token::Amp,
        _ => Token::Pipe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::from_source(source);
        let mut tokens: Vec<Token> = lexer
            .tokenize()
            .expect("tokenize failed")
            .into_iter()
            .map(|s| s.token)
            .collect();
        assert_eq!(tokens.pop(), Some(Token::Eof));
        tokens
    }

    fn lex_error(source: &str) -> LexerError {
        Lexer::from_source(source)
            .tokenize()
            .expect_err("expected a lexer error")
    }

    #[test]
    fn test_function_header() {
        let t = tokens("function main() {");
        assert_eq!(
            t,
            vec![
                Token::Function,
                Token::Ident("main".to_string()),
                Token::LParen,
                Token::RParen,
                Token::LBrace,
            ]
        );
    }

    #[test]
    fn test_maximal_munch_operators() {
        let t = tokens("+ ++ += - -- -= * *= / /= % %= = ==");
        assert_eq!(
            t,
            vec![
                Token::Plus,
                Token::PlusPlus,
                Token::PlusAssign,
                Token::Minus,
                Token::MinusMinus,
                Token::MinusAssign,
                Token::Star,
                Token::StarAssign,
                Token::Slash,
                Token::SlashAssign,
                Token::Percent,
                Token::PercentAssign,
                Token::Assign,
                Token::Eq,
            ]
        );
    }

    #[test]
    fn test_comparison_and_bit_operators() {
        let t = tokens("! != < <= << > >= >> & && | || ^ ~");
        assert_eq!(
            t,
            vec![
                Token::Not,
                Token::NotEq,
                Token::Lt,
                Token::LtEq,
                Token::Shl,
                Token::Gt,
                Token::GtEq,
                Token::Shr,
                Token::Amp,
                Token::AndAnd,
                Token::Pipe,
                Token::OrOr,
                Token::Caret,
                Token::Tilde,
            ]
        );
    }

    #[test]
    fn test_operators_without_spaces() {
        let t = tokens("i++<3");
        assert_eq!(
            t,
            vec![
                Token::Ident("i".to_string()),
                Token::PlusPlus,
                Token::Lt,
                Token::Integer(3),
            ]
        );
    }

    #[test]
    fn test_punctuation() {
        let t = tokens("( ) [ ] { } . , ; :");
        assert_eq!(
            t,
            vec![
                Token::LParen,
                Token::RParen,
                Token::LBracket,
                Token::RBracket,
                Token::LBrace,
                Token::RBrace,
                Token::Dot,
                Token::Comma,
                Token::Semicolon,
                Token::Colon,
            ]
        );
    }

    #[test]
    fn test_all_keywords() {
        let source = "true false null function var shared struct enum if else while for \
                      foreach in break continue return run yield wait lock";
        let t = tokens(source);
        assert_eq!(t.len(), 21);
        assert!(t.iter().all(|tok| !matches!(tok, Token::Ident(_))));
        assert_eq!(t[0], Token::True);
        assert_eq!(t[20], Token::Lock);
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(tokens("variable"), vec![Token::Ident("variable".to_string())]);
        assert_eq!(tokens("_x1"), vec![Token::Ident("_x1".to_string())]);
    }

    // --------------------
    // Numbers
    // --------------------

    #[test]
    fn test_numeric_literals() {
        assert_eq!(tokens("42"), vec![Token::Integer(42)]);
        assert_eq!(tokens("101b"), vec![Token::Integer(5)]);
        assert_eq!(tokens("17o"), vec![Token::Integer(15)]);
        assert_eq!(tokens("0x1F 0xff"), vec![Token::Integer(31), Token::Integer(255)]);
        assert_eq!(tokens("2.5"), vec![Token::Double(2.5)]);
        assert_eq!(tokens("2.5f"), vec![Token::Float(2.5)]);
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(lex_error("0x1G").message.contains("hex"));
        assert!(lex_error("102b").message.contains("base-2"));
        assert!(lex_error("12abc").message.contains("numeric"));
    }

    // --------------------
    // Strings and chars
    // --------------------

    #[test]
    fn test_string_escapes() {
        let t = tokens(r#""a\nb\tc\r\\\"\'""#);
        assert_eq!(t, vec![Token::Str("a\nb\tc\r\\\"'".to_string())]);
    }

    #[test]
    fn test_char_literals() {
        assert_eq!(tokens("'a' '\\n'"), vec![Token::Char('a'), Token::Char('\n')]);
    }

    #[test]
    fn test_unterminated_string_errors_with_position() {
        let err = lex_error("var s = \"abc;");
        assert!(err.message.contains("unterminated string"));
        assert_eq!(err.line, 0);
        assert_eq!(err.col, 8);
        assert_eq!(err.text, "var s = \"abc;");
    }

    #[test]
    fn test_string_cannot_span_lines() {
        let err = lex_error("\"abc\ndef\"");
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_unterminated_char() {
        assert!(lex_error("'ab'").message.contains("unterminated character"));
        assert!(lex_error("'a").message.contains("unterminated character"));
    }

    #[test]
    fn test_unknown_escape_error() {
        assert!(lex_error(r#""\q""#).message.contains("escape"));
    }

    #[test]
    fn test_invalid_character() {
        let err = lex_error("var x = 1 # 2;");
        assert!(err.message.contains("invalid character '#'"));
        assert_eq!(err.col, 10);
        assert!(err.to_string().ends_with("Zeile 1, Zeichen 10: var x = 1 # 2;"));
    }

    // --------------------
    // Comments and positions
    // --------------------

    #[test]
    fn test_comments_are_skipped() {
        let t = tokens("a // line comment\n/* block\n * comment */ b");
        assert_eq!(
            t,
            vec![Token::Ident("a".to_string()), Token::Ident("b".to_string())]
        );
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert!(lex_error("a /* never closed").message.contains("block comment"));
    }

    #[test]
    fn test_spans_track_lines() {
        let mut lexer = Lexer::from_source("var a;\n  a = 1;");
        let spanned = lexer.tokenize().unwrap();
        let a = &spanned[3];
        assert_eq!(a.token, Token::Ident("a".to_string()));
        assert_eq!((a.span.line, a.span.col), (1, 2));
        assert_eq!(&*a.span.text, "  a = 1;");
    }
}
