#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i64),
    Float(f32),
    Double(f64),
    Str(std::string::String),
    Char(char),
    True,
    False,
    Null,

    // Identifier (variable, function or routine name)
    Ident(std::string::String),

    // Declarations
    Function,
    Var,
    Shared,
    Struct,
    Enum,

    // Control flow
    If,
    Else,
    While,
    For,
    Foreach,
    In,
    Break,
    Continue,
    Return,

    // Concurrency
    Run,
    Yield,
    Wait,
    Lock,

    // Arithmetic and assignment
    Plus,
    PlusPlus,
    PlusAssign,
    Minus,
    MinusMinus,
    MinusAssign,
    Star,
    StarAssign,
    Slash,
    SlashAssign,
    Percent,
    PercentAssign,
    Assign,

    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Logic and bits
    Not,
    AndAnd,
    OrOr,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,

    // Punctuation
    Dot,
    Comma,
    Semicolon,
    Colon,

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }

    Eof,
}

impl Token {
    /// Keyword table, consulted only for identifier-shaped spellings.
    pub fn keyword(ident: &str) -> Option<Token> {
        Some(match ident {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "function" => Token::Function,
            "var" => Token::Var,
            "shared" => Token::Shared,
            "struct" => Token::Struct,
            "enum" => Token::Enum,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "for" => Token::For,
            "foreach" => Token::Foreach,
            "in" => Token::In,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "return" => Token::Return,
            "run" => Token::Run,
            "yield" => Token::Yield,
            "wait" => Token::Wait,
            "lock" => Token::Lock,
            _ => return None,
        })
    }

    /// `=`, `+=`, `-=`, `*=`, `/=`, `%=`.
    pub fn is_assign_op(&self) -> bool {
        matches!(
            self,
            Token::Assign
                | Token::PlusAssign
                | Token::MinusAssign
                | Token::StarAssign
                | Token::SlashAssign
                | Token::PercentAssign
        )
    }
}

impl std::fmt::Display for Token {
    /// The token's lexeme.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Token::Integer(n) => return write!(f, "{}", n),
            Token::Float(x) => return write!(f, "{}f", x),
            Token::Double(x) => return write!(f, "{}", x),
            Token::Str(s) => return write!(f, "\"{}\"", s),
            Token::Char(c) => return write!(f, "'{}'", c),
            Token::Ident(name) => return write!(f, "{}", name),
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::Function => "function",
            Token::Var => "var",
            Token::Shared => "shared",
            Token::Struct => "struct",
            Token::Enum => "enum",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::Foreach => "foreach",
            Token::In => "in",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Return => "return",
            Token::Run => "run",
            Token::Yield => "yield",
            Token::Wait => "wait",
            Token::Lock => "lock",
            Token::Plus => "+",
            Token::PlusPlus => "++",
            Token::PlusAssign => "+=",
            Token::Minus => "-",
            Token::MinusMinus => "--",
            Token::MinusAssign => "-=",
            Token::Star => "*",
            Token::StarAssign => "*=",
            Token::Slash => "/",
            Token::SlashAssign => "/=",
            Token::Percent => "%",
            Token::PercentAssign => "%=",
            Token::Assign => "=",
            Token::Eq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::Not => "!",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Tilde => "~",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Colon => ":",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Eof => "<eof>",
        };
        f.write_str(text)
    }
}
