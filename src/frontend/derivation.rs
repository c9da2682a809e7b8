//! Operator/type derivation tables consulted while parsing.
//!
//! Each operator category owns one table mapping `(left, right)` to the
//! result type. Tables are built on first use and never change afterwards.
//! `TypeSymbol::Null` stands for "unknown" and has entries against every
//! concrete type, so only combinations that can never make sense fail.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::frontend::lexer::Spanned;
use crate::frontend::parser_error::ParserError;
use crate::frontend::token::Token;
use crate::lang::types::TypeSymbol;

type Table = HashMap<(TypeSymbol, TypeSymbol), TypeSymbol>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Logic,
    Equality,
    Ordering,
    Additive,
    Multiplicative,
    Bitwise,
}

impl Category {
    pub fn of(token: &Token) -> Option<Category> {
        Some(match token {
            Token::AndAnd | Token::OrOr => Category::Logic,
            Token::Eq | Token::NotEq => Category::Equality,
            Token::Lt | Token::LtEq | Token::Gt | Token::GtEq => Category::Ordering,
            Token::Plus | Token::Minus | Token::PlusAssign | Token::MinusAssign => {
                Category::Additive
            }
            Token::Star
            | Token::Slash
            | Token::Percent
            | Token::StarAssign
            | Token::SlashAssign
            | Token::PercentAssign => Category::Multiplicative,
            Token::Amp | Token::Pipe | Token::Caret | Token::Shl | Token::Shr => Category::Bitwise,
            _ => return None,
        })
    }

    fn table(self) -> &'static Table {
        static LOGIC: OnceLock<Table> = OnceLock::new();
        static EQUALITY: OnceLock<Table> = OnceLock::new();
        static ORDERING: OnceLock<Table> = OnceLock::new();
        static ADDITIVE: OnceLock<Table> = OnceLock::new();
        static MULTIPLICATIVE: OnceLock<Table> = OnceLock::new();
        static BITWISE: OnceLock<Table> = OnceLock::new();

        match self {
            Category::Logic => LOGIC.get_or_init(build_logic),
            Category::Equality => EQUALITY.get_or_init(build_equality),
            Category::Ordering => ORDERING.get_or_init(build_ordering),
            Category::Additive => ADDITIVE.get_or_init(build_additive),
            Category::Multiplicative => MULTIPLICATIVE.get_or_init(build_multiplicative),
            Category::Bitwise => BITWISE.get_or_init(build_bitwise),
        }
    }

    /// Table lookup without an error location.
    pub fn lookup(self, left: TypeSymbol, right: TypeSymbol) -> Option<TypeSymbol> {
        self.table().get(&(left, right)).copied()
    }
}

/// Result type of `left op right`, or a positioned error for a pair the
/// operator's category does not accept.
pub fn derive(op: &Spanned, left: TypeSymbol, right: TypeSymbol) -> Result<TypeSymbol, ParserError> {
    let category = Category::of(&op.token).ok_or_else(|| {
        ParserError::at(format!("'{}' is not a binary operator", op.token), &op.span)
    })?;

    category.lookup(left, right).ok_or_else(|| {
        ParserError::at(
            format!("operator '{}' cannot be applied to {} and {}", op.token, left, right),
            &op.span,
        )
    })
}

/// Result type of a prefix or postfix operator.
pub fn derive_unary(op: &Spanned, operand: TypeSymbol) -> Result<TypeSymbol, ParserError> {
    use TypeSymbol::*;

    let result = match (&op.token, operand) {
        (Token::Not, t) => Category::Logic.lookup(t, Boolean),
        (Token::Minus | Token::PlusPlus | Token::MinusMinus, Null) => Some(Null),
        (Token::Minus | Token::PlusPlus | Token::MinusMinus, t) if t.is_numeric() => Some(t),
        (Token::Tilde, Null) => Some(Null),
        (Token::Tilde, Int) => Some(Int),
        _ => None,
    };

    result.ok_or_else(|| {
        ParserError::at(
            format!("operator '{}' cannot be applied to {}", op.token, operand),
            &op.span,
        )
    })
}

// =============================================================================
// Table construction
// =============================================================================

const NUMBERS: [TypeSymbol; 3] = [TypeSymbol::Int, TypeSymbol::Float, TypeSymbol::Double];

const NUMERIC: [TypeSymbol; 4] = [
    TypeSymbol::Int,
    TypeSymbol::Float,
    TypeSymbol::Double,
    TypeSymbol::Char,
];

fn fill(table: &mut Table, lefts: &[TypeSymbol], rights: &[TypeSymbol], result: Option<TypeSymbol>) {
    for &l in lefts {
        for &r in rights {
            table.insert((l, r), result.unwrap_or(l));
        }
    }
}

/// Null against every type, in both positions.
fn fill_unknown(table: &mut Table, result: impl Fn(TypeSymbol, TypeSymbol) -> TypeSymbol) {
    for &t in &TypeSymbol::ALL {
        table.insert((TypeSymbol::Null, t), result(TypeSymbol::Null, t));
        table.insert((t, TypeSymbol::Null), result(t, TypeSymbol::Null));
    }
}

fn build_logic() -> Table {
    use TypeSymbol::*;

    let operands = [Null, Int, Float, Double, Boolean];
    let mut table = Table::new();
    fill(&mut table, &operands, &operands, Some(Boolean));
    table
}

fn build_equality() -> Table {
    use TypeSymbol::*;

    let mut table = Table::new();
    fill(&mut table, &NUMERIC, &NUMERIC, Some(Boolean));
    fill(&mut table, &[String], &TypeSymbol::ALL, Some(Boolean));
    fill(&mut table, &TypeSymbol::ALL, &[String], Some(Boolean));
    table.insert((Boolean, Boolean), Boolean);
    table.insert((Container, Container), Boolean);
    fill_unknown(&mut table, |_, _| Boolean);
    table
}

fn build_ordering() -> Table {
    use TypeSymbol::*;

    let mut table = Table::new();
    fill(&mut table, &NUMERIC, &NUMERIC, Some(Boolean));
    fill(&mut table, &[String], &TypeSymbol::ALL, Some(Boolean));
    fill(&mut table, &TypeSymbol::ALL, &[String], Some(Boolean));
    fill_unknown(&mut table, |_, _| Boolean);
    table
}

fn build_additive() -> Table {
    use TypeSymbol::*;

    let mut table = Table::new();
    fill(&mut table, &NUMBERS, &NUMERIC, None);
    fill(&mut table, &[Char], &[Int, Char], None);
    fill(&mut table, &[String, Container], &TypeSymbol::ALL, None);
    fill_unknown(&mut table, |l, _| l);
    // Booleans never add, whatever the right side turns out to be.
    table.remove(&(Boolean, Null));
    table
}

fn build_multiplicative() -> Table {
    use TypeSymbol::*;

    let mut table = Table::new();
    fill(&mut table, &NUMBERS, &NUMBERS, None);
    for t in [Null, Int, Float, Double] {
        table.insert((Null, t), Null);
        table.insert((t, Null), t);
    }
    table
}

fn build_bitwise() -> Table {
    use TypeSymbol::*;

    let mut table = Table::new();
    table.insert((Int, Int), Int);
    table.insert((Null, Int), Null);
    table.insert((Int, Null), Int);
    table.insert((Null, Null), Null);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Span;
    use std::rc::Rc;
    use TypeSymbol::*;

    fn op(token: Token) -> Spanned {
        Spanned {
            token,
            span: Span {
                line: 0,
                col: 0,
                text: Rc::from("x"),
            },
        }
    }

    #[test]
    fn test_additive_result_follows_left() {
        assert_eq!(derive(&op(Token::Plus), Int, Double).unwrap(), Int);
        assert_eq!(derive(&op(Token::Plus), Double, Int).unwrap(), Double);
        assert_eq!(derive(&op(Token::Minus), Char, Int).unwrap(), Char);
        assert_eq!(derive(&op(Token::Plus), String, Int).unwrap(), String);
        assert_eq!(derive(&op(Token::Plus), Container, Boolean).unwrap(), Container);
    }

    #[test]
    fn test_additive_rejects() {
        assert!(derive(&op(Token::Plus), Int, String).is_err());
        assert!(derive(&op(Token::Plus), Boolean, Boolean).is_err());
        assert!(derive(&op(Token::Plus), Boolean, Null).is_err());
        assert!(derive(&op(Token::Plus), Int, Boolean).is_err());
    }

    #[test]
    fn test_unknown_never_blocks_additive() {
        for t in TypeSymbol::ALL {
            assert!(derive(&op(Token::Plus), Null, t).is_ok(), "null + {}", t);
        }
    }

    #[test]
    fn test_logic_on_string_fails() {
        let err = derive(&op(Token::AndAnd), String, Boolean).unwrap_err();
        assert!(err.message.contains("cannot be applied to string and boolean"));
        assert_eq!(derive(&op(Token::OrOr), Int, Null).unwrap(), Boolean);
    }

    #[test]
    fn test_equality_and_ordering() {
        assert_eq!(derive(&op(Token::Eq), Boolean, Boolean).unwrap(), Boolean);
        assert_eq!(derive(&op(Token::NotEq), Container, Container).unwrap(), Boolean);
        assert!(derive(&op(Token::Lt), Boolean, Boolean).is_err());
        assert!(derive(&op(Token::Lt), Container, Int).is_err());
        assert_eq!(derive(&op(Token::GtEq), String, Int).unwrap(), Boolean);
        assert_eq!(derive(&op(Token::Lt), Char, Double).unwrap(), Boolean);
    }

    #[test]
    fn test_multiplicative_and_bitwise() {
        assert_eq!(derive(&op(Token::Star), Float, Int).unwrap(), Float);
        assert!(derive(&op(Token::Percent), String, Int).is_err());
        assert!(derive(&op(Token::Slash), Char, Int).is_err());
        assert_eq!(derive(&op(Token::Shl), Int, Int).unwrap(), Int);
        assert!(derive(&op(Token::Amp), Double, Int).is_err());
    }

    #[test]
    fn test_every_category_has_null_entries() {
        for category in [
            Category::Logic,
            Category::Equality,
            Category::Ordering,
            Category::Additive,
            Category::Multiplicative,
            Category::Bitwise,
        ] {
            assert!(category.lookup(Null, Null).is_some(), "{:?}", category);
        }
    }

    fn symbol(code: u8) -> Option<TypeSymbol> {
        match code {
            b'n' => Some(Null),
            b'i' => Some(Int),
            b'f' => Some(Float),
            b'd' => Some(Double),
            b'b' => Some(Boolean),
            b's' => Some(String),
            b'c' => Some(Char),
            b'k' => Some(Container),
            _ => None,
        }
    }

    /// Rows are left operands, columns right operands, both in
    /// `TypeSymbol::ALL` order: null int float double boolean string char
    /// container. `.` marks a rejected pair.
    fn assert_table(category: Category, rows: [&str; 8]) {
        for (left, row) in TypeSymbol::ALL.into_iter().zip(rows) {
            for (right, code) in TypeSymbol::ALL.into_iter().zip(row.bytes()) {
                assert_eq!(
                    category.lookup(left, right),
                    symbol(code),
                    "{:?}: {} with {}",
                    category,
                    left,
                    right
                );
            }
        }
    }

    #[test]
    fn test_full_tables() {
        assert_table(
            Category::Logic,
            ["bbbbb...", "bbbbb...", "bbbbb...", "bbbbb...", "bbbbb...", "........", "........", "........"],
        );
        assert_table(
            Category::Equality,
            ["bbbbbbbb", "bbbb.bb.", "bbbb.bb.", "bbbb.bb.", "b...bb..", "bbbbbbbb", "bbbb.bb.", "b....b.b"],
        );
        assert_table(
            Category::Ordering,
            ["bbbbbbbb", "bbbb.bb.", "bbbb.bb.", "bbbb.bb.", "b....b..", "bbbbbbbb", "bbbb.bb.", "b....b.."],
        );
        assert_table(
            Category::Additive,
            ["nnnnnnnn", "iiii..i.", "ffff..f.", "dddd..d.", "........", "ssssssss", "cc....c.", "kkkkkkkk"],
        );
        assert_table(
            Category::Multiplicative,
            ["nnnn....", "iiii....", "ffff....", "dddd....", "........", "........", "........", "........"],
        );
        assert_table(
            Category::Bitwise,
            ["nn......", "ii......", "........", "........", "........", "........", "........", "........"],
        );
    }

    #[test]
    fn test_unary() {
        assert_eq!(derive_unary(&op(Token::Minus), Double).unwrap(), Double);
        assert_eq!(derive_unary(&op(Token::Not), Boolean).unwrap(), Boolean);
        assert!(derive_unary(&op(Token::Not), String).is_err());
        assert!(derive_unary(&op(Token::Tilde), Float).is_err());
        assert!(derive_unary(&op(Token::PlusPlus), Container).is_err());
    }

    #[test]
    fn test_non_operator_token() {
        assert!(derive(&op(Token::Comma), Int, Int).is_err());
    }
}
