use serde::{Deserialize, Serialize};

/// Static type symbols known to the compiler.
///
/// `Null` doubles as "not yet known": function results, variables and member
/// reads all derive to `Null`, so only literal-driven mismatches are rejected
/// at parse time. Routine signatures use `Null` to mean "any value".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSymbol {
    Null,
    Int,
    Float,
    Double,
    Boolean,
    String,
    Char,
    Container,
}

impl TypeSymbol {
    pub const ALL: [TypeSymbol; 8] = [
        TypeSymbol::Null,
        TypeSymbol::Int,
        TypeSymbol::Float,
        TypeSymbol::Double,
        TypeSymbol::Boolean,
        TypeSymbol::String,
        TypeSymbol::Char,
        TypeSymbol::Container,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TypeSymbol::Null => "null",
            TypeSymbol::Int => "int",
            TypeSymbol::Float => "float",
            TypeSymbol::Double => "double",
            TypeSymbol::Boolean => "boolean",
            TypeSymbol::String => "string",
            TypeSymbol::Char => "char",
            TypeSymbol::Container => "container",
        }
    }

    /// Types that take part in numeric widening.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeSymbol::Int | TypeSymbol::Float | TypeSymbol::Double | TypeSymbol::Char
        )
    }
}

impl std::fmt::Display for TypeSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
