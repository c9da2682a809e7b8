//! Source text to bytecode: lexing, type derivation and the one-pass parser.

pub mod derivation;
pub mod lexer;
pub mod parser;
pub mod parser_error;
pub mod source;
pub mod token;
pub mod token_dumper;
