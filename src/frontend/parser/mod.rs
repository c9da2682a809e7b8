//! One-pass recursive-descent compiler.
//!
//! There is no syntax tree: each grammar rule appends instructions to the
//! [`Executable`] as soon as it recognizes its construct. Expression rules
//! return an [`Expr`] telling the caller where the value lives (a literal,
//! a variable, a compiler temporary or an access path) and its derived type.

mod expression;
mod statement;

use std::collections::HashSet;

use tracing::debug;

use crate::bytecode::Opcode;
use crate::bytecode::ir::{Executable, Function, INIT_FUNCTION, InstrId, Literal, Operand};
use crate::frontend::lexer::Spanned;
use crate::frontend::parser_error::ParserError;
use crate::frontend::token::Token;
use crate::lang::types::TypeSymbol;
use crate::runtime::host::RoutineRegistry;
use crate::runtime::memory::MemoryRef;

/// Placeholder target of a jump whose label has not been emitted yet.
const UNRESOLVED: InstrId = InstrId(usize::MAX);

/// Where an expression's value lives, and its static type.
#[derive(Debug, Clone)]
pub(crate) struct Expr {
    pub operand: Operand,
    pub ty: TypeSymbol,
}

impl Expr {
    fn new(operand: Operand, ty: TypeSymbol) -> Self {
        Self { operand, ty }
    }

    fn literal(literal: Literal) -> Self {
        let ty = literal.type_symbol();
        Self::new(Operand::Literal(literal), ty)
    }
}

/// Namespaced temporary names: `[frame:seq]`.
///
/// Frame indices only ever grow, so a temporary name is unique across the
/// whole executable even after its frame has been left.
#[derive(Debug, Clone, Default)]
struct Temporaries {
    next_frame: usize,
    frames: Vec<(usize, usize)>,
}

impl Temporaries {
    fn enter(&mut self) {
        self.frames.push((self.next_frame, 0));
        self.next_frame += 1;
    }

    fn leave(&mut self) {
        self.frames.pop();
    }

    fn fresh(&mut self) -> String {
        if self.frames.is_empty() {
            self.enter();
        }
        let top = self.frames.len() - 1;
        self.frames[top].1 += 1;
        let (frame, seq) = self.frames[top];
        format!("[{}:{}]", frame, seq)
    }
}

/// A call to a function that was not defined yet when the call was parsed.
#[derive(Debug)]
struct PendingCall {
    name: String,
    argc: usize,
    at: Spanned,
}

/// Jump targets of the innermost enclosing loop.
#[derive(Debug)]
struct LoopTarget {
    continue_label: InstrId,
    breaks: Vec<InstrId>,
    /// Open `lock` statements outside this loop.
    locks: usize,
}

/// Parser state saved before a speculative parse.
struct Checkpoint {
    pos: usize,
    code_len: usize,
    temps: Temporaries,
    pending: usize,
}

pub struct Parser<'r> {
    tokens: Vec<Spanned>,
    pos: usize,
    executable: Executable,
    routines: &'r dyn RoutineRegistry,

    /// Every name declared at script level, collected before parsing so
    /// functions can use variables declared further down.
    script_names: HashSet<String>,
    /// Script-level names whose declaration has been parsed.
    declared: HashSet<String>,
    /// Block scopes of the function being parsed; the first holds the parameters.
    scopes: Vec<HashSet<String>>,

    temps: Temporaries,
    pending: Vec<PendingCall>,
    loops: Vec<LoopTarget>,
    /// Key temporaries of the enclosing `lock` statements.
    locks: Vec<Operand>,
}

impl<'r> Parser<'r> {
    /// `tokens` must end with `Token::Eof`, as produced by the lexer.
    pub fn new(
        tokens: Vec<Spanned>,
        name: &str,
        shared: &MemoryRef,
        routines: &'r dyn RoutineRegistry,
    ) -> Self {
        let script_names = collect_script_names(&tokens);
        let mut temps = Temporaries::default();
        temps.enter();

        Parser {
            tokens,
            pos: 0,
            executable: Executable::new(name, shared),
            routines,
            script_names,
            declared: HashSet::new(),
            scopes: Vec::new(),
            temps,
            pending: Vec::new(),
            loops: Vec::new(),
            locks: Vec::new(),
        }
    }

    /// Parses the whole script.
    ///
    /// ```text
    /// program := { function | var | shared | struct | enum }
    /// ```
    ///
    /// Script-level declarations become the body of the `.init` function;
    /// function bodies are jumped over.
    pub fn parse(mut self) -> Result<Executable, ParserError> {
        let entry = self.label();
        self.executable.functions.insert(
            INIT_FUNCTION.to_string(),
            Function {
                name: INIT_FUNCTION.to_string(),
                params: Vec::new(),
                entry,
            },
        );

        loop {
            match self.peek() {
                Token::Eof => break,
                Token::Function => self.parse_function()?,
                Token::Var => {
                    self.parse_var_declaration()?;
                    self.expect(&Token::Semicolon, "';'")?;
                }
                Token::Shared => self.parse_shared()?,
                Token::Struct => self.parse_struct()?,
                Token::Enum => self.parse_enum()?,
                other => {
                    let message = format!("unexpected '{}' at script level", other);
                    return Err(self.error(message));
                }
            }
        }

        self.emit(Opcode::Push, Some(Operand::Literal(Literal::Null)), None);
        self.emit(Opcode::Ret, None, None);

        self.resolve_calls()?;

        debug!(
            script = self.executable.name(),
            instructions = self.executable.len(),
            functions = self.executable.functions.len(),
            "parsed"
        );
        Ok(self.executable)
    }

    // =========================================================================
    // Token cursor
    // =========================================================================

    fn current(&self) -> &Spanned {
        // The lexer always terminates the stream with Eof, and `advance`
        // never moves past it.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + offset).min(last)].token
    }

    fn advance(&mut self) -> Spanned {
        let spanned = self.current().clone();
        if spanned.token != Token::Eof {
            self.pos += 1;
        }
        spanned
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<Spanned, ParserError> {
        if self.check(token) {
            Ok(self.advance())
        } else {
            let message = format!("expected {}, found '{}'", what, self.peek());
            Err(self.error(message))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Spanned), ParserError> {
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                Ok((name, self.advance()))
            }
            other => {
                let message = format!("expected {}, found '{}'", what, other);
                Err(self.error(message))
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> ParserError {
        ParserError::at(message, &self.current().span)
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn emit(&mut self, opcode: Opcode, op1: Option<Operand>, op2: Option<Operand>) -> InstrId {
        self.executable.emit(opcode, op1, op2)
    }

    /// A jump target: a `NOP` the optimizer later retargets past.
    fn label(&mut self) -> InstrId {
        self.emit(Opcode::Nop, None, None)
    }

    fn jump_to(&mut self, target: InstrId) {
        self.emit(Opcode::Jmp, Some(Operand::InstructionPointer(target)), None);
    }

    /// Emits a jump whose target is filled in by [`Parser::patch`].
    fn forward_jump(&mut self, opcode: Opcode, condition: Option<Operand>) -> InstrId {
        let target = Some(Operand::InstructionPointer(UNRESOLVED));
        match opcode {
            Opcode::Jmp => self.emit(opcode, target, None),
            _ => self.emit(opcode, condition, target),
        }
    }

    fn patch(&mut self, jump: InstrId, target: InstrId) {
        if let Some(instruction) = self.executable.instruction_mut(jump) {
            let slot = match instruction.opcode {
                Opcode::Jmp => &mut instruction.op1,
                _ => &mut instruction.op2,
            };
            *slot = Some(Operand::InstructionPointer(target));
        }
    }

    fn fresh_temp(&mut self) -> String {
        self.temps.fresh()
    }

    /// Copies an operand into a fresh temporary unless it already is one.
    fn into_temp(&mut self, operand: Operand) -> Operand {
        if operand.is_temporary() {
            return operand;
        }
        let temp = Operand::Variable(self.fresh_temp());
        self.emit(Opcode::Mov, Some(temp.clone()), Some(operand));
        temp
    }

    /// Always copies into a fresh temporary.
    fn copy_to_temp(&mut self, operand: Operand) -> Operand {
        let temp = Operand::Variable(self.fresh_temp());
        self.emit(Opcode::Mov, Some(temp.clone()), Some(operand));
        temp
    }

    // =========================================================================
    // Speculative parsing
    // =========================================================================

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            code_len: self.executable.len(),
            temps: self.temps.clone(),
            pending: self.pending.len(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.executable.truncate(checkpoint.code_len);
        self.temps = checkpoint.temps;
        self.pending.truncate(checkpoint.pending);
    }

    // =========================================================================
    // Names
    // =========================================================================

    fn is_declared(&self, name: &str) -> bool {
        self.script_names.contains(name) || self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn in_function(&self) -> bool {
        !self.scopes.is_empty()
    }

    /// Registers a declaration in the innermost scope.
    fn declare(&mut self, name: &str, at: &Spanned) -> Result<(), ParserError> {
        if self.in_function() {
            if self.is_declared(name) {
                return Err(already_declared(name, at));
            }
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(name.to_string());
            }
            Ok(())
        } else if self.declared.insert(name.to_string()) {
            Ok(())
        } else {
            Err(already_declared(name, at))
        }
    }

    // =========================================================================
    // Script-level declarations
    // =========================================================================

    /// ```text
    /// function NAME ( [IDENT {, IDENT}] ) block
    /// ```
    fn parse_function(&mut self) -> Result<(), ParserError> {
        self.advance(); // consume 'function'
        let (name, at) = self.expect_ident("function name")?;

        if self.executable.functions.contains_key(&name) {
            return Err(ParserError::at(
                format!("function '{}' is already defined", name),
                &at.span,
            ));
        }
        if self.routines.signature(&name).is_some() {
            return Err(ParserError::at(
                format!("'{}' is already a registered routine", name),
                &at.span,
            ));
        }

        self.expect(&Token::LParen, "'('")?;
        let mut params: Vec<String> = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let (param, param_at) = self.expect_ident("parameter name")?;
                if params.contains(&param) || self.script_names.contains(&param) {
                    return Err(already_declared(&param, &param_at));
                }
                params.push(param);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "')'")?;

        let skip = self.forward_jump(Opcode::Jmp, None);
        self.temps.enter();

        let entry = self.label();
        self.executable.functions.insert(
            name.clone(),
            Function {
                name: name.clone(),
                params: params.clone(),
                entry,
            },
        );

        self.scopes.push(params.iter().cloned().collect());
        for param in params.iter().rev() {
            self.emit(Opcode::Pop, Some(Operand::var(param.as_str())), None);
        }

        self.parse_block()?;

        self.emit(Opcode::Push, Some(Operand::Literal(Literal::Null)), None);
        self.emit(Opcode::Ret, None, None);

        self.scopes.clear();
        self.temps.leave();

        let after = self.label();
        self.patch(skip, after);
        Ok(())
    }

    /// ```text
    /// var NAME [= expr]
    /// ```
    ///
    /// Declares in the current block scope, or in script scope outside functions.
    fn parse_var_declaration(&mut self) -> Result<(), ParserError> {
        self.advance(); // consume 'var'
        let (name, at) = self.expect_ident("variable name")?;
        self.declare(&name, &at)?;

        let variable = Operand::var(name.as_str());
        self.emit(Opcode::Db, Some(variable.clone()), None);

        if self.eat(&Token::Assign) {
            let value = self.parse_expression()?;
            self.emit(Opcode::Mov, Some(variable), Some(value.operand));
        }
        Ok(())
    }

    /// ```text
    /// shared NAME [= expr] ;
    /// ```
    fn parse_shared(&mut self) -> Result<(), ParserError> {
        self.advance(); // consume 'shared'
        let (name, at) = self.expect_ident("variable name")?;
        self.declare(&name, &at)?;

        let value = if self.eat(&Token::Assign) {
            self.parse_expression()?.operand
        } else {
            Operand::Literal(Literal::Null)
        };
        self.expect(&Token::Semicolon, "';'")?;

        self.emit(Opcode::Dsb, Some(Operand::var(name.as_str())), Some(value));
        Ok(())
    }

    /// ```text
    /// struct NAME { { FIELD [= expr] ; } } [;]
    /// ```
    ///
    /// A struct is a script-level container whose fields start at their
    /// initializer, or `0` when none is given.
    fn parse_struct(&mut self) -> Result<(), ParserError> {
        self.advance(); // consume 'struct'
        let (name, at) = self.expect_ident("struct name")?;
        self.declare(&name, &at)?;
        self.expect(&Token::LBrace, "'{'")?;

        let container = Operand::var(name.as_str());
        self.emit(Opcode::Dc, Some(container.clone()), None);

        let mut fields = HashSet::new();
        while !self.eat(&Token::RBrace) {
            let (field, field_at) = self.expect_ident("field name")?;
            if !fields.insert(field.clone()) {
                return Err(ParserError::at(
                    format!("field '{}' is already declared in struct '{}'", field, name),
                    &field_at.span,
                ));
            }

            let value = if self.eat(&Token::Assign) {
                self.parse_expression()?.operand
            } else {
                Operand::int(0)
            };
            self.expect(&Token::Semicolon, "';'")?;

            let slot = Operand::Member(Box::new(container.clone()), field);
            self.emit(Opcode::Mov, Some(slot), Some(value));
        }
        self.eat(&Token::Semicolon);
        Ok(())
    }

    /// ```text
    /// enum NAME { [IDENT {, IDENT}] } [;]
    /// ```
    ///
    /// Members are numbered from zero in declaration order.
    fn parse_enum(&mut self) -> Result<(), ParserError> {
        self.advance(); // consume 'enum'
        let (name, at) = self.expect_ident("enum name")?;
        self.declare(&name, &at)?;
        self.expect(&Token::LBrace, "'{'")?;

        let container = Operand::var(name.as_str());
        self.emit(Opcode::Dc, Some(container.clone()), None);

        let mut members: Vec<String> = Vec::new();
        if !self.check(&Token::RBrace) {
            loop {
                let (member, member_at) = self.expect_ident("enum member")?;
                if members.contains(&member) {
                    return Err(ParserError::at(
                        format!("member '{}' is already declared in enum '{}'", member, name),
                        &member_at.span,
                    ));
                }
                let slot = Operand::Member(Box::new(container.clone()), member.clone());
                self.emit(Opcode::Mov, Some(slot), Some(Operand::int(members.len() as i64)));
                members.push(member);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RBrace, "'}'")?;
        self.eat(&Token::Semicolon);
        Ok(())
    }

    /// Checks calls recorded before their function was defined.
    fn resolve_calls(&mut self) -> Result<(), ParserError> {
        for call in &self.pending {
            match self.executable.functions.get(&call.name) {
                None => {
                    return Err(ParserError::at(
                        format!("undefined function '{}'", call.name),
                        &call.at.span,
                    ));
                }
                Some(function) if function.params.len() != call.argc => {
                    return Err(arity_error(&call.name, function.params.len(), call.argc, &call.at));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn already_declared(name: &str, at: &Spanned) -> ParserError {
    ParserError::at(format!("variable '{}' is already declared", name), &at.span)
}

fn arity_error(name: &str, expected: usize, found: usize, at: &Spanned) -> ParserError {
    ParserError::at(
        format!("'{}' expects {} arguments, got {}", name, expected, found),
        &at.span,
    )
}

/// Names introduced by `var`, `shared`, `struct` and `enum` outside any braces.
fn collect_script_names(tokens: &[Spanned]) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut depth = 0usize;

    for pair in tokens.windows(2) {
        match &pair[0].token {
            Token::LBrace => depth += 1,
            Token::RBrace => depth = depth.saturating_sub(1),
            Token::Var | Token::Shared | Token::Struct | Token::Enum if depth == 0 => {
                if let Token::Ident(name) = &pair[1].token {
                    names.insert(name.clone());
                }
            }
            _ => {}
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::Instruction;
    use crate::frontend::lexer::Lexer;
    use crate::runtime::host::Routines;
    use crate::runtime::memory::Memory;

    pub(super) fn compile(source: &str) -> Result<Executable, ParserError> {
        let tokens = Lexer::from_source(source).tokenize().expect("lexing failed");
        let routines = Routines::with_builtins();
        let shared = Memory::shared();
        Parser::new(tokens, "test", &shared, &routines).parse()
    }

    pub(super) fn parse_error(source: &str) -> ParserError {
        compile(source).expect_err("expected a parse error")
    }

    fn opcodes(executable: &Executable) -> Vec<Opcode> {
        executable.code.iter().map(|i: &Instruction| i.opcode).collect()
    }

    #[test]
    fn test_empty_script_has_init() {
        let exe = compile("").unwrap();
        assert!(exe.function(INIT_FUNCTION).is_some());
        assert_eq!(opcodes(&exe), vec![Opcode::Nop, Opcode::Push, Opcode::Ret]);
    }

    #[test]
    fn test_function_is_skipped_by_init() {
        let exe = compile("function main() { return 1; }").unwrap();
        let main = exe.function("main").unwrap();
        assert_eq!(exe.code[1].opcode, Opcode::Jmp);
        assert_eq!(main.entry, InstrId(2));

        let skip = exe.code[1].jump_target().unwrap();
        assert!(skip.0 > main.entry.0);
        assert_eq!(exe.code[skip.0].opcode, Opcode::Nop);
    }

    #[test]
    fn test_parameters_popped_in_reverse() {
        let exe = compile("function f(a, b) { }").unwrap();
        let entry = exe.function("f").unwrap().entry.0;
        assert_eq!(exe.code[entry + 1].opcode, Opcode::Pop);
        assert_eq!(exe.code[entry + 1].op1, Some(Operand::var("b")));
        assert_eq!(exe.code[entry + 2].op1, Some(Operand::var("a")));
    }

    #[test]
    fn test_script_var_declaration() {
        let exe = compile("var x = 5;").unwrap();
        assert_eq!(exe.code[1].opcode, Opcode::Db);
        assert_eq!(exe.code[2].opcode, Opcode::Mov);
        assert_eq!(exe.code[2].op2, Some(Operand::int(5)));
    }

    #[test]
    fn test_shared_declaration() {
        let exe = compile("shared counter = 0;").unwrap();
        assert_eq!(exe.code[1].opcode, Opcode::Dsb);
        assert_eq!(exe.code[1].op1, Some(Operand::var("counter")));
    }

    #[test]
    fn test_struct_and_enum_desugar_to_containers() {
        let exe = compile("struct P { x = 1; y; } enum Color { Red, Green }").unwrap();
        let rendered: Vec<String> = exe
            .code
            .iter()
            .filter(|i| !i.is_nop())
            .map(|i| {
                let operands: Vec<String> = i.operands().map(|o| o.to_string()).collect();
                format!("{} {}", i.opcode, operands.join(", "))
            })
            .collect();
        assert_eq!(
            rendered[..7],
            [
                "DC P",
                "MOV P.x, 1",
                "MOV P.y, 0",
                "DC Color",
                "MOV Color.Red, 0",
                "MOV Color.Green, 1",
                "PUSH null",
            ]
        );
    }

    #[test]
    fn test_functions_see_later_script_variables() {
        assert!(compile("function main() { return total; } var total = 3;").is_ok());
    }

    #[test]
    fn test_duplicate_declarations() {
        let err = parse_error("var a; var a;");
        assert!(err.message.contains("'a' is already declared"));

        let err = parse_error("function f() {} function f() {}");
        assert!(err.message.contains("function 'f' is already defined"));

        let err = parse_error("var a; function f(a) {}");
        assert!(err.message.contains("'a' is already declared"));

        let err = parse_error("function f(p, p) {}");
        assert!(err.message.contains("'p' is already declared"));
    }

    #[test]
    fn test_routine_name_cannot_be_redefined() {
        let err = parse_error("function print(x) {}");
        assert!(err.message.contains("registered routine"));
    }

    #[test]
    fn test_statement_at_script_level_is_rejected() {
        let err = parse_error("x = 1;");
        assert!(err.message.contains("unexpected 'x' at script level"));
        assert_eq!(err.line, 0);
    }

    #[test]
    fn test_forward_call_resolution() {
        assert!(compile("function main() { return later(1); } function later(x) { return x; }").is_ok());

        let err = parse_error("function main() { return missing(); }");
        assert!(err.message.contains("undefined function 'missing'"));

        let err = parse_error("function main() { return later(); } function later(x) { }");
        assert!(err.message.contains("'later' expects 1 arguments, got 0"));
    }

    #[test]
    fn test_error_suffix_reports_source_line() {
        let err = parse_error("function main() {\n  var x = ;\n}");
        let text = err.to_string();
        assert!(text.contains("Zeile 2"), "{}", text);
        assert!(text.ends_with("  var x = ;"), "{}", text);
    }

    #[test]
    fn test_temporaries_are_unique() {
        let exe = compile(
            "function a() { var x = 1 + 2; return x; }\n\
             function b() { var y = 3 + 4; return y; }",
        )
        .unwrap();
        let mut temps: Vec<String> = exe
            .code
            .iter()
            .filter(|i| i.opcode == Opcode::Mov)
            .filter_map(|i| i.op1.as_ref())
            .filter(|o| o.is_temporary())
            .map(|o| o.to_string())
            .collect();
        let count = temps.len();
        temps.sort();
        temps.dedup();
        assert_eq!(temps.len(), count);
        assert!(count >= 2);
    }
}
