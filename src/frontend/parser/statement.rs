use std::collections::HashSet;

use crate::bytecode::Opcode;
use crate::bytecode::ir::{InstrId, Literal, Operand};
use crate::frontend::derivation::derive;
use crate::frontend::lexer::Spanned;
use crate::frontend::parser_error::ParserError;
use crate::frontend::token::Token;
use crate::lang::types::TypeSymbol;

use super::expression::Callee;
use super::{Expr, LoopTarget, Parser};

impl Parser<'_> {
    /// ```text
    /// block := { stmt }
    /// ```
    pub(super) fn parse_block(&mut self) -> Result<(), ParserError> {
        self.expect(&Token::LBrace, "'{'")?;
        self.scopes.push(HashSet::new());

        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.error("expected '}' before end of input"));
            }
            self.parse_statement()?;
        }
        self.advance(); // consume '}'

        self.scopes.pop();
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<(), ParserError> {
        match self.peek() {
            Token::LBrace => self.parse_block(),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::For => self.parse_for(),
            Token::Foreach => self.parse_foreach(),
            Token::Break => self.parse_break(),
            Token::Continue => self.parse_continue(),
            Token::Return => self.parse_return(),
            Token::Yield => {
                self.advance();
                self.expect(&Token::Semicolon, "';'")?;
                self.emit(Opcode::Int, None, None);
                Ok(())
            }
            Token::Wait => self.parse_wait(),
            Token::Lock => self.parse_lock(),
            Token::Run => self.parse_run(),
            Token::Function | Token::Shared | Token::Struct | Token::Enum => {
                let message = format!("'{}' is only allowed at script level", self.peek());
                Err(self.error(message))
            }
            _ => {
                self.parse_simple()?;
                self.expect(&Token::Semicolon, "';'")?;
                Ok(())
            }
        }
    }

    /// ```text
    /// simple := var IDENT [= expr] | target assignop expr | expr
    /// ```
    fn parse_simple(&mut self) -> Result<(), ParserError> {
        if self.check(&Token::Var) {
            return self.parse_var_declaration();
        }

        let starts_target = matches!(self.peek(), Token::Ident(_)) && self.peek_at(1) != &Token::LParen;
        if starts_target {
            if let Some((target, op)) = self.probe_assignment() {
                return self.parse_assignment(target, op);
            }
        }

        self.parse_expression()?;
        Ok(())
    }

    /// Speculatively parses an assignment target. On anything but
    /// `target assignop`, everything consumed and emitted is rolled back.
    fn probe_assignment(&mut self) -> Option<(Operand, Spanned)> {
        let checkpoint = self.checkpoint();
        match self.parse_target() {
            Ok(target) if self.peek().is_assign_op() => {
                let op = self.advance();
                Some((target, op))
            }
            _ => {
                self.restore(checkpoint);
                None
            }
        }
    }

    fn parse_assignment(&mut self, target: Operand, op: Spanned) -> Result<(), ParserError> {
        let value = self.parse_expression()?;
        let opcode = match op.token {
            Token::Assign => Opcode::Mov,
            Token::PlusAssign => Opcode::Add,
            Token::MinusAssign => Opcode::Sub,
            Token::StarAssign => Opcode::Mul,
            Token::SlashAssign => Opcode::Div,
            _ => Opcode::Mod,
        };
        if opcode != Opcode::Mov {
            derive(&op, TypeSymbol::Null, value.ty)?;
        }
        self.emit(opcode, Some(target), Some(value.operand));
        Ok(())
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    /// `( expr )` that must derive to boolean, copied into a temporary.
    fn parse_condition(&mut self, keyword: &Spanned) -> Result<Operand, ParserError> {
        self.expect(&Token::LParen, "'('")?;
        let start = self.current().clone();
        let condition = self.parse_expression()?;
        check_boolean(&condition, keyword, &start)?;
        self.expect(&Token::RParen, "')'")?;
        Ok(self.copy_to_temp(condition.operand))
    }

    /// ```text
    /// if ( expr ) stmt [else stmt]
    /// ```
    fn parse_if(&mut self) -> Result<(), ParserError> {
        let keyword = self.advance();
        let condition = self.parse_condition(&keyword)?;
        let to_else = self.forward_jump(Opcode::Jz, Some(condition));

        self.parse_statement()?;

        if self.eat(&Token::Else) {
            let to_end = self.forward_jump(Opcode::Jmp, None);
            let else_label = self.label();
            self.patch(to_else, else_label);
            self.parse_statement()?;
            let end = self.label();
            self.patch(to_end, end);
        } else {
            let end = self.label();
            self.patch(to_else, end);
        }
        Ok(())
    }

    // =========================================================================
    // Loops
    // =========================================================================

    fn enter_loop(&mut self, continue_label: InstrId) {
        self.loops.push(LoopTarget {
            continue_label,
            breaks: Vec::new(),
            locks: self.locks.len(),
        });
    }

    /// Pops the innermost loop and points its `break`s at a fresh end label.
    fn leave_loop(&mut self) -> InstrId {
        let end = self.label();
        if let Some(target) = self.loops.pop() {
            for jump in target.breaks {
                self.patch(jump, end);
            }
        }
        end
    }

    /// ```text
    /// while ( expr ) stmt
    /// ```
    fn parse_while(&mut self) -> Result<(), ParserError> {
        let keyword = self.advance();
        let top = self.label();
        let condition = self.parse_condition(&keyword)?;
        let exit = self.forward_jump(Opcode::Jz, Some(condition));

        self.enter_loop(top);
        self.parse_statement()?;
        self.jump_to(top);
        let end = self.leave_loop();

        self.patch(exit, end);
        Ok(())
    }

    /// ```text
    /// for ( [simple] ; [expr] ; [simple] ) stmt
    /// ```
    ///
    /// Laid out as `init; top: cond; JMP body; step: ...; JMP top; body: ...; JMP step`
    /// so the step can be emitted before the body.
    fn parse_for(&mut self) -> Result<(), ParserError> {
        let keyword = self.advance();
        self.expect(&Token::LParen, "'('")?;
        self.scopes.push(HashSet::new());

        if !self.check(&Token::Semicolon) {
            self.parse_simple()?;
        }
        self.expect(&Token::Semicolon, "';'")?;

        let top = self.label();
        let exit = if self.check(&Token::Semicolon) {
            None
        } else {
            let start = self.current().clone();
            let condition = self.parse_expression()?;
            check_boolean(&condition, &keyword, &start)?;
            let condition = self.copy_to_temp(condition.operand);
            Some(self.forward_jump(Opcode::Jz, Some(condition)))
        };
        self.expect(&Token::Semicolon, "';'")?;

        let to_body = self.forward_jump(Opcode::Jmp, None);
        let step = self.label();
        if !self.check(&Token::RParen) {
            self.parse_simple()?;
        }
        self.expect(&Token::RParen, "')'")?;
        self.jump_to(top);

        let body = self.label();
        self.patch(to_body, body);

        self.enter_loop(step);
        self.parse_statement()?;
        self.jump_to(step);
        let end = self.leave_loop();

        if let Some(exit) = exit {
            self.patch(exit, end);
        }
        self.scopes.pop();
        Ok(())
    }

    /// ```text
    /// foreach ( [var] IDENT in expr ) stmt
    /// ```
    ///
    /// The iterator variable walks the keys of a container, or the character
    /// positions of a string, and is null once exhausted.
    fn parse_foreach(&mut self) -> Result<(), ParserError> {
        let keyword = self.advance();
        self.expect(&Token::LParen, "'('")?;
        self.scopes.push(HashSet::new());

        let declares = self.eat(&Token::Var);
        let (name, at) = self.expect_ident("iterator variable")?;
        if declares {
            self.declare(&name, &at)?;
            self.emit(Opcode::Db, Some(Operand::var(name.as_str())), None);
        } else if !self.is_declared(&name) {
            return Err(ParserError::at(
                format!("undeclared identifier '{}'", name),
                &at.span,
            ));
        }
        self.expect(&Token::In, "'in'")?;

        let start = self.current().clone();
        let collection = self.parse_expression()?;
        if !matches!(
            collection.ty,
            TypeSymbol::Container | TypeSymbol::String | TypeSymbol::Null
        ) {
            return Err(ParserError::at(
                format!(
                    "'{}' needs a container or string, found {}",
                    keyword.token, collection.ty
                ),
                &start.span,
            ));
        }
        self.expect(&Token::RParen, "')'")?;

        let collection = self.into_temp(collection.operand);
        let iterator = Operand::var(name.as_str());
        self.emit(Opcode::Mov, Some(iterator.clone()), Some(Operand::Literal(Literal::Null)));

        let top = self.label();
        self.emit(Opcode::Ptr, Some(iterator.clone()), Some(collection));
        let exhausted = self.copy_to_temp(iterator);
        self.emit(Opcode::Test, Some(exhausted.clone()), None);
        let exit = self.forward_jump(Opcode::Jnz, Some(exhausted));

        self.enter_loop(top);
        self.parse_statement()?;
        self.jump_to(top);
        let end = self.leave_loop();

        self.patch(exit, end);
        self.scopes.pop();
        Ok(())
    }

    fn parse_break(&mut self) -> Result<(), ParserError> {
        let keyword = self.advance();
        self.expect(&Token::Semicolon, "';'")?;

        let Some(depth) = self.loops.last().map(|target| target.locks) else {
            return Err(ParserError::at("'break' outside of a loop", &keyword.span));
        };
        self.free_locks_from(depth);

        let jump = self.forward_jump(Opcode::Jmp, None);
        if let Some(target) = self.loops.last_mut() {
            target.breaks.push(jump);
        }
        Ok(())
    }

    fn parse_continue(&mut self) -> Result<(), ParserError> {
        let keyword = self.advance();
        self.expect(&Token::Semicolon, "';'")?;

        let Some((continue_label, depth)) = self
            .loops
            .last()
            .map(|target| (target.continue_label, target.locks))
        else {
            return Err(ParserError::at("'continue' outside of a loop", &keyword.span));
        };
        self.free_locks_from(depth);

        self.jump_to(continue_label);
        Ok(())
    }

    /// ```text
    /// return [expr] ;
    /// ```
    fn parse_return(&mut self) -> Result<(), ParserError> {
        self.advance(); // consume 'return'
        let value = if self.check(&Token::Semicolon) {
            Operand::Literal(Literal::Null)
        } else {
            self.parse_expression()?.operand
        };
        self.expect(&Token::Semicolon, "';'")?;

        self.free_locks_from(0);
        self.emit(Opcode::Push, Some(value), None);
        self.emit(Opcode::Ret, None, None);
        Ok(())
    }

    /// Releases the locks of enclosing `lock` statements, innermost first,
    /// down to (not including) the first `depth` of them.
    fn free_locks_from(&mut self, depth: usize) {
        let keys: Vec<Operand> = self.locks[depth..].iter().rev().cloned().collect();
        for key in keys {
            self.emit(Opcode::Free, Some(key), None);
        }
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    /// ```text
    /// wait ( expr ) ;
    /// ```
    ///
    /// Polls the condition, yielding after every failed check.
    fn parse_wait(&mut self) -> Result<(), ParserError> {
        let keyword = self.advance();
        let top = self.label();
        let condition = self.parse_condition(&keyword)?;
        self.expect(&Token::Semicolon, "';'")?;

        let done = self.forward_jump(Opcode::Jnz, Some(condition));
        self.emit(Opcode::Int, None, None);
        self.jump_to(top);
        let end = self.label();
        self.patch(done, end);
        Ok(())
    }

    /// ```text
    /// lock ( expr ) stmt
    /// ```
    fn parse_lock(&mut self) -> Result<(), ParserError> {
        self.advance(); // consume 'lock'
        self.expect(&Token::LParen, "'('")?;
        let key = self.parse_expression()?;
        self.expect(&Token::RParen, "')'")?;

        let key = self.copy_to_temp(key.operand);
        self.emit(Opcode::Lock, Some(key.clone()), None);

        self.locks.push(key.clone());
        let body = self.parse_statement();
        self.locks.pop();
        body?;

        self.emit(Opcode::Free, Some(key), None);
        Ok(())
    }

    /// ```text
    /// run NAME ( args ) ;
    /// ```
    fn parse_run(&mut self) -> Result<(), ParserError> {
        self.advance(); // consume 'run'
        let (name, at) = self.expect_ident("function name")?;
        if self.routines.signature(&name).is_some() && self.executable.function(&name).is_none() {
            return Err(ParserError::at(
                format!("routine '{}' cannot be run in the background", name),
                &at.span,
            ));
        }

        let argc = self.parse_arguments()?;
        self.expect(&Token::Semicolon, "';'")?;

        match self.resolve_callee(&name, argc, &at)? {
            Callee::Function => {
                self.emit(
                    Opcode::Run,
                    Some(Operand::FunctionPointer(name)),
                    Some(Operand::int(argc as i64)),
                );
                Ok(())
            }
            Callee::Routine => Err(ParserError::at(
                format!("routine '{}' cannot be run in the background", name),
                &at.span,
            )),
        }
    }
}

fn check_boolean(condition: &Expr, keyword: &Spanned, at: &Spanned) -> Result<(), ParserError> {
    match condition.ty {
        TypeSymbol::Boolean | TypeSymbol::Null => Ok(()),
        other => Err(ParserError::at(
            format!("condition of '{}' must be boolean, found {}", keyword.token, other),
            &at.span,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{compile, parse_error};
    use crate::bytecode::Opcode;

    fn count(source: &str, opcode: Opcode) -> usize {
        let exe = compile(source).unwrap();
        exe.code.iter().filter(|i| i.opcode == opcode).count()
    }

    #[test]
    fn test_assignment_is_disambiguated() {
        let exe = compile("function main() { var a = [0]; a[0] = 5; a[0]; }").unwrap();
        let stores = exe
            .code
            .iter()
            .filter(|i| i.opcode == Opcode::Mov)
            .filter(|i| i.op2.as_ref().map(|o| o.to_string()) == Some("5".to_string()))
            .count();
        assert_eq!(stores, 1);
    }

    #[test]
    fn test_probe_rollback_leaves_no_code() {
        let with_probe = compile("function main() { var a = [1]; a[0] + 1; }").unwrap();
        let movs_into_index = with_probe
            .code
            .iter()
            .filter(|i| i.opcode == Opcode::Mov)
            .filter(|i| i.op2.as_ref().map(|o| o.to_string()) == Some("0".to_string()))
            .count();
        // One for the array literal slot, one for the index expression.
        assert_eq!(movs_into_index, 2);
    }

    #[test]
    fn test_compound_assignment() {
        let exe = compile("function main() { var s = \"\"; s += 1; }").unwrap();
        assert!(exe.code.iter().any(|i| i.opcode == Opcode::Add
            && i.op1.as_ref().map(|o| o.to_string()) == Some("s".to_string())));
    }

    #[test]
    fn test_non_boolean_conditions_fail() {
        let err = parse_error("function main() { while (1) { } }");
        assert!(err.message.contains("condition of 'while' must be boolean, found int"));

        let err = parse_error("function main() { for (var i = 0; \"x\"; i++) { } }");
        assert!(err.message.contains("condition of 'for' must be boolean"));

        let err = parse_error("function main() { var x; foreach (x in 5) { } }");
        assert!(err.message.contains("needs a container or string, found int"));
    }

    #[test]
    fn test_break_and_continue_need_a_loop() {
        let err = parse_error("function main() { break; }");
        assert!(err.message.contains("'break' outside of a loop"));
        let err = parse_error("function main() { continue; }");
        assert!(err.message.contains("'continue' outside of a loop"));
    }

    #[test]
    fn test_redeclaration_in_nested_block() {
        let err = parse_error("function main() { var x; { var x; } }");
        assert!(err.message.contains("'x' is already declared"));
        assert!(compile("function main() { { var x; } { var x; } }").is_ok());
    }

    #[test]
    fn test_for_variable_is_scoped_to_loop() {
        assert!(compile("function main() { for (var i = 0; i < 2; i++) {} for (var i = 0; i < 2; i++) {} }").is_ok());
        let err = parse_error("function main() { for (var i = 0; i < 2; i++) {} return i; }");
        assert!(err.message.contains("undeclared identifier 'i'"));
    }

    #[test]
    fn test_wait_yield_emit_interrupts() {
        assert_eq!(count("function main() { yield; }", Opcode::Int), 1);
        assert_eq!(count("shared ready = false; function main() { wait(ready); }", Opcode::Int), 1);
    }

    #[test]
    fn test_lock_frees_on_every_exit() {
        let source = "function main() {\n\
                      while (true) { lock(\"k\") { if (true) { break; } return 1; } }\n\
                      }";
        assert_eq!(count(source, Opcode::Lock), 1);
        // break, return and the normal exit
        assert_eq!(count(source, Opcode::Free), 3);
    }

    #[test]
    fn test_run_statement() {
        assert_eq!(count("function w(n) { } function main() { run w(1); }", Opcode::Run), 1);
        assert_eq!(count("function main() { run later(); } function later() { }", Opcode::Run), 1);

        let err = parse_error("function main() { run println(1); }");
        assert!(err.message.contains("cannot be run in the background"));
    }

    #[test]
    fn test_foreach_shape() {
        let exe = compile("function main() { var a = [1, 2]; foreach (var k in a) { } }").unwrap();
        let ptr = exe.code.iter().position(|i| i.opcode == Opcode::Ptr).unwrap();
        assert_eq!(exe.code[ptr + 1].opcode, Opcode::Mov);
        assert_eq!(exe.code[ptr + 2].opcode, Opcode::Test);
        assert_eq!(exe.code[ptr + 3].opcode, Opcode::Jnz);
    }

    #[test]
    fn test_function_inside_function_is_rejected() {
        let err = parse_error("function main() { function inner() {} }");
        assert!(err.message.contains("only allowed at script level"));
    }
}
