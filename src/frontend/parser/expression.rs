use crate::bytecode::Opcode;
use crate::bytecode::ir::{Literal, Operand};
use crate::frontend::derivation::{derive, derive_unary};
use crate::frontend::lexer::Spanned;
use crate::frontend::parser_error::ParserError;
use crate::frontend::token::Token;
use crate::lang::types::TypeSymbol;

use super::{Expr, Parser, PendingCall, arity_error};

/// How a call site dispatches.
pub(super) enum Callee {
    Function,
    Routine,
}

impl Parser<'_> {
    /// ```text
    /// expr := or
    /// ```
    pub(super) fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_and()?;
        while self.check(&Token::OrOr) {
            let op = self.advance();
            left = self.binary(left, &op, Opcode::Or, Self::parse_and)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_not()?;
        while self.check(&Token::AndAnd) {
            let op = self.advance();
            left = self.binary(left, &op, Opcode::And, Self::parse_not)?;
        }
        Ok(left)
    }

    /// `!` binds looser than comparisons: `!a == b` is `!(a == b)`.
    fn parse_not(&mut self) -> Result<Expr, ParserError> {
        if self.check(&Token::Not) {
            let op = self.advance();
            let operand = self.parse_not()?;
            return self.unary(operand, &op, Opcode::Not);
        }
        self.parse_relational()
    }

    fn parse_relational(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_additive()?;
        loop {
            let opcode = match self.peek() {
                Token::Eq => Opcode::Ceq,
                Token::NotEq => Opcode::Cne,
                Token::Gt => Opcode::Cg,
                Token::GtEq => Opcode::Cge,
                Token::Lt => Opcode::Cl,
                Token::LtEq => Opcode::Cle,
                _ => return Ok(left),
            };
            let op = self.advance();
            left = self.binary(left, &op, opcode, Self::parse_additive)?;
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let opcode = match self.peek() {
                Token::Plus => Opcode::Add,
                Token::Minus => Opcode::Sub,
                _ => return Ok(left),
            };
            let op = self.advance();
            left = self.binary(left, &op, opcode, Self::parse_multiplicative)?;
        }
    }

    /// Multiplicative and bitwise operators share one precedence level.
    fn parse_multiplicative(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_unary()?;
        loop {
            let opcode = match self.peek() {
                Token::Star => Opcode::Mul,
                Token::Slash => Opcode::Div,
                Token::Percent => Opcode::Mod,
                Token::Amp => Opcode::Andb,
                Token::Pipe => Opcode::Orb,
                Token::Caret => Opcode::Xor,
                Token::Shl => Opcode::Shl,
                Token::Shr => Opcode::Shr,
                _ => return Ok(left),
            };
            let op = self.advance();
            left = self.binary(left, &op, opcode, Self::parse_unary)?;
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        match self.peek() {
            Token::Minus => {
                let op = self.advance();
                let operand = self.parse_unary()?;
                derive_unary(&op, operand.ty)?;
                if let Some(negated) = negate_literal(&operand.operand) {
                    return Ok(Expr::literal(negated));
                }
                self.unary(operand, &op, Opcode::Neg)
            }
            Token::Tilde => {
                let op = self.advance();
                let operand = self.parse_unary()?;
                self.unary(operand, &op, Opcode::Notb)
            }
            Token::Not => {
                let op = self.advance();
                let operand = self.parse_unary()?;
                self.unary(operand, &op, Opcode::Not)
            }
            _ => self.parse_postfix(),
        }
    }

    /// `MOV t, L` goes out before the right operand is parsed, so `L` is
    /// read before anything the right side does.
    fn binary(
        &mut self,
        left: Expr,
        op: &Spanned,
        opcode: Opcode,
        right_operand: fn(&mut Self) -> Result<Expr, ParserError>,
    ) -> Result<Expr, ParserError> {
        let target = self.into_temp(left.operand);
        let right = right_operand(self)?;
        let ty = derive(op, left.ty, right.ty)?;
        self.emit(opcode, Some(target.clone()), Some(right.operand));
        Ok(Expr::new(target, ty))
    }

    fn unary(&mut self, operand: Expr, op: &Spanned, opcode: Opcode) -> Result<Expr, ParserError> {
        let ty = derive_unary(op, operand.ty)?;
        let target = self.into_temp(operand.operand);
        self.emit(opcode, Some(target.clone()), None);
        Ok(Expr::new(target, ty))
    }

    // =========================================================================
    // Atoms
    // =========================================================================

    fn parse_postfix(&mut self) -> Result<Expr, ParserError> {
        let token = self.peek().clone();
        let atom = match token {
            Token::Integer(n) => {
                self.advance();
                Expr::literal(Literal::Int(n))
            }
            Token::Float(x) => {
                self.advance();
                Expr::literal(Literal::Float(x))
            }
            Token::Double(x) => {
                self.advance();
                Expr::literal(Literal::Double(x))
            }
            Token::Str(s) => {
                self.advance();
                Expr::literal(Literal::Str(s))
            }
            Token::Char(c) => {
                self.advance();
                Expr::literal(Literal::Char(c))
            }
            Token::True => {
                self.advance();
                Expr::literal(Literal::Bool(true))
            }
            Token::False => {
                self.advance();
                Expr::literal(Literal::Bool(false))
            }
            Token::Null => {
                self.advance();
                Expr::literal(Literal::Null)
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen, "')'")?;
                inner
            }
            Token::LBracket => self.parse_array()?,
            Token::PlusPlus | Token::MinusMinus => return self.parse_prefix_step(),
            Token::Ident(name) => {
                if self.peek_at(1) == &Token::LParen {
                    let at = self.advance();
                    self.parse_call(name, at)?
                } else if self.is_declared(&name) {
                    self.advance();
                    Expr::new(Operand::Variable(name), TypeSymbol::Null)
                } else {
                    let message = format!("undeclared identifier '{}'", name);
                    return Err(self.error(message));
                }
            }
            other => {
                let message = format!("expected expression, found '{}'", other);
                return Err(self.error(message));
            }
        };

        self.parse_chain(atom)
    }

    /// `[ ... ]`, `.member`, `.method(...)` and a trailing `++`/`--`.
    fn parse_chain(&mut self, mut expr: Expr) -> Result<Expr, ParserError> {
        loop {
            match self.peek() {
                Token::LBracket => {
                    let operand = self.index_access(expr.operand)?;
                    expr = Expr::new(operand, TypeSymbol::Null);
                }
                Token::Dot => {
                    self.advance();
                    let (name, _) = self.expect_ident("member name")?;
                    expr = if self.check(&Token::LParen) {
                        self.parse_method_call(expr.operand, name)?
                    } else {
                        let base = self.materialize(expr.operand);
                        Expr::new(Operand::Member(Box::new(base), name), TypeSymbol::Null)
                    };
                }
                Token::PlusPlus | Token::MinusMinus
                    if expr.operand.is_assignable() && !expr.operand.is_temporary() =>
                {
                    let op = self.advance();
                    derive_unary(&op, expr.ty)?;
                    let old = self.copy_to_temp(expr.operand.clone());
                    self.emit(step_opcode(&op.token), Some(expr.operand), Some(Operand::int(1)));
                    return Ok(Expr::new(old, expr.ty));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// `++x` / `--x`: steps the target and yields it.
    fn parse_prefix_step(&mut self) -> Result<Expr, ParserError> {
        let op = self.advance();
        let target = self.parse_target()?;
        derive_unary(&op, TypeSymbol::Null)?;
        self.emit(step_opcode(&op.token), Some(target.clone()), Some(Operand::int(1)));
        Ok(Expr::new(target, TypeSymbol::Null))
    }

    /// Assignment target: `IDENT { [expr] | .IDENT }`.
    pub(super) fn parse_target(&mut self) -> Result<Operand, ParserError> {
        let (name, at) = self.expect_ident("variable name")?;
        if !self.is_declared(&name) {
            return Err(ParserError::at(
                format!("undeclared identifier '{}'", name),
                &at.span,
            ));
        }

        let mut target = Operand::Variable(name);
        loop {
            match self.peek() {
                Token::LBracket => target = self.index_access(target)?,
                Token::Dot => {
                    self.advance();
                    let (member, _) = self.expect_ident("member name")?;
                    if self.check(&Token::LParen) {
                        return Err(self.error("a method call cannot be assigned to"));
                    }
                    let base = self.materialize(target);
                    target = Operand::Member(Box::new(base), member);
                }
                _ => return Ok(target),
            }
        }
    }

    /// `base [ expr ]`. The index is evaluated before the base is read.
    fn index_access(&mut self, base: Operand) -> Result<Operand, ParserError> {
        self.expect(&Token::LBracket, "'['")?;
        let index = self.parse_expression()?;
        self.expect(&Token::RBracket, "']'")?;

        let index = match index.operand {
            Operand::Variable(name) => name,
            other => {
                let temp = self.fresh_temp();
                self.emit(Opcode::Mov, Some(Operand::var(temp.as_str())), Some(other));
                temp
            }
        };
        let base = self.materialize(base);
        Ok(Operand::Pointer(Box::new(base), index))
    }

    /// Loads a nested access path into a temporary so it can serve as a base.
    fn materialize(&mut self, operand: Operand) -> Operand {
        match operand {
            Operand::Member(..) | Operand::Pointer(..) => self.copy_to_temp(operand),
            other => other,
        }
    }

    /// `[ e1, e2, ... ]`: a container keyed `0..n`.
    fn parse_array(&mut self) -> Result<Expr, ParserError> {
        self.advance(); // consume '['
        let array = self.fresh_temp();
        self.emit(Opcode::Dc, Some(Operand::var(array.as_str())), None);

        let mut index = 0;
        if !self.check(&Token::RBracket) {
            loop {
                let slot = self.fresh_temp();
                self.emit(Opcode::Mov, Some(Operand::var(slot.as_str())), Some(Operand::int(index)));
                let element = self.parse_expression()?;
                let target = Operand::Pointer(Box::new(Operand::var(array.as_str())), slot);
                self.emit(Opcode::Mov, Some(target), Some(element.operand));
                index += 1;
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RBracket, "']'")?;

        Ok(Expr::new(Operand::Variable(array), TypeSymbol::Container))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// `( [expr {, expr}] )`: each argument is copied to a temporary and pushed.
    pub(super) fn parse_arguments(&mut self) -> Result<usize, ParserError> {
        self.expect(&Token::LParen, "'('")?;
        self.temps.enter();
        let argc = self.parse_argument_list();
        self.temps.leave();
        argc
    }

    fn parse_argument_list(&mut self) -> Result<usize, ParserError> {
        let mut argc = 0;
        if !self.check(&Token::RParen) {
            loop {
                let argument = self.parse_expression()?;
                let temp = self.copy_to_temp(argument.operand);
                self.emit(Opcode::Push, Some(temp), None);
                argc += 1;
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(argc)
    }

    /// Decides CALL or INV for `name` and validates the argument count when
    /// the callee is already known.
    pub(super) fn resolve_callee(
        &mut self,
        name: &str,
        argc: usize,
        at: &Spanned,
    ) -> Result<Callee, ParserError> {
        if let Some(function) = self.executable.function(name) {
            if function.params.len() != argc {
                return Err(arity_error(name, function.params.len(), argc, at));
            }
            return Ok(Callee::Function);
        }

        if let Some(signature) = self.routines.signature(name) {
            if signature.arity() != argc {
                return Err(arity_error(name, signature.arity(), argc, at));
            }
            return Ok(Callee::Routine);
        }

        self.pending.push(PendingCall {
            name: name.to_string(),
            argc,
            at: at.clone(),
        });
        Ok(Callee::Function)
    }

    /// `NAME ( args )` with the name already consumed.
    fn parse_call(&mut self, name: String, at: Spanned) -> Result<Expr, ParserError> {
        let argc = self.parse_arguments()?;
        let count = Some(Operand::int(argc as i64));

        match self.resolve_callee(&name, argc, &at)? {
            Callee::Function => self.emit(Opcode::Call, Some(Operand::FunctionPointer(name)), count),
            Callee::Routine => self.emit(Opcode::Inv, Some(Operand::RoutinePointer(name)), count),
        };

        let result = self.fresh_temp();
        self.emit(Opcode::Pop, Some(Operand::var(result.as_str())), None);
        Ok(Expr::new(Operand::Variable(result), TypeSymbol::Null))
    }

    /// `base.method(args)`, dispatched to the host object bridge.
    fn parse_method_call(&mut self, base: Operand, method: String) -> Result<Expr, ParserError> {
        let base = self.materialize(base);
        let argc = self.parse_arguments()?;
        self.emit(
            Opcode::Invm,
            Some(Operand::Member(Box::new(base), method)),
            Some(Operand::int(argc as i64)),
        );

        let result = self.fresh_temp();
        self.emit(Opcode::Pop, Some(Operand::var(result.as_str())), None);
        Ok(Expr::new(Operand::Variable(result), TypeSymbol::Null))
    }
}

fn step_opcode(token: &Token) -> Opcode {
    match token {
        Token::MinusMinus => Opcode::Sub,
        _ => Opcode::Add,
    }
}

fn negate_literal(operand: &Operand) -> Option<Literal> {
    match operand.as_literal()? {
        Literal::Int(n) => n.checked_neg().map(Literal::Int),
        Literal::Float(x) => Some(Literal::Float(-x)),
        Literal::Double(x) => Some(Literal::Double(-x)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{compile, parse_error};
    use crate::bytecode::Opcode;
    use crate::bytecode::ir::{Executable, Operand};

    fn function_body(exe: &Executable, name: &str) -> Vec<String> {
        let entry = exe.function(name).unwrap().entry.0;
        let mut lines = Vec::new();
        for instruction in &exe.code[entry + 1..] {
            if instruction.opcode == Opcode::Nop {
                continue;
            }
            let operands: Vec<String> = instruction.operands().map(|o| o.to_string()).collect();
            lines.push(format!("{} {}", instruction.opcode, operands.join(", ")).trim().to_string());
            if instruction.opcode == Opcode::Ret {
                break;
            }
        }
        lines
    }

    #[test]
    fn test_binary_copies_left_before_right() {
        let exe = compile("function main() { var x = 1; var y = x + 2 * x; }").unwrap();
        let body = function_body(&exe, "main");
        assert_eq!(
            body[..6],
            [
                "DB x",
                "MOV x, 1",
                "DB y",
                "MOV [1:1], x",
                "MOV [1:2], 2",
                "MUL [1:2], x",
            ]
        );
        assert_eq!(body[6], "ADD [1:1], [1:2]");
        assert_eq!(body[7], "MOV y, [1:1]");
    }

    #[test]
    fn test_negative_literals_fold() {
        let exe = compile("function main() { return -5; }").unwrap();
        assert_eq!(function_body(&exe, "main"), ["PUSH -5", "RET"]);
    }

    #[test]
    fn test_call_pushes_copies_and_pops_result() {
        let exe = compile("function f(a) { return a; } function main() { return f(3); }").unwrap();
        let body = function_body(&exe, "main");
        assert_eq!(body[0], "MOV [3:1], 3");
        assert_eq!(body[1], "PUSH [3:1]");
        assert_eq!(body[2], "CALL <f>, 1");
        assert!(body[3].starts_with("POP [2:"));
    }

    #[test]
    fn test_routine_call_uses_inv() {
        let exe = compile("function main() { println(\"hi\"); }").unwrap();
        let body = function_body(&exe, "main");
        assert!(body.contains(&"INV &println, 1".to_string()), "{:?}", body);
    }

    #[test]
    fn test_routine_arity_is_checked() {
        let err = parse_error("function main() { println(1, 2); }");
        assert!(err.message.contains("'println' expects 1 arguments, got 2"));
    }

    #[test]
    fn test_nested_index_materializes_base() {
        let exe = compile("function main() { var a = [[1]]; return a[0][0]; }").unwrap();
        let body = function_body(&exe, "main");
        let pointer_reads: Vec<&String> = body.iter().filter(|l| l.contains("][")).collect();
        assert!(!pointer_reads.is_empty(), "{:?}", body);
        assert!(body.iter().any(|l| l.starts_with("MOV [") && l.contains(", a[")));
    }

    #[test]
    fn test_method_call_uses_invm() {
        let exe = compile("function main(o) { return o.size(1); }").unwrap();
        let body = function_body(&exe, "main");
        assert!(body.iter().any(|l| l == "INVM o.size, 1"), "{:?}", body);
    }

    #[test]
    fn test_postfix_increment_keeps_old_value() {
        let exe = compile("function main() { var i = 0; var j = i++; }").unwrap();
        let body = function_body(&exe, "main");
        assert!(body.contains(&"ADD i, 1".to_string()));
        let old = body.iter().position(|l| l.starts_with("MOV [") && l.ends_with(", i")).unwrap();
        let step = body.iter().position(|l| l == "ADD i, 1").unwrap();
        assert!(old < step);
    }

    #[test]
    fn test_type_errors() {
        let err = parse_error("function main() { var s = 1 + \"a\"; }");
        assert!(err.message.contains("operator '+' cannot be applied to int and string"));

        let err = parse_error("function main() { var b = true && \"x\"; }");
        assert!(err.message.contains("'&&'"));

        let err = parse_error("function main() { var b = -true; }");
        assert!(err.message.contains("'-'"));
    }

    #[test]
    fn test_undeclared_identifier() {
        let err = parse_error("function main() { return nope; }");
        assert!(err.message.contains("undeclared identifier 'nope'"));
    }

    #[test]
    fn test_array_literal_is_container() {
        let exe = compile("function main() { var a = [7, 8]; }").unwrap();
        let body = function_body(&exe, "main");
        assert!(body[1].starts_with("DC ["));
        assert!(body.iter().any(|l| l.ends_with(", 8") && l.contains("][")));
        assert!(exe.code.iter().any(|i| matches!(&i.op1, Some(Operand::Pointer(..)))));
    }
}
