//! Recursive descent parser for Me.
//!
//! One method per precedence tier, loosest to tightest: assignment, `veya`,
//! `ve`, `|`, `^`, `&`, equality, comparison, shifts, additive,
//! multiplicative, unary, postfix, primary.
//!
//! A parse error records a diagnostic and unwinds to the enclosing statement
//! boundary through ordinary `Result` propagation, then parsing resumes at
//! the next statement so a single pass reports everything.

use std::mem::discriminant;

use crate::ast::{Expr, Pos, Stmt};
use crate::bytecode::op::{BinOp, UnOp};
use crate::diagnostics::{Diagnostics, Stage};
use crate::token::{Token, TokenKind};

/// Marker for an already-reported parse error.
struct ParseInterrupt;

type PResult<T> = Result<T, ParseInterrupt>;

/// Parses a token stream into a statement list.
///
/// Errors are recorded in `diags`; the returned AST covers whatever parsed
/// cleanly and must not be compiled when `diags.has_errors()`.
pub fn parse(tokens: Vec<Token>, diags: &mut Diagnostics) -> Vec<Stmt> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        diags,
    };
    let mut stmts = Vec::new();
    loop {
        parser.skip_terminators();
        if parser.check(&TokenKind::Eof) {
            break;
        }
        match parser.statement() {
            Ok(stmt) => stmts.push(stmt),
            Err(ParseInterrupt) => parser.synchronize(),
        }
    }
    stmts
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    diags: &'a mut Diagnostics,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_ahead(&self, n: usize) -> &TokenKind {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn here(&self) -> Pos {
        let t = self.peek();
        Pos {
            line: t.line,
            col: t.col,
        }
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        discriminant(&self.peek().kind) == discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected {what}, found {}", self.peek().kind.describe())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<(String, Pos)> {
        let pos = self.here();
        if let TokenKind::Ident(_) = self.peek().kind {
            if let TokenKind::Ident(name) = self.advance().kind {
                return Ok((name, pos));
            }
        }
        Err(self.error_here(format!("expected {what}, found {}", self.peek().kind.describe())))
    }

    fn error_here(&mut self, message: String) -> ParseInterrupt {
        let pos = self.here();
        self.diags.error(Stage::Parser, pos.line, pos.col, message);
        ParseInterrupt
    }

    fn skip_terminators(&mut self) {
        while self.check(&TokenKind::Terminator) {
            self.advance();
        }
    }

    /// Skips ahead to the next statement boundary after an error.
    fn synchronize(&mut self) {
        loop {
            match &self.peek().kind {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Terminator => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Consumes the statement terminator, tolerating `}` and end of file.
    fn end_of_statement(&mut self) -> PResult<()> {
        match &self.peek().kind {
            TokenKind::Terminator => {
                self.advance();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            other => {
                let found = other.describe();
                Err(self.error_here(format!("expected end of statement, found {found}")))
            }
        }
    }

    // === Statements ===

    fn statement(&mut self) -> PResult<Stmt> {
        match &self.peek().kind {
            TokenKind::KwVar => self.declaration(false),
            TokenKind::KwConst => self.declaration(true),
            TokenKind::KwIf => self.if_statement(),
            TokenKind::KwWhile => self.while_statement(),
            TokenKind::KwFunction => self.function_statement(),
            TokenKind::KwReturn => self.return_statement(),
            TokenKind::KwBreak => {
                let pos = self.here();
                self.advance();
                self.end_of_statement()?;
                Ok(Stmt::Break(pos))
            }
            TokenKind::KwContinue => {
                let pos = self.here();
                self.advance();
                self.end_of_statement()?;
                Ok(Stmt::Continue(pos))
            }
            TokenKind::LBrace => Ok(Stmt::Block(self.block()?)),
            _ => {
                let expr = self.expression()?;
                self.end_of_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn declaration(&mut self, constant: bool) -> PResult<Stmt> {
        let pos = self.here();
        self.advance(); // değişken / sabit
        let (name, _) = self.expect_ident("a name to declare")?;
        let init = if self.eat(&TokenKind::Eq) {
            Some(self.expression()?)
        } else if constant {
            return Err(self.error_here(format!("constant '{name}' must be initialized")));
        } else {
            None
        };
        self.end_of_statement()?;
        Ok(Stmt::Decl {
            name,
            constant,
            init,
            pos,
        })
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.advance(); // şayet
        self.expect(&TokenKind::LParen, "'(' after 'şayet'")?;
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "')' after condition")?;
        let then = Box::new(self.statement()?);
        // A newline between `}` and `değilse` is allowed.
        if self.check(&TokenKind::Terminator) && *self.peek_ahead(1) == TokenKind::KwElse {
            self.advance();
        }
        let otherwise = if self.eat(&TokenKind::KwElse) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        self.advance(); // madem
        self.expect(&TokenKind::LParen, "'(' after 'madem'")?;
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "')' after condition")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { cond, body })
    }

    fn function_statement(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        self.advance(); // marifet
        let (name, _) = self.expect_ident("a function name")?;
        self.expect(&TokenKind::LParen, "'(' after function name")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (param, _) = self.expect_ident("a parameter name")?;
                params.push(param);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')' after parameters")?;
        self.skip_terminators();
        let body = self.block()?;
        Ok(Stmt::Function {
            name,
            params,
            body,
            pos,
        })
    }

    fn return_statement(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        self.advance(); // tebliğ
        let value = if matches!(
            self.peek().kind,
            TokenKind::Terminator | TokenKind::RBrace | TokenKind::Eof
        ) {
            None
        } else {
            Some(self.expression()?)
        };
        self.end_of_statement()?;
        Ok(Stmt::Return { value, pos })
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        loop {
            self.skip_terminators();
            match &self.peek().kind {
                TokenKind::RBrace => {
                    self.advance();
                    return Ok(stmts);
                }
                TokenKind::Eof => {
                    return Err(self.error_here("unexpected end of file, expected '}'".to_string()));
                }
                _ => match self.statement() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(ParseInterrupt) => self.synchronize(),
                },
            }
        }
    }

    // === Expressions ===

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let expr = self.or_expr()?;
        let compound = match &self.peek().kind {
            TokenKind::Eq => None,
            TokenKind::PlusEq => Some(BinOp::Add),
            TokenKind::MinusEq => Some(BinOp::Sub),
            TokenKind::StarEq => Some(BinOp::Mul),
            TokenKind::SlashEq => Some(BinOp::Div),
            TokenKind::PercentEq => Some(BinOp::Mod),
            TokenKind::AmpEq => Some(BinOp::BitAnd),
            TokenKind::PipeEq => Some(BinOp::BitOr),
            TokenKind::CaretEq => Some(BinOp::BitXor),
            _ => return Ok(expr),
        };
        let op_pos = self.here();
        self.advance();
        let rhs = self.assignment()?;
        let Expr::Variable(name, pos) = expr else {
            return Err(self.error_here("invalid assignment target".to_string()));
        };
        let value = match compound {
            // a += b  desugars to  a = a + b
            Some(op) => Expr::Binary {
                op,
                lhs: Box::new(Expr::Variable(name.clone(), pos)),
                rhs: Box::new(rhs),
                pos: op_pos,
            },
            None => rhs,
        };
        Ok(Expr::Assign {
            name,
            value: Box::new(value),
            pos,
        })
    }

    fn or_expr(&mut self) -> PResult<Expr> {
        let mut expr = self.and_expr()?;
        loop {
            let pos = self.here();
            if self.eat(&TokenKind::KwOr) || self.eat(&TokenKind::PipePipe) {
                let rhs = self.and_expr()?;
                expr = Expr::Or {
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                    pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        let mut expr = self.bit_or()?;
        loop {
            let pos = self.here();
            if self.eat(&TokenKind::KwAnd) || self.eat(&TokenKind::AmpAmp) {
                let rhs = self.bit_or()?;
                expr = Expr::And {
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                    pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn bit_or(&mut self) -> PResult<Expr> {
        self.binary_tier(&[(TokenKind::Pipe, BinOp::BitOr)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> PResult<Expr> {
        self.binary_tier(&[(TokenKind::Caret, BinOp::BitXor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> PResult<Expr> {
        self.binary_tier(&[(TokenKind::Amp, BinOp::BitAnd)], Self::equality)
    }

    fn equality(&mut self) -> PResult<Expr> {
        self.binary_tier(
            &[(TokenKind::EqEq, BinOp::Eq), (TokenKind::BangEq, BinOp::Ne)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> PResult<Expr> {
        self.binary_tier(
            &[
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::LtEq, BinOp::Le),
                (TokenKind::Gt, BinOp::Gt),
                (TokenKind::GtEq, BinOp::Ge),
            ],
            Self::shift,
        )
    }

    fn shift(&mut self) -> PResult<Expr> {
        self.binary_tier(
            &[(TokenKind::LtLt, BinOp::Shl), (TokenKind::GtGt, BinOp::Shr)],
            Self::term,
        )
    }

    fn term(&mut self) -> PResult<Expr> {
        self.binary_tier(
            &[(TokenKind::Plus, BinOp::Add), (TokenKind::Minus, BinOp::Sub)],
            Self::factor,
        )
    }

    fn factor(&mut self) -> PResult<Expr> {
        self.binary_tier(
            &[
                (TokenKind::Star, BinOp::Mul),
                (TokenKind::Slash, BinOp::Div),
                (TokenKind::Percent, BinOp::Mod),
            ],
            Self::unary,
        )
    }

    /// One left-associative tier: `next (op next)*`.
    fn binary_tier(
        &mut self,
        ops: &[(TokenKind, BinOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut expr = next(self)?;
        'outer: loop {
            let pos = self.here();
            for (token, op) in ops {
                if self.eat(token) {
                    let rhs = next(self)?;
                    expr = Expr::Binary {
                        op: *op,
                        lhs: Box::new(expr),
                        rhs: Box::new(rhs),
                        pos,
                    };
                    continue 'outer;
                }
            }
            return Ok(expr);
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        let pos = self.here();
        let op = match &self.peek().kind {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Plus => Some(UnOp::Pos),
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Tilde => Some(UnOp::Invert),
            TokenKind::PlusPlus => {
                self.advance();
                let operand = self.unary()?;
                return self.desugar_incdec(operand, BinOp::Add, pos);
            }
            TokenKind::MinusMinus => {
                self.advance();
                let operand = self.unary()?;
                return self.desugar_incdec(operand, BinOp::Sub, pos);
            }
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                pos,
            })
        } else {
            self.postfix()
        }
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let pos = self.here();
            match &self.peek().kind {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "')' after arguments")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        pos,
                    };
                }
                TokenKind::PlusPlus => {
                    self.advance();
                    expr = self.desugar_incdec(expr, BinOp::Add, pos)?;
                }
                TokenKind::MinusMinus => {
                    self.advance();
                    expr = self.desugar_incdec(expr, BinOp::Sub, pos)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    /// `x++` / `--x` desugar to `x = x ± 1`.
    fn desugar_incdec(&mut self, operand: Expr, op: BinOp, pos: Pos) -> PResult<Expr> {
        let Expr::Variable(name, var_pos) = operand else {
            return Err(self.error_here("'++'/'--' require a variable".to_string()));
        };
        Ok(Expr::Assign {
            name: name.clone(),
            value: Box::new(Expr::Binary {
                op,
                lhs: Box::new(Expr::Variable(name, var_pos)),
                rhs: Box::new(Expr::Long(1, pos)),
                pos,
            }),
            pos: var_pos,
        })
    }

    fn primary(&mut self) -> PResult<Expr> {
        let pos = self.here();
        match &self.peek().kind {
            TokenKind::Long(n) => {
                let n = *n;
                self.advance();
                Ok(Expr::Long(n, pos))
            }
            TokenKind::Float(f) => {
                let f = *f;
                self.advance();
                Ok(Expr::Float(f, pos))
            }
            TokenKind::Str(_) => {
                if let TokenKind::Str(s) = self.advance().kind {
                    Ok(Expr::Str(s, pos))
                } else {
                    Err(ParseInterrupt)
                }
            }
            TokenKind::KwNone => {
                self.advance();
                Ok(Expr::None(pos))
            }
            TokenKind::Ident(_) => {
                if let TokenKind::Ident(name) = self.advance().kind {
                    Ok(Expr::Variable(name, pos))
                } else {
                    Err(ParseInterrupt)
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            other => {
                let found = other.describe();
                Err(self.error_here(format!("unexpected {found}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_ok(source: &str) -> Vec<Stmt> {
        let mut diags = Diagnostics::new("test.me");
        let tokens = lex(source, &mut diags);
        let stmts = parse(tokens, &mut diags);
        assert!(!diags.has_errors(), "unexpected diagnostics: {diags}");
        stmts
    }

    fn parse_err(source: &str) -> Diagnostics {
        let mut diags = Diagnostics::new("test.me");
        let tokens = lex(source, &mut diags);
        parse(tokens, &mut diags);
        assert!(diags.has_errors(), "expected diagnostics for {source:?}");
        diags
    }

    #[test]
    fn test_declaration() {
        let stmts = parse_ok("değişken a = 1");
        let Stmt::Decl {
            name,
            constant,
            init,
            ..
        } = &stmts[0]
        else {
            panic!("expected declaration, got {stmts:?}");
        };
        assert_eq!(name, "a");
        assert!(!constant);
        assert!(matches!(init, Some(Expr::Long(1, _))));
    }

    #[test]
    fn test_const_requires_initializer() {
        parse_err("sabit a");
    }

    #[test]
    fn test_precedence_mul_binds_tighter() {
        let stmts = parse_ok("1 + 2 * 3");
        let Stmt::Expr(Expr::Binary { op, rhs, .. }) = &stmts[0] else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_comparison_binds_tighter_than_and() {
        let stmts = parse_ok("a < 1 ve b > 2");
        assert!(matches!(&stmts[0], Stmt::Expr(Expr::And { .. })));
    }

    #[test]
    fn test_compound_assignment_desugars() {
        let stmts = parse_ok("değişken a = 1; a += 2");
        let Stmt::Expr(Expr::Assign { name, value, .. }) = &stmts[1] else {
            panic!("expected assignment");
        };
        assert_eq!(name, "a");
        assert!(matches!(**value, Expr::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn test_incdec_desugars() {
        for source in ["a++", "++a", "a--", "--a"] {
            let stmts = parse_ok(source);
            assert!(
                matches!(&stmts[0], Stmt::Expr(Expr::Assign { .. })),
                "{source} should desugar to an assignment"
            );
        }
    }

    #[test]
    fn test_incdec_requires_variable() {
        parse_err("3++");
    }

    #[test]
    fn test_invalid_assignment_target() {
        parse_err("1 = 2");
    }

    #[test]
    fn test_if_else() {
        let stmts = parse_ok("şayet (1) { a = 1 }\ndeğilse { a = 2 }\ndeğişken a = 0");
        assert!(matches!(
            &stmts[0],
            Stmt::If {
                otherwise: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn test_function_with_params() {
        let stmts = parse_ok("marifet topla(a, b) {\n tebliğ a + b\n}");
        let Stmt::Function { name, params, body, .. } = &stmts[0] else {
            panic!("expected function");
        };
        assert_eq!(name, "topla");
        assert_eq!(params, &["a", "b"]);
        assert_eq!(body.len(), 1);
        assert!(matches!(&body[0], Stmt::Return { value: Some(_), .. }));
    }

    #[test]
    fn test_call_arguments() {
        let stmts = parse_ok("f(1, 2 + 3, \"x\")");
        let Stmt::Expr(Expr::Call { args, .. }) = &stmts[0] else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_recovery_reports_later_errors() {
        // Two broken statements produce two diagnostics, not one.
        let diags = parse_err("değişken = 1\ndeğişken = 2");
        assert_eq!(diags.error_count(), 2);
    }

    #[test]
    fn test_while_with_break_continue() {
        let stmts = parse_ok("madem (1) {\n yeter\n devam\n}");
        let Stmt::While { body, .. } = &stmts[0] else {
            panic!("expected while");
        };
        let Stmt::Block(inner) = &**body else {
            panic!("expected block body");
        };
        assert!(matches!(inner[0], Stmt::Break(_)));
        assert!(matches!(inner[1], Stmt::Continue(_)));
    }
}
