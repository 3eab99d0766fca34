// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Recursive-descent expression parser with precedence climbing.
//!
//! Precedence ladder, low to high: ternary (right-associative), `||`, `&&`,
//! equality, comparison, additive, multiplicative, unary, call, primary.
//! Operator calls take space-separated arguments (commas are accepted and
//! ignored); a nested operator call in argument position must be
//! parenthesized, which is the grammar's only disambiguation rule.
//!
//! Arity is checked post-parse against the registry metadata, so malformed
//! calls fail before any evaluation starts.

use crate::errors::EvalError;
use crate::expr::ast::Expr;
use crate::expr::token::{tokenize, OperatorCatalog, Token, TokenKind};

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
    catalog: &'a dyn OperatorCatalog,
    /// Strict mode upgrades "reference followed by arguments" from a plain
    /// syntax error to an unknown-operator error.
    strict: bool,
}

pub fn parse(input: &str, catalog: &dyn OperatorCatalog, strict: bool) -> Result<Expr, EvalError> {
    let mut parser = Parser {
        tokens: tokenize(input, catalog),
        pos: 0,
        source: input,
        catalog,
        strict,
    };
    let expr = parser.expression()?;
    parser.expect_eof()?;
    parser.check_arity(&expr)?;
    Ok(expr)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn here(&self) -> (usize, usize) {
        let token = &self.tokens[self.pos];
        (token.line, token.column)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        let (line, column) = self.here();
        EvalError::Syntax {
            message: message.into(),
            line,
            column,
            source_text: self.source.to_string(),
        }
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr, EvalError> {
        let condition = self.logical_or()?;
        if *self.peek() != TokenKind::Question {
            return Ok(condition);
        }
        self.advance();
        let then_branch = self.ternary()?;
        if *self.peek() != TokenKind::Colon {
            return Err(self.error("expected ':' in ternary expression"));
        }
        self.advance();
        let else_branch = self.ternary()?;
        Ok(Expr::call("?:", vec![condition, then_branch, else_branch]))
    }

    fn logical_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.logical_and()?;
        while *self.peek() == TokenKind::Or {
            self.advance();
            let right = self.logical_and()?;
            left = Expr::Or {
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.equality()?;
        while *self.peek() == TokenKind::And {
            self.advance();
            let right = self.equality()?;
            left = Expr::call("&&", vec![left, right]);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.comparison()?;
        loop {
            let name = match self.peek() {
                TokenKind::Eq => "==",
                TokenKind::Ne => "!=",
                _ => return Ok(left),
            };
            self.advance();
            let right = self.comparison()?;
            left = Expr::call(name, vec![left, right]);
        }
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.additive()?;
        loop {
            let name = match self.peek() {
                TokenKind::Lt => "<",
                TokenKind::Gt => ">",
                TokenKind::Le => "<=",
                TokenKind::Ge => ">=",
                _ => return Ok(left),
            };
            self.advance();
            let right = self.additive()?;
            left = Expr::call(name, vec![left, right]);
        }
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.multiplicative()?;
        loop {
            let name = match self.peek() {
                TokenKind::Plus => "+",
                TokenKind::Minus => "-",
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::call(name, vec![left, right]);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        loop {
            let name = match self.peek() {
                TokenKind::Star => "*",
                TokenKind::Slash => "/",
                TokenKind::Percent => "%",
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::call(name, vec![left, right]);
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            TokenKind::Bang => {
                self.advance();
                Ok(Expr::call("!", vec![self.unary()?]))
            }
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::call("neg", vec![self.unary()?]))
            }
            _ => self.call_or_primary(),
        }
    }

    fn call_or_primary(&mut self) -> Result<Expr, EvalError> {
        if let TokenKind::OpName { .. } = self.peek() {
            return self.operator_call();
        }
        let primary = self.primary()?;
        // a reference directly followed by an argument means the author
        // spelled an operator name the registry does not know
        if matches!(primary, Expr::Reference(_)) && self.starts_argument() {
            let name = match &primary {
                Expr::Reference(path) => path.to_string(),
                _ => unreachable!(),
            };
            return Err(if self.strict {
                EvalError::UnknownOperator { name }
            } else {
                self.error(format!("'{}' is not a registered operator", name))
            });
        }
        Ok(primary)
    }

    fn operator_call(&mut self) -> Result<Expr, EvalError> {
        let (name, modifiers) = match self.advance() {
            TokenKind::OpName { name, modifiers } => (name, modifiers),
            _ => unreachable!("operator_call is only entered on OpName"),
        };
        let mut args = Vec::new();
        loop {
            if *self.peek() == TokenKind::Comma {
                self.advance();
                continue;
            }
            if !self.starts_argument() {
                break;
            }
            args.push(self.argument()?);
        }
        Ok(Expr::Call {
            name,
            args,
            modifiers,
        })
    }

    /// Whether the next token can begin an operator argument.
    fn starts_argument(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Literal(_)
                | TokenKind::Reference(_)
                | TokenKind::EnvVar(_)
                | TokenKind::LParen
                | TokenKind::Bang
                | TokenKind::OpName { .. }
        )
    }

    /// One operator argument: a primary, a unary, a parenthesized
    /// expression, or a bare nested call. A bare nested call consumes the
    /// rest of the argument list (`defer grab b`); use the
    /// `(opname arg ...)` form when that is not what you mean.
    fn argument(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            TokenKind::Bang => {
                self.advance();
                Ok(Expr::call("!", vec![self.argument()?]))
            }
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::call("neg", vec![self.argument()?]))
            }
            TokenKind::OpName { .. } => self.operator_call(),
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.peek().clone() {
            TokenKind::Literal(value) => {
                self.advance();
                Ok(Expr::Literal(value))
            }
            TokenKind::Reference(path) => {
                self.advance();
                Ok(Expr::Reference(path))
            }
            TokenKind::EnvVar(name) => {
                self.advance();
                Ok(Expr::EnvVar(name))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                if *self.peek() != TokenKind::RParen {
                    return Err(self.error("unclosed parenthesis"));
                }
                self.advance();
                Ok(inner)
            }
            // zero-argument operator in value position, e.g. `(( empty map ))`
            TokenKind::OpName { .. } => self.operator_call(),
            TokenKind::Eof => Err(self.error("missing operand")),
            TokenKind::Unknown(c) => Err(self.error(format!("unexpected character '{}'", c))),
            other => Err(self.error(format!("unexpected token {:?}", other))),
        }
    }

    fn expect_eof(&mut self) -> Result<(), EvalError> {
        if *self.peek() == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.error(format!("unexpected trailing token {:?}", self.peek())))
        }
    }

    /// Post-parse arity validation against registry metadata.
    fn check_arity(&self, expr: &Expr) -> Result<(), EvalError> {
        match expr {
            Expr::Literal(_) | Expr::Reference(_) | Expr::EnvVar(_) => Ok(()),
            Expr::Or { left, right } => {
                self.check_arity(left)?;
                self.check_arity(right)
            }
            Expr::Call { name, args, .. } => {
                if let Some((min, max)) = self.catalog.arity(name) {
                    let got = args.len() as i32;
                    let below = min >= 0 && got < min;
                    let above = max >= 0 && got > max;
                    if below || above {
                        let expected = match (min, max) {
                            (min, -1) => format!("at least {}", min),
                            (min, max) if min == max => format!("{}", min),
                            (min, max) => format!("{} to {}", min, max),
                        };
                        return Err(EvalError::Arity {
                            name: name.clone(),
                            expected,
                            got: args.len(),
                        });
                    }
                }
                for arg in args {
                    self.check_arity(arg)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Path, Value};

    struct FakeCatalog;

    impl OperatorCatalog for FakeCatalog {
        fn is_operator(&self, name: &str) -> bool {
            matches!(
                name,
                "grab" | "concat" | "vault" | "vault-try" | "null" | "join"
            ) || matches!(
                name,
                "+" | "-" | "*" | "/" | "%" | "==" | "!=" | "<" | ">" | "<=" | ">=" | "&&"
                    | "?:" | "!" | "neg"
            )
        }

        fn arity(&self, name: &str) -> Option<(i32, i32)> {
            match name {
                "grab" => Some((1, 1)),
                "concat" => Some((1, -1)),
                "vault" => Some((1, -1)),
                "vault-try" => Some((2, -1)),
                "join" => Some((2, -1)),
                "null" => Some((0, 1)),
                "?:" => Some((3, 3)),
                "!" | "neg" => Some((1, 1)),
                _ => Some((2, 2)),
            }
        }
    }

    fn parse_ok(input: &str) -> Expr {
        parse(input, &FakeCatalog, false).unwrap()
    }

    #[test]
    fn test_simple_grab() {
        let expr = parse_ok("grab a.b");
        assert_eq!(
            expr,
            Expr::call("grab", vec![Expr::Reference(Path::parse("a.b"))])
        );
    }

    #[test]
    fn test_defaulting_chain() {
        let expr = parse_ok("grab missing || \"default\"");
        match expr {
            Expr::Or { left, right } => {
                assert_eq!(left.root_operator(), "grab");
                assert_eq!(*right, Expr::Literal(Value::String("default".into())));
            }
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_arithmetic_over_comparison() {
        let expr = parse_ok("a + 2 < b * 3");
        assert_eq!(
            expr,
            Expr::call(
                "<",
                vec![
                    Expr::call(
                        "+",
                        vec![Expr::Reference(Path::parse("a")), Expr::Literal(Value::Int(2))]
                    ),
                    Expr::call(
                        "*",
                        vec![Expr::Reference(Path::parse("b")), Expr::Literal(Value::Int(3))]
                    ),
                ]
            )
        );
    }

    #[test]
    fn test_ternary_right_associative() {
        let expr = parse_ok("a ? 1 : b ? 2 : 3");
        match expr {
            Expr::Call { name, args, .. } => {
                assert_eq!(name, "?:");
                assert_eq!(args[2].root_operator(), "?:");
            }
            other => panic!("expected ternary, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_call_requires_parens() {
        let expr = parse_ok("concat \"count-\" (n + 2)");
        match expr {
            Expr::Call { name, args, .. } => {
                assert_eq!(name, "concat");
                assert_eq!(args.len(), 2);
                assert_eq!(args[1].root_operator(), "+");
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_operator_call_as_argument() {
        let expr = parse_ok("concat (grab prefix) \"-suffix\"");
        match expr {
            Expr::Call { args, .. } => assert_eq!(args[0].root_operator(), "grab"),
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_nested_call_consumes_rest() {
        let expr = parse_ok("grab (grab a)");
        assert_eq!(expr.root_operator(), "grab");

        // a bare nested call takes the remaining arguments
        let expr = parse_ok("concat (grab a)");
        match expr {
            Expr::Call { name, args, .. } => {
                assert_eq!(name, "concat");
                assert_eq!(args.len(), 1);
                assert_eq!(args[0].root_operator(), "grab");
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_commas_between_args_ignored() {
        let with = parse_ok("vault-try \"a\", \"b\", \"c\"");
        let without = parse_ok("vault-try \"a\" \"b\" \"c\"");
        assert_eq!(with, without);
    }

    #[test]
    fn test_arity_checked_after_parse() {
        let err = parse("grab a b", &FakeCatalog, false).unwrap_err();
        assert!(matches!(err, EvalError::Arity { .. }));
    }

    #[test]
    fn test_unclosed_paren_is_syntax_error() {
        let err = parse("concat (a", &FakeCatalog, false).unwrap_err();
        assert!(matches!(err, EvalError::Syntax { .. }));
    }

    #[test]
    fn test_unknown_operator_in_strict_mode() {
        let err = parse("grabb a", &FakeCatalog, true).unwrap_err();
        assert!(matches!(err, EvalError::UnknownOperator { .. }));

        let err = parse("grabb a", &FakeCatalog, false).unwrap_err();
        assert!(matches!(err, EvalError::Syntax { .. }));
    }

    #[test]
    fn test_unary_forms() {
        assert_eq!(
            parse_ok("!a"),
            Expr::call("!", vec![Expr::Reference(Path::parse("a"))])
        );
        assert_eq!(
            parse_ok("-x"),
            Expr::call("neg", vec![Expr::Reference(Path::parse("x"))])
        );
        // a '-' directly on a digit is a signed literal, not a unary call
        assert_eq!(parse_ok("-5"), Expr::Literal(Value::Int(-5)));
    }

    #[test]
    fn test_logical_and_chains() {
        let expr = parse_ok("a && b && c");
        assert_eq!(expr.root_operator(), "&&");
    }

    #[test]
    fn test_modifiers_survive_parse() {
        let expr = parse_ok("vault:nocache \"secret/a:b\"");
        match expr {
            Expr::Call { modifiers, .. } => assert_eq!(modifiers, vec!["nocache".to_string()]),
            other => panic!("expected call, got {:?}", other),
        }
    }
}
