// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Typed expression AST.
//!
//! Binary operators and the ternary are represented as [`Expr::Call`] nodes
//! with the corresponding pseudo-operator name (`+`, `==`, `?:`, ...), so the
//! evaluator has a single invocation path. `||` is the one structural
//! exception: it is the defaulting mechanism and short-circuits on *errors*,
//! not on falsiness, so it keeps its own node.

use crate::document::{Path, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// A document-relative path.
    Reference(Path),
    /// `$NAME`, resolved from the process environment at evaluation time.
    EnvVar(String),
    /// An operator call, including infix/ternary pseudo-operators.
    Call {
        name: String,
        args: Vec<Expr>,
        modifiers: Vec<String>,
    },
    /// `left || right`: evaluate left, fall back to right on a recoverable
    /// error.
    Or { left: Box<Expr>, right: Box<Expr> },
}

impl Expr {
    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.to_string(),
            args,
            modifiers: Vec::new(),
        }
    }

    /// Collect every referenced document path in evaluation order.
    pub fn references(&self, out: &mut Vec<Path>) {
        match self {
            Expr::Literal(_) | Expr::EnvVar(_) => {}
            Expr::Reference(path) => out.push(path.clone()),
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.references(out);
                }
            }
            Expr::Or { left, right } => {
                left.references(out);
                right.references(out);
            }
        }
    }

    /// True when any operator call anywhere in the tree carries `modifier`.
    pub fn has_modifier(&self, modifier: &str) -> bool {
        match self {
            Expr::Literal(_) | Expr::Reference(_) | Expr::EnvVar(_) => false,
            Expr::Call { modifiers, args, .. } => {
                modifiers.iter().any(|m| m == modifier)
                    || args.iter().any(|a| a.has_modifier(modifier))
            }
            Expr::Or { left, right } => {
                left.has_modifier(modifier) || right.has_modifier(modifier)
            }
        }
    }

    /// True when any node in the tree is a fallback (`||`).
    pub fn has_fallback(&self) -> bool {
        match self {
            Expr::Or { .. } => true,
            Expr::Call { args, .. } => args.iter().any(|a| a.has_fallback()),
            _ => false,
        }
    }

    /// The operator name that drives phase classification for a whole
    /// expression: the outermost call's name, `reference` for a bare path,
    /// `||` for a fallback, and `literal` otherwise.
    pub fn root_operator(&self) -> &str {
        match self {
            Expr::Call { name, .. } => name,
            Expr::Reference(_) => "reference",
            Expr::Or { .. } => "||",
            Expr::Literal(_) | Expr::EnvVar(_) => "literal",
        }
    }

    fn fmt_atom(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Call { .. } | Expr::Or { .. } => write!(f, "({})", self),
            _ => write!(f, "{}", self),
        }
    }
}

/// Renders the expression in re-parseable source form; used by `defer` to
/// emit a literal expression for a later tool pass.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            Expr::Literal(Value::Null) => write!(f, "null"),
            Expr::Literal(value) => write!(f, "{}", value.to_display_string()),
            Expr::Reference(path) => write!(f, "{}", path),
            Expr::EnvVar(name) => write!(f, "${}", name),
            Expr::Call {
                name,
                args,
                modifiers,
            } => {
                write!(f, "{}", name)?;
                for modifier in modifiers {
                    write!(f, ":{}", modifier)?;
                }
                for arg in args {
                    write!(f, " ")?;
                    arg.fmt_atom(f)?;
                }
                Ok(())
            }
            Expr::Or { left, right } => {
                left.fmt_atom(f)?;
                write!(f, " || ")?;
                right.fmt_atom(f)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_collects_nested() {
        let expr = Expr::call(
            "concat",
            vec![
                Expr::Literal(Value::String("x-".into())),
                Expr::call(
                    "+",
                    vec![
                        Expr::Reference(Path::parse("n")),
                        Expr::Reference(Path::parse("meta.offset")),
                    ],
                ),
            ],
        );
        let mut refs = Vec::new();
        expr.references(&mut refs);
        assert_eq!(refs, vec![Path::parse("n"), Path::parse("meta.offset")]);
    }

    #[test]
    fn test_has_modifier_descends() {
        let expr = Expr::Or {
            left: Box::new(Expr::Call {
                name: "vault".into(),
                args: vec![Expr::Literal(Value::String("secret/x".into()))],
                modifiers: vec!["nocache".into()],
            }),
            right: Box::new(Expr::Literal(Value::Null)),
        };
        assert!(expr.has_modifier("nocache"));
        assert!(!expr.has_modifier("debug"));
    }

    #[test]
    fn test_display_round_trippable_shape() {
        let expr = Expr::call(
            "concat",
            vec![
                Expr::Literal(Value::String("count-".into())),
                Expr::call(
                    "+",
                    vec![Expr::Reference(Path::parse("n")), Expr::Literal(Value::Int(2))],
                ),
            ],
        );
        assert_eq!(expr.to_string(), "concat \"count-\" (+ n 2)");
    }

    #[test]
    fn test_root_operator() {
        assert_eq!(Expr::Reference(Path::parse("a")).root_operator(), "reference");
        assert_eq!(Expr::call("grab", vec![]).root_operator(), "grab");
        let or = Expr::Or {
            left: Box::new(Expr::Reference(Path::parse("a"))),
            right: Box::new(Expr::Literal(Value::Null)),
        };
        assert_eq!(or.root_operator(), "||");
    }
}
