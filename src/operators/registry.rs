// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Process-wide operator registry.
//!
//! Established at startup, optionally extended before any evaluation
//! begins, read-only afterwards. The registry also backs tokenizer word
//! classification and post-parse arity checks through [`OperatorCatalog`],
//! and its signature participates in the parse-cache key so re-registration
//! invalidates stale parses.

use std::collections::HashMap;
use std::sync::Arc;

use crate::document::ArithmeticOp;
use crate::errors::EvalError;
use crate::expr::OperatorCatalog;
use crate::operators::{
    base64::{Base64DecodeOp, Base64Op},
    calc::{AndOp, ArithOp, CompareKind, CompareOp, EqualOp, NegOp, NotOp, TernaryOp},
    concat::ConcatOp,
    defer::DeferOp,
    empty::EmptyOp,
    file::FileOp,
    grab::GrabOp,
    ips::{IpsOp, StaticIpsOp},
    join::JoinOp,
    keys::KeysOp,
    param::ParamOp,
    scalars::{NegateOp, NullOp, StringifyOp},
    vault::{VaultOp, VaultTryOp},
    Operator, Phase,
};

pub struct OperatorRegistry {
    ops: HashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        OperatorRegistry {
            ops: HashMap::new(),
        }
    }

    /// The full built-in set: named operators plus the infix and ternary
    /// pseudo-operators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Arc<dyn Operator>> = vec![
            Arc::new(GrabOp),
            Arc::new(ConcatOp),
            Arc::new(JoinOp),
            Arc::new(KeysOp),
            Arc::new(FileOp),
            Arc::new(Base64Op),
            Arc::new(Base64DecodeOp),
            Arc::new(EmptyOp),
            Arc::new(NullOp),
            Arc::new(NegateOp),
            Arc::new(StringifyOp),
            Arc::new(ParamOp),
            Arc::new(DeferOp),
            Arc::new(VaultOp),
            Arc::new(VaultTryOp),
            Arc::new(StaticIpsOp),
            Arc::new(IpsOp),
            Arc::new(ArithOp::new("+", ArithmeticOp::Add, 6)),
            Arc::new(ArithOp::new("-", ArithmeticOp::Sub, 6)),
            Arc::new(ArithOp::new("*", ArithmeticOp::Mul, 7)),
            Arc::new(ArithOp::new("/", ArithmeticOp::Div, 7)),
            Arc::new(ArithOp::new("%", ArithmeticOp::Rem, 7)),
            Arc::new(EqualOp::new("==", false)),
            Arc::new(EqualOp::new("!=", true)),
            Arc::new(CompareOp::new("<", CompareKind::Less)),
            Arc::new(CompareOp::new(">", CompareKind::Greater)),
            Arc::new(CompareOp::new("<=", CompareKind::LessEqual)),
            Arc::new(CompareOp::new(">=", CompareKind::GreaterEqual)),
            Arc::new(AndOp),
            Arc::new(NotOp),
            Arc::new(NegOp),
            Arc::new(TernaryOp),
        ];
        for op in builtins {
            registry
                .register(op)
                .expect("built-in operator registration cannot fail");
        }
        registry
    }

    /// Register an operator by its declared name. Runs the operator's
    /// `setup` hook; a setup failure rejects the registration.
    pub fn register(&mut self, op: Arc<dyn Operator>) -> Result<(), EvalError> {
        op.setup()?;
        self.ops.insert(op.meta().name.to_string(), op);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.ops.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    /// Phase classification for a node's root operator. The synthetic node
    /// kinds (`reference`, `literal`, `||`) evaluate in the Eval phase.
    pub fn phase_of(&self, name: &str) -> Phase {
        self.ops
            .get(name)
            .map(|op| op.meta().phase)
            .unwrap_or(Phase::Eval)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Stable signature over the registered name set; part of the parse
    /// cache key.
    pub fn signature(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for name in self.names() {
            for byte in name.as_bytes() {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
            hash ^= 0xff;
        }
        hash
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl OperatorCatalog for OperatorRegistry {
    fn is_operator(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn arity(&self, name: &str) -> Option<(i32, i32)> {
        self.ops
            .get(name)
            .map(|op| (op.meta().min_args, op.meta().max_args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_present() {
        let registry = OperatorRegistry::with_builtins();
        for name in [
            "grab", "concat", "join", "keys", "file", "base64", "base64-decode", "empty",
            "null", "negate", "stringify", "param", "defer", "vault", "vault-try",
            "static_ips", "ips", "+", "==", "?:", "&&",
        ] {
            assert!(registry.contains(name), "missing builtin '{}'", name);
        }
    }

    #[test]
    fn test_phase_classification() {
        let registry = OperatorRegistry::with_builtins();
        assert_eq!(registry.phase_of("defer"), Phase::Merge);
        assert_eq!(registry.phase_of("param"), Phase::Param);
        assert_eq!(registry.phase_of("grab"), Phase::Eval);
        // synthetic node kinds default to Eval
        assert_eq!(registry.phase_of("reference"), Phase::Eval);
    }

    #[test]
    fn test_signature_changes_with_registration() {
        let base = OperatorRegistry::with_builtins();
        let mut extended = OperatorRegistry::with_builtins();
        extended
            .register(Arc::new(GrabOp))
            .expect("re-registering is allowed");
        // same name set, same signature
        assert_eq!(base.signature(), extended.signature());

        let empty = OperatorRegistry::new();
        assert_ne!(base.signature(), empty.signature());
    }

    #[test]
    fn test_arity_metadata() {
        let registry = OperatorRegistry::with_builtins();
        assert_eq!(registry.arity("grab"), Some((1, 1)));
        assert_eq!(registry.arity("concat"), Some((1, -1)));
        assert_eq!(registry.arity("?:"), Some((3, 3)));
        assert_eq!(registry.arity("unknown-op"), None);
    }
}
