// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Operator contracts and the built-in operator set.
//!
//! An operator is a named behavior with declared phase, arity, and
//! concurrency metadata, registered once at startup. The evaluator invokes
//! `run` with the node's call context and unresolved argument ASTs; the
//! operator decides how much of its arguments to resolve (short-circuiting
//! forms resolve selectively) and answers with a [`Response`].

pub mod base64;
pub mod calc;
pub mod concat;
pub mod defer;
pub mod empty;
pub mod file;
pub mod grab;
pub mod ips;
pub mod join;
pub mod keys;
pub mod param;
pub mod registry;
pub mod scalars;
pub mod vault;

pub use registry::OperatorRegistry;

use async_trait::async_trait;

use crate::document::{Path, Value};
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::fabric::BatchRequest;

/// Execution bands, strictly ordered. Each phase runs to its own fixed
/// point before the next begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Operators that rewrite document structure; runs right after merge.
    Merge,
    /// Parameter declarations; unresolved parameters are fatal after this
    /// phase completes.
    Param,
    /// Everything else: references, string/number ops, external lookups.
    Eval,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Merge, Phase::Param, Phase::Eval];

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Merge => "merge",
            Phase::Param => "param",
            Phase::Eval => "eval",
        }
    }
}

/// What an operator asks the evaluator to do with its node.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Substitute `value` at the node's path.
    Replace(Value),
    /// Merge a mapping into the node's parent, removing the node itself.
    Inject(Value),
    /// Remove the node's path from the document.
    Drop,
    /// Leave the expression intact for a later pass.
    Defer,
}

/// Static operator metadata held by the registry.
#[derive(Debug, Clone)]
pub struct OpMeta {
    pub name: &'static str,
    pub phase: Phase,
    /// Minimum argument count; 0 for optional-everything.
    pub min_args: i32,
    /// Maximum argument count; -1 means unbounded.
    pub max_args: i32,
    /// Binding strength for infix forms; `None` for named operators.
    pub precedence: Option<u8>,
    pub right_assoc: bool,
    /// May run alongside other thread-safe operators in a parallel wave.
    pub thread_safe: bool,
    /// Restructures the document rather than only consuming it.
    pub writer: bool,
    /// Eligible for wave-level multi-item dispatch.
    pub batchable: bool,
    /// Performs external I/O; drives the cost model.
    pub external: bool,
}

impl OpMeta {
    /// An ordinary Eval-phase reader.
    pub const fn eval(name: &'static str, min_args: i32, max_args: i32) -> OpMeta {
        OpMeta {
            name,
            phase: Phase::Eval,
            min_args,
            max_args,
            precedence: None,
            right_assoc: false,
            thread_safe: true,
            writer: false,
            batchable: false,
            external: false,
        }
    }

    /// An infix pseudo-operator at the given precedence level.
    pub const fn infix(name: &'static str, precedence: u8) -> OpMeta {
        OpMeta {
            name,
            phase: Phase::Eval,
            min_args: 2,
            max_args: 2,
            precedence: Some(precedence),
            right_assoc: false,
            thread_safe: true,
            writer: false,
            batchable: false,
            external: false,
        }
    }
}

/// Per-invocation context: the node's own path and the modifiers attached
/// to the outermost call.
#[derive(Debug, Clone)]
pub struct CallCtx {
    pub here: Path,
    pub modifiers: Vec<String>,
}

impl CallCtx {
    pub fn new(here: Path) -> Self {
        CallCtx {
            here,
            modifiers: Vec::new(),
        }
    }

    pub fn with_modifiers(here: Path, modifiers: Vec<String>) -> Self {
        CallCtx { here, modifiers }
    }

    /// The `nocache` modifier bypasses the parse cache and the I/O caches.
    pub fn nocache(&self) -> bool {
        self.modifiers.iter().any(|m| m == "nocache")
    }
}

/// The pluggable operator ABI.
#[async_trait]
pub trait Operator: Send + Sync {
    fn meta(&self) -> &OpMeta;

    /// One-time hook at registration.
    fn setup(&self) -> Result<(), EvalError> {
        Ok(())
    }

    /// Dependencies beyond the references the analyzer extracts from the
    /// argument AST. `doc` is the current merged document snapshot.
    fn dependencies(&self, _here: &Path, _args: &[Expr], _doc: &Value) -> Vec<Path> {
        Vec::new()
    }

    /// The lookup this node would issue, for wave-level batching. Only
    /// consulted when the metadata says `batchable` and the call does not
    /// carry `nocache`.
    async fn batch_request(
        &self,
        _ev: &Evaluator,
        _ctx: &CallCtx,
        _args: &[Expr],
    ) -> Option<BatchRequest> {
        None
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError>;
}

/// Shorthand for operator-specific misuse errors.
pub(crate) fn op_error(name: &str, message: impl Into<String>) -> EvalError {
    EvalError::Operator {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Shorthand for type errors positioned at the evaluating node.
pub(crate) fn type_error(ctx: &CallCtx, message: impl Into<String>) -> EvalError {
    EvalError::Type {
        at: ctx.here.to_string(),
        message: message.into(),
    }
}
