// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Infix and ternary pseudo-operators.
//!
//! The parser lowers `a + b`, `a == b`, `cond ? x : y` and friends into
//! calls on these operators, so arithmetic shares the invocation path (and
//! metrics, and dependency analysis) with every named operator. `&&` and
//! the ternary resolve their arguments selectively; that is where the
//! short-circuit guarantees live.

use async_trait::async_trait;

use crate::document::{ArithmeticOp, Value};
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{type_error, CallCtx, OpMeta, Operator, Response};

/// `+ - * / %` with integer/float widening.
pub struct ArithOp {
    meta: OpMeta,
    op: ArithmeticOp,
}

impl ArithOp {
    pub fn new(name: &'static str, op: ArithmeticOp, precedence: u8) -> Self {
        ArithOp {
            meta: OpMeta::infix(name, precedence),
            op,
        }
    }
}

#[async_trait]
impl Operator for ArithOp {
    fn meta(&self) -> &OpMeta {
        &self.meta
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let left = ev.resolve(ctx, &args[0]).await?;
        let right = ev.resolve(ctx, &args[1]).await?;
        Value::arithmetic(self.op, &left, &right)
            .map(Response::Replace)
            .map_err(|message| type_error(ctx, message))
    }
}

/// `==` and `!=` on structural value equality.
pub struct EqualOp {
    meta: OpMeta,
    negated: bool,
}

impl EqualOp {
    pub fn new(name: &'static str, negated: bool) -> Self {
        EqualOp {
            meta: OpMeta::infix(name, 4),
            negated,
        }
    }
}

#[async_trait]
impl Operator for EqualOp {
    fn meta(&self) -> &OpMeta {
        &self.meta
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let left = ev.resolve(ctx, &args[0]).await?;
        let right = ev.resolve(ctx, &args[1]).await?;
        let equal = left == right;
        Ok(Response::Replace(Value::Bool(equal != self.negated)))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CompareKind {
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

impl CompareKind {
    fn admits(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareKind::Less => ordering == Less,
            CompareKind::Greater => ordering == Greater,
            CompareKind::LessEqual => ordering != Greater,
            CompareKind::GreaterEqual => ordering != Less,
        }
    }
}

/// `< > <= >=` on numbers and strings.
pub struct CompareOp {
    meta: OpMeta,
    kind: CompareKind,
}

impl CompareOp {
    pub fn new(name: &'static str, kind: CompareKind) -> Self {
        CompareOp {
            meta: OpMeta::infix(name, 5),
            kind,
        }
    }
}

#[async_trait]
impl Operator for CompareOp {
    fn meta(&self) -> &OpMeta {
        &self.meta
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let left = ev.resolve(ctx, &args[0]).await?;
        let right = ev.resolve(ctx, &args[1]).await?;
        let ordering =
            Value::compare(&left, &right).map_err(|message| type_error(ctx, message))?;
        Ok(Response::Replace(Value::Bool(self.kind.admits(ordering))))
    }
}

/// `a && b` — false without touching `b` when `a` is falsy.
pub struct AndOp;

const AND_META: OpMeta = OpMeta::infix("&&", 3);

#[async_trait]
impl Operator for AndOp {
    fn meta(&self) -> &OpMeta {
        &AND_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let left = ev.resolve(ctx, &args[0]).await?;
        if !left.is_truthy() {
            return Ok(Response::Replace(Value::Bool(false)));
        }
        let right = ev.resolve(ctx, &args[1]).await?;
        Ok(Response::Replace(Value::Bool(right.is_truthy())))
    }
}

/// `!x` — truthiness negation.
pub struct NotOp;

const NOT_META: OpMeta = OpMeta {
    name: "!",
    phase: crate::operators::Phase::Eval,
    min_args: 1,
    max_args: 1,
    precedence: Some(8),
    right_assoc: true,
    thread_safe: true,
    writer: false,
    batchable: false,
    external: false,
};

#[async_trait]
impl Operator for NotOp {
    fn meta(&self) -> &OpMeta {
        &NOT_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let value = ev.resolve(ctx, &args[0]).await?;
        Ok(Response::Replace(Value::Bool(!value.is_truthy())))
    }
}

/// Prefix `-x` on numbers.
pub struct NegOp;

const NEG_META: OpMeta = OpMeta {
    name: "neg",
    phase: crate::operators::Phase::Eval,
    min_args: 1,
    max_args: 1,
    precedence: Some(8),
    right_assoc: true,
    thread_safe: true,
    writer: false,
    batchable: false,
    external: false,
};

#[async_trait]
impl Operator for NegOp {
    fn meta(&self) -> &OpMeta {
        &NEG_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        match ev.resolve(ctx, &args[0]).await? {
            Value::Int(i) => Ok(Response::Replace(Value::Int(-i))),
            Value::Float(f) => Ok(Response::Replace(Value::Float(-f))),
            other => Err(type_error(
                ctx,
                format!("cannot negate {}", other.type_name()),
            )),
        }
    }
}

/// `cond ? then : else` — only the selected branch is evaluated.
pub struct TernaryOp;

const TERNARY_META: OpMeta = OpMeta {
    name: "?:",
    phase: crate::operators::Phase::Eval,
    min_args: 3,
    max_args: 3,
    precedence: Some(1),
    right_assoc: true,
    thread_safe: true,
    writer: false,
    batchable: false,
    external: false,
};

#[async_trait]
impl Operator for TernaryOp {
    fn meta(&self) -> &OpMeta {
        &TERNARY_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let condition = ev.resolve(ctx, &args[0]).await?;
        let selected = if condition.is_truthy() { &args[1] } else { &args[2] };
        let value = ev.resolve(ctx, selected).await?;
        Ok(Response::Replace(value))
    }
}
