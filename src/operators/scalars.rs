// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Small scalar helpers: `null`, `negate`, `stringify`.

use async_trait::async_trait;

use crate::document::Value;
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{CallCtx, OpMeta, Operator, Response};

/// `(( null ))` — the null value; `(( null x ))` — is `x` null.
pub struct NullOp;

const NULL_META: OpMeta = OpMeta::eval("null", 0, 1);

#[async_trait]
impl Operator for NullOp {
    fn meta(&self) -> &OpMeta {
        &NULL_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        if args.is_empty() {
            return Ok(Response::Replace(Value::Null));
        }
        let value = ev.resolve(ctx, &args[0]).await?;
        Ok(Response::Replace(Value::Bool(value.is_null())))
    }
}

/// `(( negate x ))` — boolean negation of the argument's truthiness.
pub struct NegateOp;

const NEGATE_META: OpMeta = OpMeta::eval("negate", 1, 1);

#[async_trait]
impl Operator for NegateOp {
    fn meta(&self) -> &OpMeta {
        &NEGATE_META
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

/// `(( stringify value ))` — render any value as its YAML string form.
pub struct StringifyOp;

const STRINGIFY_META: OpMeta = OpMeta::eval("stringify", 1, 1);

#[async_trait]
impl Operator for StringifyOp {
    fn meta(&self) -> &OpMeta {
        &STRINGIFY_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let value = ev.resolve(ctx, &args[0]).await?;
        let rendered = serde_yaml::to_string(&value.to_yaml())
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default();
        Ok(Response::Replace(Value::String(rendered)))
    }
}
