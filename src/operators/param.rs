// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{CallCtx, OpMeta, Operator, Phase, Response};

/// `(( param "message" ))` — declares a value the caller must provide. A
/// later merge layer normally replaces the whole expression; a declaration
/// that survives to evaluation is satisfied from the caller's override set
/// or becomes a fatal error reported after the Param phase.
pub struct ParamOp;

const META: OpMeta = OpMeta {
    name: "param",
    phase: Phase::Param,
    min_args: 1,
    max_args: 1,
    precedence: None,
    right_assoc: false,
    thread_safe: true,
    writer: false,
    batchable: false,
    external: false,
};

#[async_trait]
impl Operator for ParamOp {
    fn meta(&self) -> &OpMeta {
        &META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        if let Some(value) = ev.override_for(&ctx.here) {
            return Ok(Response::Replace(value));
        }
        let message = ev.resolve(ctx, &args[0]).await?.to_display_string();
        Err(EvalError::Param {
            path: ctx.here.to_string(),
            message,
        })
    }
}
