// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::document::Value;
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{CallCtx, OpMeta, Operator, Phase, Response};

/// `(( defer grab a.b ))` — emit the inner expression literally, so the
/// resolved output still contains `(( grab a.b ))` for a later tool pass.
/// Runs in the Merge phase; the node's path is recorded as deferred so
/// re-analysis does not pick the emitted text back up.
pub struct DeferOp;

const META: OpMeta = OpMeta {
    name: "defer",
    phase: Phase::Merge,
    min_args: 1,
    max_args: -1,
    precedence: None,
    right_assoc: false,
    thread_safe: true,
    writer: true,
    batchable: false,
    external: false,
};

#[async_trait]
impl Operator for DeferOp {
    fn meta(&self) -> &OpMeta {
        &META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let rendered = args
            .iter()
            .map(|arg| arg.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        ev.mark_deferred(&ctx.here);
        Ok(Response::Replace(Value::String(format!("(( {} ))", rendered))))
    }
}
