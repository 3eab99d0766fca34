// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::document::Value;
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{type_error, CallCtx, OpMeta, Operator, Response};

/// `(( keys mapping ))` — the mapping's keys as a sequence, in document
/// order.
pub struct KeysOp;

const META: OpMeta = OpMeta::eval("keys", 1, 1);

#[async_trait]
impl Operator for KeysOp {
    fn meta(&self) -> &OpMeta {
        &META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        match ev.resolve(ctx, &args[0]).await? {
            Value::Map(map) => Ok(Response::Replace(Value::Seq(
                map.keys().map(|k| Value::String(k.clone())).collect(),
            ))),
            other => Err(type_error(
                ctx,
                format!("keys requires a mapping, got {}", other.type_name()),
            )),
        }
    }
}
