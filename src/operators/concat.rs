// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::document::Value;
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{CallCtx, OpMeta, Operator, Response};

/// `(( concat a b ... ))` — resolve every argument and join their string
/// forms. Scalars use their canonical spelling; null renders empty.
pub struct ConcatOp;

const META: OpMeta = OpMeta::eval("concat", 1, -1);

#[async_trait]
impl Operator for ConcatOp {
    fn meta(&self) -> &OpMeta {
        &META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let mut out = String::new();
        for value in ev.resolve_all(ctx, args).await? {
            out.push_str(&value.to_display_string());
        }
        Ok(Response::Replace(Value::String(out)))
    }
}
