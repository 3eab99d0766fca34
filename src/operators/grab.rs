// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{CallCtx, OpMeta, Operator, Response};

/// `(( grab path ))` — dereference: substitute the value the argument
/// resolves to. The argument is usually a reference but any resolvable
/// expression works.
pub struct GrabOp;

const META: OpMeta = OpMeta::eval("grab", 1, 1);

#[async_trait]
impl Operator for GrabOp {
    fn meta(&self) -> &OpMeta {
        &META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let value = ev.resolve(ctx, &args[0]).await?;
        Ok(Response::Replace(value))
    }
}
