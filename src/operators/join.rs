// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::document::Value;
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{type_error, CallCtx, OpMeta, Operator, Response};

/// `(( join sep list... ))` — join list elements (and loose scalars) with a
/// separator. Sequence arguments are flattened one level.
pub struct JoinOp;

const META: OpMeta = OpMeta::eval("join", 2, -1);

#[async_trait]
impl Operator for JoinOp {
    fn meta(&self) -> &OpMeta {
        &META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let resolved = ev.resolve_all(ctx, args).await?;
        let separator = match &resolved[0] {
            Value::String(s) => s.clone(),
            other => {
                return Err(type_error(
                    ctx,
                    format!("join separator must be a string, got {}", other.type_name()),
                ))
            }
        };

        let mut pieces = Vec::new();
        for value in &resolved[1..] {
            match value {
                Value::Seq(items) => {
                    for item in items {
                        match item {
                            Value::Seq(_) | Value::Map(_) => {
                                return Err(type_error(
                                    ctx,
                                    "join cannot flatten nested collections",
                                ))
                            }
                            scalar => pieces.push(scalar.to_display_string()),
                        }
                    }
                }
                Value::Map(_) => {
                    return Err(type_error(ctx, "join cannot join a mapping"));
                }
                scalar => pieces.push(scalar.to_display_string()),
            }
        }
        Ok(Response::Replace(Value::String(pieces.join(&separator))))
    }
}
