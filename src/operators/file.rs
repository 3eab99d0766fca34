// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::fabric::BatchRequest;
use crate::operators::{CallCtx, OpMeta, Operator, Phase, Response};

/// `(( file "path" ))` — read a file through the I/O fabric. With two
/// arguments the resolved fragments are concatenated into the path, which
/// composes with references: `(( file prefix "/cert.pem" ))`.
pub struct FileOp;

const META: OpMeta = OpMeta {
    name: "file",
    phase: Phase::Eval,
    min_args: 1,
    max_args: 2,
    precedence: None,
    right_assoc: false,
    thread_safe: true,
    writer: false,
    batchable: true,
    external: true,
};

impl FileOp {
    async fn path(ev: &Evaluator, ctx: &CallCtx, args: &[Expr]) -> Result<String, EvalError> {
        let mut path = String::new();
        for value in ev.resolve_all(ctx, args).await? {
            path.push_str(&value.to_display_string());
        }
        Ok(path)
    }
}

#[async_trait]
impl Operator for FileOp {
    fn meta(&self) -> &OpMeta {
        &META
    }

    async fn batch_request(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Option<BatchRequest> {
        let path = Self::path(ev, ctx, args).await.ok()?;
        Some(BatchRequest {
            service: "file",
            target: String::new(),
            key: path,
        })
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let path = Self::path(ev, ctx, args).await?;
        let contents = ev
            .fabric()
            .file(&path, ctx.nocache(), ev.cancel_token())
            .await
            .map_err(|e| e.into_eval())?;
        Ok(Response::Replace(contents))
    }
}
