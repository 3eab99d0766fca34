// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::adapters::split_secret_path;
use crate::document::{Path, Value};
use crate::engine::Evaluator;
use crate::errors::{EvalError, ExternalErrorKind};
use crate::expr::Expr;
use crate::fabric::BatchRequest;
use crate::operators::{CallCtx, OpMeta, Operator, Phase, Response};

/// `(( vault "secret/db:password" ))` — secret-store lookup through the
/// I/O fabric. Multiple arguments are resolved and concatenated into the
/// lookup path, so `(( vault "secret/" meta.env ":password" ))` works. The
/// trailing `:field` selects one sub-key; without it the whole record is
/// substituted.
pub struct VaultOp;

const VAULT_META: OpMeta = OpMeta {
    name: "vault",
    phase: Phase::Eval,
    min_args: 1,
    max_args: -1,
    precedence: None,
    right_assoc: false,
    thread_safe: true,
    writer: false,
    batchable: true,
    external: true,
};

async fn assemble_path(
    ev: &Evaluator,
    ctx: &CallCtx,
    args: &[Expr],
) -> Result<String, EvalError> {
    let mut path = String::new();
    for value in ev.resolve_all(ctx, args).await? {
        path.push_str(&value.to_display_string());
    }
    Ok(path)
}

async fn lookup(
    ev: &Evaluator,
    ctx: &CallCtx,
    raw: &str,
) -> Result<Value, EvalError> {
    let (logical, field) = split_secret_path(raw);
    let record = ev
        .fabric()
        .secret(logical, ctx.nocache(), ev.cancel_token())
        .await
        .map_err(|e| e.into_eval())?;
    match field {
        None => Ok(record),
        Some(field) => record
            .find(&Path::parse(field))
            .cloned()
            .ok_or_else(|| EvalError::External {
                key: raw.to_string(),
                kind: ExternalErrorKind::NotFound,
                message: format!("record has no field '{}'", field),
            }),
    }
}

#[async_trait]
impl Operator for VaultOp {
    fn meta(&self) -> &OpMeta {
        &VAULT_META
    }

    async fn batch_request(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Option<BatchRequest> {
        let raw = assemble_path(ev, ctx, args).await.ok()?;
        let (logical, _) = split_secret_path(&raw);
        Some(BatchRequest {
            service: "vault",
            target: String::new(),
            key: logical.to_string(),
        })
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let raw = assemble_path(ev, ctx, args).await?;
        lookup(ev, ctx, &raw).await.map(Response::Replace)
    }
}

/// `(( vault-try "path-1" "path-2" "fallback" ))` — attempt each candidate
/// path in order; the final argument is a plain default used after every
/// preceding lookup misses. Only NotFound-class failures move on to the
/// next candidate; transport and auth errors are real failures.
pub struct VaultTryOp;

const VAULT_TRY_META: OpMeta = OpMeta {
    name: "vault-try",
    phase: Phase::Eval,
    min_args: 2,
    max_args: -1,
    precedence: None,
    right_assoc: false,
    thread_safe: true,
    writer: false,
    // candidate paths are tried strictly in order, so this operator opts
    // out of wave-level multi-item dispatch
    batchable: false,
    external: true,
};

#[async_trait]
impl Operator for VaultTryOp {
    fn meta(&self) -> &OpMeta {
        &VAULT_TRY_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let (default, candidates) = args.split_last().expect("arity enforces >= 2");
        for candidate in candidates {
            let raw = ev.resolve(ctx, candidate).await?.to_display_string();
            match lookup(ev, ctx, &raw).await {
                Ok(value) => return Ok(Response::Replace(value)),
                Err(err) if err.recoverable_by_fallback() => continue,
                Err(err) => return Err(err),
            }
        }
        let value = ev.resolve(ctx, default).await?;
        Ok(Response::Replace(value))
    }
}
