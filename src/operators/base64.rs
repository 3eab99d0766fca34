// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::document::Value;
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{op_error, CallCtx, OpMeta, Operator, Response};

/// `(( base64 value ))` — standard base64 of the argument's string form.
pub struct Base64Op;

const ENCODE_META: OpMeta = OpMeta::eval("base64", 1, 1);

#[async_trait]
impl Operator for Base64Op {
    fn meta(&self) -> &OpMeta {
        &ENCODE_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let value = ev.resolve(ctx, &args[0]).await?;
        let encoded = STANDARD.encode(value.to_display_string().as_bytes());
        Ok(Response::Replace(Value::String(encoded)))
    }
}

/// `(( base64-decode value ))` — decode a base64 string; the payload must
/// be valid UTF-8.
pub struct Base64DecodeOp;

const DECODE_META: OpMeta = OpMeta::eval("base64-decode", 1, 1);

#[async_trait]
impl Operator for Base64DecodeOp {
    fn meta(&self) -> &OpMeta {
        &DECODE_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let value = ev.resolve(ctx, &args[0]).await?;
        let bytes = STANDARD
            .decode(value.to_display_string().as_bytes())
            .map_err(|e| op_error("base64-decode", format!("invalid base64: {}", e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| op_error("base64-decode", "decoded payload is not valid UTF-8"))?;
        Ok(Response::Replace(Value::String(text)))
    }
}
