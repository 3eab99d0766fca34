// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::document::{Path, Value};
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{CallCtx, OpMeta, Operator, Response};

/// `(( empty map ))` / `(( empty some.path ))` — type constructor for the
/// bare type names `map`/`hash`, `array`/`list`, and `string`; for anything
/// else, resolves the argument and answers whether it is empty.
pub struct EmptyOp;

const META: OpMeta = OpMeta::eval("empty", 1, 1);

fn type_constructor(path: &Path) -> Option<Value> {
    if path.len() != 1 {
        return None;
    }
    match path.first().and_then(|s| s.as_key()) {
        Some("map") | Some("hash") => Some(Value::empty_map()),
        Some("array") | Some("list") => Some(Value::Seq(Vec::new())),
        Some("string") => Some(Value::String(String::new())),
        _ => None,
    }
}

#[async_trait]
impl Operator for EmptyOp {
    fn meta(&self) -> &OpMeta {
        &META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        if let Expr::Reference(path) = &args[0] {
            if let Some(constructed) = type_constructor(path) {
                return Ok(Response::Replace(constructed));
            }
        }
        let value = ev.resolve(ctx, &args[0]).await?;
        Ok(Response::Replace(Value::Bool(value.is_empty_value())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_constructor_names() {
        assert_eq!(type_constructor(&Path::parse("map")), Some(Value::empty_map()));
        assert_eq!(type_constructor(&Path::parse("hash")), Some(Value::empty_map()));
        assert_eq!(type_constructor(&Path::parse("list")), Some(Value::Seq(vec![])));
        assert_eq!(
            type_constructor(&Path::parse("string")),
            Some(Value::String(String::new()))
        );
        assert_eq!(type_constructor(&Path::parse("meta.map")), None);
        assert_eq!(type_constructor(&Path::parse("other")), None);
    }
}
