// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! IP allocation operators.
//!
//! `ips` is pure address arithmetic on an IPv4 base or CIDR. `static_ips`
//! implements the deployment-style allocation: it reads the enclosing job's
//! instance count and the named network's static ranges from the document,
//! then picks the argument offsets out of the flattened static pool. The
//! allocation scheme itself follows the deployment model this engine
//! inherits; the operator treats it as externally specified and keeps the
//! selection deterministic.

use async_trait::async_trait;
use std::net::Ipv4Addr;

use crate::document::{Path, Step, Value};
use crate::engine::Evaluator;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::{op_error, type_error, CallCtx, OpMeta, Operator, Phase, Response};

/// `(( ips "10.0.0.0/24" 5 [count] ))` — the address at `offset` from the
/// base, or a list of `count` consecutive addresses. A negative offset
/// counts back from the end of the CIDR range.
pub struct IpsOp;

const IPS_META: OpMeta = OpMeta::eval("ips", 2, 3);

#[async_trait]
impl Operator for IpsOp {
    fn meta(&self) -> &OpMeta {
        &IPS_META
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let resolved = ev.resolve_all(ctx, args).await?;
        let base_text = match &resolved[0] {
            Value::String(s) => s.clone(),
            other => {
                return Err(type_error(
                    ctx,
                    format!("ips base must be a string, got {}", other.type_name()),
                ))
            }
        };
        let offset = match &resolved[1] {
            Value::Int(i) => *i,
            other => {
                return Err(type_error(
                    ctx,
                    format!("ips offset must be an integer, got {}", other.type_name()),
                ))
            }
        };
        let count = match resolved.get(2) {
            None => None,
            Some(Value::Int(i)) if *i > 0 => Some(*i as u32),
            Some(other) => {
                return Err(type_error(
                    ctx,
                    format!("ips count must be a positive integer, got {}", other),
                ))
            }
        };

        let (base, mask) = parse_base(&base_text).map_err(|m| op_error("ips", m))?;
        let start = if offset >= 0 {
            base.checked_add(offset as u32)
        } else {
            let size = mask
                .map(|m| 2u32.saturating_pow(32 - u32::from(m)))
                .ok_or_else(|| op_error("ips", "negative offsets require a CIDR base"))?;
            base.checked_add(size)
                .and_then(|end| end.checked_sub(offset.unsigned_abs() as u32))
        }
        .ok_or_else(|| op_error("ips", "offset out of address range"))?;

        match count {
            None => Ok(Response::Replace(Value::String(format_ip(start)))),
            Some(count) => {
                let ips = (0..count)
                    .map(|i| {
                        start
                            .checked_add(i)
                            .map(|addr| Value::String(format_ip(addr)))
                            .ok_or_else(|| op_error("ips", "range overflows address space"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Response::Replace(Value::Seq(ips)))
            }
        }
    }
}

/// `(( static_ips 0 1 2 ))` — allocate static addresses for the enclosing
/// job from the named network's static pool, one per instance.
pub struct StaticIpsOp;

const STATIC_META: OpMeta = OpMeta {
    name: "static_ips",
    phase: Phase::Eval,
    min_args: 1,
    max_args: -1,
    precedence: None,
    right_assoc: false,
    // shares the network allocation bookkeeping, so it never joins a
    // parallel wave
    thread_safe: false,
    writer: false,
    batchable: false,
    external: false,
};

#[async_trait]
impl Operator for StaticIpsOp {
    fn meta(&self) -> &OpMeta {
        &STATIC_META
    }

    fn dependencies(&self, here: &Path, _args: &[Expr], _doc: &Value) -> Vec<Path> {
        let mut deps = vec![Path::parse("networks"), Path::parse("jobs")];
        if matches!(here.first(), Some(Step::Key(k)) if k == "jobs") && here.len() >= 2 {
            deps.push(Path::from_steps(here.steps()[..2].to_vec()));
        }
        deps
    }

    async fn run(
        &self,
        ev: &Evaluator,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Response, EvalError> {
        let job_path = enclosing_job(&ctx.here)
            .ok_or_else(|| op_error("static_ips", "must appear under jobs.<n>.networks"))?;
        let job = ev.lookup(&job_path)?;
        let instances = match job.find(&Path::parse("instances")) {
            Some(Value::Int(i)) if *i >= 0 => *i as usize,
            Some(other) => {
                return Err(type_error(
                    ctx,
                    format!("job instances must be an integer, got {}", other.type_name()),
                ))
            }
            None => 1,
        };

        let network_name = ctx
            .here
            .parent()
            .and_then(|p| ev.lookup(&p.child_key("name")).ok())
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| op_error("static_ips", "enclosing network entry has no name"))?;

        let pool = static_pool(ev, &network_name)?;
        let mut offsets = Vec::with_capacity(args.len());
        for value in ev.resolve_all(ctx, args).await? {
            match value {
                Value::Int(i) if i >= 0 => offsets.push(i as usize),
                other => {
                    return Err(type_error(
                        ctx,
                        format!("static_ips offsets must be non-negative integers, got {}", other),
                    ))
                }
            }
        }
        if instances > offsets.len() {
            return Err(op_error(
                "static_ips",
                format!(
                    "job wants {} instance(s) but only {} offset(s) were given",
                    instances,
                    offsets.len()
                ),
            ));
        }

        let mut ips = Vec::with_capacity(instances);
        for offset in offsets.into_iter().take(instances) {
            let addr = pool.get(offset).ok_or_else(|| {
                op_error(
                    "static_ips",
                    format!(
                        "offset {} is outside the static pool of network '{}' ({} address(es))",
                        offset,
                        network_name,
                        pool.len()
                    ),
                )
            })?;
            ips.push(Value::String(format_ip(*addr)));
        }
        Ok(Response::Replace(Value::Seq(ips)))
    }
}

/// `jobs.<n>` prefix of a path under the jobs tree.
fn enclosing_job(here: &Path) -> Option<Path> {
    match here.steps() {
        [Step::Key(top), _job, ..] if top == "jobs" && here.len() >= 2 => {
            Some(Path::from_steps(here.steps()[..2].to_vec()))
        }
        _ => None,
    }
}

/// Flattened static address pool of the named network, in declaration
/// order across subnets and ranges.
fn static_pool(ev: &Evaluator, network_name: &str) -> Result<Vec<u32>, EvalError> {
    let networks = ev.lookup(&Path::parse("networks"))?;
    let Some(entries) = networks.as_seq() else {
        return Err(EvalError::Type {
            at: "networks".to_string(),
            message: format!("expected a sequence, got {}", networks.type_name()),
        });
    };
    let network = entries
        .iter()
        .find(|entry| {
            entry.find(&Path::parse("name")).and_then(Value::as_str) == Some(network_name)
        })
        .ok_or_else(|| EvalError::Reference {
            path: format!("networks.{}", network_name),
            at: None,
        })?;

    let mut pool = Vec::new();
    if let Some(subnets) = network.find(&Path::parse("subnets")).and_then(Value::as_seq) {
        for subnet in subnets {
            let Some(ranges) = subnet.find(&Path::parse("static")).and_then(Value::as_seq)
            else {
                continue;
            };
            for range in ranges {
                if let Some(text) = range.as_str() {
                    expand_range(text, &mut pool)
                        .map_err(|m| op_error("static_ips", m))?;
                }
            }
        }
    }
    Ok(pool)
}

/// Expand `"10.0.0.2"` or `"10.0.0.2 - 10.0.0.20"` into the pool.
fn expand_range(text: &str, pool: &mut Vec<u32>) -> Result<(), String> {
    match text.split_once('-') {
        None => {
            pool.push(parse_ipv4(text.trim())?);
            Ok(())
        }
        Some((start, end)) => {
            let start = parse_ipv4(start.trim())?;
            let end = parse_ipv4(end.trim())?;
            if end < start {
                return Err(format!("inverted range '{}'", text));
            }
            pool.extend(start..=end);
            Ok(())
        }
    }
}

fn parse_base(text: &str) -> Result<(u32, Option<u8>), String> {
    match text.split_once('/') {
        None => Ok((parse_ipv4(text)?, None)),
        Some((addr, mask)) => {
            let mask: u8 = mask
                .parse()
                .map_err(|_| format!("invalid CIDR mask in '{}'", text))?;
            if mask > 32 {
                return Err(format!("invalid CIDR mask in '{}'", text));
            }
            Ok((parse_ipv4(addr)?, Some(mask)))
        }
    }
}

fn parse_ipv4(text: &str) -> Result<u32, String> {
    text.parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| format!("invalid IPv4 address '{}'", text))
}

fn format_ip(addr: u32) -> String {
    Ipv4Addr::from(addr).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_and_format() {
        assert_eq!(parse_base("10.0.0.0").unwrap(), (0x0a00_0000, None));
        assert_eq!(parse_base("10.0.0.0/24").unwrap(), (0x0a00_0000, Some(24)));
        assert!(parse_base("10.0.0.0/40").is_err());
        assert!(parse_base("not-an-ip").is_err());
        assert_eq!(format_ip(0x0a00_0005), "10.0.0.5");
    }

    #[test]
    fn test_expand_range() {
        let mut pool = Vec::new();
        expand_range("192.168.1.10", &mut pool).unwrap();
        expand_range("192.168.1.20 - 192.168.1.22", &mut pool).unwrap();
        assert_eq!(pool.len(), 4);
        assert_eq!(format_ip(pool[1]), "192.168.1.20");
        assert_eq!(format_ip(pool[3]), "192.168.1.22");
        assert!(expand_range("192.168.1.9 - 192.168.1.1", &mut pool).is_err());
    }

    #[test]
    fn test_enclosing_job() {
        assert_eq!(
            enclosing_job(&Path::parse("jobs.0.networks.0.static_ips")),
            Some(Path::parse("jobs.0"))
        );
        assert_eq!(enclosing_job(&Path::parse("meta.ips")), None);
    }
}
