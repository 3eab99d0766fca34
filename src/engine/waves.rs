// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wave dispatch.
//!
//! A phase's graph is partitioned into topological waves; each wave runs
//! either in parallel worker tasks behind a semaphore or sequentially in
//! topological order. A wave may run in parallel only when parallel
//! execution is enabled, it has at least two nodes, every node's operator
//! is thread-safe, and no two target paths overlap (one a prefix of the
//! other, or equal). Batchable lookups are aggregated and dispatched
//! through the fabric before the wave starts.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use crate::analyzer::{DepNode, DependencyGraph, NodeStatus};
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::observability::messages::{NodeFailed, WaveDispatched};
use crate::observability::{StructuredLog, WaveTiming};
use crate::operators::{CallCtx, Phase, Response};

use super::evaluator::Evaluator;

pub struct WaveOutcome {
    /// Nodes whose response changed the document.
    pub completed: usize,
    /// Every node failure the phase produced, in completion order.
    pub errors: Vec<EvalError>,
}

pub async fn execute(
    ev: &Evaluator,
    phase: Phase,
    mut graph: DependencyGraph,
) -> Result<WaveOutcome, EvalError> {
    let levels = graph.topological_levels()?;
    let semaphore = Arc::new(Semaphore::new(ev.config().concurrency()));
    let mut completed = 0usize;
    let mut errors: Vec<EvalError> = Vec::new();

    for (wave_index, wave) in levels.into_iter().enumerate() {
        graph.promote_ready();
        let runnable: Vec<DepNode> = wave
            .iter()
            .filter_map(|key| graph.get(key))
            .filter(|node| !node.placeholder && node.status == NodeStatus::Ready)
            .cloned()
            .collect();
        if runnable.is_empty() {
            continue;
        }
        if ev.cancel_token().is_cancelled() {
            if errors.is_empty() {
                errors.push(EvalError::Cancelled);
            }
            break;
        }

        prefetch_batchables(ev, &runnable).await;

        let parallel = wave_is_parallel(ev, &runnable);
        WaveDispatched {
            phase: phase.label(),
            wave: wave_index,
            size: runnable.len(),
            parallel,
        }
        .log();

        let size = runnable.len();
        for node in &runnable {
            graph.mark_running(&node.key());
        }
        let started = Instant::now();
        let dispatch = async {
            if parallel {
                run_parallel(ev, runnable, &semaphore).await
            } else {
                run_sequential(ev, runnable).await
            }
        };
        let results = match ev.config().timeouts.wave() {
            Some(limit) => match tokio::time::timeout(limit, dispatch).await {
                Ok(results) => results,
                Err(_) => {
                    errors.push(EvalError::Timeout {
                        scope: format!("wave {}", wave_index),
                    });
                    // stop stragglers; the run is over either way
                    ev.cancel_handle().cancel();
                    break;
                }
            },
            None => dispatch.await,
        };
        ev.context().metrics.record_wave(WaveTiming {
            phase: phase.label(),
            wave: wave_index,
            size,
            parallel,
            duration: started.elapsed(),
        });

        for (key, result) in results {
            match result {
                Ok(true) => {
                    graph.mark_done(&key);
                    completed += 1;
                }
                Ok(false) => {
                    // the operator chose to leave the expression intact
                    graph.mark_done(&key);
                }
                Err(err) => {
                    let operator = graph
                        .get(&key)
                        .map(|n| n.op_name.clone())
                        .unwrap_or_default();
                    NodeFailed {
                        path: &key,
                        operator: &operator,
                        error: &err,
                    }
                    .log();
                    graph.mark_failed(&key);
                    errors.push(err);
                }
            }
        }
    }

    Ok(WaveOutcome { completed, errors })
}

/// Collect and dispatch the wave's batchable lookups. `nocache` calls are
/// excluded; they must reach the adapter themselves.
async fn prefetch_batchables(ev: &Evaluator, runnable: &[DepNode]) {
    let mut requests = Vec::new();
    for node in runnable {
        let ctx = CallCtx::with_modifiers(node.path.clone(), node.modifiers.clone());
        if ctx.nocache() {
            continue;
        }
        let Expr::Call { name, args, .. } = node.expr.as_ref() else {
            continue;
        };
        let Some(op) = ev.registry().get(name) else {
            continue;
        };
        if !op.meta().batchable {
            continue;
        }
        if let Some(request) = op.batch_request(ev, &ctx, args).await {
            requests.push(request);
        }
    }
    if !requests.is_empty() {
        ev.fabric().prefetch(requests, ev.cancel_token()).await;
    }
}

fn wave_is_parallel(ev: &Evaluator, runnable: &[DepNode]) -> bool {
    if !ev.config().parallel || runnable.len() < 2 {
        return false;
    }
    let all_thread_safe = runnable.iter().all(|node| {
        ev.registry()
            .get(&node.op_name)
            .map(|op| op.meta().thread_safe)
            // synthetic kinds (reference, literal, ||) are pure reads
            .unwrap_or(true)
    });
    if !all_thread_safe {
        return false;
    }
    for (i, a) in runnable.iter().enumerate() {
        for b in &runnable[i + 1..] {
            if a.path.overlaps(&b.path) {
                return false;
            }
        }
    }
    true
}

async fn run_parallel(
    ev: &Evaluator,
    runnable: Vec<DepNode>,
    semaphore: &Arc<Semaphore>,
) -> Vec<(String, Result<bool, EvalError>)> {
    let mut handles = Vec::with_capacity(runnable.len());
    for node in runnable {
        let ev = ev.clone();
        let semaphore = semaphore.clone();
        let key = node.key();
        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("wave semaphore never closes");
            if ev.cancel_token().is_cancelled() {
                return Err(EvalError::Cancelled);
            }
            run_node(&ev, &node).await
        });
        handles.push((key, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (key, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(EvalError::Operator {
                name: "wave".to_string(),
                message: format!("worker task failed: {}", join_error),
            }),
        };
        results.push((key, result));
    }
    results
}

async fn run_sequential(
    ev: &Evaluator,
    runnable: Vec<DepNode>,
) -> Vec<(String, Result<bool, EvalError>)> {
    let mut results = Vec::with_capacity(runnable.len());
    for node in runnable {
        if ev.cancel_token().is_cancelled() {
            results.push((node.key(), Err(EvalError::Cancelled)));
            break;
        }
        let result = run_node(ev, &node).await;
        results.push((node.key(), result));
    }
    results
}

/// Invoke one node's operator and apply its response. Returns whether the
/// document changed.
async fn run_node(ev: &Evaluator, node: &DepNode) -> Result<bool, EvalError> {
    let ctx = CallCtx::with_modifiers(node.path.clone(), node.modifiers.clone());
    let started = Instant::now();
    let result = invoke(ev, &ctx, node).await;
    ev.context()
        .metrics
        .record_operator(&node.op_name, started.elapsed());
    let response = result?;
    ev.apply_response(&node.path, &response)
}

async fn invoke(
    ev: &Evaluator,
    ctx: &CallCtx,
    node: &DepNode,
) -> Result<Response, EvalError> {
    match node.op_name.as_str() {
        // synthetic node kinds evaluate through argument resolution
        "reference" | "literal" | "||" => {
            ev.resolve(ctx, &node.expr).await.map(Response::Replace)
        }
        name => {
            let op = ev
                .registry()
                .get(name)
                .ok_or_else(|| EvalError::UnknownOperator {
                    name: name.to_string(),
                })?;
            let args: &[Expr] = match node.expr.as_ref() {
                Expr::Call { args, .. } => args,
                _ => &[],
            };
            match (op.meta().external, ev.config().timeouts.operator()) {
                (true, Some(limit)) => tokio::time::timeout(limit, op.run(ev, ctx, args))
                    .await
                    .map_err(|_| EvalError::Timeout {
                        scope: format!("operator {}", name),
                    })?,
                _ => op.run(ev, ctx, args).await,
            }
        }
    }
}
