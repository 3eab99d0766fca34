// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The phased fixed-point evaluator.
//!
//! One `run` drives the document to resolution: for each phase in order
//! (Merge, Param, Eval) the analyzer builds the phase's dependency graph,
//! the wave executor dispatches it, and the phase repeats until it has no
//! nodes left — evaluating an operator can introduce new expressions, so
//! every pass re-analyzes. The outer loop walks the phases again until no
//! expressions remain anywhere; a full pass without progress is the fatal
//! "unable to resolve" condition.
//!
//! Argument resolution lives here too: operators hand unresolved ASTs back
//! to [`Evaluator::resolve`], which is where `||` defaulting, environment
//! lookups, and nested operator invocation happen.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::analyzer::Analyzer;
use crate::config::{EngineConfig, TreeKind};
use crate::document::{CowTree, DocumentTree, Path, ShardedTree, Value};
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::fabric::Fabric;
use crate::observability::messages::{EvaluationFinished, EvaluationStarted, PhaseStarted};
use crate::observability::StructuredLog;
use crate::operators::{CallCtx, OperatorRegistry, Phase, Response};

use super::context::EngineContext;
use super::waves;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct Inner {
    ctx: Arc<EngineContext>,
    tree: Arc<dyn DocumentTree>,
    overrides: HashMap<String, Value>,
    deferred: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

/// Cheaply clonable handle onto one evaluation run. Operators receive a
/// reference; the wave executor clones it into worker tasks.
#[derive(Clone)]
pub struct Evaluator {
    inner: Arc<Inner>,
}

impl Evaluator {
    pub fn new(ctx: Arc<EngineContext>, document: Value) -> Self {
        Self::with_overrides(ctx, document, HashMap::new())
    }

    /// `overrides` maps parameter paths (canonical form) to caller-provided
    /// values satisfying `param` declarations.
    pub fn with_overrides(
        ctx: Arc<EngineContext>,
        document: Value,
        overrides: HashMap<String, Value>,
    ) -> Self {
        let tree: Arc<dyn DocumentTree> = match ctx.config.tree {
            TreeKind::Sharded => Arc::new(ShardedTree::from_value_with_shards(
                document,
                ctx.config.shard_count,
            )),
            TreeKind::Cow => Arc::new(CowTree::from_value(document)),
        };
        Evaluator {
            inner: Arc::new(Inner {
                ctx,
                tree,
                overrides,
                deferred: Mutex::new(HashSet::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn tree(&self) -> &Arc<dyn DocumentTree> {
        &self.inner.tree
    }

    pub fn context(&self) -> &EngineContext {
        &self.inner.ctx
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.ctx.config
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.inner.ctx.registry
    }

    pub fn fabric(&self) -> &Fabric {
        &self.inner.ctx.fabric
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// A handle callers can use to cancel the run from outside.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn override_for(&self, path: &Path) -> Option<Value> {
        self.inner.overrides.get(&path.to_string()).cloned()
    }

    /// Record a path whose emitted expression text must survive the run.
    pub fn mark_deferred(&self, path: &Path) {
        self.inner.deferred.lock().insert(path.to_string());
    }

    fn deferred_set(&self) -> HashSet<String> {
        self.inner.deferred.lock().clone()
    }

    /// Document lookup with reference-error semantics.
    pub fn lookup(&self, path: &Path) -> Result<Value, EvalError> {
        self.inner.tree.find(path).map_err(EvalError::from)
    }

    /// Recursively resolve one argument AST to a value.
    pub fn resolve<'a>(
        &'a self,
        ctx: &'a CallCtx,
        expr: &'a Expr,
    ) -> BoxFuture<'a, Result<Value, EvalError>> {
        Box::pin(async move {
            match expr {
                Expr::Literal(value) => Ok(value.clone()),
                Expr::Reference(path) => self.lookup(path),
                Expr::EnvVar(name) => std::env::var(name)
                    .map(Value::String)
                    .map_err(|_| EvalError::EnvMissing { name: name.clone() }),
                Expr::Or { left, right } => match self.resolve(ctx, left).await {
                    Ok(value) => Ok(value),
                    Err(err) if err.recoverable_by_fallback() => {
                        self.resolve(ctx, right).await
                    }
                    Err(err) => Err(err),
                },
                Expr::Call {
                    name,
                    args,
                    modifiers,
                } => {
                    let op = self.registry().get(name).ok_or_else(|| {
                        EvalError::UnknownOperator { name: name.clone() }
                    })?;
                    // outer nocache propagates into nested calls
                    let mut merged = modifiers.clone();
                    if ctx.nocache() && !merged.iter().any(|m| m == "nocache") {
                        merged.push("nocache".to_string());
                    }
                    let sub_ctx = CallCtx::with_modifiers(ctx.here.clone(), merged);
                    match op.run(self, &sub_ctx, args).await? {
                        Response::Replace(value) => Ok(value),
                        _ => Err(EvalError::Operator {
                            name: name.clone(),
                            message: "cannot restructure the document from argument position"
                                .to_string(),
                        }),
                    }
                }
            }
        })
    }

    /// Resolve every argument in order.
    pub async fn resolve_all(
        &self,
        ctx: &CallCtx,
        args: &[Expr],
    ) -> Result<Vec<Value>, EvalError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.resolve(ctx, arg).await?);
        }
        Ok(values)
    }

    /// Apply an operator's response at `here`.
    pub(crate) fn apply_response(
        &self,
        here: &Path,
        response: &Response,
    ) -> Result<bool, EvalError> {
        match response {
            Response::Replace(value) => {
                self.inner.tree.set(here, value.clone())?;
                Ok(true)
            }
            Response::Inject(value) => {
                let Some(parent) = here.parent() else {
                    return Err(EvalError::Operator {
                        name: "inject".to_string(),
                        message: "cannot inject at the document root".to_string(),
                    });
                };
                let Value::Map(entries) = value else {
                    return Err(EvalError::Type {
                        at: here.to_string(),
                        message: format!(
                            "inject requires a mapping, got {}",
                            value.type_name()
                        ),
                    });
                };
                let entries = entries.clone();
                let here = here.clone();
                self.inner.tree.transaction(&mut |txn| {
                    for (key, item) in &entries {
                        txn.set(parent.child_key(key), item.clone());
                    }
                    txn.delete(here.clone());
                    Ok(())
                })?;
                Ok(true)
            }
            Response::Drop => {
                self.inner.tree.delete(here)?;
                Ok(true)
            }
            Response::Defer => Ok(false),
        }
    }

    /// Drive the document to a fixed point and return it.
    pub async fn run(&self) -> Result<Value, EvalError> {
        match self.config().timeouts.run() {
            Some(limit) => tokio::time::timeout(limit, self.run_inner())
                .await
                .map_err(|_| EvalError::Timeout {
                    scope: "run".to_string(),
                })?,
            None => self.run_inner().await,
        }
    }

    async fn run_inner(&self) -> Result<Value, EvalError> {
        let started = Instant::now();
        EvaluationStarted {
            tree: match self.config().tree {
                TreeKind::Sharded => "sharded",
                TreeKind::Cow => "cow",
            },
            parallel: self.config().parallel,
            max_concurrency: self.config().concurrency(),
        }
        .log();

        let analyzer = Analyzer::new(
            self.registry(),
            &self.inner.ctx.parse_cache,
            self.config().strict_operators,
        );

        let mut passes = 0;
        loop {
            passes += 1;
            let deferred = self.deferred_set();
            if analyzer.remaining_expressions(&self.inner.tree.snapshot(), &deferred) == 0 {
                break;
            }

            let mut progressed = false;
            for phase in Phase::ALL {
                progressed |= self.run_phase(&analyzer, phase, passes).await?;
                if self.inner.cancel.is_cancelled() {
                    return Err(EvalError::Cancelled);
                }
            }

            let deferred = self.deferred_set();
            let after = analyzer.remaining_expressions(&self.inner.tree.snapshot(), &deferred);
            if after == 0 {
                break;
            }
            if !progressed {
                let snapshot = self.inner.tree.snapshot();
                let graph = analyzer.analyze(&snapshot, Phase::Eval, &deferred)?;
                let mut remaining: Vec<String> =
                    graph.live_nodes().map(|n| n.key()).collect();
                remaining.sort();
                return Err(EvalError::Unresolvable { remaining });
            }
        }

        EvaluationFinished {
            passes,
            duration_ms: started.elapsed().as_millis(),
        }
        .log();
        Ok(self.inner.tree.snapshot())
    }

    /// Run one phase to its own fixed point. Returns whether any node
    /// completed. Errors collected across the phase come back aggregated;
    /// later phases do not run.
    async fn run_phase(
        &self,
        analyzer: &Analyzer<'_>,
        phase: Phase,
        pass: usize,
    ) -> Result<bool, EvalError> {
        let mut progress = false;
        loop {
            let deferred = self.deferred_set();
            let snapshot = self.inner.tree.snapshot();
            let graph = analyzer.analyze(&snapshot, phase, &deferred)?;
            if !graph.cycle_errors().is_empty() {
                return Err(EvalError::aggregate(graph.cycle_errors().to_vec()));
            }
            let live = graph.live_nodes().count();
            if live == 0 {
                break;
            }
            PhaseStarted {
                phase: phase.label(),
                nodes: live,
                pass,
            }
            .log();
            let (cost, chain) = graph.critical_path();
            if chain.len() > 1 {
                tracing::debug!(
                    phase = phase.label(),
                    cost,
                    path = %chain.join(" -> "),
                    "critical path"
                );
            }

            let outcome = waves::execute(self, phase, graph).await?;
            if !outcome.errors.is_empty() {
                return Err(EvalError::aggregate(outcome.errors));
            }
            if outcome.completed == 0 {
                break;
            }
            progress = true;
        }
        Ok(progress)
    }
}
