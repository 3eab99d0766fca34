// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for evaluator lifecycle and execution events.
//!
//! Messages follow a struct-based pattern with a `Display` implementation
//! plus [`StructuredLog`] for machine-readable fields, which keeps magic
//! strings out of the execution paths and the log schema in one place.

use std::fmt::{Display, Formatter};
use tracing::Span;

/// Trait for messages that support structured logging and tracing spans.
pub trait StructuredLog: Display {
    fn log(&self);

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("layercake", event = name)
    }
}

/// An evaluator run began.
pub struct EvaluationStarted {
    pub tree: &'static str,
    pub parallel: bool,
    pub max_concurrency: usize,
}

impl Display for EvaluationStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting evaluation on {} tree, parallel={}, max_concurrency={}",
            self.tree, self.parallel, self.max_concurrency
        )
    }
}

impl StructuredLog for EvaluationStarted {
    fn log(&self) {
        tracing::info!(
            tree = self.tree,
            parallel = self.parallel,
            max_concurrency = self.max_concurrency,
            "{}",
            self
        );
    }
}

/// A phase pass extracted its expression nodes.
pub struct PhaseStarted {
    pub phase: &'static str,
    pub nodes: usize,
    pub pass: usize,
}

impl Display for PhaseStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Phase {} pass {}: {} expression node(s)",
            self.phase, self.pass, self.nodes
        )
    }
}

impl StructuredLog for PhaseStarted {
    fn log(&self) {
        tracing::debug!(phase = self.phase, nodes = self.nodes, pass = self.pass, "{}", self);
    }
}

/// A wave was handed to the dispatcher.
pub struct WaveDispatched {
    pub phase: &'static str,
    pub wave: usize,
    pub size: usize,
    pub parallel: bool,
}

impl Display for WaveDispatched {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Dispatching wave {} ({} node(s), {})",
            self.wave,
            self.size,
            if self.parallel { "parallel" } else { "sequential" }
        )
    }
}

impl StructuredLog for WaveDispatched {
    fn log(&self) {
        tracing::debug!(
            phase = self.phase,
            wave = self.wave,
            size = self.size,
            parallel = self.parallel,
            "{}",
            self
        );
    }
}

/// A node's operator returned an error.
pub struct NodeFailed<'a> {
    pub path: &'a str,
    pub operator: &'a str,
    pub error: &'a dyn Display,
}

impl Display for NodeFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Operator '{}' failed at {}: {}",
            self.operator, self.path, self.error
        )
    }
}

impl StructuredLog for NodeFailed<'_> {
    fn log(&self) {
        tracing::warn!(path = self.path, operator = self.operator, "{}", self);
    }
}

/// The persisted result cache was read back from disk.
pub struct CacheLoaded {
    pub entries: usize,
    pub skipped: usize,
}

impl Display for CacheLoaded {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Loaded {} cached result(s), skipped {} corrupt or expired",
            self.entries, self.skipped
        )
    }
}

impl StructuredLog for CacheLoaded {
    fn log(&self) {
        tracing::info!(entries = self.entries, skipped = self.skipped, "{}", self);
    }
}

/// The run reached a fixed point.
pub struct EvaluationFinished {
    pub passes: usize,
    pub duration_ms: u128,
}

impl Display for EvaluationFinished {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Evaluation finished after {} pass(es) in {}ms",
            self.passes, self.duration_ms
        )
    }
}

impl StructuredLog for EvaluationFinished {
    fn log(&self) {
        tracing::info!(passes = self.passes, duration_ms = self.duration_ms as u64, "{}", self);
    }
}
