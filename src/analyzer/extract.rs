// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Document walking and dependency extraction.
//!
//! The analyzer scans the merged document for `(( ... ))` strings, parses
//! each through the memoized parser, and builds the phase's dependency
//! graph. Reference extraction is parse-based: the argument AST is walked
//! and every `Reference` node contributes an edge, so tokens inside string
//! literals never produce phantom dependencies. Operator-specific
//! synthetic dependencies come from the operator's own `dependencies`
//! hook. A reference to a path missing from the document produces a
//! placeholder node (operator name `reference`, no behavior) so the graph
//! stays complete.

use std::collections::HashSet;
use std::sync::Arc;

use crate::document::{Path, Step, Value};
use crate::errors::EvalError;
use crate::expr::{self, Expr, ParseCache};
use crate::operators::{OperatorRegistry, Phase};

use super::graph::{DepNode, DependencyGraph, NodeStatus};

/// Modifiers the engine understands; anything else is a warning.
const KNOWN_MODIFIERS: &[&str] = &["nocache", "debug"];

/// Operators whose cost scales with argument count.
const ARG_SCALED: &[&str] = &["concat", "join", "+", "-", "*", "/", "%"];

const BASE_COST: u32 = 1;
const EXTERNAL_COST: u32 = 10;

pub struct Analyzer<'a> {
    registry: &'a OperatorRegistry,
    parse_cache: &'a ParseCache,
    strict: bool,
}

impl<'a> Analyzer<'a> {
    pub fn new(registry: &'a OperatorRegistry, parse_cache: &'a ParseCache, strict: bool) -> Self {
        Analyzer {
            registry,
            parse_cache,
            strict,
        }
    }

    /// Count every expression string in the document, regardless of phase.
    /// The fixed-point loop uses this to decide whether anything remains.
    pub fn remaining_expressions(&self, doc: &Value, deferred: &HashSet<String>) -> usize {
        let mut found = Vec::new();
        collect_expressions(doc, &Path::root(), &mut found);
        found
            .iter()
            .filter(|(path, _)| !deferred.contains(&path.to_string()))
            .count()
    }

    /// Build the dependency graph for one phase of the current document.
    pub fn analyze(
        &self,
        doc: &Value,
        phase: Phase,
        deferred: &HashSet<String>,
    ) -> Result<DependencyGraph, EvalError> {
        let mut found = Vec::new();
        collect_expressions(doc, &Path::root(), &mut found);

        // parse everything first so a single pass reports every syntax error
        let mut parsed = Vec::new();
        let mut errors = Vec::new();
        let signature = self.registry.signature();
        for (path, body) in found {
            if deferred.contains(&path.to_string()) {
                continue;
            }
            match self
                .parse_cache
                .parse(&body, self.registry, signature, self.strict)
            {
                Ok(expr) => parsed.push((path, expr)),
                Err(err) => errors.push(err),
            }
        }
        if !errors.is_empty() {
            return Err(EvalError::aggregate(errors));
        }

        let mut graph = DependencyGraph::new();
        for (path, expr) in &parsed {
            let root = expr.root_operator().to_string();
            if self.registry.phase_of(&root) != phase {
                continue;
            }
            let (modifiers, args_len) = root_call_shape(expr);
            warn_unknown_modifiers(&modifiers, path);
            graph.add_node(DepNode {
                path: path.clone(),
                op_name: root.clone(),
                phase,
                expr: expr.clone(),
                modifiers,
                cost: self.cost_of(&root, args_len),
                placeholder: false,
                tolerant: root == "vault-try" || expr.has_fallback(),
                status: NodeStatus::Pending,
                depends_on: Vec::new(),
                dependents: Vec::new(),
            });
        }

        // second pass: edges, now that every node of the phase exists
        let targets: Vec<(String, Arc<Expr>, Path)> = graph
            .nodes()
            .map(|n| (n.key(), n.expr.clone(), n.path.clone()))
            .collect();
        for (key, expr, here) in targets {
            let mut deps = Vec::new();
            expr.references(&mut deps);
            if let Expr::Call { name, args, .. } = expr.as_ref() {
                if let Some(op) = self.registry.get(name) {
                    deps.extend(op.dependencies(&here, args, doc));
                }
            }
            for dep in deps {
                self.wire_dependency(&mut graph, doc, &key, &here, &dep);
            }
        }
        Ok(graph)
    }

    fn wire_dependency(
        &self,
        graph: &mut DependencyGraph,
        doc: &Value,
        dependent: &str,
        here: &Path,
        dep: &Path,
    ) {
        // referencing your own path (or your own subtree) is the smallest
        // possible cycle
        if here.overlaps(dep) {
            let _ = graph.add_edge(dependent, dependent);
            return;
        }
        let matched: Vec<String> = graph
            .nodes()
            .filter(|n| n.key() != dependent && n.path.overlaps(dep))
            .map(|n| n.key())
            .collect();
        if !matched.is_empty() {
            for from in matched {
                // cycle-closing edges are recorded inside the graph
                let _ = graph.add_edge(&from, dependent);
            }
            return;
        }
        if doc.find(dep).is_none() {
            let key = dep.to_string();
            if !graph.contains(&key) {
                graph.add_node(placeholder_node(dep.clone()));
            }
            let _ = graph.add_edge(&key, dependent);
        }
        // a plain existing value needs no node: it is already resolved
    }

    fn cost_of(&self, root: &str, args_len: usize) -> u32 {
        match self.registry.get(root) {
            Some(op) if op.meta().external => EXTERNAL_COST,
            _ if ARG_SCALED.contains(&root) => BASE_COST + args_len as u32,
            _ => BASE_COST,
        }
    }
}

fn placeholder_node(path: Path) -> DepNode {
    DepNode {
        op_name: "reference".to_string(),
        phase: Phase::Eval,
        expr: Arc::new(Expr::Reference(path.clone())),
        modifiers: Vec::new(),
        cost: 0,
        placeholder: true,
        tolerant: false,
        status: NodeStatus::Done,
        depends_on: Vec::new(),
        dependents: Vec::new(),
        path,
    }
}

fn root_call_shape(expr: &Expr) -> (Vec<String>, usize) {
    match expr {
        Expr::Call {
            modifiers, args, ..
        } => (modifiers.clone(), args.len()),
        _ => (Vec::new(), 0),
    }
}

fn warn_unknown_modifiers(modifiers: &[String], path: &Path) {
    for modifier in modifiers {
        if !KNOWN_MODIFIERS.contains(&modifier.as_str()) {
            tracing::warn!(path = %path, modifier = %modifier, "unknown modifier ignored");
        }
    }
}

/// Recursive walk collecting every `(( ... ))` string with its path.
fn collect_expressions(value: &Value, path: &Path, out: &mut Vec<(Path, String)>) {
    match value {
        Value::String(text) => {
            if let Some(body) = expr::expression_body(text) {
                out.push((path.clone(), body));
            }
        }
        Value::Seq(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_expressions(item, &path.child(Step::Index(index)), out);
            }
        }
        Value::Map(map) => {
            for (key, item) in map {
                collect_expressions(item, &path.child(Step::Key(key.clone())), out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn analyze(yaml: &str, phase: Phase) -> Result<DependencyGraph, EvalError> {
        let registry = OperatorRegistry::with_builtins();
        let cache = ParseCache::new(64, Duration::from_secs(60));
        let doc = Value::from_yaml(&serde_yaml::from_str(yaml).unwrap());
        Analyzer::new(&registry, &cache, false).analyze(&doc, phase, &HashSet::new())
    }

    #[test]
    fn test_simple_reference_edge() {
        let graph = analyze("a: 1\nb: (( grab a ))\n", Phase::Eval).unwrap();
        // `a` is a plain value, so only the b-node exists with no deps
        assert_eq!(graph.len(), 1);
        let node = graph.get("b").unwrap();
        assert!(node.depends_on.is_empty());
        assert_eq!(node.op_name, "grab");
    }

    #[test]
    fn test_expression_to_expression_edge() {
        let graph = analyze(
            "a: (( grab base ))\nbase: 1\nb: (( grab a ))\n",
            Phase::Eval,
        )
        .unwrap();
        let b = graph.get("b").unwrap();
        assert_eq!(b.depends_on, vec!["a".to_string()]);
        let a = graph.get("a").unwrap();
        assert_eq!(a.dependents, vec!["b".to_string()]);
    }

    #[test]
    fn test_missing_target_creates_placeholder() {
        let graph = analyze("b: (( grab missing ))\n", Phase::Eval).unwrap();
        assert_eq!(graph.len(), 2);
        let placeholder = graph.get("missing").unwrap();
        assert!(placeholder.placeholder);
        assert_eq!(placeholder.op_name, "reference");
        assert_eq!(placeholder.status, NodeStatus::Done);
    }

    #[test]
    fn test_phase_filtering() {
        let yaml = "k: (( param \"provide k\" ))\nv: (( grab k ))\n";
        let param_graph = analyze(yaml, Phase::Param).unwrap();
        assert_eq!(param_graph.live_nodes().count(), 1);
        assert_eq!(param_graph.live_nodes().next().unwrap().op_name, "param");

        let eval_graph = analyze(yaml, Phase::Eval).unwrap();
        assert_eq!(eval_graph.live_nodes().count(), 1);
        assert_eq!(eval_graph.live_nodes().next().unwrap().op_name, "grab");
    }

    #[test]
    fn test_cycle_recorded() {
        let graph = analyze("a: (( grab b ))\nb: (( grab a ))\n", Phase::Eval).unwrap();
        assert!(!graph.cycle_errors().is_empty());
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let graph = analyze("a: (( grab a ))\n", Phase::Eval).unwrap();
        assert!(!graph.cycle_errors().is_empty());
    }

    #[test]
    fn test_string_literals_do_not_contribute_deps() {
        let graph = analyze(
            "s: (( concat \"jobs.web\" \" ok\" ))\njobs:\n  web: 1\n",
            Phase::Eval,
        )
        .unwrap();
        let node = graph.get("s").unwrap();
        assert!(node.depends_on.is_empty());
    }

    #[test]
    fn test_nested_call_references_extracted() {
        let graph = analyze(
            "n: (( grab base ))\nbase: 3\ns: (( concat \"count-\" (n + 2) ))\n",
            Phase::Eval,
        )
        .unwrap();
        let node = graph.get("s").unwrap();
        assert_eq!(node.depends_on, vec!["n".to_string()]);
    }

    #[test]
    fn test_external_cost_model() {
        let graph = analyze(
            "v: (( vault \"secret/a:b\" ))\ng: (( grab v ))\nc: (( concat \"a\" \"b\" \"c\" ))\n",
            Phase::Eval,
        )
        .unwrap();
        assert_eq!(graph.get("v").unwrap().cost, 10);
        assert_eq!(graph.get("g").unwrap().cost, 1);
        assert_eq!(graph.get("c").unwrap().cost, 4);
    }

    #[test]
    fn test_fallback_marks_tolerant() {
        let graph = analyze("x: (( grab missing || \"d\" ))\n", Phase::Eval).unwrap();
        assert!(graph.get("x").unwrap().tolerant);
    }

    #[test]
    fn test_syntax_errors_aggregated() {
        let err = analyze("a: (( 1 + ))\nb: (( grab ))\n", Phase::Eval).unwrap_err();
        assert!(err.leaves().len() >= 2);
    }

    #[test]
    fn test_remaining_expressions_counts() {
        let registry = OperatorRegistry::with_builtins();
        let cache = ParseCache::new(64, Duration::from_secs(60));
        let doc = Value::from_yaml(
            &serde_yaml::from_str("a: (( grab b ))\nb: plain\nc: (( null ))\n").unwrap(),
        );
        let analyzer = Analyzer::new(&registry, &cache, false);
        assert_eq!(analyzer.remaining_expressions(&doc, &HashSet::new()), 2);

        let mut deferred = HashSet::new();
        deferred.insert("a".to_string());
        assert_eq!(analyzer.remaining_expressions(&doc, &deferred), 1);
    }
}
