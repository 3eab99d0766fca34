// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The per-phase dependency graph.
//!
//! One node per expression in the merged document, keyed by the canonical
//! path string. Edges run from dependency to dependent (forward adjacency),
//! which makes Kahn's algorithm and wave partitioning direct: wave *k*
//! holds exactly the nodes whose dependencies all sit in waves < *k*.
//!
//! The graph also owns the node state machine
//! (`pending → ready → running → done | failed`, with `skipped` cascading
//! from failures) and the cost bookkeeping behind critical-path reporting.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::document::Path;
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::operators::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    Skipped,
}

/// One expression node in the merged document.
#[derive(Debug, Clone)]
pub struct DepNode {
    pub path: Path,
    pub op_name: String,
    pub phase: Phase,
    pub expr: Arc<Expr>,
    pub modifiers: Vec<String>,
    pub cost: u32,
    /// Synthetic node standing in for a referenced path that does not
    /// exist; carries no behavior and completes immediately.
    pub placeholder: bool,
    /// Opts into partial-failure handling: failed dependencies do not
    /// cascade a skip onto this node (`vault-try`, `||` fallbacks).
    pub tolerant: bool,
    pub status: NodeStatus,
    pub depends_on: Vec<String>,
    pub dependents: Vec<String>,
}

impl DepNode {
    pub fn key(&self) -> String {
        self.path.to_string()
    }
}

#[derive(Default, Debug)]
pub struct DependencyGraph {
    nodes: IndexMap<String, DepNode>,
    cycle_errors: Vec<EvalError>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: DepNode) {
        self.nodes.entry(node.key()).or_insert(node);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&DepNode> {
        self.nodes.get(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DepNode> {
        self.nodes.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    /// Real (non-placeholder) nodes that still need evaluation.
    pub fn live_nodes(&self) -> impl Iterator<Item = &DepNode> {
        self.nodes.values().filter(|n| !n.placeholder)
    }

    /// Add a dependency edge `from → to` (dependency before dependent).
    /// An edge that would close a cycle is recorded and NOT added, so one
    /// analysis pass can report every cycle in the document.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), EvalError> {
        if from == to {
            let err = EvalError::CircularDependency {
                cycle: vec![from.to_string(), to.to_string()],
            };
            self.cycle_errors.push(err.clone());
            return Err(err);
        }
        if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return Ok(());
        }
        if let Some(mut trail) = self.path_between(to, from) {
            trail.push(to.to_string());
            let err = EvalError::CircularDependency { cycle: trail };
            self.cycle_errors.push(err.clone());
            return Err(err);
        }
        let from_node = self.nodes.get_mut(from).expect("checked above");
        if !from_node.dependents.contains(&to.to_string()) {
            from_node.dependents.push(to.to_string());
        }
        let to_node = self.nodes.get_mut(to).expect("checked above");
        if !to_node.depends_on.contains(&from.to_string()) {
            to_node.depends_on.push(from.to_string());
        }
        Ok(())
    }

    /// DFS along dependent edges; returns the node trail from `start` to
    /// `goal` when one exists.
    fn path_between(&self, start: &str, goal: &str) -> Option<Vec<String>> {
        let mut stack = vec![vec![start.to_string()]];
        let mut visited = HashSet::new();
        while let Some(trail) = stack.pop() {
            let current = trail.last().expect("trail never empty").clone();
            if current == goal {
                return Some(trail);
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                for dependent in &node.dependents {
                    let mut next = trail.clone();
                    next.push(dependent.clone());
                    stack.push(next);
                }
            }
        }
        None
    }

    /// Cycle errors recorded while edges were added.
    pub fn cycle_errors(&self) -> &[EvalError] {
        &self.cycle_errors
    }

    /// Count incoming dependencies per node.
    pub fn build_dependency_counts(&self) -> HashMap<String, usize> {
        self.nodes
            .iter()
            .map(|(key, node)| (key.clone(), node.depends_on.len()))
            .collect()
    }

    /// Kahn's algorithm. Returns None when a cycle prevents consuming
    /// every node.
    pub fn topological_sort(&self) -> Option<Vec<String>> {
        let mut counts = self.build_dependency_counts();
        let mut queue: VecDeque<String> = self
            .nodes
            .keys()
            .filter(|key| counts[*key] == 0)
            .cloned()
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(key) = queue.pop_front() {
            order.push(key.clone());
            if let Some(node) = self.nodes.get(&key) {
                for dependent in &node.dependents {
                    if let Some(count) = counts.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(dependent.clone());
                        }
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Some(order)
        } else {
            None
        }
    }

    /// Partition into waves: wave *k* contains exactly the nodes all of
    /// whose dependencies are in waves < *k*. Fails with the offending
    /// cycle when the partition cannot consume every node.
    pub fn topological_levels(&self) -> Result<Vec<Vec<String>>, EvalError> {
        let mut counts = self.build_dependency_counts();
        let mut current: Vec<String> = self
            .nodes
            .keys()
            .filter(|key| counts[*key] == 0)
            .cloned()
            .collect();
        let mut levels = Vec::new();
        let mut consumed = 0;

        while !current.is_empty() {
            consumed += current.len();
            let mut next = Vec::new();
            for key in &current {
                if let Some(node) = self.nodes.get(key) {
                    for dependent in &node.dependents {
                        if let Some(count) = counts.get_mut(dependent) {
                            *count -= 1;
                            if *count == 0 {
                                next.push(dependent.clone());
                            }
                        }
                    }
                }
            }
            levels.push(std::mem::take(&mut current));
            current = next;
        }

        if consumed == self.nodes.len() {
            Ok(levels)
        } else {
            Err(EvalError::CircularDependency {
                cycle: self.find_cycle(),
            })
        }
    }

    /// The node list of one cycle, for diagnostics. Looks only at nodes
    /// that Kahn's algorithm could not consume.
    pub fn find_cycle(&self) -> Vec<String> {
        let consumed: HashSet<String> = self
            .topological_sort_partial()
            .into_iter()
            .collect();
        let mut remaining: Vec<&String> = self
            .nodes
            .keys()
            .filter(|key| !consumed.contains(*key))
            .collect();
        remaining.sort();

        // walk dependency edges inside the unconsumed set until a repeat
        let Some(start) = remaining.first() else {
            return Vec::new();
        };
        let mut trail: Vec<String> = vec![(*start).clone()];
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert((*start).clone());
        let mut current = (*start).clone();
        loop {
            let Some(node) = self.nodes.get(&current) else {
                return trail;
            };
            let next = node
                .depends_on
                .iter()
                .find(|dep| !consumed.contains(*dep))
                .cloned();
            let Some(next) = next else {
                return trail;
            };
            if seen.contains(&next) {
                // trim the lead-in so the list names only the cycle
                if let Some(pos) = trail.iter().position(|k| k == &next) {
                    trail.drain(..pos);
                }
                trail.reverse();
                return trail;
            }
            seen.insert(next.clone());
            trail.push(next.clone());
            current = next;
        }
    }

    fn topological_sort_partial(&self) -> Vec<String> {
        let mut counts = self.build_dependency_counts();
        let mut queue: VecDeque<String> = self
            .nodes
            .keys()
            .filter(|key| counts[*key] == 0)
            .cloned()
            .collect();
        let mut order = Vec::new();
        while let Some(key) = queue.pop_front() {
            order.push(key.clone());
            if let Some(node) = self.nodes.get(&key) {
                for dependent in &node.dependents {
                    if let Some(count) = counts.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(dependent.clone());
                        }
                    }
                }
            }
        }
        order
    }

    /// Longest-cost chain through the DAG: (total cost, node list). A
    /// diagnostic signal only; never affects correctness.
    pub fn critical_path(&self) -> (u32, Vec<String>) {
        let Some(order) = self.topological_sort() else {
            return (0, Vec::new());
        };
        let mut best: HashMap<String, (u32, Option<String>)> = HashMap::new();
        for key in &order {
            let node = &self.nodes[key];
            let inbound = node
                .depends_on
                .iter()
                .filter_map(|dep| best.get(dep).map(|(cost, _)| (*cost, dep.clone())))
                .max_by_key(|(cost, _)| *cost);
            let (base, from) = match inbound {
                Some((cost, dep)) => (cost, Some(dep)),
                None => (0, None),
            };
            best.insert(key.clone(), (base + node.cost, from));
        }

        let Some((end, (total, _))) = best
            .iter()
            .max_by_key(|(_, (cost, _))| *cost)
            .map(|(k, v)| (k.clone(), v.clone()))
        else {
            return (0, Vec::new());
        };
        let mut chain = vec![end.clone()];
        let mut cursor = end;
        while let Some((_, Some(prev))) = best.get(&cursor).cloned() {
            chain.push(prev.clone());
            cursor = prev;
        }
        chain.reverse();
        (total, chain)
    }

    // ---- node state machine ----

    pub fn status(&self, key: &str) -> Option<NodeStatus> {
        self.nodes.get(key).map(|n| n.status)
    }

    pub fn mark_running(&mut self, key: &str) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.status = NodeStatus::Running;
        }
    }

    pub fn mark_done(&mut self, key: &str) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.status = NodeStatus::Done;
        }
    }

    /// Mark `key` failed and cascade `skipped` to every transitive
    /// dependent that has not opted into partial-failure handling.
    /// Returns the skipped node keys.
    pub fn mark_failed(&mut self, key: &str) -> Vec<String> {
        let Some(node) = self.nodes.get_mut(key) else {
            return Vec::new();
        };
        node.status = NodeStatus::Failed;

        let mut skipped = Vec::new();
        let mut queue: VecDeque<String> = self
            .nodes
            .get(key)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default();
        while let Some(next) = queue.pop_front() {
            let Some(node) = self.nodes.get_mut(&next) else {
                continue;
            };
            if node.tolerant || !matches!(node.status, NodeStatus::Pending | NodeStatus::Ready) {
                continue;
            }
            node.status = NodeStatus::Skipped;
            skipped.push(next.clone());
            for dependent in node.dependents.clone() {
                queue.push_back(dependent);
            }
        }
        skipped
    }

    /// Promote pending nodes whose dependencies are all done or skipped.
    pub fn promote_ready(&mut self) {
        let keys: Vec<String> = self.nodes.keys().cloned().collect();
        for key in keys {
            let deps_settled = {
                let node = &self.nodes[&key];
                node.status == NodeStatus::Pending
                    && node.depends_on.iter().all(|dep| {
                        matches!(
                            self.nodes.get(dep).map(|d| d.status),
                            Some(NodeStatus::Done) | Some(NodeStatus::Skipped) | None
                        )
                    })
            };
            if deps_settled {
                self.nodes.get_mut(&key).expect("key exists").status = NodeStatus::Ready;
            }
        }
    }
}
