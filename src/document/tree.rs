// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The shared document store contract.
//!
//! Two implementations coexist behind [`DocumentTree`] with identical
//! semantics: a sharded-lock tree for write-heavy contention profiles and a
//! copy-on-write tree for snapshot-heavy parallel evaluation. The evaluator
//! picks one from configuration; everything downstream only sees the trait.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::path::{Path, Step};
use super::value::Value;

/// Errors surfaced by document tree operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    /// The path does not exist in the document.
    #[error("path not found: {path}")]
    NotFound { path: String },

    /// Traversal hit a scalar where a collection was required.
    #[error("type error at {path}: cannot traverse {found} with step '{step}'")]
    TypeError {
        path: String,
        found: &'static str,
        step: String,
    },

    /// A transaction callback aborted; no writes were applied.
    #[error("transaction rolled back: {reason}")]
    Rollback { reason: String },
}

/// Concurrent-safe hierarchical store of the composite document.
///
/// All write operations create intermediate mappings as needed. `copy` is
/// cheap and logically isolates further writes from the original.
pub trait DocumentTree: Send + Sync {
    fn find(&self, path: &Path) -> Result<Value, TreeError>;

    fn exists(&self, path: &Path) -> bool;

    fn set(&self, path: &Path, value: Value) -> Result<(), TreeError>;

    fn delete(&self, path: &Path) -> Result<(), TreeError>;

    /// A cheap, logically isolated copy of the whole tree.
    fn copy(&self) -> Arc<dyn DocumentTree>;

    /// Atomically replace the value at `path` iff the current value equals
    /// `old`. Returns whether the swap happened.
    fn compare_and_swap(&self, path: &Path, old: &Value, new: Value) -> Result<bool, TreeError>;

    /// Atomic read-modify-write of a single path.
    fn update(
        &self,
        path: &Path,
        f: &mut dyn FnMut(Value) -> Value,
    ) -> Result<(), TreeError>;

    /// Run `f` against a buffered read/write set. On `Ok` the buffered
    /// writes are applied atomically; on `Err` they are discarded.
    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut Transaction) -> Result<(), TreeError>,
    ) -> Result<(), TreeError>;

    /// A point-in-time materialization of the entire document.
    fn snapshot(&self) -> Value;

    /// Monotonic write counter, incremented on every committed mutation.
    fn version(&self) -> u64;
}

/// Pending write inside a [`Transaction`]: a new value or a deletion.
#[derive(Debug, Clone)]
pub enum PendingWrite {
    Set(Value),
    Delete,
}

/// Buffered read/write set handed to `transaction` callbacks.
///
/// Reads see the transaction's own uncommitted writes first, then the
/// underlying snapshot taken when the transaction began.
pub struct Transaction {
    base: Value,
    writes: Vec<(Path, PendingWrite)>,
    write_index: HashMap<String, usize>,
}

impl Transaction {
    pub(crate) fn new(base: Value) -> Self {
        Transaction {
            base,
            writes: Vec::new(),
            write_index: HashMap::new(),
        }
    }

    pub fn find(&self, path: &Path) -> Result<Value, TreeError> {
        if let Some(&idx) = self.write_index.get(&path.to_string()) {
            return match &self.writes[idx].1 {
                PendingWrite::Set(value) => Ok(value.clone()),
                PendingWrite::Delete => Err(TreeError::NotFound {
                    path: path.to_string(),
                }),
            };
        }
        self.base
            .find(path)
            .cloned()
            .ok_or_else(|| TreeError::NotFound {
                path: path.to_string(),
            })
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.find(path).is_ok()
    }

    pub fn set(&mut self, path: Path, value: Value) {
        self.push(path, PendingWrite::Set(value));
    }

    pub fn delete(&mut self, path: Path) {
        self.push(path, PendingWrite::Delete);
    }

    fn push(&mut self, path: Path, write: PendingWrite) {
        let key = path.to_string();
        if let Some(&idx) = self.write_index.get(&key) {
            self.writes[idx].1 = write;
        } else {
            self.write_index.insert(key, self.writes.len());
            self.writes.push((path, write));
        }
    }

    pub(crate) fn into_writes(self) -> Vec<(Path, PendingWrite)> {
        self.writes
    }
}

/// Write `value` at `path` inside `root`, creating intermediate mappings.
/// Shared by both tree implementations and by transaction commit.
pub(crate) fn write_at(root: &mut Value, path: &Path, value: Value) -> Result<(), TreeError> {
    if path.is_empty() {
        *root = value;
        return Ok(());
    }
    let mut current = root;
    let mut walked = Path::root();
    let steps = path.steps();
    for step in &steps[..steps.len() - 1] {
        walked = walked.child(step.clone());
        current = descend_or_create(current, step, &walked)?;
    }
    let last = &steps[steps.len() - 1];
    match (current, last) {
        (Value::Map(map), Step::Key(key)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (Value::Map(map), Step::Index(i)) => {
            map.insert(i.to_string(), value);
            Ok(())
        }
        (Value::Seq(seq), Step::Index(i)) => {
            if *i < seq.len() {
                seq[*i] = value;
            } else {
                while seq.len() < *i {
                    seq.push(Value::Null);
                }
                seq.push(value);
            }
            Ok(())
        }
        (found, step) => Err(TreeError::TypeError {
            path: path.to_string(),
            found: found.type_name(),
            step: step.to_string(),
        }),
    }
}

fn descend_or_create<'a>(
    current: &'a mut Value,
    step: &Step,
    walked: &Path,
) -> Result<&'a mut Value, TreeError> {
    // replace nulls with a mapping so deep sets work on fresh documents
    if matches!(current, Value::Null) {
        *current = Value::empty_map();
    }
    match (current, step) {
        (Value::Map(map), Step::Key(key)) => Ok(map
            .entry(key.clone())
            .or_insert_with(Value::empty_map)),
        (Value::Map(map), Step::Index(i)) => Ok(map
            .entry(i.to_string())
            .or_insert_with(Value::empty_map)),
        (Value::Seq(seq), Step::Index(i)) => {
            while seq.len() <= *i {
                seq.push(Value::Null);
            }
            let slot = &mut seq[*i];
            if matches!(slot, Value::Null) {
                *slot = Value::empty_map();
            }
            Ok(slot)
        }
        (found, step) => Err(TreeError::TypeError {
            path: walked.to_string(),
            found: found.type_name(),
            step: step.to_string(),
        }),
    }
}

/// Remove the value at `path` inside `root`. Missing paths are an error.
pub(crate) fn delete_at(root: &mut Value, path: &Path) -> Result<(), TreeError> {
    if path.is_empty() {
        *root = Value::empty_map();
        return Ok(());
    }
    let steps = path.steps();
    let mut current = root;
    for step in &steps[..steps.len() - 1] {
        current = match (current, step) {
            (Value::Map(map), Step::Key(key)) => map.get_mut(key),
            (Value::Map(map), Step::Index(i)) => map.get_mut(&i.to_string()),
            (Value::Seq(seq), Step::Index(i)) => seq.get_mut(*i),
            _ => None,
        }
        .ok_or_else(|| TreeError::NotFound {
            path: path.to_string(),
        })?;
    }
    let last = &steps[steps.len() - 1];
    let removed = match (current, last) {
        (Value::Map(map), Step::Key(key)) => map.shift_remove(key).is_some(),
        (Value::Map(map), Step::Index(i)) => map.shift_remove(&i.to_string()).is_some(),
        (Value::Seq(seq), Step::Index(i)) => {
            if *i < seq.len() {
                seq.remove(*i);
                true
            } else {
                false
            }
        }
        _ => false,
    };
    if removed {
        Ok(())
    } else {
        Err(TreeError::NotFound {
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_intermediates() {
        let mut root = Value::empty_map();
        write_at(&mut root, &Path::parse("a.b.c"), Value::Int(1)).unwrap();
        assert_eq!(root.find(&Path::parse("a.b.c")), Some(&Value::Int(1)));
    }

    #[test]
    fn test_write_extends_sequences() {
        let mut root = Value::empty_map();
        write_at(&mut root, &Path::parse("list.2"), Value::Int(9)).unwrap();
        let seq = root.find(&Path::parse("list")).unwrap().as_seq();
        // intermediate step created a mapping keyed "2", not a sequence,
        // because the parent did not exist as a sequence yet
        assert!(seq.is_none());
    }

    #[test]
    fn test_write_type_error_on_scalar_traversal() {
        let mut root = Value::empty_map();
        write_at(&mut root, &Path::parse("a"), Value::Int(1)).unwrap();
        let err = write_at(&mut root, &Path::parse("a.b.c"), Value::Int(2)).unwrap_err();
        assert!(matches!(err, TreeError::TypeError { .. }));
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let mut root = Value::empty_map();
        let err = delete_at(&mut root, &Path::parse("nope")).unwrap_err();
        assert!(matches!(err, TreeError::NotFound { .. }));
    }

    #[test]
    fn test_transaction_reads_see_own_writes() {
        let base = Value::empty_map();
        let mut txn = Transaction::new(base);
        txn.set(Path::parse("x"), Value::Int(5));
        assert_eq!(txn.find(&Path::parse("x")).unwrap(), Value::Int(5));
        txn.delete(Path::parse("x"));
        assert!(txn.find(&Path::parse("x")).is_err());
    }
}
