// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Copy-on-write document tree.
//!
//! Interior nodes are reference-counted; a node is "shared" exactly when its
//! strong count exceeds one. A write clones only the spine from the root to
//! the touched node (`Arc::make_mut`), leaving untouched subtrees shared
//! with every other holder. `copy()` is O(1): the new tree references the
//! same root, and the first write on either side peels its own spine.
//!
//! Reads take the root pointer under a brief lock and then walk entirely
//! lock-free, which is what makes this implementation the right profile for
//! snapshot-heavy parallel evaluation.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::path::{Path, Step};
use super::tree::{DocumentTree, PendingWrite, Transaction, TreeError};
use super::value::Value;

#[derive(Debug, Clone)]
enum Node {
    Scalar(Value),
    Seq(Vec<Arc<Node>>),
    Map(IndexMap<String, Arc<Node>>),
}

impl Node {
    fn from_value(value: &Value) -> Node {
        match value {
            Value::Seq(items) => {
                Node::Seq(items.iter().map(|v| Arc::new(Node::from_value(v))).collect())
            }
            Value::Map(map) => Node::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Arc::new(Node::from_value(v))))
                    .collect(),
            ),
            scalar => Node::Scalar(scalar.clone()),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Node::Scalar(value) => value.clone(),
            Node::Seq(items) => Value::Seq(items.iter().map(|n| n.to_value()).collect()),
            Node::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, n)| (k.clone(), n.to_value()))
                    .collect(),
            ),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Node::Scalar(value) => value.type_name(),
            Node::Seq(_) => "sequence",
            Node::Map(_) => "mapping",
        }
    }

    fn descend(&self, step: &Step) -> Option<&Arc<Node>> {
        match (self, step) {
            (Node::Map(map), Step::Key(k)) => map.get(k),
            (Node::Map(map), Step::Index(i)) => map.get(&i.to_string()),
            (Node::Seq(seq), Step::Index(i)) => seq.get(*i),
            _ => None,
        }
    }
}

pub struct CowTree {
    root: RwLock<Arc<Node>>,
    version: AtomicU64,
}

impl CowTree {
    pub fn from_value(root: Value) -> Self {
        CowTree {
            root: RwLock::new(Arc::new(Node::from_value(&root))),
            version: AtomicU64::new(0),
        }
    }

    fn root_snapshot(&self) -> Arc<Node> {
        self.root.read().clone()
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    fn find_node(&self, path: &Path) -> Option<Arc<Node>> {
        let mut current = self.root_snapshot();
        for step in path.steps() {
            let next = current.descend(step)?.clone();
            current = next;
        }
        Some(current)
    }

    fn set_in(
        node: &mut Arc<Node>,
        steps: &[Step],
        full: &Path,
        value: Value,
    ) -> Result<(), TreeError> {
        if steps.is_empty() {
            *node = Arc::new(Node::from_value(&value));
            return Ok(());
        }
        let inner = Arc::make_mut(node);
        if matches!(inner, Node::Scalar(Value::Null)) {
            *inner = Node::Map(IndexMap::new());
        }
        match (inner, &steps[0]) {
            (Node::Map(map), Step::Key(k)) => {
                let child = map
                    .entry(k.clone())
                    .or_insert_with(|| Arc::new(Node::Scalar(Value::Null)));
                Self::set_in(child, &steps[1..], full, value)
            }
            (Node::Map(map), Step::Index(i)) => {
                let child = map
                    .entry(i.to_string())
                    .or_insert_with(|| Arc::new(Node::Scalar(Value::Null)));
                Self::set_in(child, &steps[1..], full, value)
            }
            (Node::Seq(seq), Step::Index(i)) => {
                while seq.len() <= *i {
                    seq.push(Arc::new(Node::Scalar(Value::Null)));
                }
                Self::set_in(&mut seq[*i], &steps[1..], full, value)
            }
            (found, step) => Err(TreeError::TypeError {
                path: full.to_string(),
                found: found.type_name(),
                step: step.to_string(),
            }),
        }
    }

    fn delete_in(node: &mut Arc<Node>, steps: &[Step], full: &Path) -> Result<(), TreeError> {
        let not_found = || TreeError::NotFound {
            path: full.to_string(),
        };
        if steps.is_empty() {
            *node = Arc::new(Node::Map(IndexMap::new()));
            return Ok(());
        }
        let inner = Arc::make_mut(node);
        if steps.len() == 1 {
            let removed = match (inner, &steps[0]) {
                (Node::Map(map), Step::Key(k)) => map.shift_remove(k).is_some(),
                (Node::Map(map), Step::Index(i)) => map.shift_remove(&i.to_string()).is_some(),
                (Node::Seq(seq), Step::Index(i)) => {
                    if *i < seq.len() {
                        seq.remove(*i);
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            };
            return if removed { Ok(()) } else { Err(not_found()) };
        }
        match (inner, &steps[0]) {
            (Node::Map(map), Step::Key(k)) => {
                let child = map.get_mut(k).ok_or_else(not_found)?;
                Self::delete_in(child, &steps[1..], full)
            }
            (Node::Map(map), Step::Index(i)) => {
                let child = map.get_mut(&i.to_string()).ok_or_else(not_found)?;
                Self::delete_in(child, &steps[1..], full)
            }
            (Node::Seq(seq), Step::Index(i)) => {
                let child = seq.get_mut(*i).ok_or_else(not_found)?;
                Self::delete_in(child, &steps[1..], full)
            }
            _ => Err(not_found()),
        }
    }
}

impl DocumentTree for CowTree {
    fn find(&self, path: &Path) -> Result<Value, TreeError> {
        self.find_node(path)
            .map(|node| node.to_value())
            .ok_or_else(|| TreeError::NotFound {
                path: path.to_string(),
            })
    }

    fn exists(&self, path: &Path) -> bool {
        self.find_node(path).is_some()
    }

    fn set(&self, path: &Path, value: Value) -> Result<(), TreeError> {
        let mut root = self.root.write();
        Self::set_in(&mut root, path.steps(), path, value)?;
        self.bump();
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<(), TreeError> {
        let mut root = self.root.write();
        Self::delete_in(&mut root, path.steps(), path)?;
        self.bump();
        Ok(())
    }

    fn copy(&self) -> Arc<dyn DocumentTree> {
        Arc::new(CowTree {
            root: RwLock::new(self.root_snapshot()),
            version: AtomicU64::new(0),
        })
    }

    fn compare_and_swap(&self, path: &Path, old: &Value, new: Value) -> Result<bool, TreeError> {
        let mut root = self.root.write();
        let mut current: &Arc<Node> = &root;
        for step in path.steps() {
            match current.descend(step) {
                Some(next) => current = next,
                None => return Ok(false),
            }
        }
        if current.to_value() != *old {
            return Ok(false);
        }
        Self::set_in(&mut root, path.steps(), path, new)?;
        self.bump();
        Ok(true)
    }

    fn update(
        &self,
        path: &Path,
        f: &mut dyn FnMut(Value) -> Value,
    ) -> Result<(), TreeError> {
        let mut root = self.root.write();
        let mut current: &Arc<Node> = &root;
        for step in path.steps() {
            current = current.descend(step).ok_or_else(|| TreeError::NotFound {
                path: path.to_string(),
            })?;
        }
        let next = f(current.to_value());
        Self::set_in(&mut root, path.steps(), path, next)?;
        self.bump();
        Ok(())
    }

    fn transaction(
        &self,
        f: &mut dyn FnMut(&mut Transaction) -> Result<(), TreeError>,
    ) -> Result<(), TreeError> {
        let mut txn = Transaction::new(self.snapshot());
        f(&mut txn)?;
        let writes = txn.into_writes();
        if writes.is_empty() {
            return Ok(());
        }
        let mut root = self.root.write();
        for (path, write) in writes {
            match write {
                PendingWrite::Set(value) => {
                    Self::set_in(&mut root, path.steps(), &path, value)?
                }
                PendingWrite::Delete => Self::delete_in(&mut root, path.steps(), &path)?,
            }
        }
        self.bump();
        Ok(())
    }

    fn snapshot(&self) -> Value {
        self.root_snapshot().to_value()
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(text: &str) -> CowTree {
        CowTree::from_value(Value::from_yaml(&serde_yaml::from_str(text).unwrap()))
    }

    #[test]
    fn test_find_and_set() {
        let tree = tree("a:\n  b: 1\n");
        assert_eq!(tree.find(&Path::parse("a.b")).unwrap(), Value::Int(1));
        tree.set(&Path::parse("a.c"), Value::Int(2)).unwrap();
        assert_eq!(tree.find(&Path::parse("a.c")).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_copy_shares_until_write() {
        let original = tree("a:\n  b: 1\nother:\n  big: data\n");
        let copy = original.copy();

        copy.set(&Path::parse("a.b"), Value::Int(2)).unwrap();
        assert_eq!(original.find(&Path::parse("a.b")).unwrap(), Value::Int(1));
        assert_eq!(copy.find(&Path::parse("a.b")).unwrap(), Value::Int(2));

        // untouched subtree still identical on both sides
        assert_eq!(
            original.find(&Path::parse("other.big")).unwrap(),
            copy.find(&Path::parse("other.big")).unwrap()
        );
    }

    #[test]
    fn test_writes_on_original_do_not_leak_into_copy() {
        let original = tree("a: 1\n");
        let copy = original.copy();
        original.set(&Path::parse("a"), Value::Int(7)).unwrap();
        assert_eq!(copy.find(&Path::parse("a")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_version_counter() {
        let tree = tree("a: 1\n");
        assert_eq!(tree.version(), 0);
        tree.set(&Path::parse("b"), Value::Null).unwrap();
        tree.delete(&Path::parse("b")).unwrap();
        assert_eq!(tree.version(), 2);
    }

    #[test]
    fn test_compare_and_swap() {
        let tree = tree("x: old\n");
        let path = Path::parse("x");
        assert!(tree
            .compare_and_swap(&path, &Value::String("old".into()), Value::String("new".into()))
            .unwrap());
        assert!(!tree
            .compare_and_swap(&path, &Value::String("old".into()), Value::String("again".into()))
            .unwrap());
        assert_eq!(tree.find(&path).unwrap(), Value::String("new".into()));
    }

    #[test]
    fn test_transaction_rollback() {
        let tree = tree("a: 1\n");
        let before = tree.snapshot();
        let result = tree.transaction(&mut |txn| {
            txn.set(Path::parse("a"), Value::Int(5));
            Err(TreeError::Rollback {
                reason: "nope".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(tree.snapshot(), before);
        assert_eq!(tree.version(), 0);
    }

    #[test]
    fn test_deep_set_creates_intermediates() {
        let tree = tree("{}");
        tree.set(&Path::parse("a.b.c"), Value::Bool(true)).unwrap();
        assert_eq!(tree.find(&Path::parse("a.b.c")).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_snapshot_is_stable_under_later_writes() {
        let tree = tree("a: 1\n");
        let snapshot = tree.snapshot();
        tree.set(&Path::parse("a"), Value::Int(2)).unwrap();
        assert_eq!(snapshot.find(&Path::parse("a")), Some(&Value::Int(1)));
    }
}
