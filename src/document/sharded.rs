// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Sharded-lock document tree.
//!
//! The top-level key space is partitioned into N shards, each guarded by its
//! own reader/writer lock. The shard index is a stable hash of the first
//! path step, so a write to `jobs.0.name` only contends with other writes
//! under `jobs`. Multi-shard operations (snapshot, transaction commit, root
//! replacement) acquire shard locks in ascending index order, which keeps
//! lock acquisition deadlock-free.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::path::{Path, Step};
use super::tree::{delete_at, write_at, DocumentTree, PendingWrite, Transaction, TreeError};
use super::value::Value;

const DEFAULT_SHARD_COUNT: usize = 32;

pub struct ShardedTree {
    shards: Vec<RwLock<IndexMap<String, Value>>>,
    /// Document order of top-level keys; only locked when keys appear or
    /// disappear, never for subtree reads.
    key_order: RwLock<Vec<String>>,
    version: AtomicU64,
}

impl ShardedTree {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.clamp(1, 1024);
        ShardedTree {
            shards: (0..shard_count).map(|_| RwLock::new(IndexMap::new())).collect(),
            key_order: RwLock::new(Vec::new()),
            version: AtomicU64::new(0),
        }
    }

    pub fn from_value(root: Value) -> Self {
        Self::from_value_with_shards(root, DEFAULT_SHARD_COUNT)
    }

    pub fn from_value_with_shards(root: Value, shard_count: usize) -> Self {
        let tree = Self::new(shard_count);
        tree.load(root);
        tree
    }

    fn load(&self, root: Value) {
        let map = match root {
            Value::Map(map) => map,
            Value::Null => IndexMap::new(),
            other => {
                let mut map = IndexMap::new();
                map.insert("document".to_string(), other);
                map
            }
        };
        let mut order = self.key_order.write();
        for (key, value) in map {
            let idx = self.shard_index(&key);
            self.shards[idx].write().insert(key.clone(), value);
            order.push(key);
        }
    }

    fn shard_index(&self, key: &str) -> usize {
        // FNV-1a; stable across runs so shard placement is reproducible
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in key.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % self.shards.len() as u64) as usize
    }

    fn first_key(path: &Path) -> Option<String> {
        path.first().map(|step| match step {
            Step::Key(k) => k.clone(),
            Step::Index(i) => i.to_string(),
        })
    }

    fn rest(path: &Path) -> Path {
        Path::from_steps(path.steps()[1..].to_vec())
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    /// Replace the whole document. Locks every shard in ascending order.
    fn set_root(&self, value: Value) {
        let mut order = self.key_order.write();
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.write()).collect();
        for guard in guards.iter_mut() {
            guard.clear();
        }
        order.clear();
        if let Value::Map(map) = value {
            for (key, value) in map {
                let idx = self.shard_index(&key);
                guards[idx].insert(key.clone(), value);
                order.push(key);
            }
        }
        self.bump();
    }

    fn apply_write(
        &self,
        order: &mut Vec<String>,
        shard: &mut IndexMap<String, Value>,
        key: String,
        rest: Path,
        write: PendingWrite,
    ) -> Result<(), TreeError> {
        match write {
            PendingWrite::Set(value) => {
                if rest.is_empty() {
                    if shard.insert(key.clone(), value).is_none() {
                        order.push(key);
                    }
                } else {
                    let entry = shard.entry(key.clone()).or_insert_with(|| {
                        order.push(key.clone());
                        Value::empty_map()
                    });
                    write_at(entry, &rest, value)?;
                }
                Ok(())
            }
            PendingWrite::Delete => {
                if rest.is_empty() {
                    if shard.shift_remove(&key).is_none() {
                        return Err(TreeError::NotFound { path: key });
                    }
                    order.retain(|k| k != &key);
                    Ok(())
                } else {
                    let entry = shard.get_mut(&key).ok_or_else(|| TreeError::NotFound {
                        path: key.clone(),
                    })?;
                    delete_at(entry, &rest)
                }
            }
        }
    }
}

impl DocumentTree for ShardedTree {
    fn find(&self, path: &Path) -> Result<Value, TreeError> {
        if path.is_empty() {
            return Ok(self.snapshot());
        }
        let key = Self::first_key(path).expect("non-empty path has a first step");
        let shard = self.shards[self.shard_index(&key)].read();
        let top = shard.get(&key).ok_or_else(|| TreeError::NotFound {
            path: path.to_string(),
        })?;
        top.find(&Self::rest(path))
            .cloned()
            .ok_or_else(|| TreeError::NotFound {
                path: path.to_string(),
            })
    }

    fn exists(&self, path: &Path) -> bool {
        self.find(path).is_ok()
    }

    fn set(&self, path: &Path, value: Value) -> Result<(), TreeError> {
        if path.is_empty() {
            self.set_root(value);
            return Ok(());
        }
        let key = Self::first_key(path).expect("non-empty path has a first step");
        let mut order = self.key_order.write();
        let mut shard = self.shards[self.shard_index(&key)].write();
        self.apply_write(&mut order, &mut shard, key, Self::rest(path), PendingWrite::Set(value))?;
        self.bump();
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<(), TreeError> {
        if path.is_empty() {
            self.set_root(Value::empty_map());
            return Ok(());
        }
        let key = Self::first_key(path).expect("non-empty path has a first step");
        let mut order = self.key_order.write();
        let mut shard = self.shards[self.shard_index(&key)].write();
        self.apply_write(
            &mut order,
            &mut shard,
            key,
            Self::rest(path),
            PendingWrite::Delete,
        )?;
        self.bump();
        Ok(())
    }

    fn copy(&self) -> Arc<dyn DocumentTree> {
        Arc::new(ShardedTree::from_value_with_shards(
            self.snapshot(),
            self.shards.len(),
        ))
    }

    fn compare_and_swap(&self, path: &Path, old: &Value, new: Value) -> Result<bool, TreeError> {
        if path.is_empty() {
            return Err(TreeError::TypeError {
                path: "$".to_string(),
                found: "mapping",
                step: "compare_and_swap at root".to_string(),
            });
        }
        let key = Self::first_key(path).expect("non-empty path has a first step");
        let mut order = self.key_order.write();
        let mut shard = self.shards[self.shard_index(&key)].write();
        let rest = Self::rest(path);
        let matches = shard
            .get(&key)
            .and_then(|top| if rest.is_empty() { Some(top) } else { top.find(&rest) })
            .map(|current| current == old)
            .unwrap_or(false);
        if !matches {
            return Ok(false);
        }
        self.apply_write(&mut order, &mut shard, key, rest, PendingWrite::Set(new))?;
        self.bump();
        Ok(true)
    }

    fn update(
        &self,
        path: &Path,
        f: &mut dyn FnMut(Value) -> Value,
    ) -> Result<(), TreeError> {
        if path.is_empty() {
            let snapshot = self.snapshot();
            self.set_root(f(snapshot));
            return Ok(());
        }
        let key = Self::first_key(path).expect("non-empty path has a first step");
        let mut order = self.key_order.write();
        let mut shard = self.shards[self.shard_index(&key)].write();
        let rest = Self::rest(path);
        let current = shard
            .get(&key)
            .and_then(|top| if rest.is_empty() { Some(top.clone()) } else { top.find(&rest).cloned() })
            .ok_or_else(|| TreeError::NotFound {
                path: path.to_string(),
            })?;
        let next = f(current);
        self.apply_write(&mut order, &mut shard, key, rest, PendingWrite::Set(next))?;
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

        // commit: covering shard set in ascending index order
        let mut order = self.key_order.write();
        let mut shard_indices: Vec<usize> = writes
            .iter()
            .filter_map(|(path, _)| Self::first_key(path))
            .map(|key| self.shard_index(&key))
            .collect();
        shard_indices.sort_unstable();
        shard_indices.dedup();
        let mut guards: IndexMap<usize, _> = shard_indices
            .into_iter()
            .map(|idx| (idx, self.shards[idx].write()))
            .collect();

        for (path, write) in writes {
            let key = match Self::first_key(&path) {
                Some(key) => key,
                None => continue,
            };
            let idx = self.shard_index(&key);
            let shard = guards.get_mut(&idx).expect("covering shard was locked");
            self.apply_write(&mut order, shard, key, Self::rest(&path), write)?;
        }
        self.bump();
        Ok(())
    }

    fn snapshot(&self) -> Value {
        let order = self.key_order.read();
        let guards: Vec<_> = self.shards.iter().map(|s| s.read()).collect();
        let mut map = IndexMap::with_capacity(order.len());
        for key in order.iter() {
            let idx = self.shard_index(key);
            if let Some(value) = guards[idx].get(key) {
                map.insert(key.clone(), value.clone());
            }
        }
        Value::Map(map)
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(text: &str) -> ShardedTree {
        ShardedTree::from_value(Value::from_yaml(&serde_yaml::from_str(text).unwrap()))
    }

    #[test]
    fn test_find_and_set() {
        let tree = tree("a: 1\nb:\n  c: 2\n");
        assert_eq!(tree.find(&Path::parse("b.c")).unwrap(), Value::Int(2));
        tree.set(&Path::parse("b.d"), Value::Int(3)).unwrap();
        assert_eq!(tree.find(&Path::parse("b.d")).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_snapshot_preserves_top_level_order() {
        let tree = tree("zebra: 1\nalpha: 2\nmiddle: 3\n");
        let snapshot = tree.snapshot();
        let keys: Vec<_> = snapshot.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zebra", "alpha", "middle"]);
    }

    #[test]
    fn test_compare_and_swap_semantics() {
        let tree = tree("counter: 1\n");
        let path = Path::parse("counter");

        let swapped = tree
            .compare_and_swap(&path, &Value::Int(1), Value::Int(2))
            .unwrap();
        assert!(swapped);
        assert_eq!(tree.find(&path).unwrap(), Value::Int(2));

        let swapped = tree
            .compare_and_swap(&path, &Value::Int(1), Value::Int(3))
            .unwrap();
        assert!(!swapped);
        assert_eq!(tree.find(&path).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_transaction_commit() {
        let tree = tree("a: 1\n");
        tree.transaction(&mut |txn| {
            let a = txn.find(&Path::parse("a"))?;
            txn.set(Path::parse("b"), a);
            txn.set(Path::parse("a"), Value::Int(10));
            Ok(())
        })
        .unwrap();
        assert_eq!(tree.find(&Path::parse("a")).unwrap(), Value::Int(10));
        assert_eq!(tree.find(&Path::parse("b")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_transaction_rollback_leaves_tree_untouched() {
        let tree = tree("a: 1\n");
        let before = tree.snapshot();
        let result = tree.transaction(&mut |txn| {
            txn.set(Path::parse("a"), Value::Int(99));
            txn.set(Path::parse("b"), Value::Int(100));
            Err(TreeError::Rollback {
                reason: "abort".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(tree.snapshot(), before);
    }

    #[test]
    fn test_update_is_read_modify_write() {
        let tree = tree("n: 40\n");
        tree.update(&Path::parse("n"), &mut |v| match v {
            Value::Int(i) => Value::Int(i + 2),
            other => other,
        })
        .unwrap();
        assert_eq!(tree.find(&Path::parse("n")).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_copy_isolates_writes() {
        let tree = tree("a: 1\n");
        let copy = tree.copy();
        copy.set(&Path::parse("a"), Value::Int(2)).unwrap();
        assert_eq!(tree.find(&Path::parse("a")).unwrap(), Value::Int(1));
        assert_eq!(copy.find(&Path::parse("a")).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_version_increments_on_writes() {
        let tree = tree("a: 1\n");
        let v0 = tree.version();
        tree.set(&Path::parse("b"), Value::Int(1)).unwrap();
        tree.delete(&Path::parse("b")).unwrap();
        assert!(tree.version() >= v0 + 2);
    }

    #[test]
    fn test_concurrent_disjoint_writes() {
        let tree = Arc::new(tree("a: 0\nb: 0\nc: 0\nd: 0\n"));
        let mut handles = Vec::new();
        for key in ["a", "b", "c", "d"] {
            let tree = tree.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    tree.set(&Path::parse(key), Value::Int(i)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        for key in ["a", "b", "c", "d"] {
            assert_eq!(tree.find(&Path::parse(key)).unwrap(), Value::Int(99));
        }
    }
}
