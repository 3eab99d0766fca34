// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! External-resource adapters.
//!
//! Only the contracts are fixed here: a secret store resolving
//! `logical/path:field` lookups and a file reader rooted at a configurable
//! base directory. The in-memory secret store doubles as the test double
//! for every vault scenario; the local file adapter is the production file
//! implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::document::Value;
use crate::fabric::FabricError;

/// Split `logical/path:field` into the record path and the optional field
/// selector. Without a field the whole record is requested.
pub fn split_secret_path(raw: &str) -> (&str, Option<&str>) {
    match raw.rsplit_once(':') {
        Some((path, field)) if !path.is_empty() && !field.contains('/') => (path, Some(field)),
        _ => (raw, None),
    }
}

/// Secret-store contract used by `vault` and `vault-try`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the full record at `path`.
    async fn get(&self, path: &str) -> Result<Value, FabricError>;

    /// Fetch several records; the default implementation loops. Real
    /// stores override this with their multi-read API.
    async fn get_many(
        &self,
        paths: &[String],
    ) -> HashMap<String, Result<Value, FabricError>> {
        let mut results = HashMap::with_capacity(paths.len());
        for path in paths {
            results.insert(path.clone(), self.get(path).await);
        }
        results
    }
}

/// File-adapter contract used by the `file` operator.
#[async_trait]
pub trait FileAdapter: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>, FabricError>;
}

/// In-memory secret store. Counts `get` invocations so tests can assert
/// deduplication and fallback behavior precisely.
#[derive(Default)]
pub struct MemorySecretStore {
    records: DashMap<String, Value>,
    calls: AtomicU64,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, record: Value) {
        self.records.insert(path.to_string(), record);
    }

    /// Convenience: store a single-field record.
    pub fn insert_field(&self, path: &str, field: &str, value: &str) {
        let mut map = indexmap::IndexMap::new();
        map.insert(field.to_string(), Value::String(value.to_string()));
        self.insert(path, Value::Map(map));
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, path: &str) -> Result<Value, FabricError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .get(path)
            .map(|record| record.clone())
            .ok_or_else(|| FabricError::NotFound {
                key: path.to_string(),
            })
    }
}

/// Reads files relative to a configured base directory (or the process
/// working directory when none is set).
pub struct LocalFileAdapter {
    base: Option<PathBuf>,
}

impl LocalFileAdapter {
    pub fn new(base: Option<PathBuf>) -> Self {
        LocalFileAdapter { base }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.base {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        }
    }
}

#[async_trait]
impl FileAdapter for LocalFileAdapter {
    async fn read(&self, path: &str) -> Result<Vec<u8>, FabricError> {
        let resolved = self.resolve(path);
        tokio::fs::read(&resolved).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FabricError::NotFound {
                    key: resolved.display().to_string(),
                }
            } else {
                FabricError::Transport {
                    key: resolved.display().to_string(),
                    message: e.to_string(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_secret_path() {
        assert_eq!(split_secret_path("secret/db:password"), ("secret/db", Some("password")));
        assert_eq!(split_secret_path("secret/db"), ("secret/db", None));
        // a colon inside a path segment is not a field selector
        assert_eq!(split_secret_path("secret/a:b/c"), ("secret/a:b/c", None));
    }

    #[tokio::test]
    async fn test_memory_store_counts_calls() {
        let store = MemorySecretStore::new();
        store.insert_field("secret/db", "password", "hunter2");

        let record = store.get("secret/db").await.unwrap();
        assert_eq!(
            record.find(&crate::document::Path::parse("password")),
            Some(&Value::String("hunter2".into()))
        );
        assert!(matches!(
            store.get("secret/nope").await,
            Err(FabricError::NotFound { .. })
        ));
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_get_many_default_loops() {
        let store = MemorySecretStore::new();
        store.insert_field("a", "f", "1");
        let results = store
            .get_many(&["a".to_string(), "b".to_string()])
            .await;
        assert!(results["a"].is_ok());
        assert!(results["b"].is_err());
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_local_file_adapter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), b"contents").unwrap();

        let adapter = LocalFileAdapter::new(Some(dir.path().to_path_buf()));
        assert_eq!(adapter.read("note.txt").await.unwrap(), b"contents");
        assert!(matches!(
            adapter.read("missing.txt").await,
            Err(FabricError::NotFound { .. })
        ));
    }
}
