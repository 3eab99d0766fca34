// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The I/O fabric shared by all external-resource operators.
//!
//! Every external lookup flows through the same stack: result cache, then
//! request deduplication (single-flight), then a pooled client. Wave-level
//! batching runs in front of all of it, publishing multi-item dispatch
//! results through the deduplicator so the per-node fetches that follow
//! find their answers already in place.

pub mod batch;
pub mod cache;
pub mod dedup;
pub mod pool;

pub use batch::{plan, BatchGroup, BatchRequest};
pub use cache::ResultCache;
pub use dedup::Deduplicator;
pub use pool::{Pool, PoolStats, Pooled};

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::adapters::{FileAdapter, SecretStore};
use crate::config::FabricConfig;
use crate::document::Value;
use crate::errors::{EvalError, ExternalErrorKind};
use crate::observability::messages::CacheLoaded;
use crate::observability::{CacheCounters, StructuredLog};

/// Failures produced inside the fabric. Clonable so a single flight can
/// hand the same error to every collapsed caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FabricError {
    #[error("not found: {key}")]
    NotFound { key: String },

    #[error("transport error for {key}: {message}")]
    Transport { key: String, message: String },

    #[error("authentication failed for {key}: {message}")]
    Auth { key: String, message: String },

    #[error("request for {key} timed out")]
    Timeout { key: String },

    #[error("request cancelled")]
    Cancelled,
}

impl FabricError {
    pub fn into_eval(self) -> EvalError {
        match self {
            FabricError::NotFound { key } => EvalError::External {
                key,
                kind: ExternalErrorKind::NotFound,
                message: "no such entry".to_string(),
            },
            FabricError::Transport { key, message } => EvalError::External {
                key,
                kind: ExternalErrorKind::Transport,
                message,
            },
            FabricError::Auth { key, message } => EvalError::External {
                key,
                kind: ExternalErrorKind::Auth,
                message,
            },
            FabricError::Timeout { key } => EvalError::External {
                key,
                kind: ExternalErrorKind::Timeout,
                message: "request timed out".to_string(),
            },
            FabricError::Cancelled => EvalError::Cancelled,
        }
    }
}

pub struct Fabric {
    secrets: Pool<Arc<dyn SecretStore>>,
    files: Pool<Arc<dyn FileAdapter>>,
    dedup: Deduplicator,
    cache: ResultCache,
    request_timeout: Option<Duration>,
    batch_max_group: usize,
    batch_max_wait: Duration,
    cache_dir: Option<PathBuf>,
    cache_prefix: String,
}

impl Fabric {
    pub fn new(
        config: &FabricConfig,
        request_timeout: Option<Duration>,
        secret_factory: impl Fn() -> Arc<dyn SecretStore> + Send + Sync + 'static,
        file_factory: impl Fn() -> Arc<dyn FileAdapter> + Send + Sync + 'static,
    ) -> Self {
        let cache = ResultCache::new(Duration::from_secs(config.cache_ttl_secs));
        if let Some(dir) = &config.cache_dir {
            let (entries, skipped) = cache.load(dir, &config.cache_prefix);
            if entries + skipped > 0 {
                CacheLoaded { entries, skipped }.log();
            }
        }
        Fabric {
            secrets: Pool::new(
                config.pool_size,
                Duration::from_secs(config.idle_secs),
                secret_factory,
            ),
            files: Pool::new(
                config.pool_size,
                Duration::from_secs(config.idle_secs),
                file_factory,
            ),
            dedup: Deduplicator::new(Duration::from_secs(config.dedup_ttl_secs)),
            cache,
            request_timeout,
            batch_max_group: config.batch_max_group,
            batch_max_wait: Duration::from_millis(config.batch_max_wait_ms),
            cache_dir: config.cache_dir.clone(),
            cache_prefix: config.cache_prefix.clone(),
        }
    }

    /// Fetch the full secret record at `logical` (no field selector).
    /// `nocache` skips both the result cache and completed single-flight
    /// entries and always reaches the adapter.
    pub async fn secret(
        &self,
        logical: &str,
        nocache: bool,
        cancel: &CancellationToken,
    ) -> Result<Value, FabricError> {
        if cancel.is_cancelled() {
            return Err(FabricError::Cancelled);
        }
        let key = format!("vault:{}", logical);

        if nocache {
            let client = Arc::clone(&self.secrets.get());
            return client.get(logical).await;
        }

        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let client = Arc::clone(&self.secrets.get());
        let logical_owned = logical.to_string();
        let outcome = self
            .dedup
            .get_or_fetch(&key, self.request_timeout, cancel, move || async move {
                client.get(&logical_owned).await
            })
            .await;
        if let Ok(value) = &outcome {
            self.cache.put(&key, value.clone());
        }
        outcome
    }

    /// Read a file through the adapter; contents are returned as a string
    /// value the way document scalars are.
    pub async fn file(
        &self,
        path: &str,
        nocache: bool,
        cancel: &CancellationToken,
    ) -> Result<Value, FabricError> {
        if cancel.is_cancelled() {
            return Err(FabricError::Cancelled);
        }
        let key = format!("file:{}", path);

        if nocache {
            let client = Arc::clone(&self.files.get());
            let bytes = client.read(path).await?;
            return Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        }

        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let client = Arc::clone(&self.files.get());
        let path_owned = path.to_string();
        let outcome = self
            .dedup
            .get_or_fetch(&key, self.request_timeout, cancel, move || async move {
                let bytes = client.read(&path_owned).await?;
                Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            })
            .await;
        if let Ok(value) = &outcome {
            self.cache.put(&key, value.clone());
        }
        outcome
    }

    /// Dispatch one multi-item call per planned group and publish the
    /// results. Failures are published too: a batched NotFound serves the
    /// operator's own fetch without another adapter round trip.
    pub async fn prefetch(&self, requests: Vec<BatchRequest>, cancel: &CancellationToken) {
        for group in plan(requests, self.batch_max_group) {
            if cancel.is_cancelled() {
                return;
            }
            match group.service {
                "vault" => self.prefetch_secrets(&group).await,
                "file" => self.prefetch_files(&group).await,
                other => {
                    tracing::debug!(service = other, "unknown batch service skipped");
                }
            }
        }
    }

    async fn prefetch_secrets(&self, group: &BatchGroup) {
        let pending: Vec<String> = group
            .keys
            .iter()
            .filter(|logical| {
                let key = format!("vault:{}", logical);
                !self.dedup.has_result(&key) && self.cache.get(&key).is_none()
            })
            .cloned()
            .collect();
        if pending.is_empty() {
            return;
        }
        let client = Arc::clone(&self.secrets.get());
        let results =
            match tokio::time::timeout(self.batch_max_wait.max(self.request_timeout.unwrap_or(self.batch_max_wait)), client.get_many(&pending)).await {
                Ok(results) => results,
                Err(_) => {
                    tracing::warn!(group = %group.target, "batched secret dispatch timed out");
                    return;
                }
            };
        for (logical, outcome) in results {
            let key = format!("vault:{}", logical);
            if let Ok(value) = &outcome {
                self.cache.put(&key, value.clone());
            }
            self.dedup.seed(&key, outcome);
        }
    }

    async fn prefetch_files(&self, group: &BatchGroup) {
        let client = Arc::clone(&self.files.get());
        for path in &group.keys {
            let key = format!("file:{}", path);
            if self.dedup.has_result(&key) || self.cache.get(&key).is_some() {
                continue;
            }
            let outcome = client
                .read(path)
                .await
                .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            if let Ok(value) = &outcome {
                self.cache.put(&key, value.clone());
            }
            self.dedup.seed(&key, outcome);
        }
    }

    /// Best-effort write of the result cache to its configured directory.
    pub fn persist(&self) {
        if let Some(dir) = &self.cache_dir {
            if let Err(e) = self.cache.persist(dir, &self.cache_prefix) {
                tracing::warn!(error = %e, dir = %dir.display(), "result cache persist failed");
            }
        }
    }

    /// Counter snapshot for the metrics surface.
    pub fn counters(&self) -> Vec<CacheCounters> {
        let pool_counters = |name: &'static str, stats: &PoolStats| CacheCounters {
            name,
            hits: stats.hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            evictions: stats.discarded.load(Ordering::Relaxed),
        };
        vec![
            self.cache.counters(),
            pool_counters("secret-pool", self.secrets.stats()),
            pool_counters("file-pool", self.files.stats()),
        ]
    }

    pub fn underlying_calls(&self) -> u64 {
        self.dedup.underlying_calls()
    }
}
