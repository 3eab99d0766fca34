// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The explicit engine context.
//!
//! Everything that used to be a process-global — operator registry, parse
//! cache, I/O fabric, metrics — lives in one context object built once at
//! startup and passed into every evaluator. Teardown is explicit: dropping
//! the context after `persist()` is the whole lifecycle.

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{FileAdapter, LocalFileAdapter, MemorySecretStore, SecretStore};
use crate::config::EngineConfig;
use crate::expr::ParseCache;
use crate::fabric::Fabric;
use crate::observability::{MetricsRegistry, MetricsSnapshot};
use crate::operators::OperatorRegistry;

pub struct EngineContext {
    pub registry: Arc<OperatorRegistry>,
    pub config: EngineConfig,
    pub fabric: Arc<Fabric>,
    pub metrics: Arc<MetricsRegistry>,
    pub parse_cache: Arc<ParseCache>,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        registry: Arc<OperatorRegistry>,
        fabric: Arc<Fabric>,
    ) -> Self {
        let parse_cache = Arc::new(ParseCache::new(
            config.parse_cache.capacity,
            Duration::from_secs(config.parse_cache.ttl_secs),
        ));
        EngineContext {
            registry,
            config,
            fabric,
            metrics: Arc::new(MetricsRegistry::new()),
            parse_cache,
        }
    }

    /// Built-in registry, an empty in-memory secret store, and local file
    /// access. The default wiring for the CLI and for tests that do not
    /// exercise external services.
    pub fn with_defaults(config: EngineConfig) -> Self {
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        Self::with_adapters(config, secrets, None)
    }

    /// Default registry with caller-supplied adapters.
    pub fn with_adapters(
        config: EngineConfig,
        secrets: Arc<dyn SecretStore>,
        files: Option<Arc<dyn FileAdapter>>,
    ) -> Self {
        let files: Arc<dyn FileAdapter> = files.unwrap_or_else(|| {
            Arc::new(LocalFileAdapter::new(config.fabric.file_base.clone()))
        });
        let fabric = Arc::new(Fabric::new(
            &config.fabric,
            config.timeouts.operator(),
            move || secrets.clone(),
            move || files.clone(),
        ));
        Self::new(
            config,
            Arc::new(OperatorRegistry::with_builtins()),
            fabric,
        )
    }

    /// Point-in-time metrics including cache and pool counters.
    pub fn snapshot_metrics(&self) -> MetricsSnapshot {
        let mut caches = self.fabric.counters();
        let (hits, misses, evictions) = self.parse_cache.stats();
        caches.push(crate::observability::CacheCounters {
            name: "parse",
            hits,
            misses,
            evictions,
        });
        self.metrics.snapshot(caches)
    }

    /// Flush the persisted result cache, if configured.
    pub fn persist(&self) {
        self.fabric.persist();
    }
}
