// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Engine configuration.
//!
//! An explicit configuration struct populated from a layered source:
//! compiled defaults, then an optional YAML file, then environment
//! variables (`LAYERCAKE_*`). Each field has an enumerated recognized set;
//! unknown keys in a config file produce warnings, not errors.
//!
//! # Example
//! ```yaml
//! parallel: true
//! max_concurrency: 8
//! tree: sharded
//! shard_count: 32
//! parse_cache:
//!   capacity: 1024
//!   ttl_secs: 600
//! fabric:
//!   pool_size: 4
//!   cache_ttl_secs: 300
//!   cache_dir: /tmp/layercake-cache
//! timeouts:
//!   operator_secs: 30
//! ```

use serde::Deserialize;
use std::path::{Path as FsPath, PathBuf};
use std::time::Duration;

/// Which document tree implementation the evaluator runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    /// Sharded-lock tree; near-linear scaling under low write contention.
    Sharded,
    /// Copy-on-write tree; cheap snapshots for parallel evaluation.
    Cow,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParseCacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for ParseCacheConfig {
    fn default() -> Self {
        ParseCacheConfig {
            capacity: 1024,
            ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Maximum pooled clients per external service kind.
    pub pool_size: usize,
    /// Idle seconds before a pooled client is discarded.
    pub idle_secs: u64,
    /// Lifetime of a collapsed in-flight request entry.
    pub dedup_ttl_secs: u64,
    /// Result cache entry lifetime.
    pub cache_ttl_secs: u64,
    /// When set, the result cache persists to this directory as JSON.
    pub cache_dir: Option<PathBuf>,
    /// File-name prefix for the persisted cache index.
    pub cache_prefix: String,
    /// Base directory for the `file` operator.
    pub file_base: Option<PathBuf>,
    /// Largest multi-item group a single batched dispatch may carry.
    pub batch_max_group: usize,
    /// Upper bound on how long a batch group may wait before dispatch.
    pub batch_max_wait_ms: u64,
}

impl Default for FabricConfig {
    fn default() -> Self {
        FabricConfig {
            pool_size: 4,
            idle_secs: 60,
            dedup_ttl_secs: 30,
            cache_ttl_secs: 300,
            cache_dir: None,
            cache_prefix: "layercake".to_string(),
            file_base: None,
            batch_max_group: 16,
            batch_max_wait_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per external-operator call.
    pub operator_secs: Option<u64>,
    /// Per execution wave.
    pub wave_secs: Option<u64>,
    /// Whole evaluator run.
    pub run_secs: Option<u64>,
}

impl TimeoutConfig {
    pub fn operator(&self) -> Option<Duration> {
        self.operator_secs.map(Duration::from_secs)
    }

    pub fn wave(&self) -> Option<Duration> {
        self.wave_secs.map(Duration::from_secs)
    }

    pub fn run(&self) -> Option<Duration> {
        self.run_secs.map(Duration::from_secs)
    }
}

/// Complete engine configuration; see the module docs for the file shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parallel: bool,
    pub max_concurrency: Option<usize>,
    pub tree: TreeKind,
    pub shard_count: usize,
    /// Reject expressions naming unregistered operators at parse time.
    pub strict_operators: bool,
    pub parse_cache: ParseCacheConfig,
    pub fabric: FabricConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parallel: true,
            max_concurrency: None,
            tree: TreeKind::Sharded,
            shard_count: 32,
            strict_operators: false,
            parse_cache: ParseCacheConfig::default(),
            fabric: FabricConfig::default(),
            timeouts: TimeoutConfig {
                operator_secs: Some(30),
                wave_secs: None,
                run_secs: None,
            },
        }
    }
}

impl EngineConfig {
    /// Effective worker-pool width: configured value, else CPU count, else 4.
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Layered load: defaults < file < environment.
    pub fn load(path: Option<&FsPath>) -> Result<EngineConfig, String> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => EngineConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &FsPath) -> Result<EngineConfig, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file {}: {}", path.display(), e))?;
        warn_unknown_keys(&contents);
        serde_yaml::from_str(&contents)
            .map_err(|e| format!("failed to parse config file {}: {}", path.display(), e))
    }

    /// Environment overrides. Unparseable values are warnings; the previous
    /// layer's value stays in effect.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var("LAYERCAKE_PARALLEL") {
            match raw.parse::<bool>() {
                Ok(value) => self.parallel = value,
                Err(_) => tracing::warn!(value = %raw, "ignoring unparseable LAYERCAKE_PARALLEL"),
            }
        }
        if let Ok(raw) = std::env::var("LAYERCAKE_MAX_CONCURRENCY") {
            match raw.parse::<usize>() {
                Ok(value) => self.max_concurrency = Some(value),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring unparseable LAYERCAKE_MAX_CONCURRENCY")
                }
            }
        }
        if let Ok(raw) = std::env::var("LAYERCAKE_TREE") {
            match raw.as_str() {
                "sharded" => self.tree = TreeKind::Sharded,
                "cow" => self.tree = TreeKind::Cow,
                other => tracing::warn!(value = %other, "ignoring unknown LAYERCAKE_TREE"),
            }
        }
        if let Ok(raw) = std::env::var("LAYERCAKE_FILE_BASE") {
            self.fabric.file_base = Some(PathBuf::from(raw));
        }
        if let Ok(raw) = std::env::var("LAYERCAKE_CACHE_DIR") {
            self.fabric.cache_dir = Some(PathBuf::from(raw));
        }
    }
}

const KNOWN_TOP_LEVEL: &[&str] = &[
    "parallel",
    "max_concurrency",
    "tree",
    "shard_count",
    "strict_operators",
    "parse_cache",
    "fabric",
    "timeouts",
];

fn warn_unknown_keys(contents: &str) {
    let Ok(serde_yaml::Value::Mapping(mapping)) =
        serde_yaml::from_str::<serde_yaml::Value>(contents)
    else {
        return;
    };
    for key in mapping.keys() {
        if let serde_yaml::Value::String(key) = key {
            if !KNOWN_TOP_LEVEL.contains(&key.as_str()) {
                tracing::warn!(key = %key, "unknown configuration key ignored");
            }
        }
    }
}
