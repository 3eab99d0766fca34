// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! External-lookup result cache with optional on-disk persistence.
//!
//! Keys are the full request identity (`vault:secret/thing`,
//! `file:config/cert.pem`). Persistence is best-effort: the directory holds
//! `<prefix>_index.json` mapping logical keys to entry files, and one JSON
//! file per entry; corrupt or expired files are silently skipped on load.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::document::Value;
use crate::observability::CacheCounters;

struct Entry {
    value: Value,
    inserted: Instant,
    ttl: Duration,
    hit_count: u64,
    last_accessed: u64,
}

pub struct ResultCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// On-disk shape of one cache entry.
#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    value: serde_json::Value,
    timestamp: u64,
    ttl_seconds: u64,
    hit_count: u64,
    last_accessed: u64,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        ResultCache {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        // the shard guard must drop before any remove on the same key
        let mut expired = false;
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.inserted.elapsed() <= entry.ttl {
                entry.hit_count += 1;
                entry.last_accessed = unix_now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            expired = true;
        }
        if expired {
            self.entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: &str, value: Value) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted: Instant::now(),
                ttl: self.ttl,
                hit_count: 0,
                last_accessed: unix_now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            name: "result",
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Write every live entry to `dir` under `prefix`. Errors are returned
    /// but callers treat persistence as best-effort.
    pub fn persist(&self, dir: &FsPath, prefix: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut index: HashMap<String, String> = HashMap::new();
        for item in self.entries.iter() {
            if item.inserted.elapsed() > item.ttl {
                continue;
            }
            let file_name = format!("{}_{:016x}.json", prefix, key_hash(item.key()));
            let remaining = item.ttl.saturating_sub(item.inserted.elapsed());
            let persisted = PersistedEntry {
                value: item.value.to_json(),
                timestamp: unix_now(),
                ttl_seconds: remaining.as_secs(),
                hit_count: item.hit_count,
                last_accessed: item.last_accessed,
            };
            std::fs::write(
                dir.join(&file_name),
                serde_json::to_vec_pretty(&persisted)?,
            )?;
            index.insert(item.key().clone(), file_name);
        }
        std::fs::write(
            dir.join(format!("{}_index.json", prefix)),
            serde_json::to_vec_pretty(&index)?,
        )?;
        Ok(())
    }

    /// Load persisted entries. Returns (loaded, skipped); corrupt or
    /// expired files count as skipped and are never an error.
    pub fn load(&self, dir: &FsPath, prefix: &str) -> (usize, usize) {
        let index_path = dir.join(format!("{}_index.json", prefix));
        let Ok(raw) = std::fs::read(&index_path) else {
            return (0, 0);
        };
        let Ok(index) = serde_json::from_slice::<HashMap<String, String>>(&raw) else {
            return (0, 0);
        };

        let mut loaded = 0;
        let mut skipped = 0;
        for (key, file_name) in index {
            let entry = std::fs::read(dir.join(&file_name))
                .ok()
                .and_then(|bytes| serde_json::from_slice::<PersistedEntry>(&bytes).ok());
            let Some(persisted) = entry else {
                skipped += 1;
                continue;
            };
            let now = unix_now();
            let expires = persisted.timestamp + persisted.ttl_seconds;
            if expires <= now {
                skipped += 1;
                continue;
            }
            self.entries.insert(
                key,
                Entry {
                    value: Value::from_json(&persisted.value),
                    inserted: Instant::now(),
                    ttl: Duration::from_secs(expires - now),
                    hit_count: persisted.hit_count,
                    last_accessed: persisted.last_accessed,
                },
            );
            loaded += 1;
        }
        (loaded, skipped)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn key_hash(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_and_counters() {
        let cache = ResultCache::new(Duration::from_secs(60));
        assert!(cache.get("vault:secret/a").is_none());
        cache.put("vault:secret/a", Value::String("v".into()));
        assert_eq!(
            cache.get("vault:secret/a"),
            Some(Value::String("v".into()))
        );
        let counters = cache.counters();
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.misses, 1);
    }

    #[test]
    fn test_expired_entries_evicted_on_read() {
        let cache = ResultCache::new(Duration::from_millis(0));
        cache.put("k", Value::Int(1));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.counters().evictions, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(Duration::from_secs(300));
        cache.put("vault:secret/a", Value::String("alpha".into()));
        cache.put("file:certs/ca.pem", Value::Int(7));
        cache.persist(dir.path(), "layercake").unwrap();

        let restored = ResultCache::new(Duration::from_secs(300));
        let (loaded, skipped) = restored.load(dir.path(), "layercake");
        assert_eq!((loaded, skipped), (2, 0));
        assert_eq!(
            restored.get("vault:secret/a"),
            Some(Value::String("alpha".into()))
        );
        assert_eq!(restored.get("file:certs/ca.pem"), Some(Value::Int(7)));
    }

    #[test]
    fn test_corrupt_files_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(Duration::from_secs(300));
        cache.put("good", Value::Bool(true));
        cache.persist(dir.path(), "layercake").unwrap();

        // corrupt one entry file
        let index: HashMap<String, String> = serde_json::from_slice(
            &std::fs::read(dir.path().join("layercake_index.json")).unwrap(),
        )
        .unwrap();
        let entry_file = index.values().next().unwrap();
        std::fs::write(dir.path().join(entry_file), b"{ not json").unwrap();

        let restored = ResultCache::new(Duration::from_secs(300));
        let (loaded, skipped) = restored.load(dir.path(), "layercake");
        assert_eq!((loaded, skipped), (0, 1));
    }

    #[test]
    fn test_missing_directory_loads_nothing() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let (loaded, skipped) = cache.load(FsPath::new("/nonexistent/dir"), "layercake");
        assert_eq!((loaded, skipped), (0, 0));
    }
}
