// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Memoized parsing.
//!
//! Parse results are keyed by a content hash of the expression body combined
//! with a signature of the operator registry, so re-registering operators
//! invalidates everything that could now classify differently. Entries carry
//! a TTL and the cache is size-bounded; eviction prefers the least recently
//! used entry, breaking ties by hit count.
//!
//! A `nocache` modifier anywhere in an expression bypasses the cache on both
//! read and write. The read-side check happens before parsing, so it is a
//! textual scan for the modifier spelling.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::EvalError;
use crate::expr::ast::Expr;
use crate::expr::parser;
use crate::expr::token::OperatorCatalog;

struct CacheEntry {
    expr: Arc<Expr>,
    inserted: Instant,
    last_access: Instant,
    hits: u64,
}

pub struct ParseCache {
    entries: Mutex<HashMap<u64, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
    evictions: std::sync::atomic::AtomicU64,
}

impl ParseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        ParseCache {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
            hits: Default::default(),
            misses: Default::default(),
            evictions: Default::default(),
        }
    }

    /// Parse `input`, consulting the cache unless the expression opts out.
    pub fn parse(
        &self,
        input: &str,
        catalog: &dyn OperatorCatalog,
        registry_signature: u64,
        strict: bool,
    ) -> Result<Arc<Expr>, EvalError> {
        let bypass = input.contains(":nocache");
        let key = Self::key(input, registry_signature);

        if !bypass {
            if let Some(expr) = self.lookup(key) {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Ok(expr);
            }
            self.misses
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        let expr = Arc::new(parser::parse(input, catalog, strict)?);
        if !bypass && !expr.has_modifier("nocache") {
            self.insert(key, expr.clone());
        }
        Ok(expr)
    }

    fn key(input: &str, registry_signature: u64) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in input.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash ^ registry_signature
    }

    fn lookup(&self, key: u64) -> Option<Arc<Expr>> {
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(entry) if entry.inserted.elapsed() <= self.ttl => {
                entry.last_access = Instant::now();
                entry.hits += 1;
                Some(entry.expr.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: u64, expr: Arc<Expr>) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            // LRU with hit-count tiebreak; linear scan is fine at the
            // capacities this cache runs at
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| (e.last_access, e.hits))
                .map(|(k, _)| *k)
            {
                entries.remove(&victim);
                self.evictions
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
        let now = Instant::now();
        entries.insert(
            key,
            CacheEntry {
                expr,
                inserted: now,
                last_access: now,
                hits: 0,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses, evictions) counters for the metrics snapshot.
    pub fn stats(&self) -> (u64, u64, u64) {
        use std::sync::atomic::Ordering::Relaxed;
        (
            self.hits.load(Relaxed),
            self.misses.load(Relaxed),
            self.evictions.load(Relaxed),
        )
    }
}
