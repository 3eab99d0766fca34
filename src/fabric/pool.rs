// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Bounded client pool with idle expiry.
//!
//! `get()` hands back an existing idle client when one is available, creates
//! one when the pool is under its maximum, and otherwise returns a temporary
//! client that is discarded instead of parked when the handle drops. Idle
//! clients past their timer are discarded on the next `get()`.

use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Idle<C> {
    client: C,
    parked_at: Instant,
}

#[derive(Debug, Default)]
pub struct PoolStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub created: AtomicU64,
    pub discarded: AtomicU64,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

struct PoolInner<C> {
    free: Mutex<Vec<Idle<C>>>,
    factory: Box<dyn Fn() -> C + Send + Sync>,
    max: usize,
    idle_ttl: Duration,
    /// Clients entitled to be parked on return; everything above `max` is
    /// temporary.
    permanent: AtomicUsize,
    stats: PoolStats,
}

pub struct Pool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Pool<C> {
    pub fn new(
        max: usize,
        idle_ttl: Duration,
        factory: impl Fn() -> C + Send + Sync + 'static,
    ) -> Self {
        Pool {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                factory: Box::new(factory),
                max: max.max(1),
                idle_ttl,
                permanent: AtomicUsize::new(0),
                stats: PoolStats::default(),
            }),
        }
    }

    pub fn get(&self) -> Pooled<C> {
        let inner = &self.inner;
        {
            let mut free = inner.free.lock();
            while let Some(idle) = free.pop() {
                if idle.parked_at.elapsed() > inner.idle_ttl {
                    inner.stats.discarded.fetch_add(1, Ordering::Relaxed);
                    inner.permanent.fetch_sub(1, Ordering::Relaxed);
                    continue;
                }
                inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Pooled {
                    client: Some(idle.client),
                    pool: inner.clone(),
                    temporary: false,
                };
            }
        }

        inner.stats.misses.fetch_add(1, Ordering::Relaxed);
        inner.stats.created.fetch_add(1, Ordering::Relaxed);
        let temporary = loop {
            let current = inner.permanent.load(Ordering::Relaxed);
            if current >= inner.max {
                break true;
            }
            if inner
                .permanent
                .compare_exchange(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break false;
            }
        };
        Pooled {
            client: Some((inner.factory)()),
            pool: inner.clone(),
            temporary,
        }
    }

    pub fn stats(&self) -> &PoolStats {
        &self.inner.stats
    }

    pub fn idle_len(&self) -> usize {
        self.inner.free.lock().len()
    }
}

impl<C> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

/// A checked-out client; parks itself back in the pool on drop unless it
/// was handed out as a temporary.
pub struct Pooled<C> {
    client: Option<C>,
    pool: Arc<PoolInner<C>>,
    temporary: bool,
}

impl<C> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.client.as_ref().expect("client present until drop")
    }
}

impl<C> Drop for Pooled<C> {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        if self.temporary {
            self.pool.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.pool.free.lock().push(Idle {
            client,
            parked_at: Instant::now(),
        });
    }
}
