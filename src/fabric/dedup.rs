// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Per-key request deduplication (single-flight).
//!
//! Concurrent requests for the same key collapse into one underlying
//! operation; every caller receives the same result or error, success and
//! failure alike. Completed entries stay visible until their TTL expires,
//! which also lets the wave-level batcher seed results so individual
//! fetches after a batched dispatch cost nothing.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::FabricError;
use crate::document::Value;

type Outcome = Result<Value, FabricError>;

#[derive(Clone)]
struct Flight {
    cell: Arc<OnceCell<Outcome>>,
    created: Instant,
}

pub struct Deduplicator {
    inflight: DashMap<String, Flight>,
    ttl: Duration,
    underlying: AtomicU64,
}

impl Deduplicator {
    pub fn new(ttl: Duration) -> Self {
        Deduplicator {
            inflight: DashMap::new(),
            ttl,
            underlying: AtomicU64::new(0),
        }
    }

    /// Join or start the single flight for `key`. The first caller runs
    /// `fetch`; everyone else waits on the shared cell. A per-key timeout
    /// and the cancellation token are both observed while waiting.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let flight = self.flight_for(key);
        let work = flight.cell.get_or_init(|| async {
            self.underlying.fetch_add(1, Ordering::Relaxed);
            fetch().await
        });

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(FabricError::Cancelled),
            outcome = async {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, work)
                        .await
                        .map_err(|_| FabricError::Timeout { key: key.to_string() }),
                    None => Ok(work.await),
                }
            } => outcome?,
        };
        outcome.clone()
    }

    /// Record a completed result for `key` without running a flight, unless
    /// one is already present. Used by the batcher to publish multi-item
    /// dispatch results.
    pub fn seed(&self, key: &str, outcome: Outcome) {
        self.purge_expired(key);
        self.inflight
            .entry(key.to_string())
            .or_insert_with(|| Flight {
                cell: Arc::new(OnceCell::new_with(Some(outcome))),
                created: Instant::now(),
            });
    }

    /// Whether a completed (non-expired) result for `key` is already held.
    pub fn has_result(&self, key: &str) -> bool {
        self.inflight
            .get(key)
            .map(|flight| {
                flight.created.elapsed() <= self.ttl && flight.cell.initialized()
            })
            .unwrap_or(false)
    }

    /// Count of underlying operations actually started; the single-flight
    /// property says this stays at one per key per TTL window no matter how
    /// many callers raced.
    pub fn underlying_calls(&self) -> u64 {
        self.underlying.load(Ordering::Relaxed)
    }

    fn flight_for(&self, key: &str) -> Flight {
        self.purge_expired(key);
        self.inflight
            .entry(key.to_string())
            .or_insert_with(|| Flight {
                cell: Arc::new(OnceCell::new()),
                created: Instant::now(),
            })
            .clone()
    }

    fn purge_expired(&self, key: &str) {
        let expired = self
            .inflight
            .get(key)
            .map(|flight| flight.created.elapsed() > self.ttl && flight.cell.initialized())
            .unwrap_or(false);
        if expired {
            self.inflight.remove(key);
        }
    }
}
