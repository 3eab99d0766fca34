// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Timing and counter taps.
//!
//! The registry is written to from hot paths (operator invocation, wave
//! dispatch, cache traffic) and read as a point-in-time [`MetricsSnapshot`].
//! No export format is mandated here; exporters render the snapshot.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

const MAX_SAMPLES: usize = 1024;

#[derive(Default)]
struct OpStats {
    count: u64,
    total: Duration,
    samples: Vec<Duration>,
}

impl OpStats {
    fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total += duration;
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push(duration);
        } else {
            // ring overwrite keeps the window recent without reallocating
            let idx = (self.count as usize) % MAX_SAMPLES;
            self.samples[idx] = duration;
        }
    }
}

/// Aggregated duration statistics for one operator.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationStats {
    pub count: u64,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// One executed wave.
#[derive(Debug, Clone)]
pub struct WaveTiming {
    pub phase: &'static str,
    pub wave: usize,
    pub size: usize,
    pub parallel: bool,
    pub duration: Duration,
}

/// Counters contributed by a cache (parse cache, result cache, pools).
#[derive(Debug, Clone)]
pub struct CacheCounters {
    pub name: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheCounters {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Read-only snapshot of everything the engine measured.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub operators: HashMap<String, DurationStats>,
    pub waves: Vec<WaveTiming>,
    pub caches: Vec<CacheCounters>,
    /// Histogram of dispatched wave widths, indexed by width (capped).
    pub concurrency: Vec<u64>,
}

pub struct MetricsRegistry {
    operators: Mutex<HashMap<String, OpStats>>,
    waves: Mutex<Vec<WaveTiming>>,
    concurrency: Mutex<Vec<u64>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        MetricsRegistry {
            operators: Mutex::new(HashMap::new()),
            waves: Mutex::new(Vec::new()),
            concurrency: Mutex::new(vec![0; 65]),
        }
    }

    pub fn record_operator(&self, name: &str, duration: Duration) {
        self.operators
            .lock()
            .entry(name.to_string())
            .or_default()
            .record(duration);
    }

    pub fn record_wave(&self, timing: WaveTiming) {
        let width = timing.size.min(64);
        self.concurrency.lock()[width] += 1;
        self.waves.lock().push(timing);
    }

    pub fn snapshot(&self, caches: Vec<CacheCounters>) -> MetricsSnapshot {
        let operators = self
            .operators
            .lock()
            .iter()
            .map(|(name, stats)| (name.clone(), summarize(stats)))
            .collect();
        MetricsSnapshot {
            operators,
            waves: self.waves.lock().clone(),
            caches,
            concurrency: self.concurrency.lock().clone(),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(stats: &OpStats) -> DurationStats {
    let mut samples = stats.samples.clone();
    samples.sort_unstable();
    let percentile = |p: f64| -> Duration {
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let idx = ((samples.len() as f64 - 1.0) * p).round() as usize;
        samples[idx.min(samples.len() - 1)]
    };
    let mean = if stats.count == 0 {
        Duration::ZERO
    } else {
        stats.total / stats.count as u32
    };
    DurationStats {
        count: stats.count,
        mean,
        p50: percentile(0.50),
        p95: percentile(0.95),
        p99: percentile(0.99),
    }
}
