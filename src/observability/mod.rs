// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod messages;
pub mod metrics;

pub use messages::StructuredLog;
pub use metrics::{CacheCounters, DurationStats, MetricsRegistry, MetricsSnapshot, WaveTiming};
