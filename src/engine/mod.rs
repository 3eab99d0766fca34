// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod context;
pub mod evaluator;
#[cfg(test)]
pub mod integration_tests;
pub mod waves;

pub use context::EngineContext;
pub use evaluator::Evaluator;
pub use waves::WaveOutcome;
