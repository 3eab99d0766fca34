// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod extract;
pub mod graph;

pub use extract::Analyzer;
pub use graph::{DepNode, DependencyGraph, NodeStatus};
