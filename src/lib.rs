// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod adapters;      // secret-store / file adapters
pub mod analyzer;      // dependency graph + extraction
pub mod config;        // layered engine configuration
pub mod document;      // values, paths, document trees
pub mod engine;        // phased evaluator
pub mod errors;        // error taxonomy
pub mod expr;          // tokenizer, parser, parse cache
pub mod fabric;        // pools, dedup, result cache, batching
pub mod merge;         // deep merge of input documents
pub mod observability; // structured logging + metrics
pub mod operators;     // operator registry + built-ins
