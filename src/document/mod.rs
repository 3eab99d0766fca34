// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod cow;
pub mod path;
pub mod sharded;
pub mod tree;
pub mod value;

pub use cow::CowTree;
pub use path::{Path, Step};
pub use sharded::ShardedTree;
pub use tree::{DocumentTree, Transaction, TreeError};
pub use value::{ArithmeticOp, Value};
