// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod eval;

pub use eval::{EvalError, ExternalErrorKind};
