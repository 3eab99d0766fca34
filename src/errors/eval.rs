// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Evaluation error taxonomy.
//!
//! Every failure the expression pipeline can produce is one of these kinds.
//! Operators return errors directly; argument resolution propagates them
//! unchanged except at an explicit `||` fallback, which may absorb only the
//! kinds [`EvalError::recoverable_by_fallback`] admits. At the end of a
//! phase all collected errors are aggregated into [`EvalError::Multi`].

use thiserror::Error;

use crate::document::TreeError;

/// Classification of external-I/O failures. `NotFound` is the only kind
/// `vault-try` and `||` recover from by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalErrorKind {
    NotFound,
    Transport,
    Auth,
    Timeout,
}

impl std::fmt::Display for ExternalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalErrorKind::NotFound => write!(f, "not found"),
            ExternalErrorKind::Transport => write!(f, "transport error"),
            ExternalErrorKind::Auth => write!(f, "authentication error"),
            ExternalErrorKind::Timeout => write!(f, "timed out"),
        }
    }
}

/// The error taxonomy of the evaluation core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Tokenizer/parser failure. Carries the source position.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
        source_text: String,
    },

    /// A referenced path does not exist, or resolved to nil where a value
    /// was required.
    #[error("`{path}` could not be found in the document")]
    Reference { path: String, at: Option<String> },

    /// An environment variable reference with no value in the process
    /// environment.
    #[error("environment variable ${name} is not set")]
    EnvMissing { name: String },

    /// An operator was applied to an incompatible value.
    #[error("type error at {at}: {message}")]
    Type { at: String, message: String },

    /// Operator-specific misuse.
    #[error("operator '{name}': {message}")]
    Operator { name: String, message: String },

    /// The expression names an operator the registry does not know.
    #[error("unknown operator '{name}'")]
    UnknownOperator { name: String },

    /// Argument count outside the operator's declared bounds.
    #[error("operator '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    /// External-resource I/O failure.
    #[error("external lookup '{key}' failed: {kind}: {message}")]
    External {
        key: String,
        kind: ExternalErrorKind,
        message: String,
    },

    /// A required parameter was declared and never provided.
    #[error("missing required parameter at {path}: {message}")]
    Param { path: String, message: String },

    /// A dependency cycle inside a single phase.
    #[error("circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// The fixed-point loop made no progress in a full pass.
    #[error("unable to resolve {} remaining expression(s): {}", remaining.len(), remaining.join(", "))]
    Unresolvable { remaining: Vec<String> },

    /// Cooperative cancellation observed at an I/O boundary.
    #[error("evaluation cancelled")]
    Cancelled,

    /// A composed timeout (operator, wave, or run scope) expired.
    #[error("timeout in {scope}")]
    Timeout { scope: String },

    /// Aggregation of every error a phase produced.
    #[error("{} error(s) occurred during evaluation", errors.len())]
    Multi { errors: Vec<EvalError> },
}

impl EvalError {
    /// Whether an explicit `||` fallback (or a `vault-try` attempt) may
    /// absorb this error. Cancellation and timeouts always propagate.
    pub fn recoverable_by_fallback(&self) -> bool {
        match self {
            EvalError::Reference { .. } | EvalError::EnvMissing { .. } => true,
            EvalError::External { kind, .. } => *kind == ExternalErrorKind::NotFound,
            _ => false,
        }
    }

    /// Flatten into a `Multi` unless there is exactly one error.
    pub fn aggregate(mut errors: Vec<EvalError>) -> EvalError {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            EvalError::Multi { errors }
        }
    }

    /// Every leaf error in aggregation order.
    pub fn leaves(&self) -> Vec<&EvalError> {
        match self {
            EvalError::Multi { errors } => errors.iter().flat_map(|e| e.leaves()).collect(),
            other => vec![other],
        }
    }

    /// Human-facing diagnostic: error kind, location, and for syntax errors
    /// a source snippet with a caret under the offending column.
    pub fn diagnostic(&self) -> String {
        match self {
            EvalError::Syntax {
                message,
                line,
                column,
                source_text,
            } => {
                let mut out = format!("syntax error at line {}, column {}: {}", line, column, message);
                if let Some(snippet) = source_text.lines().nth(line.saturating_sub(1)) {
                    out.push('\n');
                    out.push_str("  ");
                    out.push_str(snippet);
                    out.push('\n');
                    out.push_str("  ");
                    for _ in 1..*column {
                        out.push(' ');
                    }
                    out.push('^');
                }
                out
            }
            EvalError::Multi { errors } => {
                let mut out = format!("{} error(s):", errors.len());
                for error in errors {
                    out.push_str("\n  - ");
                    out.push_str(&error.diagnostic().replace('\n', "\n    "));
                }
                out
            }
            other => other.to_string(),
        }
    }
}

impl From<TreeError> for EvalError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound { path } => EvalError::Reference { path, at: None },
            TreeError::TypeError { path, found, step } => EvalError::Type {
                at: path,
                message: format!("cannot traverse {} with step '{}'", found, step),
            },
            TreeError::Rollback { reason } => EvalError::Operator {
                name: "transaction".to_string(),
                message: reason,
            },
        }
    }
}
