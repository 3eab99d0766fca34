// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The embedded expression language: tokenizer, parser, parse cache, and
//! the document-boundary matcher for `(( ... ))` tagged strings.

pub mod ast;
pub mod cache;
pub mod parser;
pub mod token;

pub use ast::Expr;
pub use cache::ParseCache;
pub use token::OperatorCatalog;

use regex::Regex;
use std::sync::OnceLock;

fn boundary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\(\(\s*(.+?)\s*\)\)\s*$").expect("boundary regex"))
}

/// Extract the expression body from a string value shaped `(( ... ))`.
///
/// Returns `None` for plain strings, and also for strings where the inner
/// parentheses are unbalanced; those pass through evaluation unchanged.
pub fn expression_body(text: &str) -> Option<String> {
    let captures = boundary_regex().captures(text)?;
    let body = captures.get(1)?.as_str();
    let mut depth: i32 = 0;
    for c in body.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    if depth == 0 {
        Some(body.to_string())
    } else {
        None
    }
}
