// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Deep merge of the input document sequence.
//!
//! Produces the composite document the evaluator consumes. Mappings merge
//! recursively and scalars replace. Sequences replace by default, but an
//! overlay list may carry a directive as its first element:
//!
//! * `(( append ))` — overlay elements go after the base elements
//! * `(( prepend ))` — overlay elements go before the base elements
//! * `(( replace ))` — overlay wins outright
//! * `(( inline ))` — element-wise deep merge by index, extras appended
//!
//! Without a directive, two sequences of mappings that both carry `name`
//! keys merge entry-by-entry on the name; anything else replaces.

use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::document::Value;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("merge directive '{directive}' is only valid as the first element of a sequence")]
    MisplacedDirective { directive: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListDirective {
    Append,
    Prepend,
    Replace,
    Inline,
}

fn directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\(\(\s*(append|prepend|replace|inline)\s*\)\)\s*$")
            .expect("directive regex")
    })
}

fn directive_of(value: &Value) -> Option<ListDirective> {
    let text = value.as_str()?;
    let captures = directive_regex().captures(text)?;
    match captures.get(1)?.as_str() {
        "append" => Some(ListDirective::Append),
        "prepend" => Some(ListDirective::Prepend),
        "replace" => Some(ListDirective::Replace),
        "inline" => Some(ListDirective::Inline),
        _ => None,
    }
}

/// Merge `docs` in order into one composite document. The first document
/// is the base; every following document overlays it.
pub fn merge_documents(docs: impl IntoIterator<Item = Value>) -> Result<Value, MergeError> {
    let mut docs = docs.into_iter();
    let Some(mut composite) = docs.next() else {
        return Ok(Value::empty_map());
    };
    for overlay in docs {
        composite = merge_value(composite, overlay)?;
    }
    Ok(composite)
}

fn merge_value(base: Value, overlay: Value) -> Result<Value, MergeError> {
    match (base, overlay) {
        (Value::Map(base), Value::Map(overlay)) => merge_maps(base, overlay),
        (Value::Seq(base), Value::Seq(overlay)) => merge_seqs(base, overlay),
        (_, overlay) => Ok(overlay),
    }
}

fn merge_maps(
    mut base: IndexMap<String, Value>,
    overlay: IndexMap<String, Value>,
) -> Result<Value, MergeError> {
    for (key, value) in overlay {
        match base.shift_remove(&key) {
            Some(existing) => {
                base.insert(key, merge_value(existing, value)?);
            }
            None => {
                base.insert(key, value);
            }
        }
    }
    Ok(Value::Map(base))
}

fn merge_seqs(base: Vec<Value>, overlay: Vec<Value>) -> Result<Value, MergeError> {
    let (directive, rest) = match overlay.split_first() {
        Some((head, rest)) if directive_of(head).is_some() => {
            (directive_of(head), rest.to_vec())
        }
        _ => (None, overlay),
    };
    if let Some(stray) = rest.iter().find(|item| directive_of(item).is_some()) {
        return Err(MergeError::MisplacedDirective {
            directive: stray.as_str().unwrap_or_default().trim().to_string(),
        });
    }

    match directive {
        Some(ListDirective::Append) => {
            let mut merged = base;
            merged.extend(rest);
            Ok(Value::Seq(merged))
        }
        Some(ListDirective::Prepend) => {
            let mut merged = rest;
            merged.extend(base);
            Ok(Value::Seq(merged))
        }
        Some(ListDirective::Replace) => Ok(Value::Seq(rest)),
        Some(ListDirective::Inline) => {
            let mut merged = Vec::with_capacity(base.len().max(rest.len()));
            let mut base_iter = base.into_iter();
            let mut rest_iter = rest.into_iter();
            loop {
                match (base_iter.next(), rest_iter.next()) {
                    (Some(b), Some(o)) => merged.push(merge_value(b, o)?),
                    (Some(b), None) => merged.push(b),
                    (None, Some(o)) => merged.push(o),
                    (None, None) => break,
                }
            }
            Ok(Value::Seq(merged))
        }
        None => {
            if named_map_list(&base) && named_map_list(&rest) {
                merge_by_name(base, rest)
            } else {
                Ok(Value::Seq(rest))
            }
        }
    }
}

fn named_map_list(items: &[Value]) -> bool {
    !items.is_empty()
        && items.iter().all(|item| {
            item.as_map()
                .map(|m| m.contains_key("name"))
                .unwrap_or(false)
        })
}

/// Entry-by-entry merge on the `name` key; unmatched overlay entries are
/// appended in order.
fn merge_by_name(base: Vec<Value>, overlay: Vec<Value>) -> Result<Value, MergeError> {
    let mut merged: Vec<Value> = base;
    for entry in overlay {
        let name = entry
            .as_map()
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let position = name.as_deref().and_then(|name| {
            merged.iter().position(|existing| {
                existing
                    .as_map()
                    .and_then(|m| m.get("name"))
                    .and_then(Value::as_str)
                    == Some(name)
            })
        });
        match position {
            Some(index) => {
                let existing = merged[index].clone();
                merged[index] = merge_value(existing, entry)?;
            }
            None => merged.push(entry),
        }
    }
    Ok(Value::Seq(merged))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        Value::from_yaml(&serde_yaml::from_str(text).unwrap())
    }

    fn merge(base: &str, overlay: &str) -> Value {
        merge_documents(vec![yaml(base), yaml(overlay)]).unwrap()
    }

    #[test]
    fn test_mappings_merge_recursively() {
        let merged = merge("a:\n  x: 1\n  y: 2\n", "a:\n  y: 9\n  z: 3\n");
        assert_eq!(merged, yaml("a:\n  x: 1\n  y: 9\n  z: 3\n"));
    }

    #[test]
    fn test_scalars_replace() {
        assert_eq!(merge("v: 1\n", "v: two\n"), yaml("v: two\n"));
    }

    #[test]
    fn test_sequences_replace_by_default() {
        assert_eq!(merge("l: [1, 2]\n", "l: [3]\n"), yaml("l: [3]\n"));
    }

    #[test]
    fn test_append_directive() {
        let merged = merge("l: [a, b]\n", "l: [\"(( append ))\", c]\n");
        assert_eq!(merged, yaml("l: [a, b, c]\n"));
    }

    #[test]
    fn test_prepend_directive() {
        let merged = merge("l: [a, b]\n", "l: [\"(( prepend ))\", c]\n");
        assert_eq!(merged, yaml("l: [c, a, b]\n"));
    }

    #[test]
    fn test_replace_directive() {
        let merged = merge("l: [a, b]\n", "l: [\"(( replace ))\", c]\n");
        assert_eq!(merged, yaml("l: [c]\n"));
    }

    #[test]
    fn test_inline_directive_merges_by_index() {
        let merged = merge(
            "l:\n  - x: 1\n    y: 2\n  - x: 3\n",
            "l:\n  - \"(( inline ))\"\n  - y: 9\n",
        );
        assert_eq!(merged, yaml("l:\n  - x: 1\n    y: 9\n  - x: 3\n"));
    }

    #[test]
    fn test_named_map_lists_merge_on_name() {
        let merged = merge(
            "jobs:\n  - name: web\n    instances: 1\n  - name: db\n    instances: 1\n",
            "jobs:\n  - name: web\n    instances: 3\n  - name: worker\n    instances: 2\n",
        );
        let jobs = merged.find(&crate::document::Path::parse("jobs")).unwrap();
        let jobs = jobs.as_seq().unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(
            merged.find(&crate::document::Path::parse("jobs.0.instances")),
            Some(&Value::Int(3))
        );
        assert_eq!(
            merged.find(&crate::document::Path::parse("jobs.2.name")),
            Some(&Value::String("worker".into()))
        );
    }

    #[test]
    fn test_misplaced_directive_is_an_error() {
        let err = merge_documents(vec![
            yaml("l: [a]\n"),
            yaml("l: [b, \"(( append ))\"]\n"),
        ])
        .unwrap_err();
        assert!(matches!(err, MergeError::MisplacedDirective { .. }));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(merge_documents(vec![]).unwrap(), Value::empty_map());
    }

    #[test]
    fn test_three_layers() {
        let merged = merge_documents(vec![
            yaml("a: 1\nb: 1\n"),
            yaml("b: 2\nc: 2\n"),
            yaml("c: 3\n"),
        ])
        .unwrap();
        assert_eq!(merged, yaml("a: 1\nb: 2\nc: 3\n"));
    }
}
