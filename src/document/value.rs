// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Tagged document values.
//!
//! [`Value`] is the single representation every subsystem trades in: the
//! merge step produces it, the document trees store it, operators consume
//! and return it. Mapping keys are coerced to strings with a canonical
//! representation, and mappings preserve source order so resolved output
//! serializes in the same shape the input documents had.

use indexmap::IndexMap;
use std::fmt;

use super::path::{Path, Step};

/// A document value: null, boolean, integer, float, string, sequence, or
/// string-keyed mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
        }
    }

    pub fn empty_map() -> Value {
        Value::Map(IndexMap::new())
    }

    /// Falsy values are `null` and `false`; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }

    /// Emptiness for the `empty` operator: null, `""`, `[]`, and `{}` are
    /// empty; scalars are not.
    pub fn is_empty_value(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Seq(s) => s.is_empty(),
            Value::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Follow one step into a collection value.
    pub fn descend(&self, step: &Step) -> Option<&Value> {
        match (self, step) {
            (Value::Map(m), Step::Key(k)) => m.get(k),
            (Value::Seq(s), Step::Index(i)) => s.get(*i),
            // numeric mapping keys parse as indices; fall back to the
            // string spelling before giving up
            (Value::Map(m), Step::Index(i)) => m.get(&i.to_string()),
            _ => None,
        }
    }

    /// Walk a whole path from this value.
    pub fn find(&self, path: &Path) -> Option<&Value> {
        let mut current = self;
        for step in path.steps() {
            current = current.descend(step)?;
        }
        Some(current)
    }

    /// The string form used by `concat` and string coercion: strings pass
    /// through unquoted, null renders empty, scalars use their canonical
    /// spelling.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => s.clone(),
            other => serde_yaml::to_string(&other.to_yaml())
                .map(|s| s.trim_end().to_string())
                .unwrap_or_default(),
        }
    }

    /// Numeric widening: integer op integer stays integer, everything else
    /// is carried out in floats.
    pub fn arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> Result<Value, String> {
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => op.apply_int(*a, *b),
            (Value::Int(a), Value::Float(b)) => op.apply_float(*a as f64, *b),
            (Value::Float(a), Value::Int(b)) => op.apply_float(*a, *b as f64),
            (Value::Float(a), Value::Float(b)) => op.apply_float(*a, *b),
            (a, b) => Err(format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                a.type_name(),
                b.type_name()
            )),
        }
    }

    /// Ordering for `< > <= >=`; numbers compare numerically, strings
    /// lexicographically, everything else is an error.
    pub fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, String> {
        use std::cmp::Ordering;
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => {
                Ok((*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Value::Float(a), Value::Int(b)) => {
                Ok(a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal))
            }
            (Value::Float(a), Value::Float(b)) => {
                Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (a, b) => Err(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            )),
        }
    }

    /// Convert from the structural-document library representation,
    /// coercing non-string mapping keys to their canonical string form.
    pub fn from_yaml(yaml: &serde_yaml::Value) -> Value {
        match yaml {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_yaml::Value::String(s) => Value::String(s.clone()),
            serde_yaml::Value::Sequence(items) => {
                Value::Seq(items.iter().map(Value::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(mapping) => {
                let mut map = IndexMap::with_capacity(mapping.len());
                for (key, value) in mapping {
                    map.insert(yaml_key_to_string(key), Value::from_yaml(value));
                }
                Value::Map(map)
            }
            serde_yaml::Value::Tagged(tagged) => Value::from_yaml(&tagged.value),
        }
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            Value::Null => serde_yaml::Value::Null,
            Value::Bool(b) => serde_yaml::Value::Bool(*b),
            Value::Int(i) => serde_yaml::Value::Number((*i).into()),
            Value::Float(f) => serde_yaml::Value::Number(serde_yaml::Number::from(*f)),
            Value::String(s) => serde_yaml::Value::String(s.clone()),
            Value::Seq(items) => {
                serde_yaml::Value::Sequence(items.iter().map(Value::to_yaml).collect())
            }
            Value::Map(map) => {
                let mut mapping = serde_yaml::Mapping::with_capacity(map.len());
                for (key, value) in map {
                    mapping.insert(
                        serde_yaml::Value::String(key.clone()),
                        value.to_yaml(),
                    );
                }
                serde_yaml::Value::Mapping(mapping)
            }
        }
    }

    /// JSON mirror used by the persisted result cache.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Seq(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Seq(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

/// Arithmetic operation selector for [`Value::arithmetic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Rem => "%",
        }
    }

    fn apply_int(&self, a: i64, b: i64) -> Result<Value, String> {
        match self {
            ArithmeticOp::Add => Ok(Value::Int(a.wrapping_add(b))),
            ArithmeticOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
            ArithmeticOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
            ArithmeticOp::Div => {
                if b == 0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(Value::Int(a / b))
                }
            }
            ArithmeticOp::Rem => {
                if b == 0 {
                    Err("modulo by zero".to_string())
                } else {
                    Ok(Value::Int(a % b))
                }
            }
        }
    }

    fn apply_float(&self, a: f64, b: f64) -> Result<Value, String> {
        match self {
            ArithmeticOp::Add => Ok(Value::Float(a + b)),
            ArithmeticOp::Sub => Ok(Value::Float(a - b)),
            ArithmeticOp::Mul => Ok(Value::Float(a * b)),
            ArithmeticOp::Div => {
                if b == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(Value::Float(a / b))
                }
            }
            ArithmeticOp::Rem => {
                if b == 0.0 {
                    Err("modulo by zero".to_string())
                } else {
                    Ok(Value::Float(a % b))
                }
            }
        }
    }
}

fn yaml_key_to_string(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "~".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        Value::from_yaml(&serde_yaml::from_str(text).unwrap())
    }

    #[test]
    fn test_yaml_round_trip_preserves_order() {
        let value = yaml("z: 1\na: 2\nm: 3\n");
        let map = value.as_map().unwrap();
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_non_string_keys_coerced() {
        let value = yaml("1: one\ntrue: yes\n");
        let map = value.as_map().unwrap();
        assert!(map.contains_key("1"));
        assert!(map.contains_key("true"));
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        let result =
            Value::arithmetic(ArithmeticOp::Add, &Value::Int(3), &Value::Int(2)).unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn test_mixed_arithmetic_widens_to_float() {
        let result =
            Value::arithmetic(ArithmeticOp::Mul, &Value::Int(2), &Value::Float(1.5)).unwrap();
        assert_eq!(result, Value::Float(3.0));
    }

    #[test]
    fn test_division_by_zero() {
        assert!(Value::arithmetic(ArithmeticOp::Div, &Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::String(String::new()).is_truthy());
    }

    #[test]
    fn test_find_walks_sequences_and_maps() {
        let value = yaml("jobs:\n  - name: web\n  - name: db\n");
        let found = value.find(&Path::parse("jobs.1.name")).unwrap();
        assert_eq!(found, &Value::String("db".into()));
        assert!(value.find(&Path::parse("jobs.7.name")).is_none());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::Int(42).to_display_string(), "42");
        assert_eq!(Value::Bool(true).to_display_string(), "true");
        assert_eq!(Value::String("x".into()).to_display_string(), "x");
    }

    #[test]
    fn test_json_round_trip() {
        let value = yaml("a: [1, 2.5, null, true, hi]\n");
        assert_eq!(Value::from_json(&value.to_json()), value);
    }
}
