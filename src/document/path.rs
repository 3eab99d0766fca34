// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Canonical document paths.
//!
//! A [`Path`] addresses a single value inside the composite document as an
//! ordered list of steps, each either a mapping key or a sequence index.
//! Paths are canonical: no empty steps, and numeric segments are parsed into
//! index steps up front so two spellings of the same location compare equal.

use std::fmt;
use std::hash::{Hash, Hasher};

/// One step of a document path: a mapping key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Key(String),
    Index(usize),
}

impl Step {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Step::Key(k) => Some(k),
            Step::Index(_) => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Key(k) => write!(f, "{}", k),
            Step::Index(i) => write!(f, "{}", i),
        }
    }
}

/// An ordered sequence of steps addressing a value in the document.
///
/// Two paths compare by their step lists. The canonical string form joins
/// steps with `.`, which is also the accepted parse syntax (`meta.jobs.0.name`).
/// Bracketed indices (`jobs[0].name`) are accepted on parse and normalized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Path {
    steps: Vec<Step>,
}

impl Path {
    /// The document root (no steps).
    pub fn root() -> Self {
        Path { steps: Vec::new() }
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Path { steps }
    }

    /// Parse a dotted path. Purely numeric segments become index steps;
    /// `a[0].b` is normalized to `a.0.b`. Empty segments are dropped.
    pub fn parse(raw: &str) -> Self {
        let mut steps = Vec::new();
        for segment in raw.split('.') {
            if segment.is_empty() {
                continue;
            }
            // peel off any trailing [n] selectors
            let mut rest = segment;
            while let Some(open) = rest.find('[') {
                let (head, tail) = rest.split_at(open);
                if !head.is_empty() {
                    steps.push(Self::classify(head));
                }
                match tail[1..].find(']') {
                    Some(close) => {
                        let inner = &tail[1..1 + close];
                        if let Ok(i) = inner.parse::<usize>() {
                            steps.push(Step::Index(i));
                        } else if !inner.is_empty() {
                            steps.push(Step::Key(inner.to_string()));
                        }
                        rest = &tail[close + 2..];
                    }
                    None => {
                        // unbalanced bracket, keep it as a literal key
                        steps.push(Step::Key(tail.to_string()));
                        rest = "";
                    }
                }
            }
            if !rest.is_empty() {
                steps.push(Self::classify(rest));
            }
        }
        Path { steps }
    }

    fn classify(segment: &str) -> Step {
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            Step::Index(segment.parse().unwrap_or(0))
        } else {
            Step::Key(segment.to_string())
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The first step, used for shard selection.
    pub fn first(&self) -> Option<&Step> {
        self.steps.first()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// A new path with `step` appended.
    pub fn child(&self, step: Step) -> Path {
        let mut steps = self.steps.clone();
        steps.push(step);
        Path { steps }
    }

    pub fn child_key(&self, key: &str) -> Path {
        self.child(Step::Key(key.to_string()))
    }

    pub fn child_index(&self, index: usize) -> Path {
        self.child(Step::Index(index))
    }

    /// The parent path, or None at the root.
    pub fn parent(&self) -> Option<Path> {
        if self.steps.is_empty() {
            None
        } else {
            Some(Path {
                steps: self.steps[..self.steps.len() - 1].to_vec(),
            })
        }
    }

    /// True when `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.steps.len() <= other.steps.len()
            && self.steps.iter().zip(other.steps.iter()).all(|(a, b)| a == b)
    }

    /// Two paths overlap when one is a prefix of the other or they are equal.
    /// Overlapping target paths disqualify a wave from parallel dispatch.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.steps.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "$");
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(raw: &str) -> Self {
        Path::parse(raw)
    }
}
