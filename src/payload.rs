//! Path-indexed traversal over JSON event payloads
//!
//! Payloads are plain `serde_json::Value` trees. Sensitive fields are
//! addressed with a [`FieldPath`] such as `patient.name` or
//! `visits[0].diagnosis`, and [`walk`] visits every object entry and array
//! element exactly once in a stable order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A single step into a JSON value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object key
    Key(String),
    /// Array index
    Index(usize),
}

/// Location of a field inside a payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// The empty (root) path
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path segments
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Extend with an object key
    pub fn key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self(segments)
    }

    /// Extend with an array index
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// Whether `self` equals `ancestor` or lies beneath it
    pub fn starts_with(&self, ancestor: &FieldPath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// Parse the rendered form (`a.b[2].c`) back into a path.
    ///
    /// Backslash, `.`, `[` and `]` inside keys are escaped with a backslash, so
    /// every path renders and parses back losslessly. Returns `None` for
    /// empty input, empty keys or malformed brackets.
    pub fn parse(input: &str) -> Option<Self> {
        let mut segments = Vec::new();
        let mut key = String::new();
        let mut after_index = false;
        let mut chars = input.chars();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if !after_index {
                        if key.is_empty() {
                            return None;
                        }
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    }
                    after_index = false;
                }
                '[' => {
                    if !after_index {
                        // Empty keys and a leading index are not addressable
                        if key.is_empty() {
                            return None;
                        }
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    }
                    let mut digits = String::new();
                    loop {
                        match chars.next()? {
                            ']' => break,
                            d => digits.push(d),
                        }
                    }
                    segments.push(PathSegment::Index(digits.parse().ok()?));
                    after_index = true;
                }
                ']' => return None,
                other => {
                    if after_index {
                        return None;
                    }
                    let ch = if other == '\\' { chars.next()? } else { other };
                    key.push(ch);
                }
            }
        }

        if !after_index {
            if key.is_empty() {
                return None;
            }
            segments.push(PathSegment::Key(key));
        }
        Some(Self(segments))
    }
}

fn write_key(f: &mut fmt::Formatter<'_>, key: &str) -> fmt::Result {
    for c in key.chars() {
        if matches!(c, '\\' | '.' | '[' | ']') {
            write!(f, "\\")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write_key(f, key)?;
                }
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// JSON kind of a value, recorded so decryption restores the original type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Null,
    Object,
    Array,
}

impl ValueKind {
    /// Kind of the given value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::String,
            Value::Number(_) => Self::Number,
            Value::Bool(_) => Self::Boolean,
            Value::Null => Self::Null,
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
        }
    }
}

/// Visit every object entry and array element depth-first.
///
/// The visitor receives the full path, the object key (`None` for array
/// elements) and the value. Children are visited after their parent.
pub fn walk<F>(value: &Value, visitor: &mut F)
where
    F: FnMut(&FieldPath, Option<&str>, &Value),
{
    walk_inner(value, &FieldPath::root(), visitor);
}

fn walk_inner<F>(value: &Value, path: &FieldPath, visitor: &mut F)
where
    F: FnMut(&FieldPath, Option<&str>, &Value),
{
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = path.key(key);
                visitor(&child_path, Some(key), child);
                walk_inner(child, &child_path, visitor);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                let child_path = path.index(i);
                visitor(&child_path, None, child);
                walk_inner(child, &child_path, visitor);
            }
        }
        _ => {}
    }
}

/// Look up the value at `path`
pub fn get<'a>(value: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(value, |current, segment| match segment {
            PathSegment::Key(key) => current.as_object()?.get(key),
            PathSegment::Index(index) => current.as_array()?.get(*index),
        })
}

/// Mutable lookup of the value at `path`
pub fn get_mut<'a>(value: &'a mut Value, path: &FieldPath) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path.segments() {
        current = match segment {
            PathSegment::Key(key) => current.as_object_mut()?.get_mut(key)?,
            PathSegment::Index(index) => current.as_array_mut()?.get_mut(*index)?,
        };
    }
    Some(current)
}
