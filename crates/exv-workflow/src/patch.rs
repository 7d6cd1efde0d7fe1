//! Structured patching of the release's YAML values document.
//!
//! Paths are dot-separated. A segment addresses a mapping key, or a
//! sequence index when the node at that point is a sequence. `set`
//! creates missing intermediate mappings; `remove` of a path that does
//! not exist is a no-op.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

use exv_core::ValueOverride;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("failed to parse values document: {0}")]
    Parse(String),

    #[error("failed to render values document: {0}")]
    Render(String),

    #[error("empty path segment in {0:?}")]
    EmptySegment(String),

    #[error("{path}: cannot descend into a {found} at {segment:?}")]
    NotContainer {
        path: String,
        segment: String,
        found: &'static str,
    },

    #[error("{path}: {segment:?} is not a sequence index")]
    BadIndex { path: String, segment: String },

    #[error("{path}: index {index} out of range (length {len})")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("{path}: value cannot be expressed as YAML: {detail}")]
    Value { path: String, detail: String },
}

/// Parse `text`, apply `overrides` in order, and render it back.
pub fn patch_document(text: &str, overrides: &[ValueOverride]) -> Result<String, PatchError> {
    let mut doc: Value = if text.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(text).map_err(|e| PatchError::Parse(e.to_string()))?
    };
    apply(&mut doc, overrides)?;
    serde_yaml::to_string(&doc).map_err(|e| PatchError::Render(e.to_string()))
}

/// Apply `overrides` to `doc` in order.
pub fn apply(doc: &mut Value, overrides: &[ValueOverride]) -> Result<(), PatchError> {
    for op in overrides {
        match op {
            ValueOverride::Set { path, value } => {
                let value = serde_yaml::to_value(value).map_err(|e| PatchError::Value {
                    path: path.clone(),
                    detail: e.to_string(),
                })?;
                set(doc, path, value)?;
            }
            ValueOverride::Remove { path } => remove(doc, path)?,
        }
    }
    Ok(())
}

fn segments(path: &str) -> Result<Vec<&str>, PatchError> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(PatchError::EmptySegment(path.to_string()));
    }
    Ok(parts)
}

fn set(root: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    let parts = segments(path)?;
    let Some((last, parents)) = parts.split_last() else {
        return Err(PatchError::EmptySegment(path.to_string()));
    };

    let mut node = root;
    for segment in parents {
        node = child_or_insert(node, segment, path)?;
    }

    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    match node {
        Value::Mapping(map) => {
            map.insert(Value::String(last.to_string()), value);
            Ok(())
        }
        Value::Sequence(seq) => {
            let index = parse_index(last, path)?;
            if index < seq.len() {
                seq[index] = value;
            } else if index == seq.len() {
                seq.push(value);
            } else {
                return Err(PatchError::IndexOutOfRange {
                    path: path.to_string(),
                    index,
                    len: seq.len(),
                });
            }
            Ok(())
        }
        other => Err(not_container(path, last, other)),
    }
}

fn child_or_insert<'a>(
    node: &'a mut Value,
    segment: &str,
    path: &str,
) -> Result<&'a mut Value, PatchError> {
    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    match node {
        Value::Mapping(map) => Ok(map
            .entry(Value::String(segment.to_string()))
            .or_insert(Value::Null)),
        Value::Sequence(seq) => {
            let index = parse_index(segment, path)?;
            let len = seq.len();
            seq.get_mut(index).ok_or_else(|| PatchError::IndexOutOfRange {
                path: path.to_string(),
                index,
                len,
            })
        }
        other => Err(not_container(path, segment, other)),
    }
}

fn remove(root: &mut Value, path: &str) -> Result<(), PatchError> {
    let parts = segments(path)?;
    let Some((last, parents)) = parts.split_last() else {
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        let next = match node {
            Value::Mapping(map) => map.get_mut(*segment),
            Value::Sequence(seq) => segment.parse::<usize>().ok().and_then(|i| seq.get_mut(i)),
            _ => None,
        };
        node = match next {
            Some(next) => next,
            None => return Ok(()),
        };
    }

    match node {
        Value::Mapping(map) => {
            map.remove(*last);
        }
        Value::Sequence(seq) => {
            if let Ok(index) = last.parse::<usize>() {
                if index < seq.len() {
                    seq.remove(index);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_index(segment: &str, path: &str) -> Result<usize, PatchError> {
    segment.parse().map_err(|_| PatchError::BadIndex {
        path: path.to_string(),
        segment: segment.to_string(),
    })
}

fn not_container(path: &str, segment: &str, found: &Value) -> PatchError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    };
    PatchError::NotContainer {
        path: path.to_string(),
        segment: segment.to_string(),
        found,
    }
}
