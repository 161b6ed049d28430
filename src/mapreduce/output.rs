//! Parsing of AI responses into text or structured results

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

/// How an AI response is interpreted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "fields")]
pub enum MapOutputMode {
    /// Keep the raw response text
    #[default]
    Text,
    /// Parse a JSON object and keep exactly these fields
    Structured(Vec<String>),
}

impl MapOutputMode {
    /// `Structured` when a non-empty field list is configured
    pub fn from_fields(fields: Option<Vec<String>>) -> Self {
        match fields {
            Some(fields) if !fields.is_empty() => MapOutputMode::Structured(fields),
            _ => MapOutputMode::Text,
        }
    }

    pub fn fields(&self) -> &[String] {
        match self {
            MapOutputMode::Text => &[],
            MapOutputMode::Structured(fields) => fields,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, MapOutputMode::Structured(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputParseError {
    #[error("Response contains no JSON: {excerpt}")]
    NoJson { excerpt: String },

    #[error("Expected a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("Expected a JSON array, got {found}")]
    NotAnArray { found: &'static str },

    #[error("Response is missing fields: {}", .missing.join(", "))]
    MissingFields { missing: Vec<String> },

    #[error("Expected {expected} results, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(80) {
        Some((index, _)) => format!("{}...", &trimmed[..index]),
        None => trimmed.to_string(),
    }
}

fn fence_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("Invalid regex pattern")
    })
}

fn slice_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Find a JSON value in an AI response
///
/// Tries the whole response, then fenced code blocks, then the outermost
/// object or array embedded in surrounding prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    for caps in fence_regex().captures_iter(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Some(value);
        }
    }

    let object = slice_between(trimmed, '{', '}');
    let array = slice_between(trimmed, '[', ']');
    let mut candidates = [object, array];
    // Whichever opens first is the outermost
    if let (Some(o), Some(a)) = (object, array) {
        if a.as_ptr() < o.as_ptr() {
            candidates = [array, object];
        }
    }
    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
}

/// Keep exactly `fields` from a JSON object
pub fn select_fields(
    value: Value,
    fields: &[String],
) -> Result<Map<String, Value>, OutputParseError> {
    let mut object = match value {
        Value::Object(object) => object,
        other => return Err(OutputParseError::NotAnObject { found: kind(&other) }),
    };

    let missing: Vec<String> = fields
        .iter()
        .filter(|field| !object.contains_key(field.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(OutputParseError::MissingFields { missing });
    }

    Ok(fields
        .iter()
        .filter_map(|field| object.remove(field).map(|value| (field.clone(), value)))
        .collect())
}

/// Parse a response holding one JSON object with the named fields
pub fn parse_structured(text: &str, fields: &[String]) -> Result<Map<String, Value>, OutputParseError> {
    let value = extract_json(text).ok_or_else(|| OutputParseError::NoJson {
        excerpt: excerpt(text),
    })?;
    select_fields(value, fields)
}

/// Parse a response holding a JSON array of exactly `expected` elements
pub fn parse_array(text: &str, expected: usize) -> Result<Vec<Value>, OutputParseError> {
    let value = extract_json(text).ok_or_else(|| OutputParseError::NoJson {
        excerpt: excerpt(text),
    })?;
    let values = match value {
        Value::Array(values) => values,
        other => return Err(OutputParseError::NotAnArray { found: kind(&other) }),
    };
    if values.len() != expected {
        return Err(OutputParseError::LengthMismatch {
            expected,
            actual: values.len(),
        });
    }
    Ok(values)
}
