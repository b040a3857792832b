//! Scope filters: source equality and metadata containment
//!
//! Both predicates are evaluated in storage. The metadata filter is bound as a
//! JSON text parameter and checked by the `json_contains` scalar function.

use crate::error::{KbError, Result};
use serde_json::{Map, Value};

/// A validated metadata containment predicate.
///
/// Always a JSON object. The empty object places no constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter(Map<String, Value>);

impl MetadataFilter {
    /// Parse a filter from JSON text
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| KbError::MalformedFilter(format!("not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Validate an already-parsed JSON value as a filter
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(KbError::MalformedFilter(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// SQL parameter form: `None` when unconstrained, so the predicate
    /// short-circuits for every row.
    pub(crate) fn to_sql_param(&self) -> Option<String> {
        if self.is_unconstrained() {
            None
        } else {
            Some(Value::Object(self.0.clone()).to_string())
        }
    }
}

/// Source and metadata constraints applied to both search streams
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFilter {
    pub source_id: Option<String>,
    pub metadata: Option<MetadataFilter>,
}

impl ScopeFilter {
    pub fn new(source_id: Option<String>, metadata: Option<MetadataFilter>) -> Self {
        Self {
            source_id,
            metadata,
        }
    }

    /// True when neither predicate constrains anything
    pub fn is_unconstrained(&self) -> bool {
        self.source_id.is_none() && self.metadata_param().is_none()
    }

    pub(crate) fn source_param(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub(crate) fn metadata_param(&self) -> Option<String> {
        self.metadata.as_ref().and_then(MetadataFilter::to_sql_param)
    }
}

/// Structural containment of `filter` in `document`.
///
/// Objects contain objects when every filter key is present with a contained
/// value. Arrays contain arrays when every filter element is contained by some
/// document element, and contain a scalar they hold as an element. Scalars
/// must be equal.
pub fn metadata_contains(document: &Value, filter: &Value) -> bool {
    match (document, filter) {
        (Value::Object(doc), Value::Object(f)) => object_contains(doc, f),
        (Value::Array(doc), Value::Array(f)) => f
            .iter()
            .all(|needle| doc.iter().any(|item| metadata_contains(item, needle))),
        (Value::Array(doc), scalar) if !scalar.is_object() => {
            doc.iter().any(|item| !item.is_array() && metadata_contains(item, scalar))
        }
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => false,
        (doc, f) => doc == f,
    }
}

fn object_contains(doc: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(key, expected)| {
        doc.get(key)
            .is_some_and(|actual| metadata_contains(actual, expected))
    })
}

fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => a.as_f64() == b.as_f64(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
