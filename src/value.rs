//! Tri-state values and records.
//!
//! A [`Record`] is one instance of a resource schema: a tree of named fields.
//! Every leaf is a [`Value`], which distinguishes a known value, a known-absent
//! value ([`Value::Null`]) and a value that will only be known after a pending
//! remote operation ([`Value::Unknown`]).
//!
//! `Unknown` has no JSON representation. Conversions from JSON never produce
//! it, and serializing a tree that still contains one fails.
//!
//! # Example
//!
//! ```
//! use hemmer_reconcile::value::{Record, Value};
//! use serde_json::json;
//!
//! let planned = Record::new()
//!     .with("name", "web")
//!     .with("id", Value::Unknown);
//! assert!(planned.contains_unknown());
//!
//! let observed = Record::from_json(json!({"name": "web", "id": "n-1"})).unwrap();
//! assert_eq!(observed.get("id"), &Value::from("n-1"));
//! ```

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

static NULL: Value = Value::Null;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Not known until a pending remote operation completes.
    Unknown,
    /// Known to be absent.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A 64-bit integer.
    Int64(i64),
    /// A 64-bit float.
    Float64(f64),
    /// A string.
    String(String),
    /// A list or set, of primitives or of nested records.
    List(Vec<Value>),
    /// A nested record, or a map keyed by string.
    Object(Record),
}

impl Value {
    /// Whether this value is [`Value::Unknown`].
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Whether this value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value is the zero value of its field, i.e. known-absent.
    pub fn is_zero(&self) -> bool {
        self.is_null()
    }

    /// Whether this value is known and not absent.
    pub fn is_known_present(&self) -> bool {
        !self.is_null() && !self.is_unknown()
    }

    /// A short name for the runtime type of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int64(_) => "int64",
            Self::Float64(_) => "float64",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    /// Borrow the string, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integer, if this is an int64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// The boolean, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the elements, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the record, if this is an object.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Object(record) => Some(record),
            _ => None,
        }
    }

    /// Whether an unknown value appears anywhere in this tree.
    pub fn contains_unknown(&self) -> bool {
        self.unknown_path("").is_some()
    }

    /// The path of the first unknown value in this tree, relative to `base`.
    pub fn unknown_path(&self, base: &str) -> Option<String> {
        match self {
            Self::Unknown => Some(base.to_string()),
            Self::List(items) => items
                .iter()
                .enumerate()
                .find_map(|(i, item)| item.unknown_path(&join_path(base, &i.to_string()))),
            Self::Object(record) => record.unknown_path(base),
            _ => None,
        }
    }

    /// Replace every unknown value in this tree with `Null`.
    pub fn resolve_unknowns(&mut self) {
        match self {
            Self::Unknown => *self = Self::Null,
            Self::List(items) => items.iter_mut().for_each(Value::resolve_unknowns),
            Self::Object(record) => record.resolve_unknowns(),
            _ => {},
        }
    }

    /// Convert to JSON, failing if the tree contains an unknown value.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.to_json_at("")
    }

    fn to_json_at(&self, path: &str) -> Result<serde_json::Value> {
        Ok(match self {
            Self::Unknown => {
                return Err(ReconcileError::UnknownValue {
                    path: path.to_string(),
                })
            },
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int64(i) => serde_json::Value::from(*i),
            Self::Float64(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| ReconcileError::TypeMismatch {
                    path: path.to_string(),
                    expected: "finite float64".to_string(),
                    found: "float64",
                })?,
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| item.to_json_at(&join_path(path, &i.to_string())))
                    .collect::<Result<_>>()?,
            ),
            Self::Object(record) => serde_json::Value::Object(record.to_json_map(path)?),
        })
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int64(i),
                None => Self::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            },
            serde_json::Value::Object(map) => Self::Object(Record::from(map)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float64(f)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Object(record)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Unknown => Err(S::Error::custom("unknown value cannot be serialized")),
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int64(i) => serializer.serialize_i64(*i),
            Self::Float64(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => serializer.collect_seq(items),
            Self::Object(record) => record.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// One instance of a schema: named fields, ordered by name.
///
/// A field that is not present reads as [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field to this record.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Parse a record from a JSON object.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(Self::from(map)),
            other => Err(ReconcileError::SchemaMismatch {
                path: String::new(),
                detail: format!("expected a JSON object, got {}", json_type_name(&other)),
            }),
        }
    }

    /// Convert to a JSON object, failing if the record contains an unknown value.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Object(self.to_json_map("")?))
    }

    fn to_json_map(&self, base: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
        self.fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.to_json_at(&join_path(base, name))?)))
            .collect()
    }

    /// Get a field, reading a missing field as `Null`.
    pub fn get(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&NULL)
    }

    /// Get a field only if it is present.
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Get a mutable reference to a present field.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Whether the field is present (even if `Null`).
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Iterate over the present fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Names of the present fields in order.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Number of present fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether an unknown value appears anywhere in this record.
    pub fn contains_unknown(&self) -> bool {
        self.unknown_path("").is_some()
    }

    /// The path of the first unknown value in this record, relative to `base`.
    pub fn unknown_path(&self, base: &str) -> Option<String> {
        self.fields
            .iter()
            .find_map(|(name, value)| value.unknown_path(&join_path(base, name)))
    }

    /// Replace every unknown value in this record with `Null`.
    pub fn resolve_unknowns(&mut self) {
        self.fields.values_mut().for_each(Value::resolve_unknowns);
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Record {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(&self.fields)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Map::deserialize(deserializer).map(Record::from)
    }
}

pub(crate) fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_field_reads_null() {
        let record = Record::new().with("name", "web");
        assert_eq!(record.get("name"), &Value::from("web"));
        assert_eq!(record.get("missing"), &Value::Null);
        assert!(record.get_field("missing").is_none());
        assert!(!record.contains("missing"));
    }

    #[test]
    fn test_from_json() {
        let record = Record::from_json(json!({
            "name": "web",
            "count": 3,
            "ratio": 0.5,
            "enabled": true,
            "tags": ["a", "b"],
            "nested": {"port": 80},
            "gone": null
        }))
        .unwrap();

        assert_eq!(record.get("count"), &Value::Int64(3));
        assert_eq!(record.get("ratio"), &Value::Float64(0.5));
        assert_eq!(record.get("enabled"), &Value::Bool(true));
        assert_eq!(
            record.get("tags"),
            &Value::List(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(
            record.get("nested").as_record().unwrap().get("port"),
            &Value::Int64(80)
        );
        assert!(record.contains("gone"));
        assert!(record.get("gone").is_null());
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        let err = Record::from_json(json!(["not", "an", "object"])).unwrap_err();
        assert!(matches!(err, ReconcileError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_to_json_reports_unknown_path() {
        let record = Record::new().with(
            "rules",
            Value::List(vec![Record::new().with("port", Value::Unknown).into()]),
        );
        let err = record.to_json().unwrap_err();
        match err {
            ReconcileError::UnknownValue { path } => assert_eq!(path, "rules.0.port"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_unknowns() {
        let mut record = Record::new()
            .with("id", Value::Unknown)
            .with("nested", Record::new().with("serial", Value::Unknown))
            .with("name", "kept");
        assert_eq!(record.unknown_path(""), Some("id".to_string()));

        record.resolve_unknowns();
        assert!(!record.contains_unknown());
        assert!(record.get("id").is_null());
        assert_eq!(record.get("name"), &Value::from("kept"));
    }

    #[test]
    fn test_serialize_refuses_unknown() {
        let known = Record::new().with("name", "web").with("port", 8080i64);
        assert_eq!(
            serde_json::to_value(&known).unwrap(),
            json!({"name": "web", "port": 8080})
        );

        let pending = Record::new().with("id", Value::Unknown);
        assert!(serde_json::to_string(&pending).is_err());
    }

    #[test]
    fn test_deserialize() {
        let record: Record = serde_json::from_str(r#"{"id": "n-1", "size": 2}"#).unwrap();
        assert_eq!(record.get("id").as_str(), Some("n-1"));
        assert_eq!(record.get("size").as_i64(), Some(2));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }

    #[test]
    fn test_zero_and_presence() {
        assert!(Value::Null.is_zero());
        assert!(!Value::Unknown.is_zero());
        assert!(!Value::from("").is_zero());
        assert!(Value::from(0i64).is_known_present());
        assert!(!Value::Unknown.is_known_present());
    }
}
