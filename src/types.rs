//! Result types shared by the reconciler and the driver.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::value::{join_path, Record, Value};

/// Which merge variant produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// After Create or Update: desired values are authoritative.
    Write,
    /// After Read: observed values are authoritative.
    Read,
}

impl MergeMode {
    /// Name of the mode for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Write => "write",
            MergeMode::Read => "read",
        }
    }
}

/// How a collection anomaly was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyResolution {
    /// The desired collection was kept.
    KeptDesired,
    /// The observed collection was kept.
    KeptObserved,
}

/// Two collections of nested objects that could not be paired element-wise.
///
/// Not an error: the collection policy resolves it deterministically, but it
/// usually means the remote API returned a partial collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionAnomaly {
    /// Attribute path of the collection.
    pub path: String,
    /// Number of desired elements.
    pub desired_len: usize,
    /// Number of observed elements.
    pub observed_len: usize,
    /// Which side was kept.
    pub resolution: AnomalyResolution,
}

/// A merged record together with what happened while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The record to persist.
    pub record: Record,
    /// The merge variant used.
    pub mode: MergeMode,
    /// Collections resolved by a heuristic instead of element-wise.
    pub anomalies: Vec<CollectionAnomaly>,
}

/// A change to a single attribute between two records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if added).
    pub before: Option<Value>,
    /// The value after the change (None if removed).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// List the attribute-level differences between two records.
///
/// Used to report drift after a read. A field set to `Null` counts as
/// absent. Nested records and equal-length lists are compared element by
/// element; lists of different lengths are reported as one change.
pub fn changes_between(before: &Record, after: &Record) -> Vec<AttributeChange> {
    let mut changes = Vec::new();
    diff_records(before, after, "", &mut changes);
    changes
}

fn diff_records(before: &Record, after: &Record, path: &str, changes: &mut Vec<AttributeChange>) {
    let names: BTreeSet<&String> = before.names().chain(after.names()).collect();
    for name in names {
        diff_values(
            before.get(name),
            after.get(name),
            &join_path(path, name),
            changes,
        );
    }
}

fn diff_values(before: &Value, after: &Value, path: &str, changes: &mut Vec<AttributeChange>) {
    if before == after {
        return;
    }
    match (before, after) {
        (Value::Null, _) => changes.push(AttributeChange::added(path, after.clone())),
        (_, Value::Null) => changes.push(AttributeChange::removed(path, before.clone())),
        (Value::Object(b), Value::Object(a)) => diff_records(b, a, path, changes),
        (Value::List(b), Value::List(a)) if b.len() == a.len() => {
            for (i, (b, a)) in b.iter().zip(a).enumerate() {
                diff_values(b, a, &join_path(path, &i.to_string()), changes);
            }
        },
        _ => changes.push(AttributeChange::modified(path, before.clone(), after.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("name", Value::from("test"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(Value::from("test")));

        let removed = AttributeChange::removed("name", Value::from("old"));
        assert_eq!(removed.before, Some(Value::from("old")));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("count", Value::Int64(1), Value::Int64(2));
        assert_eq!(modified.before, Some(Value::Int64(1)));
        assert_eq!(modified.after, Some(Value::Int64(2)));
    }

    #[test]
    fn test_changes_between_scalars() {
        let before = Record::new()
            .with("name", "old")
            .with("enabled", true)
            .with("notes", "gone soon");
        let after = Record::new()
            .with("name", "new")
            .with("enabled", true)
            .with("vlan", 10i64);

        let changes = changes_between(&before, &after);
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "notes", "vlan"]);
        assert_eq!(changes[1].after, None);
        assert_eq!(changes[2].before, None);
    }

    #[test]
    fn test_changes_between_nested() {
        let before = Record::new().with(
            "rules",
            Value::List(vec![
                Record::new().with("port", 80i64).into(),
                Record::new().with("port", 443i64).into(),
            ]),
        );
        let after = Record::new().with(
            "rules",
            Value::List(vec![
                Record::new().with("port", 80i64).into(),
                Record::new().with("port", 8443i64).into(),
            ]),
        );

        let changes = changes_between(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "rules.1.port");
    }

    #[test]
    fn test_changes_between_list_lengths() {
        let before = Record::new().with("tags", Value::List(vec![Value::from("a")]));
        let after = Record::new().with(
            "tags",
            Value::List(vec![Value::from("a"), Value::from("b")]),
        );

        let changes = changes_between(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "tags");
    }

    #[test]
    fn test_no_changes() {
        let record = Record::new().with("name", "same");
        assert!(changes_between(&record, &record).is_empty());
        assert!(changes_between(&Record::new().with("x", Value::Null), &Record::new()).is_empty());
    }

    #[test]
    fn test_merge_mode_names() {
        assert_eq!(MergeMode::Write.as_str(), "write");
        assert_eq!(MergeMode::Read.as_str(), "read");
    }
}
