//! Finding an entity in a collection by natural key.
//!
//! Some Create endpoints return an empty body, or a body without the fields
//! needed to address the new entity. The provider then lists the collection
//! and looks for the element whose natural key (usually its name) matches the
//! planned value.
//!
//! Elements that do not carry the key at all are treated as matches: a list
//! endpoint that omits the key cannot be used to rule an element out.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::value::{Record, Value};

type Predicate = Box<dyn Fn(&JsonValue, &JsonValue) -> bool + Send + Sync>;

/// Looks up an element whose `key` field equals `value`.
pub struct Locator {
    key: String,
    value: JsonValue,
    predicate: Predicate,
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locator")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl Locator {
    /// Create a locator comparing key values with JSON equality.
    pub fn new(key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            predicate: Box::new(|candidate, wanted| candidate == wanted),
        }
    }

    /// Create a locator comparing string key values without regard to case.
    pub fn case_insensitive(key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(key, value).with_predicate(|candidate, wanted| {
            match (candidate.as_str(), wanted.as_str()) {
                (Some(c), Some(w)) => c.eq_ignore_ascii_case(w),
                _ => candidate == wanted,
            }
        })
    }

    /// Replace the equality predicate. It is called as
    /// `predicate(element_value, wanted_value)`.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&JsonValue, &JsonValue) -> bool + Send + Sync + 'static,
    {
        self.predicate = Box::new(predicate);
        self
    }

    /// The key field name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The wanted key value.
    pub fn value(&self) -> &JsonValue {
        &self.value
    }

    fn accepts(&self, element: &Map<String, JsonValue>) -> bool {
        match element.get(&self.key) {
            Some(candidate) => (self.predicate)(candidate, &self.value),
            None => true,
        }
    }

    /// Find the matching element of a JSON array, or test a single JSON
    /// object. Non-object elements are skipped.
    pub fn find(&self, collection: &JsonValue) -> Option<Map<String, JsonValue>> {
        match collection {
            JsonValue::Array(items) => self.find_in_maps(
                items
                    .iter()
                    .filter_map(|item| item.as_object().cloned())
                    .collect(),
            ),
            JsonValue::Object(map) => self.find_in_maps(vec![map.clone()]),
            _ => None,
        }
    }

    /// Find the matching element of any serializable slice.
    ///
    /// Elements that serialize to something other than a JSON object are
    /// skipped.
    pub fn find_in<T: Serialize>(&self, items: &[T]) -> Result<Option<Map<String, JsonValue>>> {
        let mut maps = Vec::with_capacity(items.len());
        for item in items {
            if let JsonValue::Object(map) = serde_json::to_value(item)? {
                maps.push(map);
            }
        }
        Ok(self.find_in_maps(maps))
    }

    /// Find the matching record.
    ///
    /// Records holding unknown values cannot be converted to JSON and are
    /// skipped.
    pub fn find_record<'a>(&self, records: &'a [Record]) -> Option<&'a Record> {
        let converted: Vec<(usize, Map<String, JsonValue>)> = records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| match record.to_json() {
                Ok(JsonValue::Object(map)) => Some((i, map)),
                _ => None,
            })
            .collect();

        let position = self.position(converted.iter().map(|(_, map)| map))?;
        Some(&records[converted[position].0])
    }

    /// Like [`Locator::find_record`], failing with
    /// [`ReconcileError::EntityNotFound`] when nothing matches.
    pub fn require<'a>(&self, records: &'a [Record]) -> Result<&'a Record> {
        self.find_record(records)
            .ok_or_else(|| ReconcileError::EntityNotFound {
                key: self.key.clone(),
                value: display_value(&self.value),
            })
    }

    fn find_in_maps(
        &self,
        mut maps: Vec<Map<String, JsonValue>>,
    ) -> Option<Map<String, JsonValue>> {
        let position = self.position(maps.iter())?;
        Some(maps.swap_remove(position))
    }

    fn position<'m>(
        &self,
        mut maps: impl ExactSizeIterator<Item = &'m Map<String, JsonValue>>,
    ) -> Option<usize> {
        if maps.len() == 1 {
            return maps
                .next()
                .filter(|map| self.accepts(map))
                .map(|_| 0);
        }
        let position = maps.position(|map| self.accepts(map));
        debug!(
            key = %self.key,
            value = %self.value,
            found = position.is_some(),
            "Searched collection for entity"
        );
        position
    }
}

fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a locator from a record field, if the field holds a known value.
pub fn locator_for(record: &Record, key: &str) -> Option<Locator> {
    match record.get(key) {
        Value::Unknown | Value::Null => None,
        value => value.to_json().ok().map(|json| Locator::new(key, json)),
    }
}
