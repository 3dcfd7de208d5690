//! The state reconciliation engine.
//!
//! A [`Reconciler`] merges a *desired* record (prior state or plan, which may
//! hold unknown values) with an *observed* record (built from a remote
//! response, which is often partial) into the record that gets persisted.
//!
//! Two variants exist:
//!
//! - [`Reconciler::merge`] runs after Create and Update. Desired values win:
//!   they reflect explicit configuration, including write-only values the
//!   remote API never echoes back. Observed values fill gaps and resolve
//!   unknowns.
//! - [`Reconciler::merge_read`] runs after Read. Observed values win, except
//!   collections the read returned empty and identifiers it omitted.
//!
//! Both variants fail fast when either record contradicts the schema, and
//! neither leaves an unknown value in its output.
//!
//! # Example
//!
//! ```
//! use hemmer_reconcile::reconcile::Reconciler;
//! use hemmer_reconcile::schema::{Attribute, Schema};
//! use hemmer_reconcile::value::{Record, Value};
//!
//! let schema = Schema::v0()
//!     .with_attribute("network_id", Attribute::identifier_string())
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("password", Attribute::optional_string().sensitive());
//!
//! let planned = Record::new()
//!     .with("network_id", "N_1")
//!     .with("name", "guest")
//!     .with("password", "hunter2");
//! let response = Record::new().with("name", "guest");
//!
//! let state = Reconciler::new(&schema).merge(&planned, &response).unwrap();
//! assert_eq!(state.get("network_id"), &Value::from("N_1"));
//! assert_eq!(state.get("password"), &Value::from("hunter2"));
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::error::{ReconcileError, Result};
use crate::identity::{is_empty_identifier, restore_identifiers, IdentifierField};
use crate::schema::{
    AttributeType, Block, BlockNestingMode, CollectionPolicy, NestedBlock, Schema,
};
use crate::types::{AnomalyResolution, CollectionAnomaly, MergeMode, MergeOutcome};
use crate::value::{join_path, Record, Value};

/// Options controlling a [`Reconciler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Fail when an observed record contains an unknown value.
    /// Default: true.
    pub reject_unknown_observed: bool,
    /// Restore identifiers omitted by the remote response after merging.
    /// Default: true.
    pub identifier_override: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            reject_unknown_observed: true,
            identifier_override: true,
        }
    }
}

impl ReconcileOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether unknown values in observed records are rejected.
    pub fn with_reject_unknown_observed(mut self, reject: bool) -> Self {
        self.reject_unknown_observed = reject;
        self
    }

    /// Set whether the identifier override pass runs.
    pub fn with_identifier_override(mut self, enabled: bool) -> Self {
        self.identifier_override = enabled;
        self
    }
}

/// How a field takes part in a merge.
#[derive(Debug, Clone, PartialEq)]
enum FieldKind {
    Scalar(AttributeType),
    Object(BlockPlan),
    Collection(CollectionPlan),
}

#[derive(Debug, Clone, PartialEq)]
struct CollectionPlan {
    element: BlockPlan,
    policy: CollectionPolicy,
    /// Elements are addressed by map key instead of position.
    keyed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct BlockPlan {
    fields: BTreeMap<String, FieldKind>,
    /// Fields where an empty string counts as absent.
    identifiers: BTreeSet<String>,
}

impl BlockPlan {
    fn from_block(block: &Block) -> Self {
        let mut fields = BTreeMap::new();
        for (name, attr) in &block.attributes {
            fields.insert(
                name.clone(),
                FieldKind::from_type(&attr.attr_type, &attr.collection_policy),
            );
        }
        for (name, nested) in &block.blocks {
            fields.insert(name.clone(), FieldKind::from_nested(nested));
        }
        let identifiers = block
            .attributes
            .iter()
            .filter(|(_, attr)| attr.flags.identifier)
            .map(|(name, _)| name.clone())
            .collect();
        Self {
            fields,
            identifiers,
        }
    }

    fn from_object(attrs: &HashMap<String, AttributeType>) -> Self {
        Self {
            fields: attrs
                .iter()
                .map(|(name, ty)| {
                    (name.clone(), FieldKind::from_type(ty, &CollectionPolicy::Index))
                })
                .collect(),
            identifiers: BTreeSet::new(),
        }
    }
}

impl FieldKind {
    fn from_type(ty: &AttributeType, policy: &CollectionPolicy) -> Self {
        let collection = |attrs: &HashMap<String, AttributeType>, keyed: bool| {
            Self::Collection(CollectionPlan {
                element: BlockPlan::from_object(attrs),
                policy: policy.clone(),
                keyed,
            })
        };
        match ty {
            AttributeType::Object(attrs) => Self::Object(BlockPlan::from_object(attrs)),
            AttributeType::List(inner) | AttributeType::Set(inner) => match inner.as_ref() {
                AttributeType::Object(attrs) => collection(attrs, false),
                _ => Self::Scalar(ty.clone()),
            },
            AttributeType::Map(inner) => match inner.as_ref() {
                AttributeType::Object(attrs) => collection(attrs, true),
                _ => Self::Scalar(ty.clone()),
            },
            _ => Self::Scalar(ty.clone()),
        }
    }

    fn from_nested(nested: &NestedBlock) -> Self {
        let element = BlockPlan::from_block(&nested.block);
        let collection = |keyed| {
            Self::Collection(CollectionPlan {
                element: element.clone(),
                policy: nested.collection_policy.clone(),
                keyed,
            })
        };
        match nested.nesting_mode {
            BlockNestingMode::Single => Self::Object(element.clone()),
            BlockNestingMode::List | BlockNestingMode::Set => collection(false),
            BlockNestingMode::Map => collection(true),
        }
    }
}

/// Merges desired and observed records of one resource schema.
///
/// A reconciler is built once per schema and holds no mutable state, so it
/// can be shared freely between concurrent operations.
#[derive(Debug, Clone)]
pub struct Reconciler {
    schema: Schema,
    plan: BlockPlan,
    identifiers: Vec<IdentifierField>,
    generic_id: Option<String>,
    options: ReconcileOptions,
}

impl Reconciler {
    /// Create a reconciler for `schema` with default options.
    pub fn new(schema: &Schema) -> Self {
        let identifiers = schema
            .identifiers()
            .into_iter()
            .filter_map(|name| {
                let attr = schema.block.attributes.get(name)?;
                Some(IdentifierField::new(name, attr.attr_type.clone()))
            })
            .collect();

        Self {
            schema: schema.clone(),
            plan: BlockPlan::from_block(&schema.block),
            identifiers,
            generic_id: schema.block.generic_id.clone(),
            options: ReconcileOptions::default(),
        }
    }

    /// Replace the options of this reconciler.
    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// The schema this reconciler merges.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The options in effect.
    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// Write-path merge, used after Create and Update.
    pub fn merge(&self, desired: &Record, observed: &Record) -> Result<Record> {
        self.reconcile(MergeMode::Write, desired, observed)
            .map(|outcome| outcome.record)
    }

    /// Read-path merge, used after Read.
    pub fn merge_read(&self, desired: &Record, observed: &Record) -> Result<Record> {
        self.reconcile(MergeMode::Read, desired, observed)
            .map(|outcome| outcome.record)
    }

    /// Merge with the given variant, reporting collection anomalies.
    pub fn reconcile(
        &self,
        mode: MergeMode,
        desired: &Record,
        observed: &Record,
    ) -> Result<MergeOutcome> {
        check_record(&self.plan, desired, "", false)?;
        check_record(
            &self.plan,
            observed,
            "",
            self.options.reject_unknown_observed,
        )?;

        let mut anomalies = Vec::new();
        let mut record = merge_block(&self.plan, desired, observed, "", mode, &mut anomalies);

        if self.options.identifier_override {
            restore_identifiers(
                &self.identifiers,
                self.generic_id.as_deref(),
                desired,
                observed,
                &mut record,
            );
        }
        record.resolve_unknowns();

        debug!(
            mode = mode.as_str(),
            fields = record.len(),
            anomalies = anomalies.len(),
            "Merged desired and observed state"
        );

        Ok(MergeOutcome {
            record,
            mode,
            anomalies,
        })
    }
}

// Shape checks

fn check_record(plan: &BlockPlan, record: &Record, path: &str, reject_unknown: bool) -> Result<()> {
    for (name, value) in record.iter() {
        let field_path = join_path(path, name);
        let kind = plan
            .fields
            .get(name)
            .ok_or_else(|| ReconcileError::SchemaMismatch {
                path: field_path.clone(),
                detail: "field is not declared in the schema".to_string(),
            })?;
        check_value(kind, value, &field_path, reject_unknown)?;
    }
    Ok(())
}

/// Returns true when the caller still has to check the value's type.
fn check_absent(value: &Value, path: &str, reject_unknown: bool) -> Result<bool> {
    match value {
        Value::Unknown if reject_unknown => Err(ReconcileError::UnknownInObserved {
            path: path.to_string(),
        }),
        Value::Unknown | Value::Null => Ok(false),
        _ => Ok(true),
    }
}

fn check_value(kind: &FieldKind, value: &Value, path: &str, reject_unknown: bool) -> Result<()> {
    if !check_absent(value, path, reject_unknown)? {
        return Ok(());
    }
    match (kind, value) {
        (FieldKind::Scalar(ty), _) => check_scalar(ty, value, path, reject_unknown),
        (FieldKind::Object(plan), Value::Object(record)) => {
            check_record(plan, record, path, reject_unknown)
        },
        (FieldKind::Object(_), _) => Err(type_mismatch(path, "object", value)),
        (FieldKind::Collection(c), Value::List(items)) if !c.keyed => {
            for (i, item) in items.iter().enumerate() {
                check_element(c, item, &join_path(path, &i.to_string()), reject_unknown)?;
            }
            Ok(())
        },
        (FieldKind::Collection(c), Value::Object(entries)) if c.keyed => {
            for (key, item) in entries.iter() {
                check_element(c, item, &join_path(path, key), reject_unknown)?;
            }
            Ok(())
        },
        (FieldKind::Collection(c), _) => Err(type_mismatch(
            path,
            if c.keyed { "map(object)" } else { "list(object)" },
            value,
        )),
    }
}

fn check_element(c: &CollectionPlan, item: &Value, path: &str, reject_unknown: bool) -> Result<()> {
    if !check_absent(item, path, reject_unknown)? {
        return Ok(());
    }
    match item {
        Value::Object(record) => check_record(&c.element, record, path, reject_unknown),
        _ => Err(type_mismatch(path, "object", item)),
    }
}

fn check_scalar(ty: &AttributeType, value: &Value, path: &str, reject_unknown: bool) -> Result<()> {
    if !check_absent(value, path, reject_unknown)? {
        return Ok(());
    }
    match (ty, value) {
        (AttributeType::Dynamic, _)
        | (AttributeType::String, Value::String(_))
        | (AttributeType::Bool, Value::Bool(_))
        | (AttributeType::Int64, Value::Int64(_))
        | (AttributeType::Float64, Value::Float64(_) | Value::Int64(_)) => Ok(()),
        (AttributeType::List(inner) | AttributeType::Set(inner), Value::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                check_scalar(inner, item, &join_path(path, &i.to_string()), reject_unknown)?;
            }
            Ok(())
        },
        (AttributeType::Map(inner), Value::Object(entries)) => {
            for (key, item) in entries.iter() {
                check_scalar(inner, item, &join_path(path, key), reject_unknown)?;
            }
            Ok(())
        },
        (AttributeType::Object(attrs), Value::Object(record)) => {
            check_record(&BlockPlan::from_object(attrs), record, path, reject_unknown)
        },
        _ => Err(type_mismatch(path, &ty.name(), value)),
    }
}

fn type_mismatch(path: &str, expected: &str, found: &Value) -> ReconcileError {
    ReconcileError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: found.type_name(),
    }
}

// Merge

fn merge_block(
    plan: &BlockPlan,
    desired: &Record,
    observed: &Record,
    path: &str,
    mode: MergeMode,
    anomalies: &mut Vec<CollectionAnomaly>,
) -> Record {
    let mut merged = Record::new();
    for (name, kind) in &plan.fields {
        if !desired.contains(name) && !observed.contains(name) {
            continue;
        }
        let field_path = join_path(path, name);
        let d = desired.get(name);
        let o = observed.get(name);
        let value = match (mode, kind) {
            (MergeMode::Write, FieldKind::Scalar(_)) if plan.identifiers.contains(name) => {
                fill_identifier_gap(d, o)
            },
            (MergeMode::Write, _) => merge_field(kind, d, o, &field_path, anomalies),
            (MergeMode::Read, _) => merge_field_read(kind, d, o, &field_path, anomalies),
        };
        merged.insert(name.clone(), value);
    }
    merged
}

fn merge_field(
    kind: &FieldKind,
    desired: &Value,
    observed: &Value,
    path: &str,
    anomalies: &mut Vec<CollectionAnomaly>,
) -> Value {
    if desired.is_unknown() {
        return observed.clone();
    }
    match (kind, desired, observed) {
        (FieldKind::Object(plan), Value::Object(d), Value::Object(o)) => {
            Value::Object(merge_block(plan, d, o, path, MergeMode::Write, anomalies))
        },
        (FieldKind::Collection(c), Value::List(_), Value::List(_))
        | (FieldKind::Collection(c), Value::Object(_), Value::Object(_)) => {
            merge_collection(c, desired, observed, path, anomalies)
        },
        _ => fill_gap(desired, observed),
    }
}

/// Desired wins unless it is absent and the observed value is not.
fn fill_gap(desired: &Value, observed: &Value) -> Value {
    if desired.is_zero() && !observed.is_zero() {
        observed.clone()
    } else {
        desired.clone()
    }
}

/// Like [`fill_gap`], with an empty string also counting as absent.
fn fill_identifier_gap(desired: &Value, observed: &Value) -> Value {
    if desired.is_unknown()
        || (is_empty_identifier(desired) && !is_empty_identifier(observed))
    {
        observed.clone()
    } else {
        desired.clone()
    }
}

fn merge_field_read(
    kind: &FieldKind,
    desired: &Value,
    observed: &Value,
    path: &str,
    anomalies: &mut Vec<CollectionAnomaly>,
) -> Value {
    match kind {
        FieldKind::Collection(c) => read_collection(c, desired, observed, path, anomalies),
        _ => observed.clone(),
    }
}

fn collection_len(value: &Value) -> usize {
    match value {
        Value::List(items) => items.len(),
        Value::Object(entries) => entries.len(),
        _ => 0,
    }
}

fn cleaned(value: &Value) -> Value {
    let mut value = value.clone();
    value.resolve_unknowns();
    value
}

fn merge_collection(
    c: &CollectionPlan,
    desired: &Value,
    observed: &Value,
    path: &str,
    anomalies: &mut Vec<CollectionAnomaly>,
) -> Value {
    let desired = cleaned(desired);
    let observed = cleaned(observed);

    match (&desired, &observed) {
        (Value::Object(d), Value::Object(o)) => match &c.policy {
            CollectionPolicy::Index if !d.names().eq(o.names()) => {
                let keep_observed = o.len() > d.len();
                record_anomaly(anomalies, path, d.len(), o.len(), keep_observed);
                if keep_observed {
                    observed.clone()
                } else {
                    desired.clone()
                }
            },
            _ => Value::Object(merge_keyed(c, d, o, path, anomalies)),
        },
        (Value::List(d), Value::List(o)) => match &c.policy {
            CollectionPolicy::MatchByKey(key) => {
                Value::List(merge_matched(c, key, d, o, path, anomalies))
            },
            CollectionPolicy::Index if d.len() == o.len() => Value::List(
                d.iter()
                    .zip(o)
                    .enumerate()
                    .map(|(i, (d, o))| {
                        merge_element(c, d, o, &join_path(path, &i.to_string()), anomalies)
                    })
                    .collect(),
            ),
            CollectionPolicy::Index => {
                let keep_observed = o.len() > d.len();
                record_anomaly(anomalies, path, d.len(), o.len(), keep_observed);
                if keep_observed {
                    observed.clone()
                } else {
                    desired.clone()
                }
            },
        },
        _ => fill_gap(&desired, &observed),
    }
}

fn merge_element(
    c: &CollectionPlan,
    desired: &Value,
    observed: &Value,
    path: &str,
    anomalies: &mut Vec<CollectionAnomaly>,
) -> Value {
    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => {
            Value::Object(merge_block(&c.element, d, o, path, MergeMode::Write, anomalies))
        },
        _ => fill_gap(desired, observed),
    }
}

/// Pair map entries by key. Entries only one side has are kept.
fn merge_keyed(
    c: &CollectionPlan,
    desired: &Record,
    observed: &Record,
    path: &str,
    anomalies: &mut Vec<CollectionAnomaly>,
) -> Record {
    let mut merged = desired.clone();
    for (key, o) in observed.iter() {
        let value = match desired.get_field(key) {
            Some(d) => merge_element(c, d, o, &join_path(path, key), anomalies),
            None => o.clone(),
        };
        merged.insert(key.clone(), value);
    }
    merged
}

/// Pair elements by the value of `key`. Unpaired desired elements keep their
/// position; unpaired observed elements are appended.
fn merge_matched(
    c: &CollectionPlan,
    key: &str,
    desired: &[Value],
    observed: &[Value],
    path: &str,
    anomalies: &mut Vec<CollectionAnomaly>,
) -> Vec<Value> {
    let mut used = vec![false; observed.len()];
    let mut merged = Vec::with_capacity(desired.len().max(observed.len()));

    for (i, d) in desired.iter().enumerate() {
        let element_path = join_path(path, &i.to_string());
        match find_partner(key, d, observed, &mut used) {
            Some(o) => merged.push(merge_element(c, d, o, &element_path, anomalies)),
            None => merged.push(d.clone()),
        }
    }
    merged.extend(
        observed
            .iter()
            .zip(&used)
            .filter(|(_, used)| !**used)
            .map(|(o, _)| o.clone()),
    );
    merged
}

fn element_key<'a>(element: &'a Value, key: &str) -> Option<&'a Value> {
    element
        .as_record()
        .map(|record| record.get(key))
        .filter(|value| value.is_known_present())
}

fn find_partner<'a>(
    key: &str,
    element: &Value,
    candidates: &'a [Value],
    used: &mut [bool],
) -> Option<&'a Value> {
    let wanted = element_key(element, key)?;
    let index = candidates
        .iter()
        .enumerate()
        .position(|(i, candidate)| !used[i] && element_key(candidate, key) == Some(wanted))?;
    used[index] = true;
    Some(&candidates[index])
}

fn read_collection(
    c: &CollectionPlan,
    desired: &Value,
    observed: &Value,
    path: &str,
    anomalies: &mut Vec<CollectionAnomaly>,
) -> Value {
    if collection_len(observed) == 0 {
        if desired.is_unknown() {
            return observed.clone();
        }
        let desired_len = collection_len(desired);
        if desired_len > 0 {
            record_anomaly(anomalies, path, desired_len, 0, false);
        }
        return cleaned(desired);
    }

    match (&c.policy, desired, observed) {
        (CollectionPolicy::MatchByKey(key), Value::List(d), Value::List(o)) => {
            let d = d.iter().map(cleaned).collect::<Vec<_>>();
            let mut used = vec![false; d.len()];
            Value::List(
                o.iter()
                    .enumerate()
                    .map(|(i, o)| match find_partner(key, o, &d, &mut used) {
                        Some(Value::Object(d)) => match o {
                            Value::Object(o) => Value::Object(merge_block(
                                &c.element,
                                d,
                                o,
                                &join_path(path, &i.to_string()),
                                MergeMode::Read,
                                anomalies,
                            )),
                            _ => o.clone(),
                        },
                        _ => o.clone(),
                    })
                    .collect(),
            )
        },
        _ => observed.clone(),
    }
}

fn record_anomaly(
    anomalies: &mut Vec<CollectionAnomaly>,
    path: &str,
    desired_len: usize,
    observed_len: usize,
    kept_observed: bool,
) {
    let resolution = if kept_observed {
        AnomalyResolution::KeptObserved
    } else {
        AnomalyResolution::KeptDesired
    };
    warn!(
        path = %path,
        desired_len,
        observed_len,
        resolution = ?resolution,
        "Collection lengths differ, keeping one side verbatim"
    );
    anomalies.push(CollectionAnomaly {
        path: path.to_string(),
        desired_len,
        observed_len,
        resolution,
    });
}
