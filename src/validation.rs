//! Validation of planned records against a [`Schema`].
//!
//! The reconciler fails fast on the first shape error. Before a plan is sent
//! to the remote API it is more useful to report every problem at once, as
//! diagnostics the host can show next to the offending attribute.
//!
//! # Example
//!
//! ```
//! use hemmer_reconcile::schema::{Attribute, Schema};
//! use hemmer_reconcile::validation::validate;
//! use hemmer_reconcile::value::{Record, Value};
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("vlan", Attribute::optional_int64());
//!
//! let planned = Record::new().with("name", Value::Unknown).with("vlan", 10i64);
//! assert!(validate(&schema, &planned).is_empty());
//!
//! let planned = Record::new().with("name", "guest").with("vlan", "ten");
//! let diagnostics = validate(&schema, &planned);
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("vlan".to_string()));
//! ```

use std::collections::HashMap;

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema,
};
use crate::value::{join_path, Record, Value};

/// Validate a record against a schema.
///
/// Returns every problem found; an empty list means the record is valid.
///
/// - Required attributes must be present and non-null.
/// - Computed-only attributes are skipped, since the provider sets them.
/// - Unknown values are accepted anywhere: they are pending, not wrong.
/// - Nested blocks are checked recursively, with their min/max item counts.
/// - Fields the schema does not declare are reported.
pub fn validate(schema: &Schema, record: &Record) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, record, "", &mut diagnostics);
    diagnostics
}

/// Like [`validate`], returning the diagnostics as an error.
pub fn validate_result(schema: &Schema, record: &Record) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, record);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether a record is valid against a schema.
pub fn is_valid(schema: &Schema, record: &Record) -> bool {
    validate(schema, record).is_empty()
}

fn validate_block(block: &Block, record: &Record, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    for name in record.names() {
        if !block.attributes.contains_key(name) && !block.blocks.contains_key(name) {
            let attr_path = join_path(path, name);
            diagnostics.push(
                Diagnostic::error(format!("Unsupported attribute '{}'", attr_path))
                    .with_detail("The schema does not declare this attribute")
                    .with_attribute(attr_path),
            );
        }
    }

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, record.get(name), &attr_path, diagnostics);
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested, record.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        Value::Unknown => {},
        Value::Null => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        v => validate_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (attr_type, value) {
        (_, Value::Unknown | Value::Null) | (AttributeType::Dynamic, _) => {},
        (AttributeType::String, Value::String(_))
        | (AttributeType::Int64, Value::Int64(_))
        | (AttributeType::Float64, Value::Float64(_) | Value::Int64(_))
        | (AttributeType::Bool, Value::Bool(_)) => {},
        (
            AttributeType::List(element_type) | AttributeType::Set(element_type),
            Value::List(items),
        ) => {
            for (i, item) in items.iter().enumerate() {
                validate_type(element_type, item, &join_path(path, &i.to_string()), diagnostics);
            }
        },
        (AttributeType::Map(value_type), Value::Object(entries)) => {
            for (key, item) in entries.iter() {
                validate_type(value_type, item, &join_path(path, key), diagnostics);
            }
        },
        (AttributeType::Object(attrs), Value::Object(record)) => {
            validate_object_type(attrs, record, path, diagnostics);
        },
        _ => diagnostics.push(type_error(path, &attr_type.name(), value)),
    }
}

fn validate_object_type(
    attrs: &HashMap<String, AttributeType>,
    record: &Record,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Object attribute types carry no required/optional flags, so presence is not enforced.
    for (name, value) in record.iter() {
        let attr_path = join_path(path, name);
        match attrs.get(name) {
            Some(attr_type) => validate_type(attr_type, value, &attr_path, diagnostics),
            None => diagnostics.push(
                Diagnostic::error(format!("Unsupported attribute '{}'", attr_path))
                    .with_attribute(attr_path),
            ),
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let items: Vec<(String, &Value)> = match (nested.nesting_mode, value) {
        (_, Value::Unknown) => return,
        (_, Value::Null) => Vec::new(),
        (BlockNestingMode::Single, v @ Value::Object(_)) => vec![(path.to_string(), v)],
        (BlockNestingMode::List | BlockNestingMode::Set, Value::List(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (join_path(path, &i.to_string()), item))
            .collect(),
        (BlockNestingMode::Map, Value::Object(entries)) => entries
            .iter()
            .map(|(key, item)| (join_path(path, key), item))
            .collect(),
        (mode, v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected {} for block '{}'", mode_name(mode), path))
                    .with_detail(format!("Got {}", v.type_name()))
                    .with_attribute(path),
            );
            return;
        },
    };

    check_item_count(nested, items.len(), path, diagnostics);

    for (item_path, item) in items {
        match item {
            Value::Object(record) => validate_block(&nested.block, record, &item_path, diagnostics),
            Value::Unknown => {},
            other => diagnostics.push(
                Diagnostic::error(format!("Expected object for block '{}'", item_path))
                    .with_detail(format!("Got {}", other.type_name()))
                    .with_attribute(item_path),
            ),
        }
    }
}

fn check_item_count(
    nested: &NestedBlock,
    len: usize,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let len = len as u32;
    if len < nested.min_items {
        let summary = if nested.nesting_mode == BlockNestingMode::Single {
            format!("Missing required block '{}'", path)
        } else {
            format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            )
        };
        diagnostics.push(Diagnostic::error(summary).with_attribute(path));
    }

    // 0 means unlimited
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path),
        );
    }
}

fn mode_name(mode: BlockNestingMode) -> &'static str {
    match mode {
        BlockNestingMode::Single => "object",
        BlockNestingMode::List => "list",
        BlockNestingMode::Set => "set",
        BlockNestingMode::Map => "map",
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, got.type_name()))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeFlags;

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &Record::new().with("name", "guest")).is_empty());

        let diagnostics = validate(&schema, &Record::new());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        let diagnostics = validate(&schema, &Record::new().with("name", Value::Null));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &Record::new().with("name", 123i64));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
        assert_eq!(diagnostics[0].detail.as_deref(), Some("Expected string, got int64"));
    }

    #[test]
    fn test_unknown_is_accepted() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_block(
                "rules",
                NestedBlock::list(Block::new().with_attribute("port", Attribute::required_int64()))
                    .with_min_items(1),
            );

        let planned = Record::new()
            .with("name", Value::Unknown)
            .with("rules", Value::Unknown);
        assert!(validate(&schema, &planned).is_empty());

        let planned = Record::new().with("name", "x").with(
            "rules",
            Value::List(vec![Record::new().with("port", Value::Unknown).into()]),
        );
        assert!(validate(&schema, &planned).is_empty());
    }

    #[test]
    fn test_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("id", Attribute::computed_string());

        assert!(validate(&schema, &Record::new()).is_empty());
        assert!(validate(&schema, &Record::new().with("id", 123i64)).is_empty());
    }

    #[test]
    fn test_identifier_is_optional() {
        let schema = Schema::v0().with_attribute("network_id", Attribute::identifier_string());
        assert!(validate(&schema, &Record::new()).is_empty());
        assert!(!is_valid(&schema, &Record::new().with("network_id", true)));
    }

    #[test]
    fn test_float_accepts_integers() {
        let schema = Schema::v0().with_attribute(
            "ratio",
            Attribute::new(AttributeType::Float64, AttributeFlags::optional()),
        );
        assert!(is_valid(&schema, &Record::new().with("ratio", 1i64)));
        assert!(is_valid(&schema, &Record::new().with("ratio", 0.25)));
        assert!(!is_valid(&schema, &Record::new().with("ratio", "0.25")));
    }

    #[test]
    fn test_validate_list_and_map() {
        let schema = Schema::v0()
            .with_attribute(
                "tags",
                Attribute::new(
                    AttributeType::list(AttributeType::String),
                    AttributeFlags::optional(),
                ),
            )
            .with_attribute(
                "labels",
                Attribute::new(
                    AttributeType::map(AttributeType::Int64),
                    AttributeFlags::optional(),
                ),
            );

        let record = Record::new()
            .with("tags", Value::List(vec![Value::from("a"), Value::Int64(1)]))
            .with("labels", Record::new().with("a", 1i64).with("b", "two"));
        let diagnostics = validate(&schema, &record);
        let mut paths: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec!["labels.b".to_string(), "tags.1".to_string()]);
    }

    #[test]
    fn test_validate_object_type() {
        let schema = Schema::v0().with_attribute(
            "location",
            Attribute::new(
                AttributeType::object([
                    ("lat", AttributeType::Float64),
                    ("lng", AttributeType::Float64),
                ]),
                AttributeFlags::optional(),
            ),
        );

        assert!(is_valid(&schema, &Record::new().with("location", Record::new().with("lat", 1.0))));

        let diagnostics = validate(
            &schema,
            &Record::new().with("location", Record::new().with("alt", 3.0)),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("location.alt".to_string()));
    }

    #[test]
    fn test_validate_nested_block_single() {
        let schema = Schema::v0().with_block(
            "settings",
            NestedBlock::single(Block::new().with_attribute("mode", Attribute::required_string()))
                .with_min_items(1),
        );

        let diagnostics = validate(&schema, &Record::new());
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Missing required block"));

        let diagnostics = validate(&schema, &Record::new().with("settings", Record::new()));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("settings.mode".to_string()));

        let diagnostics = validate(&schema, &Record::new().with("settings", Value::List(vec![])));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }

    #[test]
    fn test_validate_nested_block_list_counts() {
        let schema = Schema::v0().with_block(
            "rules",
            NestedBlock::list(Block::new().with_attribute("port", Attribute::required_int64()))
                .with_min_items(1)
                .with_max_items(2),
        );
        let rule = |port: i64| Value::from(Record::new().with("port", port));

        let diagnostics = validate(&schema, &Record::new().with("rules", Value::List(vec![])));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at least 1"));

        let diagnostics = validate(
            &schema,
            &Record::new().with("rules", Value::List(vec![rule(1), rule(2), rule(3)])),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 2"));

        let diagnostics = validate(
            &schema,
            &Record::new().with(
                "rules",
                Value::List(vec![rule(1), Record::new().with("port", "x").into()]),
            ),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("rules.1.port".to_string()));
    }

    #[test]
    fn test_validate_nested_block_map() {
        let schema = Schema::v0().with_block(
            "radios",
            NestedBlock::map(Block::new().with_attribute("channel", Attribute::required_int64())),
        );

        let record = Record::new().with(
            "radios",
            Record::new()
                .with("2.4ghz", Record::new().with("channel", 6i64))
                .with("5ghz", Record::new()),
        );
        let diagnostics = validate(&schema, &record);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("radios.5ghz.channel".to_string()));
    }

    #[test]
    fn test_unsupported_attribute() {
        let schema = Schema::v0().with_attribute("name", Attribute::optional_string());
        let diagnostics = validate(&schema, &Record::new().with("nmae", "typo"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Unsupported attribute 'nmae'"));
    }

    #[test]
    fn test_validate_result_helper() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("enabled", Attribute::required_bool());

        let valid = Record::new().with("name", "a").with("enabled", true);
        assert!(validate_result(&schema, &valid).is_ok());

        let err = validate_result(&schema, &Record::new()).unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(err.iter().all(Diagnostic::is_error));
    }
}
