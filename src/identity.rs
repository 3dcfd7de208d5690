//! Identifier handling.
//!
//! Identifier attributes (path parameters, foreign keys, serial numbers) are
//! what a provider needs to address the same remote entity again. Remote
//! read and update responses routinely omit them, so after every merge the
//! identifiers known locally are restored over empty observed values.
//!
//! Schemas mark identifiers explicitly with [`Attribute::identifier`]. For
//! schemas produced by a generator that only knows field names, an
//! [`IdentifierRegistry`] marks them by name instead.
//!
//! [`Attribute::identifier`]: crate::schema::Attribute::identifier

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::schema::{AttributeType, Block, Schema};
use crate::value::{Record, Value};

/// Identifier names used by generated network-management schemas.
pub const DEFAULT_IDENTIFIER_NAMES: &[&str] = &[
    "id",
    "serial",
    "network_id",
    "organization_id",
    "device_id",
    "profile_id",
    "role_id",
    "policy_id",
    "admin_id",
    "client_id",
    "user_id",
    "group_id",
    "template_id",
    "config_template_id",
    "switch_profile_id",
    "port_id",
    "vlan_id",
    "ssid_number",
    "rule_id",
    "action_batch_id",
    "alert_config_id",
    "hook_id",
    "http_server_id",
    "payload_template_id",
    "saml_role_id",
    "idp_id",
    "policy_object_id",
    "policy_object_group_id",
    "application_id",
    "interface_id",
    "static_route_id",
    "vpn_id",
    "zone_id",
    "tag_id",
    "custom_performance_class_id",
    "link_aggregation_id",
    "qos_rule_id",
    "access_policy_number",
];

/// A set of attribute names treated as identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRegistry {
    names: BTreeSet<String>,
}

impl IdentifierRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            names: BTreeSet::new(),
        }
    }

    /// Add a name to the registry.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Flag every top-level attribute of `schema` whose name is registered.
    ///
    /// If the schema has an attribute named `id` and names no generic id yet,
    /// `id` becomes the generic id.
    pub fn mark(&self, mut schema: Schema) -> Schema {
        self.mark_block(&mut schema.block);
        schema
    }

    fn mark_block(&self, block: &mut Block) {
        for (name, attr) in block.attributes.iter_mut() {
            if self.contains(name) {
                attr.flags.identifier = true;
            }
        }
        if block.generic_id.is_none() && block.attributes.contains_key("id") {
            block.generic_id = Some("id".to_string());
        }
    }
}

impl Default for IdentifierRegistry {
    /// The registry of [`DEFAULT_IDENTIFIER_NAMES`].
    fn default() -> Self {
        DEFAULT_IDENTIFIER_NAMES.iter().copied().collect()
    }
}

impl<'a> FromIterator<&'a str> for IdentifierRegistry {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(str::to_string).collect(),
        }
    }
}

/// Whether an identifier value counts as absent.
///
/// Remote APIs echo an omitted identifier either as a missing field or as an
/// empty string.
pub fn is_empty_identifier(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// An identifier attribute and its declared type.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IdentifierField {
    pub(crate) name: String,
    pub(crate) attr_type: AttributeType,
}

impl IdentifierField {
    pub(crate) fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
        }
    }

    /// Convert the generic id into this field's type, if it fits.
    fn coerce(&self, id: &Value) -> Option<Value> {
        match (&self.attr_type, id) {
            (AttributeType::String | AttributeType::Dynamic, Value::String(_)) => Some(id.clone()),
            (AttributeType::String, Value::Int64(i)) => Some(Value::String(i.to_string())),
            (AttributeType::Int64 | AttributeType::Dynamic, Value::Int64(_)) => Some(id.clone()),
            (AttributeType::Int64, Value::String(s)) => s.parse().ok().map(Value::Int64),
            _ => None,
        }
    }
}

/// Restore identifiers into `merged` after a top-level merge.
///
/// For each identifier whose observed value is empty:
/// - a known, non-empty desired value is put back;
/// - otherwise the observed generic id is copied in, when there is one.
pub(crate) fn restore_identifiers(
    identifiers: &[IdentifierField],
    generic_id: Option<&str>,
    desired: &Record,
    observed: &Record,
    merged: &mut Record,
) {
    let observed_generic = generic_id
        .map(|name| observed.get(name))
        .filter(|value| !is_empty_identifier(value));

    for field in identifiers {
        let name = &field.name;
        if !is_empty_identifier(observed.get(name)) {
            continue;
        }

        let desired_value = desired.get(name);
        if !desired_value.is_unknown() && !is_empty_identifier(desired_value) {
            debug!(field = %name, "Restoring identifier omitted by remote response");
            merged.insert(name.clone(), desired_value.clone());
            continue;
        }

        if Some(name.as_str()) == generic_id {
            continue;
        }
        match observed_generic.and_then(|id| field.coerce(id)) {
            Some(id) => {
                debug!(field = %name, "Filling identifier from generic remote id");
                merged.insert(name.clone(), id);
            },
            None if observed_generic.is_some() => {
                warn!(
                    field = %name,
                    expected = %field.attr_type.name(),
                    "Generic remote id does not fit identifier type"
                );
            },
            None => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;

    fn ids(names: &[&str]) -> Vec<IdentifierField> {
        names
            .iter()
            .map(|n| IdentifierField::new(*n, AttributeType::String))
            .collect()
    }

    #[test]
    fn test_default_registry() {
        let registry = IdentifierRegistry::default();
        assert!(registry.contains("network_id"));
        assert!(registry.contains("serial"));
        assert!(!registry.contains("name"));
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_mark_schema() {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("network_id", Attribute::required_string())
            .with_attribute("name", Attribute::required_string());

        let marked = IdentifierRegistry::default().mark(schema);
        assert_eq!(marked.identifiers(), vec!["id", "network_id"]);
        assert_eq!(marked.block.generic_id.as_deref(), Some("id"));
    }

    #[test]
    fn test_mark_keeps_existing_generic_id() {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("uid", Attribute::computed_string())
            .with_generic_id("uid");

        let marked = IdentifierRegistry::new().with_name("uid").mark(schema);
        assert_eq!(marked.block.generic_id.as_deref(), Some("uid"));
        assert_eq!(marked.identifiers(), vec!["uid"]);
    }

    #[test]
    fn test_is_empty_identifier() {
        assert!(is_empty_identifier(&Value::Null));
        assert!(is_empty_identifier(&Value::from("")));
        assert!(!is_empty_identifier(&Value::from("N_1")));
        assert!(!is_empty_identifier(&Value::Int64(0)));
        assert!(!is_empty_identifier(&Value::Unknown));
    }

    #[test]
    fn test_restore_desired_identifier() {
        let desired = Record::new().with("network_id", "N_1");
        let observed = Record::new().with("network_id", "");
        let mut merged = observed.clone();

        restore_identifiers(&ids(&["network_id"]), None, &desired, &observed, &mut merged);
        assert_eq!(merged.get("network_id"), &Value::from("N_1"));
    }

    #[test]
    fn test_unknown_desired_identifier_is_not_restored() {
        let desired = Record::new().with("role_id", Value::Unknown);
        let observed = Record::new();
        let mut merged = Record::new();

        restore_identifiers(&ids(&["role_id"]), None, &desired, &observed, &mut merged);
        assert!(!merged.contains("role_id"));
    }

    #[test]
    fn test_generic_id_fills_specific_identifier() {
        let desired = Record::new().with("role_id", Value::Unknown);
        let observed = Record::new().with("id", "r-42");
        let mut merged = Record::new().with("role_id", Value::Null).with("id", "r-42");

        restore_identifiers(
            &ids(&["id", "role_id"]),
            Some("id"),
            &desired,
            &observed,
            &mut merged,
        );
        assert_eq!(merged.get("role_id"), &Value::from("r-42"));
    }

    #[test]
    fn test_generic_id_is_coerced_to_identifier_type() {
        let desired = Record::new();
        let observed = Record::new().with("id", 42i64);
        let mut merged = observed.clone();

        restore_identifiers(
            &[IdentifierField::new("profile_id", AttributeType::String)],
            Some("id"),
            &desired,
            &observed,
            &mut merged,
        );
        assert_eq!(merged.get("profile_id"), &Value::from("42"));

        let mut merged = observed.clone();
        restore_identifiers(
            &[IdentifierField::new("enabled", AttributeType::Bool)],
            Some("id"),
            &desired,
            &observed,
            &mut merged,
        );
        assert!(!merged.contains("enabled"));
    }

    #[test]
    fn test_observed_identifier_wins_when_present() {
        let desired = Record::new().with("serial", "Q2-OLD");
        let observed = Record::new().with("serial", "Q2-NEW");
        let mut merged = Record::new().with("serial", "Q2-NEW");

        restore_identifiers(&ids(&["serial"]), None, &desired, &observed, &mut merged);
        assert_eq!(merged.get("serial"), &Value::from("Q2-NEW"));
    }
}
