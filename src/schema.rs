//! Schema types for describing resource state.
//!
//! A schema is the static field-classification table the reconciler works
//! from: which fields are scalars, which are nested objects, which are
//! collections of nested objects, and which ones identify the remote entity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The type of an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// A string value.
    String,
    /// A 64-bit integer.
    Int64,
    /// A 64-bit floating point number.
    Float64,
    /// A boolean value.
    Bool,
    /// A list of values of a single type.
    List(Box<AttributeType>),
    /// A set of unique values of a single type.
    Set(Box<AttributeType>),
    /// A map from string keys to values of a single type.
    Map(Box<AttributeType>),
    /// An object with a fixed set of attributes.
    Object(HashMap<String, AttributeType>),
    /// A dynamic type that can hold any value.
    Dynamic,
}

impl AttributeType {
    /// Create a list type.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }

    /// Create a set type.
    pub fn set(element_type: AttributeType) -> Self {
        Self::Set(Box::new(element_type))
    }

    /// Create a map type.
    pub fn map(element_type: AttributeType) -> Self {
        Self::Map(Box::new(element_type))
    }

    /// Create an object type from `(name, type)` pairs.
    pub fn object<I, K>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, AttributeType)>,
        K: Into<String>,
    {
        Self::Object(
            attributes
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        )
    }

    /// A short name for this type, used in error messages.
    pub fn name(&self) -> String {
        match self {
            Self::String => "string".to_string(),
            Self::Int64 => "int64".to_string(),
            Self::Float64 => "float64".to_string(),
            Self::Bool => "bool".to_string(),
            Self::List(inner) => format!("list({})", inner.name()),
            Self::Set(inner) => format!("set({})", inner.name()),
            Self::Map(inner) => format!("map({})", inner.name()),
            Self::Object(_) => "object".to_string(),
            Self::Dynamic => "dynamic".to_string(),
        }
    }
}

/// Describes how an attribute can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// The attribute is required in configuration.
    pub required: bool,
    /// The attribute is optional in configuration.
    pub optional: bool,
    /// The attribute is computed by the provider (read-only).
    pub computed: bool,
    /// The attribute is sensitive and should be hidden in logs/UI.
    pub sensitive: bool,
    /// The attribute addresses the remote entity and must survive responses
    /// that omit it.
    #[serde(default)]
    pub identifier: bool,
}

impl AttributeFlags {
    /// Create flags for a required attribute.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional attribute.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Create flags for a computed attribute (read-only, set by provider).
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional+computed attribute.
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }

    /// Mark the attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Mark the attribute as an identifier.
    pub fn identifier(mut self) -> Self {
        self.identifier = true;
        self
    }
}

/// How two collections of nested objects are reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectionPolicy {
    /// Pair elements by position when both sides have the same length;
    /// otherwise keep the longer collection (write path) or the non-empty
    /// observed one (read path).
    ///
    /// Position carries no identity: if the remote API reorders elements,
    /// equal-length collections are merged against the wrong partner. Use
    /// [`CollectionPolicy::MatchByKey`] for collections with a stable key.
    #[default]
    Index,
    /// Pair elements by the value of the named attribute.
    MatchByKey(String),
}

impl CollectionPolicy {
    /// Create a key-matching policy.
    pub fn match_by_key(attribute: impl Into<String>) -> Self {
        Self::MatchByKey(attribute.into())
    }

    fn is_index(&self) -> bool {
        matches!(self, Self::Index)
    }
}

/// Describes a single attribute in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// The type of the attribute.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Flags describing how the attribute can be used.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Human-readable description of the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How collections of objects held by this attribute are reconciled.
    #[serde(default, skip_serializing_if = "CollectionPolicy::is_index")]
    pub collection_policy: CollectionPolicy,
}

impl Attribute {
    /// Create a new attribute with the given type and flags.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            collection_policy: CollectionPolicy::Index,
        }
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Create an optional+computed string identifier, the usual shape of a
    /// path parameter or foreign key.
    pub fn identifier_string() -> Self {
        Self::new(
            AttributeType::String,
            AttributeFlags::optional_computed().identifier(),
        )
    }

    /// Create a required int64 attribute.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Create an optional int64 attribute.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Create a required bool attribute.
    pub fn required_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::required())
    }

    /// Create an optional bool attribute.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Set the description for this attribute.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the collection policy for this attribute.
    pub fn with_collection_policy(mut self, policy: CollectionPolicy) -> Self {
        self.collection_policy = policy;
        self
    }

    /// Mark this attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }

    /// Mark this attribute as an identifier.
    pub fn identifier(mut self) -> Self {
        self.flags.identifier = true;
        self
    }
}

/// The nesting mode for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockNestingMode {
    /// A single nested block (at most one).
    #[default]
    Single,
    /// A list of nested blocks (zero or more, ordered).
    List,
    /// A set of nested blocks (zero or more, unordered, unique).
    Set,
    /// A map of nested blocks keyed by string.
    Map,
}

/// A group of attributes and nested blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The attributes within this block.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Attribute>,
    /// Nested blocks within this block.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub blocks: HashMap<String, NestedBlock>,
    /// Human-readable description of the block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Attribute holding the generic remote id, when the remote API exposes
    /// one next to more specific identifier names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_id: Option<String>,
}

impl Block {
    /// Create a new empty block.
    pub fn new() -> Self {
        Self {
            attributes: HashMap::new(),
            blocks: HashMap::new(),
            description: None,
            generic_id: None,
        }
    }

    /// Add an attribute to this block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to this block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    /// Set the description for this block.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Name the attribute that holds the generic remote id.
    pub fn with_generic_id(mut self, name: impl Into<String>) -> Self {
        self.generic_id = Some(name.into());
        self
    }

    /// Names of the attributes flagged as identifiers, sorted.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .iter()
            .filter(|(_, attr)| attr.flags.identifier)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

/// A nested block with its nesting mode and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    /// The block definition.
    #[serde(flatten)]
    pub block: Block,
    /// How the block is nested (single, list, set, map).
    #[serde(default)]
    pub nesting_mode: BlockNestingMode,
    /// Minimum number of blocks required.
    #[serde(default)]
    pub min_items: u32,
    /// Maximum number of blocks allowed (0 = unlimited).
    #[serde(default)]
    pub max_items: u32,
    /// How list and set blocks are reconciled.
    #[serde(default, skip_serializing_if = "CollectionPolicy::is_index")]
    pub collection_policy: CollectionPolicy,
}

impl NestedBlock {
    fn with_mode(block: Block, nesting_mode: BlockNestingMode, max_items: u32) -> Self {
        Self {
            block,
            nesting_mode,
            min_items: 0,
            max_items,
            collection_policy: CollectionPolicy::Index,
        }
    }

    /// Create a single nested block (0 or 1 allowed).
    pub fn single(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Single, 1)
    }

    /// Create a list of nested blocks.
    pub fn list(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::List, 0)
    }

    /// Create a set of nested blocks.
    pub fn set(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Set, 0)
    }

    /// Create a map of nested blocks.
    pub fn map(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Map, 0)
    }

    /// Set the minimum number of blocks required.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Set the maximum number of blocks allowed.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }

    /// Set the collection policy for this block.
    pub fn with_collection_policy(mut self, policy: CollectionPolicy) -> Self {
        self.collection_policy = policy;
        self
    }
}

/// Schema for a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// The version of this schema (for state upgrades).
    #[serde(default)]
    pub version: u64,
    /// The root block containing all attributes and nested blocks.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// Create a new schema with the given version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// Create a schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add an attribute to the schema.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to the schema.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block.blocks.insert(name.into(), block);
        self
    }

    /// Name the attribute that holds the generic remote id.
    pub fn with_generic_id(mut self, name: impl Into<String>) -> Self {
        self.block.generic_id = Some(name.into());
        self
    }

    /// Names of the top-level identifier attributes, sorted.
    pub fn identifiers(&self) -> Vec<&str> {
        self.block.identifiers()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::v0()
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A user-facing diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether this is an error diagnostic.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_type_names() {
        assert_eq!(AttributeType::list(AttributeType::String).name(), "list(string)");
        assert_eq!(AttributeType::map(AttributeType::Int64).name(), "map(int64)");
        let object = AttributeType::object([("port", AttributeType::Int64)]);
        assert!(matches!(object, AttributeType::Object(ref attrs) if attrs.len() == 1));
        assert_eq!(object.name(), "object");
    }

    #[test]
    fn test_attribute_flags() {
        let required = AttributeFlags::required();
        assert!(required.required);
        assert!(!required.identifier);

        let id = AttributeFlags::optional_computed().identifier();
        assert!(id.optional);
        assert!(id.computed);
        assert!(id.identifier);
    }

    #[test]
    fn test_identifier_string() {
        let attr = Attribute::identifier_string().with_description("Parent network");
        assert_eq!(attr.attr_type, AttributeType::String);
        assert!(attr.flags.identifier);
        assert_eq!(attr.description, Some("Parent network".to_string()));
    }

    #[test]
    fn test_schema_identifiers() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("serial", Attribute::identifier_string())
            .with_attribute("network_id", Attribute::required_string().identifier())
            .with_generic_id("id");

        assert_eq!(schema.identifiers(), vec!["network_id", "serial"]);
        assert_eq!(schema.block.generic_id.as_deref(), Some("id"));
    }

    #[test]
    fn test_nested_block_policy() {
        let block =
            NestedBlock::list(Block::new().with_attribute("name", Attribute::required_string()))
                .with_collection_policy(CollectionPolicy::match_by_key("name"))
                .with_min_items(1);

        assert_eq!(block.nesting_mode, BlockNestingMode::List);
        assert_eq!(block.min_items, 1);
        assert_eq!(block.collection_policy, CollectionPolicy::MatchByKey("name".to_string()));

        let single = NestedBlock::single(Block::new());
        assert_eq!(single.max_items, 1);
        assert_eq!(single.collection_policy, CollectionPolicy::Index);
    }

    #[test]
    fn test_schema_serde() {
        let schema = Schema::v0()
            .with_attribute("serial", Attribute::identifier_string())
            .with_block(
                "rules",
                NestedBlock::list(Block::new().with_attribute("port", Attribute::optional_int64()))
                    .with_collection_policy(CollectionPolicy::match_by_key("port")),
            );

        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["attributes"]["serial"]["identifier"], true);
        assert_eq!(json["blocks"]["rules"]["collection_policy"]["match_by_key"], "port");

        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_diagnostic() {
        let err = Diagnostic::error("Invalid state")
            .with_detail("The remote id was empty")
            .with_attribute("id");

        assert!(err.is_error());
        assert_eq!(err.summary, "Invalid state");
        assert_eq!(err.detail, Some("The remote id was empty".to_string()));
        assert_eq!(err.attribute, Some("id".to_string()));
        assert!(!Diagnostic::warning("heads up").is_error());
    }
}
