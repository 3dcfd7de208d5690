//! Hemmer Reconcile
//!
//! State reconciliation for Hemmer providers.
//!
//! Remote APIs rarely answer a Create, Read or Update with the complete
//! record a provider sent. Write-only values (passwords, pre-shared keys) are
//! never echoed, path identifiers are dropped from responses, and nested
//! collections come back empty. Persisting a response verbatim either reports
//! drift that isn't there or loses data the user configured. This crate merges
//! what the provider knew with what the remote returned, driven by the
//! resource schema.
//!
//! # Overview
//!
//! - **[`value`]**: tri-state values ([`Value::Unknown`], [`Value::Null`],
//!   known) and the [`Record`] tree they form
//! - **[`schema`]**: resource schemas, with identifier flags and per-collection
//!   merge policies
//! - **[`reconcile`]**: the [`Reconciler`], with a write-path merge for
//!   Create/Update and a read-path merge for Read
//! - **[`identity`]**: identifier restoration and the name-based
//!   [`IdentifierRegistry`]
//! - **[`selector`]**: picks the most specific read method
//! - **[`locator`]**: finds a created entity by natural key
//! - **[`driver`]**: runs a [`RemoteResource`] through its lifecycle and
//!   reconciles every response
//! - **[`validation`]**: schema validation of planned records
//! - **[`testing`]**: a lifecycle test harness and assertion helpers
//! - **[`logging`]**: `tracing` subscriber setup
//!
//! # Quick Start
//!
//! ```
//! use hemmer_reconcile::{Attribute, NestedBlock, Block, Reconciler, Record, Schema, Value};
//!
//! let schema = Schema::v0()
//!     .with_attribute("id", Attribute::computed_string().identifier())
//!     .with_attribute("network_id", Attribute::identifier_string())
//!     .with_attribute("name", Attribute::required_string())
//!     .with_block(
//!         "rules",
//!         NestedBlock::list(Block::new().with_attribute("port", Attribute::required_int64())),
//!     )
//!     .with_generic_id("id");
//! let reconciler = Reconciler::new(&schema);
//!
//! // After Create: the plan still has an unknown id, the response omits the
//! // parent network.
//! let planned = Record::new()
//!     .with("id", Value::Unknown)
//!     .with("network_id", "N_1")
//!     .with("name", "web")
//!     .with("rules", Value::List(vec![Record::new().with("port", 443i64).into()]));
//! let response = Record::new()
//!     .with("id", "r-9")
//!     .with("name", "web")
//!     .with("rules", Value::List(vec![Record::new().with("port", 443i64).into()]));
//! let state = reconciler.merge(&planned, &response).unwrap();
//! assert_eq!(state.get("id"), &Value::from("r-9"));
//! assert_eq!(state.get("network_id"), &Value::from("N_1"));
//!
//! // After Read: the remote is authoritative, but an empty collection does
//! // not wipe out the configured rules.
//! let read = Record::new()
//!     .with("id", "r-9")
//!     .with("name", "web-renamed")
//!     .with("rules", Value::List(vec![]));
//! let refreshed = reconciler.merge_read(&state, &read).unwrap();
//! assert_eq!(refreshed.get("name"), &Value::from("web-renamed"));
//! assert_eq!(refreshed.get("rules"), state.get("rules"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod driver;
pub mod error;
pub mod identity;
pub mod locator;
pub mod logging;
pub mod reconcile;
pub mod schema;
pub mod selector;
pub mod testing;
pub mod types;
pub mod validation;
pub mod value;

// Re-export main types at crate root
pub use driver::{DriverOptions, Lifecycle, Operation, RemoteResource, ResourceDriver};
pub use error::{ReconcileError, Result};
pub use identity::{is_empty_identifier, IdentifierRegistry, DEFAULT_IDENTIFIER_NAMES};
pub use locator::Locator;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use reconcile::{ReconcileOptions, Reconciler};
pub use schema::{
    Attribute, AttributeFlags, AttributeType, Block, BlockNestingMode, CollectionPolicy,
    Diagnostic, DiagnosticSeverity, NestedBlock, Schema,
};
pub use selector::{pick_candidate, pick_method, Candidate};
pub use types::{
    changes_between, AnomalyResolution, AttributeChange, CollectionAnomaly, MergeMode,
    MergeOutcome,
};
pub use validation::{is_valid, validate, validate_result};
pub use value::{Record, Value};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
