//! Error types for the reconciliation engine.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors that can occur while reconciling provider state.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A record does not have the shape its schema declares.
    #[error("Schema mismatch at '{path}': {detail}")]
    SchemaMismatch {
        /// Attribute path where the mismatch was found.
        path: String,
        /// What was wrong.
        detail: String,
    },

    /// A value's runtime type contradicts its declared schema type.
    #[error("Type mismatch at '{path}': expected {expected}, got {found}")]
    TypeMismatch {
        /// Attribute path of the offending value.
        path: String,
        /// The type the schema declares.
        expected: String,
        /// The type actually present.
        found: &'static str,
    },

    /// An observed record carried an unknown value.
    #[error("Observed record contains an unknown value at '{path}'")]
    UnknownInObserved {
        /// Attribute path of the unknown value.
        path: String,
    },

    /// An unknown value cannot be serialized into persisted state.
    #[error("Unknown value at '{path}' cannot be serialized")]
    UnknownValue {
        /// Attribute path of the unknown value.
        path: String,
    },

    /// The entity the remote API reported creating could not be located.
    #[error("Entity not found: no record with {key} = {value}")]
    EntityNotFound {
        /// The natural key that was searched.
        key: String,
        /// The value searched for.
        value: String,
    },

    /// A planned record failed schema validation.
    #[error("Validation failed with {} diagnostic(s)", .0.len())]
    Validation(Vec<Diagnostic>),

    /// The remote call failed.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The remote call did not complete within the configured timeout.
    #[error("Remote call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A lifecycle operation was attempted from a state that does not allow it.
    #[error("Cannot {operation} a resource that is {from}")]
    InvalidTransition {
        /// The lifecycle state the resource was in.
        from: &'static str,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

impl ReconcileError {
    /// Build a remote error from anything displayable.
    pub fn remote(err: impl std::fmt::Display) -> Self {
        Self::Remote(err.to_string())
    }

    /// The attribute path this error refers to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::SchemaMismatch { path, .. }
            | Self::TypeMismatch { path, .. }
            | Self::UnknownInObserved { path }
            | Self::UnknownValue { path } => Some(path),
            Self::EntityNotFound { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Convert this error into user-facing diagnostics.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        if let Self::Validation(diagnostics) = self {
            return diagnostics;
        }
        let mut diagnostic = Diagnostic::error(self.to_string());
        if let Some(path) = self.path().filter(|p| !p.is_empty()) {
            diagnostic = diagnostic.with_attribute(path);
        }
        vec![diagnostic]
    }
}
