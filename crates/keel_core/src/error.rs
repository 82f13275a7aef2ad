//! Error types for Keel core.

use crate::adapter::AdapterError;
use crate::types::{ClientId, RecordArrayId};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Keel core operations.
///
/// Schema-shape errors (`RelationshipType`, `AmbiguousInverse`,
/// `PolymorphicCreate`) and `InvalidState` are raised before anything is
/// mutated, so the store is unchanged when they are returned.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Another record of the same type already owns this id.
    #[error("duplicate id: a {type_name} record with id {id:?} already exists")]
    DuplicateId {
        /// Type of the record.
        type_name: String,
        /// The contested id.
        id: String,
    },

    /// A record of the wrong type was assigned to a relationship.
    #[error(
        "relationship {type_name}.{relationship} expects {expected}, got {actual}"
    )]
    RelationshipType {
        /// Owning type.
        type_name: String,
        /// Relationship name.
        relationship: String,
        /// Declared related type.
        expected: String,
        /// Type of the record that was assigned.
        actual: String,
    },

    /// Inverse resolution found more than one candidate.
    #[error(
        "ambiguous inverse for {type_name}.{relationship}: candidates {candidates:?}; declare the inverse explicitly"
    )]
    AmbiguousInverse {
        /// Owning type.
        type_name: String,
        /// Relationship name.
        relationship: String,
        /// Candidate relationship names on the related type.
        candidates: Vec<String>,
    },

    /// Records cannot be created through a polymorphic hasMany.
    #[error("cannot create a record through polymorphic relationship {type_name}.{relationship}")]
    PolymorphicCreate {
        /// Owning type.
        type_name: String,
        /// Relationship name.
        relationship: String,
    },

    /// The record's lifecycle state forbids the operation.
    #[error("cannot {operation} a record in state {state}")]
    InvalidState {
        /// State path of the record.
        state: &'static str,
        /// Operation that was attempted.
        operation: String,
    },

    /// Type is not registered in the schema.
    #[error("unknown type: {type_name}")]
    UnknownType {
        /// The unknown type name.
        type_name: String,
    },

    /// Relationship is not declared on the type.
    #[error("unknown relationship: {type_name}.{relationship}")]
    UnknownRelationship {
        /// Owning type.
        type_name: String,
        /// Relationship name.
        relationship: String,
    },

    /// Attribute is not declared on the type.
    #[error("unknown attribute: {type_name}.{attribute}")]
    UnknownAttribute {
        /// Owning type.
        type_name: String,
        /// Attribute name.
        attribute: String,
    },

    /// The handle was unloaded, or belongs to another store.
    #[error("record {client_id} is not live in this store")]
    RecordNotLive {
        /// Client id of the handle.
        client_id: ClientId,
    },

    /// A synchronous relationship references records that are not loaded.
    #[error("relationship {type_name}.{relationship} is not loaded")]
    RelationshipNotLoaded {
        /// Owning type.
        type_name: String,
        /// Relationship name.
        relationship: String,
    },

    /// The collaborator did not return the requested record.
    #[error("record not found: {type_name} {id:?}")]
    RecordNotFound {
        /// Requested type.
        type_name: String,
        /// Requested id.
        id: String,
    },

    /// Live record array does not exist (never created, or destroyed).
    #[error("record array not found: {array}")]
    ArrayNotFound {
        /// The missing array.
        array: RecordArrayId,
    },

    /// The collaborator rejected a request.
    #[error("collaborator error: {0}")]
    Adapter(#[from] AdapterError),

    /// A shared in-flight fetch failed; observed by a caller that joined it.
    #[error("fetch failed: {message}")]
    FetchFailed {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid state error.
    pub fn invalid_state(state: &'static str, operation: impl Into<String>) -> Self {
        Self::InvalidState {
            state,
            operation: operation.into(),
        }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(type_name: impl Into<String>) -> Self {
        Self::UnknownType {
            type_name: type_name.into(),
        }
    }

    /// Creates an unknown relationship error.
    pub fn unknown_relationship(
        type_name: impl Into<String>,
        relationship: impl Into<String>,
    ) -> Self {
        Self::UnknownRelationship {
            type_name: type_name.into(),
            relationship: relationship.into(),
        }
    }

    /// Creates an unknown attribute error.
    pub fn unknown_attribute(type_name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            type_name: type_name.into(),
            attribute: attribute.into(),
        }
    }

    /// Creates a duplicate id error.
    pub fn duplicate_id(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self::DuplicateId {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    /// Creates a fetch failed error.
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::FetchFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by a malformed schema or a type
    /// mismatch at the call site, as opposed to runtime data problems.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            CoreError::RelationshipType { .. }
                | CoreError::AmbiguousInverse { .. }
                | CoreError::PolymorphicCreate { .. }
                | CoreError::UnknownType { .. }
                | CoreError::UnknownRelationship { .. }
                | CoreError::UnknownAttribute { .. }
        )
    }
}
