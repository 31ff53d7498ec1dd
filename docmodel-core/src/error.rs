//! Error types and result types for mapping and store operations.
//!
//! Every fallible operation in this crate returns a [`DocumentStoreResult<T>`]. Errors are
//! grouped roughly into shape errors (a value does not fit its target), schema errors (a
//! model type is declared in a way the mapper cannot support), unimplemented paths, and
//! store/consistency errors reported by a backend.
//!
//! The error type is `Clone` because the field directory caches construction failures per
//! type and hands the same error back on every later lookup.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur while mapping models or talking to a store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentStoreError {
    /// A value could not be converted between its in-memory and document representation.
    #[error("cannot convert {found} into {target}")]
    TypeMismatch {
        /// The in-memory type involved in the conversion.
        target: String,
        /// A description of the offending value.
        found: String,
    },
    /// A numeric value does not fit into the target integer type.
    #[error("value {value} overflows type {target}")]
    Overflow {
        /// The rendered numeric value.
        value: String,
        /// The target type name.
        target: String,
    },
    /// A structured record type was required but something else was supplied.
    #[error("fields of non-struct type {0}")]
    NotStructured(String),
    /// Two fields of one record resolve to the same effective name.
    #[error("duplicate field {name:?} in {type_name}")]
    DuplicateField {
        /// The colliding effective name.
        name: String,
        /// The record type declaring the fields.
        type_name: String,
    },
    /// A field tag could not be parsed.
    #[error("invalid tag on {member}: {reason}")]
    InvalidTag {
        /// The member carrying the tag.
        member: String,
        /// Why the tag was rejected.
        reason: String,
    },
    /// A document key is not claimed by any field of the target record.
    #[error("no struct field matched document field {field:?} in {type_name}")]
    UnmatchedField {
        /// The unmatched document key.
        field: String,
        /// The record type being populated.
        type_name: String,
    },
    /// A reference field or reference target is unusable.
    #[error("invalid foreign key: {0}")]
    InvalidReference(String),
    /// The conversion path exists in principle but is not supported yet.
    #[error("{0}: unimplemented")]
    Unimplemented(String),
    /// Serialization/deserialization error when converting to external formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection path.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The document has a structure the store or mapper cannot accept.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A transaction attempt lost a race with a concurrent writer.
    #[error("Transaction conflict: {0}")]
    Conflict(String),
    /// A transaction was used in a way the store does not allow.
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// The operation was cancelled through its [`Context`](crate::context::Context).
    #[error("operation cancelled")]
    Cancelled,
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for mapping and store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl DocumentStoreError {
    pub(crate) fn mismatch(target: impl Into<String>, found: impl Into<String>) -> Self {
        DocumentStoreError::TypeMismatch {
            target: target.into(),
            found: found.into(),
        }
    }

    pub(crate) fn overflow(value: impl ToString, target: impl Into<String>) -> Self {
        DocumentStoreError::Overflow {
            value: value.to_string(),
            target: target.into(),
        }
    }

    /// Returns `true` if this error reports a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentStoreError::DocumentNotFound(..))
    }

    /// Returns `true` if this error reports a lost transaction race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DocumentStoreError::Conflict(_))
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
