//! Error types and result types for model and store operations.
//!
//! Every fallible operation in this crate returns [`KaleResult<T>`]. Errors are
//! handed back to the immediate caller; nothing here retries or logs them.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by containers, models and store backends.
#[derive(Error, Debug)]
pub enum KaleError {
    /// A model type is missing its database or collection declaration, or the
    /// abstract base model was constructed directly.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A key was read through attribute access but is not stored in the container.
    #[error("Key not found: '{0}'")]
    KeyNotFound(String),
    /// An attribute name that resolves to a member was assigned or deleted.
    #[error("'{0}' is a member and cannot be assigned or deleted as an attribute")]
    ReadOnlyMember(String),
    /// A collection-scoped filter was passed to an instance-scoped operation.
    #[error("Wrong level: {0}")]
    WrongLevel(String),
    /// The store refused to reuse an identifier on insert.
    /// The first argument is the identifier, the second is the collection name.
    #[error("Duplicate identifier {0} in collection {1}")]
    DuplicateIdentifier(String, String),
    /// A value cannot be represented by the backing store.
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),
    /// `update` was given more than one source mapping.
    #[error("update expected at most 1 source mapping, got {0}")]
    ArgumentCount(usize),
    /// The operation is not valid in the current state (e.g. slicing a started cursor).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    /// A document or value does not have the expected shape.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during backend initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error reported by the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for kale operations.
pub type KaleResult<T> = Result<T, KaleError>;

impl From<BsonError> for KaleError {
    fn from(err: BsonError) -> Self {
        KaleError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for KaleError {
    fn from(err: SerdeJsonError) -> Self {
        KaleError::Serialization(err.to_string())
    }
}
