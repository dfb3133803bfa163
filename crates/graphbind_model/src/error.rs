use graphbind_schema::ConfigError;

use crate::ValidationErrors;

/// Failure to apply attributes to an entity
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SetError {
    #[error("Validation failed: {0}")]
    Invalid(ValidationErrors),
    #[error("Collection assigned to {attr} already belongs to another entity")]
    CollectionOwned { attr: String },
}

/// Failure to change collection membership
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollectionError {
    #[error("Element {index} failed validation: {errors}")]
    Invalid {
        index: usize,
        errors: ValidationErrors,
    },
    #[error("Cannot sort a collection without a comparator")]
    NoComparator,
    #[error("Collection is not attached to a store")]
    Detached,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Set(#[from] SetError),
    #[error(transparent)]
    Store(Box<StoreError>),
}

/// Failure to build entities or attributes from raw data
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Set(#[from] SetError),
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error("Expected an attribute object for {model}, got {actual}")]
    NotAnObject { model: String, actual: String },
}

/// Network or server failure, delivered through a deferred's error callbacks
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Server rejected request ({status}): {errors}")]
    Server {
        status: u16,
        errors: serde_json::Value,
    },
    #[error("Unexpected response ({status}): {body}")]
    Unexpected { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("No transport available")]
    Offline,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<StoreError> for TransportError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Config(c) => TransportError::Config(c),
            other => TransportError::InvalidResponse(other.to_string()),
        }
    }
}

/// A network operation that could not be issued
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} is not attached to a store")]
    Detached(String),
    #[error("Validation failed: {0}")]
    Invalid(ValidationErrors),
    #[error(transparent)]
    Set(#[from] SetError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Collection(#[from] CollectionError),
}
