//! Error types for the mapping engine and dispatch pipeline.
//!
//! Nothing in here is fatal to the running bridge except
//! [`BridgeError::Configuration`], which is raised before the engine is built.

use thiserror::Error;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Result type for object store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Bridge error types.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Inbound message text could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The store rejected a create or write for one sub-path.
    #[error("Mapping error at {path}: {message}")]
    Mapping { path: String, message: String },

    /// The envelope does not match any known event shape.
    #[error("Unrecognized message kind: {0}")]
    UnrecognizedKind(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No object exists at the requested path.
    #[error("Unknown path: {0}")]
    UnknownPath(String),

    /// The object exists but cannot be written back to the gateway.
    #[error("Not writable: {0}")]
    NotWritable(String),

    /// The serialization queue no longer accepts messages.
    #[error("Message queue is closed")]
    QueueClosed,

    /// The transport collaborator failed to deliver or receive.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backing store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BridgeError {
    /// Build a mapping error for a tree path.
    pub fn mapping(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Mapping {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(e: toml::de::Error) -> Self {
        BridgeError::Configuration(e.to_string())
    }
}

/// Object store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object not found.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Backend failure (I/O, database, transaction).
    #[error("Backend error: {0}")]
    Backend(String),

    /// Encoding or decoding of a stored object failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_error_display() {
        let err = BridgeError::mapping("nodeID_003.ready", "rejected");
        assert_eq!(err.to_string(), "Mapping error at nodeID_003.ready: rejected");
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: BridgeError = StoreError::Backend("disk full".to_string()).into();
        assert!(err.to_string().contains("disk full"));
    }
}
