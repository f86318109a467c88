//! Transport error types.

use meshtree_core::BridgeError;
use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// MQTT transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Invalid broker settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The client request channel rejected a request.
    #[error("Client error: {0}")]
    Client(String),

    /// Connection to the broker failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Outbound payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rumqttc::ClientError> for TransportError {
    fn from(e: rumqttc::ClientError) -> Self {
        TransportError::Client(e.to_string())
    }
}

impl From<rumqttc::ConnectionError> for TransportError {
    fn from(e: rumqttc::ConnectionError) -> Self {
        TransportError::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Serialization(e.to_string())
    }
}

impl From<TransportError> for BridgeError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Configuration(s) => BridgeError::Configuration(s),
            TransportError::Serialization(s) => BridgeError::Serialization(s),
            other => BridgeError::Transport(other.to_string()),
        }
    }
}
