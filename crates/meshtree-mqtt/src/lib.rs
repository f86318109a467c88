//! MQTT transport for the meshtree bridge.
//!
//! Subscribes below the gateway's base topic, feeds every publish into the
//! serialization queue and publishes write-backs and snapshot requests.

pub mod error;
pub mod transport;

pub use error::{Result, TransportError};
pub use transport::{strip_base_topic, MqttTransport};
