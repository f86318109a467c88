//! Write-back of user changes to the gateway.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::constants::topics;
use crate::error::{BridgeError, Result};
use crate::path::TreePath;
use crate::store::{ObjectStore, SubscriptionRegistry};

/// Outbound message for the transport. The topic is relative to the base topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub topic: String,
    pub payload: Value,
}

impl ControlMessage {
    /// Request for a full node dump from the gateway.
    pub fn snapshot_request(gateway_name: &str) -> Self {
        Self {
            topic: format!(
                "{}/ZWAVE_GATEWAY-{}/api/getNodes{}",
                topics::CLIENTS,
                gateway_name,
                topics::SET_SUFFIX
            ),
            payload: json!({ "args": [] }),
        }
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.payload)?)
    }
}

/// Turns a user write on a leaf into a control message.
pub struct ControlRouter {
    store: Arc<dyn ObjectStore>,
    subscriptions: Option<SubscriptionRegistry>,
}

impl ControlRouter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            subscriptions: None,
        }
    }

    /// Only route leaves the running session has subscribed.
    pub fn with_subscriptions(mut self, registry: SubscriptionRegistry) -> Self {
        self.subscriptions = Some(registry);
        self
    }

    /// Build `{topic: "<externalRef>/set", payload: {"value": value}}` for a
    /// writable leaf.
    pub async fn route(&self, path: &TreePath, value: Value) -> Result<ControlMessage> {
        let obj = self
            .store
            .read_object(path)
            .await?
            .ok_or_else(|| BridgeError::UnknownPath(path.to_string()))?;

        if !obj.is_writable_state() {
            return Err(BridgeError::NotWritable(path.to_string()));
        }
        if let Some(registry) = &self.subscriptions {
            if !registry.is_subscribed(path).await {
                return Err(BridgeError::NotWritable(format!("{} is not subscribed", path)));
            }
        }
        let external_ref = obj
            .native
            .external_ref
            .ok_or_else(|| BridgeError::NotWritable(format!("{} has no gateway address", path)))?;

        let message = ControlMessage {
            topic: format!("{}{}", external_ref, topics::SET_SUFFIX),
            payload: json!({ "value": value }),
        };
        debug!(path = %path, topic = %message.topic, "Routing write-back");
        Ok(message)
    }
}
