//! Inbound envelopes and their classification into gateway message kinds.
//!
//! Topics arrive with the base topic already stripped:
//!
//! - `_EVENTS/ZWAVE_GATEWAY-<name>/<node|controller|driver>/<event>`
//! - `_CLIENTS/ZWAVE_GATEWAY-<name>/<status|version|api>/...`
//! - `<nodeNum>/...` per-node value topics

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{topics, NAME_PROPERTY};
use crate::error::{BridgeError, Result};
use crate::path::{node_root, node_root_from_value, topic_to_path, TreePath};
use crate::values::is_truthy;

/// Normalized `{topic, payload}` message handed over by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Decode a raw transport payload. An empty payload is `null`.
    pub fn from_raw(topic: &str, payload: &[u8]) -> Result<Self> {
        let payload = if payload.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(payload)
                .map_err(|e| BridgeError::Parse(format!("{}: {}", topic, e)))?
        };
        Ok(Self::new(topic, payload))
    }

    /// Single-line text form, used for log filtering.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.topic.clone())
    }

    fn segment(&self, idx: usize) -> Option<&str> {
        self.topic.split('/').nth(idx)
    }
}

/// Node lifecycle events that invalidate a node's subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    InterviewStarted,
    Removed,
}

/// Node events that carry availability and lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    StatisticsUpdated,
    WakeUp,
    Sleep,
    InterviewFailed,
    Added,
    InterviewCompleted,
}

impl StatusEvent {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "statistics_updated" => StatusEvent::StatisticsUpdated,
            "node_wake_up" => StatusEvent::WakeUp,
            "node_sleep" => StatusEvent::Sleep,
            "node_interview_failed" => StatusEvent::InterviewFailed,
            "node_added" => StatusEvent::Added,
            "node_interview_completed" => StatusEvent::InterviewCompleted,
            _ => return None,
        })
    }

    /// Whether the event payload is a full node snapshot worth mapping.
    pub fn carries_snapshot(&self) -> bool {
        matches!(self, StatusEvent::Added | StatusEvent::InterviewCompleted)
    }
}

/// A single-value change reported by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueUpdate {
    #[serde(default)]
    pub command_class_name: String,
    #[serde(default)]
    pub property: Value,
    #[serde(default)]
    pub property_name: String,
    #[serde(default)]
    pub property_key_name: Option<String>,
    #[serde(default)]
    pub new_value: Value,
    #[serde(default)]
    pub prev_value: Value,
}

impl ValueUpdate {
    /// The update renames the device.
    pub fn is_rename(&self) -> bool {
        self.property.as_str() == Some(NAME_PROPERTY)
    }
}

/// Events about the gateway process itself.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Status { online: bool },
    Version(Value),
}

/// Messages on per-node topics.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTopic {
    NodeInfo,
    LastActive,
    Status,
    /// Echo of a write-back this bridge published.
    Ack,
    Value(TreePath),
}

/// Closed set of message kinds the dispatcher handles.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayMessage {
    Lifecycle {
        node: String,
        event: LifecycleEvent,
    },
    Status {
        node: String,
        event: StatusEvent,
        info: Value,
    },
    ValueDelta {
        node: String,
        info: Value,
        update: ValueUpdate,
    },
    Gateway(GatewayEvent),
    Snapshot {
        nodes: Vec<Value>,
    },
    NodeTopic {
        node: String,
        kind: NodeTopic,
    },
    /// Known shape that needs no handling.
    Ignored,
}

/// Message kind as reported back by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Lifecycle,
    Status,
    ValueDelta,
    Gateway,
    Snapshot,
    NodeTopic,
    Ignored,
    Unrecognized,
    Dropped,
}

impl GatewayMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            GatewayMessage::Lifecycle { .. } => MessageKind::Lifecycle,
            GatewayMessage::Status { .. } => MessageKind::Status,
            GatewayMessage::ValueDelta { .. } => MessageKind::ValueDelta,
            GatewayMessage::Gateway(_) => MessageKind::Gateway,
            GatewayMessage::Snapshot { .. } => MessageKind::Snapshot,
            GatewayMessage::NodeTopic { .. } => MessageKind::NodeTopic,
            GatewayMessage::Ignored => MessageKind::Ignored,
        }
    }

    /// Node root the message is about, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            GatewayMessage::Lifecycle { node, .. }
            | GatewayMessage::Status { node, .. }
            | GatewayMessage::ValueDelta { node, .. }
            | GatewayMessage::NodeTopic { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Classify an envelope by topic and payload shape.
    pub fn classify(envelope: &Envelope) -> Result<Self> {
        match envelope.segment(0).unwrap_or_default() {
            topics::EVENTS => Self::classify_event(envelope),
            topics::CLIENTS => Self::classify_client(envelope),
            head => match head.parse::<u64>() {
                Ok(id) => Ok(Self::classify_node_topic(envelope, node_root(id))),
                Err(_) => Err(BridgeError::UnrecognizedKind(envelope.topic.clone())),
            },
        }
    }

    fn classify_event(envelope: &Envelope) -> Result<Self> {
        let target = envelope.segment(2).unwrap_or_default();
        if target != topics::NODE {
            return match target {
                "controller" | "driver" => Ok(GatewayMessage::Ignored),
                _ => Err(BridgeError::UnrecognizedKind(envelope.topic.clone())),
            };
        }

        let data = envelope.payload.get("data");
        let info = data
            .and_then(|d| d.get(0))
            .filter(|v| is_truthy(v))
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let event_name = envelope.segment(3).unwrap_or_default();

        if event_name == "node_metadata_updated" {
            return Ok(GatewayMessage::Ignored);
        }

        let node = info
            .get("id")
            .and_then(node_root_from_value)
            .ok_or_else(|| BridgeError::Parse(format!("{}: node event without node id", envelope.topic)))?;

        if let Some(event) = StatusEvent::from_name(event_name) {
            return Ok(GatewayMessage::Status { node, event, info });
        }

        match event_name {
            "node_interview_started" => Ok(GatewayMessage::Lifecycle {
                node,
                event: LifecycleEvent::InterviewStarted,
            }),
            "node_removed" => Ok(GatewayMessage::Lifecycle {
                node,
                event: LifecycleEvent::Removed,
            }),
            "node_value_updated" => {
                let raw = data
                    .and_then(|d| d.get(1))
                    .ok_or_else(|| BridgeError::Parse(format!("{}: missing value update", envelope.topic)))?;
                let update = ValueUpdate::deserialize(raw)
                    .map_err(|e| BridgeError::Parse(format!("{}: {}", envelope.topic, e)))?;
                Ok(GatewayMessage::ValueDelta { node, info, update })
            }
            _ => Err(BridgeError::UnrecognizedKind(envelope.topic.clone())),
        }
    }

    fn classify_client(envelope: &Envelope) -> Result<Self> {
        let payload = &envelope.payload;
        match envelope.segment(2).unwrap_or_default() {
            "status" => Ok(GatewayMessage::Gateway(GatewayEvent::Status {
                online: payload.get("value").map(is_truthy).unwrap_or(false),
            })),
            "version" => Ok(GatewayMessage::Gateway(GatewayEvent::Version(
                payload.get("value").cloned().unwrap_or(Value::Null),
            ))),
            "api" => {
                if envelope.topic.ends_with(topics::SET_SUFFIX) {
                    return Ok(GatewayMessage::Ignored);
                }
                if envelope.segment(3) != Some("getNodes") {
                    return Ok(GatewayMessage::Ignored);
                }
                let nodes = match payload {
                    Value::Array(nodes) => nodes.clone(),
                    other => other
                        .get("result")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                };
                Ok(GatewayMessage::Snapshot { nodes })
            }
            _ => Err(BridgeError::UnrecognizedKind(envelope.topic.clone())),
        }
    }

    fn classify_node_topic(envelope: &Envelope, node: String) -> Self {
        let mut selector = envelope.segment(1).unwrap_or_default().to_string();
        if selector.parse::<u64>().is_ok() {
            selector = envelope
                .payload
                .get("commandClassName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
        }

        let kind = match selector.as_str() {
            "nodeinfo" => NodeTopic::NodeInfo,
            "lastActive" => NodeTopic::LastActive,
            "status" => NodeTopic::Status,
            _ if envelope.topic.ends_with(topics::SET_SUFFIX) => NodeTopic::Ack,
            _ => NodeTopic::Value(topic_to_path(&envelope.topic, &node)),
        };
        GatewayMessage::NodeTopic { node, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(topic: &str, payload: Value) -> Result<GatewayMessage> {
        GatewayMessage::classify(&Envelope::new(topic, payload))
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(Envelope::from_raw("a", b"").unwrap().payload, Value::Null);
        assert_eq!(Envelope::from_raw("a", b"{\"v\":1}").unwrap().payload, json!({"v": 1}));
        assert!(matches!(Envelope::from_raw("a", b"{oops"), Err(BridgeError::Parse(_))));
    }

    #[test]
    fn test_classify_value_delta() {
        let msg = classify(
            "_EVENTS/ZWAVE_GATEWAY-zw/node/node_value_updated",
            json!({"data": [{"id": 7}, {"commandClassName": "Binary Switch", "propertyName": "currentValue", "newValue": true, "prevValue": false}]}),
        )
        .unwrap();
        match msg {
            GatewayMessage::ValueDelta { node, update, .. } => {
                assert_eq!(node, "nodeID_007");
                assert_eq!(update.new_value, json!(true));
                assert!(!update.is_rename());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_lifecycle_and_status() {
        let msg = classify("_EVENTS/ZWAVE_GATEWAY-zw/node/node_removed", json!({"data": [{"id": 3}]})).unwrap();
        assert_eq!(
            msg,
            GatewayMessage::Lifecycle {
                node: "nodeID_003".into(),
                event: LifecycleEvent::Removed
            }
        );

        let msg = classify("_EVENTS/ZWAVE_GATEWAY-zw/node/node_sleep", json!({"data": [{"id": 3, "ready": true}]})).unwrap();
        assert_eq!(msg.kind(), MessageKind::Status);
        assert_eq!(msg.node(), Some("nodeID_003"));
    }

    #[test]
    fn test_node_event_without_id_is_parse_error() {
        let err = classify("_EVENTS/ZWAVE_GATEWAY-zw/node/node_sleep", json!({})).unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));
    }

    #[test]
    fn test_classify_gateway_meta() {
        assert_eq!(
            classify("_CLIENTS/ZWAVE_GATEWAY-zw/status", json!({"value": true})).unwrap(),
            GatewayMessage::Gateway(GatewayEvent::Status { online: true })
        );
        assert_eq!(
            classify("_CLIENTS/ZWAVE_GATEWAY-zw/version", json!({"value": "9.1.0"})).unwrap(),
            GatewayMessage::Gateway(GatewayEvent::Version(json!("9.1.0")))
        );
    }

    #[test]
    fn test_classify_snapshot() {
        let msg = classify(
            "_CLIENTS/ZWAVE_GATEWAY-zw/api/getNodes",
            json!({"success": true, "result": [{"id": 1}, {"id": 2}]}),
        )
        .unwrap();
        assert_eq!(msg, GatewayMessage::Snapshot { nodes: vec![json!({"id": 1}), json!({"id": 2})] });

        let echo = classify("_CLIENTS/ZWAVE_GATEWAY-zw/api/getNodes/set", json!({"args": []})).unwrap();
        assert_eq!(echo, GatewayMessage::Ignored);
    }

    #[test]
    fn test_classify_node_topics() {
        let msg = classify("7/nodeinfo", json!({"id": 7})).unwrap();
        assert_eq!(msg, GatewayMessage::NodeTopic { node: "nodeID_007".into(), kind: NodeTopic::NodeInfo });

        let msg = classify("7/37/0/targetValue/set", json!({"value": true})).unwrap();
        assert_eq!(msg, GatewayMessage::NodeTopic { node: "nodeID_007".into(), kind: NodeTopic::Ack });

        let msg = classify("7/Binary Switch/0/currentValue", json!({"value": true})).unwrap();
        assert_eq!(
            msg,
            GatewayMessage::NodeTopic {
                node: "nodeID_007".into(),
                kind: NodeTopic::Value(TreePath::from("nodeID_007.Binary Switch.0.currentValue"))
            }
        );
    }

    #[test]
    fn test_unrecognized() {
        assert!(matches!(
            classify("something/else", json!(1)),
            Err(BridgeError::UnrecognizedKind(_))
        ));
        assert_eq!(classify("_EVENTS/ZWAVE_GATEWAY-zw/driver/driver_ready", json!({})).unwrap(), GatewayMessage::Ignored);
    }
}
