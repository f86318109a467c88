//! Dispatch of classified gateway messages onto the tree.
//!
//! The dispatcher owns the [`ObjectCache`] for the session. It is driven by
//! the queue worker one message at a time and never fails a message as a
//! whole: store errors are logged per object and the next message proceeds.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};

use crate::cache::{CacheEntry, ObjectCache};
use crate::config::{EngineSettings, RemovedNodePolicy};
use crate::constants::{
    info as info_leaf, INFO_CHANNEL, READY_KEY, REMOVED_DESCRIPTION, REMOVED_NAME, STATUS_KEY, UNKNOWN_STATUS,
};
use crate::envelope::{
    Envelope, GatewayEvent, GatewayMessage, LifecycleEvent, MessageKind, NodeTopic, StatusEvent,
    ValueUpdate,
};
use crate::error::{BridgeError, Result};
use crate::mapper::{ParseOptions, TreeMapper};
use crate::model::{CommonMetadata, LeafType, ObjectKind, Role, TreeObject};
use crate::path::{node_number, node_root_from_value, value_path, TreePath};
use crate::store::{ChangeSubscriber, ObjectStore};
use crate::values::status_value;

/// Routes each message kind to the mapper or to direct status writes.
pub struct Dispatcher {
    settings: EngineSettings,
    mapper: TreeMapper,
    store: Arc<dyn ObjectStore>,
    subscriber: Arc<dyn ChangeSubscriber>,
    cache: ObjectCache,
    known_nodes: HashSet<String>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        subscriber: Arc<dyn ChangeSubscriber>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            settings,
            mapper: TreeMapper::new(store.clone()),
            store,
            subscriber,
            cache: ObjectCache::new(),
            known_nodes: HashSet::new(),
        }
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Prepare the tree for a new session.
    ///
    /// Creates the adapter info leaves, marks every node unavailable until
    /// the gateway says otherwise and preloads writable leaves so they are
    /// subscribed again.
    pub async fn start_session(&mut self) -> Result<()> {
        self.cache.clear();
        self.known_nodes.clear();
        self.ensure_info_leaves().await;
        self.write(&TreePath::from(info_leaf::CONNECTION), json!(false)).await;
        self.write(&TreePath::from(info_leaf::DEBUG_MESSAGES), json!("")).await;
        self.reset_availability().await?;

        let writable = self.store.query_by_writable_flag("").await?;
        let count = writable.len();
        for (path, obj) in writable {
            self.cache
                .insert(path, CacheEntry::new(obj.native.external_ref, true));
        }
        self.drain_subscriptions().await;
        info!(writable = count, "Session started");
        Ok(())
    }

    /// Mark the tree unavailable after the last message has been handled.
    pub async fn end_session(&mut self) {
        if let Err(e) = self.reset_availability().await {
            warn!(error = %e, "Failed to reset availability on shutdown");
        }
        self.write(&TreePath::from(info_leaf::CONNECTION), json!(false)).await;
        info!("Session ended");
    }

    /// Record transport connectivity in `info.connection`.
    pub async fn set_connected(&mut self, connected: bool) {
        self.write(&TreePath::from(info_leaf::CONNECTION), json!(connected)).await;
    }

    /// Decode and handle one raw transport message.
    pub async fn handle_raw(&mut self, topic: &str, payload: &[u8]) -> MessageKind {
        match Envelope::from_raw(topic, payload) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                error!(error = %e, "Dropping malformed message");
                MessageKind::Dropped
            }
        }
    }

    /// Handle one envelope, then subscribe any newly seen writable leaves.
    pub async fn handle(&mut self, envelope: Envelope) -> MessageKind {
        self.log_envelope(&envelope);

        let message = match GatewayMessage::classify(&envelope) {
            Ok(message) => message,
            Err(BridgeError::UnrecognizedKind(topic)) => {
                debug!(topic = %topic, "Ignoring unrecognized message");
                return MessageKind::Unrecognized;
            }
            Err(e) => {
                warn!(topic = %envelope.topic, error = %e, "Dropping message");
                return MessageKind::Dropped;
            }
        };

        if self.settings.renew_node_info {
            if let Some(node) = message.node() {
                let purged = self.cache.purge_node(node);
                trace!(node = %node, purged, "Renewing node cache");
            }
        }

        let kind = message.kind();
        match message {
            GatewayMessage::Lifecycle { node, event } => self.on_lifecycle(&node, event).await,
            GatewayMessage::Status { node, event, info } => self.on_status(&node, event, &info).await,
            GatewayMessage::ValueDelta { node, info, update } => {
                self.on_value_delta(&node, &info, &update).await
            }
            GatewayMessage::Gateway(event) => self.on_gateway(event).await,
            GatewayMessage::Snapshot { nodes } => self.on_snapshot(&nodes).await,
            GatewayMessage::NodeTopic { node, kind: topic } => {
                self.on_node_topic(&node, topic, &envelope).await
            }
            GatewayMessage::Ignored => trace!(topic = %envelope.topic, "No handling needed"),
        }

        self.drain_subscriptions().await;
        kind
    }

    fn log_envelope(&self, envelope: &Envelope) {
        if let Some(filter) = self.settings.debug_devices.as_deref().filter(|f| !f.is_empty()) {
            let text = envelope.to_text();
            if text.to_lowercase().contains(&filter.to_lowercase()) {
                warn!(topic = %envelope.topic, payload = %envelope.payload, "Debug device message");
            }
        }
        debug!(topic = %envelope.topic, "Message received");
        trace!(payload = %envelope.payload, "Message payload");
    }

    async fn on_lifecycle(&mut self, node: &str, event: LifecycleEvent) {
        self.known_nodes.remove(node);
        let purged = self.cache.purge_node(node);
        let root = TreePath::new(node);

        match event {
            LifecycleEvent::InterviewStarted => {
                info!(node = %node, purged, "Node interview started, recreating subtree");
                self.delete_subtree(&root).await;
            }
            LifecycleEvent::Removed => {
                info!(node = %node, purged, "Node removed");
                match self.settings.removed_node_policy {
                    RemovedNodePolicy::Delete => self.delete_subtree(&root).await,
                    policy => self.mark_removed(&root, policy).await,
                }
            }
        }
    }

    async fn delete_subtree(&self, root: &TreePath) {
        match self.store.delete_subtree(root).await {
            Ok(count) => debug!(node = %root, count, "Deleted node subtree"),
            Err(e) => error!(node = %root, error = %e, "Failed to delete node subtree"),
        }
    }

    async fn mark_removed(&self, root: &TreePath, policy: RemovedNodePolicy) {
        let mut obj = match self.store.read_object(root).await {
            Ok(Some(obj)) => obj,
            Ok(None) => return,
            Err(e) => {
                warn!(node = %root, error = %e, "Failed to read removed node");
                return;
            }
        };
        if policy == RemovedNodePolicy::MarkDescription {
            obj.common.desc = Some(REMOVED_DESCRIPTION.to_string());
        } else {
            obj.common.name = REMOVED_NAME.to_string();
        }
        if let Err(e) = self.store.update_object(root, obj).await {
            warn!(node = %root, error = %e, "Failed to mark node removed");
        }
    }

    async fn on_status(&mut self, node: &str, event: StatusEvent, info: &Value) {
        self.write_node_status(node, info).await;
        if event.carries_snapshot() {
            self.map_node_info(node, info).await;
        }
    }

    async fn on_value_delta(&mut self, node: &str, info: &Value, update: &ValueUpdate) {
        self.write_node_status(node, info).await;

        if update.is_rename() {
            let rename = json!({ "newValue": update.new_value });
            self.mapper.update_device_name(&TreePath::new(node), &rename).await;
            self.map_node_info(node, info).await;
            return;
        }

        if update.new_value == update.prev_value {
            trace!(node = %node, property = %update.property_name, "Value unchanged");
            return;
        }

        let path = value_path(
            node,
            &update.command_class_name,
            &update.property_name,
            update.property_key_name.as_deref(),
        );
        self.mapper
            .parse(&mut self.cache, path, &update.new_value, ParseOptions::read_only())
            .await;
    }

    async fn on_gateway(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Status { online } => {
                let text = if online { "online" } else { "offline" };
                self.write_if_changed(info_leaf::GATEWAY_STATUS, json!(text)).await;
            }
            GatewayEvent::Version(version) => {
                if !version.is_null() {
                    self.write_if_changed(info_leaf::GATEWAY_VERSION, version).await;
                }
                self.write_if_changed(info_leaf::GATEWAY_STATUS, json!("online")).await;
            }
        }
    }

    async fn on_snapshot(&mut self, nodes: &[Value]) {
        info!(nodes = nodes.len(), "Mapping node snapshot");
        for node_info in nodes {
            match node_info.get("id").and_then(node_root_from_value) {
                Some(node) => self.map_node_info(&node, node_info).await,
                None => warn!("Snapshot entry without node id"),
            }
        }
    }

    async fn on_node_topic(&mut self, node: &str, kind: NodeTopic, envelope: &Envelope) {
        let payload = &envelope.payload;
        match kind {
            NodeTopic::NodeInfo => self.map_node_info(node, payload).await,
            NodeTopic::LastActive => {
                let path = TreePath::new(node).child(INFO_CHANNEL).child("lastActive");
                if self.cache.contains(&path) {
                    let value = payload.get("value").cloned().unwrap_or(Value::Null);
                    self.write(&path, value).await;
                }
            }
            NodeTopic::Status => {
                let root = TreePath::new(node);
                if let Some(status) = payload.get(STATUS_KEY).filter(|v| !v.is_null()) {
                    self.write(&root.child(STATUS_KEY), status_value(status)).await;
                }
                if let Some(ready) = payload.get("value").filter(|v| !v.is_null()) {
                    self.write(&root.child(READY_KEY), ready.clone()).await;
                }
            }
            NodeTopic::Ack => {
                let text = format!("ACK : {} {} {}", node, envelope.topic, payload);
                self.write(&TreePath::from(info_leaf::DEBUG_MESSAGES), json!(text)).await;
            }
            NodeTopic::Value(path) => {
                self.mapper
                    .parse(&mut self.cache, path, payload, ParseOptions::read_only())
                    .await;
            }
        }
    }

    /// Map a node snapshot under `<node>.info`.
    async fn map_node_info(&mut self, node: &str, snapshot: &Value) {
        if self.known_nodes.insert(node.to_string()) && self.settings.show_node_info_message {
            info!(node = %node, "Node info update");
        }
        let path = TreePath::new(node).child(INFO_CHANNEL);
        self.mapper
            .parse(&mut self.cache, path, snapshot, ParseOptions::read_only())
            .await;
    }

    /// Write `ready`/`status` from a node info object when present.
    async fn write_node_status(&self, node: &str, info: &Value) {
        let root = TreePath::new(node);
        if let Some(ready) = info.get(READY_KEY).filter(|v| !v.is_null()) {
            self.write(&root.child(READY_KEY), ready.clone()).await;
        }
        if let Some(status) = info.get(STATUS_KEY).filter(|v| !v.is_null()) {
            self.write(&root.child(STATUS_KEY), status_value(status)).await;
        }
    }

    async fn ensure_info_leaves(&mut self) {
        let leaves = [
            (info_leaf::CONNECTION, Role::Indicator, LeafType::Boolean, "Connected to the gateway broker"),
            (info_leaf::GATEWAY_STATUS, Role::Text, LeafType::String, "Gateway process status"),
            (info_leaf::GATEWAY_VERSION, Role::Text, LeafType::String, "Gateway version"),
            (info_leaf::DEBUG_MESSAGES, Role::Text, LeafType::String, "Last write-back acknowledgement"),
        ];

        self.mapper
            .ensure_channel(&mut self.cache, &TreePath::from(INFO_CHANNEL))
            .await;
        for (path, role, leaf_type, desc) in leaves {
            let path = TreePath::from(path);
            let common = CommonMetadata {
                id: path.last_segment().to_string(),
                name: path.last_segment().to_string(),
                role: Some(role),
                leaf_type: Some(leaf_type),
                write: false,
                read: true,
                desc: Some(desc.to_string()),
                ..Default::default()
            };
            if let Err(e) = self
                .mapper
                .ensure_leaf(&mut self.cache, &path, TreeObject::state(common, None))
                .await
            {
                warn!(error = %e, "Failed to create adapter info leaf");
            }
        }
    }

    /// Set every node's `ready` to false and `status` to unknown.
    async fn reset_availability(&self) -> Result<()> {
        let objects = self.store.list_objects("").await?;
        for (path, obj) in objects {
            if obj.kind != ObjectKind::State || node_number(path.root()).is_none() {
                continue;
            }
            let Some((_, leaf)) = path.as_str().split_once('.') else {
                continue;
            };
            let value = match leaf {
                READY_KEY => json!(false),
                STATUS_KEY => json!(UNKNOWN_STATUS),
                _ => continue,
            };
            if let Err(e) = self.store.write_value_if_changed(&path, value, true).await {
                warn!(path = %path, error = %e, "Failed to reset availability");
            }
        }
        Ok(())
    }

    async fn drain_subscriptions(&mut self) {
        for path in self.cache.pending_subscriptions() {
            self.subscriber.subscribe(&path).await;
            self.cache.mark_subscribed(&path);
            trace!(path = %path, "Subscribed");
        }
    }

    async fn write(&self, path: &TreePath, value: Value) {
        if let Err(e) = self.store.write_value(path, value, true).await {
            warn!(path = %path, error = %e, "Failed to write value");
        }
    }

    async fn write_if_changed(&self, path: &str, value: Value) {
        let path = TreePath::from(path);
        match self.store.write_value_if_changed(&path, value, true).await {
            Ok(changed) => {
                if changed {
                    debug!(path = %path, "Gateway state changed");
                }
            }
            Err(e) => warn!(path = %path, error = %e, "Failed to write value"),
        }
    }
}
