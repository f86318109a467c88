//! Tree mapping engine.
//!
//! [`TreeMapper::parse`] walks a payload fragment and projects it into the
//! object tree. Every create goes through the [`ObjectCache`] first, so a
//! path is created at most once per cache lifetime; afterwards only values
//! (and device display names) are written. A failure to create one object is
//! logged and the rest of the fragment is still mapped.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, error, trace, warn};

use crate::cache::{CacheEntry, ObjectCache};
use crate::constants::{READY_KEY, SKIPPED_ARRAY_KEYS, STATUS_KEY};
use crate::descriptor::CommandDescriptor;
use crate::error::{BridgeError, Result};
use crate::fragment::{device_display_name, Fragment};
use crate::inference::{infer_role, storage_type, RoleInput};
use crate::model::{CommonMetadata, LeafType, Role, TreeObject};
use crate::path::{node_number, owning_node, sanitize, transport_address, TreePath};
use crate::store::ObjectStore;
use crate::values::{is_numeric, status_value};

/// Options threaded through a parse.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Leaves created from plain scalars are writable.
    pub writable: bool,
    /// Display-name overrides by payload key.
    pub descriptions: Option<Arc<HashMap<String, String>>>,
}

impl ParseOptions {
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn with_descriptions(mut self, descriptions: HashMap<String, String>) -> Self {
        self.descriptions = Some(Arc::new(descriptions));
        self
    }

    fn display_name(&self, key: &str) -> String {
        self.descriptions
            .as_ref()
            .and_then(|d| d.get(key))
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

/// Maps payload fragments onto the object tree.
#[derive(Clone)]
pub struct TreeMapper {
    store: Arc<dyn ObjectStore>,
}

impl TreeMapper {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Map `fragment` at `path`.
    pub fn parse<'a>(
        &'a self,
        cache: &'a mut ObjectCache,
        path: TreePath,
        fragment: &'a Value,
        options: ParseOptions,
    ) -> BoxFuture<'a, ()> {
        async move {
            match Fragment::classify(fragment) {
                Fragment::Empty => {
                    debug!(path = %path, "Nothing to map for empty fragment");
                }
                Fragment::Scalar(value) => {
                    self.map_scalar(cache, &path, value, &options).await;
                }
                Fragment::Descriptor(value) => {
                    self.map_descriptor(cache, &path, value).await;
                }
                Fragment::Device(map) => {
                    let node = owning_node(&path);
                    self.ensure_device(cache, &node, fragment).await;
                    self.map_object(cache, &path, map, options).await;
                }
                Fragment::Array(items) => {
                    self.ensure_channel(cache, &path).await;
                    self.map_array(cache, &path, "", items, options).await;
                }
                Fragment::Object(map) => {
                    self.map_object(cache, &path, map, options).await;
                }
            }
        }
        .boxed()
    }

    /// Ensure the device root exists, keep its display name current and make
    /// sure its `ready`/`status` leaves exist.
    pub async fn ensure_device(&self, cache: &mut ObjectCache, node: &str, payload: &Value) {
        let root = TreePath::new(node);
        if cache.contains(&root) {
            self.update_device_name(&root, payload).await;
            return;
        }

        let name = device_display_name(payload).unwrap_or_else(|| node.to_string());
        match self.store.exists_or_create(&root, TreeObject::device(name)).await {
            Ok(created) => {
                if created {
                    debug!(node = %node, "Created device");
                } else {
                    self.update_device_name(&root, payload).await;
                }
                cache.insert(root, CacheEntry::structural());
            }
            Err(e) => {
                let err = BridgeError::mapping(node, e);
                error!(error = %err, "Failed to create device");
                return;
            }
        }

        self.ensure_status_leaves(cache, node).await;
    }

    /// Rename a device when its payload carries a different display name.
    pub async fn update_device_name(&self, root: &TreePath, payload: &Value) {
        let Some(name) = device_display_name(payload) else {
            return;
        };
        match self.store.read_object(root).await {
            Ok(Some(mut obj)) if obj.common.name != name => {
                debug!(node = %root, name = %name, "Updating device name");
                obj.common.name = name;
                if let Err(e) = self.store.update_object(root, obj).await {
                    warn!(node = %root, error = %e, "Failed to rename device");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(node = %root, error = %e, "Failed to read device"),
        }
    }

    /// Create the availability and lifecycle leaves of a node.
    pub async fn ensure_status_leaves(&self, cache: &mut ObjectCache, node: &str) {
        let root = TreePath::new(node);
        let ready = CommonMetadata {
            id: READY_KEY.to_string(),
            name: READY_KEY.to_string(),
            role: Some(Role::Indicator),
            leaf_type: Some(LeafType::Boolean),
            write: false,
            read: true,
            ..Default::default()
        };
        let status = CommonMetadata {
            id: STATUS_KEY.to_string(),
            name: STATUS_KEY.to_string(),
            role: Some(Role::Text),
            leaf_type: Some(LeafType::Mixed),
            write: false,
            read: true,
            ..Default::default()
        };
        self.create_once(cache, &root.child(READY_KEY), TreeObject::state(ready, None))
            .await;
        self.create_once(cache, &root.child(STATUS_KEY), TreeObject::state(status, None))
            .await;
    }

    /// Ensure a channel exists at `path`, named after its last segment.
    pub async fn ensure_channel(&self, cache: &mut ObjectCache, path: &TreePath) {
        let channel = TreeObject::channel(path.last_segment());
        self.create_once(cache, path, channel).await;
    }

    /// Ensure an object exists. Returns `true` when it was created by this
    /// call. A rejected create leaves the cache untouched.
    pub async fn ensure_leaf(&self, cache: &mut ObjectCache, path: &TreePath, leaf: TreeObject) -> Result<bool> {
        if cache.contains(path) {
            return Ok(false);
        }
        let entry = CacheEntry::new(leaf.native.external_ref.clone(), leaf.is_writable_state());
        let created = self
            .store
            .exists_or_create(path, leaf)
            .await
            .map_err(|e| BridgeError::mapping(path.as_str(), e))?;
        trace!(path = %path, created, "Object ensured");
        cache.insert(path.clone(), entry);
        Ok(created)
    }

    async fn create_once(&self, cache: &mut ObjectCache, path: &TreePath, object: TreeObject) -> bool {
        match self.ensure_leaf(cache, path, object).await {
            Ok(created) => created,
            Err(e) => {
                error!(error = %e, "Failed to create object");
                false
            }
        }
    }

    async fn write(&self, path: &TreePath, value: Value) {
        if let Err(e) = self.store.write_value(path, value, true).await {
            let err = BridgeError::mapping(path.as_str(), e);
            warn!(error = %err, "Failed to write value");
        }
    }

    async fn map_scalar(&self, cache: &mut ObjectCache, path: &TreePath, value: &Value, options: &ParseOptions) {
        if !cache.contains(path) {
            let name = path.last_segment().to_string();
            let mut states = None;
            let role = infer_role(&RoleInput::new(value, options.writable), &mut states);
            let common = CommonMetadata {
                id: name.clone(),
                name,
                role: Some(role),
                leaf_type: Some(LeafType::of_value(value)),
                write: options.writable,
                read: true,
                ..Default::default()
            };
            let leaf = TreeObject::state(common, Some(transport_address(path)));
            self.create_once(cache, path, leaf).await;
        }
        self.write(path, value.clone()).await;
    }

    async fn map_descriptor(&self, cache: &mut ObjectCache, path: &TreePath, raw: &Value) {
        let mut descriptor = match CommandDescriptor::from_value(raw) {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %path, error = %e, "Malformed command-class descriptor");
                return;
            }
        };
        let node = owning_node(path);
        let leaf_path = descriptor.leaf_path(&node);
        let resolved = descriptor.resolve();

        let value = if cache.contains(&leaf_path) {
            resolved.value
        } else {
            let external_ref = descriptor
                .external_ref(node_number(&node))
                .unwrap_or_else(|| transport_address(&leaf_path));
            let leaf = descriptor.build_leaf(resolved);
            self.create_once(cache, &leaf_path, TreeObject::state(leaf.common, Some(external_ref)))
                .await;
            leaf.value
        };
        self.write(&leaf_path, value).await;
    }

    fn map_array<'a>(
        &'a self,
        cache: &'a mut ObjectCache,
        path: &'a TreePath,
        group_key: &'a str,
        items: &'a [Value],
        options: ParseOptions,
    ) -> BoxFuture<'a, ()> {
        async move {
            let mut key = key_segment(group_key);
            for (i, item) in items.iter().enumerate() {
                if let Value::String(text) = item {
                    let segment = sanitize(text);
                    if segment.is_empty() {
                        continue;
                    }
                    if key.is_empty() {
                        key = segment.clone();
                    }
                    let leaf_path = path.child(&key).child(&segment);
                    self.parse(cache, leaf_path, item, options.clone()).await;
                    continue;
                }

                // Elements under one group key share a path; later ones overwrite.
                let group = if key.is_empty() {
                    format!("{:02}", i + 1)
                } else {
                    key.clone()
                };
                self.parse(cache, path.child(&group), item, options.clone()).await;
            }
        }
        .boxed()
    }

    async fn map_object(
        &self,
        cache: &mut ObjectCache,
        path: &TreePath,
        map: &Map<String, Value>,
        options: ParseOptions,
    ) {
        self.ensure_channel(cache, path).await;

        for (key, value) in map {
            match value {
                Value::Array(items) => {
                    if SKIPPED_ARRAY_KEYS.contains(&key.as_str()) {
                        trace!(path = %path, key = %key, "Skipping array");
                        continue;
                    }
                    self.map_array(cache, path, key, items, options.clone()).await;
                }
                Value::Object(nested) => {
                    if !nested.is_empty() {
                        let nested_options = options.clone().with_writable(false);
                        self.parse(cache, path.child(&key_segment(key)), value, nested_options)
                            .await;
                    }
                }
                _ => self.map_object_leaf(cache, path, key, value, &options).await,
            }
        }
    }

    async fn map_object_leaf(
        &self,
        cache: &mut ObjectCache,
        path: &TreePath,
        key: &str,
        value: &Value,
        options: &ParseOptions,
    ) {
        let mut leaf_path = path.child(&key_segment(key));
        let mut value = value.clone();
        if key == READY_KEY {
            leaf_path = leaf_path.relocate_from_info();
        } else if key == STATUS_KEY {
            leaf_path = leaf_path.relocate_from_info();
            if is_numeric(&value) {
                value = status_value(&value);
            }
        }

        if !cache.contains(&leaf_path) {
            let name = options.display_name(key);
            let mut states = None;
            let role = infer_role(
                &RoleInput::new(&value, options.writable).with_key(key),
                &mut states,
            );
            let common = CommonMetadata {
                id: name.clone(),
                name,
                role: Some(role),
                leaf_type: Some(storage_type(key, &value)),
                write: options.writable,
                read: true,
                ..Default::default()
            };
            let leaf = TreeObject::state(common, Some(transport_address(&leaf_path)));
            self.create_once(cache, &leaf_path, leaf).await;
        }
        self.write(&leaf_path, value).await;
    }
}

/// Payload keys are gateway identifiers and are used verbatim as segments,
/// unless they contain the path separator.
fn key_segment(key: &str) -> String {
    if key.contains('.') {
        sanitize(key)
    } else {
        key.to_string()
    }
}
