//! Backing-store contract required by the mapping engine.
//!
//! The engine never assumes more than this trait offers. Backends live
//! elsewhere (`meshtree-storage` for redb); [`memory::MemoryStore`] is the
//! in-process backend used by tests and dry runs.

pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::model::TreeObject;
use crate::path::TreePath;

pub use memory::MemoryStore;

/// Current value of a state leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub val: Value,
    /// Acknowledged by the device side (as opposed to a pending command).
    pub ack: bool,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
}

impl StoredValue {
    pub fn new(val: Value, ack: bool) -> Self {
        Self {
            val,
            ack,
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Persistent object/state store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the object unless one already exists at `path`.
    /// Returns `true` when a new object was created.
    async fn exists_or_create(&self, path: &TreePath, object: TreeObject) -> StoreResult<bool>;

    /// Write a state value.
    async fn write_value(&self, path: &TreePath, value: Value, ack: bool) -> StoreResult<()>;

    /// Read an object's metadata.
    async fn read_object(&self, path: &TreePath) -> StoreResult<Option<TreeObject>>;

    /// Replace an existing object's metadata.
    async fn update_object(&self, path: &TreePath, object: TreeObject) -> StoreResult<()>;

    /// Read a state value.
    async fn read_value(&self, path: &TreePath) -> StoreResult<Option<StoredValue>>;

    /// Delete the object at `root` and everything below it, with values.
    /// Returns the number of objects removed.
    async fn delete_subtree(&self, root: &TreePath) -> StoreResult<usize>;

    /// All objects whose path starts with `prefix`, sorted by path.
    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<(TreePath, TreeObject)>>;

    /// Writable state leaves below `prefix`.
    async fn query_by_writable_flag(&self, prefix: &str) -> StoreResult<Vec<(TreePath, TreeObject)>> {
        Ok(self
            .list_objects(prefix)
            .await?
            .into_iter()
            .filter(|(_, obj)| obj.is_writable_state())
            .collect())
    }

    /// Write only when the stored value differs. Returns `true` when written.
    async fn write_value_if_changed(&self, path: &TreePath, value: Value, ack: bool) -> StoreResult<bool> {
        if let Some(current) = self.read_value(path).await? {
            if current.val == value {
                return Ok(false);
            }
        }
        self.write_value(path, value, ack).await?;
        Ok(true)
    }
}

/// Receiver of change-subscription requests for writable leaves.
#[async_trait]
pub trait ChangeSubscriber: Send + Sync {
    async fn subscribe(&self, path: &TreePath);
}

/// Set of leaves whose user-side changes are routed back to the gateway.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    paths: Arc<RwLock<HashSet<TreePath>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_subscribed(&self, path: &TreePath) -> bool {
        self.paths.read().await.contains(path)
    }

    pub async fn len(&self) -> usize {
        self.paths.read().await.len()
    }

    pub async fn snapshot(&self) -> Vec<TreePath> {
        let mut paths: Vec<TreePath> = self.paths.read().await.iter().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ChangeSubscriber for SubscriptionRegistry {
    async fn subscribe(&self, path: &TreePath) {
        self.paths.write().await.insert(path.clone());
    }
}
