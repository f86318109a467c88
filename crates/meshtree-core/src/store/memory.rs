//! In-memory object store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{ObjectStore, StoredValue};
use crate::error::{StoreError, StoreResult};
use crate::model::TreeObject;
use crate::path::TreePath;

/// Object store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<TreePath, TreeObject>>,
    values: RwLock<BTreeMap<TreePath, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Current value at `path`, without the envelope.
    pub async fn value(&self, path: &str) -> Option<Value> {
        self.values
            .read()
            .await
            .get(&TreePath::from(path))
            .map(|v| v.val.clone())
    }

    pub async fn object(&self, path: &str) -> Option<TreeObject> {
        self.objects.read().await.get(&TreePath::from(path)).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists_or_create(&self, path: &TreePath, object: TreeObject) -> StoreResult<bool> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(path) {
            return Ok(false);
        }
        objects.insert(path.clone(), object);
        Ok(true)
    }

    async fn write_value(&self, path: &TreePath, value: Value, ack: bool) -> StoreResult<()> {
        self.values
            .write()
            .await
            .insert(path.clone(), StoredValue::new(value, ack));
        Ok(())
    }

    async fn read_object(&self, path: &TreePath) -> StoreResult<Option<TreeObject>> {
        Ok(self.objects.read().await.get(path).cloned())
    }

    async fn update_object(&self, path: &TreePath, object: TreeObject) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        match objects.get_mut(path) {
            Some(existing) => {
                *existing = object;
                Ok(())
            }
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }

    async fn read_value(&self, path: &TreePath) -> StoreResult<Option<StoredValue>> {
        Ok(self.values.read().await.get(path).cloned())
    }

    async fn delete_subtree(&self, root: &TreePath) -> StoreResult<usize> {
        let mut objects = self.objects.write().await;
        let before = objects.len();
        objects.retain(|path, _| !path.is_within(root.as_str()));
        self.values
            .write()
            .await
            .retain(|path, _| !path.is_within(root.as_str()));
        Ok(before - objects.len())
    }

    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<(TreePath, TreeObject)>> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|(path, _)| path.as_str().starts_with(prefix))
            .map(|(path, obj)| (path.clone(), obj.clone()))
            .collect())
    }
}
