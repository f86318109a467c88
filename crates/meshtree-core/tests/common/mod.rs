//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meshtree_core::error::{StoreError, StoreResult};
use meshtree_core::store::{ChangeSubscriber, MemoryStore, ObjectStore, StoredValue};
use meshtree_core::{TreeObject, TreePath};
use serde_json::Value;

type DelayFn = dyn Fn(&TreePath) -> Duration + Send + Sync;

/// In-memory store that records every create and write call.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    creates: Mutex<Vec<String>>,
    writes: Mutex<Vec<(String, Value)>>,
    failing: Mutex<HashSet<String>>,
    delay: Option<Box<DelayFn>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store whose writes take `delay(path)` before completing.
    pub fn with_delay<F>(delay: F) -> Arc<Self>
    where
        F: Fn(&TreePath) -> Duration + Send + Sync + 'static,
    {
        Arc::new(Self {
            delay: Some(Box::new(delay)),
            ..Default::default()
        })
    }

    /// Make creates at `path` fail.
    pub fn fail_on(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn create_calls(&self, path: &str) -> usize {
        self.creates.lock().unwrap().iter().filter(|p| *p == path).count()
    }

    pub fn total_creates(&self) -> usize {
        self.creates.lock().unwrap().len()
    }

    pub fn write_calls(&self, path: &str) -> usize {
        self.writes.lock().unwrap().iter().filter(|(p, _)| p == path).count()
    }

    pub fn writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn reset_log(&self) {
        self.creates.lock().unwrap().clear();
        self.writes.lock().unwrap().clear();
    }

    pub async fn value(&self, path: &str) -> Option<Value> {
        self.inner.value(path).await
    }

    pub async fn object(&self, path: &str) -> Option<TreeObject> {
        self.inner.object(path).await
    }

    async fn pause(&self, path: &TreePath) {
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(path)).await;
        }
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn exists_or_create(&self, path: &TreePath, object: TreeObject) -> StoreResult<bool> {
        self.creates.lock().unwrap().push(path.to_string());
        if self.failing.lock().unwrap().contains(path.as_str()) {
            return Err(StoreError::Backend(format!("rejected {}", path)));
        }
        self.pause(path).await;
        self.inner.exists_or_create(path, object).await
    }

    async fn write_value(&self, path: &TreePath, value: Value, ack: bool) -> StoreResult<()> {
        self.pause(path).await;
        self.writes.lock().unwrap().push((path.to_string(), value.clone()));
        self.inner.write_value(path, value, ack).await
    }

    async fn read_object(&self, path: &TreePath) -> StoreResult<Option<TreeObject>> {
        self.inner.read_object(path).await
    }

    async fn update_object(&self, path: &TreePath, object: TreeObject) -> StoreResult<()> {
        self.inner.update_object(path, object).await
    }

    async fn read_value(&self, path: &TreePath) -> StoreResult<Option<StoredValue>> {
        self.inner.read_value(path).await
    }

    async fn delete_subtree(&self, root: &TreePath) -> StoreResult<usize> {
        self.inner.delete_subtree(root).await
    }

    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<(TreePath, TreeObject)>> {
        self.inner.list_objects(prefix).await
    }
}

/// Subscriber that remembers subscription order.
#[derive(Default)]
pub struct RecordingSubscriber {
    paths: Mutex<Vec<String>>,
}

impl RecordingSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeSubscriber for RecordingSubscriber {
    async fn subscribe(&self, path: &TreePath) {
        self.paths.lock().unwrap().push(path.to_string());
    }
}
