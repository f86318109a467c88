//! Object cache: which tree objects exist and which must be subscribed.
//!
//! An entry exists exactly when the backing store holds the object. The cache
//! is owned by the dispatcher and only ever touched by the queue worker, so it
//! needs no locking.

use std::collections::HashMap;

use crate::path::TreePath;

/// What the engine remembers about an existing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Transport address for write-back, when the object has one.
    pub external_ref: Option<String>,
    pub writable: bool,
    /// Set once a change subscription has been issued. Never reset.
    pub subscribed: bool,
}

impl CacheEntry {
    pub fn new(external_ref: Option<String>, writable: bool) -> Self {
        Self {
            external_ref,
            writable,
            subscribed: false,
        }
    }

    /// Entry for a device or channel.
    pub fn structural() -> Self {
        Self::new(None, false)
    }
}

/// Path-keyed cache of existing objects.
#[derive(Debug, Default)]
pub struct ObjectCache {
    entries: HashMap<TreePath, CacheEntry>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &TreePath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &TreePath) -> Option<&CacheEntry> {
        self.entries.get(path)
    }

    /// Record an object. An already subscribed entry stays subscribed.
    pub fn insert(&mut self, path: TreePath, mut entry: CacheEntry) {
        if let Some(existing) = self.entries.get(&path) {
            entry.subscribed |= existing.subscribed;
        }
        self.entries.insert(path, entry);
    }

    /// Drop every entry at or below a node root. Returns the number removed.
    pub fn purge_node(&mut self, root: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| !path.is_within(root));
        before - self.entries.len()
    }

    /// Writable entries that have not been subscribed yet, sorted by path.
    pub fn pending_subscriptions(&self) -> Vec<TreePath> {
        let mut pending: Vec<TreePath> = self
            .entries
            .iter()
            .filter(|(_, e)| e.writable && !e.subscribed)
            .map(|(p, _)| p.clone())
            .collect();
        pending.sort();
        pending
    }

    pub fn mark_subscribed(&mut self, path: &TreePath) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.subscribed = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
