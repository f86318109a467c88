//! redb implementation of [`ObjectStore`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use meshtree_core::error::StoreResult;
use meshtree_core::store::{ObjectStore, StoredValue};
use meshtree_core::{TreeObject, TreePath};
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Object metadata by tree path.
const OBJECTS: Table = TableDefinition::new("objects");

/// Current state values by tree path.
const VALUES: Table = TableDefinition::new("values");

/// Configuration for [`RedbObjectStore`].
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbStoreConfig {
    /// Path to the database file.
    pub path: PathBuf,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

fn default_create_dirs() -> bool {
    true
}

impl RedbStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }

    /// Set whether to create parent directories.
    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }
}

/// Object store persisted in a redb database.
#[derive(Clone)]
pub struct RedbObjectStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbObjectStore {
    /// Open or create the database and its tables.
    pub fn new(config: RedbStoreConfig) -> Result<Self> {
        let path = config.path.as_path();
        if config.create_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };

        let txn = db.begin_write()?;
        {
            txn.open_table(OBJECTS)?;
            txn.open_table(VALUES)?;
        }
        txn.commit()?;
        debug!(path = %path.display(), "Opened object store");

        Ok(Self {
            db: Arc::new(db),
            path: config.path,
        })
    }

    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbStoreConfig::new(path.as_ref()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a database closure off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn read_entry<T: serde::de::DeserializeOwned>(
    db: &Database,
    table: Table,
    key: &str,
) -> Result<Option<T>> {
    let txn = db.begin_read()?;
    let t = txn.open_table(table)?;
    let entry = t.get(key)?;
    match entry {
        Some(bytes) => Ok(Some(decode(bytes.value())?)),
        None => Ok(None),
    }
}

/// Keys in `table` that start with `prefix`, in order.
fn scan_prefix(db: &Database, table: Table, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let txn = db.begin_read()?;
    let t = txn.open_table(table)?;
    let mut results = Vec::new();
    for item in t.range(prefix..)? {
        let (key, value) = item?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        results.push((key.to_string(), value.value().to_vec()));
    }
    Ok(results)
}

#[async_trait]
impl ObjectStore for RedbObjectStore {
    async fn exists_or_create(&self, path: &TreePath, object: TreeObject) -> StoreResult<bool> {
        let key = path.to_string();
        let bytes = encode(&object)?;
        let created = self
            .blocking(move |db| {
                let txn = db.begin_write()?;
                let created = {
                    let mut t = txn.open_table(OBJECTS)?;
                    let exists = t.get(key.as_str())?.is_some();
                    if !exists {
                        t.insert(key.as_str(), bytes.as_slice())?;
                    }
                    !exists
                };
                txn.commit()?;
                Ok(created)
            })
            .await?;
        Ok(created)
    }

    async fn write_value(&self, path: &TreePath, value: Value, ack: bool) -> StoreResult<()> {
        let key = path.to_string();
        let bytes = encode(&StoredValue::new(value, ack))?;
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut t = txn.open_table(VALUES)?;
                t.insert(key.as_str(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn read_object(&self, path: &TreePath) -> StoreResult<Option<TreeObject>> {
        let key = path.to_string();
        Ok(self.blocking(move |db| read_entry(db, OBJECTS, &key)).await?)
    }

    async fn update_object(&self, path: &TreePath, object: TreeObject) -> StoreResult<()> {
        let key = path.to_string();
        let bytes = encode(&object)?;
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut t = txn.open_table(OBJECTS)?;
                let exists = t.get(key.as_str())?.is_some();
                if !exists {
                    return Err(Error::NotFound(key));
                }
                t.insert(key.as_str(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn read_value(&self, path: &TreePath) -> StoreResult<Option<StoredValue>> {
        let key = path.to_string();
        Ok(self.blocking(move |db| read_entry(db, VALUES, &key)).await?)
    }

    async fn delete_subtree(&self, root: &TreePath) -> StoreResult<usize> {
        let target = root.clone();
        let removed = self
            .blocking(move |db| {
                let root = target;
                let doomed: Vec<String> = scan_prefix(db, OBJECTS, root.as_str())?
                    .into_iter()
                    .map(|(key, _)| key)
                    .filter(|key| TreePath::from(key.as_str()).is_within(root.as_str()))
                    .collect();
                let doomed_values: Vec<String> = scan_prefix(db, VALUES, root.as_str())?
                    .into_iter()
                    .map(|(key, _)| key)
                    .filter(|key| TreePath::from(key.as_str()).is_within(root.as_str()))
                    .collect();

                let txn = db.begin_write()?;
                {
                    let mut objects = txn.open_table(OBJECTS)?;
                    for key in &doomed {
                        objects.remove(key.as_str())?;
                    }
                    let mut values = txn.open_table(VALUES)?;
                    for key in &doomed_values {
                        values.remove(key.as_str())?;
                    }
                }
                txn.commit()?;
                Ok(doomed.len())
            })
            .await?;
        debug!(root = %root, removed, "Deleted subtree");
        Ok(removed)
    }

    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<(TreePath, TreeObject)>> {
        let prefix = prefix.to_string();
        let objects = self
            .blocking(move |db| {
                scan_prefix(db, OBJECTS, &prefix)?
                    .into_iter()
                    .map(|(key, bytes)| -> Result<(TreePath, TreeObject)> {
                        Ok((TreePath::new(key), decode(&bytes)?))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .await?;
        Ok(objects)
    }
}
