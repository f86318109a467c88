//! Persistent object store for the meshtree bridge.
//!
//! Objects and values live in two redb tables keyed by tree path, encoded
//! as JSON.

pub mod error;
pub mod redb_store;

pub use error::{Error, Result};
pub use redb_store::{RedbObjectStore, RedbStoreConfig};
