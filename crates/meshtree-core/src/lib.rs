//! Core of the meshtree bridge.
//!
//! Projects the event stream of a mesh-network device gateway onto a typed
//! object tree: envelopes are classified, dispatched one at a time through
//! the serialization queue and mapped onto tree objects that are created at
//! most once per session.

pub mod cache;
pub mod config;
pub mod constants;
pub mod control;
pub mod descriptor;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod fragment;
pub mod inference;
pub mod mapper;
pub mod model;
pub mod path;
pub mod queue;
pub mod store;
pub mod values;

pub use cache::{CacheEntry, ObjectCache};
pub use config::{BridgeConfig, EngineSettings, MqttSettings, RemovedNodePolicy, StorageSettings};
pub use control::{ControlMessage, ControlRouter};
pub use descriptor::{CommandDescriptor, ResolvedValue};
pub use dispatch::Dispatcher;
pub use envelope::{Envelope, GatewayMessage, MessageKind};
pub use error::{BridgeError, Result, StoreError, StoreResult};
pub use mapper::{ParseOptions, TreeMapper};
pub use model::{CommonMetadata, LeafType, NativeMetadata, ObjectKind, Role, TreeObject};
pub use path::{sanitize, TreePath};
pub use queue::{MessageQueue, QueueHandle, RawMessage};
pub use store::{ChangeSubscriber, MemoryStore, ObjectStore, StoredValue, SubscriptionRegistry};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{env_vars, BridgeConfig, EngineSettings};
    pub use crate::dispatch::Dispatcher;
    pub use crate::envelope::Envelope;
    pub use crate::error::{BridgeError, Result};
    pub use crate::queue::{MessageQueue, QueueHandle, RawMessage};
    pub use crate::store::{ObjectStore, SubscriptionRegistry};
    pub use crate::path::TreePath;
}
