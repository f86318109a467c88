//! Bridge configuration.
//!
//! Loaded from TOML, then overridden by environment variables. Only the
//! broker host is required.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Environment variables that override file settings.
pub mod env_vars {
    pub const MQTT_HOST: &str = "MESHTREE_MQTT_HOST";
    pub const MQTT_PORT: &str = "MESHTREE_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "MESHTREE_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "MESHTREE_MQTT_PASSWORD";
    pub const BASE_TOPIC: &str = "MESHTREE_BASE_TOPIC";
    pub const DB_PATH: &str = "MESHTREE_DB_PATH";
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Prefix under which the gateway publishes.
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_port() -> u16 {
    1883
}

fn default_base_topic() -> String {
    "zwave".to_string()
}

fn default_client_id_prefix() -> String {
    "meshtree".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: None,
            password: None,
            base_topic: default_base_topic(),
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl MqttSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_base_topic(mut self, base_topic: impl Into<String>) -> Self {
        self.base_topic = base_topic.into();
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().map(|u| !u.is_empty()).unwrap_or(false)
    }
}

/// Object store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/meshtree.redb")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// What happens to a node's subtree when the gateway removes the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovedNodePolicy {
    /// Delete the subtree.
    #[default]
    Delete,
    /// Keep the subtree, note the removal in the device description.
    MarkDescription,
    /// Keep the subtree, rename the device.
    MarkName,
}

/// Dispatcher behaviour switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Forget a node's cache entries on every message about that node.
    #[serde(default)]
    pub renew_node_info: bool,

    #[serde(default)]
    pub removed_node_policy: RemovedNodePolicy,

    /// Log the first node-info update seen for each node.
    #[serde(default)]
    pub show_node_info_message: bool,

    /// Case-insensitive substring; matching envelopes are logged in full.
    #[serde(default)]
    pub debug_devices: Option<String>,
}

impl EngineSettings {
    pub fn with_removed_node_policy(mut self, policy: RemovedNodePolicy) -> Self {
        self.removed_node_policy = policy;
        self
    }

    pub fn with_renew_node_info(mut self, renew: bool) -> Self {
        self.renew_node_info = renew;
        self
    }

    pub fn with_debug_devices(mut self, filter: impl Into<String>) -> Self {
        self.debug_devices = Some(filter.into());
        self
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mqtt: MqttSettings,

    /// Gateway instance name, as in `ZWAVE_GATEWAY-<name>`.
    #[serde(default = "default_gateway_name")]
    pub gateway_name: String,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(flatten)]
    pub engine: EngineSettings,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_gateway_name() -> String {
    "zwave-js-ui".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttSettings::default(),
            gateway_name: default_gateway_name(),
            storage: StorageSettings::default(),
            engine: EngineSettings::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Configuration(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(env_vars::MQTT_HOST) {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup(env_vars::MQTT_PORT) {
            self.mqtt.port = port.parse().map_err(|_| {
                BridgeError::Configuration(format!("{} is not a port: {}", env_vars::MQTT_PORT, port))
            })?;
        }
        if let Some(username) = lookup(env_vars::MQTT_USERNAME) {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = lookup(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = Some(password);
        }
        if let Some(base_topic) = lookup(env_vars::BASE_TOPIC) {
            self.mqtt.base_topic = base_topic;
        }
        if let Some(path) = lookup(env_vars::DB_PATH) {
            self.storage.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Check the settings the bridge cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "mqtt.host is required: configure the broker the gateway publishes to".to_string(),
            ));
        }
        if self.mqtt.port == 0 {
            return Err(BridgeError::Configuration("mqtt.port must not be 0".to_string()));
        }
        if self.mqtt.base_topic.trim_matches('/').is_empty() {
            return Err(BridgeError::Configuration("mqtt.base_topic must not be empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(BridgeError::Configuration("queue_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = BridgeConfig::from_toml_str("[mqtt]\nhost = \"broker.local\"\n").unwrap();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.base_topic, "zwave");
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.engine.removed_node_policy, RemovedNodePolicy::Delete);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_settings_are_top_level() {
        let text = r#"
gateway_name = "home"
renew_node_info = true
removed_node_policy = "mark_name"
debug_devices = "nodeID_007"

[mqtt]
host = "10.0.0.2"
port = 1884
username = "bridge"
password = "secret"

[storage]
path = "/var/lib/meshtree/tree.redb"
"#;
        let config = BridgeConfig::from_toml_str(text).unwrap();
        assert_eq!(config.gateway_name, "home");
        assert!(config.engine.renew_node_info);
        assert_eq!(config.engine.removed_node_policy, RemovedNodePolicy::MarkName);
        assert_eq!(config.engine.debug_devices.as_deref(), Some("nodeID_007"));
        assert!(config.mqtt.has_credentials());
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/meshtree/tree.redb"));
    }

    #[test]
    fn test_missing_host_is_configuration_error() {
        let config = BridgeConfig::default();
        assert!(matches!(config.validate(), Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars = HashMap::from([
            (env_vars::MQTT_HOST, "mqtt.example"),
            (env_vars::MQTT_PORT, "8883"),
            (env_vars::BASE_TOPIC, "zw"),
        ]);
        let mut config = BridgeConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.mqtt.host, "mqtt.example");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.base_topic, "zw");

        let bad = HashMap::from([(env_vars::MQTT_PORT, "http")]);
        assert!(config.apply_overrides(|name| bad.get(name).map(|v| v.to_string())).is_err());
    }
}
