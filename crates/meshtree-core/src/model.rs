//! Tree object model: devices, channels and state leaves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Enumerated states of a leaf, raw value to display text.
pub type StateMap = BTreeMap<String, String>;

/// Kind of object stored at a tree path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// One physical node.
    Device,
    /// Non-leaf grouping.
    Channel,
    /// Terminal value holder.
    State,
}

/// Semantic role of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "indicator")]
    Indicator,
    #[serde(rename = "switch")]
    Switch,
    #[serde(rename = "button")]
    Button,
    #[serde(rename = "value")]
    Value,
    #[serde(rename = "level")]
    Level,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "value.time")]
    ValueTime,
    #[serde(rename = "state")]
    State,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Indicator => "indicator",
            Role::Switch => "switch",
            Role::Button => "button",
            Role::Value => "value",
            Role::Level => "level",
            Role::Text => "text",
            Role::ValueTime => "value.time",
            Role::State => "state",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage type of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafType {
    Boolean,
    Number,
    String,
    Mixed,
    Array,
    Object,
}

impl LeafType {
    /// Native type of a JSON value. `null` has no native type and maps to `Mixed`.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Bool(_) => LeafType::Boolean,
            Value::Number(_) => LeafType::Number,
            Value::String(_) => LeafType::String,
            Value::Array(_) => LeafType::Array,
            Value::Object(_) => LeafType::Object,
            Value::Null => LeafType::Mixed,
        }
    }

    /// Type named by a gateway descriptor's `type` field.
    pub fn from_declared(declared: &str) -> Self {
        match declared {
            "boolean" => LeafType::Boolean,
            "number" | "timeout" => LeafType::Number,
            "string" => LeafType::String,
            _ => LeafType::Mixed,
        }
    }
}

/// Display and schema metadata common to every object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonMetadata {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub leaf_type: Option<LeafType>,
    #[serde(default)]
    pub write: bool,
    #[serde(default = "default_read")]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub def: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<StateMap>,
}

fn default_read() -> bool {
    true
}

/// Transport-side metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeMetadata {
    /// Address the value is published to on write-back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

/// An object in the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeObject {
    pub kind: ObjectKind,
    pub common: CommonMetadata,
    #[serde(default)]
    pub native: NativeMetadata,
}

impl TreeObject {
    /// Device root with a display name.
    pub fn device(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: ObjectKind::Device,
            common: CommonMetadata {
                id: name.clone(),
                name,
                read: true,
                ..Default::default()
            },
            native: NativeMetadata::default(),
        }
    }

    /// Channel grouping with a display name.
    pub fn channel(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: ObjectKind::Channel,
            common: CommonMetadata {
                id: name.clone(),
                name,
                read: true,
                ..Default::default()
            },
            native: NativeMetadata::default(),
        }
    }

    /// State leaf.
    pub fn state(common: CommonMetadata, external_ref: Option<String>) -> Self {
        Self {
            kind: ObjectKind::State,
            common,
            native: NativeMetadata { external_ref },
        }
    }

    pub fn is_writable_state(&self) -> bool {
        self.kind == ObjectKind::State && self.common.write
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serializes_dotted() {
        assert_eq!(serde_json::to_value(Role::ValueTime).unwrap(), json!("value.time"));
        assert_eq!(Role::Level.to_string(), "level");
    }

    #[test]
    fn test_common_metadata_uses_type_key() {
        let common = CommonMetadata {
            id: "ready".into(),
            name: "ready".into(),
            role: Some(Role::Indicator),
            leaf_type: Some(LeafType::Boolean),
            read: true,
            ..Default::default()
        };
        let value = serde_json::to_value(&common).unwrap();
        assert_eq!(value["type"], json!("boolean"));
        assert!(value.get("min").is_none());

        let back: CommonMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, common);
    }

    #[test]
    fn test_declared_types() {
        assert_eq!(LeafType::from_declared("timeout"), LeafType::Number);
        assert_eq!(LeafType::from_declared("color"), LeafType::Mixed);
        assert_eq!(LeafType::of_value(&json!(null)), LeafType::Mixed);
    }
}
