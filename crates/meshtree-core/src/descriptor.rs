//! Command-class descriptors and their resolution into concrete leaf values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MANUFACTURER_PROPRIETARY;
use crate::inference::{infer_role, RoleInput};
use crate::model::{CommonMetadata, LeafType, StateMap};
use crate::path::{value_id_address, value_path, TreePath};
use crate::values::{as_number, display_text, is_numeric, is_truthy, number_value};

/// A typed value wrapper the gateway attaches to every device property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescriptor {
    #[serde(default)]
    pub command_class: Value,
    #[serde(default)]
    pub command_class_name: String,
    #[serde(default)]
    pub property: Value,
    #[serde(default)]
    pub property_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<u64>,
    #[serde(rename = "type", default)]
    pub value_type: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writeable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub list: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u64>,
}

/// Concrete value and effective storage type of a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    pub value: Value,
    pub leaf_type: LeafType,
}

/// Metadata and (possibly clamped) first value of a new descriptor leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorLeaf {
    pub common: CommonMetadata,
    pub value: Value,
}

impl CommandDescriptor {
    /// Whether a JSON object carries a descriptor.
    pub fn is_descriptor(value: &Value) -> bool {
        value.get("commandClass").map(is_truthy).unwrap_or(false)
    }

    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }

    pub fn is_boolean(&self) -> bool {
        self.value_type == "boolean"
    }

    fn read_only(&self) -> bool {
        self.writeable == Some(false)
    }

    fn min_value(&self) -> Value {
        self.min.map(number_value).unwrap_or(Value::Null)
    }

    /// `value ?? min ?? 0`
    fn value_or_min(&self) -> Value {
        if !self.value.is_null() {
            return self.value.clone();
        }
        match self.min {
            Some(min) => number_value(min),
            None => Value::from(0),
        }
    }

    /// Resolve the concrete value by declared type.
    ///
    /// A duration carrying its own unit hoists that unit onto the descriptor.
    /// A value that is still absent after resolution becomes `0`.
    pub fn resolve(&mut self) -> ResolvedValue {
        let declared = self.value_type.clone();

        let (value, leaf_type) = if declared == "any" || declared == "color" {
            let value = match &self.value {
                Value::Object(_) | Value::Array(_) => Value::String(self.value.to_string()),
                other => other.clone(),
            };
            (value, LeafType::Mixed)
        } else if declared.contains("string") {
            let mut value = self.value_or_min();
            if self.read_only() {
                if let Value::Array(items) = &value {
                    if !items.is_empty() {
                        value = Value::String(value.to_string());
                    }
                }
            }
            (value, LeafType::Mixed)
        } else if declared.contains("buffer") {
            let mut value = self.value_or_min();
            if self.read_only() {
                if let Value::Array(items) = &value {
                    if let Some(first) = items.first() {
                        value = first.clone();
                    }
                }
            }
            (value, LeafType::Mixed)
        } else if declared == "duration" {
            let mut value = self.value_or_min();
            if value.is_object() || value.is_array() {
                if let Some(unit) = value.get("unit").filter(|u| is_truthy(u)) {
                    self.unit = Some(display_text(unit));
                }
                value = Value::from(0);
            }
            (value, LeafType::Mixed)
        } else if declared == "number" {
            let value = if is_truthy(&self.value) {
                if is_numeric(&self.value) {
                    self.value.clone()
                } else {
                    Value::from(0)
                }
            } else if !self.value.is_null() {
                self.value.clone()
            } else {
                self.min_value()
            };
            (value, LeafType::Number)
        } else {
            let value = if self.readable == Some(false) {
                Value::Bool(false)
            } else if !self.value.is_null() {
                self.value.clone()
            } else if self.is_boolean() {
                Value::Bool(false)
            } else {
                self.value_or_min()
            };
            (value, LeafType::from_declared(&declared))
        };

        let value = if value.is_null() { Value::from(0) } else { value };
        ResolvedValue { value, leaf_type }
    }

    /// Tree path of this descriptor's leaf under a node root.
    pub fn leaf_path(&self, node: &str) -> TreePath {
        value_path(
            node,
            &self.command_class_name,
            &self.property_name,
            self.property_key_name.as_deref(),
        )
    }

    /// Gateway value-id address used for write-back.
    pub fn external_ref(&self, node_id: Option<u64>) -> Option<String> {
        let node_id = self.node_id.or(node_id)?;
        Some(value_id_address(
            node_id,
            &self.command_class,
            self.endpoint.unwrap_or(0),
            &self.property,
            self.property_key.as_ref(),
        ))
    }

    /// Build the metadata of a new leaf from a resolved value.
    ///
    /// The default is `default`, else `false` for booleans, else `min`.
    /// A non-boolean default outside `[min, max]` is pulled to the violated
    /// bound, and the first value follows it past that bound.
    pub fn build_leaf(&self, resolved: ResolvedValue) -> DescriptorLeaf {
        let mut value = resolved.value;
        let boolean = self.is_boolean();

        let mut def = match &self.default {
            Some(d) if !d.is_null() => Some(d.clone()),
            _ if boolean => Some(Value::Bool(false)),
            _ => self.min.map(number_value),
        };

        if !boolean {
            if let Some(current) = def.as_ref().and_then(as_number) {
                if let Some(min) = self.min.filter(|min| current < *min) {
                    def = Some(number_value(min));
                    if as_number(&value).map(|v| v < min).unwrap_or(false) {
                        value = number_value(min);
                    }
                } else if let Some(max) = self.max.filter(|max| current > *max) {
                    def = Some(number_value(max));
                    if as_number(&value).map(|v| v > max).unwrap_or(false) {
                        value = number_value(max);
                    }
                }
            }
        }

        // Any state list steers the role; only listed non-boolean ones are stored.
        let mut role_states = self.states.as_ref().and_then(format_states);
        let writable = self.writeable.unwrap_or(false);
        let role = infer_role(
            &RoleInput::new(&value, writable).with_boolean_type(boolean),
            &mut role_states,
        );
        let states = if self.list && !boolean { role_states } else { None };

        let label = self.label.clone().unwrap_or_else(|| self.property_name.clone());
        let (name, desc) = if self.command_class_name == MANUFACTURER_PROPRIETARY {
            (
                self.property_key_name.clone().unwrap_or_else(|| label.clone()),
                Some(display_text(&self.property)),
            )
        } else {
            (label.clone(), self.description.clone().or_else(|| self.label.clone()))
        };

        let common = CommonMetadata {
            id: label,
            name,
            role: Some(role),
            leaf_type: Some(resolved.leaf_type),
            write: writable,
            read: self.readable.unwrap_or(true),
            desc,
            min: self.min,
            max: self.max,
            def,
            unit: Some(self.unit.clone().unwrap_or_default()),
            states,
        };

        DescriptorLeaf { common, value }
    }
}

/// Normalize a descriptor's state list into a value-to-text map.
///
/// Accepts both `[{"value": 0, "text": "Off"}, ...]` and `{"0": "Off", ...}`.
pub fn format_states(states: &Value) -> Option<StateMap> {
    let map: StateMap = match states {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let value = item.get("value")?;
                let text = item.get("text").or_else(|| item.get("label"))?;
                Some((display_text(value), display_text(text)))
            })
            .collect(),
        Value::Object(entries) => entries
            .iter()
            .map(|(k, v)| (k.clone(), display_text(v)))
            .collect(),
        _ => return None,
    };
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use serde_json::json;

    fn descriptor(value: Value) -> CommandDescriptor {
        CommandDescriptor::from_value(&value).unwrap()
    }

    #[test]
    fn test_detects_descriptor() {
        assert!(CommandDescriptor::is_descriptor(&json!({"commandClass": 37})));
        assert!(!CommandDescriptor::is_descriptor(&json!({"commandClass": 0})));
        assert!(!CommandDescriptor::is_descriptor(&json!({"value": 1})));
    }

    #[test]
    fn test_resolve_any_stringifies_objects() {
        let mut d = descriptor(json!({"commandClass": 51, "type": "color", "value": {"red": 255}}));
        let resolved = d.resolve();
        assert_eq!(resolved.leaf_type, LeafType::Mixed);
        assert_eq!(resolved.value, json!("{\"red\":255}"));
    }

    #[test]
    fn test_resolve_string_family() {
        let mut d = descriptor(json!({
            "commandClass": 114, "type": "string[]", "writeable": false, "value": ["a", "b"]
        }));
        assert_eq!(d.resolve().value, json!("[\"a\",\"b\"]"));

        let mut d = descriptor(json!({"commandClass": 114, "type": "string", "writeable": true}));
        assert_eq!(d.resolve().value, json!(0));
    }

    #[test]
    fn test_resolve_buffer_takes_first_element() {
        let mut d = descriptor(json!({
            "commandClass": 99, "type": "buffer", "writeable": false, "value": [7, 8]
        }));
        assert_eq!(d.resolve().value, json!(7));
    }

    #[test]
    fn test_resolve_duration_hoists_unit() {
        let mut d = descriptor(json!({
            "commandClass": 38, "type": "duration", "value": {"value": 5, "unit": "seconds"}
        }));
        let resolved = d.resolve();
        assert_eq!(resolved.value, json!(0));
        assert_eq!(d.unit.as_deref(), Some("seconds"));
    }

    #[test]
    fn test_resolve_number() {
        let mut d = descriptor(json!({"commandClass": 38, "type": "number", "value": "abc"}));
        assert_eq!(d.resolve().value, json!(0));

        let mut d = descriptor(json!({"commandClass": 38, "type": "number", "value": 55}));
        assert_eq!(d.resolve().value, json!(55));

        let mut d = descriptor(json!({"commandClass": 38, "type": "number", "min": 1}));
        let resolved = d.resolve();
        assert_eq!(resolved.value, json!(1));
        assert_eq!(resolved.leaf_type, LeafType::Number);
    }

    #[test]
    fn test_resolve_boolean_and_unreadable() {
        let mut d = descriptor(json!({"commandClass": 37, "type": "boolean"}));
        assert_eq!(d.resolve().value, json!(false));

        let mut d = descriptor(json!({"commandClass": 37, "type": "boolean", "readable": false, "value": true}));
        assert_eq!(d.resolve().value, json!(false));
    }

    #[test]
    fn test_build_leaf_clamps_default_and_value() {
        let mut d = descriptor(json!({
            "commandClass": 112, "commandClassName": "Configuration", "propertyName": "Level",
            "type": "number", "min": 10, "max": 20, "default": 5, "value": 3
        }));
        let resolved = d.resolve();
        let leaf = d.build_leaf(resolved);
        assert_eq!(leaf.common.def, Some(json!(10)));
        assert_eq!(leaf.value, json!(10));
    }

    #[test]
    fn test_build_leaf_never_clamps_booleans() {
        let mut d = descriptor(json!({
            "commandClass": 37, "propertyName": "on", "type": "boolean",
            "min": 10, "max": 20, "default": 5, "value": true
        }));
        let resolved = d.resolve();
        let leaf = d.build_leaf(resolved);
        assert_eq!(leaf.common.def, Some(json!(5)));
        assert_eq!(leaf.value, json!(true));
    }

    #[test]
    fn test_build_leaf_names_and_states() {
        let mut d = descriptor(json!({
            "commandClass": 43, "commandClassName": "Scene Activation", "propertyName": "sceneId",
            "label": "Scene ID", "type": "number", "writeable": true, "list": true,
            "states": [{"value": 1, "text": "Scene 1"}, {"value": 2, "text": "Scene 2"}]
        }));
        let resolved = d.resolve();
        let leaf = d.build_leaf(resolved);
        assert_eq!(leaf.common.name, "Scene ID");
        assert_eq!(leaf.common.desc.as_deref(), Some("Scene ID"));
        assert_eq!(leaf.common.role, Some(Role::Switch));
        assert_eq!(leaf.common.states.as_ref().map(|s| s.len()), Some(2));
        assert_eq!(leaf.common.unit.as_deref(), Some(""));
        assert!(leaf.common.write);
    }

    #[test]
    fn test_build_leaf_manufacturer_proprietary() {
        let mut d = descriptor(json!({
            "commandClass": 145, "commandClassName": "manufacturer_proprietary",
            "property": "fibaro", "propertyName": "fibaro", "propertyKeyName": "venetianBlindsTilt",
            "type": "number", "value": 0
        }));
        let resolved = d.resolve();
        let leaf = d.build_leaf(resolved);
        assert_eq!(leaf.common.name, "venetianBlindsTilt");
        assert_eq!(leaf.common.desc.as_deref(), Some("fibaro"));
    }

    #[test]
    fn test_external_ref() {
        let d = descriptor(json!({
            "commandClass": 37, "endpoint": 0, "property": "targetValue", "nodeId": 7
        }));
        assert_eq!(d.external_ref(None).as_deref(), Some("7/37/0/targetValue"));
        let d = descriptor(json!({"commandClass": 37, "property": "targetValue"}));
        assert_eq!(d.external_ref(None), None);
        assert_eq!(d.external_ref(Some(3)).as_deref(), Some("3/37/0/targetValue"));
    }

    #[test]
    fn test_format_states_map() {
        let states = format_states(&json!({"0": "Off", "255": "On"})).unwrap();
        assert_eq!(states.get("255").map(String::as_str), Some("On"));
        assert!(format_states(&json!([])).is_none());
    }
}
