//! Role and storage-type inference for state leaves.

use serde_json::Value;

use crate::constants::{RELIABLY_TYPED_KEYS, TIME_KEYS};
use crate::model::{LeafType, Role, StateMap};

/// Everything role inference looks at.
#[derive(Debug, Clone, Copy)]
pub struct RoleInput<'a> {
    /// Key the value arrived under, if any.
    pub key: Option<&'a str>,
    pub value: &'a Value,
    /// The value's declared type is boolean.
    pub boolean_typed: bool,
    pub writable: bool,
}

impl<'a> RoleInput<'a> {
    pub fn new(value: &'a Value, writable: bool) -> Self {
        Self {
            key: None,
            value,
            boolean_typed: value.is_boolean(),
            writable,
        }
    }

    pub fn with_key(mut self, key: &'a str) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_boolean_type(mut self, boolean_typed: bool) -> Self {
        self.boolean_typed = boolean_typed;
        self
    }
}

/// Infer the semantic role of a leaf. First match wins.
///
/// A boolean-typed value with enumerated states is a momentary action: the
/// states are dropped and the role is `button`.
pub fn infer_role(input: &RoleInput<'_>, states: &mut Option<StateMap>) -> Role {
    if input.key.map(|k| TIME_KEYS.contains(&k)).unwrap_or(false) {
        return Role::ValueTime;
    }

    if states.is_some() {
        if input.boolean_typed {
            *states = None;
            return Role::Button;
        }
        return Role::Switch;
    }

    match input.value {
        Value::Bool(_) if input.writable => Role::Switch,
        Value::Bool(_) => Role::Indicator,
        Value::Number(_) if input.writable => Role::Level,
        Value::Number(_) => Role::Value,
        Value::String(_) => Role::Text,
        _ => Role::State,
    }
}

/// Storage type for a plain leaf.
///
/// Only a few keys are reliably typed by the gateway; everything else, and
/// every string, is stored as `mixed`.
pub fn storage_type(key: &str, value: &Value) -> LeafType {
    if !RELIABLY_TYPED_KEYS.contains(&key) {
        return LeafType::Mixed;
    }
    match LeafType::of_value(value) {
        LeafType::String => LeafType::Mixed,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn role(value: Value, writable: bool) -> Role {
        infer_role(&RoleInput::new(&value, writable), &mut None)
    }

    #[test]
    fn test_role_table() {
        assert_eq!(role(json!(true), false), Role::Indicator);
        assert_eq!(role(json!(true), true), Role::Switch);
        assert_eq!(role(json!(42), true), Role::Level);
        assert_eq!(role(json!(42), false), Role::Value);
        assert_eq!(role(json!("x"), false), Role::Text);
        assert_eq!(role(json!("x"), true), Role::Text);
        assert_eq!(role(json!(null), false), Role::State);
    }

    #[test]
    fn test_time_keys_win() {
        let value = json!(1700000000000u64);
        let input = RoleInput::new(&value, false).with_key("lastActive");
        assert_eq!(infer_role(&input, &mut None), Role::ValueTime);
    }

    #[test]
    fn test_boolean_with_states_is_button() {
        let value = json!(false);
        let mut states = Some(StateMap::from([("true".to_string(), "Press".to_string())]));
        let input = RoleInput::new(&value, true).with_boolean_type(true);
        assert_eq!(infer_role(&input, &mut states), Role::Button);
        assert!(states.is_none());
    }

    #[test]
    fn test_enumerated_non_boolean_is_switch() {
        let value = json!(1);
        let mut states = Some(StateMap::from([("1".to_string(), "On".to_string())]));
        let input = RoleInput::new(&value, false);
        assert_eq!(infer_role(&input, &mut states), Role::Switch);
        assert!(states.is_some());
    }

    #[test]
    fn test_storage_type() {
        assert_eq!(storage_type("status", &json!(4)), LeafType::Number);
        assert_eq!(storage_type("status", &json!("Alive")), LeafType::Mixed);
        assert_eq!(storage_type("interviewStage", &json!(true)), LeafType::Boolean);
        assert_eq!(storage_type("firmwareVersion", &json!(1)), LeafType::Mixed);
    }
}
