//! Shape classification of payload fragments.

use serde_json::{Map, Value};

use crate::constants::DEVICE_LABEL_KEY;
use crate::descriptor::CommandDescriptor;
use crate::values::{display_text, is_truthy};

/// The shape a payload fragment takes for the mapping engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fragment<'a> {
    /// `null`: nothing to map.
    Empty,
    /// String, number or boolean.
    Scalar(&'a Value),
    /// Object carrying a command-class descriptor.
    Descriptor(&'a Value),
    /// Object carrying a product label: a device root that is also mapped
    /// as a generic object.
    Device(&'a Map<String, Value>),
    Array(&'a [Value]),
    Object(&'a Map<String, Value>),
}

impl<'a> Fragment<'a> {
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Null => Fragment::Empty,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Fragment::Scalar(value),
            Value::Array(items) => Fragment::Array(items),
            Value::Object(map) => {
                if map.get(DEVICE_LABEL_KEY).map(is_truthy).unwrap_or(false) {
                    Fragment::Device(map)
                } else if CommandDescriptor::is_descriptor(value) {
                    Fragment::Descriptor(value)
                } else {
                    Fragment::Object(map)
                }
            }
        }
    }
}

/// Display name of a device payload: `name`, `productLabel`, `manufacturer`
/// or a rename event's `newValue`, whichever is set first.
pub fn device_display_name(payload: &Value) -> Option<String> {
    ["name", DEVICE_LABEL_KEY, "manufacturer", "newValue"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .find(|v| is_truthy(v))
        .map(display_text)
}
