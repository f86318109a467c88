//! Tree paths and the path sanitizer.
//!
//! A [`TreePath`] is a dot-separated sequence of segments and is the only
//! identity an object has. Node roots look like `nodeID_007`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::COLOR_CHANNEL_KEYS;
use crate::values::display_text;

/// Prefix of every node root segment.
pub const NODE_PREFIX: &str = "nodeID_";

/// Normalize a free-text label into a path segment.
///
/// Drops everything that is not a letter, digit or whitespace, collapses
/// whitespace runs to a single space and trims both ends.
pub fn sanitize(label: &str) -> String {
    let kept: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical dot-delimited address of an object in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreePath(String);

impl TreePath {
    /// Wrap an already-formed path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append one segment.
    pub fn child(&self, segment: &str) -> TreePath {
        if self.0.is_empty() {
            TreePath(segment.to_string())
        } else {
            TreePath(format!("{}.{}", self.0, segment))
        }
    }

    /// First segment.
    pub fn root(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Last segment.
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or_default()
    }

    /// Whether this path is `root` or lies below it.
    pub fn is_within(&self, root: &str) -> bool {
        self.0 == root
            || (self.0.len() > root.len()
                && self.0.starts_with(root)
                && self.0.as_bytes()[root.len()] == b'.')
    }

    /// Move a leaf out of the `info` channel directly under its node root.
    pub fn relocate_from_info(&self) -> TreePath {
        TreePath(self.0.replacen(".info.", ".", 1))
    }

    /// Merge the last segment onto its parent by dropping the final separator.
    pub fn collapse_last(&self) -> TreePath {
        match self.0.rfind('.') {
            Some(idx) => {
                let mut merged = String::with_capacity(self.0.len() - 1);
                merged.push_str(&self.0[..idx]);
                merged.push_str(&self.0[idx + 1..]);
                TreePath(merged)
            }
            None => self.clone(),
        }
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TreePath {
    fn from(s: &str) -> Self {
        TreePath(s.to_string())
    }
}

impl From<String> for TreePath {
    fn from(s: String) -> Self {
        TreePath(s)
    }
}

impl AsRef<str> for TreePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Root segment for a numeric node id, zero-padded to three digits.
pub fn node_root(id: u64) -> String {
    format!("{}{:03}", NODE_PREFIX, id)
}

/// Root segment for a node id carried in a payload (number or numeric string).
pub fn node_root_from_value(id: &Value) -> Option<String> {
    match id {
        Value::Number(n) => n.as_u64().map(node_root),
        Value::String(s) => s.trim().parse::<u64>().ok().map(node_root),
        _ => None,
    }
}

/// Numeric id of a node root segment (`nodeID_007` -> 7).
pub fn node_number(root: &str) -> Option<u64> {
    root.strip_prefix(NODE_PREFIX)?.parse().ok()
}

/// Node root a path belongs to.
///
/// Paths already rooted at a node are returned as is; paths derived from a
/// per-node topic (`7/...`) have their numeric head turned into a node root.
pub fn owning_node(path: &TreePath) -> String {
    let first = path.root();
    if first.contains("node") {
        return first.to_string();
    }
    let head = first.split('/').next().unwrap_or_default();
    match head.parse::<u64>() {
        Ok(id) => node_root(id),
        Err(_) => first.to_string(),
    }
}

/// Leaf path for a command-class value on a node.
///
/// Colour channel keys merge onto their parent (`currentColor` + `Red`
/// becomes `currentColorRed`) instead of nesting.
pub fn value_path(
    node: &str,
    command_class_name: &str,
    property_name: &str,
    property_key_name: Option<&str>,
) -> TreePath {
    let mut path = TreePath::new(node)
        .child(command_class_name)
        .child(&value_segment(property_name));
    if let Some(key_name) = property_key_name {
        path = path.child(&value_segment(key_name));
        if COLOR_CHANNEL_KEYS.contains(&key_name) {
            path = path.collapse_last();
        }
    }
    path
}

/// Sanitized segment, or the raw text without separators when nothing
/// survives sanitizing (`%`).
fn value_segment(name: &str) -> String {
    let segment = sanitize(name);
    if segment.is_empty() {
        name.trim().replace('.', "_")
    } else {
        segment
    }
}

/// Translate a per-node topic (`7/37/0/currentValue`) into a tree path.
pub fn topic_to_path(topic: &str, node: &str) -> TreePath {
    let mut path = TreePath::new(node);
    for segment in topic.split('/').skip(1) {
        let clean = sanitize(segment);
        if !clean.is_empty() {
            path = path.child(&clean);
        }
    }
    path
}

/// Transport address of a tree path: `/` separated, node roots unpadded.
pub fn transport_address(path: &TreePath) -> String {
    path.as_str()
        .split('.')
        .map(|segment| match node_number(segment) {
            Some(id) => id.to_string(),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Gateway value-id address: `<node>/<commandClass>/<endpoint>/<property>[/<propertyKey>]`.
pub fn value_id_address(
    node_id: u64,
    command_class: &Value,
    endpoint: u64,
    property: &Value,
    property_key: Option<&Value>,
) -> String {
    let mut address = format!(
        "{}/{}/{}/{}",
        node_id,
        display_text(command_class),
        endpoint,
        display_text(property)
    );
    if let Some(key) = property_key.filter(|k| !k.is_null()) {
        address.push('/');
        address.push_str(&display_text(key));
    }
    address
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_strips_punctuation() {
        assert_eq!(sanitize("Target Value (2)"), "Target Value 2");
        assert_eq!(sanitize("  Power   (W) "), "Power W");
        assert_eq!(sanitize("Überwachung-Zone"), "ÜberwachungZone");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for input in ["Target Value (2)", "a\t\tb", " x.y.z ", "Level %", "日本 語"] {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once);
            assert!(!once.starts_with(' '));
            assert!(!once.ends_with(' '));
            assert!(!once.contains("  "));
        }
    }

    #[test]
    fn test_node_root_padding() {
        assert_eq!(node_root(7), "nodeID_007");
        assert_eq!(node_root(123), "nodeID_123");
        assert_eq!(node_root_from_value(&json!("12")), Some("nodeID_012".to_string()));
        assert_eq!(node_root_from_value(&json!(null)), None);
        assert_eq!(node_number("nodeID_007"), Some(7));
        assert_eq!(node_number("info"), None);
    }

    #[test]
    fn test_is_within_respects_segments() {
        let path = TreePath::from("nodeID_007.Binary Switch.currentValue");
        assert!(path.is_within("nodeID_007"));
        assert!(!path.is_within("nodeID_00"));
        assert!(TreePath::from("nodeID_007").is_within("nodeID_007"));
        assert!(!TreePath::from("nodeID_0070.x").is_within("nodeID_007"));
    }

    #[test]
    fn test_value_path_collapses_color_channels() {
        let path = value_path("nodeID_005", "Color Switch", "currentColor", Some("Red"));
        assert_eq!(path.as_str(), "nodeID_005.Color Switch.currentColorRed");

        let path = value_path("nodeID_005", "Meter", "value", Some("Electric (kWh)"));
        assert_eq!(path.as_str(), "nodeID_005.Meter.value.Electric kWh");
    }

    #[test]
    fn test_value_path_keeps_punctuation_only_names() {
        let path = value_path("nodeID_001", "Meter", "%", None);
        assert_eq!(path.as_str(), "nodeID_001.Meter.%");
        assert_eq!(path.last_segment(), "%");

        let path = value_path("nodeID_001", "Meter", "value", Some(" ... "));
        assert_eq!(path.as_str(), "nodeID_001.Meter.value.___");
    }

    #[test]
    fn test_relocate_from_info() {
        let path = TreePath::from("nodeID_002.info.ready");
        assert_eq!(path.relocate_from_info().as_str(), "nodeID_002.ready");
    }

    #[test]
    fn test_owning_node() {
        assert_eq!(owning_node(&TreePath::from("nodeID_004.info")), "nodeID_004");
        assert_eq!(owning_node(&TreePath::from("4/37/0/currentValue")), "nodeID_004");
    }

    #[test]
    fn test_transport_address() {
        let path = TreePath::from("nodeID_007.info.lastActive");
        assert_eq!(transport_address(&path), "7/info/lastActive");
        assert_eq!(
            value_id_address(7, &json!(37), 0, &json!("targetValue"), None),
            "7/37/0/targetValue"
        );
        assert_eq!(
            value_id_address(7, &json!(51), 0, &json!("targetColor"), Some(&json!(2))),
            "7/51/0/targetColor/2"
        );
    }

    #[test]
    fn test_topic_to_path() {
        assert_eq!(
            topic_to_path("7/Binary Switch/0/currentValue", "nodeID_007").as_str(),
            "nodeID_007.Binary Switch.0.currentValue"
        );
    }
}
