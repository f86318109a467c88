//! Fixed key lists that steer the mapping engine.

/// Keys whose values are timestamps.
pub const TIME_KEYS: &[&str] = &["lastActive", "lastUpdate"];

/// Array-valued keys that are never expanded into the tree.
pub const SKIPPED_ARRAY_KEYS: &[&str] = &["eventsQueue", "rfRegions", "Scene Actuator Configuration"];

/// Keys the gateway reports with a stable type. Everything else is stored as `mixed`.
pub const RELIABLY_TYPED_KEYS: &[&str] = &["status", "interviewStage"];

/// Colour channel property keys that merge onto their parent path.
pub const COLOR_CHANNEL_KEYS: &[&str] = &["Red", "Green", "Blue"];

/// Payload key that marks a fragment as a device root.
pub const DEVICE_LABEL_KEY: &str = "productLabel";

/// Property that carries a device's display name.
pub const NAME_PROPERTY: &str = "name";

/// Command class whose properties are named by their key.
pub const MANUFACTURER_PROPRIETARY: &str = "manufacturer_proprietary";

/// Availability leaf under every node root.
pub const READY_KEY: &str = "ready";

/// Lifecycle status leaf under every node root.
pub const STATUS_KEY: &str = "status";

/// Channel under a node root that receives node snapshots.
pub const INFO_CHANNEL: &str = "info";

/// Adapter-level leaves.
pub mod info {
    pub const CONNECTION: &str = "info.connection";
    pub const GATEWAY_STATUS: &str = "info.gateway_status";
    pub const GATEWAY_VERSION: &str = "info.gateway_version";
    pub const DEBUG_MESSAGES: &str = "info.debug_messages";
}

/// Envelope topic segments.
pub mod topics {
    pub const EVENTS: &str = "_EVENTS";
    pub const CLIENTS: &str = "_CLIENTS";
    pub const NODE: &str = "node";
    pub const SET_SUFFIX: &str = "/set";
}

/// Display text for removed nodes.
pub const REMOVED_DESCRIPTION: &str = "Device removed by Z-Wave network";
pub const REMOVED_NAME: &str = "Device removed";

/// Text written to `status` leaves when availability is unknown.
pub const UNKNOWN_STATUS: &str = "unknown";

/// Translate a numeric node status code.
pub fn status_text(code: i64) -> &'static str {
    match code {
        1 => "Asleep",
        2 => "Awake",
        3 => "Dead",
        4 => "Alive",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(4), "Alive");
        assert_eq!(status_text(3), "Dead");
        assert_eq!(status_text(0), "Unknown");
        assert_eq!(status_text(42), "Unknown");
    }
}
