pub const TOPIC_LIGHTING_ALL: &str = "lighting/#";
pub const TOPIC_LIGHTING_ENABLE: &str = "lighting/enable";
pub const TOPIC_OUTDOOR_LIGHT: &str = "environment/outdoor-light";

pub const NAMESPACE_LIGHTING: &str = "lighting";
pub const NAMESPACE_DEVICES: &str = "devices";
pub const NAMESPACE_ENVIRONMENT: &str = "environment";

/// Segment marker for device metadata (`$state`, `$name`, ...).
pub const METADATA_MARKER: char = '$';

pub fn region_topic(region: &str, key: &str) -> String {
    format!("{NAMESPACE_LIGHTING}/{region}/{key}")
}

pub fn device_subscription(device: &str) -> String {
    format!("{NAMESPACE_DEVICES}/{device}/#")
}

pub fn outlet_set_topic(device: &str) -> String {
    format!("{NAMESPACE_DEVICES}/{device}/outlet/on/set")
}

pub fn button_set_topic(device: &str) -> String {
    format!("{NAMESPACE_DEVICES}/{device}/button/button/set")
}
