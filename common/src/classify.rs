//! Turns raw `(topic, payload)` pairs into typed [`Update`]s.
//!
//! Classification never fails loudly: anything unrecognised, malformed or
//! uninteresting yields `None` and is dropped by the caller.

use tracing::debug;

use crate::{
    topics::{
        METADATA_MARKER, NAMESPACE_DEVICES, NAMESPACE_ENVIRONMENT, NAMESPACE_LIGHTING,
        TOPIC_OUTDOOR_LIGHT,
    },
    types::Update,
};

/// Second `lighting/` segment reserved for the global enable flag.
const ENABLE_SEGMENT: &str = "enable";

pub fn classify(topic: &str, payload: &str) -> Option<Update> {
    if topic.contains(METADATA_MARKER) {
        return None;
    }

    let segments: Vec<&str> = topic.split('/').collect();
    let update = match segments.first().copied() {
        Some(NAMESPACE_LIGHTING) => classify_lighting(&segments, payload),
        Some(NAMESPACE_ENVIRONMENT) if topic == TOPIC_OUTDOOR_LIGHT => {
            payload.trim().parse().ok().map(Update::LightLevel)
        }
        Some(NAMESPACE_DEVICES) => classify_device(&segments, payload),
        _ => None,
    };

    if update.is_none() {
        debug!("discarded message on {topic}");
    }
    update
}

fn classify_lighting(segments: &[&str], payload: &str) -> Option<Update> {
    // Empty payloads are retained-value erasures, not updates.
    if payload.is_empty() {
        return None;
    }

    match segments {
        [_, ENABLE_SEGMENT, ..] => parse_flag(payload).map(Update::GlobalEnable),
        [_, region, key @ ..] if !region.is_empty() && !key.is_empty() => {
            let key = key.join("/");
            if key.is_empty() {
                return None;
            }
            Some(Update::RegionProperty {
                region: (*region).to_string(),
                key,
                value: payload.to_string(),
            })
        }
        _ => None,
    }
}

fn classify_device(segments: &[&str], payload: &str) -> Option<Update> {
    match segments {
        [_, device, "outlet", "on"] => parse_flag(payload).map(|on| Update::Outlet {
            device: (*device).to_string(),
            on,
        }),
        [_, device, "button", "button"] => parse_flag(payload).map(|pressed| Update::Button {
            device: (*device).to_string(),
            pressed,
        }),
        _ => None,
    }
}

fn parse_flag(payload: &str) -> Option<bool> {
    match payload {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
