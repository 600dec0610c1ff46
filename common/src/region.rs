use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset};
use tracing::debug;

use crate::{
    config::LightingConfig,
    types::{Control, Switch},
    window::{self, LIGHT_START},
};

pub const KEY_CONTROL: &str = "control";
pub const KEY_STATE: &str = "state";
pub const KEY_COMMAND: &str = "command";
pub const KEY_WINDOW_START: &str = "window-start";
pub const KEY_WINDOW_END: &str = "window-end";
pub const KEY_SEASON_START: &str = "season/start";
pub const KEY_SEASON_END: &str = "season/end";
pub const KEY_DEVICES: &str = "devices";
pub const KEY_DROP: &str = "drop";

/// Follow-up work a property update asks of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyEffect {
    Stored,
    DeviceList(String),
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub control: Control,
    /// Last published state, not the desired one.
    pub state: Option<Switch>,
    /// Raw pending command; cleared once a pass has handled it.
    pub command: Option<String>,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub season_start: Option<String>,
    pub season_end: Option<String>,
    retained_keys: BTreeSet<String>,
}

impl Default for Region {
    fn default() -> Self {
        Self::new()
    }
}

impl Region {
    pub fn new() -> Self {
        Self {
            control: Control::Auto,
            state: None,
            command: None,
            window_start: None,
            window_end: None,
            season_start: None,
            season_end: None,
            retained_keys: [KEY_CONTROL.to_string()].into(),
        }
    }

    pub fn set_property(&mut self, key: &str, value: &str) -> PropertyEffect {
        self.retained_keys.insert(key.to_string());

        let slot = match key {
            KEY_CONTROL => {
                self.control = Control::parse(value);
                return PropertyEffect::Stored;
            }
            KEY_STATE => {
                self.state = Some(Switch::parse(value));
                return PropertyEffect::Stored;
            }
            KEY_DEVICES => return PropertyEffect::DeviceList(value.to_string()),
            KEY_DROP => return PropertyEffect::Drop,
            KEY_COMMAND => &mut self.command,
            KEY_WINDOW_START => &mut self.window_start,
            KEY_WINDOW_END => &mut self.window_end,
            KEY_SEASON_START => &mut self.season_start,
            KEY_SEASON_END => &mut self.season_end,
            _ => {
                debug!("ignoring unknown region property {key}");
                return PropertyEffect::Stored;
            }
        };
        *slot = Some(value.to_string());
        PropertyEffect::Stored
    }

    pub fn note_published(&mut self, key: &str) {
        self.retained_keys.insert(key.to_string());
    }

    /// Every property topic this region has carried, for erasure on drop.
    pub fn retained_keys(&self) -> impl Iterator<Item = &str> {
        self.retained_keys.iter().map(String::as_str)
    }

    pub fn has_window(&self) -> bool {
        self.window_start.is_some() || self.window_end.is_some()
    }

    /// Always in season unless both bounds are configured.
    pub fn in_season(&self, now: DateTime<FixedOffset>, config: &LightingConfig) -> bool {
        match (&self.season_start, &self.season_end) {
            (Some(start), Some(end)) => window::in_season(
                now,
                start,
                end,
                (config.default_season_start_month, config.default_season_start_day),
                (config.default_season_end_month, config.default_season_end_day),
            ),
            _ => true,
        }
    }

    pub fn in_window(
        &self,
        now: DateTime<FixedOffset>,
        light_level: i32,
        config: &LightingConfig,
    ) -> bool {
        if !self.has_window() || !self.in_season(now, config) {
            return false;
        }

        let end = window::window_instant(
            now,
            self.window_end.as_deref().unwrap_or_default(),
            config.default_window_end_hour,
        );
        match self.window_start.as_deref() {
            None | Some(LIGHT_START) => {
                window::in_light_window(now, end, light_level, config.darkness_threshold)
            }
            Some(start) => {
                let start = window::window_instant(now, start, config.default_window_start_hour);
                window::in_window(now, start, end)
            }
        }
    }
}
