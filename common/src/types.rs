use serde::{Deserialize, Serialize};

/// Who decides a region's outlets: the schedule, or a manual override that
/// contradicts it. `ManualIn` overrides an in-window "on", `ManualOut` an
/// out-of-window "off".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Control {
    #[default]
    Auto,
    ManualI,
    ManualO,
}

impl Control {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::ManualI => "manual-i",
            Self::ManualO => "manual-o",
        }
    }

    /// Unknown values collapse to `Auto`.
    pub fn parse(value: &str) -> Self {
        match value {
            "manual-i" => Self::ManualI,
            "manual-o" => Self::ManualO,
            _ => Self::Auto,
        }
    }

    pub fn is_manual(self) -> bool {
        !matches!(self, Self::Auto)
    }

    /// Button press: a manual override returns to automatic control, automatic
    /// control flips to whichever override contradicts the current window.
    pub fn toggled(self, in_window: bool) -> Self {
        match self {
            Self::ManualI | Self::ManualO => Self::Auto,
            Self::Auto if in_window => Self::ManualI,
            Self::Auto => Self::ManualO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    /// Anything other than `on` reads as off.
    pub fn parse(value: &str) -> Self {
        if value == "on" {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn from_bool(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionCommand {
    On,
    Off,
    Toggle,
}

impl RegionCommand {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            "toggle" => Some(Self::Toggle),
            _ => None,
        }
    }

    pub fn apply(self, control: Control, in_window: bool) -> Control {
        match self {
            Self::On if in_window => Control::Auto,
            Self::On => Control::ManualO,
            Self::Off if in_window => Control::ManualI,
            Self::Off => Control::Auto,
            Self::Toggle => control.toggled(in_window),
        }
    }
}

/// One classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    RegionProperty {
        region: String,
        key: String,
        value: String,
    },
    LightLevel(i32),
    Outlet {
        device: String,
        on: bool,
    },
    Button {
        device: String,
        pressed: bool,
    },
    GlobalEnable(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

impl Publish {
    pub fn retained(topic: String, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
            retained: true,
        }
    }

    /// Empty retained payload clears the topic on the broker.
    pub fn erase(topic: String) -> Self {
        Self::retained(topic, "")
    }

    pub fn is_erase(&self) -> bool {
        self.retained && self.payload.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    Publish(Publish),
    SubscribeDevice(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub outlet: bool,
    #[serde(rename = "buttonPending")]
    pub button_pending: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionStatus {
    pub name: String,
    pub control: Control,
    pub state: Option<Switch>,
    #[serde(rename = "windowStart")]
    pub window_start: Option<String>,
    #[serde(rename = "windowEnd")]
    pub window_end: Option<String>,
    #[serde(rename = "seasonStart")]
    pub season_start: Option<String>,
    #[serde(rename = "seasonEnd")]
    pub season_end: Option<String>,
    #[serde(rename = "inWindow")]
    pub in_window: bool,
    pub devices: Vec<DeviceStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub enabled: bool,
    #[serde(rename = "lightLevel")]
    pub light_level: i32,
    #[serde(rename = "lastPublishEpoch")]
    pub last_publish_epoch: Option<i64>,
    #[serde(rename = "passesCompleted")]
    pub passes_completed: u64,
    #[serde(rename = "passesSuppressed")]
    pub passes_suppressed: u64,
    pub regions: Vec<RegionStatus>,
}
