use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub tick_interval_ms: u64,
    pub publish_defer_ms: u64,
    /// Light levels strictly below this count as dark for `window-start=light`.
    pub darkness_threshold: i32,
    pub default_window_start_hour: u32,
    pub default_window_end_hour: u32,
    pub default_season_start_month: u32,
    pub default_season_start_day: u32,
    pub default_season_end_month: u32,
    pub default_season_end_day: u32,
    pub publish_queue_capacity: usize,
    pub update_queue_capacity: usize,
    pub initially_enabled: bool,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10_000,
            publish_defer_ms: 2_000,
            darkness_threshold: 4,
            default_window_start_hour: 15,
            default_window_end_hour: 23,
            default_season_start_month: 11,
            default_season_start_day: 1,
            default_season_end_month: 1,
            default_season_end_day: 6,
            publish_queue_capacity: 100,
            update_queue_capacity: 64,
            initially_enabled: false,
        }
    }
}

impl LightingConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        self.tick_interval_ms = self.tick_interval_ms.clamp(100, 3_600_000);
        self.publish_defer_ms = self.publish_defer_ms.min(60_000);
        self.darkness_threshold = self.darkness_threshold.clamp(0, 100);

        if self.default_window_start_hour > 23 {
            self.default_window_start_hour = defaults.default_window_start_hour;
        }
        if self.default_window_end_hour > 23 {
            self.default_window_end_hour = defaults.default_window_end_hour;
        }
        if !valid_month_day(self.default_season_start_month, self.default_season_start_day) {
            self.default_season_start_month = defaults.default_season_start_month;
            self.default_season_start_day = defaults.default_season_start_day;
        }
        if !valid_month_day(self.default_season_end_month, self.default_season_end_day) {
            self.default_season_end_month = defaults.default_season_end_month;
            self.default_season_end_day = defaults.default_season_end_day;
        }

        self.publish_queue_capacity = self.publish_queue_capacity.max(1);
        self.update_queue_capacity = self.update_queue_capacity.max(1);
    }
}

fn valid_month_day(month: u32, day: u32) -> bool {
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_client_id: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_client_id: "lighting-daemon".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub lighting: LightingConfig,
    pub network: NetworkConfig,
    /// IANA zone name; the host's local zone when unset.
    pub timezone: Option<String>,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.lighting.sanitize();
        if self.network.mqtt_client_id.is_empty() {
            self.network.mqtt_client_id = NetworkConfig::default().mqtt_client_id;
        }
        if matches!(self.timezone.as_deref(), Some("")) {
            self.timezone = None;
        }
    }
}
