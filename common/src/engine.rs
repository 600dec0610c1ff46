use std::collections::{btree_map::Entry, BTreeMap};

use chrono::{DateTime, Duration, FixedOffset};
use tracing::{debug, info, warn};

use crate::{
    config::LightingConfig,
    region::{PropertyEffect, Region, KEY_COMMAND, KEY_CONTROL, KEY_DROP, KEY_STATE},
    registry::DeviceRegistry,
    topics::{button_set_topic, outlet_set_topic, region_topic},
    types::{
        Control, DeviceStatus, EngineAction, EngineStatus, Publish, RegionCommand, RegionStatus,
        Switch, Update,
    },
};

/// Region/device state and the rules that reconcile it. Every mutation goes
/// through [`LightingEngine::apply`] or [`LightingEngine::reconcile`]; the
/// caller owns the engine and serializes those calls.
#[derive(Debug, Clone)]
pub struct LightingEngine {
    pub config: LightingConfig,

    regions: BTreeMap<String, Region>,
    registry: DeviceRegistry,

    light_level: i32,
    enabled: bool,

    last_publish: Option<DateTime<FixedOffset>>,
    passes_completed: u64,
    passes_suppressed: u64,
}

impl LightingEngine {
    pub fn new(mut config: LightingConfig) -> Self {
        config.sanitize();
        Self {
            enabled: config.initially_enabled,
            config,
            regions: BTreeMap::new(),
            registry: DeviceRegistry::new(),
            light_level: 0,
            last_publish: None,
            passes_completed: 0,
            passes_suppressed: 0,
        }
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    pub fn regions(&self) -> impl Iterator<Item = (&str, &Region)> {
        self.regions
            .iter()
            .map(|(name, region)| (name.as_str(), region))
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn light_level(&self) -> i32 {
        self.light_level
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_publish(&self) -> Option<DateTime<FixedOffset>> {
        self.last_publish
    }

    pub fn passes_completed(&self) -> u64 {
        self.passes_completed
    }

    pub fn passes_suppressed(&self) -> u64 {
        self.passes_suppressed
    }

    pub fn apply(&mut self, update: Update, now: DateTime<FixedOffset>) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        match update {
            Update::RegionProperty { region, key, value } => {
                self.apply_region_property(&region, &key, &value, &mut actions);
            }
            Update::LightLevel(level) => {
                debug!("light level {} -> {level}", self.light_level);
                self.light_level = level;
            }
            Update::Outlet { device, on } => {
                let regions = &self.regions;
                let region_state = |region: &str| regions.get(region).and_then(|r| r.state);
                let outcome = self.registry.apply_outlet_update(&device, on, region_state);
                debug!("outlet {device} reported {on}: {outcome:?}");
            }
            Update::Button { device, pressed } => {
                if !self.registry.apply_button_update(&device, pressed) {
                    debug!("button update for unknown device {device} ignored");
                }
            }
            Update::GlobalEnable(enabled) => {
                if enabled != self.enabled {
                    let verb = if enabled { "enabled" } else { "disabled" };
                    info!("lighting control {verb}");
                }
                self.enabled = enabled;
            }
        }

        self.record_publishes(&actions, now);
        actions
    }

    /// One reconciliation pass over every region.
    pub fn reconcile(&mut self, now: DateTime<FixedOffset>) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        let pressed = self.acknowledge_buttons(&mut actions);
        let commanded = self.regions.values().any(|region| region.command.is_some());

        // Skip while the echo of our own last publish may still be arriving.
        if pressed.is_empty() && !commanded && self.publish_deferred(now) {
            self.passes_suppressed += 1;
            debug!("reconciliation deferred after recent publish");
            return actions;
        }

        if self.enabled {
            for (name, region) in self.regions.iter_mut() {
                let presses = pressed.iter().filter(|owner| *owner == name).count();
                let in_window = region.in_window(now, self.light_level, &self.config);
                debug!(
                    region = %name,
                    in_window,
                    light_level = self.light_level,
                    "evaluating region"
                );

                Self::reconcile_region(
                    name,
                    region,
                    &mut self.registry,
                    in_window,
                    presses,
                    &mut actions,
                );
            }
        } else {
            self.all_off(&mut actions);
        }

        self.passes_completed += 1;
        self.record_publishes(&actions, now);
        actions
    }

    pub fn status(&self, now: DateTime<FixedOffset>) -> EngineStatus {
        EngineStatus {
            enabled: self.enabled,
            light_level: self.light_level,
            last_publish_epoch: self.last_publish.map(|at| at.timestamp()),
            passes_completed: self.passes_completed,
            passes_suppressed: self.passes_suppressed,
            regions: self
                .regions
                .keys()
                .filter_map(|name| self.region_status(name, now))
                .collect(),
        }
    }

    pub fn region_status(&self, name: &str, now: DateTime<FixedOffset>) -> Option<RegionStatus> {
        let region = self.regions.get(name)?;
        Some(RegionStatus {
            name: name.to_string(),
            control: region.control,
            state: region.state,
            window_start: region.window_start.clone(),
            window_end: region.window_end.clone(),
            season_start: region.season_start.clone(),
            season_end: region.season_end.clone(),
            in_window: region.in_window(now, self.light_level, &self.config),
            devices: self
                .registry
                .in_region(name)
                .map(|(device, record)| DeviceStatus {
                    name: device.to_string(),
                    outlet: record.outlet,
                    button_pending: record.button,
                })
                .collect(),
        })
    }

    fn apply_region_property(
        &mut self,
        name: &str,
        key: &str,
        value: &str,
        actions: &mut Vec<EngineAction>,
    ) {
        if key == KEY_DROP && !self.regions.contains_key(name) {
            info!("drop requested for unknown region {name}");
            actions.push(erase(region_topic(name, KEY_DROP)));
            return;
        }

        let region = match self.regions.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                info!("new region {name}");
                if key != KEY_CONTROL {
                    actions.push(control_publish(name, Control::Auto));
                }
                entry.insert(Region::new())
            }
        };

        match region.set_property(key, value) {
            PropertyEffect::Stored => debug!("region {name} {key} = {value}"),
            PropertyEffect::DeviceList(list) => {
                let change = self.registry.apply_device_list(name, &list);
                let created = change.created.into_iter();
                actions.extend(created.map(EngineAction::SubscribeDevice));
            }
            PropertyEffect::Drop => self.drop_region(name, actions),
        }
    }

    fn drop_region(&mut self, name: &str, actions: &mut Vec<EngineAction>) {
        info!("dropping region {name}");
        self.registry.remove_region(name);

        if let Some(region) = self.regions.remove(name) {
            for key in region.retained_keys() {
                let topic = region_topic(name, key);
                debug!("erasing topic {topic}");
                actions.push(erase(topic));
            }
        }
        info!("region {name} dropped");
    }

    /// Publishes `button/set=false` for every pressed device and consumes the
    /// press. Returns the owning region once per press.
    fn acknowledge_buttons(&mut self, actions: &mut Vec<EngineAction>) -> Vec<String> {
        let mut pressed = Vec::new();
        for (name, device) in self.registry.iter_mut() {
            if !device.button {
                continue;
            }
            info!("button on device {name} pushed");
            device.button = false;
            actions.push(retained(button_set_topic(name), "false"));
            pressed.push(device.region.clone());
        }
        pressed
    }

    fn publish_deferred(&self, now: DateTime<FixedOffset>) -> bool {
        let defer = Duration::milliseconds(self.config.publish_defer_ms as i64);
        self.last_publish.is_some_and(|last| {
            let elapsed = now.signed_duration_since(last);
            elapsed >= Duration::zero() && elapsed < defer
        })
    }

    fn record_publishes(&mut self, actions: &[EngineAction], now: DateTime<FixedOffset>) {
        let is_publish = |action: &EngineAction| matches!(action, EngineAction::Publish(_));
        if actions.iter().any(is_publish) {
            self.last_publish = Some(now);
        }
    }

    fn reconcile_region(
        name: &str,
        region: &mut Region,
        registry: &mut DeviceRegistry,
        in_window: bool,
        presses: usize,
        actions: &mut Vec<EngineAction>,
    ) {
        for _ in 0..presses {
            let next = region.control.toggled(in_window);
            set_control(name, region, next, "button", actions);
        }

        if let Some(raw) = region.command.take() {
            info!("command {raw} on region {name} received");
            match RegionCommand::parse(&raw) {
                Some(command) => {
                    let next = command.apply(region.control, in_window);
                    set_control(name, region, next, "command", actions);
                }
                None => warn!("unknown command {raw:?} for region {name} ignored"),
            }
            actions.push(erase(region_topic(name, KEY_COMMAND)));
        }

        // Overrides hold only until the window they contradict changes.
        let expired = match region.control {
            Control::ManualO => in_window,
            Control::ManualI => !in_window,
            Control::Auto => false,
        };
        if expired {
            set_control(name, region, Control::Auto, "window change", actions);
        }

        let should_be_on = in_window != region.control.is_manual();
        debug!(region = %name, should_be_on, "lights decided");
        Self::set_region_state(name, region, registry, should_be_on, actions);
    }

    fn all_off(&mut self, actions: &mut Vec<EngineAction>) {
        for (name, region) in self.regions.iter_mut() {
            Self::set_region_state(name, region, &mut self.registry, false, actions);
        }
    }

    fn set_region_state(
        name: &str,
        region: &mut Region,
        registry: &mut DeviceRegistry,
        should_be_on: bool,
        actions: &mut Vec<EngineAction>,
    ) {
        let desired = Switch::from_bool(should_be_on);
        if region.state != Some(desired) {
            actions.push(retained(region_topic(name, KEY_STATE), desired.as_str()));
            region.state = Some(desired);
            region.note_published(KEY_STATE);
            info!("set region {name} to {}", desired.as_str());
        }

        // Recorded optimistically so the echo is not mistaken for a wall switch.
        for (device, record) in registry.in_region_mut(name) {
            if record.outlet != should_be_on {
                record.outlet = should_be_on;
                actions.push(retained(outlet_set_topic(device), should_be_on.to_string()));
                debug!("device {device} in region {name} set to {desired:?}");
            }
        }
    }
}

fn retained(topic: String, payload: impl Into<String>) -> EngineAction {
    EngineAction::Publish(Publish::retained(topic, payload))
}

fn erase(topic: String) -> EngineAction {
    EngineAction::Publish(Publish::erase(topic))
}

fn control_publish(name: &str, control: Control) -> EngineAction {
    retained(region_topic(name, KEY_CONTROL), control.as_str())
}

fn set_control(
    name: &str,
    region: &mut Region,
    next: Control,
    cause: &str,
    actions: &mut Vec<EngineAction>,
) {
    if region.control == next {
        return;
    }
    info!("region {name} control set to {} by {cause}", next.as_str());
    region.control = next;
    actions.push(control_publish(name, next));
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<FixedOffset> {
        FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 12, 10, hour, minute, second)
            .unwrap()
    }

    fn property(region: &str, key: &str, value: &str) -> Update {
        Update::RegionProperty {
            region: region.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn publish(topic: &str, payload: &str) -> EngineAction {
        EngineAction::Publish(Publish::retained(topic.to_string(), payload))
    }

    fn topics(actions: &[EngineAction]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|action| match action {
                EngineAction::Publish(publish) => {
                    Some(format!("{}={}", publish.topic, publish.payload))
                }
                EngineAction::SubscribeDevice(_) => None,
            })
            .collect()
    }

    /// Enabled engine with an 18:00-23:00 porch region holding devices `a,b`,
    /// reconciled once (state off) and returned with a time past the defer window.
    fn porch_engine() -> (LightingEngine, DateTime<FixedOffset>) {
        let mut engine = LightingEngine::new(LightingConfig {
            initially_enabled: true,
            ..LightingConfig::default()
        });
        let t = at(12, 0, 0);
        let properties = [
            ("window-start", "18:00"),
            ("window-end", "23:00"),
            ("devices", "a,b"),
        ];
        for (key, value) in properties {
            engine.apply(property("porch", key, value), t);
        }
        engine.reconcile(at(12, 0, 5));
        assert_eq!(engine.region("porch").unwrap().state, Some(Switch::Off));
        (engine, at(12, 0, 10))
    }

    #[test]
    fn new_region_announces_auto_control() {
        let mut engine = LightingEngine::new(LightingConfig::default());
        let actions = engine.apply(property("porch", "window-end", "23:00"), at(12, 0, 0));
        assert_eq!(actions, vec![publish("lighting/porch/control", "auto")]);

        let actions = engine.apply(property("yard", "control", "manual-o"), at(12, 0, 0));
        assert!(actions.is_empty());
        assert_eq!(engine.region("yard").unwrap().control, Control::ManualO);
    }

    #[test]
    fn device_list_subscribes_new_devices_once() {
        let mut engine = LightingEngine::new(LightingConfig::default());
        let t = at(12, 0, 0);
        engine.apply(property("r", "devices", "a,b"), t);

        let actions = engine.apply(property("r", "devices", "b,c"), t);

        let subscribe = EngineAction::SubscribeDevice("c".to_string());
        assert_eq!(actions, vec![subscribe]);
        assert!(engine.registry().get("a").is_none());
        assert_eq!(engine.registry().region_of("b"), Some("r"));
        assert_eq!(engine.registry().region_of("c"), Some("r"));
    }

    #[test]
    fn region_without_window_stays_dark() {
        let mut engine = LightingEngine::new(LightingConfig {
            initially_enabled: true,
            ..LightingConfig::default()
        });
        engine.apply(property("shed", "devices", "s1"), at(0, 0, 0));
        engine.apply(Update::LightLevel(0), at(0, 0, 0));

        for hour in 0..24 {
            engine.reconcile(at(hour, 30, 0));
            let region = engine.region("shed").unwrap();
            assert_eq!(region.state, Some(Switch::Off), "at {hour}:30");
            assert!(!engine.registry().get("s1").unwrap().outlet);
        }
    }

    #[test]
    fn window_opens_and_closes_devices() {
        let (mut engine, _) = porch_engine();

        let actions = engine.reconcile(at(18, 0, 0));
        assert_eq!(
            topics(&actions),
            vec![
                "lighting/porch/state=on",
                "devices/a/outlet/on/set=true",
                "devices/b/outlet/on/set=true",
            ]
        );

        // Nothing left to do on the next idle tick.
        assert!(engine.reconcile(at(18, 0, 10)).is_empty());

        let actions = engine.reconcile(at(23, 0, 0));
        assert_eq!(
            topics(&actions),
            vec![
                "lighting/porch/state=off",
                "devices/a/outlet/on/set=false",
                "devices/b/outlet/on/set=false",
            ]
        );
    }

    #[test]
    fn button_press_overrides_once_and_acknowledges_once() {
        let (mut engine, _) = porch_engine();
        engine.reconcile(at(19, 0, 0));

        engine.apply(
            Update::Button {
                device: "a".to_string(),
                pressed: true,
            },
            at(19, 0, 5),
        );
        let actions = engine.reconcile(at(19, 0, 5));

        assert_eq!(
            topics(&actions),
            vec![
                "devices/a/button/button/set=false",
                "lighting/porch/control=manual-i",
                "lighting/porch/state=off",
                "devices/a/outlet/on/set=false",
                "devices/b/outlet/on/set=false",
            ]
        );
        assert_eq!(engine.region("porch").unwrap().control, Control::ManualI);

        // The press is consumed: the following pass neither re-acks nor toggles.
        let actions = engine.reconcile(at(19, 0, 20));
        assert!(actions.is_empty());
        assert_eq!(engine.region("porch").unwrap().control, Control::ManualI);
    }

    #[test]
    fn manual_override_expires_with_window() {
        let (mut engine, t) = porch_engine();
        engine.apply(property("porch", "command", "on"), t);
        engine.reconcile(t);
        assert_eq!(engine.region("porch").unwrap().control, Control::ManualO);
        assert!(engine.registry().get("a").unwrap().outlet);

        // Window opens at 18:00: manual-o has nothing left to contradict.
        let actions = engine.reconcile(at(18, 0, 0));
        assert_eq!(topics(&actions), vec!["lighting/porch/control=auto"]);
        assert_eq!(engine.region("porch").unwrap().control, Control::Auto);
        assert_eq!(engine.region("porch").unwrap().state, Some(Switch::On));
    }

    #[test]
    fn toggle_round_trip_in_window() {
        let (mut engine, _) = porch_engine();
        engine.reconcile(at(20, 0, 0));

        engine.apply(property("porch", "command", "toggle"), at(20, 0, 1));
        let actions = engine.reconcile(at(20, 0, 1));
        let region = engine.region("porch").unwrap();
        assert_eq!(region.control, Control::ManualI);
        assert_eq!(region.state, Some(Switch::Off));
        assert!(region.command.is_none());
        let erased = "lighting/porch/command=".to_string();
        assert!(topics(&actions).contains(&erased));

        engine.apply(property("porch", "command", "toggle"), at(20, 0, 2));
        engine.reconcile(at(20, 0, 2));
        let region = engine.region("porch").unwrap();
        assert_eq!(region.control, Control::Auto);
        assert_eq!(region.state, Some(Switch::On));
    }

    #[test]
    fn malformed_command_is_cleared_without_transition() {
        let (mut engine, t) = porch_engine();
        engine.apply(property("porch", "command", "sideways"), t);

        let actions = engine.reconcile(t);

        assert_eq!(topics(&actions), vec!["lighting/porch/command="]);
        assert_eq!(engine.region("porch").unwrap().control, Control::Auto);
        assert!(engine.region("porch").unwrap().command.is_none());
    }

    #[test]
    fn control_stays_in_enumeration() {
        let (mut engine, mut t) = porch_engine();
        let inputs = [
            property("porch", "control", "bogus"),
            property("porch", "command", "toggle"),
            property("porch", "command", "???"),
            Update::Button {
                device: "b".to_string(),
                pressed: true,
            },
            property("porch", "command", "off"),
        ];
        for update in inputs {
            t += Duration::seconds(5);
            engine.apply(update, t);
            engine.reconcile(t);
            let control = engine.region("porch").unwrap().control;
            assert!(matches!(
                control,
                Control::Auto | Control::ManualI | Control::ManualO
            ));
        }
    }

    #[test]
    fn disabled_turns_everything_off_once() {
        let mut engine = LightingEngine::new(LightingConfig::default());
        let t = at(20, 0, 0);
        for region in ["front", "back"] {
            let device = format!("{region}-1");
            engine.apply(property(region, "devices", &device), t);
            engine.apply(Update::Outlet { device, on: true }, t);
        }

        let t = at(20, 0, 10);
        let actions = engine.reconcile(t);
        assert_eq!(
            topics(&actions),
            vec![
                "lighting/back/state=off",
                "devices/back-1/outlet/on/set=false",
                "lighting/front/state=off",
                "devices/front-1/outlet/on/set=false",
            ]
        );

        for seconds in [20, 30, 40] {
            assert!(engine.reconcile(at(20, 0, seconds)).is_empty());
        }
    }

    #[test]
    fn recent_publish_defers_quiet_passes() {
        let (mut engine, _) = porch_engine();
        engine.reconcile(at(18, 0, 0));
        let completed = engine.passes_completed();

        let half = Duration::milliseconds(500);
        engine.apply(Update::LightLevel(2), at(18, 0, 0) + half);
        engine.reconcile(at(18, 0, 0) + half);
        engine.apply(Update::LightLevel(1), at(18, 0, 2) + half);
        engine.reconcile(at(18, 0, 2) + half);

        assert_eq!(engine.passes_completed(), completed + 1);
        assert_eq!(engine.passes_suppressed(), 1);
    }

    #[test]
    fn button_bypasses_defer_window() {
        let (mut engine, _) = porch_engine();
        engine.reconcile(at(18, 0, 0));

        engine.apply(
            Update::Button {
                device: "b".to_string(),
                pressed: true,
            },
            at(18, 0, 1),
        );
        let actions = engine.reconcile(at(18, 0, 1));

        let ack = publish("devices/b/button/button/set", "false");
        assert_eq!(actions.first(), Some(&ack));
        assert_eq!(engine.region("porch").unwrap().control, Control::ManualI);
    }

    #[test]
    fn outlet_flipped_at_wall_counts_as_press() {
        let (mut engine, _) = porch_engine();
        engine.reconcile(at(13, 0, 0));
        assert_eq!(engine.region("porch").unwrap().state, Some(Switch::Off));

        engine.apply(
            Update::Outlet {
                device: "a".to_string(),
                on: true,
            },
            at(13, 0, 10),
        );
        engine.reconcile(at(13, 0, 10));

        let region = engine.region("porch").unwrap();
        assert_eq!(region.control, Control::ManualO);
        assert_eq!(region.state, Some(Switch::On));
        assert!(engine.registry().get("b").unwrap().outlet);
    }

    #[test]
    fn echo_of_engine_command_is_not_a_press() {
        let (mut engine, _) = porch_engine();
        engine.reconcile(at(18, 0, 0));

        engine.apply(
            Update::Outlet {
                device: "a".to_string(),
                on: true,
            },
            at(18, 0, 1),
        );
        assert!(!engine.registry().get("a").unwrap().button);
    }

    #[test]
    fn drop_erases_region_and_devices() {
        let (mut engine, t) = porch_engine();

        let actions = engine.apply(property("porch", "drop", "true"), t);

        assert_eq!(
            topics(&actions),
            vec![
                "lighting/porch/control=",
                "lighting/porch/devices=",
                "lighting/porch/drop=",
                "lighting/porch/state=",
                "lighting/porch/window-end=",
                "lighting/porch/window-start=",
            ]
        );
        assert!(engine.region("porch").is_none());
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn drop_of_unknown_region_only_clears_request() {
        let mut engine = LightingEngine::new(LightingConfig::default());
        let actions = engine.apply(property("ghost", "drop", "true"), at(12, 0, 0));
        assert_eq!(topics(&actions), vec!["lighting/ghost/drop="]);
        assert!(engine.region("ghost").is_none());
    }

    #[test]
    fn dark_start_follows_light_level() {
        let mut engine = LightingEngine::new(LightingConfig {
            initially_enabled: true,
            darkness_threshold: 2,
            ..LightingConfig::default()
        });
        let t = at(16, 0, 0);
        engine.apply(property("yard", "window-start", "light"), t);
        engine.apply(property("yard", "window-end", "22:00"), t);
        engine.apply(Update::LightLevel(3), t);
        engine.reconcile(at(16, 0, 10));
        assert_eq!(engine.region("yard").unwrap().state, Some(Switch::Off));

        engine.apply(Update::LightLevel(1), at(16, 30, 0));
        engine.reconcile(at(16, 30, 0));
        assert_eq!(engine.region("yard").unwrap().state, Some(Switch::On));
    }

    #[test]
    fn status_reports_regions_and_devices() {
        let (mut engine, _) = porch_engine();
        engine.reconcile(at(19, 0, 0));

        let status = engine.status(at(19, 0, 1));

        assert!(status.enabled);
        assert_eq!(status.regions.len(), 1);
        let porch = &status.regions[0];
        assert_eq!(porch.name, "porch");
        assert!(porch.in_window);
        assert_eq!(porch.state, Some(Switch::On));
        let names: Vec<&str> = porch.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(porch.devices.iter().all(|d| d.outlet));
    }
}
