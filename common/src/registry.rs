use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::types::Switch;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device name {0:?}")]
pub struct InvalidDeviceName(pub String);

/// Homie identifier rules: non-empty ASCII alphanumerics and hyphens, not
/// starting with a hyphen.
pub fn validate_device_name(name: &str) -> Result<(), InvalidDeviceName> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(InvalidDeviceName(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Last region whose device list claimed this device.
    pub region: String,
    pub outlet: bool,
    pub button: bool,
    active: bool,
}

impl Device {
    fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            outlet: false,
            button: false,
            active: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceListChange {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutletUpdate {
    UnknownDevice,
    Unchanged,
    Changed { inferred_press: bool },
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.get_mut(name)
    }

    pub fn region_of(&self, name: &str) -> Option<&str> {
        self.devices.get(name).map(|device| device.region.as_str())
    }

    /// Returns the device and whether it was created by this call. New devices
    /// start with outlet and button both false.
    pub fn get_or_create(&mut self, name: &str, region: &str) -> (&mut Device, bool) {
        let created = !self.devices.contains_key(name);
        let device = self
            .devices
            .entry(name.to_string())
            .or_insert_with(|| Device::new(region));
        (device, created)
    }

    pub fn in_region<'a>(
        &'a self,
        region: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Device)> + 'a {
        self.devices
            .iter()
            .filter(move |(_, device)| device.region == region)
            .map(|(name, device)| (name.as_str(), device))
    }

    pub fn in_region_mut<'a>(
        &'a mut self,
        region: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a mut Device)> + 'a {
        self.devices
            .iter_mut()
            .filter(move |(_, device)| device.region == region)
            .map(|(name, device)| (name.as_str(), device))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Device)> {
        self.devices
            .iter_mut()
            .map(|(name, device)| (name.as_str(), device))
    }

    /// Replaces `region`'s device list. Listed devices are claimed by the
    /// region (last writer wins); devices of this region missing from the list
    /// are deleted. Other regions' devices are never deleted here.
    pub fn apply_device_list(&mut self, region: &str, names: &str) -> DeviceListChange {
        let mut change = DeviceListChange::default();

        for device in self.devices.values_mut() {
            device.active = false;
        }

        for name in names.split(',') {
            if let Err(err) = validate_device_name(name) {
                warn!("{err} rejected for region {region}");
                change.rejected.push(name.to_string());
                continue;
            }

            let (device, created) = self.get_or_create(name, region);
            if created {
                info!("new device {name} in region {region}");
                change.created.push(name.to_string());
            } else if device.region != region {
                info!(
                    "device {name} moved from region {} to {region}",
                    device.region
                );
                device.region = region.to_string();
            }
            device.active = true;
        }

        self.devices.retain(|name, device| {
            let keep = device.active || device.region != region;
            if !keep {
                info!("device {name} in region {region} dropped");
                change.removed.push(name.clone());
            }
            keep
        });

        change
    }

    /// Records a reported outlet state. A change that disagrees with the
    /// region's published state was made at the wall, so it counts as a
    /// button press.
    pub fn apply_outlet_update(
        &mut self,
        name: &str,
        on: bool,
        region_state: impl FnOnce(&str) -> Option<Switch>,
    ) -> OutletUpdate {
        let Some(device) = self.devices.get_mut(name) else {
            return OutletUpdate::UnknownDevice;
        };
        if device.outlet == on {
            return OutletUpdate::Unchanged;
        }

        device.outlet = on;
        let published = region_state(&device.region);
        let inferred_press = published.is_some_and(|state| state.is_on() != on);
        if inferred_press {
            debug!("outlet {name} switched externally, treated as a press");
            device.button = true;
        }
        OutletUpdate::Changed { inferred_press }
    }

    /// Stores the button flag verbatim. Returns false for unknown devices.
    pub fn apply_button_update(&mut self, name: &str, pressed: bool) -> bool {
        match self.devices.get_mut(name) {
            Some(device) => {
                device.button = pressed;
                true
            }
            None => false,
        }
    }

    pub fn remove_region(&mut self, region: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.devices.retain(|name, device| {
            let keep = device.region != region;
            if !keep {
                info!("dropping device {name}");
                removed.push(name.clone());
            }
            keep
        });
        removed
    }
}
