//! Collection of known devices in discovery order.

use tracing::{info, warn};

use super::strip::Device;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Device already registered: {0}")]
    DuplicateDevice(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

/// Owns every [`Device`] the bridge has seen or been seeded with.
///
/// Devices are only ever appended. A device that goes offline stays here with
/// `online == false`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    selected: Option<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a device and makes it the selected one.
    ///
    /// A second device with an already registered id is rejected.
    pub fn add_device(&mut self, device: Device) -> Result<&mut Device, RegistryError> {
        if self.contains(device.id()) {
            warn!("Rejecting duplicate device {}", device.id());
            return Err(RegistryError::DuplicateDevice(device.id().to_string()));
        }

        self.selected = Some(device.id().to_string());
        self.devices.push(device);
        let index = self.devices.len() - 1;
        Ok(&mut self.devices[index])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.iter().any(|d| d.id() == id)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id() == id)
    }

    /// Devices currently online, in discovery order.
    pub fn online_devices(&self) -> impl Iterator<Item = &Device> + '_ {
        self.devices.iter().filter(|d| d.online())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> + '_ {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn select(&mut self, id: &str) -> Result<(), RegistryError> {
        if !self.contains(id) {
            return Err(RegistryError::UnknownDevice(id.to_string()));
        }
        self.selected = Some(id.to_string());
        Ok(())
    }

    /// Takes every device offline. Returns how many were online before.
    pub fn mark_all_offline(&mut self) -> usize {
        self.devices
            .iter_mut()
            .map(|d| d.set_online(false))
            .filter(|changed| *changed)
            .count()
    }

    pub fn list_devices(&self) {
        for device in &self.devices {
            info!(
                "Device ID: {}, Online: {}, Lights: {:?}",
                device.id(),
                device.online(),
                device.snapshot().light_labels()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_device_selects_it() {
        let mut registry = DeviceRegistry::new();
        registry.add_device(Device::new("a", 1)).unwrap();
        registry.add_device(Device::new("b", 2)).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.selected(), Some("b"));
        let ids: Vec<_> = registry.iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut registry = DeviceRegistry::new();
        registry.add_device(Device::new("a", 1)).unwrap();

        let err = registry.add_device(Device::new("a", 5)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateDevice("a".to_string()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_id("a").unwrap().led_count(), 1);
    }

    #[test]
    fn test_find_by_id() {
        let mut registry = DeviceRegistry::new();
        registry.add_device(Device::new("a", 3)).unwrap();

        assert_eq!(registry.find_by_id("a").map(Device::led_count), Some(3));
        assert!(registry.find_by_id("missing").is_none());
    }

    #[test]
    fn test_online_devices_is_restartable() {
        let mut registry = DeviceRegistry::new();
        registry.add_device(Device::new("a", 1)).unwrap();
        registry.add_device(Device::new("b", 1)).unwrap().set_online(true);
        registry.add_device(Device::new("c", 1)).unwrap().set_online(true);

        let first: Vec<_> = registry.online_devices().map(Device::id).collect();
        let second: Vec<_> = registry.online_devices().map(Device::id).collect();
        assert_eq!(first, vec!["b", "c"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_select_unknown_device_fails() {
        let mut registry = DeviceRegistry::new();
        registry.add_device(Device::new("a", 1)).unwrap();
        registry.add_device(Device::new("b", 1)).unwrap();

        registry.select("a").unwrap();
        assert_eq!(registry.selected(), Some("a"));
        assert!(registry.select("zzz").is_err());
        assert_eq!(registry.selected(), Some("a"));
    }

    #[test]
    fn test_mark_all_offline_counts_changes() {
        let mut registry = DeviceRegistry::new();
        registry.add_device(Device::new("a", 1)).unwrap().set_online(true);
        registry.add_device(Device::new("b", 1)).unwrap();
        registry.add_device(Device::new("c", 1)).unwrap().set_online(true);

        assert_eq!(registry.mark_all_offline(), 2);
        assert_eq!(registry.online_devices().count(), 0);
        assert_eq!(registry.mark_all_offline(), 0);
    }
}
