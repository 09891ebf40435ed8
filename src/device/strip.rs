//! State of a single LED strip.

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use super::color::Rgb;

/// Callback slot invoked with the new status whenever `online` actually changes.
pub type OnlineChangeEvent = Box<dyn Fn(bool) + Send + Sync>;

/// One physical strip as seen through the bus.
///
/// `lights` always holds exactly `led_count` entries. A `None` entry is a light
/// that has never been set since the last resize, which keeps it distinct from
/// every real color including off.
pub struct Device {
    id: String,
    led_count: usize,
    lights: Vec<Option<Rgb>>,
    online: bool,
    retain_on_publish: bool,
    online_change_event: Option<OnlineChangeEvent>,
}

impl Device {
    pub fn new(id: impl Into<String>, led_count: usize) -> Self {
        Self {
            id: id.into(),
            led_count,
            lights: vec![None; led_count],
            online: false,
            retain_on_publish: true,
            online_change_event: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn led_count(&self) -> usize {
        self.led_count
    }

    pub fn lights(&self) -> &[Option<Rgb>] {
        &self.lights
    }

    pub fn light(&self, index: usize) -> Option<Rgb> {
        self.lights.get(index).copied().flatten()
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn online_label(&self) -> &'static str {
        if self.online {
            "online"
        } else {
            "offline"
        }
    }

    pub fn retain_on_publish(&self) -> bool {
        self.retain_on_publish
    }

    pub fn set_retain_on_publish(&mut self, retain: bool) {
        self.retain_on_publish = retain;
    }

    /// Resizes the strip. Any change discards the existing colors.
    ///
    /// Returns `true` if the count changed.
    pub fn set_led_count(&mut self, count: usize) -> bool {
        if self.led_count == count {
            return false;
        }
        debug!(
            "Device {} LED count changed from {} to {}",
            self.id, self.led_count, count
        );
        self.led_count = count;
        self.lights = vec![None; count];
        true
    }

    /// Writes one light. Out-of-range indices are logged and ignored.
    pub fn update_light(&mut self, index: usize, color: Rgb) -> bool {
        match self.lights.get_mut(index) {
            Some(slot) => {
                *slot = Some(color);
                true
            }
            None => {
                warn!(
                    "Index {} out of range for device {} with {} lights",
                    index, self.id, self.led_count
                );
                false
            }
        }
    }

    /// Sets every light to the same color.
    pub fn fill(&mut self, color: Rgb) {
        self.lights.iter_mut().for_each(|slot| *slot = Some(color));
    }

    /// Returns `true` if the status changed (and the callback, if any, ran).
    pub fn set_online(&mut self, status: bool) -> bool {
        if self.online == status {
            return false;
        }
        self.online = status;
        if let Some(event) = &self.online_change_event {
            event(status);
        }
        true
    }

    pub fn set_online_change_event(&mut self, event: OnlineChangeEvent) {
        self.online_change_event = Some(event);
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id.clone(),
            online: self.online,
            led_count: self.led_count,
            lights: self.lights.clone(),
            retain_on_publish: self.retain_on_publish,
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("led_count", &self.led_count)
            .field("lights", &self.lights)
            .field("online", &self.online)
            .field("retain_on_publish", &self.retain_on_publish)
            .field("online_change_event", &self.online_change_event.is_some())
            .finish()
    }
}

/// Detached copy of a device's observable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub online: bool,
    pub led_count: usize,
    pub lights: Vec<Option<Rgb>>,
    pub retain_on_publish: bool,
}

impl DeviceSnapshot {
    /// Lights as `#rrggbb` text, with unset lights rendered as their index.
    pub fn light_labels(&self) -> Vec<String> {
        self.lights
            .iter()
            .enumerate()
            .map(|(i, light)| match light {
                Some(color) => color.to_string(),
                None => i.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const RED: Rgb = Rgb::new(255, 0, 0);

    #[test]
    fn test_new_device_defaults() {
        let device = Device::new("strip", 3);
        assert_eq!(device.led_count(), 3);
        assert_eq!(device.lights(), &[None, None, None]);
        assert!(!device.online());
        assert!(device.retain_on_publish());
        assert_eq!(device.online_label(), "offline");
    }

    #[test]
    fn test_set_same_led_count_keeps_lights() {
        let mut device = Device::new("strip", 4);
        device.set_led_count(4);
        device.update_light(2, RED);

        assert!(!device.set_led_count(4));
        assert_eq!(device.light(2), Some(RED));
        assert_eq!(device.lights().len(), 4);
    }

    #[test]
    fn test_resize_discards_colors() {
        let mut device = Device::new("strip", 2);
        device.fill(RED);

        assert!(device.set_led_count(5));
        assert_eq!(device.led_count(), 5);
        assert_eq!(device.lights().len(), 5);
        assert!(device.lights().iter().all(Option::is_none));

        assert!(device.set_led_count(1));
        assert_eq!(device.lights(), &[None]);
    }

    #[test]
    fn test_update_light_out_of_range_is_ignored() {
        let mut device = Device::new("strip", 2);
        device.update_light(0, RED);

        assert!(!device.update_light(2, Rgb::new(1, 2, 3)));
        assert!(!device.update_light(usize::MAX, Rgb::new(1, 2, 3)));
        assert_eq!(device.lights(), &[Some(RED), None]);
    }

    #[test]
    fn test_online_callback_fires_only_on_change() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut device = Device::new("strip", 1);
        device.set_online_change_event(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(device.set_online(true));
        assert!(!device.set_online(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(device.online_label(), "online");

        assert!(device.set_online(false));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_slot_is_replaced() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut device = Device::new("strip", 1);
        let f = first.clone();
        device.set_online_change_event(Box::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = second.clone();
        device.set_online_change_event(Box::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        device.set_online(true);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_labels_unset_lights_by_index() {
        let mut device = Device::new("strip", 3);
        device.update_light(1, RED);

        let snapshot = device.snapshot();
        assert_eq!(snapshot.light_labels(), vec!["0", "#ff0000", "2"]);
    }
}
