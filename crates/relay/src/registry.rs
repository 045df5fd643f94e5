//! In-memory registry of the sensor devices declared in the device map.
//!
//! Devices are created once at startup and live for the whole process. Only
//! the network address and the two readings ever change.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    /// Address prefix the device publishes under, e.g. `/sensorA`.
    pub tag: String,
    pub label: String,
    /// Last address announced by a ping.
    pub address: Option<String>,
    /// Chat channel name the device's status is published to.
    pub channel: String,
    pub has_pump: bool,
    pub humidity: f64,
    pub temperature: f64,
}

impl Device {
    pub fn new(tag: &str, label: &str, channel: &str, has_pump: bool) -> Self {
        Self {
            tag: tag.to_string(),
            label: label.to_string(),
            address: None,
            channel: channel.to_string(),
            has_pump,
            humidity: 0.0,
            temperature: 0.0,
        }
    }

    /// True when `address` is the tag itself or a sub-path beneath it.
    /// `/sensorA` routes `/sensorA` and `/sensorA/ping`, never `/sensorAB`.
    pub fn routes(&self, address: &str) -> bool {
        match address.strip_prefix(self.tag.as_str()) {
            Some("") => true,
            Some(rest) => rest.len() > 1 && rest.starts_with('/'),
            None => false,
        }
    }
}

/// Ordered device table. Lookup is first-match-wins in registration order.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn find_by_address(&self, address: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.routes(address))
    }

    pub fn get(&self, tag: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.tag == tag)
    }

    /// Overwrite both readings. Returns false for an unknown tag.
    pub fn set_reading(&mut self, tag: &str, humidity: f64, temperature: f64) -> bool {
        match self.get_mut(tag) {
            Some(d) => {
                d.humidity = humidity;
                d.temperature = temperature;
                true
            }
            None => false,
        }
    }

    /// Overwrite the announced network address. Returns false for an unknown tag.
    pub fn set_address(&mut self, tag: &str, address: &str) -> bool {
        match self.get_mut(tag) {
            Some(d) => {
                d.address = Some(address.to_string());
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Owned copy of every device, in registration order.
    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.clone()
    }

    fn get_mut(&mut self, tag: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.tag == tag)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(vec![
            Device::new("/sensorA", "Living", "living", true),
            Device::new("/sensorB", "Bedroom", "bedroom", false),
        ])
    }

    // -- find_by_address ----------------------------------------------------

    #[test]
    fn find_exact_tag() {
        let reg = registry();
        assert_eq!(reg.find_by_address("/sensorA").unwrap().label, "Living");
    }

    #[test]
    fn find_sub_path() {
        let reg = registry();
        assert_eq!(reg.find_by_address("/sensorA/temp").unwrap().tag, "/sensorA");
        assert_eq!(reg.find_by_address("/sensorB/ping").unwrap().tag, "/sensorB");
    }

    #[test]
    fn find_unknown_address() {
        let reg = registry();
        assert!(reg.find_by_address("/sensorC").is_none());
        assert!(reg.find_by_address("").is_none());
    }

    #[test]
    fn find_requires_segment_boundary() {
        let reg = registry();
        assert!(reg.find_by_address("/sensorAB").is_none());
        assert!(reg.find_by_address("/sensorA/").is_none());
    }

    #[test]
    fn find_is_anchored_at_start() {
        let reg = registry();
        assert!(reg.find_by_address("/x/sensorA").is_none());
    }

    #[test]
    fn find_first_match_wins() {
        let reg = DeviceRegistry::new(vec![
            Device::new("/room", "Outer", "a", false),
            Device::new("/room/inner", "Inner", "b", false),
        ]);
        assert_eq!(reg.find_by_address("/room/inner").unwrap().label, "Outer");
    }

    // -- mutators -----------------------------------------------------------

    #[test]
    fn set_reading_overwrites_both_values() {
        let mut reg = registry();
        assert!(reg.set_reading("/sensorB", 40.5, 19.25));
        let d = reg.get("/sensorB").unwrap();
        assert_eq!(d.humidity, 40.5);
        assert_eq!(d.temperature, 19.25);
        // untouched neighbour
        assert_eq!(reg.get("/sensorA").unwrap().humidity, 0.0);
    }

    #[test]
    fn set_address_overwrites() {
        let mut reg = registry();
        assert!(reg.set_address("/sensorA", "192.168.1.50"));
        assert!(reg.set_address("/sensorA", "192.168.1.51"));
        assert_eq!(
            reg.get("/sensorA").unwrap().address.as_deref(),
            Some("192.168.1.51")
        );
    }

    #[test]
    fn mutators_reject_unknown_tag() {
        let mut reg = registry();
        assert!(!reg.set_reading("/nope", 1.0, 2.0));
        assert!(!reg.set_address("/nope", "10.0.0.1"));
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let tags: Vec<String> = registry().snapshot().into_iter().map(|d| d.tag).collect();
        assert_eq!(tags, vec!["/sensorA", "/sensorB"]);
    }
}
