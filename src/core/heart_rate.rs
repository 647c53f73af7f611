//! Heart-rate data model and the shared sensor-state sink
//! Decoded readings are pushed into a [`SensorSink`]; [`HeartRateMonitor`]
//! is the in-process sink read by the re-broadcaster and the publisher.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::utils::lock;

/// Skin-contact status reported in bits 1-2 of the measurement flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    NotSupported,
    NoContact,
    ContactDetected,
}

/// Code table for the two contact-status bits, indexed by their value
pub const CONTACT_STATUS_TABLE: [ContactStatus; 4] = [
    ContactStatus::NotSupported,
    ContactStatus::NotSupported,
    ContactStatus::NoContact,
    ContactStatus::ContactDetected,
];

impl ContactStatus {
    /// Maps the two contact-status bits (already shifted down) to a status
    pub fn from_bits(bits: u8) -> Self {
        CONTACT_STATUS_TABLE[(bits & 0b11) as usize]
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::NotSupported => 1,
            Self::NoContact => 2,
            Self::ContactDetected => 3,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::NotSupported),
            2 => Some(Self::NoContact),
            3 => Some(Self::ContactDetected),
            _ => None,
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotSupported => "Not supported",
            Self::NoContact => "No skin contact detected",
            Self::ContactDetected => "Skin contact detected",
        };
        f.write_str(text)
    }
}

/// Body sensor location (characteristic 0x2A38)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorLocation {
    Other,
    Chest,
    Wrist,
    Finger,
    Hand,
    EarLobe,
    Foot,
}

impl SensorLocation {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Other),
            1 => Some(Self::Chest),
            2 => Some(Self::Wrist),
            3 => Some(Self::Finger),
            4 => Some(Self::Hand),
            5 => Some(Self::EarLobe),
            6 => Some(Self::Foot),
            _ => None,
        }
    }
}

impl fmt::Display for SensorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Other => "Other",
            Self::Chest => "Chest",
            Self::Wrist => "Wrist",
            Self::Finger => "Finger",
            Self::Hand => "Hand",
            Self::EarLobe => "Ear Lobe",
            Self::Foot => "Foot",
        };
        f.write_str(text)
    }
}

/// One decoded heart-rate measurement notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartRateReading {
    /// Heart rate in beats per minute
    pub bpm: u16,
    /// Whether the value was sent in the 16-bit format
    pub wide_format: bool,
    pub contact: ContactStatus,
    /// Cumulative energy expended in kcal, when present
    pub energy_expended: Option<u16>,
    /// RR intervals in milliseconds, when the RR flag was set
    pub rr_intervals: Option<Vec<u16>>,
}

/// Receiver of decoded sensor state.
///
/// Every setter is an independent write; implementations must not rely on
/// the order in which fields of one notification arrive.
pub trait SensorSink: Send + Sync {
    fn update_address(&self, address: &str);
    fn update_source(&self, source: &str);
    fn update_manufacturer(&self, manufacturer: &str);
    fn update_model(&self, model: &str);
    fn update_serial_number(&self, serial_number: &str);
    fn update_heart_rate(&self, bpm: u16);
    fn update_skin_contact(&self, status: ContactStatus);
    fn update_energy_expended(&self, kcal: u16);
    fn update_rr_intervals(&self, intervals: &[u16]);

    fn update_battery_level(&self, _percent: u8) {}

    fn update_sensor_location(&self, _location: Option<SensorLocation>) {}
}

const UNSET: u32 = u32::MAX;

fn load_opt(value: &AtomicU32) -> Option<u32> {
    match value.load(Ordering::Acquire) {
        UNSET => None,
        v => Some(v),
    }
}

fn set_text(slot: &Mutex<Option<String>>, value: &str) {
    *lock(slot) = Some(value.to_string());
}

fn get_text(slot: &Mutex<Option<String>>) -> Option<String> {
    lock(slot).clone()
}

/// Latest known state of the connected heart-rate monitor.
///
/// Numeric fields are atomics so the notification path never contends with
/// readers; text fields and the RR list sit behind their own small locks.
#[derive(Debug)]
pub struct HeartRateMonitor {
    address: Mutex<Option<String>>,
    source: Mutex<Option<String>>,
    manufacturer: Mutex<Option<String>>,
    model: Mutex<Option<String>>,
    serial_number: Mutex<Option<String>>,
    heart_rate: AtomicU32,
    contact: AtomicU8,
    energy_expended: AtomicU32,
    rr_intervals: Mutex<Vec<u16>>,
    battery_level: AtomicU32,
    sensor_location: Mutex<Option<SensorLocation>>,
}

impl Default for HeartRateMonitor {
    fn default() -> Self {
        Self {
            address: Mutex::new(None),
            source: Mutex::new(None),
            manufacturer: Mutex::new(None),
            model: Mutex::new(None),
            serial_number: Mutex::new(None),
            heart_rate: AtomicU32::new(UNSET),
            contact: AtomicU8::new(0),
            energy_expended: AtomicU32::new(UNSET),
            rr_intervals: Mutex::new(Vec::new()),
            battery_level: AtomicU32::new(UNSET),
            sensor_location: Mutex::new(None),
        }
    }
}

/// Point-in-time copy of [`HeartRateMonitor`] for publishers
#[derive(Debug, Clone, Serialize)]
pub struct HeartRateSnapshot {
    pub address: Option<String>,
    pub source: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub heart_rate: Option<u16>,
    pub contact: Option<ContactStatus>,
    pub energy_expended: Option<u16>,
    pub rr_intervals: Vec<u16>,
    pub battery_level: Option<u8>,
    pub sensor_location: Option<SensorLocation>,
}

impl HeartRateMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heart_rate(&self) -> Option<u16> {
        load_opt(&self.heart_rate).map(|v| v as u16)
    }

    pub fn contact(&self) -> Option<ContactStatus> {
        ContactStatus::from_u8(self.contact.load(Ordering::Acquire))
    }

    pub fn energy_expended(&self) -> Option<u16> {
        load_opt(&self.energy_expended).map(|v| v as u16)
    }

    pub fn rr_intervals(&self) -> Vec<u16> {
        lock(&self.rr_intervals).clone()
    }

    pub fn battery_level(&self) -> Option<u8> {
        load_opt(&self.battery_level).map(|v| v as u8)
    }

    pub fn address(&self) -> Option<String> {
        get_text(&self.address)
    }

    pub fn source(&self) -> Option<String> {
        get_text(&self.source)
    }

    pub fn manufacturer(&self) -> Option<String> {
        get_text(&self.manufacturer)
    }

    pub fn model(&self) -> Option<String> {
        get_text(&self.model)
    }

    pub fn serial_number(&self) -> Option<String> {
        get_text(&self.serial_number)
    }

    pub fn sensor_location(&self) -> Option<SensorLocation> {
        *lock(&self.sensor_location)
    }

    pub fn snapshot(&self) -> HeartRateSnapshot {
        HeartRateSnapshot {
            address: self.address(),
            source: self.source(),
            manufacturer: self.manufacturer(),
            model: self.model(),
            serial_number: self.serial_number(),
            heart_rate: self.heart_rate(),
            contact: self.contact(),
            energy_expended: self.energy_expended(),
            rr_intervals: self.rr_intervals(),
            battery_level: self.battery_level(),
            sensor_location: self.sensor_location(),
        }
    }
}

impl SensorSink for HeartRateMonitor {
    fn update_address(&self, address: &str) {
        set_text(&self.address, address);
    }

    fn update_source(&self, source: &str) {
        set_text(&self.source, source);
    }

    fn update_manufacturer(&self, manufacturer: &str) {
        set_text(&self.manufacturer, manufacturer);
    }

    fn update_model(&self, model: &str) {
        set_text(&self.model, model);
    }

    fn update_serial_number(&self, serial_number: &str) {
        set_text(&self.serial_number, serial_number);
    }

    fn update_heart_rate(&self, bpm: u16) {
        self.heart_rate.store(u32::from(bpm), Ordering::Release);
    }

    fn update_skin_contact(&self, status: ContactStatus) {
        self.contact.store(status.to_u8(), Ordering::Release);
    }

    fn update_energy_expended(&self, kcal: u16) {
        self.energy_expended.store(u32::from(kcal), Ordering::Release);
    }

    fn update_rr_intervals(&self, intervals: &[u16]) {
        let mut guard = lock(&self.rr_intervals);
        guard.clear();
        guard.extend_from_slice(intervals);
    }

    fn update_battery_level(&self, percent: u8) {
        self.battery_level.store(u32::from(percent), Ordering::Release);
    }

    fn update_sensor_location(&self, location: Option<SensorLocation>) {
        *lock(&self.sensor_location) = location;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_table_matches_flag_bits() {
        assert_eq!(ContactStatus::from_bits(0b00), ContactStatus::NotSupported);
        assert_eq!(ContactStatus::from_bits(0b01), ContactStatus::NotSupported);
        assert_eq!(ContactStatus::from_bits(0b10), ContactStatus::NoContact);
        assert_eq!(ContactStatus::from_bits(0b11), ContactStatus::ContactDetected);
        assert_eq!(ContactStatus::NoContact.to_string(), "No skin contact detected");
    }

    #[test]
    fn sensor_location_lookup() {
        assert_eq!(SensorLocation::from_code(1), Some(SensorLocation::Chest));
        assert_eq!(SensorLocation::from_code(5).map(|l| l.to_string()).as_deref(), Some("Ear Lobe"));
        assert_eq!(SensorLocation::from_code(6), Some(SensorLocation::Foot));
        assert_eq!(SensorLocation::from_code(7), None);
    }

    #[test]
    fn monitor_starts_empty() {
        let monitor = HeartRateMonitor::new();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.heart_rate, None);
        assert_eq!(snapshot.contact, None);
        assert_eq!(snapshot.energy_expended, None);
        assert!(snapshot.rr_intervals.is_empty());
        assert_eq!(snapshot.battery_level, None);
    }

    #[test]
    fn monitor_fields_update_independently() {
        let monitor = HeartRateMonitor::new();
        monitor.update_heart_rate(72);
        monitor.update_skin_contact(ContactStatus::ContactDetected);
        monitor.update_rr_intervals(&[812, 790]);
        monitor.update_rr_intervals(&[801]);
        monitor.update_manufacturer("Polar");
        monitor.update_battery_level(87);

        assert_eq!(monitor.heart_rate(), Some(72));
        assert_eq!(monitor.contact(), Some(ContactStatus::ContactDetected));
        assert_eq!(monitor.rr_intervals(), vec![801]);
        assert_eq!(monitor.manufacturer().as_deref(), Some("Polar"));
        assert_eq!(monitor.battery_level(), Some(87));
        assert_eq!(monitor.energy_expended(), None);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let monitor = HeartRateMonitor::new();
        monitor.update_heart_rate(60);
        monitor.update_skin_contact(ContactStatus::NoContact);
        let json = serde_json::to_value(monitor.snapshot()).unwrap();
        assert_eq!(json["heart_rate"], 60);
        assert_eq!(json["contact"], "no_contact");
    }
}
