use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const VENDOR: &str = "DAB Pumps";

/// Live readings older than this are no longer shown.
pub const STATUS_VALIDITY_SECS: i64 = 15 * 60;

/// Account role within an installation. Field rights are expressed as the
/// initials of the roles that hold them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum UserRole {
    #[default]
    Customer,
    Installer,
    Service,
    Rnd,
}

impl UserRole {
    pub fn initial(&self) -> char {
        match self {
            UserRole::Customer => 'C',
            UserRole::Installer => 'I',
            UserRole::Service => 'S',
            UserRole::Rnd => 'R',
        }
    }

    pub fn from_dab_str(s: &str) -> Option<Self> {
        match s.chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('C') => Some(UserRole::Customer),
            Some('I') => Some(UserRole::Installer),
            Some('S') => Some(UserRole::Service),
            Some('R') => Some(UserRole::Rnd),
            _ => None,
        }
    }

    /// True when `rights` (a string of role initials such as `"CIS"`) grants this role.
    pub fn is_in(&self, rights: &str) -> bool {
        rights.contains(self.initial())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Installation {
    pub id: String,
    pub name: String,
    pub description: String,
    pub company: String,
    pub address: String,
    pub timezone: String,
    pub role: UserRole,
    /// Serials of the devices in this installation, in vendor order.
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Device {
    pub serial: String,
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub product: String,
    pub version: String,
    pub build: String,
    pub install_id: String,
    pub config_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Measure,
    Enum,
    Label,
    Text,
}

impl FieldType {
    pub fn from_dab_str(s: &str) -> Self {
        match s {
            "measure" => FieldType::Measure,
            "enum" => FieldType::Enum,
            "label" => FieldType::Label,
            _ => FieldType::Text,
        }
    }
}

/// Metadata for one status key of a device configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub key: String,
    pub name: String,
    pub field_type: FieldType,
    pub unit: Option<String>,
    pub weight: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub family: Option<String>,
    pub group: Option<String>,
    /// Initials of the roles allowed to see this field.
    pub view: String,
    /// Initials of the roles allowed to change this field.
    pub change: String,
    /// Enum code to label pairs, in vendor order.
    pub values: Vec<(String, String)>,
}

impl FieldDescriptor {
    pub fn new(key: impl Into<String>, field_type: FieldType) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            field_type,
            unit: None,
            weight: None,
            min: None,
            max: None,
            family: None,
            group: None,
            view: "CISR".to_string(),
            change: String::new(),
            values: Vec::new(),
        }
    }

    pub fn label_for(&self, code: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, l)| l.as_str())
    }

    pub fn code_for(&self, label: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, l)| l == label)
            .map(|(c, _)| c.as_str())
    }

    /// Weight that actually scales the raw value, if any.
    pub fn scale(&self) -> Option<f64> {
        self.weight.filter(|w| *w != 0.0 && *w != 1.0)
    }
}

/// Field metadata shared by all devices of the same product configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Config {
    pub id: String,
    pub label: String,
    pub description: String,
    pub fields: BTreeMap<String, FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub serial: String,
    pub key: String,
    /// Raw wire value as reported by the device.
    pub code: String,
    pub object_id: String,
    pub unique_id: String,
    pub updated: DateTime<Utc>,
}

impl Status {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.updated > Duration::seconds(STATUS_VALIDITY_SECS)
    }
}

/// Seconds-since-midnight value as used by DAB timer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Devices report 86340 (23:59) and above for "end of day"; everything in
    /// the last minute is shown as 23:59.
    pub const LAST_MINUTE_SECS: i64 = 86340;

    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn from_wire_seconds(secs: i64) -> Self {
        if secs >= Self::LAST_MINUTE_SECS {
            return Self { hour: 23, minute: 59 };
        }
        let secs = secs.max(0);
        Self {
            hour: (secs / 3600) as u8,
            minute: ((secs % 3600) / 60) as u8,
        }
    }

    pub fn to_wire_seconds(&self) -> i64 {
        self.hour as i64 * 3600 + self.minute as i64 * 60
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Events emitted to subscribers when the cached state changes.
#[derive(Debug, Clone)]
pub enum Event {
    DeviceAdded { serial: String, name: String, install_id: String },
    DeviceRemoved { serial: String, name: String },
    StatusChanged { object_id: String, serial: String, key: String, code: String },
    StatusRemoved { object_id: String },
}
