use std::fmt;

use chrono::{DateTime, Utc};

use crate::classify::{self, ControlKind};
use crate::rules::{ClassificationRules, contains};
use crate::types::{FieldDescriptor, FieldType, Status, TimeOfDay, UserRole};
use crate::{Error, Result};

/// Current value of a control as presented to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayValue {
    /// Stale, or not decodable for this control.
    Unavailable,
    Number(f64),
    Text(String),
    Bool(bool),
    Time(TimeOfDay),
}

impl fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayValue::Unavailable => write!(f, "unavailable"),
            DisplayValue::Number(n) => write!(f, "{n}"),
            DisplayValue::Text(s) => write!(f, "{s}"),
            DisplayValue::Bool(true) => write!(f, "on"),
            DisplayValue::Bool(false) => write!(f, "off"),
            DisplayValue::Time(t) => write!(f, "{t}"),
        }
    }
}

/// A value a user asks to write to a control.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Number(f64),
    /// Option label as shown by a select control.
    Option(String),
    Switch(bool),
    Press,
    Time(TimeOfDay),
}

/// Behavior shared by every kind of exposed status field.
pub trait Control: Send + Sync + fmt::Debug {
    fn kind(&self) -> ControlKind;

    fn descriptor(&self) -> &FieldDescriptor;

    /// Decode the raw status code for display.
    fn display_value(&self, status: &Status) -> DisplayValue;

    /// Like [`Control::display_value`], but statuses past their validity
    /// window are unavailable.
    fn display_at(&self, status: &Status, now: DateTime<Utc>) -> DisplayValue {
        if status.is_stale(now) {
            DisplayValue::Unavailable
        } else {
            self.display_value(status)
        }
    }

    /// Encode a user value into the wire code sent to the device.
    fn encode_write(&self, _value: &WriteValue) -> Result<String> {
        Err(Error::ReadOnly(self.descriptor().key.clone()))
    }
}

/// Build the control for a field, or `None` if it is not exposed for `role`.
pub fn control_for(
    desc: &FieldDescriptor,
    role: UserRole,
    rules: &ClassificationRules,
) -> Option<Box<dyn Control>> {
    let kind = classify::classify(desc, role, rules)?;
    let desc = desc.clone();
    let vocab = &rules.vocabulary;
    let control: Box<dyn Control> = match kind {
        ControlKind::Sensor => Box::new(SensorControl {
            unit: rules.normalize_unit(desc.unit.as_deref()),
            precision: classify::precision(&desc),
            desc,
        }),
        ControlKind::BinarySensor => Box::new(BinarySensorControl {
            on: OnOff::new(vocab.binary_on.clone(), vocab.binary_off.clone()),
            desc,
        }),
        ControlKind::Number => Box::new(NumberControl {
            step: classify::number_step(&desc, rules),
            precision: classify::precision(&desc),
            desc,
        }),
        ControlKind::Select => Box::new(SelectControl { desc }),
        ControlKind::Switch => Box::new(SwitchControl {
            on: OnOff::new(vocab.switch_on.clone(), vocab.switch_off.clone()),
            desc,
        }),
        ControlKind::Button => Box::new(ButtonControl { desc }),
        ControlKind::Time => Box::new(TimeControl { desc }),
    };
    Some(control)
}

fn invalid(desc: &FieldDescriptor, reason: impl Into<String>) -> Error {
    Error::InvalidValue {
        key: desc.key.clone(),
        reason: reason.into(),
    }
}

fn round_to(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (value * factor).round() / factor
}

/// Raw wire value to display number: `round(raw * weight, precision)`, or
/// the integer itself when the field is unscaled.
fn decode_number(desc: &FieldDescriptor, precision: i32, raw: &str) -> Option<f64> {
    let raw: f64 = raw.trim().parse().ok()?;
    Some(match desc.scale() {
        Some(w) => round_to(raw * w, precision),
        None => raw.round(),
    })
}

/// Display number to wire value: `round(display / weight)`.
fn encode_number(desc: &FieldDescriptor, value: f64) -> String {
    let wire = match desc.scale() {
        Some(w) => (value / w).round(),
        None => value.round(),
    };
    format!("{}", wire as i64)
}

#[derive(Debug)]
pub struct SensorControl {
    desc: FieldDescriptor,
    unit: Option<String>,
    precision: i32,
}

impl SensorControl {
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

impl Control for SensorControl {
    fn kind(&self) -> ControlKind {
        ControlKind::Sensor
    }

    fn descriptor(&self) -> &FieldDescriptor {
        &self.desc
    }

    fn display_value(&self, status: &Status) -> DisplayValue {
        let text = match self.desc.field_type {
            FieldType::Measure => {
                return decode_number(&self.desc, self.precision, &status.code)
                    .map(DisplayValue::Number)
                    .unwrap_or_else(|| DisplayValue::Text(status.code.clone()));
            }
            FieldType::Enum => self
                .desc
                .label_for(&status.code)
                .unwrap_or(&status.code)
                .to_string(),
            FieldType::Label | FieldType::Text => status.code.clone(),
        };
        // Non-numeric readings carry their unit in the text.
        match &self.unit {
            Some(unit) if !text.is_empty() => DisplayValue::Text(format!("{text} {unit}")),
            _ => DisplayValue::Text(text),
        }
    }
}

/// On/off vocabulary for two-state controls.
#[derive(Debug, Clone)]
struct OnOff {
    on: Vec<String>,
    off: Vec<String>,
}

impl OnOff {
    fn new(on: Vec<String>, off: Vec<String>) -> Self {
        Self { on, off }
    }

    /// State of a raw code. The option label is checked before the code, the
    /// same order [`OnOff::code`] writes with. Some devices publish the
    /// inverted pair `[["0", "Enable"], ["1", "Disable"]]`, where code `0`
    /// means on.
    fn state(&self, desc: &FieldDescriptor, code: &str) -> Option<bool> {
        let by = |s: &str| {
            if contains(&self.on, s) {
                Some(true)
            } else if contains(&self.off, s) {
                Some(false)
            } else {
                None
            }
        };
        desc.label_for(code).and_then(by).or_else(|| by(code))
    }

    /// Code that puts the field into `state`, matching labels first.
    fn code(&self, desc: &FieldDescriptor, state: bool) -> Option<String> {
        let words = if state { &self.on } else { &self.off };
        desc.values
            .iter()
            .find(|(_, label)| contains(words, label))
            .or_else(|| desc.values.iter().find(|(code, _)| contains(words, code)))
            .map(|(code, _)| code.clone())
    }
}

#[derive(Debug)]
pub struct BinarySensorControl {
    desc: FieldDescriptor,
    on: OnOff,
}

impl Control for BinarySensorControl {
    fn kind(&self) -> ControlKind {
        ControlKind::BinarySensor
    }

    fn descriptor(&self) -> &FieldDescriptor {
        &self.desc
    }

    fn display_value(&self, status: &Status) -> DisplayValue {
        self.on
            .state(&self.desc, &status.code)
            .map(DisplayValue::Bool)
            .unwrap_or(DisplayValue::Unavailable)
    }
}

#[derive(Debug)]
pub struct NumberControl {
    desc: FieldDescriptor,
    step: Option<f64>,
    precision: i32,
}

impl NumberControl {
    pub fn step(&self) -> Option<f64> {
        self.step
    }

    pub fn min(&self) -> Option<f64> {
        self.desc.min
    }

    pub fn max(&self) -> Option<f64> {
        self.desc.max
    }
}

impl Control for NumberControl {
    fn kind(&self) -> ControlKind {
        ControlKind::Number
    }

    fn descriptor(&self) -> &FieldDescriptor {
        &self.desc
    }

    fn display_value(&self, status: &Status) -> DisplayValue {
        decode_number(&self.desc, self.precision, &status.code)
            .map(DisplayValue::Number)
            .unwrap_or(DisplayValue::Unavailable)
    }

    fn encode_write(&self, value: &WriteValue) -> Result<String> {
        let WriteValue::Number(n) = value else {
            return Err(invalid(&self.desc, "expected a number"));
        };
        if !n.is_finite() {
            return Err(invalid(&self.desc, format!("{n} is not a finite number")));
        }
        if let Some(min) = self.desc.min
            && *n < min
        {
            return Err(invalid(&self.desc, format!("{n} is below minimum {min}")));
        }
        if let Some(max) = self.desc.max
            && *n > max
        {
            return Err(invalid(&self.desc, format!("{n} is above maximum {max}")));
        }
        Ok(encode_number(&self.desc, *n))
    }
}

#[derive(Debug)]
pub struct SelectControl {
    desc: FieldDescriptor,
}

impl SelectControl {
    /// Option labels in vendor order.
    pub fn options(&self) -> Vec<&str> {
        self.desc.values.iter().map(|(_, l)| l.as_str()).collect()
    }
}

impl Control for SelectControl {
    fn kind(&self) -> ControlKind {
        ControlKind::Select
    }

    fn descriptor(&self) -> &FieldDescriptor {
        &self.desc
    }

    fn display_value(&self, status: &Status) -> DisplayValue {
        let label = self.desc.label_for(&status.code).unwrap_or(&status.code);
        DisplayValue::Text(label.to_string())
    }

    fn encode_write(&self, value: &WriteValue) -> Result<String> {
        let WriteValue::Option(label) = value else {
            return Err(invalid(&self.desc, "expected an option"));
        };
        self.desc
            .code_for(label)
            .map(String::from)
            .ok_or_else(|| invalid(&self.desc, format!("unknown option '{label}'")))
    }
}

#[derive(Debug)]
pub struct SwitchControl {
    desc: FieldDescriptor,
    on: OnOff,
}

impl Control for SwitchControl {
    fn kind(&self) -> ControlKind {
        ControlKind::Switch
    }

    fn descriptor(&self) -> &FieldDescriptor {
        &self.desc
    }

    fn display_value(&self, status: &Status) -> DisplayValue {
        self.on
            .state(&self.desc, &status.code)
            .map(DisplayValue::Bool)
            .unwrap_or(DisplayValue::Unavailable)
    }

    fn encode_write(&self, value: &WriteValue) -> Result<String> {
        let WriteValue::Switch(state) = value else {
            return Err(invalid(&self.desc, "expected on or off"));
        };
        self.on
            .code(&self.desc, *state)
            .ok_or_else(|| invalid(&self.desc, "no matching on/off option"))
    }
}

#[derive(Debug)]
pub struct ButtonControl {
    desc: FieldDescriptor,
}

impl Control for ButtonControl {
    fn kind(&self) -> ControlKind {
        ControlKind::Button
    }

    fn descriptor(&self) -> &FieldDescriptor {
        &self.desc
    }

    fn display_value(&self, _status: &Status) -> DisplayValue {
        DisplayValue::Unavailable
    }

    fn encode_write(&self, value: &WriteValue) -> Result<String> {
        if *value != WriteValue::Press {
            return Err(invalid(&self.desc, "buttons can only be pressed"));
        }
        self.desc
            .values
            .first()
            .map(|(code, _)| code.clone())
            .ok_or_else(|| invalid(&self.desc, "no press value"))
    }
}

#[derive(Debug)]
pub struct TimeControl {
    desc: FieldDescriptor,
}

impl Control for TimeControl {
    fn kind(&self) -> ControlKind {
        ControlKind::Time
    }

    fn descriptor(&self) -> &FieldDescriptor {
        &self.desc
    }

    fn display_value(&self, status: &Status) -> DisplayValue {
        match status.code.trim().parse::<f64>() {
            Ok(secs) => DisplayValue::Time(TimeOfDay::from_wire_seconds(secs as i64)),
            Err(_) => DisplayValue::Unavailable,
        }
    }

    fn encode_write(&self, value: &WriteValue) -> Result<String> {
        let WriteValue::Time(t) = value else {
            return Err(invalid(&self.desc, "expected a time of day"));
        };
        Ok(t.to_wire_seconds().to_string())
    }
}
