use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::classify::{self, ControlKind, EntityCategory, StateClass};
use crate::control::{Control, DisplayValue, control_for};
use crate::rules::ClassificationRules;
use crate::types::{Config, Device, FieldType, Installation, Status};

/// A status field exposed to the user as a typed control.
#[derive(Debug, Clone)]
pub struct ControlPoint {
    pub object_id: String,
    pub unique_id: String,
    pub name: String,
    pub key: String,
    pub serial: String,
    pub install_id: String,
    pub kind: ControlKind,
    /// Display unit for numeric readings and settings.
    pub unit: Option<String>,
    pub category: Option<EntityCategory>,
    pub state_class: Option<StateClass>,
    pub control: Arc<dyn Control>,
}

impl ControlPoint {
    pub fn display(&self, status: &Status, now: DateTime<Utc>) -> DisplayValue {
        self.control.display_at(status, now)
    }
}

/// Classify every status of an installation's devices. Statuses without
/// metadata, and fields hidden for the installation's role, are skipped.
pub fn build_control_points(
    install: &Installation,
    devices: &BTreeMap<String, Device>,
    configs: &BTreeMap<String, Config>,
    statuses: &BTreeMap<String, Status>,
    rules: &ClassificationRules,
) -> Vec<ControlPoint> {
    let mut points = Vec::new();

    for status in statuses.values() {
        let Some(device) = devices.get(&status.serial) else {
            continue;
        };
        if device.install_id != install.id {
            continue;
        }
        let Some(desc) = configs
            .get(&device.config_id)
            .and_then(|config| config.fields.get(&status.key))
        else {
            debug!(
                serial = %device.serial,
                key = %status.key,
                "no field metadata found for status"
            );
            continue;
        };
        let Some(control) = control_for(desc, install.role, rules) else {
            debug!(object_id = %status.object_id, "status not exposed");
            continue;
        };

        let kind = control.kind();
        let unit = match (kind, desc.field_type) {
            (ControlKind::Sensor, FieldType::Measure) | (ControlKind::Number, _) => {
                rules.normalize_unit(desc.unit.as_deref())
            }
            _ => None,
        };

        points.push(ControlPoint {
            object_id: status.object_id.clone(),
            unique_id: status.unique_id.clone(),
            name: desc.name.clone(),
            key: status.key.clone(),
            serial: device.serial.clone(),
            install_id: install.id.clone(),
            kind,
            unit,
            category: classify::entity_category(desc, rules),
            state_class: match kind {
                ControlKind::Sensor => classify::state_class(desc, rules),
                _ => None,
            },
            control: Arc::from(control),
        });
    }

    points
}

/// Smallest drop, in percent of the previous reading, that a cumulative
/// sensor reports. Smaller drops are treated as device noise.
pub const SIGNIFICANT_DECREASE_PERCENT: f64 = 50.0;

fn is_significant_change(old: f64, new: f64, percent: f64) -> bool {
    if old == new {
        return false;
    }
    if old == 0.0 {
        return true;
    }
    (new - old).abs() / old.abs() * 100.0 >= percent
}

/// Keep the previous reading of total and total-increasing sensors whose new
/// value dropped by less than [`SIGNIFICANT_DECREASE_PERCENT`]. The held
/// status keeps its fresh timestamp.
pub fn hold_insignificant_decreases(
    points: &[ControlPoint],
    previous: &BTreeMap<String, Status>,
    statuses: &mut BTreeMap<String, Status>,
) {
    for point in points {
        if !matches!(
            point.state_class,
            Some(StateClass::Total | StateClass::TotalIncreasing)
        ) {
            continue;
        }
        let (Some(prev), Some(current)) = (
            previous.get(&point.object_id),
            statuses.get_mut(&point.object_id),
        ) else {
            continue;
        };
        let (DisplayValue::Number(old), DisplayValue::Number(new)) = (
            point.control.display_value(prev),
            point.control.display_value(current),
        ) else {
            continue;
        };
        if new < old && !is_significant_change(old, new, SIGNIFICANT_DECREASE_PERCENT) {
            debug!(
                object_id = %point.object_id,
                old, new,
                "ignoring insignificant decrease"
            );
            current.code = prev.code.clone();
        }
    }
}
