use serde::Serialize;

use crate::rules::{ClassificationRules, contains};
use crate::types::{FieldDescriptor, FieldType, UserRole};

/// User-facing control a status field is exposed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlKind {
    Sensor,
    BinarySensor,
    Number,
    Select,
    Switch,
    Button,
    Time,
}

impl ControlKind {
    pub fn is_writable(&self) -> bool {
        !matches!(self, ControlKind::Sensor | ControlKind::BinarySensor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityCategory {
    Config,
    Diagnostic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

/// Whether a field is exposed at all for `role`. Rules are checked in order
/// and the first match wins; anything not matched is visible.
pub fn is_visible(desc: &FieldDescriptor, role: UserRole, rules: &ClassificationRules) -> bool {
    let vis = &rules.visibility;
    if !role.is_in(&desc.view) {
        return false;
    }
    if contains(&vis.show_keys, &desc.key) {
        return true;
    }
    if contains(&vis.hide_keys, &desc.key) {
        return false;
    }
    let group = desc.group.as_deref().unwrap_or("");
    if contains(&vis.show_groups, group) {
        return true;
    }
    !contains(&vis.hide_groups, group)
}

/// Decide which control a field becomes, or `None` when it is not exposed.
pub fn classify(
    desc: &FieldDescriptor,
    role: UserRole,
    rules: &ClassificationRules,
) -> Option<ControlKind> {
    if !is_visible(desc, role, rules) {
        return None;
    }

    if is_controllable(desc, role, rules) {
        match desc.field_type {
            FieldType::Enum => {
                if is_button(desc, rules) {
                    return Some(ControlKind::Button);
                }
                if is_pair_of(desc, &rules.vocabulary.switch_on, &rules.vocabulary.switch_off) {
                    return Some(ControlKind::Switch);
                }
                return Some(ControlKind::Select);
            }
            FieldType::Measure => {
                let unit = rules.normalize_unit(desc.unit.as_deref());
                if unit.as_deref() == Some("s") {
                    return Some(ControlKind::Time);
                }
                return Some(ControlKind::Number);
            }
            FieldType::Label | FieldType::Text => {}
        }
    }

    if desc.field_type == FieldType::Enum {
        // A press action without change rights has nothing to show.
        if is_button(desc, rules) {
            return None;
        }
        if is_pair_of(desc, &rules.vocabulary.binary_on, &rules.vocabulary.binary_off) {
            return Some(ControlKind::BinarySensor);
        }
    }
    Some(ControlKind::Sensor)
}

fn is_controllable(desc: &FieldDescriptor, role: UserRole, rules: &ClassificationRules) -> bool {
    if !role.is_in(&desc.change) {
        return false;
    }
    let group = desc.group.as_deref().unwrap_or("");
    contains(&rules.controls.keys, &desc.key) || contains(&rules.controls.groups, group)
}

fn is_button(desc: &FieldDescriptor, rules: &ClassificationRules) -> bool {
    desc.values.len() == 1
        && desc
            .values
            .iter()
            .all(|(code, _)| contains(&rules.vocabulary.button, code))
}

/// Exactly two values whose codes and labels all come from the on/off lists.
fn is_pair_of(desc: &FieldDescriptor, on: &[String], off: &[String]) -> bool {
    let known = |s: &str| contains(on, s) || contains(off, s);
    desc.values.len() == 2 && desc.values.iter().all(|(code, label)| known(code) && known(label))
}

pub fn entity_category(desc: &FieldDescriptor, rules: &ClassificationRules) -> Option<EntityCategory> {
    let cat = &rules.category;
    let group = desc.group.as_deref().unwrap_or("");
    let changeable_by = |role: UserRole| role.is_in(&desc.change);
    let viewable_by = |role: UserRole| role.is_in(&desc.view);

    if contains(&cat.primary_groups, group) {
        return None;
    }
    if contains(&cat.control_groups, group) && changeable_by(UserRole::Customer) {
        return None;
    }
    if contains(&cat.config_groups, group) && changeable_by(UserRole::Installer) {
        return Some(EntityCategory::Config);
    }
    if contains(&cat.config_keys, &desc.key) && changeable_by(UserRole::Installer) {
        return Some(EntityCategory::Config);
    }
    if contains(&cat.diagnostic_groups, group) || contains(&cat.diagnostic_keys, &desc.key) {
        return Some(EntityCategory::Diagnostic);
    }
    // Settings rarely change and are not primary readings.
    if !desc.change.is_empty() {
        return Some(EntityCategory::Diagnostic);
    }
    if !viewable_by(UserRole::Customer) && !viewable_by(UserRole::Installer) {
        return Some(EntityCategory::Diagnostic);
    }
    if !viewable_by(UserRole::Customer) && desc.family.as_deref() == Some("gear") {
        return Some(EntityCategory::Diagnostic);
    }
    None
}

pub fn state_class(desc: &FieldDescriptor, rules: &ClassificationRules) -> Option<StateClass> {
    let sc = &rules.state_class;
    if desc.field_type != FieldType::Measure || !desc.change.is_empty() {
        return None;
    }
    if contains(&sc.none_groups, desc.group.as_deref().unwrap_or("")) {
        return None;
    }
    if contains(&sc.none_keys, &desc.key) {
        return None;
    }
    if contains(&sc.total_keys, &desc.key) {
        Some(StateClass::Total)
    } else if contains(&sc.total_increasing_keys, &desc.key) {
        Some(StateClass::TotalIncreasing)
    } else {
        Some(StateClass::Measurement)
    }
}

/// Decimal places shown for a scaled value: `floor(log10(1 / weight))`.
/// Unscaled values have no decimals.
pub fn precision(desc: &FieldDescriptor) -> i32 {
    match desc.scale() {
        Some(w) if w > 0.0 => (1.0 / w).log10().floor() as i32,
        _ => 0,
    }
}

/// Step for a number control. Scaled fields step by their weight; unscaled
/// fields use the largest candidate for the display unit that evenly divides
/// min, max and their difference.
pub fn number_step(desc: &FieldDescriptor, rules: &ClassificationRules) -> Option<f64> {
    if let Some(w) = desc.scale() {
        return Some(w);
    }
    let (min, max) = (desc.min? as i64, desc.max? as i64);
    let diff = max - min;
    let unit = rules.normalize_unit(desc.unit.as_deref());
    rules
        .step_candidates(unit.as_deref())
        .iter()
        .copied()
        .find(|c| {
            let c = *c as i64;
            c != 0 && min % c == 0 && max % c == 0 && diff % c == 0
        })
}
