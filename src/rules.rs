use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::warn;

use crate::Result;

static BUILTIN_RULES: &str = include_str!("../data/rules.json");
static BUILTIN: OnceLock<ClassificationRules> = OnceLock::new();

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisibilityRules {
    #[serde(default)]
    pub show_keys: Vec<String>,
    #[serde(default)]
    pub hide_keys: Vec<String>,
    #[serde(default)]
    pub show_groups: Vec<String>,
    #[serde(default)]
    pub hide_groups: Vec<String>,
}

/// Keys and groups that may become writable controls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlRules {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Vocabulary {
    pub switch_on: Vec<String>,
    pub switch_off: Vec<String>,
    pub binary_on: Vec<String>,
    pub binary_off: Vec<String>,
    pub button: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryRules {
    #[serde(default)]
    pub primary_groups: Vec<String>,
    #[serde(default)]
    pub control_groups: Vec<String>,
    #[serde(default)]
    pub config_groups: Vec<String>,
    #[serde(default)]
    pub config_keys: Vec<String>,
    #[serde(default)]
    pub diagnostic_groups: Vec<String>,
    #[serde(default)]
    pub diagnostic_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateClassRules {
    #[serde(default)]
    pub none_groups: Vec<String>,
    #[serde(default)]
    pub none_keys: Vec<String>,
    #[serde(default)]
    pub total_keys: Vec<String>,
    #[serde(default)]
    pub total_increasing_keys: Vec<String>,
}

/// Declarative tables driving field classification.
///
/// The built-in set ships with the crate in `data/rules.json`; a replacement
/// can be loaded with [`ClassificationRules::from_json`] to extend the lists
/// without touching the classification logic.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassificationRules {
    #[serde(default)]
    pub visibility: VisibilityRules,
    #[serde(default)]
    pub controls: ControlRules,
    pub vocabulary: Vocabulary,
    #[serde(default)]
    pub category: CategoryRules,
    #[serde(default)]
    pub state_class: StateClassRules,
    /// Vendor unit to display unit. `null` means the unit is not a real unit.
    #[serde(default)]
    pub units: BTreeMap<String, Option<String>>,
    /// Candidate step sizes per display unit, largest first. `default`
    /// applies to every unit without its own entry.
    #[serde(default)]
    pub step_candidates: BTreeMap<String, Vec<f64>>,
}

impl ClassificationRules {
    pub fn builtin() -> &'static ClassificationRules {
        BUILTIN.get_or_init(|| {
            serde_json::from_str(BUILTIN_RULES).expect("embedded rules.json is valid")
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Map a vendor unit onto its display form. Units missing from the table
    /// are passed through unchanged.
    pub fn normalize_unit(&self, unit: Option<&str>) -> Option<String> {
        let unit = unit?;
        match self.units.get(unit) {
            Some(mapped) => mapped.clone(),
            None => {
                warn!(unit, "encountered a unit or measurement '{unit}' that is not known");
                Some(unit.to_string())
            }
        }
    }

    pub fn step_candidates(&self, unit: Option<&str>) -> &[f64] {
        unit.and_then(|u| self.step_candidates.get(u))
            .or_else(|| self.step_candidates.get("default"))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub(crate) fn contains(list: &[String], value: &str) -> bool {
    list.iter().any(|v| v == value)
}
