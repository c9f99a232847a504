mod classify;
mod client;
mod config;
mod control;
mod coordinator;
mod diagnostics;
mod diff;
mod error;
mod logger;
mod points;
mod protocol;
mod registry;
mod rules;
mod session;
mod types;

pub use classify::{ControlKind, EntityCategory, StateClass, classify, is_visible, number_step};
pub use client::{DabPumpsClient, DabPumpsClientBuilder};
pub use config::{DEFAULT_POLLING_INTERVAL_SECS, EntryConfig, MIN_POLLING_INTERVAL_SECS};
pub use control::{
    ButtonControl, BinarySensorControl, Control, DisplayValue, NumberControl, SelectControl,
    SensorControl, SwitchControl, TimeControl, WriteValue, control_for,
};
pub use coordinator::{Coordinator, InstallSnapshot, discover_installations};
pub use diagnostics::{CycleStats, REDACTED, redact};
pub use error::{Error, Result, UpdateError};
pub use logger::MessageLogMode;
pub use points::{
    ControlPoint, SIGNIFICANT_DECREASE_PERCENT, build_control_points, hold_insignificant_decreases,
};
pub use protocol::{DEFAULT_BASE_URL, create_id};
pub use registry::{ClientRegistry, SharedClient, credential_key};
pub use rules::ClassificationRules;
pub use types::*;
