use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::*;

/// Collect `(path, old, new)` for every leaf that differs between two JSON
/// documents. Paths are dot separated; keys only present in `previous` are
/// not reported.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(&Value::Object(serde_json::Map::new()), curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

/// Events for statuses whose code is new or different. Timestamps alone do
/// not count as a change.
pub(crate) fn status_events(
    previous: &BTreeMap<String, Status>,
    current: &BTreeMap<String, Status>,
) -> Vec<Event> {
    let mut events = Vec::new();
    for (object_id, status) in current {
        let changed = previous
            .get(object_id)
            .is_none_or(|prev| prev.code != status.code);
        if changed {
            events.push(Event::StatusChanged {
                object_id: object_id.clone(),
                serial: status.serial.clone(),
                key: status.key.clone(),
                code: status.code.clone(),
            });
        }
    }
    events
}

pub(crate) fn removed_status_events(
    previous: &BTreeMap<String, Status>,
    current: &BTreeMap<String, Status>,
) -> Vec<Event> {
    previous
        .keys()
        .filter(|id| !current.contains_key(*id))
        .map(|id| Event::StatusRemoved { object_id: id.clone() })
        .collect()
}

pub(crate) fn device_events(
    previous: &BTreeMap<String, Device>,
    current: &BTreeMap<String, Device>,
) -> Vec<Event> {
    let mut events = Vec::new();
    for (serial, device) in current {
        if !previous.contains_key(serial) {
            events.push(Event::DeviceAdded {
                serial: serial.clone(),
                name: device.name.clone(),
                install_id: device.install_id.clone(),
            });
        }
    }
    for (serial, device) in previous {
        if !current.contains_key(serial) {
            events.push(Event::DeviceRemoved {
                serial: serial.clone(),
                name: device.name.clone(),
            });
        }
    }
    events
}
