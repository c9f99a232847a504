use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};

pub const REDACTED: &str = "**REDACTED**";

const REDACT_KEYS: &[&str] = &["password", "client_secret"];

/// Copy of `value` with every credential field replaced, at any depth.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                if REDACT_KEYS.contains(&k.as_str()) {
                    out.insert(k.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k.clone(), redact(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Per-cycle counters kept for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    /// Number of retries a successful cycle needed.
    pub retries: BTreeMap<u32, u64>,
    /// Cycle duration in whole seconds.
    pub durations: BTreeMap<u64, u64>,
    pub failures: u64,
}

impl CycleStats {
    pub(crate) fn record(&mut self, attempt: u32, elapsed: Duration, success: bool) {
        if success {
            *self.retries.entry(attempt).or_default() += 1;
        } else {
            self.failures += 1;
        }
        *self.durations.entry(elapsed.as_secs_f64().round() as u64).or_default() += 1;
    }

    pub fn to_json(&self) -> Value {
        json!({
            "retries": histogram(&self.retries),
            "durations": histogram(&self.durations),
            "failures": self.failures,
        })
    }
}

fn histogram<K: ToString>(counter: &BTreeMap<K, u64>) -> Value {
    let total = counter.values().sum::<u64>().max(1) as f64;
    let counts: Map<String, Value> = counter
        .iter()
        .map(|(k, n)| (k.to_string(), json!(n)))
        .collect();
    let percent: Map<String, Value> = counter
        .iter()
        .map(|(k, n)| (k.to_string(), json!((10000.0 * *n as f64 / total).round() / 100.0)))
        .collect();
    json!({ "counter": counts, "percent": percent })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_nested_credentials() {
        let value = json!({
            "username": "me@example.com",
            "password": "secret",
            "entries": [{"client_secret": "x", "install_id": "abc"}]
        });
        let redacted = redact(&value);
        assert_eq!(redacted["username"], "me@example.com");
        assert_eq!(redacted["password"], REDACTED);
        assert_eq!(redacted["entries"][0]["client_secret"], REDACTED);
        assert_eq!(redacted["entries"][0]["install_id"], "abc");
    }

    #[test]
    fn cycle_stats_histograms() {
        let mut stats = CycleStats::default();
        stats.record(0, Duration::from_millis(400), true);
        stats.record(0, Duration::from_millis(1400), true);
        stats.record(1, Duration::from_secs(3), true);
        stats.record(1, Duration::from_secs(3), false);

        let json = stats.to_json();
        assert_eq!(json["retries"]["counter"]["0"], 2);
        assert_eq!(json["retries"]["counter"]["1"], 1);
        assert_eq!(json["retries"]["percent"]["0"], 66.67);
        assert_eq!(json["durations"]["counter"]["3"], 2);
        assert_eq!(json["failures"], 1);
    }
}
