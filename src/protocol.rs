use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::types::*;
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://dconnect.dabpumps.com";

pub const LOGOUT_PATH: &str = "/logout";
pub const INSTALL_LIST_PATH: &str = "/api/v1/gui/installation/list?lang=en";

/// Status value used by devices for fields they do not support.
pub const UNSUPPORTED_VALUE: &str = "h";

static LOGIN_ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"action\s?=\s?"(.*?)""#).expect("static regex"));

static NON_ID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_-]+").expect("static regex"));

pub fn device_status_path(serial: &str) -> String {
    format!("/dumstate/{serial}")
}

pub fn config_path(config_id: &str) -> String {
    format!("/api/v1/configuration/{config_id}")
}

pub fn change_status_path(serial: &str) -> String {
    format!("/dum/{serial}")
}

pub fn change_status_body(key: &str, value: &str) -> Value {
    json!({ "key": key, "value": value })
}

/// Normalize free-form parts into an identifier made of `[a-z0-9_-]`.
///
/// Parts are joined with `_`, outer underscores trimmed, spaces replaced by
/// underscores and everything else outside the allowed set dropped.
pub fn create_id(parts: &[&str]) -> String {
    let joined = parts.join("_");
    let lowered = joined
        .trim_matches('_')
        .replace(' ', "_")
        .to_lowercase();
    let cleaned = NON_ID_CHARS.replace_all(&lowered, "");
    // Dropping characters can expose new outer underscores ("_é_x" -> "__x").
    cleaned.trim_matches('_').to_string()
}

/// Pull the login form target out of the portal's landing page.
pub fn extract_login_action(html: &str) -> Option<String> {
    LOGIN_ACTION
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("&amp;", "&"))
}

/// Validate the `{res, code, msg}` envelope every JSON endpoint returns.
pub fn check_envelope(body: &Value, context: &str) -> Result<()> {
    let res = body.get("res").and_then(|v| v.as_str()).unwrap_or("");
    if res == "OK" {
        return Ok(());
    }
    let code = body.get("code").and_then(|v| v.as_str()).unwrap_or("");
    let msg = body.get("msg").and_then(|v| v.as_str()).unwrap_or("");
    if code == "FORBIDDEN" {
        return Err(Error::Auth(format!("{context}: {res} {code} {msg}")));
    }
    Err(Error::Protocol(format!(
        "{context}: got response {res} {code} {msg}"
    )))
}

fn str_field<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| v.get(*k).and_then(|x| x.as_str()))
        .find(|s| !s.is_empty())
}

fn lenient_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

fn role_initials(v: Option<&Value>) -> String {
    match v {
        Some(Value::Array(roles)) => roles
            .iter()
            .filter_map(|r| r.as_str())
            .filter_map(UserRole::from_dab_str)
            .map(|r| r.initial())
            .collect(),
        Some(Value::String(s)) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter_map(UserRole::from_dab_str)
            .map(|r| r.initial())
            .collect(),
        _ => String::new(),
    }
}

pub type Catalog = (BTreeMap<String, Installation>, BTreeMap<String, Device>);

/// Parse the installation list into installations keyed by normalized id and
/// devices keyed by serial. A serial reported twice keeps the last record.
pub fn parse_install_list(body: &Value) -> Catalog {
    let mut installs = BTreeMap::new();
    let mut devices = BTreeMap::new();

    let Some(Value::Object(installation_map)) = body.pointer("/data/installation_map") else {
        return (installs, devices);
    };

    for (ins_idx, installation) in installation_map.values().enumerate() {
        let raw_id = str_field(installation, &["installation_id"]).unwrap_or("");
        let install_id = create_id(&[raw_id]);
        let install_name = str_field(installation, &["name", "description"])
            .map(String::from)
            .unwrap_or_else(|| format!("installation {ins_idx}"));
        debug!(install = %install_name, "installation found");

        let mut serials = Vec::new();
        if let Some(Value::Array(dums)) = installation.get("dums") {
            for (dum_idx, dum) in dums.iter().enumerate() {
                let serial = str_field(dum, &["serial"]).unwrap_or("").to_string();
                let name = str_field(dum, &["name", "distro_embedded", "distro"])
                    .map(String::from)
                    .unwrap_or_else(|| format!("device {dum_idx}"));

                let device = Device {
                    id: create_id(&[&name]),
                    serial: serial.clone(),
                    vendor: VENDOR.to_string(),
                    product: str_field(dum, &["distro_embedded", "distro"]).unwrap_or("").to_string(),
                    version: str_field(dum, &["version_embedded", "version"]).unwrap_or("").to_string(),
                    build: str_field(dum, &["channel_embedded", "channel"]).unwrap_or("").to_string(),
                    install_id: install_id.clone(),
                    config_id: dum
                        .get("configuration_id")
                        .and_then(lenient_string)
                        .unwrap_or_default(),
                    name,
                };
                info!(device = %device.name, serial = %serial, "device found");
                serials.push(serial.clone());
                devices.insert(serial, device);
            }
        }

        let role = str_field(installation, &["user_role"])
            .and_then(UserRole::from_dab_str)
            .unwrap_or_default();

        installs.insert(
            install_id.clone(),
            Installation {
                id: install_id,
                name: install_name,
                description: str_field(installation, &["description"]).unwrap_or("").to_string(),
                company: str_field(installation, &["company"]).unwrap_or("").to_string(),
                address: str_field(installation, &["address"]).unwrap_or("").to_string(),
                timezone: str_field(installation, &["timezone"]).unwrap_or("").to_string(),
                role,
                devices: serials,
            },
        );
    }

    (installs, devices)
}

pub fn parse_config(config_id: &str, body: &Value) -> Config {
    let mut fields = BTreeMap::new();

    if let Some(Value::Array(params)) = body.pointer("/metadata/params") {
        for param in params {
            let Some(key) = str_field(param, &["name"]) else {
                continue;
            };
            let field_type = FieldType::from_dab_str(str_field(param, &["type"]).unwrap_or(""));
            let values = match param.get("values") {
                Some(Value::Array(pairs)) => pairs
                    .iter()
                    .filter_map(|pair| {
                        let code = lenient_string(pair.get(0)?)?;
                        let label = lenient_string(pair.get(1)?)?;
                        Some((code, label))
                    })
                    .collect(),
                _ => Vec::new(),
            };
            let descriptor = FieldDescriptor {
                key: key.to_string(),
                name: str_field(param, &["label", "name"]).unwrap_or(key).to_string(),
                field_type,
                unit: str_field(param, &["unit"]).map(String::from),
                weight: lenient_f64(param.get("weight")),
                min: lenient_f64(param.get("min")).or_else(|| lenient_f64(param.get("warn_low"))),
                max: lenient_f64(param.get("max")).or_else(|| lenient_f64(param.get("warn_high"))),
                family: str_field(param, &["family"]).map(String::from),
                group: str_field(param, &["group"]).map(String::from),
                view: role_initials(param.get("view")),
                change: role_initials(param.get("change")),
                values,
            };
            fields.insert(key.to_string(), descriptor);
        }
    }

    Config {
        id: body
            .get("configuration_id")
            .and_then(lenient_string)
            .unwrap_or_else(|| config_id.to_string()),
        label: str_field(body, &["label", "name"]).unwrap_or("").to_string(),
        description: str_field(body, &["description"]).unwrap_or("").to_string(),
        fields,
    }
}

/// Decode a `/dumstate` response into statuses keyed by object id, skipping
/// fields the device reports as unsupported.
pub fn parse_device_status(
    device: &Device,
    body: &Value,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, Status>> {
    let inner = match body.get("status") {
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)?,
        Some(v @ Value::Object(_)) => v.clone(),
        _ => {
            return Err(Error::Protocol(format!(
                "missing status payload for device {}",
                device.serial
            )));
        }
    };
    let Value::Object(fields) = inner else {
        return Err(Error::Protocol(format!(
            "status payload for device {} is not an object",
            device.serial
        )));
    };

    let mut statuses = BTreeMap::new();
    for (key, raw) in &fields {
        let Some(code) = lenient_string(raw) else {
            continue;
        };
        if code == UNSUPPORTED_VALUE {
            continue;
        }
        let object_id = create_id(&[&device.serial, key]);
        statuses.insert(
            object_id.clone(),
            Status {
                serial: device.serial.clone(),
                key: key.clone(),
                code,
                unique_id: create_id(&[&device.name, key]),
                object_id,
                updated: now,
            },
        );
    }
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_id_normalizes() {
        assert_eq!(create_id(&["My Pump", "VP_PressureBar"]), "my_pump_vp_pressurebar");
        assert_eq!(create_id(&["_Esybox Mini3_"]), "esybox_mini3");
        assert_eq!(create_id(&["ins-42", "A.B/C"]), "ins-42_abc");
    }

    #[test]
    fn create_id_is_idempotent() {
        for parts in [&["My Pump", "VP_PressureBar"][..], &["__x y__", "Z"], &["é_a", "b "]] {
            let once = create_id(parts);
            assert_eq!(create_id(&[&once]), once);
            assert!(once.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'));
            assert!(!once.starts_with('_') && !once.ends_with('_'));
        }
    }

    #[test]
    fn login_action_unescapes_ampersands() {
        let html = r#"<form id="kc-form-login" action="https://auth.example/login?session_code=abc&amp;tab_id=x" method="post">"#;
        assert_eq!(
            extract_login_action(html).as_deref(),
            Some("https://auth.example/login?session_code=abc&tab_id=x")
        );
        assert!(extract_login_action("<html>down for maintenance</html>").is_none());
    }

    #[test]
    fn envelope_forbidden_is_auth() {
        let body = json!({"res": "ERROR", "code": "FORBIDDEN", "msg": "Forbidden operation"});
        assert!(check_envelope(&body, "test").unwrap_err().is_auth());

        let body = json!({"res": "ERROR", "code": "INTERNAL", "msg": "oops"});
        let err = check_envelope(&body, "test").unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("oops")));

        assert!(check_envelope(&json!({"res": "OK"}), "test").is_ok());
    }

    #[test]
    fn install_list_builds_catalog() {
        let body = json!({
            "res": "OK",
            "data": {"installation_map": {
                "abc": {
                    "installation_id": "ABC-123",
                    "description": "Holiday home",
                    "user_role": "INSTALLER",
                    "dums": [
                        {"serial": "SN1", "name": "Esybox", "distro_embedded": "esybox", "version": "5.1", "configuration_id": 42},
                        {"serial": "SN2", "distro": "DConnect Box 2"}
                    ]
                }
            }}
        });
        let (installs, devices) = parse_install_list(&body);
        let install = &installs["abc-123"];
        assert_eq!(install.name, "Holiday home");
        assert_eq!(install.role, UserRole::Installer);
        assert_eq!(install.devices, vec!["SN1", "SN2"]);

        assert_eq!(devices["SN1"].product, "esybox");
        assert_eq!(devices["SN1"].config_id, "42");
        assert_eq!(devices["SN1"].install_id, "abc-123");
        assert_eq!(devices["SN2"].name, "DConnect Box 2");
        assert_eq!(devices["SN2"].id, "dconnect_box_2");
    }

    #[test]
    fn config_params_parse() {
        let body = json!({
            "res": "OK",
            "configuration_id": "42",
            "label": "Esybox",
            "metadata": {"params": [
                {"name": "VP_PressureBar", "type": "measure", "unit": "bar", "weight": 0.1,
                 "min": "0", "max": 100, "group": "Pressure", "view": ["CUSTOMER", "INSTALLER"], "change": []},
                {"name": "PumpDisable", "type": "enum", "group": "Setpoint",
                 "view": ["CUSTOMER"], "change": ["INSTALLER"], "values": [["0", "Enable"], ["1", "Disable"]]}
            ]}
        });
        let config = parse_config("42", &body);
        let pressure = &config.fields["VP_PressureBar"];
        assert_eq!(pressure.field_type, FieldType::Measure);
        assert_eq!(pressure.weight, Some(0.1));
        assert_eq!(pressure.min, Some(0.0));
        assert_eq!(pressure.view, "CI");
        assert_eq!(pressure.change, "");

        let disable = &config.fields["PumpDisable"];
        assert_eq!(disable.label_for("1"), Some("Disable"));
        assert_eq!(disable.code_for("Enable"), Some("0"));
        assert_eq!(disable.change, "I");
    }

    #[test]
    fn device_status_skips_unsupported() {
        let device = Device {
            serial: "SN1".into(),
            name: "My Pump".into(),
            ..Default::default()
        };
        let body = json!({"res": "OK", "status": r#"{"X": "h", "Y": "5"}"#});
        let statuses = parse_device_status(&device, &body, Utc::now()).unwrap();
        assert_eq!(statuses.len(), 1);
        let y = &statuses["sn1_y"];
        assert_eq!(y.code, "5");
        assert_eq!(y.unique_id, "my_pump_y");
    }

    #[test]
    fn device_status_without_payload_is_protocol_error() {
        let device = Device::default();
        let err = parse_device_status(&device, &json!({"res": "OK"}), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
