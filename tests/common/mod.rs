//! Mock DConnect portal shared by the integration tests.
#![allow(dead_code)]

use std::time::Duration;

use dab_pumps::{DabPumpsClient, DabPumpsClientBuilder};
use secrecy::SecretString;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const USERNAME: &str = "me@example.com";
pub const PASSWORD: &str = "hunter2";

pub fn password() -> SecretString {
    SecretString::from(PASSWORD.to_string())
}

pub fn builder(server: &MockServer) -> DabPumpsClientBuilder {
    DabPumpsClient::builder(USERNAME, password())
        .base_url(server.uri())
        .retry_delay(Duration::ZERO)
}

pub fn client(server: &MockServer) -> DabPumpsClient {
    builder(server).build().unwrap()
}

pub fn login_page() -> String {
    r#"<html><body>
        <form id="kc-form-login" action="/auth/login-actions/authenticate?session_code=abc&amp;tab_id=x" method="post">
          <input name="username"/><input name="password" type="password"/>
        </form>
    </body></html>"#
        .to_string()
}

pub async fn mount_login(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(login_page()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login-actions/authenticate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/logout"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

pub fn install_list(serials: &[&str]) -> Value {
    let dums: Vec<Value> = serials
        .iter()
        .map(|serial| {
            json!({
                "serial": serial,
                "name": format!("Esybox {serial}"),
                "distro_embedded": "esybox",
                "version_embedded": "5.1",
                "configuration_id": "42",
            })
        })
        .collect();
    json!({
        "res": "OK",
        "data": {"installation_map": {
            "ins-1": {
                "installation_id": "ins-1",
                "name": "Holiday home",
                "user_role": "CUSTOMER",
                "dums": dums,
            }
        }}
    })
}

pub fn config_42() -> Value {
    json!({
        "res": "OK",
        "configuration_id": "42",
        "label": "Esybox",
        "metadata": {"params": [
            {"name": "VP_PressureBar", "type": "measure", "unit": "bar", "weight": 0.1,
             "group": "Pressure", "view": ["CUSTOMER", "INSTALLER"], "change": []},
            {"name": "SP_SetpointPressureBar", "type": "measure", "unit": "bar", "weight": 0.1,
             "min": 1, "max": 6, "group": "Setpoint",
             "view": ["CUSTOMER", "INSTALLER"], "change": ["CUSTOMER", "INSTALLER"]},
            {"name": "PowerShowerBoost", "type": "enum", "group": "Extra Comfort",
             "view": ["CUSTOMER"], "change": ["CUSTOMER"],
             "values": [["0", "Enable"], ["1", "Disable"]]},
            {"name": "X", "type": "measure", "view": ["CUSTOMER"], "change": []}
        ]}
    })
}

/// `/dumstate` body; the vendor wraps the field map in a JSON string.
pub fn dumstate(fields: Value) -> Value {
    json!({"res": "OK", "status": fields.to_string()})
}

pub fn default_fields() -> Value {
    json!({
        "VP_PressureBar": "31",
        "SP_SetpointPressureBar": "35",
        "PowerShowerBoost": "0",
        "X": "h",
    })
}

pub async fn mount_catalog(server: &MockServer, serials: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/api/v1/gui/installation/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(install_list(serials)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configuration/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(config_42()))
        .mount(server)
        .await;
}

pub fn status_mock(serial: &str, fields: Value) -> Mock {
    Mock::given(method("GET"))
        .and(path(format!("/dumstate/{serial}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(dumstate(fields)))
}

/// Portal with one installation holding `serials`, all reporting
/// [`default_fields`].
pub async fn mount_portal(server: &MockServer, serials: &[&str]) {
    mount_login(server).await;
    mount_catalog(server, serials).await;
    for serial in serials {
        status_mock(serial, default_fields()).mount(server).await;
    }
}
