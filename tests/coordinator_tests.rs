mod common;

use std::time::Duration;

use dab_pumps::{
    ClientRegistry, ControlKind, Coordinator, DisplayValue, EntryConfig, Error, UpdateError,
    WriteValue, discover_installations,
};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

fn registry(server: &MockServer) -> ClientRegistry {
    let uri = server.uri();
    ClientRegistry::with_builder(move |b| b.base_url(uri.clone()).retry_delay(Duration::ZERO))
}

fn entry() -> EntryConfig {
    EntryConfig::from_json(&format!(
        r#"{{"username": "{USERNAME}", "password": "{PASSWORD}", "install_id": "ins-1", "install_name": "Holiday home"}}"#
    ))
    .unwrap()
}

#[tokio::test]
async fn refresh_publishes_classified_snapshot() {
    let server = MockServer::start().await;
    mount_portal(&server, &["SN1"]).await;

    let registry = registry(&server);
    let coordinator = Coordinator::from_config(&registry, &entry()).unwrap();
    let mut rx = coordinator.subscribe();
    assert!(coordinator.last_snapshot().is_none());

    let snapshot = coordinator.refresh().await.expect("refresh should succeed");
    rx.changed().await.unwrap();
    let published = rx.borrow().clone().expect("snapshot published");
    assert_eq!(published.fetched_at, snapshot.fetched_at);

    assert_eq!(snapshot.install.name, "Holiday home");
    assert_eq!(snapshot.points.len(), 3);

    let pressure = snapshot.point("sn1_vp_pressurebar").unwrap();
    assert_eq!(pressure.kind, ControlKind::Sensor);
    assert_eq!(pressure.unit.as_deref(), Some("bar"));
    let status = snapshot.status("sn1_vp_pressurebar").unwrap();
    assert_eq!(
        pressure.display(status, snapshot.fetched_at),
        DisplayValue::Number(3.1)
    );

    assert_eq!(snapshot.point("sn1_sp_setpointpressurebar").unwrap().kind, ControlKind::Number);
    assert_eq!(snapshot.point("sn1_powershowerboost").unwrap().kind, ControlKind::Switch);
    assert!(snapshot.point("sn1_x").is_none());
}

#[tokio::test]
async fn failed_refresh_keeps_last_good_snapshot() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_catalog(&server, &["SN1"]).await;
    status_mock("SN1", default_fields()).up_to_n_times(1).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/dumstate/SN1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = registry(&server);
    let coordinator = Coordinator::from_config(&registry, &entry()).unwrap();
    let first = coordinator.refresh().await.unwrap();

    let err = coordinator.refresh().await.unwrap_err();
    assert!(matches!(err, UpdateError::UpdateFailed(Error::Protocol(_))), "got {err:?}");

    let last = coordinator.last_snapshot().expect("previous snapshot kept");
    assert_eq!(last.fetched_at, first.fetched_at);
    assert_eq!(coordinator.control_points().len(), 3);
}

#[tokio::test]
async fn rejected_credentials_surface_as_auth_failure() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/gui/installation/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "res": "ERROR", "code": "FORBIDDEN", "msg": "Forbidden operation"
        })))
        .mount(&server)
        .await;

    let registry = registry(&server);
    let coordinator = Coordinator::from_config(&registry, &entry()).unwrap();
    let err = coordinator.refresh().await.unwrap_err();
    assert!(matches!(err, UpdateError::AuthFailed(_)), "got {err:?}");
    assert!(coordinator.last_snapshot().is_none());
}

#[tokio::test]
async fn number_write_is_scaled_to_wire_value() {
    let server = MockServer::start().await;
    mount_portal(&server, &["SN1"]).await;
    Mock::given(method("POST"))
        .and(path("/dum/SN1"))
        .and(body_json(json!({"key": "SP_SetpointPressureBar", "value": "40"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"res": "OK"})))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry(&server);
    let coordinator = Coordinator::from_config(&registry, &entry()).unwrap();
    coordinator.refresh().await.unwrap();

    coordinator
        .modify("sn1_sp_setpointpressurebar", &WriteValue::Number(4.0))
        .await
        .unwrap();
}

#[tokio::test]
async fn switch_write_uses_option_label() {
    let server = MockServer::start().await;
    mount_portal(&server, &["SN1"]).await;
    // "Enable" is code 0 on this device, so turning on must send "0".
    Mock::given(method("POST"))
        .and(path("/dum/SN1"))
        .and(body_json(json!({"key": "PowerShowerBoost", "value": "0"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"res": "OK"})))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry(&server);
    let coordinator = Coordinator::from_config(&registry, &entry()).unwrap();
    coordinator.refresh().await.unwrap();
    coordinator
        .modify("sn1_powershowerboost", &WriteValue::Switch(true))
        .await
        .unwrap();
}

#[tokio::test]
async fn invalid_writes_are_rejected_locally() {
    let server = MockServer::start().await;
    mount_portal(&server, &["SN1"]).await;
    Mock::given(method("POST"))
        .and(path("/dum/SN1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"res": "OK"})))
        .expect(0)
        .mount(&server)
        .await;

    let registry = registry(&server);
    let coordinator = Coordinator::from_config(&registry, &entry()).unwrap();
    coordinator.refresh().await.unwrap();

    let err = coordinator
        .modify("sn1_sp_setpointpressurebar", &WriteValue::Number(9.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidValue { .. }), "got {err:?}");

    let err = coordinator
        .modify("sn1_vp_pressurebar", &WriteValue::Number(2.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReadOnly(_)), "got {err:?}");

    let err = coordinator
        .modify("sn1_missing", &WriteValue::Press)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownStatus(_)), "got {err:?}");
}

#[tokio::test]
async fn installations_share_one_client_per_account() {
    let server = MockServer::start().await;
    mount_portal(&server, &["SN1"]).await;

    let registry = registry(&server);
    let a = Coordinator::from_config(&registry, &entry()).unwrap();
    let b = Coordinator::from_config(&registry, &entry()).unwrap();
    assert!(std::sync::Arc::ptr_eq(a.client(), b.client()));
    assert_eq!(registry.len(), 1);

    let installs = discover_installations(&registry, USERNAME, &password()).await.unwrap();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].id, "ins-1");

    registry.shutdown().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn energy_counter_ignores_small_decrease_between_cycles() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/gui/installation/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(install_list(&["SN1"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/configuration/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "res": "OK",
            "metadata": {"params": [
                {"name": "TotalEnergy", "type": "measure", "unit": "kWh", "weight": 0.1,
                 "view": ["CUSTOMER"], "change": []}
            ]}
        })))
        .mount(&server)
        .await;
    status_mock("SN1", json!({"TotalEnergy": "1000"})).up_to_n_times(1).mount(&server).await;
    status_mock("SN1", json!({"TotalEnergy": "900"})).up_to_n_times(1).mount(&server).await;
    status_mock("SN1", json!({"TotalEnergy": "300"})).mount(&server).await;

    let registry = registry(&server);
    let coordinator = Coordinator::from_config(&registry, &entry()).unwrap();
    let shown = |snapshot: &dab_pumps::InstallSnapshot| {
        let point = snapshot.point("sn1_totalenergy").unwrap();
        point.display(snapshot.status("sn1_totalenergy").unwrap(), snapshot.fetched_at)
    };

    let first = coordinator.refresh().await.unwrap();
    assert_eq!(shown(&first), DisplayValue::Number(100.0));

    let second = coordinator.refresh().await.unwrap();
    assert_eq!(shown(&second), DisplayValue::Number(100.0));

    let third = coordinator.refresh().await.unwrap();
    assert_eq!(shown(&third), DisplayValue::Number(30.0));
}
