//! SMART devices against the in-memory transport, through the real
//! protocol layer.

use std::sync::Arc;

use kasa_core::factory::connect_with;
use kasa_core::feature::FeatureValue;
use kasa_core::protocol::{Protocol, SmartProtocol};
use kasa_core::{Child, Device, DeviceConfig, DeviceType, KasaError};
use kasa_protocol::{ConnectionType, Credentials, DeviceFamily, EncryptType, SmartErrorCode};
use kasa_transport::fake::fixtures;
use kasa_transport::FakeSmartTransport;
use serde_json::{json, Value};

fn config() -> DeviceConfig {
    DeviceConfig::new("127.0.0.1")
        .with_credentials(Some(Credentials::new("user@example.com", "secret")))
        .with_connection_type(ConnectionType::new(DeviceFamily::SmartTapoPlug, EncryptType::Klap))
}

fn protocol(config: DeviceConfig, transport: FakeSmartTransport) -> Protocol {
    Protocol::Smart(Arc::new(SmartProtocol::new(config, Box::new(transport)).unwrap()))
}

async fn connect_fixture(fixture: Value) -> Device {
    connect_with(protocol(config(), FakeSmartTransport::new(fixture)))
        .await
        .unwrap()
}

#[tokio::test]
async fn plug_power_cycle() {
    let mut plug = connect_fixture(fixtures::smart_plug()).await;
    assert_eq!(plug.device_type(), DeviceType::Plug);
    assert_eq!(plug.model().unwrap(), "P110");
    assert!(plug.is_on().unwrap());

    plug.turn_off(None).await.unwrap();
    plug.update().await.unwrap();
    assert!(!plug.is_on().unwrap());

    plug.turn_on(None).await.unwrap();
    plug.update().await.unwrap();
    assert!(plug.is_on().unwrap());
}

#[tokio::test]
async fn plug_alias_is_base64_on_the_wire() {
    let transport = FakeSmartTransport::new(fixtures::smart_plug());
    let log = transport.log();
    let mut plug = connect_with(protocol(config(), transport)).await.unwrap();
    assert_eq!(plug.alias().unwrap().as_deref(), Some("Living Room Plug"));

    plug.set_alias("Heater").await.unwrap();
    let sent = log.requests().into_iter().any(|request| {
        request.to_string().contains("SGVhdGVy")
    });
    assert!(sent, "nickname should be sent base64 encoded");

    plug.update().await.unwrap();
    assert_eq!(plug.alias().unwrap().as_deref(), Some("Heater"));
}

#[tokio::test]
async fn plug_energy_readings() {
    let plug = connect_fixture(fixtures::smart_plug()).await;
    assert!(plug.has_emeter());
    assert_eq!(plug.emeter_today().unwrap(), Some(0.1));
    assert_eq!(plug.emeter_this_month().unwrap(), Some(3.0));
    assert!(plug.emeter_realtime().unwrap().power().is_some());
}

#[tokio::test]
async fn plug_wifi_scan_decodes_ssid() {
    let plug = connect_fixture(fixtures::smart_plug()).await;
    let networks = plug.wifi_scan().await.unwrap();
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0].ssid, "HomeWifi");
    assert_eq!(networks[0].key_type.as_deref(), Some("wpa2_psk"));
}

#[tokio::test]
async fn raw_call_surfaces_device_errors() {
    let plug = connect_fixture(fixtures::smart_plug()).await;
    let Device::Smart(smart) = &plug else {
        panic!("expected a SMART device");
    };

    let info = smart.call("get_device_info", Value::Null).await.unwrap();
    assert_eq!(info["model"], "P110");

    let err = smart.call("get_no_such_thing", json!({})).await.unwrap_err();
    assert_eq!(err.error_code(), Some(SmartErrorCode::UnknownMethodError));
}

#[tokio::test]
async fn strip_children() {
    let mut strip = connect_fixture(fixtures::smart_strip()).await;
    assert_eq!(strip.device_type(), DeviceType::Strip);

    let aliases: Vec<Option<String>> = strip.children().iter().map(Child::alias).collect();
    assert_eq!(
        aliases,
        [
            Some("Plug 1".to_string()),
            Some("Plug 2".to_string()),
            Some("Plug 3".to_string())
        ]
    );
    assert!(!strip.child(1).unwrap().is_on());

    strip.child(1).unwrap().turn_on().await.unwrap();
    strip.update().await.unwrap();
    assert!(strip.child(1).unwrap().is_on());

    strip.child(2).unwrap().turn_off().await.unwrap();
    strip.update().await.unwrap();
    assert!(!strip.child(2).unwrap().is_on());
    assert!(strip.child(0).unwrap().is_on());
}

#[tokio::test]
async fn strip_child_rename() {
    let mut strip = connect_fixture(fixtures::smart_strip()).await;
    strip.child(0).unwrap().set_alias("Monitor").await.unwrap();
    strip.update().await.unwrap();
    assert_eq!(strip.child(0).unwrap().alias().as_deref(), Some("Monitor"));
}

#[tokio::test]
async fn hub_sensor_readings() {
    let hub = connect_fixture(fixtures::smart_hub()).await;
    assert_eq!(hub.device_type(), DeviceType::Hub);

    let children = hub.children();
    assert_eq!(children.len(), 1);
    let Child::Smart(sensor) = children[0] else {
        panic!("expected a SMART child");
    };
    assert_eq!(sensor.device_type(), DeviceType::Sensor);
    assert_eq!(sensor.alias().unwrap().as_deref(), Some("Bathroom Sensor"));
    assert_eq!(sensor.feature_value("humidity").unwrap(), FeatureValue::Int(61));
    assert_eq!(
        sensor.feature_value("humidity_warning").unwrap(),
        FeatureValue::Bool(true)
    );
    assert_eq!(
        sensor.feature_value("temperature").unwrap(),
        FeatureValue::Float(21.4)
    );
}

#[tokio::test]
async fn bulb_light_controls() {
    let mut bulb = connect_fixture(fixtures::smart_bulb()).await;
    assert_eq!(bulb.device_type(), DeviceType::Bulb);
    assert!(bulb.is_color());
    assert!(bulb.is_dimmable());
    assert_eq!(bulb.valid_temperature_range().unwrap(), (2500, 6500));

    bulb.set_brightness(40, None).await.unwrap();
    bulb.update().await.unwrap();
    assert_eq!(bulb.brightness().unwrap(), 40);

    bulb.set_hsv(240, 80, None, None).await.unwrap();
    bulb.update().await.unwrap();
    let hsv = bulb.hsv().unwrap();
    assert_eq!((hsv.hue, hsv.saturation), (240, 80));

    bulb.set_color_temp(4000, None).await.unwrap();
    bulb.update().await.unwrap();
    assert_eq!(bulb.color_temp().unwrap(), 4000);
}

#[tokio::test]
async fn bulb_color_temp_out_of_range() {
    let bulb = connect_fixture(fixtures::smart_bulb()).await;
    let err = bulb.set_color_temp(7000, None).await.unwrap_err();
    assert!(matches!(err, KasaError::InvalidValue(_)));
    assert_eq!(
        err.to_string(),
        "Temperature should be between 2500 and 6500, was 7000"
    );
}

#[tokio::test]
async fn update_requires_credentials() {
    let config = DeviceConfig::new("127.0.0.1").with_connection_type(ConnectionType::new(
        DeviceFamily::SmartTapoPlug,
        EncryptType::Klap,
    ));
    let err = connect_with(protocol(config, FakeSmartTransport::new(fixtures::smart_plug())))
        .await
        .unwrap_err();
    assert!(matches!(err, KasaError::Authentication { .. }));
}

#[tokio::test]
async fn batch_failure_is_reported() {
    let transport = FakeSmartTransport::new(fixtures::smart_plug())
        .with_method_error("component_nego", SmartErrorCode::UnknownMethodError);
    let err = connect_with(protocol(config(), transport)).await.unwrap_err();
    assert!(err.to_string().contains("component_nego"));
}
