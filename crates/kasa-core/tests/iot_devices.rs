//! IOT devices driven end to end against in-memory fakes.

use std::sync::Arc;

use kasa_core::factory::connect_with;
use kasa_core::feature::FeatureValue;
use kasa_core::protocol::{IotProtocol, Protocol};
use kasa_core::{Device, DeviceConfig, DeviceType, KasaError};
use kasa_transport::fake::fixtures;
use kasa_transport::FakeIotTransport;
use serde_json::Value;

async fn connect_fixture(fixture: Value) -> Device {
    let config = DeviceConfig::new("127.0.0.1");
    let transport = FakeIotTransport::new(fixture);
    let protocol = Protocol::Iot(Arc::new(IotProtocol::new(config, Box::new(transport))));
    connect_with(protocol).await.unwrap()
}

#[tokio::test]
async fn plug_power_cycle() {
    let mut plug = connect_fixture(fixtures::iot_plug()).await;
    assert_eq!(plug.device_type(), DeviceType::Plug);
    assert!(plug.is_on().unwrap());

    plug.turn_off(None).await.unwrap();
    plug.update().await.unwrap();
    assert!(!plug.is_on().unwrap());
    assert!(plug.on_since().unwrap().is_none());

    plug.turn_on(None).await.unwrap();
    plug.update().await.unwrap();
    assert!(plug.is_on().unwrap());
}

#[tokio::test]
async fn plug_alias_rename() {
    let mut plug = connect_fixture(fixtures::iot_plug()).await;
    assert_eq!(plug.alias().unwrap().as_deref(), Some("Bedroom Plug"));

    plug.set_alias("Desk Lamp").await.unwrap();
    plug.update().await.unwrap();
    assert_eq!(plug.alias().unwrap().as_deref(), Some("Desk Lamp"));
}

#[tokio::test]
async fn plug_identity() {
    let plug = connect_fixture(fixtures::iot_plug()).await;
    assert_eq!(plug.model().unwrap(), "HS110(EU)");
    assert_eq!(plug.mac().unwrap(), "50:C7:BF:00:00:01");
    assert_eq!(plug.rssi().unwrap(), Some(-55));
    assert_eq!(plug.host(), "127.0.0.1");
    assert_eq!(plug.port(), 9999);
}

#[tokio::test]
async fn plug_led_toggle() {
    let mut plug = connect_fixture(fixtures::iot_plug()).await;
    let Device::Iot(iot) = &plug else {
        panic!("expected an IOT device");
    };
    assert!(iot.led().unwrap());

    iot.set_led(false).await.unwrap();
    plug.update().await.unwrap();
    let Device::Iot(iot) = &plug else {
        panic!("expected an IOT device");
    };
    assert!(!iot.led().unwrap());
}

#[tokio::test]
async fn plug_emeter() {
    let plug = connect_fixture(fixtures::iot_plug()).await;
    assert!(plug.has_emeter());

    let realtime = plug.emeter_realtime().unwrap();
    assert_eq!(realtime.voltage(), Some(230.5));
    assert_eq!(realtime.power(), Some(25.3));

    let Device::Iot(iot) = &plug else {
        panic!("expected an IOT device");
    };
    let daily = iot.get_emeter_daily(Some(2024), Some(3), false).await.unwrap();
    assert_eq!(daily.get(&1), Some(&300.0));
    assert_eq!(daily.get(&2), Some(&450.0));

    let monthly = iot.get_emeter_monthly(Some(2024), true).await.unwrap();
    assert_eq!(monthly.get(&2), Some(&9.0));
    assert_eq!(monthly.get(&3), Some(&0.75));
}

#[tokio::test]
async fn wallswitch_has_no_emeter() {
    let switch = connect_fixture(fixtures::iot_wallswitch()).await;
    assert_eq!(switch.device_type(), DeviceType::WallSwitch);
    assert!(!switch.has_emeter());
    assert!(switch.emeter_realtime().is_err());
}

#[tokio::test]
async fn plug_wifi_scan() {
    let plug = connect_fixture(fixtures::iot_plug()).await;
    let networks = plug.wifi_scan().await.unwrap();
    let ssids: Vec<&str> = networks.iter().map(|n| n.ssid.as_str()).collect();
    assert_eq!(ssids, ["HomeWifi", "Guest"]);
    assert_eq!(networks[0].key_type.as_deref(), Some("3"));
}

#[tokio::test]
async fn strip_child_control() {
    let mut strip = connect_fixture(fixtures::iot_strip()).await;
    assert_eq!(strip.device_type(), DeviceType::Strip);

    let states: Vec<bool> = strip.children().iter().map(|c| c.is_on()).collect();
    assert_eq!(states, [true, false, true]);

    strip.child(1).unwrap().turn_on().await.unwrap();
    strip.update().await.unwrap();
    assert!(strip.child(1).unwrap().is_on());
    assert!(strip.child(0).unwrap().is_on());

    strip.child(0).unwrap().set_alias("Kettle").await.unwrap();
    strip.update().await.unwrap();
    assert_eq!(strip.child(0).unwrap().alias().as_deref(), Some("Kettle"));
    assert_eq!(strip.child(2).unwrap().alias().as_deref(), Some("Plug 3"));
}

#[tokio::test]
async fn strip_turn_off_switches_every_socket() {
    let mut strip = connect_fixture(fixtures::iot_strip()).await;
    strip.turn_off(None).await.unwrap();
    strip.update().await.unwrap();
    assert!(strip.children().iter().all(|c| !c.is_on()));
    assert!(!strip.is_on().unwrap());
}

#[tokio::test]
async fn strip_child_index_out_of_range() {
    let strip = connect_fixture(fixtures::iot_strip()).await;
    assert!(strip.child(3).is_err());
}

#[tokio::test]
async fn bulb_hsv() {
    let mut bulb = connect_fixture(fixtures::iot_bulb()).await;
    assert_eq!(bulb.device_type(), DeviceType::Bulb);
    assert!(bulb.is_color());

    bulb.set_hsv(200, 50, Some(60), None).await.unwrap();
    bulb.update().await.unwrap();
    let hsv = bulb.hsv().unwrap();
    assert_eq!((hsv.hue, hsv.saturation, hsv.value), (200, 50, 60));
}

#[tokio::test]
async fn bulb_rejects_out_of_range_values() {
    let bulb = connect_fixture(fixtures::iot_bulb()).await;

    let err = bulb.set_hsv(400, 50, None, None).await.unwrap_err();
    assert!(matches!(err, KasaError::InvalidValue(_)));

    let err = bulb.set_brightness(150, None).await.unwrap_err();
    assert!(matches!(err, KasaError::InvalidValue(_)));
}

#[tokio::test]
async fn bulb_brightness_and_power() {
    let mut bulb = connect_fixture(fixtures::iot_bulb()).await;
    bulb.set_brightness(30, Some(0)).await.unwrap();
    bulb.update().await.unwrap();
    assert_eq!(bulb.brightness().unwrap(), 30);

    bulb.turn_off(None).await.unwrap();
    bulb.update().await.unwrap();
    assert!(!bulb.is_on().unwrap());
}

#[tokio::test]
async fn lightstrip_effects() {
    let mut strip = connect_fixture(fixtures::iot_lightstrip()).await;
    assert_eq!(strip.device_type(), DeviceType::LightStrip);
    assert!(strip.has_effects());

    let effects = strip.effect_list().unwrap();
    assert!(effects.contains(&"Aurora"));

    strip.set_effect("Aurora").await.unwrap();
    strip.update().await.unwrap();
    let Device::Iot(iot) = &strip else {
        panic!("expected an IOT device");
    };
    let effect = iot.effect().unwrap().unwrap();
    assert_eq!(effect["name"], "Aurora");
    assert_eq!(effect["enable"], 1);

    assert!(strip.set_effect("Not An Effect").await.is_err());
}

#[tokio::test]
async fn lightstrip_offers_every_built_in_effect() {
    let mut strip = connect_fixture(fixtures::iot_lightstrip()).await;
    let effects = strip.effect_list().unwrap();
    assert_eq!(effects.len(), 17);
    assert!(effects.contains(&"Grandma's Christmas Lights"));

    strip.set_effect("Bubbling Cauldron").await.unwrap();
    strip.update().await.unwrap();
    let Device::Iot(iot) = &strip else {
        panic!("expected an IOT device");
    };
    assert_eq!(iot.effect().unwrap().unwrap()["name"], "Bubbling Cauldron");
}

#[tokio::test]
async fn dimmer_brightness() {
    let mut dimmer = connect_fixture(fixtures::iot_dimmer()).await;
    assert_eq!(dimmer.device_type(), DeviceType::Dimmer);
    assert!(dimmer.is_dimmable());
    assert_eq!(dimmer.brightness().unwrap(), 50);

    dimmer.set_brightness(75, None).await.unwrap();
    dimmer.update().await.unwrap();
    assert_eq!(dimmer.brightness().unwrap(), 75);
}

#[tokio::test]
async fn features_read_and_write() {
    let mut plug = connect_fixture(fixtures::iot_plug()).await;
    assert!(plug.features().get("rssi").is_some());
    assert_eq!(plug.feature_value("rssi").unwrap().as_i64(), Some(-55));
    assert_eq!(plug.feature_value("led").unwrap().as_bool(), Some(true));

    plug.set_feature_value("led", &FeatureValue::Bool(false))
        .await
        .unwrap();
    plug.update().await.unwrap();
    assert_eq!(plug.feature_value("led").unwrap().as_bool(), Some(false));

    assert!(plug.feature_value("no_such_feature").is_err());
}

#[tokio::test]
async fn internal_state_carries_sysinfo() {
    let plug = connect_fixture(fixtures::iot_plug()).await;
    let state = plug.internal_state();
    assert_eq!(state["system"]["get_sysinfo"]["alias"], "Bedroom Plug");
}
