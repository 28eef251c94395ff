//! A device of either protocol family behind one interface.
//!
//! Family-specific operations stay on [`IotDevice`] and [`SmartDevice`];
//! `Device` covers what both can do and dispatches to the right one.

use chrono::NaiveDateTime;
use kasa_protocol::{DeviceConfig, DeviceType, EmeterStatus, KasaError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::feature::{FeatureSet, FeatureValue};
use crate::iot::{Hsv, IotDevice, IotStripPlug, Location};
use crate::smart::{decode_base64, SmartDevice};

/// A network found by a wifi scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WifiNetwork {
    pub ssid: String,
    pub key_type: Option<String>,
    pub cipher_type: Option<i64>,
    pub bssid: Option<String>,
    pub channel: Option<i64>,
    pub rssi: Option<i64>,
    pub signal_level: Option<i64>,
}

impl WifiNetwork {
    pub(crate) fn from_iot(entry: &Value) -> Self {
        let key_type = match &entry["key_type"] {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        };
        Self {
            ssid: entry["ssid"].as_str().unwrap_or_default().to_string(),
            key_type,
            cipher_type: entry["cipher_type"].as_i64(),
            bssid: entry["bssid"].as_str().map(str::to_string),
            channel: entry["channel"].as_i64(),
            rssi: entry["rssi"].as_i64(),
            signal_level: entry["signal_level"].as_i64(),
        }
    }

    /// SMART devices report the ssid base64-encoded.
    pub(crate) fn from_smart(entry: &Value) -> Self {
        let mut network = Self::from_iot(entry);
        if let Some(ssid) = entry["ssid"].as_str().and_then(decode_base64) {
            network.ssid = ssid;
        }
        network
    }
}

/// A child of a strip or hub.
#[derive(Debug, Clone, Copy)]
pub enum Child<'a> {
    Iot(&'a IotStripPlug),
    Smart(&'a SmartDevice),
}

impl Child<'_> {
    pub fn alias(&self) -> Option<String> {
        match self {
            Self::Iot(plug) => plug.alias(),
            Self::Smart(device) => device.alias().ok().flatten(),
        }
    }

    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Iot(plug) => plug.device_type(),
            Self::Smart(device) => device.device_type(),
        }
    }

    pub fn is_on(&self) -> bool {
        match self {
            Self::Iot(plug) => plug.is_on(),
            Self::Smart(device) => device.is_on().unwrap_or(false),
        }
    }

    pub async fn turn_on(&self) -> Result<()> {
        match self {
            Self::Iot(plug) => plug.turn_on().await,
            Self::Smart(device) => device.turn_on().await,
        }
    }

    pub async fn turn_off(&self) -> Result<()> {
        match self {
            Self::Iot(plug) => plug.turn_off().await,
            Self::Smart(device) => device.turn_off().await,
        }
    }

    pub async fn set_alias(&self, alias: &str) -> Result<()> {
        match self {
            Self::Iot(plug) => plug.set_alias(alias).await,
            Self::Smart(device) => device.set_alias(alias).await,
        }
    }
}

#[derive(Debug)]
pub enum Device {
    Iot(IotDevice),
    Smart(SmartDevice),
}

impl Device {
    pub fn host(&self) -> &str {
        match self {
            Self::Iot(d) => d.host(),
            Self::Smart(d) => d.host(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Iot(d) => d.port(),
            Self::Smart(d) => d.port(),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        match self {
            Self::Iot(d) => d.protocol().config(),
            Self::Smart(d) => d.config(),
        }
    }

    pub async fn credentials_hash(&self) -> Option<String> {
        match self {
            Self::Iot(d) => d.protocol().credentials_hash().await,
            Self::Smart(d) => d.credentials_hash().await,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Iot(d) => d.device_type(),
            Self::Smart(d) => d.device_type(),
        }
    }

    pub async fn update(&mut self) -> Result<()> {
        match self {
            Self::Iot(d) => d.update().await,
            Self::Smart(d) => d.update().await,
        }
    }

    pub fn update_from_discover_info(&mut self, info: Value) {
        match self {
            Self::Iot(d) => d.update_from_discover_info(info),
            Self::Smart(d) => d.update_from_discover_info(info),
        }
    }

    pub fn internal_state(&self) -> Value {
        match self {
            Self::Iot(d) => d.internal_state(),
            Self::Smart(d) => d.internal_state(),
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        match self {
            Self::Iot(d) => d.disconnect().await,
            Self::Smart(d) => d.disconnect().await,
        }
    }

    pub fn alias(&self) -> Result<Option<String>> {
        match self {
            Self::Iot(d) => d.alias(),
            Self::Smart(d) => d.alias(),
        }
    }

    pub async fn set_alias(&self, alias: &str) -> Result<()> {
        match self {
            Self::Iot(d) => d.set_alias(alias).await,
            Self::Smart(d) => d.set_alias(alias).await,
        }
    }

    pub fn model(&self) -> Result<String> {
        match self {
            Self::Iot(d) => d.model(),
            Self::Smart(d) => d.model(),
        }
    }

    pub fn mac(&self) -> Result<String> {
        match self {
            Self::Iot(d) => d.mac(),
            Self::Smart(d) => d.mac(),
        }
    }

    pub fn device_id(&self) -> Result<String> {
        match self {
            Self::Iot(d) => d.device_id(),
            Self::Smart(d) => d.device_id(),
        }
    }

    pub fn rssi(&self) -> Result<Option<i64>> {
        match self {
            Self::Iot(d) => d.rssi(),
            Self::Smart(d) => d.rssi(),
        }
    }

    pub fn hw_info(&self) -> Result<Map<String, Value>> {
        match self {
            Self::Iot(d) => d.hw_info(),
            Self::Smart(d) => d.hw_info(),
        }
    }

    pub fn location(&self) -> Result<Location> {
        match self {
            Self::Iot(d) => d.location(),
            Self::Smart(d) => d.location(),
        }
    }

    pub fn time(&self) -> Result<NaiveDateTime> {
        match self {
            Self::Iot(d) => d.time(),
            Self::Smart(d) => Ok(d.time()),
        }
    }

    pub fn is_on(&self) -> Result<bool> {
        match self {
            Self::Iot(d) => d.is_on(),
            Self::Smart(d) => d.is_on(),
        }
    }

    pub fn on_since(&self) -> Result<Option<NaiveDateTime>> {
        match self {
            Self::Iot(d) => d.on_since(),
            Self::Smart(d) => d.on_since(),
        }
    }

    pub async fn turn_on(&self, transition: Option<i64>) -> Result<()> {
        match self {
            Self::Iot(d) => d.turn_on(transition).await,
            Self::Smart(d) => d.turn_on().await,
        }
    }

    pub async fn turn_off(&self, transition: Option<i64>) -> Result<()> {
        match self {
            Self::Iot(d) => d.turn_off(transition).await,
            Self::Smart(d) => d.turn_off().await,
        }
    }

    pub async fn reboot(&self, delay: u64) -> Result<()> {
        match self {
            Self::Iot(d) => d.reboot(delay).await,
            Self::Smart(d) => d.reboot(delay).await,
        }
    }

    pub async fn factory_reset(&self) -> Result<()> {
        match self {
            Self::Iot(d) => d.factory_reset().await,
            Self::Smart(d) => d.factory_reset().await,
        }
    }

    pub async fn wifi_scan(&self) -> Result<Vec<WifiNetwork>> {
        match self {
            Self::Iot(d) => d.wifi_scan().await,
            Self::Smart(d) => d.wifi_scan().await,
        }
    }

    pub async fn wifi_join(&self, ssid: &str, password: &str, key_type: i64) -> Result<()> {
        match self {
            Self::Iot(d) => d.wifi_join(ssid, password, key_type).await,
            Self::Smart(_) => Err(KasaError::kasa("wifi join is not supported on this device")),
        }
    }

    // Features.

    pub fn features(&self) -> &FeatureSet {
        match self {
            Self::Iot(d) => d.features(),
            Self::Smart(d) => d.features(),
        }
    }

    pub fn feature_value(&self, id: &str) -> Result<FeatureValue> {
        match self {
            Self::Iot(d) => d.feature_value(id),
            Self::Smart(d) => d.feature_value(id),
        }
    }

    pub async fn set_feature_value(&self, id: &str, value: &FeatureValue) -> Result<()> {
        match self {
            Self::Iot(d) => d.set_feature_value(id, value).await,
            Self::Smart(d) => d.set_feature_value(id, value).await,
        }
    }

    // Children.

    pub fn children(&self) -> Vec<Child<'_>> {
        match self {
            Self::Iot(d) => d.children().iter().map(Child::Iot).collect(),
            Self::Smart(d) => d.children().iter().map(Child::Smart).collect(),
        }
    }

    pub fn child(&self, index: usize) -> Result<Child<'_>> {
        match self {
            Self::Iot(d) => d.child(index).map(Child::Iot),
            Self::Smart(d) => d.child(index).map(Child::Smart),
        }
    }

    // Energy.

    pub fn has_emeter(&self) -> bool {
        match self {
            Self::Iot(d) => d.has_emeter(),
            Self::Smart(d) => d.has_emeter(),
        }
    }

    pub fn emeter_realtime(&self) -> Result<EmeterStatus> {
        match self {
            Self::Iot(d) => d.emeter_realtime(),
            Self::Smart(d) => d.emeter_realtime(),
        }
    }

    /// Today's consumption in kWh.
    pub fn emeter_today(&self) -> Result<Option<f64>> {
        match self {
            Self::Iot(d) => d.emeter_today(),
            Self::Smart(d) => d.emeter_today(),
        }
    }

    /// This month's consumption in kWh.
    pub fn emeter_this_month(&self) -> Result<Option<f64>> {
        match self {
            Self::Iot(d) => d.emeter_this_month(),
            Self::Smart(d) => d.emeter_this_month(),
        }
    }

    // Lights.

    pub fn is_bulb(&self) -> bool {
        matches!(
            self.device_type(),
            DeviceType::Bulb | DeviceType::LightStrip
        )
    }

    pub fn is_color(&self) -> bool {
        match self {
            Self::Iot(d) => d.is_color(),
            Self::Smart(d) => d.is_color(),
        }
    }

    pub fn is_dimmable(&self) -> bool {
        match self {
            Self::Iot(d) => d.is_dimmable(),
            Self::Smart(d) => d.is_dimmable(),
        }
    }

    pub fn is_variable_color_temp(&self) -> bool {
        match self {
            Self::Iot(d) => d.is_variable_color_temp(),
            Self::Smart(d) => d.is_variable_color_temp(),
        }
    }

    pub fn valid_temperature_range(&self) -> Result<(i64, i64)> {
        match self {
            Self::Iot(d) => d.valid_temperature_range(),
            Self::Smart(d) => d.valid_temperature_range(),
        }
    }

    pub fn brightness(&self) -> Result<i64> {
        match self {
            Self::Iot(d) => d.brightness(),
            Self::Smart(d) => d.brightness(),
        }
    }

    pub async fn set_brightness(&self, brightness: i64, transition: Option<i64>) -> Result<()> {
        match self {
            Self::Iot(d) => d.set_brightness(brightness, transition).await,
            Self::Smart(d) => d.set_brightness(brightness).await,
        }
    }

    pub fn hsv(&self) -> Result<Hsv> {
        match self {
            Self::Iot(d) => d.hsv(),
            Self::Smart(d) => d.hsv(),
        }
    }

    pub async fn set_hsv(
        &self,
        hue: i64,
        saturation: i64,
        value: Option<i64>,
        transition: Option<i64>,
    ) -> Result<()> {
        match self {
            Self::Iot(d) => d
                .set_hsv(hue, saturation, value, transition)
                .await
                .map(|_| ()),
            Self::Smart(d) => d.set_hsv(hue, saturation, value).await,
        }
    }

    pub fn color_temp(&self) -> Result<i64> {
        match self {
            Self::Iot(d) => d.color_temp(),
            Self::Smart(d) => d.color_temp(),
        }
    }

    pub async fn set_color_temp(&self, temp: i64, transition: Option<i64>) -> Result<()> {
        match self {
            Self::Iot(d) => d.set_color_temp(temp, None, transition).await.map(|_| ()),
            Self::Smart(d) => d.set_color_temp(temp).await,
        }
    }

    pub fn has_effects(&self) -> bool {
        match self {
            Self::Iot(d) => d.has_effects(),
            Self::Smart(d) => d.has_effects(),
        }
    }

    pub fn effect_list(&self) -> Option<Vec<&'static str>> {
        match self {
            Self::Iot(d) => d.effect_list(),
            Self::Smart(d) => d.effect_list(),
        }
    }

    pub async fn set_effect(&self, name: &str) -> Result<()> {
        match self {
            Self::Iot(d) => d.set_effect(name, None, None).await,
            Self::Smart(d) => d.set_effect(name).await,
        }
    }
}
