//! IOT (legacy Kasa) devices.
//!
//! Every IOT device shares one struct; [`IotKind`] selects the services and
//! behaviours that differ between plugs, switches, bulbs, light strips,
//! dimmers and power strips. State is cached from the last `update()` and
//! accessors read from that cache.

pub mod bulb;
pub mod effects;
pub mod modules;
mod plug;
pub mod strip;

use std::sync::Arc;

use chrono::{Duration, Local, NaiveDateTime};
use kasa_protocol::{DeviceType, KasaError, Result};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::device::WifiNetwork;
use crate::feature::{Feature, FeatureSet, FeatureType, FeatureValue, DEVICE_CONTAINER};
use crate::protocol::IotProtocol;

pub use bulb::{BehaviorMode, BulbPreset, Hsv, TurnOnBehavior, TurnOnBehaviors};
pub use modules::{convert_stat_data, Cloud, Emeter, IotModule, Time};
pub use strip::IotStripPlug;

const SYSINFO_RESPONSE_SIZE: usize = 1024;
const MAX_RESPONSE_SIZE: usize = 16 * 1024;
const BULB_MAX_RESPONSE_SIZE: usize = 4096;

const NOT_UPDATED: &str = "You need to await update() to access the data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IotKind {
    Plug,
    WallSwitch,
    Bulb,
    LightStrip,
    Dimmer,
    Strip,
}

impl IotKind {
    pub fn device_type(self) -> DeviceType {
        match self {
            Self::Plug => DeviceType::Plug,
            Self::WallSwitch => DeviceType::WallSwitch,
            Self::Bulb => DeviceType::Bulb,
            Self::LightStrip => DeviceType::LightStrip,
            Self::Dimmer => DeviceType::Dimmer,
            Self::Strip => DeviceType::Strip,
        }
    }

    pub fn is_bulb(self) -> bool {
        matches!(self, Self::Bulb | Self::LightStrip)
    }

    fn emeter_target(self) -> &'static str {
        if self.is_bulb() {
            "smartlife.iot.common.emeter"
        } else {
            "emeter"
        }
    }

    fn cloud_target(self) -> &'static str {
        if self.is_bulb() {
            "smartlife.iot.common.cloud"
        } else {
            "cnCloud"
        }
    }

    fn time_target(self) -> &'static str {
        if self.is_bulb() {
            "smartlife.iot.common.timesetting"
        } else {
            "time"
        }
    }

    fn system_target(self) -> &'static str {
        if self.is_bulb() {
            "smartlife.iot.common.system"
        } else {
            "system"
        }
    }

    fn max_response_size(self) -> usize {
        if self.is_bulb() {
            BULB_MAX_RESPONSE_SIZE
        } else {
            MAX_RESPONSE_SIZE
        }
    }
}

/// Build `{target: {cmd: arg}}`, addressed to strip sockets when `child_ids`
/// is given.
pub(crate) fn create_request(
    target: &str,
    cmd: &str,
    arg: Option<Value>,
    child_ids: Option<&[String]>,
) -> Value {
    let mut request = json!({target: {cmd: arg.unwrap_or_else(|| json!({}))}});
    if let Some(ids) = child_ids {
        request["context"] = json!({"child_ids": ids});
    }
    request
}

fn err_code(value: &Value) -> i64 {
    value.get("err_code").and_then(Value::as_i64).unwrap_or(0)
}

/// Run a single command and unwrap its result.
pub(crate) async fn query_helper(
    protocol: &IotProtocol,
    target: &str,
    cmd: &str,
    arg: Option<Value>,
    child_ids: Option<&[String]>,
) -> Result<Value> {
    let request = create_request(target, cmd, arg, child_ids);
    let response = match protocol.query(&request).await {
        Ok(response) => response,
        Err(e @ KasaError::Authentication { .. }) => return Err(e),
        Err(e) => {
            return Err(KasaError::kasa(format!(
                "Communication error on {target}:{cmd}: {e}"
            )))
        }
    };

    let service = response
        .get(target)
        .ok_or_else(|| KasaError::kasa(format!("No required {target} in response: {response}")))?;
    if err_code(service) != 0 {
        return Err(KasaError::kasa(format!("Error on {target}.{cmd}: {service}")));
    }
    let result = service
        .get(cmd)
        .ok_or_else(|| KasaError::kasa(format!("No command in response: {response}")))?;
    if err_code(result) != 0 {
        return Err(KasaError::kasa(format!("Error on {target} {cmd}: {result}")));
    }

    let mut result = result.clone();
    if let Some(map) = result.as_object_mut() {
        map.remove("err_code");
    }
    Ok(result)
}

/// Recursively merge objects in `source` into `target`.
pub(crate) fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                let nested = value.is_object() && target.get(&key).is_some_and(Value::is_object);
                match target.get_mut(&key) {
                    Some(existing) if nested => merge_json(existing, value),
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

pub(crate) fn sys_info_from(response: &Value) -> Result<Value> {
    response["system"]
        .get("get_sysinfo")
        .filter(|info| info.is_object())
        .cloned()
        .ok_or_else(|| KasaError::kasa(format!("Unable to read sysinfo from response: {response}")))
}

/// Physical location reported by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub struct IotDevice {
    protocol: Arc<IotProtocol>,
    kind: IotKind,
    sys_info: Value,
    last_update: Option<Value>,
    discovery_info: Option<Value>,
    modules: Vec<Box<dyn IotModule>>,
    features: FeatureSet,
    children: Vec<IotStripPlug>,
}

impl std::fmt::Debug for IotDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.alias() {
            Ok(Some(alias)) => write!(
                f,
                "<{} at {} - {alias}>",
                self.kind.device_type(),
                self.host()
            ),
            _ => write!(f, "<{} at {} - update() needed>", self.kind.device_type(), self.host()),
        }
    }
}

impl IotDevice {
    pub fn new(protocol: Arc<IotProtocol>, kind: IotKind) -> Self {
        let modules: Vec<Box<dyn IotModule>> = vec![
            Box::new(Time::new(kind.time_target())),
            Box::new(Cloud::new(kind.cloud_target())),
        ];
        Self {
            protocol,
            kind,
            sys_info: Value::Null,
            last_update: None,
            discovery_info: None,
            modules,
            features: FeatureSet::default(),
            children: Vec::new(),
        }
    }

    pub fn host(&self) -> &str {
        self.protocol.host()
    }

    pub fn port(&self) -> u16 {
        self.protocol.port()
    }

    pub fn protocol(&self) -> &Arc<IotProtocol> {
        &self.protocol
    }

    pub fn kind(&self) -> IotKind {
        self.kind
    }

    pub fn device_type(&self) -> DeviceType {
        self.kind.device_type()
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    /// Raw sysinfo from the last update.
    pub fn sys_info(&self) -> Result<&Value> {
        if self.sys_info.is_object() {
            Ok(&self.sys_info)
        } else {
            Err(KasaError::kasa(NOT_UPDATED))
        }
    }

    /// Everything the device last returned, or its discovery payload.
    pub fn internal_state(&self) -> Value {
        self.last_update
            .clone()
            .or_else(|| self.discovery_info.clone())
            .unwrap_or(Value::Null)
    }

    /// Seed state from a discovery reply so basic accessors work before the
    /// first update.
    ///
    /// A full `get_sysinfo` response counts as the initial update.
    pub fn update_from_discover_info(&mut self, info: Value) {
        self.discovery_info = Some(info.clone());
        match sys_info_from(&info) {
            Ok(sys_info) => {
                self.sys_info = sys_info;
                self.last_update = Some(info);
            }
            Err(_) => self.sys_info = info,
        }
    }

    pub async fn update(&mut self) -> Result<()> {
        let request = create_request("system", "get_sysinfo", None, None);

        if self.last_update.is_none() {
            debug!("Performing the initial update to obtain sysinfo");
            let response = self.protocol.query(&request).await?;
            self.sys_info = sys_info_from(&response)?;
            self.last_update = Some(response);
        }

        self.modular_update(request).await?;
        let update = self.last_update.as_ref().unwrap_or(&Value::Null);
        self.sys_info = sys_info_from(update)?;

        if self.kind == IotKind::Strip {
            self.update_children().await?;
        }
        if self.features.is_empty() {
            self.initialize_features()?;
        }
        Ok(())
    }

    async fn modular_update(&mut self, request: Value) -> Result<()> {
        if self.has_emeter() && !self.has_module("emeter") {
            self.modules
                .push(Box::new(Emeter::new(self.kind.emeter_target())));
        }

        let max_size = self.kind.max_response_size();
        let mut requests = Vec::new();
        let mut request = request;
        let mut estimated = SYSINFO_RESPONSE_SIZE;
        for module in &self.modules {
            if !self.module_supported(module.as_ref()) {
                debug!("Module {} not supported, skipping", module.name());
                continue;
            }
            let size = module.estimated_query_response_size();
            estimated += size;
            if estimated > max_size {
                requests.push(std::mem::replace(&mut request, json!({})));
                estimated = size;
            }
            merge_json(&mut request, module.query());
        }
        requests.push(request);

        let mut update = self.last_update.clone().unwrap_or_else(|| json!({}));
        for request in requests.iter().filter(|r| r.as_object().is_some_and(|r| !r.is_empty())) {
            let response = self.protocol.query(request).await?;
            if let (Some(update), Value::Object(response)) = (update.as_object_mut(), response) {
                update.extend(response);
            }
        }
        self.last_update = Some(update);
        Ok(())
    }

    fn has_module(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name() == name)
    }

    fn module(&self, name: &str) -> Option<&dyn IotModule> {
        self.modules
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }

    /// A module is supported until its service answers with an error.
    fn module_supported(&self, module: &dyn IotModule) -> bool {
        self.last_update
            .as_ref()
            .and_then(|update| update.get(module.target()))
            .map_or(true, |data| err_code(data) == 0)
    }

    /// Data the device returned for a module's service.
    fn module_data(&self, name: &str) -> Result<&Value> {
        let module = self
            .module(name)
            .ok_or_else(|| KasaError::kasa(format!("Device has no {name} module")))?;
        let data = self
            .last_update
            .as_ref()
            .and_then(|update| update.get(module.target()))
            .ok_or_else(|| KasaError::kasa(NOT_UPDATED))?;
        if err_code(data) != 0 {
            return Err(KasaError::kasa(format!("Module {name} is not supported: {data}")));
        }
        Ok(data)
    }

    pub fn supported_modules(&self) -> Vec<&'static str> {
        self.modules
            .iter()
            .filter(|m| self.module_supported(m.as_ref()))
            .map(|m| m.name())
            .collect()
    }

    fn initialize_features(&mut self) -> Result<()> {
        let mut features = FeatureSet::default();
        features.add(
            Feature::new("RSSI", DEVICE_CONTAINER, "rssi", FeatureType::Sensor)
                .with_icon("mdi:signal")
                .with_unit("dBm"),
        )?;
        if self.sys_info.get("on_time").is_some() {
            features.add(
                Feature::new("On since", DEVICE_CONTAINER, "on_since", FeatureType::Sensor)
                    .with_icon("mdi:clock"),
            )?;
        }

        match self.kind {
            IotKind::Bulb | IotKind::LightStrip => {
                if self.is_dimmable() {
                    features.add(
                        Feature::new("Brightness", DEVICE_CONTAINER, "brightness", FeatureType::Number)
                            .with_setter("set_brightness")
                            .with_range(1, 100),
                    )?;
                }
                if self.is_variable_color_temp() {
                    let (min, max) = self.valid_temperature_range()?;
                    features.add(
                        Feature::new("Color temperature", DEVICE_CONTAINER, "color_temp", FeatureType::Number)
                            .with_setter("set_color_temp")
                            .with_range(min, max),
                    )?;
                }
            }
            _ => {
                features.add(
                    Feature::new("LED", DEVICE_CONTAINER, "led", FeatureType::Switch)
                        .with_setter("set_led"),
                )?;
                if self.kind == IotKind::Dimmer {
                    features.add(
                        Feature::new("Brightness", DEVICE_CONTAINER, "brightness", FeatureType::Number)
                            .with_setter("set_brightness")
                            .with_range(1, 100),
                    )?;
                }
            }
        }

        for module in &self.modules {
            if self.module_supported(module.as_ref()) {
                for feature in module.features() {
                    features.add(feature)?;
                }
            }
        }
        self.features = features;
        Ok(())
    }

    /// Current value of a feature by id.
    pub fn feature_value(&self, id: &str) -> Result<FeatureValue> {
        let feature = self
            .features
            .get(id)
            .ok_or_else(|| KasaError::kasa(format!("No feature named {id}")))?;
        if feature.container == DEVICE_CONTAINER {
            return self.read_attribute(&feature.attribute_getter);
        }
        let module = self
            .module(&feature.container)
            .ok_or_else(|| KasaError::kasa(format!("Device has no {} module", feature.container)))?;
        module.read(&feature.attribute_getter, self.module_data(&feature.container)?)
    }

    /// Write a feature. The cached state is refreshed on the next update.
    pub async fn set_feature_value(&self, id: &str, value: &FeatureValue) -> Result<()> {
        let feature = self
            .features
            .get(id)
            .ok_or_else(|| KasaError::kasa(format!("No feature named {id}")))?;
        let setter = feature.validate(value)?;
        let invalid = || KasaError::invalid_value(format!("Invalid value for {id}: {value}"));
        match setter {
            "set_led" => self.set_led(value.as_bool().ok_or_else(invalid)?).await,
            "set_brightness" => self
                .set_brightness(value.as_i64().ok_or_else(invalid)?, None)
                .await
                .map(|_| ()),
            "set_color_temp" => self
                .set_color_temp(value.as_i64().ok_or_else(invalid)?, None, None)
                .await
                .map(|_| ()),
            other => Err(KasaError::kasa(format!("Unknown setter {other}"))),
        }
    }

    fn read_attribute(&self, attribute: &str) -> Result<FeatureValue> {
        let optional_int = |v: Option<i64>| v.map_or(FeatureValue::None, FeatureValue::Int);
        Ok(match attribute {
            "rssi" => optional_int(self.rssi()?),
            "on_since" => self.on_since()?.map_or(FeatureValue::None, FeatureValue::Time),
            "led" => FeatureValue::Bool(self.led()?),
            "brightness" => FeatureValue::Int(self.brightness()?),
            "color_temp" => FeatureValue::Int(self.color_temp()?),
            other => return Err(KasaError::kasa(format!("Unknown attribute {other}"))),
        })
    }

    // Common accessors.

    pub fn alias(&self) -> Result<Option<String>> {
        Ok(self.sys_info()?["alias"].as_str().map(str::to_string))
    }

    pub fn model(&self) -> Result<String> {
        Ok(self.sys_info()?["model"].as_str().unwrap_or_default().to_string())
    }

    pub fn mac(&self) -> Result<String> {
        let info = self.sys_info()?;
        if let Some(mac) = info["mac"].as_str() {
            return Ok(mac.to_string());
        }
        let raw = info["mic_mac"]
            .as_str()
            .ok_or_else(|| KasaError::kasa(format!("Unknown mac, please submit a bug report with sys_info output: {info}")))?;
        if raw.contains(':') {
            return Ok(raw.to_string());
        }
        let pairs: Vec<String> = raw
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect();
        Ok(pairs.join(":"))
    }

    pub fn device_id(&self) -> Result<String> {
        Ok(self.sys_info()?["deviceId"].as_str().unwrap_or_default().to_string())
    }

    pub fn rssi(&self) -> Result<Option<i64>> {
        Ok(self.sys_info()?["rssi"].as_i64())
    }

    /// Hardware identifiers present in sysinfo.
    pub fn hw_info(&self) -> Result<Map<String, Value>> {
        const KEYS: [&str; 10] = [
            "sw_ver", "hw_ver", "mac", "mic_mac", "type", "mic_type", "hwId", "fwId", "oemId",
            "dev_name",
        ];
        let info = self.sys_info()?;
        Ok(KEYS
            .iter()
            .filter_map(|key| info.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    pub fn location(&self) -> Result<Location> {
        let info = self.sys_info()?;
        let scaled = |key: &str| info[key].as_f64().map(|v| v / 10_000.0);
        if info.get("latitude").is_some() && info.get("longitude").is_some() {
            Ok(Location {
                latitude: info["latitude"].as_f64(),
                longitude: info["longitude"].as_f64(),
            })
        } else if info.get("latitude_i").is_some() && info.get("longitude_i").is_some() {
            Ok(Location {
                latitude: scaled("latitude_i"),
                longitude: scaled("longitude_i"),
            })
        } else {
            debug!("Unsupported device location.");
            Ok(Location {
                latitude: None,
                longitude: None,
            })
        }
    }

    pub fn time(&self) -> Result<NaiveDateTime> {
        Time::time(self.module_data("time")?)
    }

    pub fn timezone(&self) -> Result<Value> {
        Time::timezone(self.module_data("time")?)
    }

    pub fn is_on(&self) -> Result<bool> {
        let info = self.sys_info()?;
        Ok(match self.kind {
            IotKind::Bulb | IotKind::LightStrip => {
                self.light_state()?["on_off"].as_i64().unwrap_or(0) != 0
            }
            IotKind::Strip => info["children"]
                .as_array()
                .is_some_and(|c| c.iter().any(|c| c["state"].as_i64() == Some(1))),
            _ => info["relay_state"].as_i64() == Some(1),
        })
    }

    /// When the device was last turned on, or `None` while off.
    pub fn on_since(&self) -> Result<Option<NaiveDateTime>> {
        if self.kind == IotKind::Strip {
            return Ok(self.children.iter().filter_map(|c| c.on_since()).min());
        }
        let info = self.sys_info()?;
        let Some(on_time) = info["on_time"].as_i64() else {
            return Ok(None);
        };
        if !self.is_on()? {
            return Ok(None);
        }
        Ok(Some(Local::now().naive_local() - Duration::seconds(on_time)))
    }

    /// Whether the device reports energy usage.
    pub fn has_emeter(&self) -> bool {
        if self.kind.is_bulb() {
            return true;
        }
        self.sys_info["feature"]
            .as_str()
            .is_some_and(|f| f.split(':').any(|f| f == "ENE"))
    }

    // Common commands.

    pub async fn set_alias(&self, alias: &str) -> Result<()> {
        query_helper(
            &self.protocol,
            self.kind.system_target(),
            "set_dev_alias",
            Some(json!({"alias": alias})),
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn reboot(&self, delay: u64) -> Result<()> {
        query_helper(
            &self.protocol,
            self.kind.system_target(),
            "reboot",
            Some(json!({"delay": delay})),
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn factory_reset(&self) -> Result<()> {
        query_helper(
            &self.protocol,
            self.kind.system_target(),
            "reset",
            Some(json!({"delay": 1})),
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn turn_on(&self, transition: Option<i64>) -> Result<()> {
        match (self.kind, transition) {
            (IotKind::Bulb | IotKind::LightStrip, _) => self
                .set_light_state(json!({"on_off": 1}), transition)
                .await
                .map(|_| ()),
            (IotKind::Dimmer, Some(transition)) => {
                self.set_dimmer_transition(self.brightness()?, transition)
                    .await
            }
            _ => self.set_relay_state(1).await,
        }
    }

    pub async fn turn_off(&self, transition: Option<i64>) -> Result<()> {
        match (self.kind, transition) {
            (IotKind::Bulb | IotKind::LightStrip, _) => self
                .set_light_state(json!({"on_off": 0}), transition)
                .await
                .map(|_| ()),
            (IotKind::Dimmer, Some(transition)) => {
                self.set_dimmer_transition(0, transition).await
            }
            _ => self.set_relay_state(0).await,
        }
    }

    async fn set_relay_state(&self, state: i64) -> Result<()> {
        query_helper(
            &self.protocol,
            "system",
            "set_relay_state",
            Some(json!({"state": state})),
            None,
        )
        .await
        .map(|_| ())
    }

    /// Scan for available wifi networks.
    pub async fn wifi_scan(&self) -> Result<Vec<WifiNetwork>> {
        let params = Some(json!({"refresh": 1}));
        let response = match query_helper(&self.protocol, "netif", "get_scaninfo", params.clone(), None).await {
            Ok(response) => response,
            Err(KasaError::Kasa(_)) => {
                debug!("Scanning using netif failed, trying softaponboarding");
                query_helper(
                    &self.protocol,
                    "smartlife.iot.common.softaponboarding",
                    "get_scaninfo",
                    params,
                    None,
                )
                .await?
            }
            Err(e) => return Err(e),
        };

        let list = response["ap_list"]
            .as_array()
            .ok_or_else(|| KasaError::kasa(format!("Invalid response for wifi scan: {response}")))?;
        Ok(list.iter().map(WifiNetwork::from_iot).collect())
    }

    /// Join the given network. The device drops off the current one.
    pub async fn wifi_join(&self, ssid: &str, password: &str, key_type: i64) -> Result<()> {
        let payload = json!({"ssid": ssid, "password": password, "key_type": key_type});
        let target = if self.kind.is_bulb() {
            "smartlife.iot.common.softaponboarding"
        } else {
            "netif"
        };
        match query_helper(&self.protocol, target, "set_stainfo", Some(payload), None).await {
            // The device leaves the network before answering.
            Err(KasaError::Kasa(msg)) if msg.starts_with("Communication error") => {
                debug!("Got expected error after joining {ssid}: {msg}");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    // Energy meter.

    fn emeter_data(&self) -> Result<&Value> {
        if !self.has_emeter() {
            return Err(KasaError::kasa("Device has no emeter"));
        }
        self.module_data("emeter")
    }

    fn require_emeter(&self) -> Result<()> {
        if self.has_emeter() {
            Ok(())
        } else {
            Err(KasaError::kasa("Device has no emeter"))
        }
    }

    pub fn emeter_realtime(&self) -> Result<kasa_protocol::EmeterStatus> {
        Emeter::realtime(self.emeter_data()?)
    }

    pub fn emeter_today(&self) -> Result<Option<f64>> {
        Ok(Emeter::emeter_today(self.emeter_data()?))
    }

    pub fn emeter_this_month(&self) -> Result<Option<f64>> {
        Ok(Emeter::emeter_this_month(self.emeter_data()?))
    }

    /// Fresh realtime reading, bypassing the cache.
    pub async fn get_emeter_realtime(&self) -> Result<kasa_protocol::EmeterStatus> {
        self.require_emeter()?;
        let response = query_helper(
            &self.protocol,
            self.kind.emeter_target(),
            "get_realtime",
            None,
            None,
        )
        .await?;
        Ok(kasa_protocol::EmeterStatus::from_value(&response))
    }

    /// Daily consumption for a month, keyed by day.
    pub async fn get_emeter_daily(
        &self,
        year: Option<i32>,
        month: Option<u32>,
        kwh: bool,
    ) -> Result<std::collections::BTreeMap<i64, f64>> {
        self.require_emeter()?;
        let response = query_helper(
            &self.protocol,
            self.kind.emeter_target(),
            "get_daystat",
            Some(Emeter::daystat_params(year, month)),
            None,
        )
        .await?;
        let list = response["day_list"].as_array().cloned().unwrap_or_default();
        Ok(convert_stat_data(&list, "day", kwh, None))
    }

    /// Monthly consumption for a year, keyed by month.
    pub async fn get_emeter_monthly(
        &self,
        year: Option<i32>,
        kwh: bool,
    ) -> Result<std::collections::BTreeMap<i64, f64>> {
        self.require_emeter()?;
        let response = query_helper(
            &self.protocol,
            self.kind.emeter_target(),
            "get_monthstat",
            Some(Emeter::monthstat_params(year)),
            None,
        )
        .await?;
        let list = response["month_list"].as_array().cloned().unwrap_or_default();
        Ok(convert_stat_data(&list, "month", kwh, None))
    }

    pub async fn erase_emeter_stats(&self) -> Result<()> {
        self.require_emeter()?;
        query_helper(
            &self.protocol,
            self.kind.emeter_target(),
            "erase_emeter_stat",
            None,
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.protocol.close().await
    }
}
