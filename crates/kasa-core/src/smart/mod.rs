//! SMART (Tapo-style) devices.
//!
//! A [`SmartDevice`] negotiates its component list on the first update,
//! creates one module per known component and then refreshes everything
//! with a single merged query per update. Child devices (strip sockets,
//! hub sensors) are driven by their parent: they share its connection
//! through [`ChildProtocol`] and are refreshed as part of its update.

mod bulb;
pub mod modules;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Local, NaiveDateTime};
use kasa_protocol::{DeviceConfig, DeviceType, EmeterStatus, KasaError, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::device::WifiNetwork;
use crate::feature::{FeatureSet, FeatureValue};
use crate::iot::Location;
use crate::protocol::{smart_request, ChildProtocol, SmartQuery, SmartRequest, SmartResponse};

pub use bulb::AVAILABLE_EFFECTS;
use modules::{Energy, ModuleContext, SmartModule, Time, PARENT_ONLY_MODULES};

const NOT_UPDATED: &str = "You need to await update() to access the data";

/// Decode a base64 field such as `nickname` or `ssid`.
pub(crate) fn decode_base64(value: &str) -> Option<String> {
    let bytes = BASE64.decode(value).ok()?;
    String::from_utf8(bytes).ok()
}

/// When the device was turned on, given its info and current time.
pub(crate) fn on_since(info: &Value, time: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    if info["device_on"].as_bool() != Some(true) {
        return None;
    }
    let on_time = info["on_time"].as_i64()?;
    let now = time.unwrap_or_else(|| Local::now().naive_local());
    Some(now - Duration::seconds(on_time))
}

fn parse_components(list: &Value) -> BTreeMap<String, u32> {
    list.as_array()
        .into_iter()
        .flatten()
        .filter_map(|component| {
            let id = component["id"].as_str()?;
            let version = component["ver_code"].as_u64()?;
            Some((id.to_string(), u32::try_from(version).ok()?))
        })
        .collect()
}

/// Device type from the reported `type` and the negotiated components.
fn device_type_from(info: &Value, components: &BTreeMap<String, u32>) -> DeviceType {
    let reported = info["type"]
        .as_str()
        .or_else(|| info["device_type"].as_str())
        .unwrap_or_default();
    let kind = reported.strip_prefix("SMART.").unwrap_or(reported);
    let kind = kind
        .strip_prefix("TAPO")
        .or_else(|| kind.strip_prefix("KASA"))
        .unwrap_or(kind);

    match kind {
        "HUB" => return DeviceType::Hub,
        "PLUG" if components.contains_key("child_device") => return DeviceType::Strip,
        "PLUG" => return DeviceType::Plug,
        _ => {}
    }
    if components.contains_key("light_strip") {
        return DeviceType::LightStrip;
    }
    if components.contains_key("dimmer_calibration") {
        return DeviceType::Dimmer;
    }
    if components.contains_key("brightness") {
        return DeviceType::Bulb;
    }
    if kind.contains("SWITCH") {
        return DeviceType::WallSwitch;
    }
    warn!("Unknown device type {reported}, falling back to plug");
    DeviceType::Plug
}

/// Child device type from its category.
fn child_device_type(info: &Value) -> DeviceType {
    let category = info["category"].as_str().unwrap_or_default();
    match category {
        "plug.powerstrip.sub-plug" => DeviceType::Plug,
        "subg.trigger.temp-hmdt-sensor" => DeviceType::Sensor,
        "kasa.switch.outlet.sub-fan" => DeviceType::Fan,
        "kasa.switch.outlet.sub-dimmer" => DeviceType::Dimmer,
        _ => {
            warn!("Unknown child device category {category}");
            DeviceType::Unknown
        }
    }
}

fn response_value(responses: &SmartResponse) -> Value {
    let map: Map<String, Value> = responses
        .iter()
        .map(|(method, result)| {
            let value = match result {
                Ok(value) => value.clone(),
                Err(code) => json!({"error_code": code.code()}),
            };
            (method.clone(), value)
        })
        .collect();
    Value::Object(map)
}

pub struct SmartDevice {
    host: String,
    config: DeviceConfig,
    protocol: Arc<dyn SmartQuery>,
    components: BTreeMap<String, u32>,
    device_type: DeviceType,
    info: Value,
    last_update: SmartResponse,
    /// The parent's last responses, for children.
    parent_update: Option<SmartResponse>,
    discovery_info: Option<Value>,
    modules: Vec<Box<dyn SmartModule>>,
    features: FeatureSet,
    children: Vec<SmartDevice>,
    is_child: bool,
}

impl std::fmt::Debug for SmartDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.alias() {
            Ok(Some(alias)) => write!(f, "<{} at {} - {alias}>", self.device_type, self.host),
            _ => write!(f, "<{} at {} - update() needed>", self.device_type, self.host),
        }
    }
}

impl SmartDevice {
    pub fn new(config: DeviceConfig, protocol: Arc<dyn SmartQuery>) -> Self {
        Self {
            host: config.host.clone(),
            config,
            protocol,
            components: BTreeMap::new(),
            device_type: DeviceType::Unknown,
            info: Value::Null,
            last_update: SmartResponse::new(),
            parent_update: None,
            discovery_info: None,
            modules: Vec::new(),
            features: FeatureSet::default(),
            children: Vec::new(),
            is_child: false,
        }
    }

    fn new_child(parent: &SmartDevice, info: Value, components: BTreeMap<String, u32>) -> Result<Self> {
        let device_id = info["device_id"]
            .as_str()
            .ok_or_else(|| KasaError::kasa(format!("Child device without device_id: {info}")))?;
        let protocol = Arc::new(ChildProtocol::new(device_id, Arc::clone(&parent.protocol)));
        let mut child = Self::new(parent.config.clone(), protocol);
        child.is_child = true;
        child.device_type = child_device_type(&info);
        child.components = components;
        child.info = info;
        child.initialize_modules();
        Ok(child)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.config.port_override.unwrap_or(80)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub async fn credentials_hash(&self) -> Option<String> {
        self.protocol.credentials_hash().await
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn is_child(&self) -> bool {
        self.is_child
    }

    /// Negotiated components and their versions.
    pub fn components(&self) -> &BTreeMap<String, u32> {
        &self.components
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn children(&self) -> &[SmartDevice] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Result<&SmartDevice> {
        self.children
            .get(index)
            .ok_or_else(|| KasaError::kasa(format!("child index of {index} is out of bounds")))
    }

    /// Device info from the last update.
    pub fn info(&self) -> Result<&Value> {
        if self.info.is_object() {
            Ok(&self.info)
        } else {
            Err(KasaError::kasa(NOT_UPDATED))
        }
    }

    /// Everything the device last returned, or its discovery payload.
    pub fn internal_state(&self) -> Value {
        if self.last_update.is_empty() {
            return self.discovery_info.clone().unwrap_or(Value::Null);
        }
        response_value(&self.last_update)
    }

    /// Seed state from a discovery reply so basic accessors work before the
    /// first update.
    pub fn update_from_discover_info(&mut self, info: Value) {
        self.device_type = device_type_from(&info, &self.components);
        self.discovery_info = Some(info.clone());
        self.info = info;
    }

    pub(crate) fn context(&self) -> ModuleContext<'_> {
        let mut ctx = ModuleContext {
            host: &self.host,
            info: &self.info,
            responses: &self.last_update,
            parent: self.parent_update.as_ref(),
            time: None,
        };
        ctx.time = Time::time(&ctx).ok();
        ctx
    }

    /// Take `method` from a response. Error codes fall back to `default`.
    fn try_get_response(
        &self,
        responses: &SmartResponse,
        method: &str,
        default: Option<Value>,
    ) -> Result<Value> {
        match responses.get(method) {
            Some(Ok(value)) => return Ok(value.clone()),
            Some(Err(code)) => debug!(
                "Error {code} getting request {method} for device {}",
                self.host
            ),
            None => {}
        }
        default.ok_or_else(|| {
            KasaError::kasa(format!(
                "{method} not found in {responses:?} for device {}",
                self.host
            ))
        })
    }

    /// Run a single method and return its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut response = self.protocol.query(smart_request([(method, params)])).await?;
        match response.remove(method) {
            Some(Ok(value)) => Ok(value),
            Some(Err(code)) => Err(KasaError::from_smart_code(
                format!("Error {code} getting request {method} for device {}", self.host),
                code,
            )),
            None => Err(KasaError::kasa(format!(
                "{method} not found in response for device {}",
                self.host
            ))),
        }
    }

    /// Send an arbitrary request.
    pub async fn query(&self, request: SmartRequest) -> Result<SmartResponse> {
        self.protocol.query(request).await
    }

    async fn negotiate(&mut self) -> Result<()> {
        let request = smart_request([("component_nego", Value::Null), ("get_device_info", Value::Null)]);
        let responses = self.protocol.query(request).await?;
        let components = self.try_get_response(&responses, "component_nego", None)?;
        self.components = parse_components(&components["component_list"]);
        self.info = self.try_get_response(&responses, "get_device_info", None)?;
        self.device_type = device_type_from(&self.info, &self.components);

        if self.components.contains_key("child_device") {
            self.initialize_children().await?;
        }
        Ok(())
    }

    async fn initialize_children(&mut self) -> Result<()> {
        let request = smart_request([
            ("get_child_device_component_list", Value::Null),
            ("get_child_device_list", Value::Null),
        ]);
        let responses = self.protocol.query(request).await?;
        let component_list = self.try_get_response(&responses, "get_child_device_component_list", None)?;
        let child_list = self.try_get_response(&responses, "get_child_device_list", None)?;

        let mut components: HashMap<String, BTreeMap<String, u32>> = component_list
            ["child_component_list"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let id = entry["device_id"].as_str()?;
                Some((id.to_string(), parse_components(&entry["component_list"])))
            })
            .collect();

        let mut children = Vec::new();
        for info in child_list["child_device_list"].as_array().into_iter().flatten() {
            let id = info["device_id"].as_str().unwrap_or_default();
            let child_components = components.remove(id).unwrap_or_default();
            children.push(Self::new_child(self, info.clone(), child_components)?);
        }
        debug!("{} has {} children", self.host, children.len());
        self.children = children;
        Ok(())
    }

    fn initialize_modules(&mut self) {
        let components = &self.components;
        let is_child = self.is_child;
        self.modules = modules::modules_for(|component| components.get(component).copied())
            .filter(|module| !(is_child && PARENT_ONLY_MODULES.contains(&module.name())))
            .collect();
    }

    fn initialize_features(&mut self) -> Result<()> {
        let features = {
            let ctx = self.context();
            let mut features = FeatureSet::default();
            for module in &self.modules {
                if ctx.all_failed(module.as_ref()) {
                    debug!("{}: module {} failed, skipping its features", self.host, module.name());
                    continue;
                }
                for feature in module.features(&ctx) {
                    features.add(feature)?;
                }
            }
            features
        };
        self.features = features;
        Ok(())
    }

    /// Merged query of every module.
    fn module_query(&self) -> SmartRequest {
        let mut request = SmartRequest::new();
        for module in &self.modules {
            request.extend(module.query());
        }
        request
    }

    pub async fn update(&mut self) -> Result<()> {
        if self.is_child {
            // The parent refreshes its children.
            return Ok(());
        }
        if self.config.credentials.is_none()
            && self.config.credentials_hash.is_none()
            && self.protocol.credentials_hash().await.is_none()
        {
            return Err(KasaError::authentication("Tapo plug requires authentication."));
        }

        if self.components.is_empty() {
            self.negotiate().await?;
            self.initialize_modules();
        }

        let mut request = self.module_query();
        request.insert("get_device_info".to_string(), Value::Null);
        if !self.children.is_empty() {
            request.insert("get_child_device_list".to_string(), Value::Null);
        }
        let responses = self.protocol.query(request).await?;
        self.info = self.try_get_response(&responses, "get_device_info", None)?;
        self.last_update = responses;

        if !self.children.is_empty() {
            self.update_children().await?;
        }
        if self.features.is_empty() {
            self.initialize_features()?;
        }
        debug!("Got an update from {}", self.host);
        Ok(())
    }

    async fn update_children(&mut self) -> Result<()> {
        let list = self.try_get_response(
            &self.last_update,
            "get_child_device_list",
            Some(json!({"child_device_list": []})),
        )?;
        let infos = list["child_device_list"].as_array().cloned().unwrap_or_default();

        for child in &mut self.children {
            let id = child.info["device_id"].clone();
            if let Some(info) = infos.iter().find(|info| info["device_id"] == id) {
                child.info = info.clone();
            }
            child.parent_update = Some(self.last_update.clone());
            child.refresh().await?;
        }
        Ok(())
    }

    /// Query the child's own modules. Device info comes from the parent's
    /// child list.
    async fn refresh(&mut self) -> Result<()> {
        let mut request = self.module_query();
        request.remove("get_device_info");

        let mut responses = if request.is_empty() {
            SmartResponse::new()
        } else {
            match self.protocol.query(request.clone()).await {
                Ok(responses) => responses,
                Err(e) => match e.error_code() {
                    Some(code) if request.len() == 1 => {
                        debug!("{}: child query failed: {e}", self.host);
                        request.keys().map(|method| (method.clone(), Err(code))).collect()
                    }
                    _ => return Err(e),
                },
            }
        };
        responses.insert("get_device_info".to_string(), Ok(self.info.clone()));
        self.last_update = responses;

        if self.features.is_empty() {
            self.initialize_features()?;
        }
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<&dyn SmartModule> {
        self.modules
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.module(name).is_some()
    }

    pub fn supported_modules(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Current value of a feature by id.
    pub fn feature_value(&self, id: &str) -> Result<FeatureValue> {
        let feature = self
            .features
            .get(id)
            .ok_or_else(|| KasaError::kasa(format!("No feature named {id}")))?;
        let module = self
            .module(&feature.container)
            .ok_or_else(|| KasaError::kasa(format!("Device has no {} module", feature.container)))?;
        module.read(&feature.attribute_getter, &self.context())
    }

    /// Write a feature. The cached state is refreshed on the next update.
    pub async fn set_feature_value(&self, id: &str, value: &FeatureValue) -> Result<()> {
        let feature = self
            .features
            .get(id)
            .ok_or_else(|| KasaError::kasa(format!("No feature named {id}")))?;
        let setter = feature.validate(value)?;
        let module = self
            .module(&feature.container)
            .ok_or_else(|| KasaError::kasa(format!("Device has no {} module", feature.container)))?;
        let request = module.write(setter, value, &self.context())?;
        self.protocol.query(request).await.map(|_| ())
    }

    // Common accessors.

    pub fn alias(&self) -> Result<Option<String>> {
        Ok(self.info()?["nickname"].as_str().and_then(decode_base64))
    }

    pub fn model(&self) -> Result<String> {
        let info = self.info()?;
        let model = info["model"].as_str().or_else(|| info["device_model"].as_str());
        Ok(model.unwrap_or_default().to_string())
    }

    pub fn mac(&self) -> Result<String> {
        Ok(self.info()?["mac"].as_str().unwrap_or_default().replace('-', ":"))
    }

    pub fn device_id(&self) -> Result<String> {
        Ok(self.info()?["device_id"].as_str().unwrap_or_default().to_string())
    }

    pub fn rssi(&self) -> Result<Option<i64>> {
        Ok(self.info()?["rssi"].as_i64())
    }

    pub fn signal_level(&self) -> Result<Option<i64>> {
        Ok(self.info()?["signal_level"].as_i64())
    }

    pub fn ssid(&self) -> Result<Option<String>> {
        Ok(self.info()?["ssid"].as_str().and_then(decode_base64))
    }

    pub fn hw_info(&self) -> Result<Map<String, Value>> {
        let info = self.info()?;
        let mut hw = Map::new();
        for (key, source) in [
            ("sw_ver", "fw_ver"),
            ("hw_ver", "hw_ver"),
            ("mac", "mac"),
            ("type", "type"),
            ("hwId", "device_id"),
            ("oemId", "oem_id"),
        ] {
            hw.insert(key.to_string(), info[source].clone());
        }
        hw.insert("dev_name".to_string(), json!(self.alias()?));
        Ok(hw)
    }

    /// Coordinates are reported in 1/10000 degrees.
    pub fn location(&self) -> Result<Location> {
        let info = self.info()?;
        let scaled = |key: &str| info[key].as_f64().map(|v| v / 10_000.0);
        Ok(Location {
            latitude: scaled("latitude"),
            longitude: scaled("longitude"),
        })
    }

    /// Device time, or the local time when the device does not report one.
    pub fn time(&self) -> NaiveDateTime {
        self.context()
            .time
            .unwrap_or_else(|| Local::now().naive_local())
    }

    pub fn is_on(&self) -> Result<bool> {
        Ok(self.info()?["device_on"].as_bool().unwrap_or(false))
    }

    pub fn on_since(&self) -> Result<Option<NaiveDateTime>> {
        let ctx = self.context();
        Ok(on_since(self.info()?, ctx.time))
    }

    // Energy.

    pub fn has_emeter(&self) -> bool {
        self.has_module("Energy")
    }

    fn require_emeter(&self) -> Result<()> {
        if self.has_emeter() {
            Ok(())
        } else {
            Err(KasaError::kasa("Device has no emeter"))
        }
    }

    pub fn emeter_realtime(&self) -> Result<EmeterStatus> {
        self.require_emeter()?;
        Energy::status(&self.context())
    }

    /// Today's consumption in kWh.
    pub fn emeter_today(&self) -> Result<Option<f64>> {
        self.require_emeter()?;
        Ok(Energy::emeter_today(&self.context())?.map(|wh| wh / 1000.0))
    }

    /// This month's consumption in kWh.
    pub fn emeter_this_month(&self) -> Result<Option<f64>> {
        self.require_emeter()?;
        Ok(Energy::emeter_this_month(&self.context())?.map(|wh| wh / 1000.0))
    }

    // Common commands.

    pub async fn set_device_info(&self, params: Value) -> Result<()> {
        self.call("set_device_info", params).await.map(|_| ())
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.set_device_info(json!({"device_on": true})).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.set_device_info(json!({"device_on": false})).await
    }

    pub async fn set_alias(&self, alias: &str) -> Result<()> {
        self.set_device_info(json!({"nickname": BASE64.encode(alias)}))
            .await
    }

    pub async fn reboot(&self, delay: u64) -> Result<()> {
        self.call("device_reboot", json!({"delay": delay}))
            .await
            .map(|_| ())
    }

    pub async fn factory_reset(&self) -> Result<()> {
        self.call("device_reset", Value::Null).await.map(|_| ())
    }

    pub async fn wifi_scan(&self) -> Result<Vec<WifiNetwork>> {
        let response = self
            .call("get_wireless_scan_info", json!({"start_index": 0}))
            .await?;
        let list = response["ap_list"]
            .as_array()
            .ok_or_else(|| KasaError::kasa(format!("Invalid response for wifi scan: {response}")))?;
        Ok(list.iter().map(WifiNetwork::from_smart).collect())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.protocol.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(ids: &[&str]) -> BTreeMap<String, u32> {
        ids.iter().map(|id| (id.to_string(), 1)).collect()
    }

    #[test]
    fn device_types() {
        let plug = json!({"type": "SMART.TAPOPLUG"});
        assert_eq!(device_type_from(&plug, &components(&["device"])), DeviceType::Plug);
        assert_eq!(
            device_type_from(&plug, &components(&["child_device"])),
            DeviceType::Strip
        );
        let hub = json!({"type": "SMART.TAPOHUB"});
        assert_eq!(device_type_from(&hub, &components(&[])), DeviceType::Hub);
        let bulb = json!({"type": "SMART.TAPOBULB"});
        assert_eq!(device_type_from(&bulb, &components(&["brightness"])), DeviceType::Bulb);
        assert_eq!(
            device_type_from(&bulb, &components(&["brightness", "light_strip"])),
            DeviceType::LightStrip
        );
        let switch = json!({"type": "SMART.KASASWITCH"});
        assert_eq!(device_type_from(&switch, &components(&[])), DeviceType::WallSwitch);
        assert_eq!(
            device_type_from(&switch, &components(&["dimmer_calibration", "brightness"])),
            DeviceType::Dimmer
        );
        // Discovery replies carry the type under another key.
        let discovered = json!({"device_type": "SMART.TAPOPLUG"});
        assert_eq!(device_type_from(&discovered, &components(&[])), DeviceType::Plug);
    }

    #[test]
    fn child_types() {
        let sensor = json!({"category": "subg.trigger.temp-hmdt-sensor"});
        assert_eq!(child_device_type(&sensor), DeviceType::Sensor);
        let other = json!({"category": "subg.trigger.button"});
        assert_eq!(child_device_type(&other), DeviceType::Unknown);
    }

    #[test]
    fn base64_fields() {
        assert_eq!(decode_base64("SG9tZVdpZmk=").as_deref(), Some("HomeWifi"));
        assert_eq!(decode_base64("not base64!"), None);
    }

    #[test]
    fn on_since_needs_power() {
        let now = chrono::NaiveDate::from_ymd_opt(2024, 3, 2)
            .and_then(|d| d.and_hms_opt(12, 30, 0))
            .unwrap();
        let on = json!({"device_on": true, "on_time": 3600});
        assert_eq!(on_since(&on, Some(now)).unwrap().to_string(), "2024-03-02 11:30:00");
        let off = json!({"device_on": false, "on_time": 3600});
        assert_eq!(on_since(&off, Some(now)), None);
    }

    #[test]
    fn component_list() {
        let list = json!([{"id": "device", "ver_code": 2}, {"id": "time", "ver_code": 1}, {"id": 3}]);
        let parsed = parse_components(&list);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["device"], 2);
    }
}
