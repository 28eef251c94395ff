//! In-memory device emulators.
//!
//! `FakeIotTransport` and `FakeSmartTransport` answer requests from a fixture
//! dictionary and apply state changes to it, so a device driven through them
//! behaves like real hardware across `update()` calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kasa_protocol::{Result, SmartErrorCode};
use serde_json::{json, Value};

use crate::Transport;

const LIGHT_SERVICE: &str = "smartlife.iot.smartbulb.lightingservice";
const LIGHT_STRIP_SERVICE: &str = "smartlife.iot.lightStrip";
const LIGHTING_EFFECT_SERVICE: &str = "smartlife.iot.lighting_effect";
const DIMMER_SERVICE: &str = "smartlife.iot.dimmer";
const BULB_SYSTEM_SERVICE: &str = "smartlife.iot.common.system";

/// IOT commands that change state without a matching getter.
const IOT_ACTIONS: &[&str] = &["reboot", "reset", "erase_emeter_stat", "erase_runtime_stat"];

/// Requests seen by a fake, shared with the test that created it.
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<Value>>>);

impl RequestLog {
    fn push(&self, request: Value) {
        if let Ok(mut log) = self.0.lock() {
            log.push(request);
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|log| log.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<Value> {
        self.0.lock().ok().and_then(|log| log.last().cloned())
    }

    pub fn clear(&self) {
        if let Ok(mut log) = self.0.lock() {
            log.clear();
        }
    }
}

/// Shallow-merge the keys of `changes` into `target`.
fn merge(target: &mut Value, changes: &Value) {
    if target.is_null() {
        *target = json!({});
    }
    if let (Some(target), Some(changes)) = (target.as_object_mut(), changes.as_object()) {
        for (key, value) in changes {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn child_matches(child: &Value, ids: &[String]) -> bool {
    child["id"]
        .as_str()
        .is_some_and(|id| ids.iter().any(|want| want == id || want.ends_with(id)))
}

// IOT

pub struct FakeIotTransport {
    proto: Value,
    log: RequestLog,
}

impl FakeIotTransport {
    /// Build from a fixture shaped like `{"system": {"get_sysinfo": {...}}, ...}`.
    ///
    /// Lighting, effect and dimmer services are added when the sysinfo implies
    /// the device has them.
    pub fn new(proto: Value) -> Self {
        let mut proto = if proto.is_object() { proto } else { json!({}) };
        let sysinfo = proto["system"]["get_sysinfo"].clone();
        let kind = sysinfo
            .get("mic_type")
            .or_else(|| sysinfo.get("type"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let is_bulb = kind.contains("smartbulb");

        if let Some(services) = proto.as_object_mut() {
            if is_bulb {
                let service = if sysinfo.get("length").is_some() {
                    LIGHT_STRIP_SERVICE
                } else {
                    LIGHT_SERVICE
                };
                services.entry(service).or_insert_with(|| json!({}));
                services
                    .entry(BULB_SYSTEM_SERVICE)
                    .or_insert_with(|| json!({}));
            }
            if sysinfo.get("lighting_effect_state").is_some() {
                services
                    .entry(LIGHTING_EFFECT_SERVICE)
                    .or_insert_with(|| json!({}));
            }
            if !is_bulb && sysinfo.get("brightness").is_some() {
                services.entry(DIMMER_SERVICE).or_insert_with(|| json!({}));
            }
        }

        Self {
            proto,
            log: RequestLog::default(),
        }
    }

    pub fn log(&self) -> RequestLog {
        self.log.clone()
    }

    pub fn sysinfo(&self) -> &Value {
        &self.proto["system"]["get_sysinfo"]
    }

    fn sysinfo_mut(&mut self) -> &mut Value {
        &mut self.proto["system"]["get_sysinfo"]
    }

    /// Set `key` on the device, or on the addressed strip sockets.
    fn apply(&mut self, child_ids: &[String], key: &str, value: Value) {
        if child_ids.is_empty() {
            self.sysinfo_mut()[key] = value;
            return;
        }
        if let Some(children) = self
            .sysinfo_mut()
            .get_mut("children")
            .and_then(Value::as_array_mut)
        {
            for child in children.iter_mut().filter(|c| child_matches(c, child_ids)) {
                child[key] = value.clone();
            }
        }
    }

    fn transition_light_state(&mut self, params: &Value) -> Value {
        let current = self.sysinfo()["light_state"].clone();
        let was_on = current["on_off"].as_i64().unwrap_or(0) != 0;
        let turn_on = params["on_off"].as_i64().map_or(was_on, |v| v != 0);

        let mut changes = params.clone();
        if let Some(changes) = changes.as_object_mut() {
            for key in ["on_off", "ignore_default", "transition_period"] {
                changes.remove(key);
            }
        }

        let base = if was_on {
            let mut state = current.clone();
            if let Some(state) = state.as_object_mut() {
                state.remove("on_off");
                state.remove("dft_on_state");
            }
            state
        } else {
            current.get("dft_on_state").cloned().unwrap_or_else(|| json!({}))
        };

        let mut new_state = base;
        merge(&mut new_state, &changes);
        let new_state = if turn_on {
            new_state["on_off"] = json!(1);
            new_state
        } else {
            json!({"on_off": 0, "dft_on_state": new_state})
        };

        self.sysinfo_mut()["light_state"] = new_state.clone();
        new_state
    }

    fn set_preferred_state(&mut self, params: &Value) {
        if let Some(presets) = self
            .sysinfo_mut()
            .get_mut("preferred_state")
            .and_then(Value::as_array_mut)
        {
            if let Some(preset) = presets.iter_mut().find(|p| p["index"] == params["index"]) {
                *preset = params.clone();
            }
        }
    }

    fn set_lighting_effect(&mut self, params: &Value) {
        let mut state = json!({
            "enable": params.get("enable").cloned().unwrap_or(json!(1)),
            "custom": params.get("custom").cloned().unwrap_or(json!(0)),
            "id": params.get("id").cloned().unwrap_or(json!("")),
            "name": params.get("name").cloned().unwrap_or(json!("")),
        });
        if let Some(brightness) = params.get("brightness") {
            state["brightness"] = brightness.clone();
        }
        self.sysinfo_mut()["lighting_effect_state"] = state;
    }

    fn handle_command(
        &mut self,
        target: &str,
        cmd: &str,
        params: &Value,
        child_ids: &[String],
    ) -> Value {
        let ok = json!({"err_code": 0});
        let mut result = match (target, cmd) {
            ("system", "get_sysinfo") => self.sysinfo().clone(),
            ("system", "set_relay_state") => {
                let state = params["state"].clone();
                let is_strip = self.sysinfo().get("children").is_some();
                if is_strip && child_ids.is_empty() {
                    let children = self.sysinfo_mut()["children"].as_array_mut();
                    for child in children.into_iter().flatten() {
                        child["state"] = state.clone();
                    }
                } else {
                    let key = if is_strip { "state" } else { "relay_state" };
                    self.apply(child_ids, key, state);
                }
                ok
            }
            ("system" | BULB_SYSTEM_SERVICE, "set_dev_alias") => {
                self.apply(child_ids, "alias", params["alias"].clone());
                ok
            }
            ("system", "set_led_off") => {
                self.apply(&[], "led_off", params["off"].clone());
                ok
            }
            (LIGHT_SERVICE | LIGHT_STRIP_SERVICE, "get_light_state") => {
                self.sysinfo()["light_state"].clone()
            }
            (LIGHT_SERVICE, "transition_light_state") | (LIGHT_STRIP_SERVICE, "set_light_state") => {
                self.transition_light_state(params)
            }
            (LIGHT_SERVICE, "set_preferred_state") => {
                self.set_preferred_state(params);
                ok
            }
            (LIGHTING_EFFECT_SERVICE, "set_lighting_effect") => {
                self.set_lighting_effect(params);
                ok
            }
            (DIMMER_SERVICE, "set_brightness") => {
                self.apply(&[], "brightness", params["brightness"].clone());
                ok
            }
            (DIMMER_SERVICE, "set_dimmer_transition") => {
                let brightness = params["brightness"].as_i64().unwrap_or(0);
                if brightness > 0 {
                    self.apply(&[], "brightness", json!(brightness));
                }
                self.apply(&[], "relay_state", json!(i64::from(brightness > 0)));
                ok
            }
            _ => match self.proto.get(target).and_then(|t| t.get(cmd)) {
                Some(stored) => stored.clone(),
                None if cmd.starts_with("set_") || IOT_ACTIONS.contains(&cmd) => ok,
                None => json!({"err_code": -2, "err_msg": "member not support"}),
            },
        };

        if let Some(result) = result.as_object_mut() {
            result.entry("err_code").or_insert(json!(0));
        }
        result
    }

    /// Answer one IOT request.
    pub fn handle_request(&mut self, request: &Value) -> Value {
        let child_ids: Vec<String> = request["context"]["child_ids"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut response = serde_json::Map::new();
        let Some(targets) = request.as_object() else {
            return Value::Object(response);
        };
        for (target, commands) in targets {
            if target == "context" {
                continue;
            }
            if self.proto.get(target).is_none() {
                response.insert(
                    target.clone(),
                    json!({"err_code": -1, "err_msg": "module not support"}),
                );
                continue;
            }
            let mut results = serde_json::Map::new();
            if let Some(commands) = commands.as_object() {
                for (cmd, params) in commands {
                    let result = self.handle_command(target, cmd, params, &child_ids);
                    results.insert(cmd.clone(), result);
                }
            }
            response.insert(target.clone(), Value::Object(results));
        }
        Value::Object(response)
    }
}

#[async_trait]
impl Transport for FakeIotTransport {
    fn default_port(&self) -> u16 {
        9999
    }

    fn credentials_hash(&self) -> Option<String> {
        None
    }

    async fn send(&mut self, request: &str) -> Result<Value> {
        let request: Value = serde_json::from_str(request)?;
        self.log.push(request.clone());
        Ok(self.handle_request(&request))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

// SMART

pub struct FakeSmartTransport {
    info: Value,
    log: RequestLog,
    method_errors: HashMap<String, i64>,
    omitted_from_batch: HashSet<String>,
    batch_error: Option<i64>,
    page_size: Option<usize>,
}

impl FakeSmartTransport {
    /// Build from a fixture mapping method names to their results.
    pub fn new(info: Value) -> Self {
        Self {
            info: if info.is_object() { info } else { json!({}) },
            log: RequestLog::default(),
            method_errors: HashMap::new(),
            omitted_from_batch: HashSet::new(),
            batch_error: None,
            page_size: None,
        }
    }

    /// Always answer `method` with `code`.
    pub fn with_method_error(mut self, method: &str, code: SmartErrorCode) -> Self {
        self.method_errors.insert(method.to_string(), code.code());
        self
    }

    /// Leave `method` out of `multipleRequest` replies.
    pub fn without_batch_response(mut self, method: &str) -> Self {
        self.omitted_from_batch.insert(method.to_string());
        self
    }

    /// Fail the next `multipleRequest` as a whole.
    pub fn with_batch_error(mut self, code: SmartErrorCode) -> Self {
        self.batch_error = Some(code.code());
        self
    }

    /// Split list results carrying `sum` into pages of `size`.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn log(&self) -> RequestLog {
        self.log.clone()
    }

    pub fn info(&self) -> &Value {
        &self.info
    }

    fn page(&self, method: &str, params: &Value) -> Value {
        let result = self.info[method].clone();
        let (Some(page_size), Some(fields)) = (self.page_size, result.as_object()) else {
            return result;
        };
        if !fields.contains_key("sum") {
            return result;
        }
        let Some((key, list)) = fields
            .iter()
            .find_map(|(k, v)| v.as_array().map(|a| (k.clone(), a.clone())))
        else {
            return result;
        };

        let start = params["start_index"].as_u64().unwrap_or(0) as usize;
        let page: Vec<Value> = list.into_iter().skip(start).take(page_size).collect();
        let mut paged = fields.clone();
        paged.insert(key, Value::Array(page));
        paged.insert("start_index".to_string(), json!(start));
        Value::Object(paged)
    }

    fn multiple_request(&mut self, params: &Value) -> Value {
        if let Some(code) = self.batch_error.take() {
            return json!({"error_code": code});
        }
        let requests = params["requests"].as_array().cloned().unwrap_or_default();
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let method = request["method"].as_str().unwrap_or_default().to_string();
            if self.omitted_from_batch.contains(&method) {
                continue;
            }
            let mut response = self.handle_method(&method, &request["params"]);
            response["method"] = json!(method);
            responses.push(response);
        }
        json!({"error_code": 0, "result": {"responses": responses}})
    }

    fn control_child(&mut self, params: &Value) -> Value {
        let params_error = json!({"error_code": SmartErrorCode::ParamsError.code()});
        let Some(device_id) = params["device_id"].as_str() else {
            return params_error;
        };
        let request_data = &params["requestData"];
        let method = request_data["method"].as_str().unwrap_or_default();

        let components = self.info["get_child_device_component_list"]["child_component_list"]
            .as_array()
            .and_then(|list| list.iter().find(|c| c["device_id"] == device_id))
            .map(|c| c["component_list"].clone())
            .unwrap_or_else(|| json!([]));
        let Some(children) = self.info["get_child_device_list"]["child_device_list"].as_array_mut()
        else {
            return params_error;
        };
        let Some(child_info) = children
            .iter_mut()
            .find(|c| c["device_id"].as_str() == Some(device_id))
        else {
            return params_error;
        };

        let mut child = FakeSmartTransport::new(json!({
            "get_device_info": child_info.clone(),
            "component_nego": {"component_list": components},
        }));
        let response = child.handle_method(method, &request_data["params"]);
        *child_info = child.info["get_device_info"].clone();

        json!({"error_code": 0, "result": {"responseData": response}})
    }

    fn handle_method(&mut self, method: &str, params: &Value) -> Value {
        let ok = json!({"error_code": 0});
        if let Some(code) = self.method_errors.get(method) {
            return json!({"error_code": code});
        }
        match method {
            "multipleRequest" => self.multiple_request(params),
            "control_child" => self.control_child(params),
            "set_device_info" => {
                merge(&mut self.info["get_device_info"], params);
                ok
            }
            _ if self.info.get(method).is_some() => {
                json!({"result": self.page(method, params), "error_code": 0})
            }
            m if m.starts_with("get_") || m == "component_nego" => {
                json!({"error_code": SmartErrorCode::UnknownMethodError.code()})
            }
            m if m.starts_with("set_") => {
                let getter = format!("get_{}", &m[4..]);
                if let Some(current) = self.info.get_mut(&getter) {
                    merge(current, params);
                }
                ok
            }
            _ => ok,
        }
    }

    /// Answer one SMART request envelope.
    pub fn handle_request(&mut self, request: &Value) -> Value {
        let method = request["method"].as_str().unwrap_or_default().to_string();
        self.handle_method(&method, &request["params"])
    }
}

#[async_trait]
impl Transport for FakeSmartTransport {
    fn default_port(&self) -> u16 {
        80
    }

    fn credentials_hash(&self) -> Option<String> {
        None
    }

    async fn send(&mut self, request: &str) -> Result<Value> {
        let request: Value = serde_json::from_str(request)?;
        self.log.push(request.clone());
        Ok(self.handle_request(&request))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fixture dictionaries for common devices.
pub mod fixtures {
    use serde_json::{json, Value};

    /// HS110 plug with energy monitoring.
    pub fn iot_plug() -> Value {
        json!({
            "system": {"get_sysinfo": {
                "sw_ver": "1.5.4 Build 180815 Rel.121440",
                "hw_ver": "2.0",
                "type": "IOT.SMARTPLUGSWITCH",
                "model": "HS110(EU)",
                "mac": "50:C7:BF:00:00:01",
                "dev_name": "Smart Wi-Fi Plug With Energy Monitoring",
                "alias": "Bedroom Plug",
                "relay_state": 1,
                "on_time": 3600,
                "active_mode": "none",
                "feature": "TIM:ENE",
                "updating": 0,
                "icon_hash": "",
                "rssi": -55,
                "led_off": 0,
                "longitude_i": -1230000,
                "latitude_i": 455000,
                "hwId": "HW0001",
                "fwId": "00000000000000000000000000000000",
                "deviceId": "8006000000000000000000000000000000000001",
                "oemId": "OEM0001",
                "next_action": {"type": -1},
                "err_code": 0
            }},
            "emeter": {
                "get_realtime": {
                    "voltage_mv": 230500,
                    "current_ma": 120,
                    "power_mw": 25300,
                    "total_wh": 4200,
                    "err_code": 0
                },
                "get_daystat": {"day_list": [
                    {"year": 2024, "month": 3, "day": 1, "energy_wh": 300},
                    {"year": 2024, "month": 3, "day": 2, "energy_wh": 450}
                ], "err_code": 0},
                "get_monthstat": {"month_list": [
                    {"year": 2024, "month": 2, "energy_wh": 9000},
                    {"year": 2024, "month": 3, "energy_wh": 750}
                ], "err_code": 0}
            },
            "time": {
                "get_time": {"year": 2024, "month": 3, "mday": 2, "hour": 12, "min": 30, "sec": 0, "err_code": 0},
                "get_timezone": {"index": 39, "err_code": 0}
            },
            "cnCloud": {"get_info": {
                "username": "",
                "server": "devs.tplinkcloud.com",
                "binded": 1,
                "cld_connection": 1,
                "illegalType": 0,
                "err_code": 0
            }},
            "netif": {"get_scaninfo": {"ap_list": [
                {"ssid": "HomeWifi", "key_type": 3},
                {"ssid": "Guest", "key_type": 0}
            ], "err_code": 0}}
        })
    }

    /// HS200 wall switch.
    pub fn iot_wallswitch() -> Value {
        json!({
            "system": {"get_sysinfo": {
                "sw_ver": "1.2.5 Build 171213 Rel.101523",
                "hw_ver": "1.0",
                "type": "IOT.SMARTPLUGSWITCH",
                "model": "HS200(US)",
                "mac": "50:C7:BF:00:00:02",
                "dev_name": "Wi-Fi Smart Light Switch",
                "alias": "Hallway Switch",
                "relay_state": 0,
                "on_time": 0,
                "feature": "TIM",
                "rssi": -60,
                "led_off": 0,
                "latitude": 45.5,
                "longitude": -123.0,
                "hwId": "HW0002",
                "deviceId": "8006000000000000000000000000000000000002",
                "oemId": "OEM0002",
                "err_code": 0
            }},
            "time": {
                "get_time": {"year": 2024, "month": 3, "mday": 2, "hour": 12, "min": 30, "sec": 0, "err_code": 0}
            }
        })
    }

    /// LB130 colour bulb.
    pub fn iot_bulb() -> Value {
        json!({
            "system": {"get_sysinfo": {
                "sw_ver": "1.8.6 Build 180809 Rel.091659",
                "hw_ver": "1.0",
                "model": "LB130(EU)",
                "description": "Smart Wi-Fi LED Bulb with Color Changing",
                "alias": "Kitchen Bulb",
                "mic_type": "IOT.SMARTBULB",
                "dev_state": "normal",
                "mic_mac": "50C7BF000003",
                "deviceId": "8012000000000000000000000000000000000003",
                "oemId": "OEM0003",
                "hwId": "HW0003",
                "is_factory": false,
                "disco_ver": "1.0",
                "ctrl_protocols": {"name": "Linkie", "version": "1.0"},
                "light_state": {
                    "on_off": 1,
                    "mode": "normal",
                    "hue": 120,
                    "saturation": 50,
                    "color_temp": 0,
                    "brightness": 80
                },
                "is_dimmable": 1,
                "is_color": 1,
                "is_variable_color_temp": 1,
                "preferred_state": [
                    {"index": 0, "hue": 0, "saturation": 0, "color_temp": 2700, "brightness": 50},
                    {"index": 1, "hue": 0, "saturation": 75, "color_temp": 0, "brightness": 100},
                    {"index": 2, "hue": 120, "saturation": 75, "color_temp": 0, "brightness": 100},
                    {"index": 3, "hue": 240, "saturation": 75, "color_temp": 0, "brightness": 100}
                ],
                "rssi": -65,
                "active_mode": "none",
                "heapsize": 335948,
                "err_code": 0
            }},
            "smartlife.iot.smartbulb.lightingservice": {
                "get_default_behavior": {
                    "soft_on": {"mode": "last_status"},
                    "hard_on": {"mode": "last_status"},
                    "err_code": 0
                }
            },
            "smartlife.iot.common.emeter": {
                "get_realtime": {"power_mw": 10800, "err_code": 0},
                "get_daystat": {"day_list": [], "err_code": 0},
                "get_monthstat": {"month_list": [], "err_code": 0}
            },
            "smartlife.iot.common.timesetting": {
                "get_time": {"year": 2024, "month": 3, "mday": 2, "hour": 12, "min": 30, "sec": 0, "err_code": 0}
            },
            "smartlife.iot.common.cloud": {
                "get_info": {"binded": 0, "cld_connection": 0, "err_code": 0}
            }
        })
    }

    /// KL430 light strip.
    pub fn iot_lightstrip() -> Value {
        json!({
            "system": {"get_sysinfo": {
                "sw_ver": "1.0.10 Build 200522 Rel.104340",
                "hw_ver": "1.0",
                "model": "KL430(US)",
                "description": "Kasa Smart Light Strip, Multicolor",
                "alias": "Pantry Lightstrip",
                "mic_type": "IOT.SMARTBULB",
                "dev_state": "normal",
                "mic_mac": "50C7BF000004",
                "deviceId": "8012000000000000000000000000000000000004",
                "oemId": "OEM0004",
                "hwId": "HW0004",
                "length": 16,
                "light_state": {
                    "on_off": 0,
                    "dft_on_state": {
                        "mode": "normal",
                        "hue": 0,
                        "saturation": 0,
                        "color_temp": 4000,
                        "brightness": 60
                    }
                },
                "is_dimmable": 1,
                "is_color": 1,
                "is_variable_color_temp": 1,
                "lighting_effect_state": {
                    "enable": 0,
                    "name": "",
                    "brightness": 50,
                    "custom": 0,
                    "id": ""
                },
                "preferred_state": [],
                "rssi": -58,
                "err_code": 0
            }},
            "smartlife.iot.common.emeter": {
                "get_realtime": {"power_mw": 0, "err_code": 0},
                "get_daystat": {"day_list": [], "err_code": 0},
                "get_monthstat": {"month_list": [], "err_code": 0}
            }
        })
    }

    /// HS220 dimmer.
    pub fn iot_dimmer() -> Value {
        json!({
            "system": {"get_sysinfo": {
                "sw_ver": "1.5.8 Build 180815 Rel.135935",
                "hw_ver": "1.0",
                "type": "IOT.SMARTPLUGSWITCH",
                "model": "HS220(US)",
                "mac": "50:C7:BF:00:00:05",
                "dev_name": "Smart Wi-Fi Dimmer",
                "alias": "Dining Dimmer",
                "relay_state": 1,
                "brightness": 50,
                "on_time": 120,
                "feature": "TIM",
                "rssi": -40,
                "led_off": 0,
                "latitude_i": 0,
                "longitude_i": 0,
                "hwId": "HW0005",
                "deviceId": "8006000000000000000000000000000000000005",
                "oemId": "OEM0005",
                "preferred_state": [
                    {"index": 0, "brightness": 100},
                    {"index": 1, "brightness": 75}
                ],
                "err_code": 0
            }},
            "time": {
                "get_time": {"year": 2024, "month": 3, "mday": 2, "hour": 12, "min": 30, "sec": 0, "err_code": 0}
            }
        })
    }

    /// HS300 power strip with three sockets and energy monitoring.
    pub fn iot_strip() -> Value {
        let device_id = "8006000000000000000000000000000000000006";
        json!({
            "system": {"get_sysinfo": {
                "sw_ver": "1.0.6 Build 200821 Rel.090909",
                "hw_ver": "1.0",
                "model": "HS300(US)",
                "deviceId": device_id,
                "oemId": "OEM0006",
                "hwId": "HW0006",
                "rssi": -39,
                "longitude_i": 0,
                "latitude_i": 0,
                "alias": "Power Strip",
                "status": "new",
                "mic_type": "IOT.SMARTPLUGSWITCH",
                "feature": "TIM:ENE",
                "mac": "50:C7:BF:00:00:06",
                "updating": 0,
                "led_off": 0,
                "children": [
                    {"id": format!("{device_id}00"), "state": 1, "alias": "Plug 1", "on_time": 600, "next_action": {"type": -1}},
                    {"id": format!("{device_id}01"), "state": 0, "alias": "Plug 2", "on_time": 0, "next_action": {"type": -1}},
                    {"id": format!("{device_id}02"), "state": 1, "alias": "Plug 3", "on_time": 60, "next_action": {"type": -1}}
                ],
                "child_num": 3,
                "err_code": 0
            }},
            "emeter": {
                "get_realtime": {
                    "voltage_mv": 120100,
                    "current_ma": 50,
                    "power_mw": 4500,
                    "total_wh": 120,
                    "err_code": 0
                },
                "get_daystat": {"day_list": [], "err_code": 0},
                "get_monthstat": {"month_list": [], "err_code": 0}
            },
            "time": {
                "get_time": {"year": 2024, "month": 3, "mday": 2, "hour": 12, "min": 30, "sec": 0, "err_code": 0}
            }
        })
    }

    fn components(list: &[(&str, u32)]) -> Value {
        let list: Vec<Value> = list
            .iter()
            .map(|(id, ver_code)| json!({"id": id, "ver_code": ver_code}))
            .collect();
        json!({"component_list": list})
    }

    /// P110 plug with energy monitoring.
    pub fn smart_plug() -> Value {
        json!({
            "component_nego": components(&[
                ("device", 2),
                ("firmware", 2),
                ("quick_setup", 3),
                ("time", 1),
                ("wireless", 1),
                ("schedule", 2),
                ("countdown", 2),
                ("account", 1),
                ("led", 1),
                ("cloud_connect", 1),
                ("device_local_time", 1),
                ("default_states", 1),
                ("auto_off", 2),
                ("energy_monitoring", 2)
            ]),
            "get_device_info": {
                "device_id": "802200000000000000000000000000000000000A",
                "fw_ver": "1.1.3 Build 230905 Rel.152200",
                "hw_ver": "1.0",
                "type": "SMART.TAPOPLUG",
                "model": "P110",
                "mac": "3C-52-A1-00-00-0A",
                "hw_id": "HW000A",
                "fw_id": "FW000A",
                "oem_id": "OEM000A",
                "ip": "127.0.0.123",
                "time_diff": 0,
                "ssid": "SG9tZVdpZmk=",
                "rssi": -45,
                "signal_level": 3,
                "auto_off_status": "off",
                "auto_off_remain_time": 0,
                "latitude": 0,
                "longitude": 0,
                "lang": "en_US",
                "avatar": "plug",
                "region": "Europe/London",
                "nickname": "TGl2aW5nIFJvb20gUGx1Zw==",
                "has_set_location_info": false,
                "device_on": true,
                "on_time": 3600,
                "default_states": {"type": "last_states", "state": {}},
                "overheated": false,
                "power_protection_status": "normal"
            },
            "get_device_time": {"time_diff": 0, "timestamp": 1_709_382_600, "region": "Europe/London"},
            "get_device_usage": {
                "time_usage": {"today": 60, "past7": 420, "past30": 1800},
                "power_usage": {"today": 100, "past7": 700, "past30": 3000}
            },
            "get_energy_usage": {
                "today_runtime": 60,
                "month_runtime": 1800,
                "today_energy": 100,
                "month_energy": 3000,
                "local_time": "2024-03-02 12:30:00",
                "current_power": 12500
            },
            "get_current_power": {"current_power": 12},
            "get_auto_off_config": {"enable": false, "delay_min": 120},
            "get_connect_cloud_state": {"status": 0},
            "get_latest_fw": {
                "fw_size": 786432,
                "fw_ver": "1.2.1 Build 240119 Rel.153205",
                "hw_id": "",
                "need_to_upgrade": true,
                "oem_id": "",
                "release_date": "2024-01-19",
                "release_note": "Stability improvements",
                "type": 2
            },
            "get_auto_update_info": {"enable": true, "random_range": 120, "time": 180},
            "get_fw_download_state": {
                "auto_upgrade": false,
                "download_progress": 0,
                "reboot_time": 5,
                "status": 0,
                "upgrade_time": 5
            },
            "get_wireless_scan_info": {
                "ap_list": [
                    {"bssid": "00:00:00:00:00:01", "channel": 0, "cipher_type": 2, "key_type": "wpa2_psk", "signal_level": 3, "ssid": "SG9tZVdpZmk="}
                ],
                "wep_supported": false,
                "start_index": 0,
                "sum": 1
            }
        })
    }

    /// L530 colour bulb.
    pub fn smart_bulb() -> Value {
        json!({
            "component_nego": components(&[
                ("device", 2),
                ("firmware", 1),
                ("time", 1),
                ("wireless", 1),
                ("cloud_connect", 1),
                ("brightness", 1),
                ("color", 1),
                ("color_temperature", 1),
                ("on_off_gradually", 2),
                ("light_effect", 1)
            ]),
            "get_device_info": {
                "device_id": "802300000000000000000000000000000000000B",
                "fw_ver": "1.1.0 Build 230823 Rel.180305",
                "hw_ver": "3.0",
                "type": "SMART.TAPOBULB",
                "model": "L530",
                "mac": "5C-62-8B-00-00-0B",
                "hw_id": "HW000B",
                "oem_id": "OEM000B",
                "ip": "127.0.0.124",
                "time_diff": 0,
                "ssid": "SG9tZVdpZmk=",
                "rssi": -50,
                "signal_level": 2,
                "region": "Europe/London",
                "nickname": "S2l0Y2hlbiBCdWxi",
                "device_on": true,
                "brightness": 80,
                "hue": 30,
                "saturation": 100,
                "color_temp": 0,
                "color_temp_range": [2500, 6500],
                "dynamic_light_effect_enable": false,
                "overheated": false,
                "default_states": {"type": "last_states", "state": {}}
            },
            "get_device_time": {"time_diff": 0, "timestamp": 1_709_382_600, "region": "Europe/London"},
            "get_connect_cloud_state": {"status": 1},
            "get_latest_fw": {
                "fw_size": 0,
                "fw_ver": "1.1.0 Build 230823 Rel.180305",
                "hw_id": "",
                "need_to_upgrade": false,
                "oem_id": "",
                "release_date": "",
                "release_note": "",
                "type": 0
            },
            "get_on_off_gradually_info": {
                "on_state": {"enable": true, "duration": 1, "max_duration": 60},
                "off_state": {"enable": false, "duration": 2, "max_duration": 60}
            }
        })
    }

    /// P300 power strip with three child sockets.
    pub fn smart_strip() -> Value {
        let child = |index: u32, on: bool, nickname: &str| {
            json!({
                "device_id": format!("802400000000000000000000000000000000000C0{index}"),
                "parent_device_id": "802400000000000000000000000000000000000C",
                "category": "plug.powerstrip.sub-plug",
                "type": "SMART.TAPOPLUG",
                "model": "P300",
                "fw_ver": "1.0.13 Build 230925 Rel.150200",
                "hw_ver": "1.0",
                "mac": "48-22-54-00-00-0C",
                "nickname": nickname,
                "device_on": on,
                "on_time": if on { 300 } else { 0 },
                "position": index + 1,
                "slot_number": 3,
                "overheat_status": "normal",
                "original_device_on": false,
                "bind_count": 1,
                "auto_off_status": "off",
                "auto_off_remain_time": 0
            })
        };
        let child_components = |index: u32| {
            let mut list = components(&[("device", 2), ("auto_off", 2), ("countdown", 2)]);
            list["device_id"] = json!(format!("802400000000000000000000000000000000000C0{index}"));
            list
        };
        json!({
            "component_nego": components(&[
                ("device", 2),
                ("firmware", 2),
                ("time", 1),
                ("wireless", 1),
                ("cloud_connect", 1),
                ("child_device", 1)
            ]),
            "get_device_info": {
                "device_id": "802400000000000000000000000000000000000C",
                "fw_ver": "1.0.13 Build 230925 Rel.150200",
                "hw_ver": "1.0",
                "type": "SMART.TAPOPLUG",
                "model": "P300",
                "mac": "48-22-54-00-00-0C",
                "hw_id": "HW000C",
                "oem_id": "OEM000C",
                "ip": "127.0.0.125",
                "time_diff": 0,
                "ssid": "SG9tZVdpZmk=",
                "rssi": -42,
                "signal_level": 3,
                "region": "Europe/London",
                "nickname": "UG93ZXIgU3RyaXA=",
                "device_on": true,
                "on_time": 300,
                "overheated": false
            },
            "get_device_time": {"time_diff": 0, "timestamp": 1_709_382_600, "region": "Europe/London"},
            "get_connect_cloud_state": {"status": 0},
            "get_latest_fw": {
                "fw_size": 0,
                "fw_ver": "1.0.13 Build 230925 Rel.150200",
                "need_to_upgrade": false,
                "release_date": "",
                "release_note": "",
                "type": 0
            },
            "get_auto_update_info": {"enable": false, "random_range": 120, "time": 180},
            "get_child_device_list": {
                "child_device_list": [
                    child(0, true, "UGx1ZyAx"),
                    child(1, false, "UGx1ZyAy"),
                    child(2, true, "UGx1ZyAz")
                ],
                "start_index": 0,
                "sum": 3
            },
            "get_child_device_component_list": {
                "child_component_list": [child_components(0), child_components(1), child_components(2)],
                "start_index": 0,
                "sum": 3
            }
        })
    }

    /// H100 hub with one T315 temperature and humidity sensor.
    pub fn smart_hub() -> Value {
        let sensor_id = "802500000000000000000000000000000000000D01";
        json!({
            "component_nego": components(&[
                ("device", 2),
                ("firmware", 2),
                ("time", 1),
                ("wireless", 1),
                ("cloud_connect", 1),
                ("child_device", 1)
            ]),
            "get_device_info": {
                "device_id": "802500000000000000000000000000000000000D",
                "fw_ver": "1.5.5 Build 240105 Rel.192438",
                "hw_ver": "1.0",
                "type": "SMART.TAPOHUB",
                "model": "H100",
                "mac": "3C-52-A1-00-00-0D",
                "ip": "127.0.0.126",
                "time_diff": 0,
                "ssid": "SG9tZVdpZmk=",
                "rssi": -48,
                "signal_level": 3,
                "region": "Europe/London",
                "nickname": "SHVi",
                "device_on": true,
                "overheated": false
            },
            "get_device_time": {"time_diff": 0, "timestamp": 1_709_382_600, "region": "Europe/London"},
            "get_connect_cloud_state": {"status": 0},
            "get_latest_fw": {"need_to_upgrade": false, "type": 0},
            "get_auto_update_info": {"enable": true, "random_range": 120, "time": 180},
            "get_child_device_list": {
                "child_device_list": [{
                    "device_id": sensor_id,
                    "parent_device_id": "802500000000000000000000000000000000000D",
                    "category": "subg.trigger.temp-hmdt-sensor",
                    "type": "SMART.TAPOSENSOR",
                    "model": "T315",
                    "fw_ver": "1.8.0 Build 230921 Rel.091446",
                    "hw_ver": "1.0",
                    "mac": "F0-A7-31-00-00-0E",
                    "nickname": "QmF0aHJvb20gU2Vuc29y",
                    "rssi": -60,
                    "signal_level": 2,
                    "status": "online",
                    "current_humidity": 61,
                    "current_humidity_exception": 1,
                    "current_temp": 21.4,
                    "current_temp_exception": 0,
                    "temp_unit": "celsius",
                    "at_low_battery": false
                }],
                "start_index": 0,
                "sum": 1
            },
            "get_child_device_component_list": {
                "child_component_list": [{
                    "device_id": sensor_id,
                    "component_list": [
                        {"id": "device", "ver_code": 2},
                        {"id": "humidity", "ver_code": 1},
                        {"id": "temperature", "ver_code": 1},
                        {"id": "battery_detect", "ver_code": 1}
                    ]
                }],
                "start_index": 0,
                "sum": 1
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn iot_relay_and_alias() {
        let mut fake = FakeIotTransport::new(fixtures::iot_plug());
        let resp = fake
            .send(r#"{"system":{"set_relay_state":{"state":0},"set_dev_alias":{"alias":"x"}}}"#)
            .await
            .unwrap();
        assert_eq!(resp["system"]["set_relay_state"]["err_code"], 0);
        assert_eq!(fake.sysinfo()["relay_state"], 0);
        assert_eq!(fake.sysinfo()["alias"], "x");
        assert_eq!(fake.log().len(), 1);
    }

    #[tokio::test]
    async fn iot_unknown_module() {
        let mut fake = FakeIotTransport::new(fixtures::iot_wallswitch());
        let resp = fake.send(r#"{"emeter":{"get_realtime":{}}}"#).await.unwrap();
        assert_eq!(resp["emeter"]["err_code"], -1);
    }

    #[tokio::test]
    async fn iot_child_context() {
        let mut fake = FakeIotTransport::new(fixtures::iot_strip());
        let id = fake.sysinfo()["children"][1]["id"].as_str().unwrap().to_string();
        let request = json!({
            "context": {"child_ids": [id]},
            "system": {"set_relay_state": {"state": 1}}
        });
        fake.send(&request.to_string()).await.unwrap();
        assert_eq!(fake.sysinfo()["children"][1]["state"], 1);
        assert_eq!(fake.sysinfo()["relay_state"], Value::Null);
    }

    #[tokio::test]
    async fn iot_light_off_keeps_default_state() {
        let mut fake = FakeIotTransport::new(fixtures::iot_bulb());
        let request = json!({LIGHT_SERVICE: {"transition_light_state": {"on_off": 0}}});
        let resp = fake.send(&request.to_string()).await.unwrap();
        let state = &resp[LIGHT_SERVICE]["transition_light_state"];
        assert_eq!(state["on_off"], 0);
        assert_eq!(state["dft_on_state"]["brightness"], 80);

        let request = json!({LIGHT_SERVICE: {"transition_light_state": {"on_off": 1, "brightness": 20}}});
        fake.send(&request.to_string()).await.unwrap();
        assert_eq!(fake.sysinfo()["light_state"]["brightness"], 20);
        assert_eq!(fake.sysinfo()["light_state"]["hue"], 120);
    }

    #[tokio::test]
    async fn smart_multiple_request_and_setters() {
        let mut fake = FakeSmartTransport::new(fixtures::smart_plug());
        let request = json!({
            "method": "multipleRequest",
            "params": {"requests": [
                {"method": "set_auto_off_config", "params": {"enable": true, "delay_min": 5}},
                {"method": "get_auto_off_config", "params": {"start_index": 0}},
                {"method": "get_nonexistent", "params": null}
            ]}
        });
        let resp = fake.send(&request.to_string()).await.unwrap();
        let responses = resp["result"]["responses"].as_array().unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[1]["result"]["delay_min"], 5);
        assert_eq!(responses[2]["error_code"], -1002);
    }

    #[tokio::test]
    async fn smart_control_child_updates_parent_list() {
        let mut fake = FakeSmartTransport::new(fixtures::smart_strip());
        let device_id = fake.info()["get_child_device_list"]["child_device_list"][1]["device_id"]
            .as_str()
            .unwrap()
            .to_string();
        let request = json!({
            "method": "control_child",
            "params": {
                "device_id": device_id,
                "requestData": {"method": "set_device_info", "params": {"device_on": true}}
            }
        });
        let resp = fake.send(&request.to_string()).await.unwrap();
        assert_eq!(resp["result"]["responseData"]["error_code"], 0);
        assert_eq!(
            fake.info()["get_child_device_list"]["child_device_list"][1]["device_on"],
            true
        );
    }

    #[tokio::test]
    async fn smart_pagination() {
        let mut fake = FakeSmartTransport::new(fixtures::smart_strip()).with_page_size(2);
        let resp = fake
            .send(r#"{"method":"get_child_device_list","params":{"start_index":2}}"#)
            .await
            .unwrap();
        assert_eq!(resp["result"]["start_index"], 2);
        assert_eq!(resp["result"]["child_device_list"].as_array().unwrap().len(), 1);
    }
}
