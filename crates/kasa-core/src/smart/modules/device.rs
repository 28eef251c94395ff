use kasa_protocol::Result;
use serde_json::{json, Value};

use super::{expect_bool, unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};
use crate::protocol::{smart_request, SmartRequest};
use crate::smart::{decode_base64, on_since};

/// Basic device information and power state.
pub struct DeviceModule {
    version: u32,
}

impl DeviceModule {
    pub fn new(version: u32) -> Self {
        Self { version }
    }
}

impl SmartModule for DeviceModule {
    fn name(&self) -> &'static str {
        "DeviceModule"
    }

    fn required_component(&self) -> &'static str {
        "device"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn query(&self) -> SmartRequest {
        let mut query = smart_request([("get_device_info", Value::Null)]);
        if self.version >= 2 {
            query.insert("get_device_usage".to_string(), Value::Null);
        }
        query
    }

    fn features(&self, ctx: &ModuleContext<'_>) -> Vec<Feature> {
        let name = self.name();
        let has = |key: &str| ctx.info.get(key).is_some();
        let mut features =
            vec![Feature::new("Device ID", name, "device_id", FeatureType::Sensor)];
        if has("device_on") {
            features.push(
                Feature::new("State", name, "is_on", FeatureType::Switch).with_setter("set_state"),
            );
        }
        if has("signal_level") {
            features.push(
                Feature::new("Signal Level", name, "signal_level", FeatureType::Sensor)
                    .with_icon("mdi:signal"),
            );
        }
        if has("rssi") {
            features.push(
                Feature::new("RSSI", name, "rssi", FeatureType::Sensor)
                    .with_icon("mdi:signal")
                    .with_unit("dBm"),
            );
        }
        if has("ssid") {
            features.push(
                Feature::new("SSID", name, "ssid", FeatureType::Sensor).with_icon("mdi:wifi"),
            );
        }
        if has("overheated") {
            features.push(
                Feature::new("Overheated", name, "overheated", FeatureType::BinarySensor)
                    .with_icon("mdi:heat-wave"),
            );
        }
        if has("on_time") {
            features.push(
                Feature::new("On since", name, "on_since", FeatureType::Sensor)
                    .with_icon("mdi:clock"),
            );
        }
        features
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        let info = ctx.info;
        Ok(match attribute {
            "device_id" => FeatureValue::from_json(&info["device_id"]),
            "is_on" => FeatureValue::Bool(info["device_on"].as_bool().unwrap_or(false)),
            "signal_level" => FeatureValue::from_json(&info["signal_level"]),
            "rssi" => FeatureValue::from_json(&info["rssi"]),
            "ssid" => info["ssid"]
                .as_str()
                .and_then(decode_base64)
                .map_or(FeatureValue::None, FeatureValue::Text),
            "overheated" => FeatureValue::Bool(info["overheated"].as_bool().unwrap_or(false)),
            "on_since" => on_since(info, ctx.time).map_or(FeatureValue::None, FeatureValue::Time),
            other => return Err(unknown_attribute(self.name(), other)),
        })
    }

    fn write(
        &self,
        attribute: &str,
        value: &FeatureValue,
        _ctx: &ModuleContext<'_>,
    ) -> Result<SmartRequest> {
        match attribute {
            "set_state" => Ok(smart_request([(
                "set_device_info",
                json!({"device_on": expect_bool(value, attribute)?}),
            )])),
            other => Err(unknown_attribute(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn features_follow_info_keys() {
        let info = json!({"device_id": "abc", "device_on": true, "rssi": -40});
        let responses = responses(&[]);
        let ctx = context(&info, &responses);
        let module = DeviceModule::new(2);

        let names: Vec<_> = module.features(&ctx).into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["Device ID", "State", "RSSI"]);
        assert_eq!(module.read("is_on", &ctx).unwrap(), FeatureValue::Bool(true));
        assert_eq!(module.read("rssi", &ctx).unwrap(), FeatureValue::Int(-40));
    }

    #[test]
    fn usage_is_queried_from_v2() {
        assert!(!DeviceModule::new(1).query().contains_key("get_device_usage"));
        assert!(DeviceModule::new(2).query().contains_key("get_device_usage"));
    }

    #[test]
    fn state_setter() {
        let info = json!({});
        let responses = responses(&[]);
        let ctx = context(&info, &responses);
        let request = DeviceModule::new(1)
            .write("set_state", &FeatureValue::Bool(false), &ctx)
            .unwrap();
        assert_eq!(request["set_device_info"], json!({"device_on": false}));
    }
}
