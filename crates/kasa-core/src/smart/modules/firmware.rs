use kasa_protocol::{KasaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{expect_bool, unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};
use crate::protocol::{smart_request, SmartRequest};
use crate::smart::SmartDevice;

/// Latest firmware as reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateInfo {
    #[serde(rename = "type", default)]
    pub status: i64,
    #[serde(rename = "need_to_upgrade", default)]
    pub needs_upgrade: bool,
    #[serde(default)]
    pub fw_ver: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub release_date: Option<String>,
    #[serde(rename = "release_note", default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub fw_size: Option<i64>,
    #[serde(default)]
    pub oem_id: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()))
}

impl UpdateInfo {
    pub fn update_available(&self) -> bool {
        self.status != 0
    }
}

pub struct Firmware {
    version: u32,
}

impl Firmware {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// Latest firmware info. A failed query means no update is known.
    pub fn latest_firmware(ctx: &ModuleContext<'_>) -> Result<UpdateInfo> {
        if ctx.is_error("get_latest_fw") {
            return Ok(UpdateInfo::default());
        }
        let latest = ctx.response("Firmware", "get_latest_fw")?;
        Ok(serde_json::from_value(latest.clone())?)
    }

    pub fn auto_update_enabled(ctx: &ModuleContext<'_>) -> bool {
        ctx.response("Firmware", "get_auto_update_info")
            .is_ok_and(|info| info["enable"].as_bool() == Some(true))
    }
}

impl SmartModule for Firmware {
    fn name(&self) -> &'static str {
        "Firmware"
    }

    fn required_component(&self) -> &'static str {
        "firmware"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn query(&self) -> SmartRequest {
        let mut query = smart_request([("get_latest_fw", Value::Null)]);
        if self.version > 1 {
            query.insert("get_auto_update_info".to_string(), Value::Null);
        }
        query
    }

    fn features(&self, _ctx: &ModuleContext<'_>) -> Vec<Feature> {
        let name = self.name();
        let mut features = Vec::new();
        if self.version > 1 {
            features.push(
                Feature::new("Auto update enabled", name, "auto_update_enabled", FeatureType::Switch)
                    .with_setter("set_auto_update_enabled"),
            );
        }
        features.push(Feature::new(
            "Update available",
            name,
            "update_available",
            FeatureType::BinarySensor,
        ));
        features
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        match attribute {
            "auto_update_enabled" => Ok(FeatureValue::Bool(Self::auto_update_enabled(ctx))),
            "update_available" => Ok(FeatureValue::Bool(
                Self::latest_firmware(ctx)?.update_available(),
            )),
            other => Err(unknown_attribute(self.name(), other)),
        }
    }

    fn write(
        &self,
        attribute: &str,
        value: &FeatureValue,
        ctx: &ModuleContext<'_>,
    ) -> Result<SmartRequest> {
        match attribute {
            "set_auto_update_enabled" => {
                let mut data = ctx.response(self.name(), "get_auto_update_info")?.clone();
                data["enable"] = json!(expect_bool(value, attribute)?);
                Ok(smart_request([("set_auto_update_info", data)]))
            }
            other => Err(unknown_attribute(self.name(), other)),
        }
    }
}

impl SmartDevice {
    fn require_firmware(&self) -> Result<()> {
        if self.has_module("Firmware") {
            Ok(())
        } else {
            Err(KasaError::kasa("Device has no firmware module"))
        }
    }

    pub fn firmware_update_info(&self) -> Result<UpdateInfo> {
        self.require_firmware()?;
        Firmware::latest_firmware(&self.context())
    }

    /// Progress of a running firmware download.
    pub async fn get_update_state(&self) -> Result<Value> {
        self.require_firmware()?;
        self.call("get_fw_download_state", Value::Null).await
    }

    /// Ask the device to download and install the latest firmware.
    pub async fn update_firmware(&self) -> Result<()> {
        self.require_firmware()?;
        debug!("Starting firmware download on {}", self.host());
        self.call("fw_download", Value::Null).await.map(|_| ())
    }

    pub async fn set_auto_update_enabled(&self, enabled: bool) -> Result<()> {
        self.set_feature_value("auto_update_enabled", &FeatureValue::Bool(enabled))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use kasa_protocol::SmartErrorCode;

    #[test]
    fn update_info_fields() {
        let info: UpdateInfo = serde_json::from_value(json!({
            "type": 2,
            "need_to_upgrade": true,
            "fw_ver": "1.2.1",
            "release_date": "",
            "release_note": "Fixes",
            "fw_size": 10
        }))
        .unwrap();
        assert!(info.update_available());
        assert!(info.needs_upgrade);
        assert_eq!(info.release_date, None);
        assert_eq!(info.release_notes.as_deref(), Some("Fixes"));
    }

    #[test]
    fn error_means_no_update() {
        let info = json!({});
        let mut responses = responses(&[]);
        responses.insert(
            "get_latest_fw".to_string(),
            Err(SmartErrorCode::CloudFailedError),
        );
        let ctx = context(&info, &responses);
        let module = Firmware::new(1);
        assert_eq!(
            module.read("update_available", &ctx).unwrap(),
            FeatureValue::Bool(false)
        );
    }

    #[test]
    fn auto_update_only_from_v2() {
        let info = json!({});
        let responses = responses(&[]);
        let ctx = context(&info, &responses);
        assert_eq!(Firmware::new(1).features(&ctx).len(), 1);
        assert_eq!(Firmware::new(2).features(&ctx).len(), 2);
        assert!(Firmware::new(2).query().contains_key("get_auto_update_info"));
    }

    #[test]
    fn auto_update_setter_keeps_settings() {
        let info = json!({});
        let responses = responses(&[(
            "get_auto_update_info",
            json!({"enable": true, "random_range": 120, "time": 180}),
        )]);
        let ctx = context(&info, &responses);
        let request = Firmware::new(2)
            .write("set_auto_update_enabled", &FeatureValue::Bool(false), &ctx)
            .unwrap();
        assert_eq!(
            request["set_auto_update_info"],
            json!({"enable": false, "random_range": 120, "time": 180})
        );
    }
}
