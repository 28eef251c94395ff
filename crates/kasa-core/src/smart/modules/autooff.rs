use chrono::{Duration, NaiveDateTime};
use kasa_protocol::Result;
use serde_json::{json, Value};

use super::{expect_bool, expect_int, unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};
use crate::protocol::{smart_request, SmartRequest};

/// Turn the device off a set number of minutes after it was turned on.
pub struct AutoOff {
    version: u32,
}

impl AutoOff {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    fn config(&self, ctx: &ModuleContext<'_>) -> Result<Value> {
        ctx.data(self)
    }

    /// When the running timer will switch the device off.
    pub fn auto_off_at(ctx: &ModuleContext<'_>) -> Option<NaiveDateTime> {
        if ctx.info["auto_off_status"].as_str() != Some("on") {
            return None;
        }
        let remaining = ctx.info["auto_off_remain_time"].as_i64()?;
        Some(ctx.time? + Duration::seconds(remaining))
    }
}

impl SmartModule for AutoOff {
    fn name(&self) -> &'static str {
        "AutoOff"
    }

    fn required_component(&self) -> &'static str {
        "auto_off"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn query(&self) -> SmartRequest {
        smart_request([("get_auto_off_config", json!({"start_index": 0}))])
    }

    fn features(&self, _ctx: &ModuleContext<'_>) -> Vec<Feature> {
        let name = self.name();
        vec![
            Feature::new("Auto off enabled", name, "enabled", FeatureType::Switch)
                .with_setter("set_enabled"),
            Feature::new("Auto off minutes", name, "delay", FeatureType::Number)
                .with_setter("set_delay")
                .with_unit("min"),
            Feature::new("Auto off at", name, "auto_off_at", FeatureType::Sensor),
        ]
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        Ok(match attribute {
            "enabled" => FeatureValue::Bool(self.config(ctx)?["enable"].as_bool().unwrap_or(false)),
            "delay" => FeatureValue::from_json(&self.config(ctx)?["delay_min"]),
            "auto_off_at" => Self::auto_off_at(ctx).map_or(FeatureValue::None, FeatureValue::Time),
            other => return Err(unknown_attribute(self.name(), other)),
        })
    }

    fn write(
        &self,
        attribute: &str,
        value: &FeatureValue,
        ctx: &ModuleContext<'_>,
    ) -> Result<SmartRequest> {
        let config = self.config(ctx)?;
        let params = match attribute {
            "set_enabled" => json!({
                "enable": expect_bool(value, attribute)?,
                "delay_min": config["delay_min"],
            }),
            "set_delay" => json!({
                "delay_min": expect_int(value, attribute)?,
                "enable": config["enable"],
            }),
            other => return Err(unknown_attribute(self.name(), other)),
        };
        Ok(smart_request([("set_auto_off_config", params)]))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn setters_keep_the_other_field() {
        let info = json!({});
        let responses = responses(&[("get_auto_off_config", json!({"enable": false, "delay_min": 120}))]);
        let ctx = context(&info, &responses);
        let module = AutoOff::new(2);

        let request = module.write("set_enabled", &FeatureValue::Bool(true), &ctx).unwrap();
        assert_eq!(
            request["set_auto_off_config"],
            json!({"enable": true, "delay_min": 120})
        );
        let request = module.write("set_delay", &FeatureValue::Int(30), &ctx).unwrap();
        assert_eq!(
            request["set_auto_off_config"],
            json!({"enable": false, "delay_min": 30})
        );
    }

    #[test]
    fn timer_end() {
        let info = json!({"auto_off_status": "on", "auto_off_remain_time": 90});
        let responses = responses(&[]);
        let mut ctx = context(&info, &responses);
        let now = NaiveDate::from_ymd_opt(2024, 3, 2)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        ctx.time = Some(now);
        assert_eq!(
            AutoOff::auto_off_at(&ctx).unwrap().to_string(),
            "2024-03-02 12:01:30"
        );

        let idle = json!({"auto_off_status": "off"});
        let ctx = context(&idle, &responses);
        assert_eq!(AutoOff::auto_off_at(&ctx), None);
    }
}
