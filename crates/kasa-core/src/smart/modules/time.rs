use chrono::{DateTime, Duration, NaiveDateTime};
use kasa_protocol::{KasaError, Result};
use serde_json::Value;

use super::{unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};
use crate::protocol::{smart_request, SmartRequest};

pub struct Time {
    version: u32,
}

impl Time {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// Local device time: the UTC timestamp shifted by `time_diff` minutes.
    pub fn time(ctx: &ModuleContext<'_>) -> Result<NaiveDateTime> {
        let data = ctx.response("Time", "get_device_time")?;
        let timestamp = data["timestamp"]
            .as_i64()
            .ok_or_else(|| KasaError::kasa(format!("Invalid device time: {data}")))?;
        let utc = DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| KasaError::kasa(format!("Invalid device time: {data}")))?;
        let diff = data["time_diff"].as_i64().unwrap_or(0);
        Ok(utc.naive_utc() + Duration::minutes(diff))
    }
}

impl SmartModule for Time {
    fn name(&self) -> &'static str {
        "Time"
    }

    fn required_component(&self) -> &'static str {
        "time"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn query(&self) -> SmartRequest {
        smart_request([("get_device_time", Value::Null)])
    }

    fn features(&self, _ctx: &ModuleContext<'_>) -> Vec<Feature> {
        vec![Feature::new("Time", self.name(), "time", FeatureType::Sensor).with_icon("mdi:clock")]
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        match attribute {
            "time" => Ok(FeatureValue::Time(Self::time(ctx)?)),
            other => Err(unknown_attribute(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn applies_time_diff() {
        let info = json!({});
        let responses = responses(&[(
            "get_device_time",
            json!({"timestamp": 1_709_382_600, "time_diff": 60, "region": "Europe/Berlin"}),
        )]);
        let ctx = context(&info, &responses);
        assert_eq!(Time::time(&ctx).unwrap().to_string(), "2024-03-02 13:30:00");
    }
}
