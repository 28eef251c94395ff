use kasa_protocol::Result;

use super::{unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};

pub struct Temperature {
    version: u32,
}

impl Temperature {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// "celsius" or "fahrenheit".
    pub fn unit<'a>(ctx: &ModuleContext<'a>) -> &'a str {
        ctx.info["temp_unit"].as_str().unwrap_or("celsius")
    }
}

impl SmartModule for Temperature {
    fn name(&self) -> &'static str {
        "Temperature"
    }

    fn required_component(&self) -> &'static str {
        "temperature"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn features(&self, ctx: &ModuleContext<'_>) -> Vec<Feature> {
        let name = self.name();
        let unit = if Self::unit(ctx) == "fahrenheit" { "°F" } else { "°C" };
        vec![
            Feature::new("Temperature", name, "temperature", FeatureType::Sensor)
                .with_unit(unit)
                .with_icon("mdi:thermometer"),
            Feature::new("Temperature warning", name, "temperature_warning", FeatureType::BinarySensor)
                .with_icon("mdi:alert"),
        ]
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        match attribute {
            "temperature" => Ok(FeatureValue::from_json(&ctx.info["current_temp"])),
            "temperature_warning" => Ok(FeatureValue::Bool(
                ctx.info["current_temp_exception"].as_i64().unwrap_or(0) != 0,
            )),
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
    fn unit_follows_device() {
        let info = json!({"current_temp": 21.5, "current_temp_exception": 0, "temp_unit": "fahrenheit"});
        let responses = responses(&[]);
        let ctx = context(&info, &responses);
        let module = Temperature::new(1);
        assert_eq!(module.read("temperature", &ctx).unwrap(), FeatureValue::Float(21.5));
        assert_eq!(
            module.read("temperature_warning", &ctx).unwrap(),
            FeatureValue::Bool(false)
        );
        assert_eq!(module.features(&ctx)[0].unit.as_deref(), Some("°F"));
    }
}
