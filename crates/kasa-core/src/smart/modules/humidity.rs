use kasa_protocol::Result;

use super::{unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};

/// Humidity reported by hub-attached sensors.
pub struct Humidity {
    version: u32,
}

impl Humidity {
    pub fn new(version: u32) -> Self {
        Self { version }
    }
}

impl SmartModule for Humidity {
    fn name(&self) -> &'static str {
        "Humidity"
    }

    fn required_component(&self) -> &'static str {
        "humidity"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn features(&self, _ctx: &ModuleContext<'_>) -> Vec<Feature> {
        let name = self.name();
        vec![
            Feature::new("Humidity", name, "humidity", FeatureType::Sensor)
                .with_unit("%")
                .with_icon("mdi:water-percent"),
            Feature::new("Humidity warning", name, "humidity_warning", FeatureType::BinarySensor)
                .with_icon("mdi:alert"),
        ]
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        match attribute {
            "humidity" => Ok(FeatureValue::from_json(&ctx.info["current_humidity"])),
            // Set when the reading is outside the configured comfort range.
            "humidity_warning" => Ok(FeatureValue::Bool(
                ctx.info["current_humidity_exception"].as_i64().unwrap_or(0) != 0,
            )),
            other => Err(unknown_attribute(self.name(), other)),
        }
    }
}
