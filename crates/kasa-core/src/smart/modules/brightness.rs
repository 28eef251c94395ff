use kasa_protocol::Result;
use serde_json::json;

use super::{expect_int, unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};
use crate::protocol::{smart_request, SmartRequest};

pub const BRIGHTNESS_MIN: i64 = 1;
pub const BRIGHTNESS_MAX: i64 = 100;

pub struct Brightness {
    version: u32,
}

impl Brightness {
    pub fn new(version: u32) -> Self {
        Self { version }
    }
}

impl SmartModule for Brightness {
    fn name(&self) -> &'static str {
        "Brightness"
    }

    fn required_component(&self) -> &'static str {
        "brightness"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn features(&self, _ctx: &ModuleContext<'_>) -> Vec<Feature> {
        vec![
            Feature::new("Brightness", self.name(), "brightness", FeatureType::Number)
                .with_setter("set_brightness")
                .with_icon("mdi:brightness-4")
                .with_range(BRIGHTNESS_MIN, BRIGHTNESS_MAX),
        ]
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        match attribute {
            "brightness" => Ok(FeatureValue::from_json(&ctx.info["brightness"])),
            other => Err(unknown_attribute(self.name(), other)),
        }
    }

    fn write(
        &self,
        attribute: &str,
        value: &FeatureValue,
        _ctx: &ModuleContext<'_>,
    ) -> Result<SmartRequest> {
        match attribute {
            "set_brightness" => Ok(smart_request([(
                "set_device_info",
                json!({"brightness": expect_int(value, attribute)?}),
            )])),
            other => Err(unknown_attribute(self.name(), other)),
        }
    }
}
