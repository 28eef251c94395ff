use kasa_protocol::Result;
use serde_json::Value;

use super::{unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};
use crate::protocol::{smart_request, SmartRequest};

pub struct Cloud {
    version: u32,
}

impl Cloud {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// Connected when the device reports status 0. Errors count as
    /// disconnected.
    pub fn is_connected(ctx: &ModuleContext<'_>) -> bool {
        ctx.response("Cloud", "get_connect_cloud_state")
            .is_ok_and(|state| state["status"].as_i64() == Some(0))
    }
}

impl SmartModule for Cloud {
    fn name(&self) -> &'static str {
        "Cloud"
    }

    fn required_component(&self) -> &'static str {
        "cloud_connect"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn query(&self) -> SmartRequest {
        smart_request([("get_connect_cloud_state", Value::Null)])
    }

    fn features(&self, _ctx: &ModuleContext<'_>) -> Vec<Feature> {
        vec![
            Feature::new("Cloud connection", self.name(), "is_connected", FeatureType::BinarySensor)
                .with_icon("mdi:cloud"),
        ]
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        match attribute {
            "is_connected" => Ok(FeatureValue::Bool(Self::is_connected(ctx))),
            other => Err(unknown_attribute(self.name(), other)),
        }
    }
}
