use kasa_protocol::Result;
use serde_json::Value;

use super::{unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureValue};
use crate::protocol::{smart_request, SmartRequest};

/// Keeps the child list fresh on every update.
pub struct ChildDevice {
    version: u32,
}

impl ChildDevice {
    pub fn new(version: u32) -> Self {
        Self { version }
    }
}

impl SmartModule for ChildDevice {
    fn name(&self) -> &'static str {
        "ChildDevice"
    }

    fn required_component(&self) -> &'static str {
        "child_device"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn query(&self) -> SmartRequest {
        smart_request([("get_child_device_list", Value::Null)])
    }

    fn features(&self, _ctx: &ModuleContext<'_>) -> Vec<Feature> {
        Vec::new()
    }

    fn read(&self, attribute: &str, _ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        Err(unknown_attribute(self.name(), attribute))
    }
}
