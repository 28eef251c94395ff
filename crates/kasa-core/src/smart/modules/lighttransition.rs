use kasa_protocol::{KasaError, Result};
use serde_json::{json, Value};

use super::{expect_bool, expect_int, unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};
use crate::protocol::{smart_request, SmartRequest};

const MAXIMUM_DURATION: i64 = 60;
const SET_METHOD: &str = "set_on_off_gradually_info";

/// Gradual on/off. Version 1 is a single switch, version 2 and later have
/// separate on and off durations.
pub struct LightTransition {
    version: u32,
}

impl LightTransition {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    fn state(&self, key: &str, ctx: &ModuleContext<'_>) -> Result<Value> {
        let data = ctx.data(self)?;
        data.get(key).cloned().ok_or_else(|| {
            KasaError::kasa(format!(
                "Unsupported for {} v{}",
                self.required_component(),
                self.version
            ))
        })
    }

    fn set_duration(&self, key: &str, seconds: i64, ctx: &ModuleContext<'_>) -> Result<SmartRequest> {
        let mut state = self.state(key, ctx)?;
        let max = state["max_duration"].as_i64().unwrap_or(MAXIMUM_DURATION);
        if !(0..=max).contains(&seconds) {
            return Err(KasaError::invalid_value(format!(
                "Value {seconds} out of range, max {max}"
            )));
        }
        // Zero switches the transition off and keeps the stored duration.
        if seconds == 0 {
            state["enable"] = json!(false);
        } else {
            state["duration"] = json!(seconds);
        }
        Ok(smart_request([(SET_METHOD, json!({ key: state }))]))
    }
}

impl SmartModule for LightTransition {
    fn name(&self) -> &'static str {
        "LightTransition"
    }

    fn required_component(&self) -> &'static str {
        "on_off_gradually"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn query(&self) -> SmartRequest {
        smart_request([("get_on_off_gradually_info", Value::Null)])
    }

    fn features(&self, _ctx: &ModuleContext<'_>) -> Vec<Feature> {
        let name = self.name();
        let icon = "mdi:transition";
        if self.version == 1 {
            return vec![
                Feature::new("Smooth transitions", name, "enabled_v1", FeatureType::Switch)
                    .with_setter("set_enabled_v1")
                    .with_icon(icon),
            ];
        }
        vec![
            Feature::new("Smooth transition on", name, "turn_on_transition", FeatureType::Number)
                .with_setter("set_turn_on_transition")
                .with_icon(icon)
                .with_range(0, MAXIMUM_DURATION),
            Feature::new("Smooth transition off", name, "turn_off_transition", FeatureType::Number)
                .with_setter("set_turn_off_transition")
                .with_icon(icon)
                .with_range(0, MAXIMUM_DURATION),
        ]
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        match attribute {
            "enabled_v1" => Ok(FeatureValue::Bool(
                ctx.data(self)?["enable"].as_bool().unwrap_or(false),
            )),
            "turn_on_transition" => Ok(FeatureValue::from_json(
                &self.state("on_state", ctx)?["duration"],
            )),
            "turn_off_transition" => Ok(FeatureValue::from_json(
                &self.state("off_state", ctx)?["duration"],
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
            "set_enabled_v1" => Ok(smart_request([(
                SET_METHOD,
                json!({"enable": expect_bool(value, attribute)?}),
            )])),
            "set_turn_on_transition" => {
                self.set_duration("on_state", expect_int(value, attribute)?, ctx)
            }
            "set_turn_off_transition" => {
                self.set_duration("off_state", expect_int(value, attribute)?, ctx)
            }
            other => Err(unknown_attribute(self.name(), other)),
        }
    }
}
