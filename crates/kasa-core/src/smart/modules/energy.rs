use kasa_protocol::{EmeterStatus, Result};
use serde_json::{json, Value};

use super::{unknown_attribute, ModuleContext, SmartModule};
use crate::feature::{Feature, FeatureType, FeatureValue};
use crate::protocol::{smart_request, SmartRequest};

/// Energy monitoring on plugs.
pub struct Energy {
    version: u32,
}

impl Energy {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// Current draw in W.
    pub fn current_power(ctx: &ModuleContext<'_>) -> Result<Option<f64>> {
        if let Ok(power) = ctx.response("Energy", "get_current_power") {
            return Ok(power["current_power"].as_f64());
        }
        let usage = ctx.response("Energy", "get_energy_usage")?;
        Ok(usage["current_power"].as_f64().map(|mw| mw / 1000.0))
    }

    /// Today's consumption in Wh.
    pub fn emeter_today(ctx: &ModuleContext<'_>) -> Result<Option<f64>> {
        Ok(ctx.response("Energy", "get_energy_usage")?["today_energy"].as_f64())
    }

    /// This month's consumption in Wh.
    pub fn emeter_this_month(ctx: &ModuleContext<'_>) -> Result<Option<f64>> {
        Ok(ctx.response("Energy", "get_energy_usage")?["month_energy"].as_f64())
    }

    /// Realtime reading in the same shape IOT devices report.
    pub fn status(ctx: &ModuleContext<'_>) -> Result<EmeterStatus> {
        let power = Self::current_power(ctx)?.unwrap_or(0.0);
        let today = Self::emeter_today(ctx)?.unwrap_or(0.0);
        Ok(EmeterStatus::from_value(&json!({
            "power_mw": power * 1000.0,
            "energy_wh": today,
        })))
    }
}

impl SmartModule for Energy {
    fn name(&self) -> &'static str {
        "Energy"
    }

    fn required_component(&self) -> &'static str {
        "energy_monitoring"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn query(&self) -> SmartRequest {
        let mut query = smart_request([("get_energy_usage", Value::Null)]);
        if self.version > 1 {
            query.insert("get_current_power".to_string(), Value::Null);
        }
        query
    }

    fn features(&self, _ctx: &ModuleContext<'_>) -> Vec<Feature> {
        let name = self.name();
        vec![
            Feature::new("Current consumption", name, "current_power", FeatureType::Sensor)
                .with_unit("W")
                .with_icon("mdi:flash"),
            Feature::new("Today's consumption", name, "emeter_today", FeatureType::Sensor)
                .with_unit("Wh")
                .with_icon("mdi:flash"),
            Feature::new("This month's consumption", name, "emeter_this_month", FeatureType::Sensor)
                .with_unit("Wh")
                .with_icon("mdi:flash"),
        ]
    }

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue> {
        let value = match attribute {
            "current_power" => Self::current_power(ctx)?,
            "emeter_today" => Self::emeter_today(ctx)?,
            "emeter_this_month" => Self::emeter_this_month(ctx)?,
            other => return Err(unknown_attribute(self.name(), other)),
        };
        Ok(value.map_or(FeatureValue::None, FeatureValue::Float))
    }
}
