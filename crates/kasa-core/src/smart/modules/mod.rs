//! SMART device modules.
//!
//! A module is created for each negotiated component it handles. Modules
//! contribute to the update query, expose features, and read their data
//! from the responses of the last update through a [`ModuleContext`].

mod autooff;
mod brightness;
mod child_device;
mod cloud;
mod device;
mod energy;
mod firmware;
mod humidity;
mod lighttransition;
mod temperature;
mod time;

use chrono::NaiveDateTime;
use kasa_protocol::{KasaError, Result};
use serde_json::{json, Map, Value};

use crate::feature::{Feature, FeatureValue};
use crate::protocol::{SmartRequest, SmartResponse};

pub use autooff::AutoOff;
pub use brightness::Brightness;
pub use child_device::ChildDevice;
pub use cloud::Cloud;
pub use device::DeviceModule;
pub use energy::Energy;
pub use firmware::{Firmware, UpdateInfo};
pub use humidity::Humidity;
pub use lighttransition::LightTransition;
pub use temperature::Temperature;
pub use time::Time;

/// Components with a module, in the order modules are created.
const KNOWN_COMPONENTS: [&str; 11] = [
    "device",
    "child_device",
    "time",
    "cloud_connect",
    "firmware",
    "energy_monitoring",
    "brightness",
    "on_off_gradually",
    "auto_off",
    "humidity",
    "temperature",
];

/// Modules children do not get; the parent answers for them.
pub(crate) const PARENT_ONLY_MODULES: [&str; 3] = ["Time", "Cloud", "Firmware"];

pub trait SmartModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn required_component(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Methods to include in the regular update. Empty means the module
    /// reads device info.
    fn query(&self) -> SmartRequest {
        SmartRequest::new()
    }

    fn features(&self, ctx: &ModuleContext<'_>) -> Vec<Feature>;

    fn read(&self, attribute: &str, ctx: &ModuleContext<'_>) -> Result<FeatureValue>;

    /// Build the request that applies `value` through `attribute`.
    fn write(
        &self,
        attribute: &str,
        _value: &FeatureValue,
        _ctx: &ModuleContext<'_>,
    ) -> Result<SmartRequest> {
        Err(KasaError::kasa(format!(
            "Module {} cannot set {attribute}",
            self.name()
        )))
    }
}

/// Create the module handling `component`, if any.
pub fn create_module(component: &str, version: u32) -> Option<Box<dyn SmartModule>> {
    let module: Box<dyn SmartModule> = match component {
        "device" => Box::new(DeviceModule::new(version)),
        "child_device" => Box::new(ChildDevice::new(version)),
        "time" => Box::new(Time::new(version)),
        "cloud_connect" => Box::new(Cloud::new(version)),
        "firmware" => Box::new(Firmware::new(version)),
        "energy_monitoring" => Box::new(Energy::new(version)),
        "brightness" => Box::new(Brightness::new(version)),
        "on_off_gradually" => Box::new(LightTransition::new(version)),
        "auto_off" => Box::new(AutoOff::new(version)),
        "humidity" => Box::new(Humidity::new(version)),
        "temperature" => Box::new(Temperature::new(version)),
        _ => return None,
    };
    Some(module)
}

/// Modules for the given components, in creation order.
pub fn modules_for<'a>(
    components: impl Fn(&str) -> Option<u32> + 'a,
) -> impl Iterator<Item = Box<dyn SmartModule>> + 'a {
    KNOWN_COMPONENTS
        .into_iter()
        .filter_map(move |component| create_module(component, components(component)?))
}

/// Everything a module may read while answering a feature.
pub struct ModuleContext<'a> {
    pub host: &'a str,
    /// Device info from the last update.
    pub info: &'a Value,
    pub responses: &'a SmartResponse,
    /// Responses of the parent's last update, for child devices.
    pub parent: Option<&'a SmartResponse>,
    /// Device time, when known.
    pub time: Option<NaiveDateTime>,
}

impl<'a> ModuleContext<'a> {
    fn lookup(&self, method: &str) -> Option<&'a crate::protocol::MethodResult> {
        self.responses
            .get(method)
            .or_else(|| self.parent.and_then(|p| p.get(method)))
    }

    fn not_updated(name: &str) -> KasaError {
        KasaError::kasa(format!(
            "You need to call update() prior accessing module data for '{name}'"
        ))
    }

    /// Result of a method from the last update. Error codes become errors.
    pub fn response(&self, name: &str, method: &str) -> Result<&'a Value> {
        match self.lookup(method) {
            Some(Ok(value)) => Ok(value),
            Some(Err(code)) => Err(KasaError::from_smart_code(
                format!("Error {code} getting request {method} for device {}", self.host),
                *code,
            )),
            None => Err(Self::not_updated(name)),
        }
    }

    /// Whether the last update answered `method` with an error code.
    pub fn is_error(&self, method: &str) -> bool {
        matches!(self.lookup(method), Some(Err(_)))
    }

    /// Data for a module.
    ///
    /// Device info for modules without a query, the single response for
    /// single-method queries, otherwise a map of method to response. Error
    /// codes appear as `{"error_code": n}`.
    pub fn data(&self, module: &dyn SmartModule) -> Result<Value> {
        let query = module.query();
        let Some(first) = query.keys().next() else {
            return Ok(self.info.clone());
        };
        if self.lookup(first).is_none() {
            return Err(Self::not_updated(module.name()));
        }

        let as_value = |result: &crate::protocol::MethodResult| match result {
            Ok(value) => value.clone(),
            Err(code) => json!({"error_code": code.code()}),
        };
        let found: Map<String, Value> = query
            .keys()
            .filter_map(|method| Some((method.clone(), as_value(self.lookup(method)?))))
            .collect();
        if found.len() == 1 {
            return Ok(found.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null));
        }
        Ok(Value::Object(found))
    }

    /// Whether every method of the module's query failed.
    pub fn all_failed(&self, module: &dyn SmartModule) -> bool {
        let query = module.query();
        !query.is_empty() && query.keys().all(|method| self.is_error(method))
    }
}

pub(crate) fn unknown_attribute(module: &str, attribute: &str) -> KasaError {
    KasaError::kasa(format!("Module {module} has no attribute {attribute}"))
}

pub(crate) fn expect_bool(value: &FeatureValue, attribute: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| KasaError::invalid_value(format!("{attribute} expects a boolean, got {value}")))
}

pub(crate) fn expect_int(value: &FeatureValue, attribute: &str) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| KasaError::invalid_value(format!("{attribute} expects a number, got {value}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn responses(pairs: &[(&str, Value)]) -> SmartResponse {
        pairs
            .iter()
            .map(|(method, value)| (method.to_string(), Ok(value.clone())))
            .collect()
    }

    pub fn context<'a>(info: &'a Value, responses: &'a SmartResponse) -> ModuleContext<'a> {
        ModuleContext {
            host: "127.0.0.1",
            info,
            responses,
            parent: None,
            time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use kasa_protocol::SmartErrorCode;

    #[test]
    fn registry_covers_known_components() {
        for component in KNOWN_COMPONENTS {
            let module = create_module(component, 1).unwrap();
            assert_eq!(module.required_component(), component);
        }
        assert!(create_module("countdown", 1).is_none());
    }

    #[test]
    fn modules_follow_creation_order() {
        let names: Vec<_> = modules_for(|c| match c {
            "auto_off" | "device" | "time" => Some(2),
            _ => None,
        })
        .map(|m| m.name())
        .collect();
        assert_eq!(names, vec!["DeviceModule", "Time", "AutoOff"]);
    }

    #[test]
    fn data_shapes() {
        let info = json!({"brightness": 10});
        let responses = responses(&[
            ("get_auto_off_config", json!({"enable": true})),
            ("get_energy_usage", json!({"today_energy": 1})),
            ("get_current_power", json!({"current_power": 2})),
        ]);
        let ctx = context(&info, &responses);

        assert_eq!(ctx.data(&Brightness::new(1)).unwrap(), info);
        assert_eq!(ctx.data(&AutoOff::new(1)).unwrap(), json!({"enable": true}));
        let energy = ctx.data(&Energy::new(2)).unwrap();
        assert_eq!(energy["get_current_power"]["current_power"], 2);
        assert_eq!(energy["get_energy_usage"]["today_energy"], 1);
    }

    #[test]
    fn data_before_update() {
        let info = json!({});
        let responses = SmartResponse::new();
        let ctx = context(&info, &responses);
        let err = ctx.data(&AutoOff::new(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "You need to call update() prior accessing module data for 'AutoOff'"
        );
    }

    #[test]
    fn children_fall_back_to_parent() {
        let info = json!({});
        let own = SmartResponse::new();
        let parent = responses(&[("get_device_time", json!({"timestamp": 0}))]);
        let ctx = ModuleContext {
            host: "127.0.0.1",
            info: &info,
            responses: &own,
            parent: Some(&parent),
            time: None,
        };
        assert_eq!(
            ctx.response("Time", "get_device_time").unwrap(),
            &json!({"timestamp": 0})
        );
    }

    #[test]
    fn error_codes_in_data() {
        let info = json!({});
        let mut responses = SmartResponse::new();
        responses.insert(
            "get_connect_cloud_state".to_string(),
            Err(SmartErrorCode::UnknownMethodError),
        );
        let ctx = context(&info, &responses);
        assert_eq!(
            ctx.data(&Cloud::new(1)).unwrap(),
            json!({"error_code": SmartErrorCode::UnknownMethodError.code()})
        );
        assert!(ctx.all_failed(&Cloud::new(1)));
        assert!(ctx.response("Cloud", "get_connect_cloud_state").is_err());
    }
}
