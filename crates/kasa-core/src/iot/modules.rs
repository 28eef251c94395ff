//! Optional IOT services queried alongside sysinfo.
//!
//! Each module names the service it talks to, contributes commands to the
//! regular update request and reads its features from the data the device
//! returned for that service.

use std::collections::BTreeMap;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use kasa_protocol::{EmeterStatus, KasaError, Result};
use serde_json::{json, Value};

use crate::feature::{Feature, FeatureType, FeatureValue};

pub trait IotModule: Send + Sync {
    /// Name used as the feature container.
    fn name(&self) -> &'static str;

    /// Service the module queries, e.g. `emeter` or `cnCloud`.
    fn target(&self) -> &'static str;

    fn estimated_query_response_size(&self) -> usize {
        256
    }

    fn query(&self) -> Value;

    fn features(&self) -> Vec<Feature> {
        Vec::new()
    }

    fn read(&self, attribute: &str, data: &Value) -> Result<FeatureValue>;
}

fn unknown_attribute(module: &str, attribute: &str) -> KasaError {
    KasaError::kasa(format!("Module {module} has no attribute {attribute}"))
}

fn command<'a>(data: &'a Value, cmd: &str) -> Result<&'a Value> {
    let result = data
        .get(cmd)
        .ok_or_else(|| KasaError::kasa(format!("No {cmd} in module data: {data}")))?;
    match result.get("err_code").and_then(Value::as_i64) {
        Some(code) if code != 0 => Err(KasaError::kasa(format!("Error on {cmd}: {result}"))),
        _ => Ok(result),
    }
}

// Emeter

pub struct Emeter {
    target: &'static str,
}

impl Emeter {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }

    pub fn realtime(data: &Value) -> Result<EmeterStatus> {
        Ok(EmeterStatus::from_value(command(data, "get_realtime")?))
    }

    /// Today's consumption in kWh.
    pub fn emeter_today(data: &Value) -> Option<f64> {
        let today = i64::from(Local::now().day());
        let list = data["get_daystat"]["day_list"].as_array()?;
        convert_stat_data(list, "day", true, Some(today))
            .get(&today)
            .copied()
    }

    /// This month's consumption in kWh.
    pub fn emeter_this_month(data: &Value) -> Option<f64> {
        let month = i64::from(Local::now().month());
        let list = data["get_monthstat"]["month_list"].as_array()?;
        convert_stat_data(list, "month", true, Some(month))
            .get(&month)
            .copied()
    }

    pub fn daystat_params(year: Option<i32>, month: Option<u32>) -> Value {
        let now = Local::now();
        json!({
            "year": year.unwrap_or(now.year()),
            "month": month.unwrap_or(now.month()),
        })
    }

    pub fn monthstat_params(year: Option<i32>) -> Value {
        json!({"year": year.unwrap_or(Local::now().year())})
    }
}

/// Key stat entries by day or month.
///
/// Entries carry either `energy_wh` or `energy` (kWh) depending on firmware;
/// the result is in kWh when `kwh` is set, Wh otherwise. With `key`, only
/// that entry is returned, searching from the newest end.
pub fn convert_stat_data(
    data: &[Value],
    entry_key: &str,
    kwh: bool,
    key: Option<i64>,
) -> BTreeMap<i64, f64> {
    let Some(first) = data.first() else {
        return BTreeMap::new();
    };

    let (value_key, scale) = if first.get("energy_wh").is_some() {
        ("energy_wh", if kwh { 1.0 / 1000.0 } else { 1.0 })
    } else {
        ("energy", if kwh { 1.0 } else { 1000.0 })
    };
    let entry = |e: &Value| -> Option<(i64, f64)> {
        Some((e[entry_key].as_i64()?, e[value_key].as_f64()? * scale))
    };

    match key {
        None => data.iter().filter_map(entry).collect(),
        Some(key) => data
            .iter()
            .rev()
            .filter(|e| e[entry_key].as_i64() == Some(key))
            .find_map(entry)
            .into_iter()
            .collect(),
    }
}

impl IotModule for Emeter {
    fn name(&self) -> &'static str {
        "emeter"
    }

    fn target(&self) -> &'static str {
        self.target
    }

    fn query(&self) -> Value {
        json!({self.target: {
            "get_realtime": {},
            "get_daystat": Self::daystat_params(None, None),
            "get_monthstat": Self::monthstat_params(None),
        }})
    }

    fn features(&self) -> Vec<Feature> {
        let name = self.name();
        vec![
            Feature::new("Current consumption", name, "current_consumption", FeatureType::Sensor)
                .with_unit("W")
                .with_icon("mdi:flash"),
            Feature::new("Today's consumption", name, "emeter_today", FeatureType::Sensor)
                .with_unit("kWh"),
            Feature::new("This month's consumption", name, "emeter_this_month", FeatureType::Sensor)
                .with_unit("kWh"),
            Feature::new("Voltage", name, "voltage", FeatureType::Sensor).with_unit("V"),
            Feature::new("Current", name, "current", FeatureType::Sensor).with_unit("A"),
        ]
    }

    fn read(&self, attribute: &str, data: &Value) -> Result<FeatureValue> {
        let float = |v: Option<f64>| v.map_or(FeatureValue::None, FeatureValue::Float);
        Ok(match attribute {
            "current_consumption" => float(Self::realtime(data)?.power()),
            "voltage" => float(Self::realtime(data)?.voltage()),
            "current" => float(Self::realtime(data)?.current()),
            "emeter_today" => float(Self::emeter_today(data)),
            "emeter_this_month" => float(Self::emeter_this_month(data)),
            other => return Err(unknown_attribute(self.name(), other)),
        })
    }
}

// Cloud

pub struct Cloud {
    target: &'static str,
}

impl Cloud {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }

    pub fn is_connected(data: &Value) -> Result<bool> {
        Ok(command(data, "get_info")?["binded"].as_i64().unwrap_or(0) != 0)
    }
}

impl IotModule for Cloud {
    fn name(&self) -> &'static str {
        "cloud"
    }

    fn target(&self) -> &'static str {
        self.target
    }

    fn query(&self) -> Value {
        json!({self.target: {"get_info": {}}})
    }

    fn features(&self) -> Vec<Feature> {
        vec![
            Feature::new("Cloud connection", self.name(), "is_connected", FeatureType::BinarySensor)
                .with_icon("mdi:cloud"),
        ]
    }

    fn read(&self, attribute: &str, data: &Value) -> Result<FeatureValue> {
        match attribute {
            "is_connected" => Ok(FeatureValue::Bool(Self::is_connected(data)?)),
            other => Err(unknown_attribute(self.name(), other)),
        }
    }
}

// Time

pub struct Time {
    target: &'static str,
}

impl Time {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }

    pub fn time(data: &Value) -> Result<NaiveDateTime> {
        let res = command(data, "get_time")?;
        let field = |key: &str| res[key].as_u64().map(|v| v as u32);
        let year = res["year"].as_i64().map(|y| y as i32);
        let time = match (year, field("month"), field("mday")) {
            (Some(year), Some(month), Some(day)) => NaiveDate::from_ymd_opt(year, month, day)
                .and_then(|date| {
                    date.and_hms_opt(field("hour")?, field("min")?, field("sec")?)
                }),
            _ => None,
        };
        time.ok_or_else(|| KasaError::kasa(format!("Invalid time response: {res}")))
    }

    pub fn timezone(data: &Value) -> Result<Value> {
        command(data, "get_timezone").cloned()
    }
}

impl IotModule for Time {
    fn name(&self) -> &'static str {
        "time"
    }

    fn target(&self) -> &'static str {
        self.target
    }

    fn query(&self) -> Value {
        json!({self.target: {"get_time": {}, "get_timezone": {}}})
    }

    fn read(&self, attribute: &str, data: &Value) -> Result<FeatureValue> {
        match attribute {
            "time" => Ok(FeatureValue::Time(Self::time(data)?)),
            other => Err(unknown_attribute(self.name(), other)),
        }
    }
}
