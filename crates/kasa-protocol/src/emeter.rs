//! Energy meter readings.
//!
//! Devices report either scaled units (`power_mw`, `voltage_mv`, ...) or plain
//! units (`power`, `voltage`, ...) depending on firmware. `EmeterStatus`
//! answers both spellings regardless of which one the device sent.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const VALID_KEYS: [&str; 10] = [
    "voltage_mv",
    "power_mw",
    "current_ma",
    "energy_wh",
    "total_wh",
    "voltage",
    "power",
    "current",
    "total",
    "energy",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmeterStatus(pub Map<String, Value>);

impl EmeterStatus {
    pub fn from_value(value: &Value) -> Self {
        Self(value.as_object().cloned().unwrap_or_default())
    }

    /// Look up a reading, converting between unit spellings when needed.
    pub fn get(&self, key: &str) -> Option<f64> {
        if let Some(value) = self.0.get(key) {
            return value.as_f64();
        }
        if !VALID_KEYS.contains(&key) {
            return None;
        }
        if let Some(idx) = key.find('_') {
            return self
                .0
                .get(&key[..idx])
                .and_then(Value::as_f64)
                .map(|v| v * 1000.0);
        }
        self.0
            .iter()
            .find(|(k, _)| k.starts_with(key))
            .and_then(|(_, v)| v.as_f64())
            .map(|v| v / 1000.0)
    }

    /// Voltage in V.
    pub fn voltage(&self) -> Option<f64> {
        self.get("voltage")
    }

    /// Power in W.
    pub fn power(&self) -> Option<f64> {
        self.get("power")
    }

    /// Current in A.
    pub fn current(&self) -> Option<f64> {
        self.get("current")
    }

    /// Total consumption in kWh.
    pub fn total(&self) -> Option<f64> {
        self.get("total")
    }
}

impl fmt::Display for EmeterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<f64>| v.map_or_else(|| "None".to_string(), |v| v.to_string());
        write!(
            f,
            "<EmeterStatus power={} voltage={} current={} total={}>",
            show(self.power()),
            show(self.voltage()),
            show(self.current()),
            show(self.total())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scaled_readings_downscale() {
        let status = EmeterStatus::from_value(&json!({
            "voltage_mv": 230_000, "power_mw": 1500, "current_ma": 20, "total_wh": 12_000
        }));
        assert_eq!(status.voltage(), Some(230.0));
        assert_eq!(status.power(), Some(1.5));
        assert_eq!(status.current(), Some(0.02));
        assert_eq!(status.total(), Some(12.0));
    }

    #[test]
    fn plain_readings_upscale() {
        let status = EmeterStatus::from_value(&json!({
            "voltage": 229.5, "power": 2.0, "current": 0.1, "total": 0.5
        }));
        assert_eq!(status.get("power_mw"), Some(2000.0));
        assert_eq!(status.get("total_wh"), Some(500.0));
        assert_eq!(status.power(), Some(2.0));
    }

    #[test]
    fn unknown_keys_return_none() {
        let status = EmeterStatus::from_value(&json!({"power": 1.0}));
        assert_eq!(status.get("frequency"), None);
        assert_eq!(status.get("voltage"), None);
    }

    #[test]
    fn display_lists_main_readings() {
        let status = EmeterStatus::from_value(&json!({"power": 1.0, "voltage": 230.0}));
        let shown = status.to_string();
        assert!(shown.contains("power=1"));
        assert!(shown.contains("current=None"));
    }
}
