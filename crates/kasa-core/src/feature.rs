//! Named, typed device properties.
//!
//! A feature describes a readable (and possibly writable) value exposed by a
//! device or one of its modules. The owning device resolves the getter and
//! setter names against its own state.

use std::fmt;

use chrono::NaiveDateTime;
use kasa_protocol::{KasaError, Result};
use serde_json::Value;

pub const DEFAULT_MINIMUM: i64 = 0;
pub const DEFAULT_MAXIMUM: i64 = 1 << 16;

/// Container name used for features the device itself resolves.
pub const DEVICE_CONTAINER: &str = "device";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    Sensor,
    BinarySensor,
    Switch,
    Button,
    Number,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Time(NaiveDateTime),
    None,
}

impl FeatureValue {
    /// Convert a raw JSON field.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::None),
            Value::String(s) => Self::Text(s.clone()),
            Value::Null => Self::None,
            other => Self::Text(other.to_string()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Parse user input for a feature of the given type.
    pub fn parse(input: &str, feature_type: FeatureType) -> Result<Self> {
        let invalid = || KasaError::invalid_value(format!("Invalid value: {input}"));
        match feature_type {
            FeatureType::Switch | FeatureType::BinarySensor => {
                match input.to_ascii_lowercase().as_str() {
                    "1" | "true" | "on" | "yes" => Ok(Self::Bool(true)),
                    "0" | "false" | "off" | "no" => Ok(Self::Bool(false)),
                    _ => Err(invalid()),
                }
            }
            FeatureType::Number => input.parse().map(Self::Int).map_err(|_| invalid()),
            FeatureType::Button => Ok(Self::None),
            FeatureType::Sensor => Ok(Self::Text(input.to_string())),
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Time(t) => write!(f, "{t}"),
            Self::None => f.write_str("None"),
        }
    }
}

/// Lowercase with spaces and apostrophes turned into underscores.
pub fn slugify(name: &str) -> String {
    name.to_lowercase().replace([' ', '\''], "_")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub id: String,
    pub container: String,
    pub attribute_getter: String,
    pub attribute_setter: Option<String>,
    pub icon: Option<String>,
    pub unit: Option<String>,
    pub feature_type: FeatureType,
    pub minimum_value: i64,
    pub maximum_value: i64,
}

impl Feature {
    pub fn new(
        name: &str,
        container: &str,
        attribute_getter: &str,
        feature_type: FeatureType,
    ) -> Self {
        Self {
            name: name.to_string(),
            id: slugify(name),
            container: container.to_string(),
            attribute_getter: attribute_getter.to_string(),
            attribute_setter: None,
            icon: None,
            unit: None,
            feature_type,
            minimum_value: DEFAULT_MINIMUM,
            maximum_value: DEFAULT_MAXIMUM,
        }
    }

    pub fn with_setter(mut self, setter: &str) -> Self {
        self.attribute_setter = Some(setter.to_string());
        self
    }

    pub fn with_icon(mut self, icon: &str) -> Self {
        self.icon = Some(icon.to_string());
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_range(mut self, minimum: i64, maximum: i64) -> Self {
        self.minimum_value = minimum;
        self.maximum_value = maximum;
        self
    }

    /// Check `value` can be written and return the setter to call.
    pub fn validate(&self, value: &FeatureValue) -> Result<&str> {
        let setter = self
            .attribute_setter
            .as_deref()
            .ok_or_else(|| KasaError::kasa("Tried to set read-only feature."))?;
        if self.feature_type == FeatureType::Number {
            let number = value.as_i64().ok_or_else(|| {
                KasaError::invalid_value(format!("Value {value} is not a number"))
            })?;
            if number < self.minimum_value || number > self.maximum_value {
                return Err(KasaError::invalid_value(format!(
                    "Value {number} out of range [{}, {}]",
                    self.minimum_value, self.maximum_value
                )));
            }
        }
        Ok(setter)
    }
}

/// Features of a device, in registration order, with unique ids.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet(Vec<Feature>);

impl FeatureSet {
    pub fn add(&mut self, feature: Feature) -> Result<()> {
        if self.get(&feature.id).is_some() {
            return Err(KasaError::kasa(format!(
                "Duplicate name detected {}",
                feature.id
            )));
        }
        self.0.push(feature);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Feature> {
        self.0.iter().find(|f| f.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_slugified() {
        assert_eq!(slugify("Today's consumption"), "today_s_consumption");
        assert_eq!(slugify("Auto off enabled"), "auto_off_enabled");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut set = FeatureSet::default();
        set.add(Feature::new("RSSI", "device", "rssi", FeatureType::Sensor))
            .unwrap();
        let err = set
            .add(Feature::new("rssi", "device", "rssi", FeatureType::Sensor))
            .unwrap_err();
        assert_eq!(err.to_string(), "Duplicate name detected rssi");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn number_range_is_checked() {
        let feature = Feature::new("Brightness", "Brightness", "brightness", FeatureType::Number)
            .with_setter("set_brightness")
            .with_range(1, 100);
        assert_eq!(feature.validate(&FeatureValue::Int(50)).unwrap(), "set_brightness");
        let err = feature.validate(&FeatureValue::Int(0)).unwrap_err();
        assert!(matches!(err, KasaError::InvalidValue(_)));
        assert_eq!(err.to_string(), "Value 0 out of range [1, 100]");
        assert!(feature.validate(&FeatureValue::Int(101)).is_err());
    }

    #[test]
    fn read_only_features_cannot_be_set() {
        let feature = Feature::new("RSSI", "device", "rssi", FeatureType::Sensor);
        assert!(feature.validate(&FeatureValue::Int(1)).is_err());
    }

    #[test]
    fn default_range() {
        let feature = Feature::new("Delay", "x", "delay", FeatureType::Number);
        assert_eq!(feature.minimum_value, 0);
        assert_eq!(feature.maximum_value, 65536);
    }

    #[test]
    fn values_from_json_and_input() {
        assert_eq!(FeatureValue::from_json(&json!(true)), FeatureValue::Bool(true));
        assert_eq!(FeatureValue::from_json(&json!(-40)), FeatureValue::Int(-40));
        assert_eq!(FeatureValue::from_json(&json!(21.5)), FeatureValue::Float(21.5));
        assert_eq!(FeatureValue::from_json(&json!(null)), FeatureValue::None);
        assert_eq!(
            FeatureValue::parse("on", FeatureType::Switch).unwrap(),
            FeatureValue::Bool(true)
        );
        assert_eq!(
            FeatureValue::parse("42", FeatureType::Number).unwrap(),
            FeatureValue::Int(42)
        );
        assert!(FeatureValue::parse("maybe", FeatureType::Switch).is_err());
    }
}
