use kasa_protocol::{KasaError, Result};
use serde_json::{json, Value};

use super::SmartDevice;
use crate::iot::Hsv;

/// Built-in effects by id.
pub const AVAILABLE_EFFECTS: [(&str, &str); 2] = [("L1", "Party"), ("L2", "Relax")];

fn check_brightness(value: i64) -> Result<()> {
    if (1..=100).contains(&value) {
        Ok(())
    } else {
        Err(KasaError::invalid_value(format!(
            "Invalid brightness value: {value} (valid range: 1-100%)"
        )))
    }
}

impl SmartDevice {
    /// Only colour bulbs report a hue.
    pub fn is_color(&self) -> bool {
        self.info.get("hue").is_some()
    }

    pub fn is_dimmable(&self) -> bool {
        self.has_module("Brightness")
    }

    /// Some bulbs report a fixed range such as `[9000, 9000]`.
    pub fn is_variable_color_temp(&self) -> bool {
        self.info["color_temp_range"]
            .as_array()
            .is_some_and(|range| range.len() == 2 && range[0] != range[1])
    }

    pub fn valid_temperature_range(&self) -> Result<(i64, i64)> {
        if !self.is_variable_color_temp() {
            return Err(KasaError::kasa("Color temperature not supported"));
        }
        let range = &self.info["color_temp_range"];
        Ok((
            range[0].as_i64().unwrap_or(0),
            range[1].as_i64().unwrap_or(0),
        ))
    }

    pub fn has_effects(&self) -> bool {
        self.info.get("dynamic_light_effect_enable").is_some()
    }

    /// Active effect in the shape light strips report.
    pub fn effect(&self) -> Result<Value> {
        let current = self.info()?["dynamic_light_effect_id"]
            .as_str()
            .unwrap_or_default();
        let name = AVAILABLE_EFFECTS
            .iter()
            .find(|(id, _)| *id == current)
            .map_or("", |(_, name)| name);
        Ok(json!({
            "brightness": self.info["brightness"],
            "enable": !current.is_empty(),
            "id": current,
            "name": name,
        }))
    }

    pub fn effect_list(&self) -> Option<Vec<&'static str>> {
        self.has_effects()
            .then(|| AVAILABLE_EFFECTS.iter().map(|(id, _)| *id).collect())
    }

    pub async fn set_effect(&self, _name: &str) -> Result<()> {
        Err(KasaError::kasa("Setting effects is not supported on this device"))
    }

    pub fn hsv(&self) -> Result<Hsv> {
        if !self.is_color() {
            return Err(KasaError::kasa("Bulb does not support color."));
        }
        let info = self.info()?;
        let field = |key: &str| info[key].as_i64().unwrap_or(0);
        Ok(Hsv {
            hue: field("hue"),
            saturation: field("saturation"),
            value: field("brightness"),
        })
    }

    pub fn color_temp(&self) -> Result<i64> {
        if !self.is_variable_color_temp() {
            return Err(KasaError::kasa("Bulb does not support colortemp."));
        }
        Ok(self.info()?["color_temp"].as_i64().unwrap_or(-1))
    }

    pub fn brightness(&self) -> Result<i64> {
        if !self.is_dimmable() {
            return Err(KasaError::kasa("Bulb is not dimmable."));
        }
        Ok(self.info()?["brightness"].as_i64().unwrap_or(-1))
    }

    /// Transitions are not supported and ignored.
    pub async fn set_hsv(&self, hue: i64, saturation: i64, value: Option<i64>) -> Result<()> {
        if !self.is_color() {
            return Err(KasaError::kasa("Bulb does not support color."));
        }
        if !(0..=360).contains(&hue) {
            return Err(KasaError::invalid_value(format!(
                "Invalid hue value: {hue} (valid range: 0-360)"
            )));
        }
        if !(0..=100).contains(&saturation) {
            return Err(KasaError::invalid_value(format!(
                "Invalid saturation value: {saturation} (valid range: 0-100%)"
            )));
        }

        // A non-zero color_temp takes precedence over hue and saturation.
        let mut params = json!({"color_temp": 0, "hue": hue, "saturation": saturation});
        if let Some(value) = value {
            check_brightness(value)?;
            params["brightness"] = json!(value);
        }
        self.set_device_info(params).await
    }

    pub async fn set_color_temp(&self, temp: i64) -> Result<()> {
        if !self.is_variable_color_temp() {
            return Err(KasaError::kasa("Bulb does not support colortemp."));
        }
        let (min, max) = self.valid_temperature_range()?;
        if temp < min || temp > max {
            return Err(KasaError::invalid_value(format!(
                "Temperature should be between {min} and {max}, was {temp}"
            )));
        }
        self.set_device_info(json!({"color_temp": temp})).await
    }

    pub async fn set_brightness(&self, brightness: i64) -> Result<()> {
        if !self.is_dimmable() {
            return Err(KasaError::kasa("Bulb is not dimmable."));
        }
        check_brightness(brightness)?;
        self.set_device_info(json!({"brightness": brightness})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_bounds() {
        assert!(check_brightness(1).is_ok());
        assert!(check_brightness(100).is_ok());
        let err = check_brightness(0).unwrap_err();
        assert_eq!(err.to_string(), "Invalid brightness value: 0 (valid range: 1-100%)");
    }
}
