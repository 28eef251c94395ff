//! Bulbs and light strips.

use kasa_protocol::{KasaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use super::{effects, query_helper, IotDevice, IotKind};

pub(crate) const LIGHT_SERVICE: &str = "smartlife.iot.smartbulb.lightingservice";
pub(crate) const LIGHT_STRIP_SERVICE: &str = "smartlife.iot.lightStrip";
const LIGHTING_EFFECT_SERVICE: &str = "smartlife.iot.lighting_effect";

/// Keys that change power without touching the colour mode.
const NON_COLOR_MODE_FLAGS: [&str; 2] = ["transition_period", "on_off"];

/// Colour temperature ranges by model prefix.
const TPLINK_KELVIN: [(&str, (i64, i64)); 10] = [
    ("LB130", (2500, 9000)),
    ("LB120", (2700, 6500)),
    ("LB230", (2500, 9000)),
    ("KB130", (2500, 9000)),
    ("KL130", (2500, 9000)),
    ("KL125", (2500, 6500)),
    ("KL135", (2500, 6500)),
    ("KL120(EU)", (2700, 6500)),
    ("KL120(US)", (2700, 5000)),
    ("KL430", (2500, 9000)),
];

const FALLBACK_KELVIN: (i64, i64) = (2700, 5000);

/// Hue in degrees, saturation and value in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub hue: i64,
    pub saturation: i64,
    pub value: i64,
}

/// A stored light setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulbPreset {
    pub index: i64,
    pub brightness: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BehaviorMode {
    /// Restore the state before the bulb was turned off.
    #[serde(rename = "last_status")]
    Last,
    /// Use a preset or the settings given in the behavior.
    #[serde(rename = "customize_preset")]
    Preset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOnBehavior {
    #[serde(rename = "index", default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<i64>,
    pub mode: BehaviorMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<i64>,
}

/// What the bulb does when powered on by app (`soft_on`) or by the mains
/// switch (`hard_on`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOnBehaviors {
    pub soft_on: TurnOnBehavior,
    pub hard_on: TurnOnBehavior,
}

fn check_brightness(value: i64) -> Result<()> {
    if (0..=100).contains(&value) {
        Ok(())
    } else {
        Err(KasaError::invalid_value(format!(
            "Invalid brightness value: {value} (valid range: 0-100%)"
        )))
    }
}

impl IotDevice {
    fn require_bulb(&self) -> Result<()> {
        if self.kind.is_bulb() {
            Ok(())
        } else {
            Err(KasaError::kasa(format!(
                "{} is not a bulb",
                self.kind.device_type()
            )))
        }
    }

    fn light_service(&self) -> &'static str {
        if self.kind == IotKind::LightStrip {
            LIGHT_STRIP_SERVICE
        } else {
            LIGHT_SERVICE
        }
    }

    fn set_light_method(&self) -> &'static str {
        if self.kind == IotKind::LightStrip {
            "set_light_state"
        } else {
            "transition_light_state"
        }
    }

    pub fn is_color(&self) -> bool {
        self.kind.is_bulb() && self.sys_info["is_color"].as_i64().unwrap_or(0) == 1
    }

    pub fn is_variable_color_temp(&self) -> bool {
        self.kind.is_bulb() && self.sys_info["is_variable_color_temp"].as_i64().unwrap_or(0) == 1
    }

    /// Supported colour temperature range in kelvin.
    pub fn valid_temperature_range(&self) -> Result<(i64, i64)> {
        if !self.is_variable_color_temp() {
            return Err(KasaError::kasa("Color temperature not supported"));
        }
        let model = self.sys_info()?["model"].as_str().unwrap_or_default();
        if let Some((_, range)) = TPLINK_KELVIN
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
        {
            return Ok(*range);
        }
        warn!("Unknown color temperature range for {model}, fallback to 2700-5000");
        Ok(FALLBACK_KELVIN)
    }

    /// Current light state. While off, the state the bulb returns to.
    pub fn light_state(&self) -> Result<Value> {
        self.require_bulb()?;
        let state = self
            .sys_info()?
            .get("light_state")
            .filter(|s| s.is_object())
            .ok_or_else(|| {
                KasaError::kasa("The device has no light_state or you have not called update()")
            })?;
        let on_off = state["on_off"].clone();
        if on_off.as_i64().unwrap_or(0) != 0 {
            return Ok(state.clone());
        }
        let mut off_state = state.get("dft_on_state").cloned().unwrap_or_else(|| json!({}));
        off_state["on_off"] = on_off;
        Ok(off_state)
    }

    /// Query the light state directly from the device.
    pub async fn get_light_state(&self) -> Result<Value> {
        self.require_bulb()?;
        query_helper(&self.protocol, self.light_service(), "get_light_state", None, None).await
    }

    /// Send a light state change and return the resulting state.
    pub async fn set_light_state(&self, state: Value, transition: Option<i64>) -> Result<Value> {
        self.require_bulb()?;
        let Value::Object(mut state) = state else {
            return Err(KasaError::invalid_value(format!("Invalid light state: {state}")));
        };
        if let Some(transition) = transition {
            state.insert("transition_period".to_string(), json!(transition));
        }
        let on_off = state.entry("on_off").or_insert(json!(1));
        let turning_on = on_off.as_i64().map_or(on_off.as_bool() == Some(true), |v| v != 0);

        // Powering on without colour settings restores the previous state.
        let power_only = state
            .keys()
            .all(|key| NON_COLOR_MODE_FLAGS.contains(&key.as_str()));
        let ignore_default = if turning_on && power_only { 0 } else { 1 };
        state.insert("ignore_default".to_string(), json!(ignore_default));

        query_helper(
            &self.protocol,
            self.light_service(),
            self.set_light_method(),
            Some(Value::Object(state)),
            None,
        )
        .await
    }

    pub fn hsv(&self) -> Result<Hsv> {
        if !self.is_color() {
            return Err(KasaError::kasa("Bulb does not support color."));
        }
        let state = self.light_state()?;
        let field = |key: &str| state[key].as_i64().unwrap_or(0);
        Ok(Hsv {
            hue: field("hue"),
            saturation: field("saturation"),
            value: field("brightness"),
        })
    }

    pub async fn set_hsv(
        &self,
        hue: i64,
        saturation: i64,
        value: Option<i64>,
        transition: Option<i64>,
    ) -> Result<Value> {
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

        let mut state = json!({"hue": hue, "saturation": saturation, "color_temp": 0});
        if let Some(value) = value {
            check_brightness(value)?;
            state["brightness"] = json!(value);
        }
        self.set_light_state(state, transition).await
    }

    pub fn color_temp(&self) -> Result<i64> {
        if !self.is_variable_color_temp() {
            return Err(KasaError::kasa("Bulb does not support colortemp."));
        }
        Ok(self.light_state()?["color_temp"].as_i64().unwrap_or(0))
    }

    pub async fn set_color_temp(
        &self,
        temp: i64,
        brightness: Option<i64>,
        transition: Option<i64>,
    ) -> Result<Value> {
        if !self.is_variable_color_temp() {
            return Err(KasaError::kasa("Bulb does not support colortemp."));
        }
        let (min, max) = self.valid_temperature_range()?;
        if temp < min || temp > max {
            return Err(KasaError::invalid_value(format!(
                "Temperature should be between {min} and {max}, was {temp}"
            )));
        }

        let mut state = json!({"color_temp": temp});
        if let Some(brightness) = brightness {
            check_brightness(brightness)?;
            state["brightness"] = json!(brightness);
        }
        self.set_light_state(state, transition).await
    }

    pub(super) fn bulb_brightness(&self) -> Result<i64> {
        if !self.is_dimmable() {
            return Err(KasaError::kasa("Bulb is not dimmable."));
        }
        Ok(self.light_state()?["brightness"].as_i64().unwrap_or(0))
    }

    pub(super) async fn set_bulb_brightness(
        &self,
        brightness: i64,
        transition: Option<i64>,
    ) -> Result<Value> {
        if !self.is_dimmable() {
            return Err(KasaError::kasa("Bulb is not dimmable."));
        }
        check_brightness(brightness)?;
        self.set_light_state(json!({"brightness": brightness}), transition)
            .await
    }

    /// Presets stored on the device.
    pub fn presets(&self) -> Result<Vec<BulbPreset>> {
        let stored = self.sys_info()?.get("preferred_state").cloned();
        match stored {
            Some(presets) => Ok(serde_json::from_value(presets)?),
            None => Ok(Vec::new()),
        }
    }

    /// Overwrite an existing preset slot.
    pub async fn save_preset(&self, preset: &BulbPreset) -> Result<()> {
        self.require_bulb()?;
        let presets = self.presets()?;
        if presets.is_empty() {
            return Err(KasaError::kasa("Device does not supported saving presets"));
        }
        if preset.index < 0 || preset.index as usize >= presets.len() {
            return Err(KasaError::kasa("Invalid preset index"));
        }
        query_helper(
            &self.protocol,
            self.light_service(),
            "set_preferred_state",
            Some(serde_json::to_value(preset)?),
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn get_turn_on_behavior(&self) -> Result<TurnOnBehaviors> {
        self.require_bulb()?;
        let response = query_helper(
            &self.protocol,
            self.light_service(),
            "get_default_behavior",
            None,
            None,
        )
        .await?;
        Ok(serde_json::from_value(response)?)
    }

    pub async fn set_turn_on_behavior(&self, behavior: &TurnOnBehaviors) -> Result<()> {
        self.require_bulb()?;
        query_helper(
            &self.protocol,
            self.light_service(),
            "set_default_behavior",
            Some(serde_json::to_value(behavior)?),
            None,
        )
        .await
        .map(|_| ())
    }

    /// Number of addressable segments on a light strip.
    pub fn length(&self) -> Result<Option<i64>> {
        Ok(self.sys_info()?["length"].as_i64())
    }

    pub fn has_effects(&self) -> bool {
        self.sys_info.get("lighting_effect_state").is_some()
    }

    /// Active lighting effect as reported by the device.
    pub fn effect(&self) -> Result<Option<Value>> {
        Ok(self.sys_info()?.get("lighting_effect_state").cloned())
    }

    pub fn effect_list(&self) -> Option<Vec<&'static str>> {
        self.has_effects().then(|| effects::EFFECT_NAMES.to_vec())
    }

    /// Start a built-in effect, optionally overriding its brightness and
    /// transition.
    pub async fn set_effect(
        &self,
        name: &str,
        brightness: Option<i64>,
        transition: Option<i64>,
    ) -> Result<()> {
        let mut effect = effects::effect(name).ok_or_else(|| {
            KasaError::kasa(format!("The effect {name} is not a built in effect."))
        })?;
        if let Some(brightness) = brightness {
            effect["brightness"] = json!(brightness);
        }
        if let Some(transition) = transition {
            effect["transition"] = json!(transition);
        }
        self.set_custom_effect(effect).await
    }

    pub async fn set_custom_effect(&self, effect: Value) -> Result<()> {
        if !self.has_effects() {
            return Err(KasaError::kasa("Bulb does not support effects."));
        }
        query_helper(
            &self.protocol,
            LIGHTING_EFFECT_SERVICE,
            "set_lighting_effect",
            Some(effect),
            None,
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_roundtrips_without_empty_fields() {
        let preset: BulbPreset =
            serde_json::from_value(json!({"index": 0, "brightness": 100})).unwrap();
        assert_eq!(preset.hue, None);
        assert_eq!(
            serde_json::to_value(&preset).unwrap(),
            json!({"index": 0, "brightness": 100})
        );
    }

    #[test]
    fn behavior_modes() {
        let behaviors: TurnOnBehaviors = serde_json::from_value(json!({
            "soft_on": {"mode": "last_status"},
            "hard_on": {"mode": "customize_preset", "index": 1}
        }))
        .unwrap();
        assert_eq!(behaviors.soft_on.mode, BehaviorMode::Last);
        assert_eq!(behaviors.hard_on.mode, BehaviorMode::Preset);
        assert_eq!(behaviors.hard_on.preset, Some(1));
        assert_eq!(
            serde_json::to_value(&behaviors.hard_on).unwrap(),
            json!({"mode": "customize_preset", "index": 1})
        );
    }

    #[test]
    fn brightness_bounds() {
        assert!(check_brightness(0).is_ok());
        assert!(check_brightness(100).is_ok());
        assert_eq!(
            check_brightness(101).unwrap_err().to_string(),
            "Invalid brightness value: 101 (valid range: 0-100%)"
        );
    }
}
