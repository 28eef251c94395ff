//! Relay devices: plugs, wall switches, dimmers and the strip itself.

use kasa_protocol::{KasaError, Result};
use serde_json::json;

use super::{query_helper, IotDevice, IotKind};

const DIMMER_SERVICE: &str = "smartlife.iot.dimmer";

impl IotDevice {
    /// Whether the LED indicator is on.
    pub fn led(&self) -> Result<bool> {
        if self.kind.is_bulb() {
            return Err(KasaError::kasa("Bulbs have no LED indicator"));
        }
        Ok(self.sys_info()?["led_off"].as_i64().unwrap_or(0) == 0)
    }

    pub async fn set_led(&self, state: bool) -> Result<()> {
        if self.kind.is_bulb() {
            return Err(KasaError::kasa("Bulbs have no LED indicator"));
        }
        query_helper(
            &self.protocol,
            "system",
            "set_led_off",
            Some(json!({"off": i64::from(!state)})),
            None,
        )
        .await
        .map(|_| ())
    }

    fn dimmer_brightness(&self) -> Result<i64> {
        if !self.is_dimmable() {
            return Err(KasaError::kasa("Device is not dimmable."));
        }
        Ok(self.sys_info()?["brightness"].as_i64().unwrap_or(0))
    }

    async fn set_dimmer_brightness(&self, brightness: i64, transition: Option<i64>) -> Result<()> {
        if !self.is_dimmable() {
            return Err(KasaError::kasa("Device is not dimmable."));
        }
        if !(0..=100).contains(&brightness) {
            return Err(KasaError::invalid_value(format!(
                "Brightness value {brightness} is not valid."
            )));
        }
        if brightness == 0 {
            return self.turn_off(transition).await;
        }
        match transition {
            Some(transition) => self.set_dimmer_transition(brightness, transition).await,
            None => query_helper(
                &self.protocol,
                DIMMER_SERVICE,
                "set_brightness",
                Some(json!({"brightness": brightness})),
                None,
            )
            .await
            .map(|_| ()),
        }
    }

    /// Fade to `brightness` over `transition` milliseconds.
    ///
    /// A brightness of zero fades the dimmer off.
    pub async fn set_dimmer_transition(&self, brightness: i64, transition: i64) -> Result<()> {
        if self.kind != IotKind::Dimmer {
            return Err(KasaError::kasa("Transitions are only supported by dimmers"));
        }
        if !(0..=100).contains(&brightness) {
            return Err(KasaError::invalid_value(format!(
                "Brightness value {brightness} is not valid."
            )));
        }
        if transition <= 0 {
            return Err(KasaError::invalid_value(format!(
                "Transition value {transition} is not valid."
            )));
        }
        query_helper(
            &self.protocol,
            DIMMER_SERVICE,
            "set_dimmer_transition",
            Some(json!({"brightness": brightness, "duration": transition})),
            None,
        )
        .await
        .map(|_| ())
    }

    pub fn is_dimmable(&self) -> bool {
        match self.kind {
            IotKind::Bulb | IotKind::LightStrip => {
                self.sys_info["is_dimmable"].as_i64().unwrap_or(0) == 1
            }
            IotKind::Dimmer => self.sys_info.get("brightness").is_some(),
            _ => false,
        }
    }

    /// Brightness in percent.
    pub fn brightness(&self) -> Result<i64> {
        if self.kind.is_bulb() {
            self.bulb_brightness()
        } else {
            self.dimmer_brightness()
        }
    }

    pub async fn set_brightness(&self, brightness: i64, transition: Option<i64>) -> Result<()> {
        if self.kind.is_bulb() {
            self.set_bulb_brightness(brightness, transition)
                .await
                .map(|_| ())
        } else {
            self.set_dimmer_brightness(brightness, transition).await
        }
    }
}
