//! Device type classification.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Plug,
    Bulb,
    Strip,
    StripSocket,
    Dimmer,
    LightStrip,
    Sensor,
    Hub,
    Fan,
    WallSwitch,
    Unknown,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plug => "plug",
            Self::Bulb => "bulb",
            Self::Strip => "strip",
            Self::StripSocket => "stripsocket",
            Self::Dimmer => "dimmer",
            Self::LightStrip => "lightstrip",
            Self::Sensor => "sensor",
            Self::Hub => "hub",
            Self::Fan => "fan",
            Self::WallSwitch => "wallswitch",
            Self::Unknown => "unknown",
        }
    }

    /// Parse the string form; anything unrecognised is `Unknown`.
    pub fn from_value(name: &str) -> Self {
        [
            Self::Plug,
            Self::Bulb,
            Self::Strip,
            Self::StripSocket,
            Self::Dimmer,
            Self::LightStrip,
            Self::Sensor,
            Self::Hub,
            Self::Fan,
            Self::WallSwitch,
        ]
        .into_iter()
        .find(|t| t.as_str() == name)
        .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_value_parses_known_names() {
        assert_eq!(DeviceType::from_value("lightstrip"), DeviceType::LightStrip);
        assert_eq!(DeviceType::from_value("hub"), DeviceType::Hub);
        assert_eq!(DeviceType::from_value("toaster"), DeviceType::Unknown);
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&DeviceType::StripSocket).unwrap();
        assert_eq!(json, "\"stripsocket\"");
    }
}
