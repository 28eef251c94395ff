//! Connection parameters for a single device.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KasaError, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Transport encryption announced by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptType {
    #[serde(rename = "AES")]
    Aes,
    #[serde(rename = "KLAP")]
    Klap,
    #[serde(rename = "XOR")]
    Xor,
}

impl EncryptType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aes => "AES",
            Self::Klap => "KLAP",
            Self::Xor => "XOR",
        }
    }
}

impl FromStr for EncryptType {
    type Err = KasaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AES" => Ok(Self::Aes),
            "KLAP" => Ok(Self::Klap),
            "XOR" => Ok(Self::Xor),
            other => Err(KasaError::kasa(format!("Unknown encryption type: {other}"))),
        }
    }
}

impl fmt::Display for EncryptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device family as reported by discovery (`device_type`) or sysinfo (`mic_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    #[serde(rename = "IOT.SMARTPLUGSWITCH")]
    IotSmartPlugSwitch,
    #[serde(rename = "IOT.SMARTBULB")]
    IotSmartBulb,
    #[serde(rename = "SMART.KASAPLUG")]
    SmartKasaPlug,
    #[serde(rename = "SMART.KASASWITCH")]
    SmartKasaSwitch,
    #[serde(rename = "SMART.TAPOPLUG")]
    SmartTapoPlug,
    #[serde(rename = "SMART.TAPOBULB")]
    SmartTapoBulb,
    #[serde(rename = "SMART.TAPOSWITCH")]
    SmartTapoSwitch,
    #[serde(rename = "SMART.TAPOHUB")]
    SmartTapoHub,
    #[serde(rename = "SMART.KASAHUB")]
    SmartKasaHub,
}

const FAMILIES: &[(DeviceFamily, &str)] = &[
    (DeviceFamily::IotSmartPlugSwitch, "IOT.SMARTPLUGSWITCH"),
    (DeviceFamily::IotSmartBulb, "IOT.SMARTBULB"),
    (DeviceFamily::SmartKasaPlug, "SMART.KASAPLUG"),
    (DeviceFamily::SmartKasaSwitch, "SMART.KASASWITCH"),
    (DeviceFamily::SmartTapoPlug, "SMART.TAPOPLUG"),
    (DeviceFamily::SmartTapoBulb, "SMART.TAPOBULB"),
    (DeviceFamily::SmartTapoSwitch, "SMART.TAPOSWITCH"),
    (DeviceFamily::SmartTapoHub, "SMART.TAPOHUB"),
    (DeviceFamily::SmartKasaHub, "SMART.KASAHUB"),
];

impl DeviceFamily {
    pub fn as_str(self) -> &'static str {
        FAMILIES
            .iter()
            .find(|(family, _)| *family == self)
            .map(|(_, name)| *name)
            .unwrap_or("IOT.SMARTPLUGSWITCH")
    }

    /// The protocol half of the family name, `IOT` or `SMART`.
    pub fn protocol_name(self) -> &'static str {
        match self {
            Self::IotSmartPlugSwitch | Self::IotSmartBulb => "IOT",
            _ => "SMART",
        }
    }
}

impl FromStr for DeviceFamily {
    type Err = KasaError;

    fn from_str(s: &str) -> Result<Self> {
        FAMILIES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(family, _)| *family)
            .ok_or_else(|| KasaError::kasa(format!("Unknown device family: {s}")))
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Family, encryption and login version: everything needed to pick a protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionType {
    pub device_family: DeviceFamily,
    pub encryption_type: EncryptType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_version: Option<u32>,
}

impl Default for ConnectionType {
    fn default() -> Self {
        Self {
            device_family: DeviceFamily::IotSmartPlugSwitch,
            encryption_type: EncryptType::Xor,
            login_version: Some(1),
        }
    }
}

impl ConnectionType {
    pub fn new(device_family: DeviceFamily, encryption_type: EncryptType) -> Self {
        Self {
            device_family,
            encryption_type,
            login_version: None,
        }
    }

    pub fn with_login_version(mut self, login_version: Option<u32>) -> Self {
        self.login_version = login_version;
        self
    }

    /// Build from the raw strings a device announces.
    pub fn from_values(
        device_family: &str,
        encryption_type: &str,
        login_version: Option<u32>,
    ) -> Result<Self> {
        let invalid = || {
            KasaError::kasa(format!(
                "Invalid connection parameters for {device_family}.{encryption_type}.{}",
                login_version.map_or_else(|| "None".to_string(), |v| v.to_string())
            ))
        };
        let family = device_family.parse().map_err(|_| invalid())?;
        let encryption = encryption_type.parse().map_err(|_| invalid())?;
        Ok(Self {
            device_family: family,
            encryption_type: encryption,
            login_version,
        })
    }

    /// The `IOT.XOR`-style key used to select a protocol.
    pub fn protocol_key(&self) -> String {
        format!(
            "{}.{}",
            self.device_family.protocol_name(),
            self.encryption_type.as_str()
        )
    }
}

/// Account credentials used by authenticated transports.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Factory credentials some devices accept before they are provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultCredentials {
    Kasa,
    Tapo,
}

impl DefaultCredentials {
    pub const ALL: [DefaultCredentials; 2] = [Self::Kasa, Self::Tapo];

    fn encoded(self) -> (&'static str, &'static str) {
        match self {
            Self::Kasa => ("a2FzYUB0cC1saW5rLm5ldA==", "a2FzYVNldHVw"),
            Self::Tapo => ("dGVzdEB0cC1saW5rLm5ldA==", "dGVzdA=="),
        }
    }

    pub fn credentials(self) -> Credentials {
        let (user, pass) = self.encoded();
        let decode = |s: &str| {
            BASE64
                .decode(s)
                .ok()
                .and_then(|b| String::from_utf8(b).ok())
                .unwrap_or_default()
        };
        Credentials::new(decode(user), decode(pass))
    }
}

/// Per-device connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_timeout")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_override: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub uses_http: bool,
}

fn default_timeout() -> Option<u64> {
    Some(DEFAULT_TIMEOUT_SECS)
}

impl DeviceConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            timeout: default_timeout(),
            port_override: None,
            credentials: None,
            credentials_hash: None,
            batch_size: None,
            connection_type: ConnectionType::default(),
            uses_http: false,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_port_override(mut self, port: Option<u16>) -> Self {
        self.port_override = port;
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_credentials_hash(mut self, hash: Option<String>) -> Self {
        self.credentials_hash = hash;
        self
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the connection type; HTTP is implied for anything but XOR.
    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.uses_http = connection_type.encryption_type != EncryptType::Xor;
        self.connection_type = connection_type;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Dictionary form, optionally without credentials (for persisting).
    pub fn to_value(&self, exclude_credentials: bool) -> Value {
        let mut copy = self.clone();
        if exclude_credentials {
            copy.credentials = None;
        }
        serde_json::to_value(copy).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
