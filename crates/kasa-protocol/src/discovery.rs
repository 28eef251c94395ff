//! Wire types for UDP discovery.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KasaError, Result};

/// Legacy (IOT) discovery port.
pub const DISCOVERY_PORT: u16 = 9999;

/// Discovery port for devices announcing an encryption scheme.
pub const DISCOVERY_PORT_2: u16 = 20002;

/// Probe sent to [`DISCOVERY_PORT_2`].
pub const DISCOVERY_QUERY_2: [u8; 16] = [
    0x02, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46, 0x3c, 0xb5, 0xd3,
];

/// Replies on [`DISCOVERY_PORT_2`] carry a binary header before the JSON body.
pub const DISCOVERY_HEADER_LEN: usize = 16;

/// Placeholder alias for devices known only from discovery.
pub const UNAVAILABLE_ALIAS: &str = "Authentication required";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionScheme {
    #[serde(default)]
    pub is_support_https: Option<bool>,
    pub encrypt_type: String,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub lv: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub device_type: String,
    pub device_model: String,
    pub ip: String,
    pub mac: String,
    pub mgt_encrypt_schm: EncryptionScheme,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub hw_ver: Option<String>,
    #[serde(default)]
    pub is_support_iot_cloud: Option<bool>,
    #[serde(default)]
    pub obd_src: Option<String>,
    #[serde(default)]
    pub factory_default: Option<bool>,
}

impl DiscoveryResult {
    /// Parse the `result` object of a port-20002 reply.
    pub fn from_reply(reply: &Value) -> Result<Self> {
        let result = reply
            .get("result")
            .ok_or_else(|| KasaError::kasa("No result in discovery response"))?;
        Ok(serde_json::from_value(result.clone())?)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_reply() {
        let reply = json!({
            "result": {
                "device_id": "abc",
                "owner": "",
                "device_type": "SMART.TAPOBULB",
                "device_model": "L530E(EU)",
                "ip": "127.0.0.1",
                "mac": "12-34-56-78-90-AB",
                "is_support_iot_cloud": true,
                "obd_src": "tplink",
                "factory_default": false,
                "mgt_encrypt_schm": {
                    "is_support_https": false,
                    "encrypt_type": "AES",
                    "http_port": 80,
                    "lv": 2
                }
            },
            "error_code": 0
        });
        let result = DiscoveryResult::from_reply(&reply).unwrap();
        assert_eq!(result.device_type, "SMART.TAPOBULB");
        assert_eq!(result.mgt_encrypt_schm.encrypt_type, "AES");
        assert_eq!(result.mgt_encrypt_schm.lv, Some(2));
        assert_eq!(result.mgt_encrypt_schm.http_port, Some(80));
    }

    #[test]
    fn missing_result_is_an_error() {
        assert!(DiscoveryResult::from_reply(&json!({"error_code": 0})).is_err());
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let reply = json!({"result": {"device_type": "SMART.TAPOPLUG"}});
        assert!(DiscoveryResult::from_reply(&reply).is_err());
    }
}
