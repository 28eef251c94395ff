//! Build a device from a known connection type without discovery.

use std::sync::Arc;

use kasa_protocol::{DeviceConfig, DeviceFamily, EncryptType, KasaError, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::device::Device;
use crate::iot::{IotDevice, IotKind};
use crate::protocol::{get_protocol, Protocol, SmartQuery};
use crate::smart::SmartDevice;

/// Connect to a device at `config.host` and run the first update.
///
/// The connection type must be known, usually from an earlier discovery.
pub async fn connect(config: DeviceConfig) -> Result<Device> {
    let protocol = get_protocol(&config)?.ok_or_else(|| {
        KasaError::unsupported(format!(
            "Unsupported device for {}: {}",
            config.host, config.connection_type.device_family
        ))
    })?;
    connect_with(protocol).await
}

/// Like [`connect`] but over an already built protocol.
pub async fn connect_with(protocol: Protocol) -> Result<Device> {
    let result = create_and_update(&protocol).await;
    if result.is_err() {
        if let Err(e) = protocol.close().await {
            debug!("Error closing protocol for {}: {e}", protocol.host());
        }
    }
    result
}

async fn create_and_update(protocol: &Protocol) -> Result<Device> {
    let connection = &protocol.config().connection_type;
    let mut device = match protocol {
        Protocol::Iot(iot) if connection.encryption_type == EncryptType::Xor => {
            // Plain IOT devices do not say which kind they are until asked.
            let response = iot.query(&json!({"system": {"get_sysinfo": {}}})).await?;
            let kind = get_device_type_from_sys_info(&response)?;
            let mut device = IotDevice::new(Arc::clone(iot), kind);
            device.update_from_discover_info(response);
            Device::Iot(device)
        }
        _ => device_for_protocol(protocol.clone())?,
    };
    device.update().await?;
    Ok(device)
}

/// An un-updated device matching the protocol's device family.
pub(crate) fn device_for_protocol(protocol: Protocol) -> Result<Device> {
    let family = protocol.config().connection_type.device_family;
    match protocol {
        Protocol::Iot(iot) => {
            let kind = iot_kind_for_family(family).ok_or_else(|| {
                KasaError::unsupported(format!("Unsupported device for {}: {family}", iot.host()))
            })?;
            Ok(Device::Iot(IotDevice::new(iot, kind)))
        }
        Protocol::Smart(smart) => {
            let config = smart.config().clone();
            let query: Arc<dyn SmartQuery> = smart;
            Ok(Device::Smart(SmartDevice::new(config, query)))
        }
    }
}

fn iot_kind_for_family(family: DeviceFamily) -> Option<IotKind> {
    match family {
        DeviceFamily::IotSmartPlugSwitch => Some(IotKind::Plug),
        DeviceFamily::IotSmartBulb => Some(IotKind::Bulb),
        _ => None,
    }
}

/// Work out the IOT device kind from a `get_sysinfo` response.
pub fn get_device_type_from_sys_info(info: &Value) -> Result<IotKind> {
    let sysinfo = info
        .get("system")
        .and_then(|system| system.get("get_sysinfo"))
        .ok_or_else(|| KasaError::kasa("No 'system' or 'get_sysinfo' in response"))?;

    let type_ = ["type", "mic_type"]
        .iter()
        .find_map(|key| sysinfo.get(*key).and_then(Value::as_str))
        .ok_or_else(|| KasaError::kasa("Unable to find the device type field!"))?
        .to_ascii_lowercase();
    let dev_name = sysinfo["dev_name"].as_str().unwrap_or_default();

    if dev_name.contains("Dimmer") {
        return Ok(IotKind::Dimmer);
    }
    if type_.contains("smartplug") {
        if sysinfo.get("children").is_some() {
            return Ok(IotKind::Strip);
        }
        if dev_name.to_ascii_lowercase().contains("light") {
            return Ok(IotKind::WallSwitch);
        }
        return Ok(IotKind::Plug);
    }
    if type_.contains("smartbulb") {
        if sysinfo.get("length").is_some() {
            return Ok(IotKind::LightStrip);
        }
        return Ok(IotKind::Bulb);
    }
    Err(KasaError::unsupported(format!("Unknown device type: {type_}")))
}
