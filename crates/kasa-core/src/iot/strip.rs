//! Power strips and their individually switchable sockets.

use std::sync::Arc;

use chrono::{Duration, Local, NaiveDateTime};
use kasa_protocol::{DeviceType, EmeterStatus, KasaError, Result};
use serde_json::{json, Value};
use tracing::debug;

use super::{create_request, query_helper, IotDevice, IotKind};
use crate::protocol::IotProtocol;

/// One socket of a power strip.
///
/// Sockets share the strip's protocol and address it through
/// `context.child_ids`. Their state is refreshed by the parent's update.
pub struct IotStripPlug {
    protocol: Arc<IotProtocol>,
    child_id: String,
    info: Value,
    parent_mac: String,
    parent_model: String,
    emeter: Option<Value>,
}

impl std::fmt::Debug for IotStripPlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<{} {} - {}>",
            DeviceType::StripSocket,
            self.child_id,
            self.alias().unwrap_or_default()
        )
    }
}

impl IotStripPlug {
    fn new(protocol: Arc<IotProtocol>, parent: &IotDevice, info: Value) -> Result<Self> {
        let device_id = parent.device_id()?;
        let raw_id = info["id"]
            .as_str()
            .ok_or_else(|| KasaError::kasa(format!("Strip socket without id: {info}")))?;
        let child_id = if raw_id.starts_with(&device_id) {
            raw_id.to_string()
        } else {
            format!("{device_id}{raw_id}")
        };
        Ok(Self {
            protocol,
            child_id,
            info,
            parent_mac: parent.mac()?,
            parent_model: parent.model()?,
            emeter: None,
        })
    }

    fn child_ids(&self) -> [String; 1] {
        [self.child_id.clone()]
    }

    pub fn child_id(&self) -> &str {
        &self.child_id
    }

    pub fn device_type(&self) -> DeviceType {
        DeviceType::StripSocket
    }

    pub fn alias(&self) -> Option<String> {
        self.info["alias"].as_str().map(str::to_string)
    }

    pub fn is_on(&self) -> bool {
        self.info["state"].as_i64() == Some(1)
    }

    pub fn on_since(&self) -> Option<NaiveDateTime> {
        if !self.is_on() {
            return None;
        }
        let on_time = self.info["on_time"].as_i64()?;
        Some(Local::now().naive_local() - Duration::seconds(on_time))
    }

    pub fn next_action(&self) -> Value {
        self.info["next_action"].clone()
    }

    pub fn device_id(&self) -> String {
        format!("{}_{}", self.parent_mac, self.child_id)
    }

    pub fn model(&self) -> String {
        format!("Socket for {}", self.parent_model)
    }

    pub fn info(&self) -> &Value {
        &self.info
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.set_state(1).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.set_state(0).await
    }

    async fn set_state(&self, state: i64) -> Result<()> {
        query_helper(
            &self.protocol,
            "system",
            "set_relay_state",
            Some(json!({"state": state})),
            Some(&self.child_ids()),
        )
        .await
        .map(|_| ())
    }

    pub async fn set_alias(&self, alias: &str) -> Result<()> {
        query_helper(
            &self.protocol,
            "system",
            "set_dev_alias",
            Some(json!({"alias": alias})),
            Some(&self.child_ids()),
        )
        .await
        .map(|_| ())
    }

    pub fn has_emeter(&self) -> bool {
        self.emeter.is_some()
    }

    pub fn emeter_realtime(&self) -> Result<EmeterStatus> {
        let data = self
            .emeter
            .as_ref()
            .ok_or_else(|| KasaError::kasa("Device has no emeter"))?;
        super::Emeter::realtime(data)
    }

    /// Fetch the socket's realtime energy readings.
    async fn update_emeter(&mut self) -> Result<()> {
        let request = create_request("emeter", "get_realtime", None, Some(&self.child_ids()));
        let response = self.protocol.query(&request).await?;
        self.emeter = response.get("emeter").cloned();
        Ok(())
    }
}

impl IotDevice {
    /// Create sockets on the first update, refresh them afterwards.
    pub(super) async fn update_children(&mut self) -> Result<()> {
        let children = self.sys_info["children"].as_array().cloned().unwrap_or_default();
        if self.children.is_empty() {
            debug!("Initializing {} child sockets for {}", children.len(), self.host());
            let mut sockets = Vec::with_capacity(children.len());
            for info in children {
                sockets.push(IotStripPlug::new(self.protocol.clone(), self, info)?);
            }
            self.children = sockets;
        } else {
            for socket in &mut self.children {
                if let Some(info) = children.iter().find(|c| c["id"] == socket.info["id"]) {
                    socket.info = info.clone();
                }
            }
        }

        if self.has_emeter() {
            for socket in &mut self.children {
                socket.update_emeter().await?;
            }
        }
        Ok(())
    }

    /// Strip sockets. Empty for every other kind.
    pub fn children(&self) -> &[IotStripPlug] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Result<&IotStripPlug> {
        if self.kind != IotKind::Strip {
            return Err(KasaError::kasa("Device has no child sockets"));
        }
        self.children
            .get(index)
            .ok_or_else(|| KasaError::kasa(format!("plug index of {index} is out of bounds")))
    }
}
