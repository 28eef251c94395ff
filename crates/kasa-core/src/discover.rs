//! UDP discovery of devices on the local network.
//!
//! Two probes are broadcast. Legacy IOT devices answer an XOR-encrypted
//! sysinfo query on port 9999; newer devices answer a binary probe on port
//! 20002 with a JSON description of their encryption scheme. Discovered
//! devices are seeded with the discovery payload but not updated.

use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use kasa_protocol::discovery::{
    DISCOVERY_HEADER_LEN, DISCOVERY_PORT, DISCOVERY_PORT_2, DISCOVERY_QUERY_2, UNAVAILABLE_ALIAS,
};
use kasa_protocol::{
    ConnectionType, Credentials, DeviceConfig, DeviceFamily, DiscoveryResult, EncryptType,
    KasaError, Result, XorEncryption,
};
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn};

use crate::device::Device;
use crate::factory::{device_for_protocol, get_device_type_from_sys_info};
use crate::iot::IotDevice;
use crate::protocol::{get_protocol, Protocol};

pub const DEFAULT_TARGET: &str = "255.255.255.255";
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DISCOVERY_PACKETS: u32 = 3;

const RECV_BUFFER: usize = 4096;

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub target: String,
    pub discovery_timeout: Duration,
    pub discovery_packets: u32,
    /// Legacy discovery port, also used as the port override of found devices.
    pub port: Option<u16>,
    pub port_2: u16,
    pub credentials: Option<Credentials>,
    /// Connection timeout in seconds for found devices.
    pub timeout: Option<u64>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            discovery_packets: DEFAULT_DISCOVERY_PACKETS,
            port: None,
            port_2: DISCOVERY_PORT_2,
            credentials: None,
            timeout: None,
        }
    }
}

impl DiscoveryOptions {
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_timeout(mut self, discovery_timeout: Duration) -> Self {
        self.discovery_timeout = discovery_timeout;
        self
    }

    pub fn with_packets(mut self, packets: u32) -> Self {
        self.discovery_packets = packets.max(1);
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_port_2(mut self, port: u16) -> Self {
        self.port_2 = port;
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_device_timeout(mut self, seconds: Option<u64>) -> Self {
        self.timeout = seconds;
        self
    }

    fn legacy_port(&self) -> u16 {
        self.port.unwrap_or(DISCOVERY_PORT)
    }

    fn device_config(&self, host: &str) -> DeviceConfig {
        let mut config = DeviceConfig::new(host)
            .with_port_override(self.port)
            .with_credentials(self.credentials.clone());
        if let Some(seconds) = self.timeout {
            config = config.with_timeout(seconds);
        }
        config
    }
}

/// One reply seen during discovery.
#[derive(Debug)]
pub enum DiscoveryEvent {
    Discovered(Device),
    /// The device answered but cannot be handled.
    Unsupported { host: String, error: KasaError },
    /// The reply could not be read.
    Invalid { host: String, error: KasaError },
}

impl DiscoveryEvent {
    pub fn host(&self) -> &str {
        match self {
            Self::Discovered(device) => device.host(),
            Self::Unsupported { host, .. } | Self::Invalid { host, .. } => host,
        }
    }
}

/// Everything found by [`discover`], keyed by IP.
#[derive(Debug, Default)]
pub struct DiscoveredDevices {
    pub devices: BTreeMap<String, Device>,
    pub unsupported: BTreeMap<String, KasaError>,
    pub invalid: BTreeMap<String, KasaError>,
}

impl DiscoveredDevices {
    fn record(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Discovered(device) => {
                self.devices.insert(device.host().to_string(), device);
            }
            DiscoveryEvent::Unsupported { host, error } => {
                self.unsupported.insert(host, error);
            }
            DiscoveryEvent::Invalid { host, error } => {
                self.invalid.insert(host, error);
            }
        }
    }
}

async fn bind_socket() -> Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| KasaError::Connection(format!("Unable to bind discovery socket: {e}")))?;
    socket
        .set_broadcast(true)
        .map_err(|e| KasaError::Connection(format!("Unable to enable broadcast: {e}")))?;
    Ok(Arc::new(socket))
}

/// Send both probes `packets` times, spread over the discovery timeout.
async fn send_probes(socket: Arc<UdpSocket>, options: DiscoveryOptions) {
    let legacy = XorEncryption::xor_payload(json!({"system": {"get_sysinfo": {}}}).to_string().as_bytes());
    let packets = options.discovery_packets.max(1);
    let interval = options.discovery_timeout / packets;
    let targets = [
        (format!("{}:{}", options.target, options.legacy_port()), legacy.as_slice()),
        (format!("{}:{}", options.target, options.port_2), &DISCOVERY_QUERY_2[..]),
    ];

    for i in 0..packets {
        for (target, payload) in &targets {
            if let Err(e) = socket.send_to(payload, target.as_str()).await {
                warn!("Unable to send discovery probe to {target}: {e}");
            }
        }
        if i + 1 < packets {
            sleep(interval).await;
        }
    }
}

/// Stream discovery events until the timeout passes.
///
/// Each source IP produces at most one event.
pub fn discovery_stream(options: DiscoveryOptions) -> impl Stream<Item = Result<DiscoveryEvent>> {
    stream! {
        let socket = match bind_socket().await {
            Ok(socket) => socket,
            Err(e) => {
                yield Err(e);
                return;
            }
        };
        debug!("[DISCOVERY] {} >> {}", options.target, options.legacy_port());

        let sender = tokio::spawn(send_probes(Arc::clone(&socket), options.clone()));
        let deadline = Instant::now() + options.discovery_timeout;
        let mut seen: HashSet<IpAddr> = HashSet::new();
        let mut buf = vec![0u8; RECV_BUFFER];

        loop {
            let (len, addr) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    debug!("Discovery receive failed: {e}");
                    continue;
                }
                Ok(Ok(received)) => received,
            };
            if !seen.insert(addr.ip()) {
                continue;
            }
            yield Ok(handle_reply(&buf[..len], addr, &options));
        }
        sender.abort();
    }
}

/// Turn one datagram into an event.
fn handle_reply(data: &[u8], addr: SocketAddr, options: &DiscoveryOptions) -> DiscoveryEvent {
    let host = addr.ip().to_string();
    debug!("[DISCOVERY] {host} << {} bytes from port {}", data.len(), addr.port());

    let result = if addr.port() == options.port_2 {
        device_from_encrypted_reply(&host, data, options)
    } else {
        device_from_legacy_reply(&host, data, options)
    };

    match result {
        Ok(device) => DiscoveryEvent::Discovered(device),
        Err(error @ KasaError::UnsupportedDevice { .. }) => {
            debug!("Unsupported device found at {host} << {error}");
            DiscoveryEvent::Unsupported { host, error }
        }
        Err(error) => {
            debug!("[DISCOVERY] Unable to find device type for {host}: {error}");
            DiscoveryEvent::Invalid { host, error }
        }
    }
}

fn unreadable(host: &str, error: impl std::fmt::Display) -> KasaError {
    KasaError::kasa(format!("Unable to read response from device: {host}: {error}"))
}

fn unsupported(message: String, discovery_result: Value) -> KasaError {
    KasaError::UnsupportedDevice {
        message,
        discovery_result: Some(discovery_result),
    }
}

/// A reply on the legacy port: XOR-encrypted sysinfo.
pub(crate) fn device_from_legacy_reply(
    host: &str,
    data: &[u8],
    options: &DiscoveryOptions,
) -> Result<Device> {
    let plain = XorEncryption::decrypt(data).map_err(|e| unreadable(host, e))?;
    let info: Value = serde_json::from_str(&plain).map_err(|e| unreadable(host, e))?;

    let kind = get_device_type_from_sys_info(&info)?;
    let family = if kind.is_bulb() {
        DeviceFamily::IotSmartBulb
    } else {
        DeviceFamily::IotSmartPlugSwitch
    };
    let config = options
        .device_config(host)
        .with_connection_type(ConnectionType::new(family, EncryptType::Xor));

    let Some(Protocol::Iot(protocol)) = get_protocol(&config)? else {
        return Err(unsupported(
            format!("Unsupported device {host} of type {family}: {info}"),
            info,
        ));
    };
    let mut device = IotDevice::new(protocol, kind);
    device.update_from_discover_info(info);
    Ok(Device::Iot(device))
}

/// A reply on port 20002: header, then a JSON discovery result.
pub(crate) fn device_from_encrypted_reply(
    host: &str,
    data: &[u8],
    options: &DiscoveryOptions,
) -> Result<Device> {
    let body = data
        .get(DISCOVERY_HEADER_LEN..)
        .ok_or_else(|| unreadable(host, "reply shorter than its header"))?;
    let info: Value = serde_json::from_slice(body).map_err(|e| unreadable(host, e))?;

    let discovery = DiscoveryResult::from_reply(&info).map_err(|e| {
        unsupported(
            format!("Unable to parse discovery from device: {host}: {e}"),
            info.clone(),
        )
    })?;
    let type_ = discovery.device_type.as_str();
    let scheme = &discovery.mgt_encrypt_schm;

    let connection =
        ConnectionType::from_values(type_, &scheme.encrypt_type, scheme.lv).map_err(|_| {
            unsupported(
                format!(
                    "Unsupported device {host} of type {type_} with encrypt_type {}",
                    scheme.encrypt_type
                ),
                discovery.to_value(),
            )
        })?;
    let config = options.device_config(host).with_connection_type(connection);

    let protocol = get_protocol(&config)?.ok_or_else(|| {
        let connection = serde_json::to_value(&config.connection_type).unwrap_or(Value::Null);
        unsupported(
            format!("Unsupported encryption scheme {host} of type {connection}: {info}"),
            discovery.to_value(),
        )
    })?;
    let mut device = device_for_protocol(protocol).map_err(|_| {
        unsupported(
            format!("Unsupported device {host} of type {type_}: {info}"),
            discovery.to_value(),
        )
    })?;

    let mut seed = discovery.to_value();
    seed["model"] = json!(discovery.device_model);
    seed["alias"] = json!(UNAVAILABLE_ALIAS);
    seed["nickname"] = json!(UNAVAILABLE_ALIAS);
    device.update_from_discover_info(seed);
    Ok(device)
}

/// Run discovery to completion and collect the results.
pub async fn discover(options: DiscoveryOptions) -> Result<DiscoveredDevices> {
    let mut found = DiscoveredDevices::default();
    let events = discovery_stream(options);
    pin_mut!(events);
    while let Some(event) = events.next().await {
        found.record(event?);
    }
    Ok(found)
}

/// Discover a single device by host name or address.
///
/// Probes are sent straight to the host and discovery stops at its first
/// answer.
pub async fn discover_single(host: &str, options: DiscoveryOptions) -> Result<Device> {
    let ip = resolve(host).await?;
    let events = discovery_stream(options.with_target(ip.to_string()));
    pin_mut!(events);
    while let Some(event) = events.next().await {
        let event = event?;
        if event.host() != ip.to_string() {
            continue;
        }
        return match event {
            DiscoveryEvent::Discovered(device) => Ok(device),
            DiscoveryEvent::Unsupported { error, .. } | DiscoveryEvent::Invalid { error, .. } => {
                Err(error)
            }
        };
    }
    Err(KasaError::Timeout(format!(
        "Timed out getting discovery response for {host}"
    )))
}

async fn resolve(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| KasaError::Connection(format!("Unable to resolve {host}: {e}")))?;
    addrs
        .find(|addr| addr.is_ipv4())
        .map(|addr| addr.ip())
        .ok_or_else(|| KasaError::Connection(format!("No IPv4 address for {host}")))
}
