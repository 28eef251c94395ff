//! Discovery over loopback UDP against fake responders.

use std::time::Duration;

use kasa_core::discover::{discover, discover_single, DiscoveryOptions};
use kasa_core::{Device, DeviceType, KasaError};
use kasa_protocol::discovery::{DISCOVERY_HEADER_LEN, DISCOVERY_QUERY_2, UNAVAILABLE_ALIAS};
use kasa_protocol::{EncryptType, XorEncryption};
use kasa_transport::fake::fixtures;
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// A socket that answers every datagram with `reply`.
async fn responder(reply: Vec<u8>) -> (u16, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        while let Ok((_, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&reply, peer).await;
        }
    });
    (port, handle)
}

/// A socket that swallows probes.
async fn silent() -> (u16, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        while socket.recv_from(&mut buf).await.is_ok() {}
    });
    (port, handle)
}

/// A legacy responder that checks the probe before answering.
async fn legacy_device(sys_info: Value) -> (u16, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let reply = XorEncryption::xor_payload(json!({"system": sys_info["system"]}).to_string().as_bytes());
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            let Ok(request) = XorEncryption::decrypt(&buf[..len]) else {
                continue;
            };
            if request.contains("get_sysinfo") {
                let _ = socket.send_to(&reply, peer).await;
            }
        }
    });
    (port, handle)
}

fn encrypted_reply(device_type: &str, encrypt_type: &str) -> Vec<u8> {
    let mut data = vec![0u8; DISCOVERY_HEADER_LEN];
    let body = json!({
        "result": {
            "device_id": "0000000000000000000000000000000000000002",
            "owner": "",
            "device_type": device_type,
            "device_model": "L530E(EU)",
            "ip": "127.0.0.1",
            "mac": "12-34-56-78-90-AB",
            "is_support_iot_cloud": true,
            "obd_src": "tplink",
            "factory_default": false,
            "mgt_encrypt_schm": {
                "is_support_https": false,
                "encrypt_type": encrypt_type,
                "http_port": 80,
                "lv": 2
            }
        },
        "error_code": 0
    });
    data.extend(body.to_string().into_bytes());
    data
}

fn options(port: u16, port_2: u16, timeout: Duration) -> DiscoveryOptions {
    DiscoveryOptions::default()
        .with_target("127.0.0.1")
        .with_port(Some(port))
        .with_port_2(port_2)
        .with_timeout(timeout)
        .with_packets(2)
}

#[tokio::test]
async fn discovers_legacy_device() {
    let (port, device) = legacy_device(fixtures::iot_plug()).await;
    let (port_2, quiet) = silent().await;

    let found = discover(options(port, port_2, Duration::from_millis(500)))
        .await
        .unwrap();
    assert_eq!(found.devices.len(), 1);
    assert!(found.unsupported.is_empty());
    assert!(found.invalid.is_empty());

    let plug = &found.devices["127.0.0.1"];
    assert_eq!(plug.device_type(), DeviceType::Plug);
    assert_eq!(plug.alias().unwrap().as_deref(), Some("Bedroom Plug"));
    assert_eq!(plug.port(), port);

    device.abort();
    quiet.abort();
}

#[tokio::test]
async fn discovers_encrypted_device() {
    let (port, quiet) = silent().await;
    let (port_2, device) = responder(encrypted_reply("SMART.TAPOBULB", "KLAP")).await;

    let found = discover(options(port, port_2, Duration::from_millis(500)))
        .await
        .unwrap();
    let bulb = &found.devices["127.0.0.1"];
    assert!(matches!(bulb, Device::Smart(_)));
    assert_eq!(bulb.alias().unwrap().as_deref(), Some(UNAVAILABLE_ALIAS));
    assert_eq!(bulb.model().unwrap(), "L530E(EU)");
    assert_eq!(bulb.config().connection_type.encryption_type, EncryptType::Klap);

    device.abort();
    quiet.abort();
}

#[tokio::test]
async fn unsupported_device_is_reported() {
    let (port, quiet) = silent().await;
    let (port_2, device) = responder(encrypted_reply("SMART.TAPOBULB", "FOO")).await;

    let found = discover(options(port, port_2, Duration::from_millis(500)))
        .await
        .unwrap();
    assert!(found.devices.is_empty());
    let error = &found.unsupported["127.0.0.1"];
    assert!(matches!(error, KasaError::UnsupportedDevice { .. }));

    device.abort();
    quiet.abort();
}

#[tokio::test]
async fn garbage_reply_is_invalid() {
    let (port, device) = responder(b"not a device".to_vec()).await;
    let (port_2, quiet) = silent().await;

    let found = discover(options(port, port_2, Duration::from_millis(500)))
        .await
        .unwrap();
    assert!(found.devices.is_empty());
    assert!(found.invalid.contains_key("127.0.0.1"));

    device.abort();
    quiet.abort();
}

#[tokio::test]
async fn discover_single_returns_first_answer() {
    let (port, device) = legacy_device(fixtures::iot_bulb()).await;
    let (port_2, quiet) = silent().await;

    let started = std::time::Instant::now();
    let bulb = discover_single("127.0.0.1", options(port, port_2, Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(bulb.device_type(), DeviceType::Bulb);
    assert_eq!(bulb.alias().unwrap().as_deref(), Some("Kitchen Bulb"));
    assert!(started.elapsed() < Duration::from_secs(5));

    device.abort();
    quiet.abort();
}

#[tokio::test]
async fn discover_single_times_out() {
    let (port, quiet) = silent().await;
    let (port_2, quiet_2) = silent().await;

    let err = discover_single("127.0.0.1", options(port, port_2, Duration::from_millis(300)))
        .await
        .unwrap_err();
    assert!(matches!(err, KasaError::Timeout(_)));
    assert_eq!(
        err.to_string(),
        "Timed out getting discovery response for 127.0.0.1"
    );

    quiet.abort();
    quiet_2.abort();
}

#[tokio::test]
async fn probes_match_the_wire_format() {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port_2 = socket.local_addr().unwrap().port();
    let (port, quiet) = silent().await;

    let probe = tokio::spawn(async move {
        let mut buf = vec![0u8; 64];
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        buf.truncate(len);
        buf
    });
    discover(options(port, port_2, Duration::from_millis(300)))
        .await
        .unwrap();

    assert_eq!(probe.await.unwrap(), DISCOVERY_QUERY_2);
    quiet.abort();
}
