//! XOR-obfuscated JSON over TCP (legacy IOT devices).

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use kasa_protocol::{DeviceConfig, KasaError, Result, XorEncryption};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::frame::FrameDecoder;
use crate::Transport;

pub struct XorTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    decoder: FrameDecoder,
}

impl XorTransport {
    pub const DEFAULT_PORT: u16 = 9999;

    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port_override.unwrap_or(Self::DEFAULT_PORT),
            timeout: config.timeout_duration(),
            stream: None,
            decoder: FrameDecoder::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = self.address();
        match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Err(_) => Err(KasaError::retryable(format!(
                "Unable to connect to the device: {addr}: timed out"
            ))),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => Err(KasaError::kasa(
                format!("Unable to connect to the device: {addr}: {e}"),
            )),
            Ok(Err(e)) => Err(KasaError::retryable(format!(
                "Unable to connect to the device: {addr}: {e}"
            ))),
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("{addr}: unable to set TCP_NODELAY: {e}");
                }
                self.stream = Some(stream);
                Ok(())
            }
        }
    }

    async fn execute_send(&mut self, request: &str) -> Result<Value> {
        let Self {
            stream, decoder, ..
        } = self;
        let stream = stream
            .as_mut()
            .ok_or_else(|| KasaError::kasa("Not connected"))?;

        stream
            .write_all(&XorEncryption::encrypt(request))
            .await
            .map_err(|e| KasaError::kasa(e.to_string()))?;

        let mut buf = [0u8; 4096];
        let payload = loop {
            if let Some(frame) = decoder.next_frame()? {
                break frame;
            }
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| KasaError::kasa(e.to_string()))?;
            if n == 0 {
                return Err(KasaError::kasa("Connection closed by device"));
            }
            decoder.extend(&buf[..n]);
        };

        let response = XorEncryption::decrypt(&payload)?;
        Ok(serde_json::from_str(&response)?)
    }

    fn close_without_wait(&mut self) {
        self.stream = None;
        self.decoder.clear();
    }
}

#[async_trait]
impl Transport for XorTransport {
    fn default_port(&self) -> u16 {
        Self::DEFAULT_PORT
    }

    fn credentials_hash(&self) -> Option<String> {
        None
    }

    async fn send(&mut self, request: &str) -> Result<Value> {
        if let Err(e) = self.connect().await {
            self.close_without_wait();
            return Err(e);
        }

        let timeout = self.timeout;
        let result = match tokio::time::timeout(timeout, self.execute_send(request)).await {
            Ok(result) => result,
            Err(_) => Err(KasaError::kasa("timed out")),
        };
        result.map_err(|e| {
            self.close_without_wait();
            KasaError::retryable(format!(
                "Unable to query the device {}: {e}",
                self.address()
            ))
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.decoder.clear();
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        self.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Serve `replies` one per request on a loopback socket, echoing nothing.
    async fn serve(replies: Vec<Value>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for reply in replies {
                let mut len = [0u8; 4];
                socket.read_exact(&mut len).await.unwrap();
                let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
                socket.read_exact(&mut body).await.unwrap();
                let encrypted = XorEncryption::encrypt(&reply.to_string());
                // Split the reply to exercise partial reads.
                let (a, b) = encrypted.split_at(3);
                socket.write_all(a).await.unwrap();
                socket.flush().await.unwrap();
                socket.write_all(b).await.unwrap();
            }
        });
        port
    }

    fn config(port: u16) -> DeviceConfig {
        DeviceConfig::new("127.0.0.1").with_port_override(Some(port))
    }

    #[tokio::test]
    async fn send_roundtrip_over_loopback() {
        let reply = json!({"system": {"get_sysinfo": {"alias": "lamp", "err_code": 0}}});
        let port = serve(vec![reply.clone(), reply.clone()]).await;
        let mut transport = XorTransport::new(&config(port));

        let resp = transport
            .send(r#"{"system":{"get_sysinfo":{}}}"#)
            .await
            .unwrap();
        assert_eq!(resp, reply);

        // Connection is reused for the second request.
        let resp = transport
            .send(r#"{"system":{"get_sysinfo":{}}}"#)
            .await
            .unwrap();
        assert_eq!(resp["system"]["get_sysinfo"]["alias"], "lamp");
    }

    #[tokio::test]
    async fn connection_refused_is_not_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = XorTransport::new(&config(port));
        let err = transport.send("{}").await.unwrap_err();
        assert!(matches!(err, KasaError::Kasa(_)), "got {err:?}");
        assert!(err.to_string().starts_with("Unable to connect to the device"));
    }

    #[tokio::test]
    async fn closed_connection_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = XorTransport::new(&config(port));
        let err = transport.send("{}").await.unwrap_err();
        assert!(matches!(err, KasaError::Retryable { .. }), "got {err:?}");
        assert!(err.to_string().contains("Unable to query the device"));
    }

    #[test]
    fn default_port_and_timeout() {
        let transport = XorTransport::new(&DeviceConfig::new("10.0.0.1").with_timeout(100));
        assert_eq!(transport.default_port(), 9999);
        assert_eq!(transport.timeout(), Duration::from_secs(100));
        assert_eq!(transport.address(), "10.0.0.1:9999");
    }
}
