//! Protocol for IOT (legacy Kasa) devices.

use std::time::Duration;

use kasa_protocol::{DeviceConfig, Result};
use kasa_transport::Transport;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::{RetryAction, DEFAULT_RETRY_COUNT, RETRY_BACKOFF};

pub struct IotProtocol {
    config: DeviceConfig,
    port: u16,
    transport: Mutex<Box<dyn Transport>>,
    backoff: Duration,
}

impl IotProtocol {
    pub fn new(config: DeviceConfig, transport: Box<dyn Transport>) -> Self {
        let port = config.port_override.unwrap_or(transport.default_port());
        Self {
            config,
            port,
            transport: Mutex::new(transport),
            backoff: RETRY_BACKOFF,
        }
    }

    /// Override the delay between retries.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn credentials_hash(&self) -> Option<String> {
        self.transport.lock().await.credentials_hash()
    }

    pub async fn query(&self, request: &Value) -> Result<Value> {
        self.query_with_retries(request, DEFAULT_RETRY_COUNT).await
    }

    pub async fn query_with_retries(&self, request: &Value, retry_count: usize) -> Result<Value> {
        let request = serde_json::to_string(request)?;
        let mut transport = self.transport.lock().await;

        let mut retry = 0;
        loop {
            let error = match transport.send(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if let Err(e) = transport.reset().await {
                debug!("{}: unable to reset transport: {e}", self.host());
            }
            if retry >= retry_count {
                debug!("Giving up on {} after {retry} retries", self.host());
                return Err(error);
            }
            match RetryAction::for_error(&error) {
                RetryAction::Immediately => {
                    debug!("Device {} got a connection error, will retry: {error}", self.host());
                }
                RetryAction::AfterBackoff => {
                    debug!("Device {} got a retryable error, will retry: {error}", self.host());
                    tokio::time::sleep(self.backoff).await;
                }
                RetryAction::Raise => {
                    debug!("Unable to query the device {}: {error}", self.host());
                    return Err(error);
                }
            }
            retry += 1;
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.lock().await.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasa_protocol::KasaError;
    use kasa_transport::mock::fixtures;
    use kasa_transport::{MockFailure, MockTransport};
    use serde_json::json;

    fn protocol(transport: MockTransport) -> IotProtocol {
        IotProtocol::new(DeviceConfig::new("127.0.0.1"), Box::new(transport))
            .with_backoff(Duration::ZERO)
    }

    #[tokio::test]
    async fn returns_reply() {
        let transport = MockTransport::new(fixtures::replies(vec![json!({"system": {}})]));
        let handle = transport.handle();
        let protocol = protocol(transport);

        let reply = protocol.query(&json!({"system": {"get_sysinfo": {}}})).await.unwrap();
        assert_eq!(reply, json!({"system": {}}));
        assert_eq!(
            handle.json_requests(),
            vec![json!({"system": {"get_sysinfo": {}}})]
        );
    }

    #[tokio::test]
    async fn retries_transient_errors_then_gives_up() {
        for kind in [MockFailure::Retryable, MockFailure::Timeout, MockFailure::Connection] {
            let transport = MockTransport::new(fixtures::always_failing(kind, 10));
            let handle = transport.handle();
            let protocol = protocol(transport);

            assert!(protocol.query(&json!({})).await.is_err());
            assert_eq!(handle.send_count(), DEFAULT_RETRY_COUNT + 1, "{kind:?}");
            assert_eq!(handle.reset_count(), DEFAULT_RETRY_COUNT + 1, "{kind:?}");
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_error() {
        let transport =
            MockTransport::new(fixtures::failures_then(MockFailure::Retryable, 2, json!({"ok": 1})));
        let handle = transport.handle();
        let protocol = protocol(transport);

        assert_eq!(protocol.query(&json!({})).await.unwrap(), json!({"ok": 1}));
        assert_eq!(handle.send_count(), 3);
    }

    #[tokio::test]
    async fn authentication_errors_are_not_retried() {
        let transport = MockTransport::new(fixtures::always_failing(MockFailure::Authentication, 5));
        let handle = transport.handle();
        let protocol = protocol(transport);

        let err = protocol.query(&json!({})).await.unwrap_err();
        assert!(matches!(err, KasaError::Authentication { .. }));
        assert_eq!(handle.send_count(), 1);
        assert_eq!(handle.reset_count(), 1);
    }

    #[tokio::test]
    async fn custom_retry_count() {
        let transport = MockTransport::new(fixtures::always_failing(MockFailure::Retryable, 10));
        let handle = transport.handle();
        let protocol = protocol(transport);

        assert!(protocol.query_with_retries(&json!({}), 0).await.is_err());
        assert_eq!(handle.send_count(), 1);
    }
}
