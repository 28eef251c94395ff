//! Protocols: request shaping and retry policy on top of a transport.
//!
//! A protocol owns exactly one transport and serialises access to it. Both
//! protocol families share the retry rules in [`RetryAction`].

pub mod iot;
pub mod smart;
pub mod snowflake;

use std::sync::Arc;
use std::time::Duration;

use kasa_protocol::{DeviceConfig, DeviceFamily, EncryptType, KasaError, Result};
use kasa_transport::{AesTransport, KlapTransport, KlapVersion, Transport, XorTransport};

pub use iot::IotProtocol;
pub use smart::{
    smart_request, ChildProtocol, MethodResult, SmartProtocol, SmartQuery, SmartRequest, SmartResponse,
};

pub const DEFAULT_RETRY_COUNT: usize = 3;

/// Delay before retrying a retryable failure.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// What to do after a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryAction {
    Immediately,
    AfterBackoff,
    Raise,
}

impl RetryAction {
    pub(crate) fn for_error(error: &KasaError) -> Self {
        match error {
            KasaError::Connection(_) => Self::Immediately,
            KasaError::Retryable { .. } | KasaError::Timeout(_) => Self::AfterBackoff,
            _ => Self::Raise,
        }
    }
}

/// A connected protocol of either family.
#[derive(Clone)]
pub enum Protocol {
    Iot(Arc<IotProtocol>),
    Smart(Arc<SmartProtocol>),
}

impl Protocol {
    pub fn config(&self) -> &DeviceConfig {
        match self {
            Self::Iot(p) => p.config(),
            Self::Smart(p) => p.config(),
        }
    }

    pub fn host(&self) -> &str {
        &self.config().host
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Iot(p) => p.port(),
            Self::Smart(p) => p.port(),
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            Self::Iot(p) => p.close().await,
            Self::Smart(p) => p.close().await,
        }
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Iot(_) => "IotProtocol",
            Self::Smart(_) => "SmartProtocol",
        };
        write!(f, "<{kind} for {}>", self.host())
    }
}

/// Pick the protocol and transport for a connection type.
///
/// Returns `Ok(None)` for combinations no protocol handles.
pub fn get_protocol(config: &DeviceConfig) -> Result<Option<Protocol>> {
    let connection = &config.connection_type;
    let iot = matches!(
        connection.device_family,
        DeviceFamily::IotSmartPlugSwitch | DeviceFamily::IotSmartBulb
    );

    let protocol = match (iot, connection.encryption_type) {
        (true, EncryptType::Xor) => {
            let transport: Box<dyn Transport> = Box::new(XorTransport::new(config));
            Protocol::Iot(Arc::new(IotProtocol::new(config.clone(), transport)))
        }
        (true, EncryptType::Klap) => {
            let transport: Box<dyn Transport> =
                Box::new(KlapTransport::new(config, KlapVersion::V1)?);
            Protocol::Iot(Arc::new(IotProtocol::new(config.clone(), transport)))
        }
        (false, EncryptType::Aes) => {
            let transport: Box<dyn Transport> = Box::new(AesTransport::new(config)?);
            Protocol::Smart(Arc::new(SmartProtocol::new(config.clone(), transport)?))
        }
        (false, EncryptType::Klap) => {
            let transport: Box<dyn Transport> =
                Box::new(KlapTransport::new(config, KlapVersion::V2)?);
            Protocol::Smart(Arc::new(SmartProtocol::new(config.clone(), transport)?))
        }
        _ => return Ok(None),
    };
    Ok(Some(protocol))
}
