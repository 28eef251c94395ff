//! kasa-transport: Wire transports for TP-Link smart home devices.
//!
//! A transport moves one JSON request to a device and returns the decoded
//! JSON reply. Retrying, batching and request shaping live one layer up in
//! the protocols of `kasa-core`.

use async_trait::async_trait;
use kasa_protocol::Result;
use serde_json::Value;

pub mod aes;
pub mod fake;
pub mod frame;
pub mod http;
pub mod klap;
pub mod mock;
pub mod xor;

pub use aes::AesTransport;
pub use fake::{FakeIotTransport, FakeSmartTransport, RequestLog};
pub use http::{HttpClient, ReqwestClient};
pub use klap::{KlapTransport, KlapVersion};
pub use mock::{MockConfig, MockFailure, MockHandle, MockResponse, MockTransport};
pub use xor::XorTransport;

#[async_trait]
pub trait Transport: Send {
    /// Port used when the configuration has no override.
    fn default_port(&self) -> u16;

    /// Opaque hash that can stand in for credentials on later connections.
    fn credentials_hash(&self) -> Option<String>;

    /// Send a serialized request and return the decoded reply.
    async fn send(&mut self, request: &str) -> Result<Value>;

    /// Close the connection and drop any session.
    async fn close(&mut self) -> Result<()>;

    /// Drop session state so the next send starts fresh.
    async fn reset(&mut self) -> Result<()>;
}
