//! Scripted transport for testing protocol behaviour.
//!
//! Replays a fixed sequence of replies, failures and delays, recording what
//! was sent so tests can assert on retry and reset behaviour without a
//! device.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kasa_protocol::{KasaError, Result};
use serde_json::Value;
use tokio::time::sleep;

use crate::Transport;

/// Kind of error a scripted failure produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Retryable,
    Connection,
    Timeout,
    Authentication,
    Device,
}

impl MockFailure {
    fn into_error(self, message: String) -> KasaError {
        match self {
            Self::Retryable => KasaError::retryable(message),
            Self::Connection => KasaError::Connection(message),
            Self::Timeout => KasaError::Timeout(message),
            Self::Authentication => KasaError::authentication(message),
            Self::Device => KasaError::Device {
                message,
                code: None,
            },
        }
    }
}

/// One scripted step.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Reply with this JSON value.
    Json(Value),
    /// Fail the send.
    Failure { kind: MockFailure, message: String },
    /// Delay before the next step (for timing tests).
    Delay { ms: u64 },
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub responses: Vec<MockResponse>,
    pub default_port: u16,
    pub credentials_hash: Option<String>,
    /// Optional delay before every reply (ms).
    pub response_delay_ms: Option<u64>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            responses: Vec::new(),
            default_port: 9999,
            credentials_hash: None,
            response_delay_ms: None,
        }
    }
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(mut self, responses: Vec<MockResponse>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn with_credentials_hash(mut self, hash: impl Into<String>) -> Self {
        self.credentials_hash = Some(hash.into());
        self
    }

    pub fn with_response_delay(mut self, ms: u64) -> Self {
        self.response_delay_ms = Some(ms);
        self
    }
}

#[derive(Debug, Default)]
struct MockLog {
    requests: Vec<String>,
    resets: usize,
    closes: usize,
}

/// Shared view of what a [`MockTransport`] saw.
#[derive(Debug, Clone, Default)]
pub struct MockHandle(Arc<Mutex<MockLog>>);

impl MockHandle {
    fn with<T>(&self, f: impl FnOnce(&mut MockLog) -> T) -> T {
        let mut log = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut log)
    }

    /// Raw requests in the order they were sent.
    pub fn requests(&self) -> Vec<String> {
        self.with(|log| log.requests.clone())
    }

    /// Requests decoded as JSON; undecodable ones are skipped.
    pub fn json_requests(&self) -> Vec<Value> {
        self.requests()
            .iter()
            .filter_map(|r| serde_json::from_str(r).ok())
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.with(|log| log.requests.len())
    }

    pub fn reset_count(&self) -> usize {
        self.with(|log| log.resets)
    }

    pub fn close_count(&self) -> usize {
        self.with(|log| log.closes)
    }
}

pub struct MockTransport {
    script: VecDeque<MockResponse>,
    config: MockConfig,
    handle: MockHandle,
}

impl MockTransport {
    pub fn new(config: MockConfig) -> Self {
        Self {
            script: config.responses.iter().cloned().collect(),
            config,
            handle: MockHandle::default(),
        }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn default_port(&self) -> u16 {
        self.config.default_port
    }

    fn credentials_hash(&self) -> Option<String> {
        self.config.credentials_hash.clone()
    }

    async fn send(&mut self, request: &str) -> Result<Value> {
        self.handle.with(|log| log.requests.push(request.to_string()));
        if let Some(delay_ms) = self.config.response_delay_ms {
            sleep(Duration::from_millis(delay_ms)).await;
        }

        loop {
            match self.script.pop_front() {
                Some(MockResponse::Json(value)) => return Ok(value),
                Some(MockResponse::Failure { kind, message }) => {
                    return Err(kind.into_error(message))
                }
                Some(MockResponse::Delay { ms }) => {
                    sleep(Duration::from_millis(ms)).await;
                    // Delay doesn't consume the request
                }
                None => return Err(KasaError::kasa("Mock transport script exhausted")),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.with(|log| log.closes += 1);
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        self.handle.with(|log| log.resets += 1);
        Ok(())
    }
}

/// Built-in scripts for common scenarios.
pub mod fixtures {
    use super::*;

    /// Every send fails with the same kind of error.
    pub fn always_failing(kind: MockFailure, sends: usize) -> MockConfig {
        let responses = (0..sends)
            .map(|i| MockResponse::Failure {
                kind,
                message: format!("scripted failure {}", i + 1),
            })
            .collect();
        MockConfig::new().with_responses(responses)
    }

    /// `failures` errors of one kind, then a successful reply.
    pub fn failures_then(kind: MockFailure, failures: usize, reply: Value) -> MockConfig {
        let mut config = always_failing(kind, failures);
        config.responses.push(MockResponse::Json(reply));
        config
    }

    /// Replies in order.
    pub fn replies(values: Vec<Value>) -> MockConfig {
        MockConfig::new().with_responses(values.into_iter().map(MockResponse::Json).collect())
    }
}
