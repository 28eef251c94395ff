//! KLAP transport.
//!
//! Two seed exchanges over HTTP prove that both sides know the account hash.
//! Key, IV and signature material are then derived from the seeds. Version 1
//! (IOT devices) hashes credentials with MD5; version 2 (SMART devices) uses
//! SHA-1 and mixes both seeds into the challenge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kasa_protocol::{Credentials, DefaultCredentials, DeviceConfig, KasaError, Result};
use rand::RngCore;
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::http::{HttpBody, HttpClient, HttpRequest, ReqwestClient};
use crate::Transport;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const SESSION_COOKIE_NAME: &str = "TP_SESSIONID";
const TIMEOUT_COOKIE_NAME: &str = "TIMEOUT";
const ONE_DAY_SECONDS: u64 = 86_400;
const SESSION_EXPIRE_BUFFER_SECONDS: u64 = 60 * 20;

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlapVersion {
    V1,
    V2,
}

impl KlapVersion {
    /// Account hash the device stores for its owner.
    pub fn auth_hash(self, credentials: &Credentials) -> Vec<u8> {
        match self {
            Self::V1 => {
                let mut buf = md5::compute(credentials.username.as_bytes()).0.to_vec();
                buf.extend_from_slice(&md5::compute(credentials.password.as_bytes()).0);
                md5::compute(&buf).0.to_vec()
            }
            Self::V2 => {
                let username = Sha1::digest(credentials.username.as_bytes());
                let password = Sha1::digest(credentials.password.as_bytes());
                sha256(&[username.as_slice(), password.as_slice()]).to_vec()
            }
        }
    }

    /// Hash the device must answer handshake1 with.
    pub fn handshake1_hash(self, local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> [u8; 32] {
        match self {
            Self::V1 => sha256(&[local_seed, auth_hash]),
            Self::V2 => sha256(&[local_seed, remote_seed, auth_hash]),
        }
    }

    /// Hash the client proves itself with in handshake2.
    pub fn handshake2_hash(self, local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> [u8; 32] {
        match self {
            Self::V1 => sha256(&[remote_seed, auth_hash]),
            Self::V2 => sha256(&[remote_seed, local_seed, auth_hash]),
        }
    }
}

/// Key material and request sequence for an established KLAP session.
#[derive(Debug, Clone)]
pub struct KlapEncryptionSession {
    key: [u8; 16],
    iv: [u8; 12],
    seq: i32,
    sig: [u8; 28],
}

impl KlapEncryptionSession {
    pub fn new(local_seed: &[u8], remote_seed: &[u8], auth_hash: &[u8]) -> Self {
        let derive = |label: &[u8]| sha256(&[label, local_seed, remote_seed, auth_hash]);

        let mut key = [0u8; 16];
        key.copy_from_slice(&derive(b"lsk")[..16]);

        let full_iv = derive(b"iv");
        let mut iv = [0u8; 12];
        iv.copy_from_slice(&full_iv[..12]);
        let seq = i32::from_be_bytes([full_iv[28], full_iv[29], full_iv[30], full_iv[31]]);

        let mut sig = [0u8; 28];
        sig.copy_from_slice(&derive(b"ldk")[..28]);

        Self { key, iv, seq, sig }
    }

    pub fn seq(&self) -> i32 {
        self.seq
    }

    fn iv_seq(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..12].copy_from_slice(&self.iv);
        iv[12..].copy_from_slice(&self.seq.to_be_bytes());
        iv
    }

    /// Advance the sequence and return the signed payload with its sequence number.
    pub fn encrypt(&mut self, data: &[u8]) -> (Vec<u8>, i32) {
        self.seq = self.seq.wrapping_add(1);
        let ciphertext = Aes128CbcEnc::new(&self.key.into(), &self.iv_seq().into())
            .encrypt_padded_vec_mut::<Pkcs7>(data);
        let seq_bytes = self.seq.to_be_bytes();
        let signature = sha256(&[&self.sig[..], &seq_bytes[..], &ciphertext[..]]);

        let mut payload = signature.to_vec();
        payload.extend_from_slice(&ciphertext);
        (payload, self.seq)
    }

    /// Decrypt a reply to the most recent request.
    pub fn decrypt(&self, data: &[u8]) -> Result<String> {
        if data.len() < 32 {
            return Err(KasaError::kasa(format!(
                "KLAP response too short: {} bytes",
                data.len()
            )));
        }
        let plaintext = Aes128CbcDec::new(&self.key.into(), &self.iv_seq().into())
            .decrypt_padded_vec_mut::<Pkcs7>(&data[32..])
            .map_err(|e| KasaError::kasa(format!("Unable to decrypt KLAP response: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| KasaError::kasa(e.to_string()))
    }
}

pub struct KlapTransport {
    host: String,
    base_url: String,
    timeout: Duration,
    http: Arc<dyn HttpClient>,
    version: KlapVersion,
    local_auth_hash: Vec<u8>,
    handshake_done: bool,
    session: Option<KlapEncryptionSession>,
    session_expire_at: Option<Instant>,
    session_cookie: HashMap<String, String>,
}

impl KlapTransport {
    pub const DEFAULT_PORT: u16 = 80;

    pub fn new(config: &DeviceConfig, version: KlapVersion) -> Result<Self> {
        let http = Arc::new(ReqwestClient::new(&config.host)?);
        Self::with_http_client(config, version, http)
    }

    pub fn with_http_client(
        config: &DeviceConfig,
        version: KlapVersion,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let local_auth_hash = match &config.credentials_hash {
            Some(hash) => BASE64
                .decode(hash)
                .map_err(|e| KasaError::kasa(format!("Invalid credentials hash: {e}")))?,
            None => version.auth_hash(&config.credentials.clone().unwrap_or_default()),
        };
        let port = config.port_override.unwrap_or(Self::DEFAULT_PORT);

        Ok(Self {
            host: config.host.clone(),
            base_url: format!("http://{}:{port}/app", config.host),
            timeout: config.timeout_duration(),
            http,
            version,
            local_auth_hash,
            handshake_done: false,
            session: None,
            session_expire_at: None,
            session_cookie: HashMap::new(),
        })
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<crate::http::HttpResponse> {
        self.http
            .post(HttpRequest {
                url,
                body: HttpBody::Bytes(body),
                headers: &[],
                cookies: &self.session_cookie,
                timeout: self.timeout,
            })
            .await
    }

    /// Find the auth hash that produced the device's challenge answer.
    fn match_auth_hash(&self, local_seed: &[u8], remote_seed: &[u8], server_hash: &[u8]) -> Option<Vec<u8>> {
        let answers =
            |auth: &[u8]| self.version.handshake1_hash(local_seed, remote_seed, auth) == server_hash;

        if answers(&self.local_auth_hash) {
            return Some(self.local_auth_hash.clone());
        }
        for default in DefaultCredentials::ALL {
            let auth = self.version.auth_hash(&default.credentials());
            if answers(&auth) {
                debug!(
                    "Server response doesn't match our expected hash on ip {} but an authentication with {default:?} default credentials matched",
                    self.host
                );
                return Some(auth);
            }
        }
        let blank = self.version.auth_hash(&Credentials::default());
        if answers(&blank) {
            debug!(
                "Server response doesn't match our expected hash on ip {} but an authentication with blank credentials matched",
                self.host
            );
            return Some(blank);
        }
        None
    }

    async fn perform_handshake1(&mut self) -> Result<([u8; 16], Vec<u8>, Vec<u8>)> {
        let mut local_seed = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut local_seed);

        let url = format!("{}/handshake1", self.base_url);
        let response = self.post(&url, local_seed.to_vec()).await?;
        if response.status != 200 {
            return Err(KasaError::kasa(format!(
                "Device {} responded with {} to handshake1",
                self.host, response.status
            )));
        }
        if response.body.len() != 48 {
            return Err(KasaError::kasa(format!(
                "Device {} responded with unexpected klap response of {} bytes to handshake1",
                self.host,
                response.body.len()
            )));
        }
        let (remote_seed, server_hash) = response.body.split_at(16);

        if let Some(cookie) = response.cookies.get(SESSION_COOKIE_NAME) {
            self.session_cookie
                .insert(SESSION_COOKIE_NAME.to_string(), cookie.clone());
        }
        let timeout = response
            .cookies
            .get(TIMEOUT_COOKIE_NAME)
            .and_then(|t| t.parse::<u64>().ok())
            .unwrap_or(ONE_DAY_SECONDS);
        self.session_expire_at = Some(
            Instant::now() + Duration::from_secs(timeout.saturating_sub(SESSION_EXPIRE_BUFFER_SECONDS)),
        );

        let auth_hash = self
            .match_auth_hash(&local_seed, remote_seed, server_hash)
            .ok_or_else(|| {
                KasaError::authentication(format!(
                    "Device response did not match our challenge on ip {}, check that your e-mail and password (both case-sensitive) are correct.",
                    self.host
                ))
            })?;
        Ok((local_seed, remote_seed.to_vec(), auth_hash))
    }

    async fn perform_handshake2(
        &mut self,
        local_seed: &[u8],
        remote_seed: &[u8],
        auth_hash: &[u8],
    ) -> Result<KlapEncryptionSession> {
        let url = format!("{}/handshake2", self.base_url);
        let payload = self
            .version
            .handshake2_hash(local_seed, remote_seed, auth_hash);
        let response = self.post(&url, payload.to_vec()).await?;
        if response.status != 200 {
            return Err(KasaError::kasa(format!(
                "Device {} responded with {} to handshake2",
                self.host, response.status
            )));
        }
        Ok(KlapEncryptionSession::new(local_seed, remote_seed, auth_hash))
    }

    pub async fn perform_handshake(&mut self) -> Result<()> {
        debug!("Starting handshake with {}", self.host);
        self.handshake_done = false;
        self.session_expire_at = None;
        self.session_cookie.clear();

        let (local_seed, remote_seed, auth_hash) = self.perform_handshake1().await?;
        let session = self
            .perform_handshake2(&local_seed, &remote_seed, &auth_hash)
            .await?;
        self.session = Some(session);
        self.handshake_done = true;
        debug!("Handshake with {} complete", self.host);
        Ok(())
    }

    fn handshake_session_expired(&self) -> bool {
        self.session_expire_at
            .map_or(true, |expire_at| Instant::now() >= expire_at)
    }
}

#[async_trait]
impl Transport for KlapTransport {
    fn default_port(&self) -> u16 {
        Self::DEFAULT_PORT
    }

    fn credentials_hash(&self) -> Option<String> {
        Some(BASE64.encode(&self.local_auth_hash))
    }

    async fn send(&mut self, request: &str) -> Result<Value> {
        if !self.handshake_done || self.handshake_session_expired() {
            self.perform_handshake().await?;
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| KasaError::kasa("No KLAP session"))?;
        let (payload, seq) = session.encrypt(request.as_bytes());

        let url = format!("{}/request?seq={seq}", self.base_url);
        let response = self.post(&url, payload).await?;
        if response.status != 200 {
            debug!(
                "Device {} received status code {} for request with seq {seq}",
                self.host, response.status
            );
            if response.status == 403 {
                self.handshake_done = false;
                return Err(KasaError::retryable(format!(
                    "Got a security error from {} after handshake completed",
                    self.host
                )));
            }
            return Err(KasaError::kasa(format!(
                "Device {} responded with {} to request with seq {seq}",
                self.host, response.status
            )));
        }

        let session = self
            .session
            .as_ref()
            .ok_or_else(|| KasaError::kasa("No KLAP session"))?;
        let decrypted = session.decrypt(&response.body)?;
        debug!("Device {} query posted with seq {seq}", self.host);
        Ok(serde_json::from_str(&decrypted)?)
    }

    async fn close(&mut self) -> Result<()> {
        self.reset().await
    }

    async fn reset(&mut self) -> Result<()> {
        self.handshake_done = false;
        self.session = None;
        self.session_expire_at = None;
        self.session_cookie.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use crate::http::HttpResponse;

    const REMOTE_SEED: [u8; 16] = [7u8; 16];

    /// Device double speaking KLAP with a fixed account.
    struct MockKlapDevice {
        version: KlapVersion,
        auth_hash: Vec<u8>,
        request_status: u16,
        handshake_cookies: HashMap<String, String>,
        seeds: Mutex<Option<Vec<u8>>>,
        requests: AtomicUsize,
    }

    impl MockKlapDevice {
        fn new(version: KlapVersion, credentials: &Credentials) -> Self {
            Self {
                version,
                auth_hash: version.auth_hash(credentials),
                request_status: 200,
                handshake_cookies: HashMap::new(),
                seeds: Mutex::new(None),
                requests: AtomicUsize::new(0),
            }
        }

        fn session(&self) -> KlapEncryptionSession {
            let local_seed = self.seeds.lock().unwrap().clone().unwrap();
            KlapEncryptionSession::new(&local_seed, &REMOTE_SEED, &self.auth_hash)
        }
    }

    #[async_trait]
    impl HttpClient for MockKlapDevice {
        async fn post(&self, request: HttpRequest<'_>) -> Result<HttpResponse> {
            let HttpBody::Bytes(body) = request.body else {
                panic!("KLAP transport only posts bytes");
            };
            let reply = |status: u16, body: Vec<u8>| HttpResponse {
                status,
                body,
                cookies: HashMap::new(),
            };

            if request.url.ends_with("/handshake1") {
                let mut out = REMOTE_SEED.to_vec();
                out.extend_from_slice(&self.version.handshake1_hash(
                    &body,
                    &REMOTE_SEED,
                    &self.auth_hash,
                ));
                *self.seeds.lock().unwrap() = Some(body);
                let mut response = reply(200, out);
                response.cookies = self.handshake_cookies.clone();
                return Ok(response);
            }
            if request.url.ends_with("/handshake2") {
                let local_seed = self.seeds.lock().unwrap().clone().unwrap();
                let expected =
                    self.version
                        .handshake2_hash(&local_seed, &REMOTE_SEED, &self.auth_hash);
                let status = if body == expected { 200 } else { 403 };
                return Ok(reply(status, Vec::new()));
            }

            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.request_status != 200 {
                return Ok(reply(self.request_status, Vec::new()));
            }
            let seq: i32 = request
                .url
                .rsplit("seq=")
                .next()
                .unwrap()
                .parse()
                .unwrap();
            let mut session = self.session();
            session.seq = seq;
            let query: Value = serde_json::from_str(&session.decrypt(&body).unwrap()).unwrap();

            let response = json!({"error_code": 0, "result": {"echo": query}}).to_string();
            session.seq = seq.wrapping_sub(1);
            let (payload, _) = session.encrypt(response.as_bytes());
            Ok(reply(200, payload))
        }
    }

    fn transport(
        device: Arc<MockKlapDevice>,
        version: KlapVersion,
        credentials: Option<Credentials>,
    ) -> KlapTransport {
        let config = DeviceConfig::new("127.0.0.1").with_credentials(credentials);
        KlapTransport::with_http_client(&config, version, device).unwrap()
    }

    #[test]
    fn auth_hash_lengths() {
        let creds = Credentials::new("foo", "bar");
        assert_eq!(KlapVersion::V1.auth_hash(&creds).len(), 16);
        assert_eq!(KlapVersion::V2.auth_hash(&creds).len(), 32);
    }

    #[test]
    fn encryption_session_is_deterministic() {
        let mut a = KlapEncryptionSession::new(&[1; 16], &[2; 16], &[3; 32]);
        let mut b = KlapEncryptionSession::new(&[1; 16], &[2; 16], &[3; 32]);
        let start = a.seq();
        let (payload_a, seq_a) = a.encrypt(b"{}");
        let (payload_b, seq_b) = b.encrypt(b"{}");
        assert_eq!(payload_a, payload_b);
        assert_eq!(seq_a, start.wrapping_add(1));
        assert_eq!(seq_a, seq_b);
        assert_eq!(a.decrypt(&payload_a).unwrap(), "{}");
    }

    #[tokio::test]
    async fn send_v2_roundtrip() {
        let creds = Credentials::new("foo", "bar");
        let device = Arc::new(MockKlapDevice::new(KlapVersion::V2, &creds));
        let mut transport = transport(device.clone(), KlapVersion::V2, Some(creds));

        let resp = transport.send(r#"{"method":"get_device_info"}"#).await.unwrap();
        assert_eq!(resp["result"]["echo"]["method"], "get_device_info");
        assert!(transport.handshake_done);

        // Second request reuses the session with the next sequence number.
        let seq = transport.session.as_ref().unwrap().seq();
        transport.send(r#"{"method":"get_device_info"}"#).await.unwrap();
        assert_eq!(transport.session.as_ref().unwrap().seq(), seq.wrapping_add(1));
        assert_eq!(device.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn send_v1_roundtrip() {
        let creds = Credentials::new("foo", "bar");
        let device = Arc::new(MockKlapDevice::new(KlapVersion::V1, &creds));
        let mut transport = transport(device, KlapVersion::V1, Some(creds));
        let resp = transport
            .send(r#"{"system":{"get_sysinfo":{}}}"#)
            .await
            .unwrap();
        assert_eq!(resp["error_code"], 0);
    }

    #[tokio::test]
    async fn session_expiry_follows_timeout_cookie() {
        let creds = Credentials::new("foo", "bar");
        let mut device = MockKlapDevice::new(KlapVersion::V2, &creds);
        device.handshake_cookies = HashMap::from([
            ("TP_SESSIONID".to_string(), "ABCDEF".to_string()),
            ("TIMEOUT".to_string(), "1440".to_string()),
        ]);
        let mut transport = transport(Arc::new(device), KlapVersion::V2, Some(creds));
        transport.send(r#"{"method":"get_device_info"}"#).await.unwrap();

        assert_eq!(transport.session_cookie["TP_SESSIONID"], "ABCDEF");
        let remaining = transport
            .session_expire_at
            .unwrap()
            .saturating_duration_since(Instant::now());
        assert!(remaining <= Duration::from_secs(240));
        assert!(remaining > Duration::from_secs(230));
    }

    #[tokio::test]
    async fn wrong_credentials_fail_handshake() {
        let device = Arc::new(MockKlapDevice::new(
            KlapVersion::V2,
            &Credentials::new("foo", "bar"),
        ));
        let mut transport = transport(
            device,
            KlapVersion::V2,
            Some(Credentials::new("foo", "wrong")),
        );
        let err = transport.send("{}").await.unwrap_err();
        assert!(matches!(err, KasaError::Authentication { .. }), "got {err:?}");
        assert!(err
            .to_string()
            .starts_with("Device response did not match our challenge on ip 127.0.0.1"));
    }

    #[tokio::test]
    async fn default_credentials_are_tried() {
        let device = Arc::new(MockKlapDevice::new(
            KlapVersion::V2,
            &DefaultCredentials::Kasa.credentials(),
        ));
        let mut transport = transport(
            device,
            KlapVersion::V2,
            Some(Credentials::new("foo", "bar")),
        );
        transport.send("{}").await.unwrap();
    }

    #[tokio::test]
    async fn blank_credentials_are_tried() {
        let device = Arc::new(MockKlapDevice::new(KlapVersion::V1, &Credentials::default()));
        let mut transport = transport(device, KlapVersion::V1, None);
        transport.send("{}").await.unwrap();
    }

    #[tokio::test]
    async fn forbidden_request_is_retryable() {
        let creds = Credentials::new("foo", "bar");
        let mut device = MockKlapDevice::new(KlapVersion::V2, &creds);
        device.request_status = 403;
        let mut transport = transport(Arc::new(device), KlapVersion::V2, Some(creds));
        let err = transport.send("{}").await.unwrap_err();
        assert!(matches!(err, KasaError::Retryable { .. }), "got {err:?}");
        assert!(!transport.handshake_done);
    }

    #[tokio::test]
    async fn unexpected_status_is_an_error() {
        let creds = Credentials::new("foo", "bar");
        let mut device = MockKlapDevice::new(KlapVersion::V2, &creds);
        device.request_status = 500;
        let mut transport = transport(Arc::new(device), KlapVersion::V2, Some(creds));
        let err = transport.send("{}").await.unwrap_err();
        assert!(matches!(err, KasaError::Kasa(_)), "got {err:?}");
        assert!(err.to_string().contains("responded with 500 to request with seq"));
    }

    #[tokio::test]
    async fn credentials_hash_roundtrip() {
        let creds = Credentials::new("foo", "bar");
        let device = Arc::new(MockKlapDevice::new(KlapVersion::V2, &creds));
        let hash = transport(device.clone(), KlapVersion::V2, Some(creds))
            .credentials_hash()
            .unwrap();

        let config = DeviceConfig::new("127.0.0.1").with_credentials_hash(Some(hash));
        let mut transport = KlapTransport::with_http_client(&config, KlapVersion::V2, device).unwrap();
        transport.send("{}").await.unwrap();
    }
}
