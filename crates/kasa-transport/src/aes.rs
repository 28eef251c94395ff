//! AES transport for SMART devices.
//!
//! The client sends an RSA public key in a `handshake` request and receives
//! an AES key and IV encrypted with it. Every later request is AES-CBC
//! encrypted and wrapped in a `securePassthrough` envelope. A `login_device`
//! request through the same envelope returns the token appended to the URL
//! of all further requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kasa_protocol::{
    Credentials, DefaultCredentials, DeviceConfig, KasaError, Result, SmartErrorCode,
};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::http::{HttpBody, HttpClient, HttpRequest, ReqwestClient};
use crate::Transport;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const COMMON_HEADERS: &[(&str, &str)] = &[
    ("Content-Type", "application/json"),
    ("requestByApp", "true"),
    ("Accept", "application/json"),
];

const SESSION_COOKIE_NAME: &str = "TP_SESSIONID";
const TIMEOUT_COOKIE_NAME: &str = "TIMEOUT";
const ONE_DAY_SECONDS: u64 = 86_400;
const SESSION_EXPIRE_BUFFER_SECONDS: u64 = 60 * 20;
const BACKOFF_AFTER_LOGIN_ERROR: Duration = Duration::from_secs(1);

/// Milliseconds since the epoch, as sent in `request_time_milis`.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub(crate) fn sha1_hex(data: &[u8]) -> String {
    Sha1::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Login parameters for `login_device`.
///
/// Version 2 sends a hashed password as `password2`; version 1 sends the
/// plain password base64 encoded.
pub fn login_params(credentials: &Credentials, login_version: Option<u32>) -> Value {
    let username = BASE64.encode(sha1_hex(credentials.username.as_bytes()));
    if login_version == Some(2) {
        json!({
            "password2": BASE64.encode(sha1_hex(credentials.password.as_bytes())),
            "username": username,
        })
    } else {
        json!({
            "password": BASE64.encode(credentials.password.as_bytes()),
            "username": username,
        })
    }
}

/// RSA key pair offered to the device during the handshake.
pub struct KeyPair {
    private_key: RsaPrivateKey,
    public_pem: String,
}

impl KeyPair {
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024)
            .map_err(|e| KasaError::kasa(format!("Unable to generate key pair: {e}")))?;
        let public_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KasaError::kasa(format!("Unable to encode public key: {e}")))?;
        Ok(Self {
            private_key,
            public_pem,
        })
    }

    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.private_key
            .decrypt(Pkcs1v15Encrypt, data)
            .map_err(|e| KasaError::kasa(format!("Unable to decrypt handshake key: {e}")))
    }
}

/// AES-128-CBC session negotiated during the handshake.
#[derive(Clone)]
pub struct AesEncryptionSession {
    key: [u8; 16],
    iv: [u8; 16],
}

impl AesEncryptionSession {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Split 32 bytes into key and IV.
    pub fn from_key_and_iv(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(KasaError::kasa(format!(
                "Expected 32 bytes of key material, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&bytes[..16]);
        iv.copy_from_slice(&bytes[16..]);
        Ok(Self::new(key, iv))
    }

    /// Decode the base64 key from a handshake reply with our private key.
    pub fn create_from_keypair(handshake_key: &str, key_pair: &KeyPair) -> Result<Self> {
        let encrypted = BASE64
            .decode(handshake_key)
            .map_err(|e| KasaError::kasa(format!("Invalid handshake key: {e}")))?;
        Self::from_key_and_iv(&key_pair.decrypt(&encrypted)?)
    }

    /// Encrypt and base64 encode.
    pub fn encrypt(&self, data: &[u8]) -> String {
        let ciphertext =
            Aes128CbcEnc::new(&self.key.into(), &self.iv.into()).encrypt_padded_vec_mut::<Pkcs7>(data);
        BASE64.encode(ciphertext)
    }

    pub fn decrypt(&self, data: &str) -> Result<String> {
        let ciphertext = BASE64
            .decode(data)
            .map_err(|e| KasaError::kasa(e.to_string()))?;
        let plaintext = Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| KasaError::kasa(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| KasaError::kasa(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    HandshakeRequired,
    LoginRequired,
    Established,
}

pub struct AesTransport {
    host: String,
    app_url: String,
    timeout: Duration,
    http: Arc<dyn HttpClient>,
    login_version: Option<u32>,
    login_params: Value,
    default_credentials: Option<Credentials>,
    state: TransportState,
    key_pair: Option<Arc<KeyPair>>,
    session: Option<AesEncryptionSession>,
    session_expire_at: Option<Instant>,
    session_cookie: HashMap<String, String>,
    token_url: Option<String>,
    backoff: Duration,
}

impl AesTransport {
    pub const DEFAULT_PORT: u16 = 80;

    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let http = Arc::new(ReqwestClient::new(&config.host)?);
        Self::with_http_client(config, http)
    }

    pub fn with_http_client(config: &DeviceConfig, http: Arc<dyn HttpClient>) -> Result<Self> {
        let login_version = config.connection_type.login_version;
        let login_params = match &config.credentials_hash {
            Some(hash) => {
                let decoded = BASE64
                    .decode(hash)
                    .map_err(|e| KasaError::kasa(format!("Invalid credentials hash: {e}")))?;
                serde_json::from_slice(&decoded)?
            }
            None => login_params(
                &config.credentials.clone().unwrap_or_default(),
                login_version,
            ),
        };
        let port = config.port_override.unwrap_or(Self::DEFAULT_PORT);

        Ok(Self {
            host: config.host.clone(),
            app_url: format!("http://{}:{port}/app", config.host),
            timeout: config.timeout_duration(),
            http,
            login_version,
            login_params,
            default_credentials: None,
            state: TransportState::HandshakeRequired,
            key_pair: None,
            session: None,
            session_expire_at: None,
            session_cookie: HashMap::new(),
            token_url: None,
            backoff: BACKOFF_AFTER_LOGIN_ERROR,
        })
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn app_url(&self) -> &str {
        &self.app_url
    }

    fn handle_response_error_code(&mut self, response: &Value, message: &str) -> Result<()> {
        let code = SmartErrorCode::from_response(response);
        if code == SmartErrorCode::Success {
            return Ok(());
        }
        if code.is_authentication() {
            self.state = TransportState::HandshakeRequired;
        }
        Err(KasaError::from_smart_code(
            format!("{message}: {}: {code}", self.host),
            code,
        ))
    }

    fn handshake_session_expired(&self) -> bool {
        self.session_expire_at
            .map_or(true, |expire_at| Instant::now() >= expire_at)
    }

    async fn key_pair(&mut self) -> Result<Arc<KeyPair>> {
        if let Some(key_pair) = &self.key_pair {
            return Ok(key_pair.clone());
        }
        let key_pair = tokio::task::spawn_blocking(KeyPair::generate)
            .await
            .map_err(|e| KasaError::kasa(format!("Key generation failed: {e}")))??;
        let key_pair = Arc::new(key_pair);
        self.key_pair = Some(key_pair.clone());
        Ok(key_pair)
    }

    pub async fn perform_handshake(&mut self) -> Result<()> {
        debug!("Will perform handshaking with {}", self.host);
        self.token_url = None;
        self.session_expire_at = None;
        self.session_cookie.clear();

        let key_pair = self.key_pair().await?;
        let body = json!({
            "method": "handshake",
            "params": {"key": key_pair.public_pem()},
            "request_time_milis": now_millis(),
        });
        let no_cookies = HashMap::new();
        let response = self
            .http
            .post(HttpRequest {
                url: &self.app_url,
                body: HttpBody::Json(body),
                headers: COMMON_HEADERS,
                cookies: &no_cookies,
                timeout: self.timeout,
            })
            .await?;

        if response.status != 200 {
            return Err(KasaError::kasa(format!(
                "{} responded with an unexpected status code {} to handshake",
                self.host, response.status
            )));
        }
        let resp = response.json()?;
        self.handle_response_error_code(&resp, "Unable to complete handshake")?;
        let handshake_key = resp["result"]["key"].as_str().ok_or_else(|| {
            KasaError::kasa(format!("No key in handshake response from {}", self.host))
        })?;

        if let Some(cookie) = response
            .cookies
            .get(SESSION_COOKIE_NAME)
            .or_else(|| response.cookies.get("SESSIONID"))
        {
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
        self.session = Some(AesEncryptionSession::create_from_keypair(
            handshake_key,
            &key_pair,
        )?);
        self.state = TransportState::LoginRequired;
        debug!("Handshake with {} complete", self.host);
        Ok(())
    }

    async fn try_login(&mut self, params: Value) -> Result<()> {
        let request = json!({
            "method": "login_device",
            "params": params,
            "request_time_milis": now_millis(),
        });
        let resp = self.send_secure_passthrough(&request.to_string()).await?;
        self.handle_response_error_code(&resp, "Error logging in")?;
        let token = resp["result"]["token"].as_str().ok_or_else(|| {
            KasaError::kasa(format!("No token in login response from {}", self.host))
        })?;
        self.token_url = Some(format!("{}?token={token}", self.app_url));
        self.state = TransportState::Established;
        Ok(())
    }

    /// Log in, falling back once to the factory default credentials when the
    /// device rejects ours with `LOGIN_ERROR`.
    pub async fn perform_login(&mut self) -> Result<()> {
        let err = match self.try_login(self.login_params.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        if !matches!(err, KasaError::Authentication { .. })
            || err.error_code() != Some(SmartErrorCode::LoginError)
        {
            return Err(err);
        }

        match self.login_with_default_credentials().await {
            Ok(()) => {
                debug!("{}: logged in with default credentials", self.host);
                Ok(())
            }
            Err(
                e @ (KasaError::Authentication { .. }
                | KasaError::Connection(_)
                | KasaError::Timeout(_)),
            ) => Err(e),
            Err(e) => Err(KasaError::kasa(format!(
                "Unable to login and trying default login raised another exception: {e}"
            ))),
        }
    }

    async fn login_with_default_credentials(&mut self) -> Result<()> {
        let credentials = match &self.default_credentials {
            Some(credentials) => credentials.clone(),
            None => {
                let credentials = DefaultCredentials::Tapo.credentials();
                self.default_credentials = Some(credentials.clone());
                tokio::time::sleep(self.backoff).await;
                credentials
            }
        };
        self.perform_handshake().await?;
        self.try_login(login_params(&credentials, self.login_version))
            .await
    }

    async fn send_secure_passthrough(&mut self, request: &str) -> Result<Value> {
        let session = self
            .session
            .clone()
            .ok_or_else(|| KasaError::kasa(format!("No encryption session for {}", self.host)))?;
        let url = self.token_url.as_deref().unwrap_or(&self.app_url).to_string();
        let body = json!({
            "method": "securePassthrough",
            "params": {"request": session.encrypt(request.as_bytes())},
        });
        let response = self
            .http
            .post(HttpRequest {
                url: &url,
                body: HttpBody::Json(body),
                headers: COMMON_HEADERS,
                cookies: &self.session_cookie,
                timeout: self.timeout,
            })
            .await?;

        if response.status != 200 {
            return Err(KasaError::kasa(format!(
                "{} responded with an unexpected status code {} to passthrough",
                self.host, response.status
            )));
        }
        let resp = response.json()?;
        self.handle_response_error_code(&resp, "Error sending secure_passthrough message")?;

        let raw = resp["result"]["response"].as_str().ok_or_else(|| {
            KasaError::kasa(format!("No response in passthrough reply from {}", self.host))
        })?;
        let decrypted = session
            .decrypt(raw)
            .and_then(|plain| Ok(serde_json::from_str::<Value>(&plain)?));
        match decrypted {
            Ok(value) => Ok(value),
            Err(e) => match serde_json::from_str::<Value>(raw) {
                Ok(value) => {
                    debug!(
                        "Received unencrypted response over secure passthrough from {}",
                        self.host
                    );
                    Ok(value)
                }
                Err(_) => Err(KasaError::kasa(format!(
                    "Unable to decrypt response from {}, error: {e}, response: {raw}",
                    self.host
                ))),
            },
        }
    }
}

#[async_trait]
impl Transport for AesTransport {
    fn default_port(&self) -> u16 {
        Self::DEFAULT_PORT
    }

    fn credentials_hash(&self) -> Option<String> {
        Some(BASE64.encode(self.login_params.to_string()))
    }

    async fn send(&mut self, request: &str) -> Result<Value> {
        if self.state == TransportState::HandshakeRequired || self.handshake_session_expired() {
            self.perform_handshake().await?;
        }
        if self.state != TransportState::Established {
            if let Err(e) = self.perform_login().await {
                if matches!(e, KasaError::Authentication { .. }) {
                    self.state = TransportState::HandshakeRequired;
                }
                return Err(e);
            }
        }
        self.send_secure_passthrough(request).await
    }

    async fn close(&mut self) -> Result<()> {
        self.reset().await
    }

    async fn reset(&mut self) -> Result<()> {
        self.state = TransportState::HandshakeRequired;
        self.session = None;
        self.session_expire_at = None;
        self.session_cookie.clear();
        self.token_url = None;
        Ok(())
    }
}
