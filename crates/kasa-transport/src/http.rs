//! HTTP seam used by the AES and KLAP transports.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use kasa_protocol::{KasaError, Result};
use reqwest::header::{HeaderValue, COOKIE, SET_COOKIE};
use reqwest::Client;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum HttpBody {
    Json(Value),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    pub url: &'a str,
    pub body: HttpBody,
    pub headers: &'a [(&'static str, &'static str)],
    pub cookies: &'a HashMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub cookies: HashMap<String, String>,
}

impl HttpResponse {
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn post(&self, request: HttpRequest<'_>) -> Result<HttpResponse>;
}

/// Build an HTTP client tuned for talking to devices on the local network.
fn build_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(1)
        .build()
        .map_err(|e| KasaError::kasa(format!("failed to build HTTP client: {e}")))
}

/// `reqwest`-backed client.
pub struct ReqwestClient {
    host: String,
    http: Client,
}

impl ReqwestClient {
    pub fn new(host: impl Into<String>) -> Result<Self> {
        Ok(Self {
            host: host.into(),
            http: build_http_client()?,
        })
    }

    fn map_error(&self, e: reqwest::Error) -> KasaError {
        if e.is_timeout() {
            KasaError::Timeout(format!(
                "Unable to query the device, timed out: {}: {e}",
                self.host
            ))
        } else if e.is_connect() {
            KasaError::Connection(format!("Device connection error: {}: {e}", self.host))
        } else {
            KasaError::kasa(format!("Unable to query the device: {}: {e}", self.host))
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post(&self, request: HttpRequest<'_>) -> Result<HttpResponse> {
        let mut builder = self.http.post(request.url).timeout(request.timeout);
        for (name, value) in request.headers {
            builder = builder.header(*name, *value);
        }
        if !request.cookies.is_empty() {
            builder = builder.header(COOKIE, cookie_header(request.cookies));
        }
        builder = match request.body {
            HttpBody::Json(value) => builder.json(&value),
            HttpBody::Bytes(bytes) => builder.body(bytes),
        };

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .flat_map(parse_set_cookie)
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(e))?
            .to_vec();

        Ok(HttpResponse {
            status,
            body,
            cookies,
        })
    }
}

fn cookie_header(cookies: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = cookies.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join("; ")
}

/// Standard `Set-Cookie` attributes, never stored as cookies.
const COOKIE_ATTRIBUTES: [&str; 7] = [
    "path", "expires", "max-age", "domain", "httponly", "secure", "samesite",
];

/// Every `name=value` pair in a `Set-Cookie` header. Devices pack the
/// session id and its `TIMEOUT` into one header.
fn parse_set_cookie(header: &HeaderValue) -> Vec<(String, String)> {
    let Ok(text) = header.to_str() else {
        return Vec::new();
    };
    text.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| {
            !name.is_empty() && !COOKIE_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str())
        })
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_set_cookie_keeps_session_timeout() {
        let header = HeaderValue::from_static("TP_SESSIONID=ABCDEF; TIMEOUT=1440; Path=/");
        assert_eq!(
            parse_set_cookie(&header),
            vec![
                ("TP_SESSIONID".to_string(), "ABCDEF".to_string()),
                ("TIMEOUT".to_string(), "1440".to_string()),
            ]
        );
    }

    #[test]
    fn parse_set_cookie_skips_attributes() {
        let header = HeaderValue::from_static(
            "SESSIONID=1; Max-Age=60; Domain=local; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax",
        );
        assert_eq!(
            parse_set_cookie(&header),
            vec![("SESSIONID".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn parse_set_cookie_without_value() {
        let header = HeaderValue::from_static("garbage");
        assert!(parse_set_cookie(&header).is_empty());
    }

    #[test]
    fn cookie_header_is_sorted() {
        let mut cookies = HashMap::new();
        cookies.insert("TP_SESSIONID".to_string(), "abc".to_string());
        cookies.insert("TIMEOUT".to_string(), "86400".to_string());
        assert_eq!(cookie_header(&cookies), "TIMEOUT=86400; TP_SESSIONID=abc");
    }

    #[test]
    fn response_json() {
        let response = HttpResponse {
            status: 200,
            body: br#"{"error_code":0}"#.to_vec(),
            cookies: HashMap::new(),
        };
        assert_eq!(response.json().unwrap()["error_code"], 0);
    }
}
