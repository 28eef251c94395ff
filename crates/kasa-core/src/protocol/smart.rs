//! Protocol for SMART (Tapo-style) devices.
//!
//! Requests are maps of method name to params. A map with one entry is sent
//! as a plain request; larger maps are split into `multipleRequest` batches.
//! Responses map each method to either its result or the error code the
//! device returned for it, so one failing method does not sink the rest.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kasa_protocol::{DeviceConfig, KasaError, Result, SmartErrorCode};
use kasa_transport::Transport;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::snowflake::SnowflakeId;
use super::{RetryAction, DEFAULT_RETRY_COUNT, RETRY_BACKOFF};

pub const DEFAULT_MULTI_REQUEST_BATCH_SIZE: usize = 5;

const MULTI_REQUEST_METHOD: &str = "multipleRequest";

pub type SmartRequest = Map<String, Value>;
pub type MethodResult = std::result::Result<Value, SmartErrorCode>;
pub type SmartResponse = BTreeMap<String, MethodResult>;

/// Build a request from `(method, params)` pairs.
pub fn smart_request<'a>(methods: impl IntoIterator<Item = (&'a str, Value)>) -> SmartRequest {
    methods
        .into_iter()
        .map(|(method, params)| (method.to_string(), params))
        .collect()
}

/// Anything a SMART device can be queried through.
#[async_trait]
pub trait SmartQuery: Send + Sync {
    fn host(&self) -> &str;

    async fn query(&self, request: SmartRequest) -> Result<SmartResponse>;

    async fn credentials_hash(&self) -> Option<String>;

    async fn close(&self) -> Result<()>;
}

struct Session {
    transport: Box<dyn Transport>,
    ids: SnowflakeId,
}

pub struct SmartProtocol {
    config: DeviceConfig,
    port: u16,
    session: Mutex<Session>,
    terminal_uuid: String,
    batch_size: AtomicUsize,
    backoff: Duration,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn method_result(response: &Value) -> MethodResult {
    match SmartErrorCode::from_response(response) {
        SmartErrorCode::Success => Ok(response.get("result").cloned().unwrap_or(Value::Null)),
        code => Err(code),
    }
}

impl SmartProtocol {
    pub fn new(config: DeviceConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let port = config.port_override.unwrap_or(transport.default_port());
        let batch_size = config
            .batch_size
            .unwrap_or(DEFAULT_MULTI_REQUEST_BATCH_SIZE)
            .max(1);
        Ok(Self {
            port,
            session: Mutex::new(Session {
                transport,
                ids: SnowflakeId::new(1, 1)?,
            }),
            terminal_uuid: BASE64.encode(md5::compute(Uuid::new_v4().as_bytes()).0),
            batch_size: AtomicUsize::new(batch_size),
            backoff: RETRY_BACKOFF,
            config,
        })
    }

    /// Override the delay between retries.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    fn envelope(&self, ids: &mut SnowflakeId, method: &str, params: &Value) -> Result<String> {
        let mut request = json!({
            "method": method,
            "requestID": ids.generate_id()?,
            "request_time_milis": now_millis(),
            "terminal_uuid": self.terminal_uuid,
        });
        if !params.is_null() {
            request["params"] = params.clone();
        }
        Ok(serde_json::to_string(&request)?)
    }

    fn check_response(&self, response: &Value, method: &str) -> Result<()> {
        match SmartErrorCode::from_response(response) {
            SmartErrorCode::Success => Ok(()),
            code => Err(KasaError::from_smart_code(
                format!(
                    "Error querying device: {}: {code} for method: {method}",
                    self.config.host
                ),
                code,
            )),
        }
    }

    async fn send(&self, session: &mut Session, method: &str, params: &Value) -> Result<Value> {
        let request = self.envelope(&mut session.ids, method, params)?;
        debug!("{} >> {request}", self.config.host);
        let response = session.transport.send(&request).await?;
        debug!("{} << {response}", self.config.host);
        Ok(response)
    }

    /// Fetch the remaining pages of a list result that reports a `sum`.
    async fn complete_pages(&self, session: &mut Session, method: &str, result: &mut Value) -> Result<()> {
        let Some(sum) = result.get("sum").and_then(Value::as_u64) else {
            return Ok(());
        };
        if result.get("start_index").is_none() {
            return Ok(());
        }
        let Some(list_name) = result
            .as_object()
            .and_then(|fields| fields.iter().find(|(_, v)| v.is_array()))
            .map(|(name, _)| name.clone())
        else {
            return Ok(());
        };

        loop {
            let length = result[list_name.as_str()].as_array().map_or(0, Vec::len);
            if length as u64 >= sum {
                break;
            }
            let response = self
                .send(session, method, &json!({"start_index": length}))
                .await?;
            self.check_response(&response, method)?;
            let next = response["result"][list_name.as_str()]
                .as_array()
                .cloned()
                .unwrap_or_default();
            if next.is_empty() {
                break;
            }
            if let Some(list) = result[list_name.as_str()].as_array_mut() {
                list.extend(next);
            }
        }
        Ok(())
    }

    async fn execute_single(
        &self,
        session: &mut Session,
        method: &str,
        params: &Value,
    ) -> Result<SmartResponse> {
        let response = self.send(session, method, params).await?;
        self.check_response(&response, method)?;
        // Setters reply without a result.
        let mut result = response.get("result").cloned().unwrap_or(Value::Null);
        self.complete_pages(session, method, &mut result).await?;
        Ok(SmartResponse::from([(method.to_string(), Ok(result))]))
    }

    async fn execute_multiple(
        &self,
        session: &mut Session,
        requests: &SmartRequest,
    ) -> Result<SmartResponse> {
        let entries: Vec<Value> = requests
            .iter()
            .map(|(method, params)| {
                if params.is_null() {
                    json!({"method": method})
                } else {
                    json!({"method": method, "params": params})
                }
            })
            .collect();

        let mut results = SmartResponse::new();
        for batch in entries.chunks(self.batch_size().max(1)) {
            let response = self
                .send(session, MULTI_REQUEST_METHOD, &json!({"requests": batch}))
                .await?;
            if let Err(e) = self.check_response(&response, MULTI_REQUEST_METHOD) {
                if matches!(
                    e.error_code(),
                    Some(SmartErrorCode::JsonDecodeFailError | SmartErrorCode::InternalUnknownError)
                ) {
                    self.batch_size.store(1, Ordering::Relaxed);
                    return Err(KasaError::retryable(
                        "JSON Decode failure, multi requests disabled",
                    ));
                }
                return Err(e);
            }

            let responses = response["result"]["responses"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            for item in responses {
                let Some(method) = item["method"].as_str() else {
                    continue;
                };
                let mut result = method_result(&item);
                match &mut result {
                    Ok(value) => self.complete_pages(session, method, value).await?,
                    Err(code) => debug!(
                        "Error {code} getting request {method} for device {}",
                        self.config.host
                    ),
                }
                results.insert(method.to_string(), result);
            }
        }

        // A batch stops at the first failing method; fetch the rest one by one.
        for (method, params) in requests {
            if results.contains_key(method) {
                continue;
            }
            debug!("{method} missing from batch response, querying it alone");
            let response = self.send(session, method, params).await?;
            results.insert(method.clone(), method_result(&response));
        }
        Ok(results)
    }

    async fn execute_query(&self, session: &mut Session, request: &SmartRequest) -> Result<SmartResponse> {
        match request.iter().next() {
            Some((method, params)) if request.len() == 1 => {
                self.execute_single(session, method, params).await
            }
            _ => self.execute_multiple(session, request).await,
        }
    }

    pub async fn query_with_retries(
        &self,
        request: SmartRequest,
        retry_count: usize,
    ) -> Result<SmartResponse> {
        let mut session = self.session.lock().await;

        let mut retry = 0;
        loop {
            let error = match self.execute_query(&mut session, &request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if let Err(e) = session.transport.reset().await {
                debug!("{}: unable to reset transport: {e}", self.config.host);
            }
            if retry >= retry_count {
                debug!("Giving up on {} after {retry} retries", self.config.host);
                return Err(error);
            }
            match RetryAction::for_error(&error) {
                RetryAction::Immediately => {
                    debug!("Device {} got a connection error, will retry: {error}", self.config.host);
                }
                RetryAction::AfterBackoff => {
                    debug!("Device {} got a retryable error, will retry: {error}", self.config.host);
                    tokio::time::sleep(self.backoff).await;
                }
                RetryAction::Raise => {
                    debug!("Unable to query the device {}: {error}", self.config.host);
                    return Err(error);
                }
            }
            retry += 1;
        }
    }
}

#[async_trait]
impl SmartQuery for SmartProtocol {
    fn host(&self) -> &str {
        &self.config.host
    }

    async fn query(&self, request: SmartRequest) -> Result<SmartResponse> {
        self.query_with_retries(request, DEFAULT_RETRY_COUNT).await
    }

    async fn credentials_hash(&self) -> Option<String> {
        self.session.lock().await.transport.credentials_hash()
    }

    async fn close(&self) -> Result<()> {
        self.session.lock().await.transport.close().await
    }
}

/// Routes requests to a child device through its parent's connection.
pub struct ChildProtocol {
    device_id: String,
    parent: Arc<dyn SmartQuery>,
}

impl ChildProtocol {
    pub fn new(device_id: impl Into<String>, parent: Arc<dyn SmartQuery>) -> Self {
        Self {
            device_id: device_id.into(),
            parent,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn error(&self, context: &str, code: SmartErrorCode) -> KasaError {
        KasaError::from_smart_code(
            format!(
                "Error querying device: {}: {code} for method: {context}",
                self.parent.host()
            ),
            code,
        )
    }
}

#[async_trait]
impl SmartQuery for ChildProtocol {
    fn host(&self) -> &str {
        self.parent.host()
    }

    async fn query(&self, request: SmartRequest) -> Result<SmartResponse> {
        let (method, params) = match request.iter().next() {
            Some((method, params)) if request.len() == 1 => (method.clone(), params.clone()),
            _ => {
                let requests: Vec<Value> = request
                    .iter()
                    .map(|(method, params)| json!({"method": method, "params": params}))
                    .collect();
                (MULTI_REQUEST_METHOD.to_string(), json!({"requests": requests}))
            }
        };

        let wrapped = smart_request([(
            "control_child",
            json!({
                "device_id": self.device_id,
                "requestData": {"method": method, "params": params},
            }),
        )]);
        let mut response = self.parent.query(wrapped).await?;
        let result = match response.remove("control_child") {
            Some(Ok(result)) => result,
            Some(Err(code)) => return Err(self.error("control_child", code)),
            None => {
                return Err(KasaError::kasa(format!(
                    "control_child not found in response for device {}",
                    self.parent.host()
                )))
            }
        };

        let data = &result["responseData"];
        match SmartErrorCode::from_response(data) {
            SmartErrorCode::Success => {}
            code => return Err(self.error(&method, code)),
        }
        let inner = data.get("result").cloned().unwrap_or(Value::Null);

        if method != MULTI_REQUEST_METHOD {
            return Ok(SmartResponse::from([(method, Ok(inner))]));
        }
        let mut results = SmartResponse::new();
        for item in inner["responses"].as_array().into_iter().flatten() {
            if let Some(method) = item["method"].as_str() {
                results.insert(method.to_string(), method_result(item));
            }
        }
        Ok(results)
    }

    async fn credentials_hash(&self) -> Option<String> {
        self.parent.credentials_hash().await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasa_transport::fake::fixtures;
    use kasa_transport::mock::fixtures as scripts;
    use kasa_transport::{FakeSmartTransport, MockTransport};

    fn protocol(transport: impl Transport + 'static) -> SmartProtocol {
        SmartProtocol::new(DeviceConfig::new("127.0.0.123"), Box::new(transport))
            .unwrap()
            .with_backoff(Duration::ZERO)
    }

    fn methods(names: &[&str]) -> SmartRequest {
        smart_request(names.iter().map(|name| (*name, Value::Null)))
    }

    #[tokio::test]
    async fn single_request_envelope() {
        let transport = MockTransport::new(scripts::replies(vec![
            json!({"error_code": 0, "result": {"nickname": "eA=="}}),
        ]));
        let handle = transport.handle();
        let protocol = protocol(transport);

        let response = protocol.query(methods(&["get_device_info"])).await.unwrap();
        assert_eq!(
            response["get_device_info"],
            Ok(json!({"nickname": "eA=="}))
        );

        let sent = &handle.json_requests()[0];
        assert_eq!(sent["method"], "get_device_info");
        assert!(sent.get("params").is_none());
        assert!(sent["requestID"].as_u64().is_some());
        assert!(sent["request_time_milis"].as_u64().is_some());
        assert_eq!(
            BASE64.decode(sent["terminal_uuid"].as_str().unwrap()).unwrap().len(),
            16
        );
    }

    #[tokio::test]
    async fn single_request_error_raises_without_retry() {
        let transport = MockTransport::new(scripts::replies(vec![json!({"error_code": -1008})]));
        let handle = transport.handle();
        let protocol = protocol(transport);

        let err = protocol.query(methods(&["get_device_info"])).await.unwrap_err();
        assert_eq!(err.error_code(), Some(SmartErrorCode::ParamsError));
        assert_eq!(
            err.to_string(),
            "Error querying device: 127.0.0.123: PARAMS_ERROR(-1008) for method: get_device_info"
        );
        assert_eq!(handle.send_count(), 1);
    }

    #[tokio::test]
    async fn retryable_code_is_retried() {
        let transport = MockTransport::new(scripts::replies(vec![
            json!({"error_code": -1001}),
            json!({"error_code": 0, "result": {}}),
        ]));
        let handle = transport.handle();
        let protocol = protocol(transport);

        assert!(protocol.query(methods(&["get_device_info"])).await.is_ok());
        assert_eq!(handle.send_count(), 2);
        assert_eq!(handle.reset_count(), 1);
    }

    #[tokio::test]
    async fn multiple_requests_are_batched() {
        let fake = FakeSmartTransport::new(fixtures::smart_plug());
        let log = fake.log();
        let protocol = protocol(fake);

        let request = methods(&[
            "get_device_info",
            "get_device_time",
            "get_device_usage",
            "get_energy_usage",
            "get_current_power",
            "get_auto_off_config",
            "get_connect_cloud_state",
        ]);
        let response = protocol.query(request).await.unwrap();
        assert_eq!(response.len(), 7);
        assert!(response.values().all(|r| r.is_ok()));

        let sent = log.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["params"]["requests"].as_array().unwrap().len(), 5);
        assert_eq!(sent[1]["params"]["requests"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn per_method_errors_are_kept() {
        let fake = FakeSmartTransport::new(fixtures::smart_plug())
            .with_method_error("get_device_usage", SmartErrorCode::ParamsError);
        let protocol = protocol(fake);

        let response = protocol
            .query(methods(&["get_device_info", "get_device_usage", "get_nothing"]))
            .await
            .unwrap();
        assert!(response["get_device_info"].is_ok());
        assert_eq!(response["get_device_usage"], Err(SmartErrorCode::ParamsError));
        assert_eq!(response["get_nothing"], Err(SmartErrorCode::UnknownMethodError));
    }

    #[tokio::test]
    async fn methods_missing_from_batch_are_requeried() {
        let fake = FakeSmartTransport::new(fixtures::smart_plug())
            .without_batch_response("get_device_time");
        let log = fake.log();
        let protocol = protocol(fake);

        let response = protocol
            .query(methods(&["get_device_info", "get_device_time"]))
            .await
            .unwrap();
        assert!(response["get_device_time"].is_ok());

        let sent = log.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["method"], "get_device_time");
    }

    #[tokio::test]
    async fn json_decode_failure_disables_batching() {
        let fake = FakeSmartTransport::new(fixtures::smart_plug())
            .with_batch_error(SmartErrorCode::JsonDecodeFailError);
        let log = fake.log();
        let protocol = protocol(fake);

        let response = protocol
            .query(methods(&["get_device_info", "get_device_time"]))
            .await
            .unwrap();
        assert_eq!(response.len(), 2);
        assert_eq!(protocol.batch_size(), 1);

        // One failed batch, then one batch per method.
        let sent = log.requests();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2]["params"]["requests"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_pages_are_completed() {
        let fake = FakeSmartTransport::new(fixtures::smart_strip()).with_page_size(1);
        let log = fake.log();
        let protocol = protocol(fake);

        let response = protocol
            .query(smart_request([("get_child_device_list", json!({"start_index": 0}))]))
            .await
            .unwrap();
        let children = response["get_child_device_list"].as_ref().unwrap();
        assert_eq!(children["child_device_list"].as_array().unwrap().len(), 3);
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn child_protocol_wraps_requests() {
        let fake = FakeSmartTransport::new(fixtures::smart_strip());
        let log = fake.log();
        let parent: Arc<dyn SmartQuery> = Arc::new(protocol(fake));
        let device_id = "802400000000000000000000000000000000000C01";
        let child = ChildProtocol::new(device_id, parent);

        let response = child.query(methods(&["get_device_info"])).await.unwrap();
        let info = response["get_device_info"].as_ref().unwrap();
        assert_eq!(info["device_id"], device_id);

        let sent = log.last().unwrap();
        assert_eq!(sent["method"], "control_child");
        assert_eq!(sent["params"]["device_id"], device_id);
        assert_eq!(sent["params"]["requestData"]["method"], "get_device_info");
    }

    #[tokio::test]
    async fn child_protocol_unwraps_multiple_responses() {
        let fake = FakeSmartTransport::new(fixtures::smart_strip());
        let parent: Arc<dyn SmartQuery> = Arc::new(protocol(fake));
        let child = ChildProtocol::new("802400000000000000000000000000000000000C00", parent);

        let response = child
            .query(methods(&["get_device_info", "get_auto_off_config"]))
            .await
            .unwrap();
        assert!(response["get_device_info"].is_ok());
        assert_eq!(
            response["get_auto_off_config"],
            Err(SmartErrorCode::UnknownMethodError)
        );
    }
}
