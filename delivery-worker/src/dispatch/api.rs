//! API channel: upload the CSV export to a buyer-configured HTTP endpoint.
//!
//! The method's `config` JSON describes the endpoint:
//!
//! ```json
//! {
//!   "url": "https://buyer.example.com/leads",
//!   "method": "POST",
//!   "auth_type": "bearer",
//!   "bearer_token": "…",
//!   "headers": { "X-Source": "leadship" },
//!   "timeout_sec": 30
//! }
//! ```
//!
//! The body is `multipart/form-data` with `job_id`, `buyer_id`, `tenant_id`
//! and the CSV as the `file` part. Custom headers are applied after
//! authentication and win on conflict.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::Delivery;
use crate::error::DeliveryError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    Bearer,
    Basic,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiDeliveryConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, deserialize_with = "auth_type")]
    pub auth_type: Option<AuthType>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub auth_header: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub basic_user: Option<String>,
    #[serde(default)]
    pub basic_pass: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_sec: Option<i64>,
}

/// Empty string means no auth; anything else must be a known scheme.
fn auth_type<'de, D>(deserializer: D) -> Result<Option<AuthType>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::IntoDeserializer;

    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => {
            let value: serde::de::value::StrDeserializer<'_, D::Error> = value.into_deserializer();
            AuthType::deserialize(value).map(Some)
        }
    }
}

impl ApiDeliveryConfig {
    pub fn from_json(config: &serde_json::Value) -> Result<Self, DeliveryError> {
        serde_json::from_value(config.clone())
            .map_err(|e| DeliveryError::Permanent(format!("invalid api config: {e}")))
    }

    fn http_method(&self) -> Result<Method, DeliveryError> {
        let name = self
            .method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("POST")
            .to_ascii_uppercase();
        Method::from_bytes(name.as_bytes())
            .map_err(|_| DeliveryError::Permanent(format!("invalid api method: {name}")))
    }

    fn endpoint(&self) -> Result<Url, DeliveryError> {
        if self.url.trim().is_empty() {
            return Err(DeliveryError::Permanent(
                "api method missing url config".to_string(),
            ));
        }
        let url = Url::parse(self.url.trim())
            .map_err(|e| DeliveryError::Permanent(format!("invalid api url: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(DeliveryError::Permanent(format!(
                "unsupported api url scheme: {scheme}"
            ))),
        }
    }

    fn timeout(&self) -> Duration {
        match self.timeout_sec {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    fn custom_headers(&self) -> Result<HeaderMap, DeliveryError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| DeliveryError::Permanent(format!("invalid api header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| DeliveryError::Permanent(format!("invalid value for api header {name}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

fn truncated(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[derive(Debug, Clone)]
pub struct ApiChannel {
    client: Client,
}

impl ApiChannel {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn deliver(&self, delivery: &Delivery<'_>) -> Result<(), DeliveryError> {
        let job = delivery.job;
        let config = ApiDeliveryConfig::from_json(&delivery.method.config)?;
        let url = config.endpoint()?;
        let method = config.http_method()?;
        let headers = config.custom_headers()?;
        let host = url.host_str().unwrap_or_default().to_string();

        let timeout = config.timeout().min(delivery.time_limit);

        let file = Part::bytes(delivery.render_csv()?)
            .file_name(delivery.filename.clone())
            .mime_str("text/csv")
            .map_err(|e| DeliveryError::Permanent(format!("invalid api file part: {e}")))?;
        let form = Form::new()
            .text("job_id", job.id.to_string())
            .text("buyer_id", job.buyer_id.to_string())
            .text("tenant_id", job.tenant_id.to_string())
            .part("file", file);

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(timeout)
            .multipart(form);

        request = match config.auth_type {
            Some(AuthType::ApiKey) => {
                let header = config
                    .auth_header
                    .as_deref()
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .unwrap_or(DEFAULT_API_KEY_HEADER);
                let name = HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
                    DeliveryError::Permanent(format!("invalid api auth header: {header}"))
                })?;
                let value = HeaderValue::from_str(config.api_key.as_deref().unwrap_or_default())
                    .map_err(|_| DeliveryError::Permanent("invalid api key".to_string()))?;
                request.header(name, value)
            }
            Some(AuthType::Bearer) => {
                request.bearer_auth(config.bearer_token.as_deref().unwrap_or_default())
            }
            Some(AuthType::Basic) => request.basic_auth(
                config.basic_user.as_deref().unwrap_or_default(),
                Some(config.basic_pass.as_deref().unwrap_or_default()),
            ),
            None => request,
        };
        request = request.headers(headers);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(DeliveryError::Permanent(format!("api request invalid: {e}")));
            }
            Err(e) => {
                warn!(job_id = %job.id, host = %host, error = %e, "api_delivery_failed");
                return Err(DeliveryError::Transient(format!("api request failed: {e}")));
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(
                job_id = %job.id,
                host = %host,
                method = %method,
                status_code = status.as_u16(),
                "api_delivery_succeeded"
            );
            return Ok(());
        }

        let body = truncated(response.text().await.unwrap_or_default());
        warn!(
            job_id = %job.id,
            host = %host,
            status_code = status.as_u16(),
            "api_delivery_failed"
        );
        let message = format!("api returned status {}: {}", status.as_u16(), body);
        if status.is_client_error() {
            Err(DeliveryError::Permanent(message))
        } else {
            Err(DeliveryError::Transient(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeliveryJob, DeliveryMethod, JobStatus};
    use crate::payload::{decode_payload, DecodedPayload};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job() -> DeliveryJob {
        DeliveryJob {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            campaign_id: None,
            buyer_id: Uuid::new_v4(),
            delivery_method_id: Uuid::new_v4(),
            delivery_id: None,
            payload: Vec::new(),
            status: JobStatus::Pending,
            attempts: 1,
            last_error: None,
            due_at: Utc::now(),
            lease_token: Some(Uuid::new_v4()),
        }
    }

    fn api_method(config: serde_json::Value) -> DeliveryMethod {
        DeliveryMethod {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            method_type: "api".to_string(),
            config,
            active: true,
        }
    }

    fn payload() -> DecodedPayload {
        decode_payload(br#"{"leads":[{"FullName":"Jane"}]}"#).unwrap()
    }

    async fn deliver(config: serde_json::Value) -> Result<(), DeliveryError> {
        deliver_within(config, Duration::from_secs(60)).await
    }

    async fn deliver_within(
        config: serde_json::Value,
        time_limit: Duration,
    ) -> Result<(), DeliveryError> {
        let (job, method, payload) = (job(), api_method(config), payload());
        ApiChannel::new(Client::new())
            .deliver(&Delivery {
                job: &job,
                method: &method,
                payload: &payload,
                filename: "leads_20240101_000000.csv".to_string(),
                sent_at: Utc::now(),
                time_limit,
            })
            .await
    }

    #[test]
    fn test_config_defaults() {
        let config = ApiDeliveryConfig::from_json(&json!({"url": "https://x.test"})).unwrap();
        assert_eq!(config.http_method().unwrap(), Method::POST);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.auth_type, None);

        let config = ApiDeliveryConfig::from_json(&json!({
            "url": "https://x.test", "method": "put", "timeout_sec": -5, "auth_type": ""
        }))
        .unwrap();
        assert_eq!(config.http_method().unwrap(), Method::PUT);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.auth_type, None);
    }

    #[test]
    fn test_unknown_auth_type_is_rejected() {
        let result = ApiDeliveryConfig::from_json(&json!({"url": "https://x.test", "auth_type": "oauth"}));
        assert!(matches!(result, Err(DeliveryError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_missing_or_invalid_url_is_permanent() {
        assert!(matches!(deliver(json!({})).await, Err(DeliveryError::Permanent(_))));
        assert!(matches!(
            deliver(json!({"url": "not a url"})).await,
            Err(DeliveryError::Permanent(_))
        ));
        assert!(matches!(
            deliver(json!({"url": "ftp://x.test/leads"})).await,
            Err(DeliveryError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn test_bearer_upload_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/leads"))
            .and(header("authorization", "Bearer tok"))
            .and(body_string_contains("name=\"job_id\""))
            .and(body_string_contains("name=\"tenant_id\""))
            .and(body_string_contains("filename=\"leads_20240101_000000.csv\""))
            .and(body_string_contains("Email,First Name"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        deliver(json!({
            "url": format!("{}/leads", server.uri()),
            "auth_type": "bearer",
            "bearer_token": "tok"
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_api_key_uses_default_header() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        deliver(json!({
            "url": server.uri(),
            "method": "PUT",
            "auth_type": "api_key",
            "api_key": "secret"
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_api_key_uses_configured_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-buyer-key", "secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        deliver(json!({
            "url": server.uri(),
            "auth_type": "api_key",
            "auth_header": "X-Buyer-Key",
            "api_key": "secret"
        }))
        .await
        .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("x-api-key").is_none());
    }

    #[tokio::test]
    async fn test_basic_auth_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Basic dTpw"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        deliver(json!({
            "url": server.uri(),
            "auth_type": "basic",
            "basic_user": "u",
            "basic_pass": "p"
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_no_auth_type_sends_no_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        deliver(json!({"url": server.uri(), "api_key": "unused"})).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
        assert!(requests[0].headers.get("x-api-key").is_none());
    }

    #[tokio::test]
    async fn test_custom_headers_override_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Custom override"))
            .and(header("x-source", "leadship"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        deliver(json!({
            "url": server.uri(),
            "auth_type": "basic",
            "basic_user": "u",
            "basic_pass": "p",
            "headers": {"Authorization": "Custom override", "X-Source": "leadship"}
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_client_error_is_permanent_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad columns"))
            .mount(&server)
            .await;

        match deliver(json!({"url": server.uri()})).await {
            Err(DeliveryError::Permanent(message)) => {
                assert!(message.contains("422"));
                assert!(message.contains("bad columns"));
            }
            other => panic!("expected permanent error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(matches!(
            deliver(json!({"url": server.uri()})).await,
            Err(DeliveryError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_time_limit_caps_configured_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let result = deliver_within(
            json!({"url": server.uri(), "timeout_sec": 30}),
            Duration::from_millis(500),
        )
        .await;

        assert!(matches!(result, Err(DeliveryError::Transient(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        assert!(matches!(
            deliver(json!({"url": server.uri(), "timeout_sec": 1})).await,
            Err(DeliveryError::Transient(_))
        ));
    }
}
