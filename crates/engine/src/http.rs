//! HTTP client adapter
//!
//! All network traffic goes through [`HttpTransport`] so the executor, the
//! authenticator and the readiness poller can be driven by a scripted
//! transport in tests.

use async_trait::async_trait;
use contractprobe_common::HttpMethod;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::TransportError;

/// Request body encoding
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A request issued by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<RequestBody>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            bearer: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    pub fn bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }
}

/// A response as seen by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; non-JSON text is kept as a string value
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode a raw body the way every transport should
    pub fn from_text(status: u16, text: &str) -> Self {
        let body = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
        };
        Self { status, body }
    }
}

/// Issues HTTP requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// `reqwest`-backed transport
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout_secs)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(method, &request.url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(fields)) => builder.form(fields),
            None => builder,
        };

        let resp = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| self.map_error(e))?;

        Ok(ApiResponse::from_text(status, &text))
    }
}

/// Join a base URL and a path without doubling or dropping the slash.
///
/// Absolute URLs are returned unchanged.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("http://api", "/widgets", "http://api/widgets" ; "leading slash")]
    #[test_case("http://api/", "widgets", "http://api/widgets" ; "trailing slash")]
    #[test_case("http://api/v1/", "/widgets/1", "http://api/v1/widgets/1" ; "both slashes")]
    #[test_case("http://api", "https://auth/token", "https://auth/token" ; "absolute path")]
    fn test_join_url(base: &str, path: &str, expected: &str) {
        assert_eq!(join_url(base, path), expected);
    }

    #[test]
    fn test_response_from_text() {
        assert_eq!(ApiResponse::from_text(204, "").body, None);
        assert_eq!(
            ApiResponse::from_text(200, r#"{"id":1}"#).body,
            Some(json!({"id": 1}))
        );
        assert_eq!(
            ApiResponse::from_text(500, "boom").body,
            Some(json!("boom"))
        );
        assert!(ApiResponse::new(201, None).is_success());
        assert!(!ApiResponse::new(404, None).is_success());
    }
}
