//! Raw HTTP transport: one request in, one response out.
//!
//! Nothing here looks at the session. Credentials are attached by
//! [`crate::session::SessionManager::authorize`] and 401s are handled by
//! [`crate::http::ApiClient`]; the refresh call goes straight through a
//! [`Transport`] so it is never intercepted itself.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Whether a request takes part in the bearer/refresh protocol.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RequestAuth {
    /// Attach the access token and repair 401s through a refresh.
    #[default]
    Bearer,
    /// Auth endpoints: no credentials, a 401 goes straight back to the caller.
    Public,
}

/// An outgoing API call.
#[derive(Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the base URL, starting with `/`.
    pub path: String,
    /// Query string pairs.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Participation in the auth protocol.
    pub auth: RequestAuth,
    /// Bearer credential to send, filled in by `authorize`.
    pub bearer: Option<String>,
    /// Correlation id, stable across a retry.
    pub request_id: Uuid,
}

impl ApiRequest {
    /// Build a request for `method` and `path`.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            auth: RequestAuth::Bearer,
            bearer: None,
            request_id: Uuid::new_v4(),
        }
    }

    /// `GET path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT path`.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `DELETE path`.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query pair.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Mark as an auth endpoint outside the refresh protocol.
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.auth = RequestAuth::Public;
        self
    }

    /// Attach a bearer credential.
    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("auth", &self.auth)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// A received response, success or not.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Raw body text.
    pub body: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
}

impl ApiResponse {
    /// Build a response from parts.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Build a JSON response.
    #[must_use]
    pub fn json_body(status: StatusCode, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The backend's `message` field, if the body carries one.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        serde_json::from_str::<ErrorEnvelope>(&self.body)
            .ok()
            .and_then(|envelope| envelope.message)
    }

    /// Decode the body. An empty body decodes as JSON `null`.
    ///
    /// # Errors
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        if self.body.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Turn a non-2xx response into [`ApiError::Status`].
    ///
    /// # Errors
    /// Returns an error if the status is not a success.
    pub fn into_result(self) -> ApiResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::Status {
                status: self.status,
                message: self.message(),
            })
        }
    }
}

/// Sends a single request without any session handling.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return whatever the backend answered.
    ///
    /// # Errors
    /// Returns an error only if no response was received.
    async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse>;
}

/// `reqwest`-backed transport.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport for the configured backend.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the HTTP client cannot be created.
    pub fn new(config: &ClientConfig) -> ApiResult<Self> {
        config.validate()?;
        let client = Self::build_client(config)?;
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn build_client(config: &ClientConfig) -> ApiResult<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("insightops-client/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| ApiError::HttpClient(e.to_string()))
    }

    fn build_url(&self, request: &ApiRequest) -> ApiResult<url::Url> {
        let mut url = url::Url::parse(&format!("{}{}", self.base_url, request.path))?;
        if !request.query.is_empty() {
            let mut params = url.query_pairs_mut();
            for (key, value) in &request.query {
                params.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        let url = self.build_url(&request)?;
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(REQUEST_ID_HEADER, request.request_id.to_string());

        if let Some(token) = &request.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(
            request_id = %request.request_id,
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            "api response"
        );

        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_url_keeps_base_path_and_query() {
        let config = ClientConfig::new().with_api_url("https://host.example/backend/");
        let transport = ReqwestTransport::new(&config).unwrap();
        let request = ApiRequest::get("/api/chat/history").with_query("workspaceId", "ops team");

        let url = transport.build_url(&request).unwrap().to_string();
        assert_eq!(
            url,
            "https://host.example/backend/api/chat/history?workspaceId=ops+team"
        );
    }

    #[test]
    fn test_debug_redacts_bearer() {
        let request = ApiRequest::get("/api/users/me").with_bearer("secret-token");
        let printed = format!("{request:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_into_result_extracts_message() {
        let response = ApiResponse::json_body(
            StatusCode::BAD_REQUEST,
            &json!({"success": false, "message": "Email already registered"}),
        );
        let err = response.into_result().unwrap_err();
        assert_eq!(err.server_message(), Some("Email already registered"));
    }

    #[test]
    fn test_empty_body_decodes_as_null() {
        let response = ApiResponse::new(StatusCode::NO_CONTENT, "");
        let value: Option<Value> = response.json().unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_public_requests_skip_protocol() {
        let request = ApiRequest::post("/api/auth/login").public();
        assert_eq!(request.auth, RequestAuth::Public);
        assert_eq!(ApiRequest::get("/x").auth, RequestAuth::Bearer);
    }
}
