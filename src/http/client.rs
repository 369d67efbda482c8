//! Authenticated request pipeline.
//!
//! Every bearer request goes through [`ApiClient::execute`]: the current access
//! token is attached, and a 401 answer is repaired at most once by exchanging
//! the refresh token for a new access token and re-sending. Concurrent 401s
//! share a single refresh call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::cache::{QueryCache, QueryKey};
use crate::error::{ApiError, ApiResult};
use crate::http::transport::{ApiRequest, ApiResponse, RequestAuth, Transport};
use crate::session::SessionManager;

/// Path of the token refresh endpoint.
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// Where a request is in the single-retry protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Attempt {
    /// Sent once, no refresh tried yet.
    FirstAttempt,
    /// Already re-sent after a refresh; another 401 is final.
    Retried,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default)]
    success: bool,
    access_token: Option<String>,
}

/// HTTP client bound to the session.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    cache: Arc<QueryCache>,
    refresh_lock: Mutex<()>,
}

impl ApiClient {
    /// Wire a client from its collaborators.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionManager>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            transport,
            session,
            cache,
            refresh_lock: Mutex::new(()),
        }
    }

    /// The session this client authenticates with.
    #[must_use]
    pub const fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Cached server views.
    #[must_use]
    pub const fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Send a request, repairing an expired access token once if needed.
    ///
    /// Public requests bypass the protocol entirely.
    ///
    /// # Errors
    /// Returns the transport error, the backend's non-success status,
    /// [`ApiError::Unauthorized`] if the retry also got a 401, or
    /// [`ApiError::ReauthenticationRequired`] if the session could not be repaired.
    pub async fn execute(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        if request.auth == RequestAuth::Public {
            return self.transport.send(request).await?.into_result();
        }

        let mut attempt = Attempt::FirstAttempt;
        loop {
            let outgoing = self.session.authorize(request.clone());
            let used_token = outgoing.bearer.clone();
            let response = self.transport.send(outgoing).await?;

            if response.status != StatusCode::UNAUTHORIZED {
                return response.into_result();
            }

            self.handle_unauthorized(&response, used_token.as_deref(), attempt)
                .await?;
            attempt = Attempt::Retried;
        }
    }

    /// React to a 401 received by a request sent with `used_token`.
    ///
    /// `Ok(())` means the session now holds a usable token and the request
    /// should be re-sent once.
    ///
    /// # Errors
    /// Returns [`ApiError::Unauthorized`] for a request already retried, and
    /// [`ApiError::ReauthenticationRequired`] after clearing the session when
    /// there is no refresh token or the refresh fails.
    pub async fn handle_unauthorized(
        &self,
        failed: &ApiResponse,
        used_token: Option<&str>,
        attempt: Attempt,
    ) -> ApiResult<()> {
        if attempt == Attempt::Retried {
            tracing::warn!("Request still unauthorized after refresh, giving up");
            return Err(ApiError::Unauthorized {
                message: failed.message(),
            });
        }

        let _refreshing = self.refresh_lock.lock().await;

        // Someone else refreshed while this request was in flight.
        let current = self.session.access_token();
        if current.is_some() && current.as_deref() != used_token {
            tracing::debug!("Reusing access token refreshed by a concurrent request");
            return Ok(());
        }

        // A concurrent waiter already failed to refresh and cleared the session.
        if current.is_none() && used_token.is_some() {
            tracing::debug!("Session cleared by a concurrent request, not refreshing");
            return Err(ApiError::ReauthenticationRequired);
        }

        let Some(refresh_token) = self.session.refresh_token() else {
            tracing::info!("No refresh token, session must be re-established");
            self.force_reauthentication().await;
            return Err(ApiError::ReauthenticationRequired);
        };

        match self.refresh(&refresh_token).await {
            Ok(access_token) => {
                if self.session.update_access_token(access_token).await {
                    tracing::debug!("Access token refreshed");
                    Ok(())
                } else {
                    Err(ApiError::ReauthenticationRequired)
                }
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {e}");
                self.force_reauthentication().await;
                Err(ApiError::ReauthenticationRequired)
            }
        }
    }

    /// Exchange a refresh token for an access token, outside the protocol.
    async fn refresh(&self, refresh_token: &str) -> ApiResult<String> {
        let request = ApiRequest::post(REFRESH_PATH)
            .public()
            .with_body(json!({ "refreshToken": refresh_token }));
        let response = self.transport.send(request).await?.into_result()?;
        let body: RefreshResponse = response.json()?;

        match body.access_token {
            Some(token) if body.success => Ok(token),
            _ => Err(ApiError::Status {
                status: response.status,
                message: Some("refresh rejected".to_string()),
            }),
        }
    }

    async fn force_reauthentication(&self) {
        self.session.require_reauthentication().await;
        self.cache.clear();
    }

    /// Execute and decode the JSON body.
    ///
    /// # Errors
    /// See [`ApiClient::execute`]; also fails if the body does not decode.
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
        self.execute(request).await?.json()
    }

    /// Like [`ApiClient::fetch`], served from the cache while fresh.
    ///
    /// # Errors
    /// See [`ApiClient::fetch`].
    pub async fn fetch_cached<T>(
        &self,
        key: QueryKey,
        ttl: Duration,
        request: ApiRequest,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned + Serialize,
    {
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!("Cache hit for {key}");
            return Ok(cached);
        }

        let value: T = self.fetch(request).await?;
        self.cache.set(key, &value, ttl);
        Ok(value)
    }

    /// Invalidate cached views after a mutation.
    pub fn invalidate<'a>(&self, keys: impl IntoIterator<Item = &'a QueryKey>) {
        for key in keys {
            self.cache.invalidate(key);
        }
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiClient")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
