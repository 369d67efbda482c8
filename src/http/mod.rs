//! HTTP layer: raw transport plus the session-aware client on top of it.

pub mod client;
pub mod transport;

pub use client::{ApiClient, Attempt, REFRESH_PATH};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, RequestAuth, Transport};

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-process backend.

    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use serde_json::Value;

    use super::{ApiClient, ApiRequest, ApiResponse, Transport};
    use crate::cache::QueryCache;
    use crate::error::ApiResult;
    use crate::session::SessionManager;

    type Handler = dyn Fn(&ApiRequest) -> ApiResult<ApiResponse> + Send + Sync;

    /// Answers every request through a closure and records what it saw.
    #[derive(Clone)]
    pub(crate) struct StubBackend {
        handler: Arc<Handler>,
        requests: Arc<Mutex<Vec<ApiRequest>>>,
        delay: Duration,
    }

    impl StubBackend {
        pub(crate) fn new<F>(handler: F) -> Self
        where
            F: Fn(&ApiRequest) -> ApiResult<ApiResponse> + Send + Sync + 'static,
        {
            Self {
                handler: Arc::new(handler),
                requests: Arc::new(Mutex::new(Vec::new())),
                delay: Duration::ZERO,
            }
        }

        pub(crate) const fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn requests(&self) -> Vec<ApiRequest> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub(crate) fn count_path(&self, path: &str) -> usize {
            self.requests().iter().filter(|r| r.path == path).count()
        }
    }

    #[async_trait]
    impl Transport for StubBackend {
        async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
            (self.handler)(&request)
        }
    }

    pub(crate) fn ok_json(body: &Value) -> ApiResponse {
        ApiResponse::json_body(StatusCode::OK, body)
    }

    pub(crate) fn client_with(backend: &StubBackend) -> Arc<ApiClient> {
        Arc::new(ApiClient::new(
            Arc::new(backend.clone()),
            Arc::new(SessionManager::in_memory()),
            Arc::new(QueryCache::default()),
        ))
    }
}
