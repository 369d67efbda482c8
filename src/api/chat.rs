//! Chat endpoints.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::cache::QueryKey;
use crate::chat::types::{ChatHistoryItem, ChatHistoryResponse, ChatReply, ChatStatus, Feedback, SearchResults};
use crate::config::ClientConfig;
use crate::error::ApiResult;
use crate::http::{ApiClient, ApiRequest};
use crate::session::SessionManager;

/// Default number of semantic search hits.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Cache key for a workspace's history.
#[must_use]
pub fn history_key(workspace_id: &str) -> QueryKey {
    QueryKey::new(["chat-history", workspace_id])
}

/// Cache key for the AI status.
#[must_use]
pub fn status_key() -> QueryKey {
    QueryKey::new(["chat-status"])
}

/// Client for `/api/chat`.
#[derive(Clone, Debug)]
pub struct ChatApi {
    client: Arc<ApiClient>,
    workspace_id: String,
    history_ttl: Duration,
    status_ttl: Duration,
}

impl ChatApi {
    /// Chat client for the configured workspace.
    #[must_use]
    pub fn new(client: Arc<ApiClient>, config: &ClientConfig) -> Self {
        Self {
            client,
            workspace_id: config.workspace_id.clone(),
            history_ttl: Duration::from_secs(config.cache.chat_history_ttl_seconds),
            status_ttl: Duration::from_secs(config.cache.chat_status_ttl_seconds),
        }
    }

    /// Session the requests are made under.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        self.client.session()
    }

    /// Workspace this client talks about.
    #[must_use]
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Persisted history, newest first, unfiltered.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn history(&self) -> ApiResult<Vec<ChatHistoryItem>> {
        let request = ApiRequest::get("/api/chat/history").with_query("workspaceId", &self.workspace_id);
        let response: ChatHistoryResponse = self
            .client
            .fetch_cached(history_key(&self.workspace_id), self.history_ttl, request)
            .await?;
        Ok(response.history)
    }

    /// Ask a question.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn send(&self, question: &str) -> ApiResult<ChatReply> {
        let request = ApiRequest::post("/api/chat").with_body(json!({
            "question": question,
            "workspaceId": self.workspace_id,
        }));
        let reply = self.client.fetch(request).await?;
        self.client.invalidate([&QueryKey::new(["chat-history"])]);
        Ok(reply)
    }

    /// Rate an answer.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn feedback(&self, id: &str, feedback: Feedback) -> ApiResult<()> {
        let request = ApiRequest::put(format!("/api/chat/{}/feedback", urlencoding::encode(id)))
            .with_body(json!({ "feedback": feedback }));
        self.client.execute(request).await?;
        self.client.invalidate([&QueryKey::new(["chat-history"])]);
        Ok(())
    }

    /// Whether AI answers are available.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn status(&self) -> ApiResult<ChatStatus> {
        self.client
            .fetch_cached(status_key(), self.status_ttl, ApiRequest::get("/api/chat/status"))
            .await
    }

    /// Semantic search over the workspace's documents.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn search(&self, query: &str, limit: usize) -> ApiResult<SearchResults> {
        let request = ApiRequest::post("/api/chat/search").with_body(json!({
            "query": query,
            "workspaceId": self.workspace_id,
            "limit": limit,
        }));
        self.client.fetch(request).await
    }
}
