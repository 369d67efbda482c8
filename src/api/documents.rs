//! Document library endpoints.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cache::QueryKey;
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::http::{ApiClient, ApiRequest};

/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Kind of document.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// Standard operating procedure.
    #[serde(rename = "SOP")]
    Sop,
    /// Policy.
    Policy,
    /// Guide.
    Guide,
    /// Specification.
    Spec,
    /// Free-form notes.
    Notes,
}

impl DocumentType {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sop => "SOP",
            Self::Policy => "Policy",
            Self::Guide => "Guide",
            Self::Spec => "Spec",
            Self::Notes => "Notes",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document summary as listed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Identifier.
    pub id: String,
    /// Owning workspace.
    #[serde(default)]
    pub workspace_id: String,
    /// Title.
    pub title: String,
    /// Kind.
    #[serde(rename = "type")]
    pub kind: DocumentType,
    /// Author name.
    #[serde(default)]
    pub author: String,
    /// Latest version number.
    #[serde(default)]
    pub current_version: u32,
    /// Last update.
    #[serde(default)]
    pub updated_at: String,
    /// Creation time.
    #[serde(default)]
    pub created_at: String,
}

/// Full document with content and analysis extras.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetail {
    /// Summary fields.
    #[serde(flatten)]
    pub document: Document,
    /// Body text.
    #[serde(default)]
    pub content: String,
    /// AI-generated summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    /// Extracted key points.
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Last manual verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<String>,
}

/// One revision of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVersion {
    /// Identifier.
    pub id: String,
    /// Sequential number.
    pub version_number: u32,
    /// Change summary.
    #[serde(default)]
    pub summary: String,
    /// Author.
    #[serde(default)]
    pub author: String,
    /// Creation time.
    #[serde(default)]
    pub created_at: String,
}

/// Body of `GET /api/documents`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPage {
    /// Documents on this page.
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Total across all pages.
    #[serde(default)]
    pub total: u64,
    /// Page size.
    #[serde(default)]
    pub limit: u32,
    /// Offset of the first item.
    #[serde(default)]
    pub offset: u32,
}

#[derive(Serialize, Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    versions: Vec<DocumentVersion>,
}

/// Filters for listing documents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentQuery {
    /// Restrict to one workspace.
    pub workspace_id: Option<String>,
    /// Restrict to one kind. `None` lists everything.
    pub kind: Option<DocumentType>,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
}

impl Default for DocumentQuery {
    fn default() -> Self {
        Self {
            workspace_id: None,
            kind: None,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl DocumentQuery {
    /// Offset of the first item on the requested page.
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    fn cache_key(&self) -> QueryKey {
        QueryKey::new([
            "documents".to_string(),
            self.workspace_id.clone().unwrap_or_default(),
            self.kind.map(|k| k.as_str().to_string()).unwrap_or_default(),
            self.page.to_string(),
            self.limit.to_string(),
        ])
    }
}

/// New document payload.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    /// Target workspace.
    pub workspace_id: String,
    /// Title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Kind.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<DocumentType>,
}

/// Cache key for one document (its versions live under it).
#[must_use]
pub fn document_key(id: &str) -> QueryKey {
    QueryKey::new(["document", id])
}

fn documents_key() -> QueryKey {
    QueryKey::new(["documents"])
}

fn stats_key() -> QueryKey {
    QueryKey::new(["dashboard-stats"])
}

fn document_path(id: &str) -> String {
    format!("/api/documents/{}", urlencoding::encode(id))
}

/// Client for `/api/documents`.
#[derive(Clone, Debug)]
pub struct DocumentsApi {
    client: Arc<ApiClient>,
    ttl: Duration,
}

impl DocumentsApi {
    /// Documents client.
    #[must_use]
    pub fn new(client: Arc<ApiClient>, config: &ClientConfig) -> Self {
        Self {
            client,
            ttl: Duration::from_secs(config.cache.default_ttl_seconds),
        }
    }

    /// One page of documents.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn list(&self, query: &DocumentQuery) -> ApiResult<DocumentPage> {
        let mut request = ApiRequest::get("/api/documents")
            .with_query("limit", query.limit)
            .with_query("offset", query.offset());
        if let Some(workspace_id) = &query.workspace_id {
            request = request.with_query("workspaceId", workspace_id);
        }
        if let Some(kind) = query.kind {
            request = request.with_query("type", kind);
        }
        self.client.fetch_cached(query.cache_key(), self.ttl, request).await
    }

    /// A document with its content.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn get(&self, id: &str) -> ApiResult<DocumentDetail> {
        self.client
            .fetch_cached(document_key(id), self.ttl, ApiRequest::get(document_path(id)))
            .await
    }

    /// Revision history of a document.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn versions(&self, id: &str) -> ApiResult<Vec<DocumentVersion>> {
        let key = QueryKey::new(["document", id, "versions"]);
        let request = ApiRequest::get(format!("{}/versions", document_path(id)));
        let response: VersionsResponse = self.client.fetch_cached(key, self.ttl, request).await?;
        Ok(response.versions)
    }

    /// Create a document from text.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] for an empty title or content, or an
    /// error if the request fails.
    pub async fn create(&self, document: &NewDocument) -> ApiResult<Document> {
        if document.title.trim().is_empty() || document.content.trim().is_empty() {
            return Err(ApiError::Validation(
                "Title and content are required".to_string(),
            ));
        }
        let body = serde_json::to_value(document)?;
        let created = self
            .client
            .fetch(ApiRequest::post("/api/documents").with_body(body))
            .await?;
        self.client.invalidate([&documents_key(), &stats_key()]);
        Ok(created)
    }

    /// Replace the content, creating a new version.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn update_content(&self, id: &str, content: &str) -> ApiResult<Value> {
        let request = ApiRequest::put(document_path(id)).with_body(json!({ "content": content }));
        let updated = self.client.fetch(request).await?;
        self.client.invalidate([&document_key(id)]);
        Ok(updated)
    }

    /// Delete a document.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn delete(&self, id: &str) -> ApiResult<()> {
        self.client.execute(ApiRequest::delete(document_path(id))).await?;
        self.client.invalidate([&documents_key(), &stats_key()]);
        Ok(())
    }

    /// Mark a document as verified as still accurate.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn verify(&self, id: &str) -> ApiResult<Value> {
        let request = ApiRequest::post(format!("{}/verify", document_path(id)));
        let verified = self.client.fetch(request).await?;
        self.client.invalidate([&document_key(id), &documents_key()]);
        Ok(verified)
    }
}
