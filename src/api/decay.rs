//! Knowledge decay reports and the dashboard summary.
//!
//! The backend mixes camelCase and snake_case in these payloads; aliases
//! accept both spellings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cache::QueryKey;
use crate::config::ClientConfig;
use crate::error::ApiResult;
use crate::http::{ApiClient, ApiRequest};

/// Page size used when none is given.
pub const DEFAULT_REPORT_LIMIT: u32 = 20;

/// How likely a document is out of date.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Low risk.
    Low,
    /// Medium risk.
    Medium,
    /// High risk.
    High,
}

impl RiskLevel {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Where a report is in the human review workflow.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    /// Not looked at yet.
    #[default]
    Pending,
    /// Seen.
    Reviewed,
    /// Judged a false positive.
    Dismissed,
    /// The document was fixed.
    Actioned,
}

impl ReviewStatus {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Dismissed => "dismissed",
            Self::Actioned => "actioned",
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "reviewed" => Ok(Self::Reviewed),
            "dismissed" => Ok(Self::Dismissed),
            "actioned" => Ok(Self::Actioned),
            _ => Err(value.to_string()),
        }
    }
}

/// A reason the analysis gave, either a bare sentence or a typed record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecayReason {
    /// Bare sentence.
    Text(String),
    /// Typed record.
    Detailed {
        /// Reason category.
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        /// Explanation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl fmt::Display for DecayReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Detailed {
                description: Some(description),
                ..
            } => f.write_str(description),
            Self::Detailed { kind, .. } => f.write_str(kind.as_deref().unwrap_or("unspecified")),
        }
    }
}

/// Suggested edit to a stale section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecommendation {
    /// Section to change.
    #[serde(default)]
    pub section: String,
    /// Replacement text.
    #[serde(default, alias = "suggestedText")]
    pub suggested_text: String,
    /// Why.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Short document reference embedded in a report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    /// Identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Document type.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Last update.
    #[serde(default)]
    pub updated_at: String,
}

/// Stored decay analysis of one document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayReport {
    /// Identifier.
    pub id: String,
    /// Analysed document.
    pub document_id: String,
    /// Whether decay was found.
    #[serde(default, alias = "decay_detected")]
    pub decay_detected: bool,
    /// Confidence in the verdict.
    #[serde(default, alias = "confidence_score")]
    pub confidence_score: f64,
    /// Risk classification.
    #[serde(alias = "risk_level")]
    pub risk_level: RiskLevel,
    /// Why the document looks stale.
    #[serde(default, alias = "decay_reasons")]
    pub decay_reasons: Vec<DecayReason>,
    /// What changed since the document was written.
    #[serde(default, alias = "what_changed_summary", skip_serializing_if = "Option::is_none")]
    pub what_changed_summary: Option<String>,
    /// Suggested edits.
    #[serde(default, alias = "update_recommendations")]
    pub update_recommendations: Vec<UpdateRecommendation>,
    /// Supporting citations.
    #[serde(default)]
    pub citations: Vec<String>,
    /// Analysis time.
    #[serde(default)]
    pub analyzed_at: String,
    /// Review state.
    #[serde(default)]
    pub review_status: ReviewStatus,
    /// Reviewer notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    /// The analysed document, when embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<ReportDocument>,
}

/// Body of `GET /api/decay/reports`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayReportPage {
    /// Reports on this page.
    #[serde(default)]
    pub reports: Vec<DecayReport>,
    /// Total across all pages.
    #[serde(default)]
    pub total: u64,
}

/// Result of analysing one document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayAnalysis {
    /// Stored report id.
    pub analysis_id: String,
    /// Analysed document.
    pub document_id: String,
    /// Its title.
    #[serde(default)]
    pub document_title: String,
    /// Whether decay was found.
    #[serde(rename = "decay_detected", alias = "decayDetected")]
    pub decay_detected: bool,
    /// Confidence in the verdict.
    #[serde(rename = "confidence_score", alias = "confidenceScore", default)]
    pub confidence_score: f64,
    /// Risk classification.
    #[serde(rename = "risk_level", alias = "riskLevel")]
    pub risk_level: RiskLevel,
    /// Why the document looks stale.
    #[serde(rename = "decay_reasons", alias = "decayReasons", default)]
    pub decay_reasons: Vec<DecayReason>,
    /// Suggested edits.
    #[serde(rename = "update_recommendations", alias = "updateRecommendations", default)]
    pub update_recommendations: Vec<UpdateRecommendation>,
}

/// Counts per risk level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCounts {
    /// High.
    #[serde(default)]
    pub high: u64,
    /// Medium.
    #[serde(default)]
    pub medium: u64,
    /// Low.
    #[serde(default)]
    pub low: u64,
}

/// Counts per review status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCounts {
    /// Pending.
    #[serde(default)]
    pub pending: u64,
    /// Reviewed.
    #[serde(default)]
    pub reviewed: u64,
    /// Dismissed.
    #[serde(default)]
    pub dismissed: u64,
    /// Actioned.
    #[serde(default)]
    pub actioned: u64,
}

/// Body of `GET /api/decay/summary`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    /// Documents in the workspace.
    #[serde(default)]
    pub total_documents: u64,
    /// Documents analysed at least once.
    #[serde(default)]
    pub analyzed_documents: Option<u64>,
    /// Reports flagging decay.
    #[serde(default)]
    pub decay_detected: u64,
    /// Breakdown by risk.
    #[serde(default)]
    pub by_risk_level: RiskCounts,
    /// Breakdown by review state.
    #[serde(default)]
    pub by_review_status: ReviewCounts,
    /// Mean confidence across reports.
    #[serde(default)]
    pub average_confidence: f64,
}

/// Filters for listing reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportQuery {
    /// Page size.
    pub limit: u32,
    /// Offset of the first item.
    pub offset: u32,
    /// Only this risk level.
    pub risk_level: Option<RiskLevel>,
    /// Only this review state.
    pub review_status: Option<ReviewStatus>,
}

impl Default for ReportQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_REPORT_LIMIT,
            offset: 0,
            risk_level: None,
            review_status: None,
        }
    }
}

fn reports_key() -> QueryKey {
    QueryKey::new(["decay-reports"])
}

fn stats_key() -> QueryKey {
    QueryKey::new(["dashboard-stats"])
}

/// Cache key for a document's report.
#[must_use]
pub fn report_key(document_id: &str) -> QueryKey {
    QueryKey::new(["decay-report", document_id])
}

/// Client for `/api/decay`.
#[derive(Clone, Debug)]
pub struct DecayApi {
    client: Arc<ApiClient>,
    workspace_id: String,
    ttl: Duration,
}

impl DecayApi {
    /// Decay client.
    #[must_use]
    pub fn new(client: Arc<ApiClient>, config: &ClientConfig) -> Self {
        Self {
            client,
            workspace_id: config.workspace_id.clone(),
            ttl: Duration::from_secs(config.cache.default_ttl_seconds),
        }
    }

    /// One page of reports.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn reports(&self, query: &ReportQuery) -> ApiResult<DecayReportPage> {
        let mut request = ApiRequest::get("/api/decay/reports")
            .with_query("limit", query.limit)
            .with_query("offset", query.offset);
        if let Some(risk) = query.risk_level {
            request = request.with_query("riskLevel", risk.as_str());
        }
        if let Some(status) = query.review_status {
            request = request.with_query("reviewStatus", status.as_str());
        }
        let key = QueryKey::new([
            "decay-reports".to_string(),
            query.limit.to_string(),
            query.offset.to_string(),
            query.risk_level.map(RiskLevel::as_str).unwrap_or_default().to_string(),
            query.review_status.map(ReviewStatus::as_str).unwrap_or_default().to_string(),
        ]);
        self.client.fetch_cached(key, self.ttl, request).await
    }

    /// Latest report for a document.
    ///
    /// # Errors
    /// Returns an error if the request fails, including 404 when the
    /// document was never analysed.
    pub async fn report_for_document(&self, document_id: &str) -> ApiResult<DecayReport> {
        let request = ApiRequest::get(format!(
            "/api/decay/reports/{}",
            urlencoding::encode(document_id)
        ));
        self.client
            .fetch_cached(report_key(document_id), self.ttl, request)
            .await
    }

    /// Analyse one document now.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn analyze(&self, document_id: &str) -> ApiResult<DecayAnalysis> {
        let request =
            ApiRequest::post("/api/decay/analyze").with_body(json!({ "documentId": document_id }));
        let analysis = self.client.fetch(request).await?;
        self.client.invalidate([
            &reports_key(),
            &report_key(document_id),
            &stats_key(),
            &QueryKey::new(["document", document_id]),
        ]);
        Ok(analysis)
    }

    /// Queue analysis of every document.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn batch_analyze(&self) -> ApiResult<()> {
        self.client.execute(ApiRequest::post("/api/decay/batch")).await?;
        self.client.invalidate([&reports_key(), &stats_key()]);
        Ok(())
    }

    /// Record a review decision.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn update_review(
        &self,
        report_id: &str,
        status: ReviewStatus,
        notes: Option<&str>,
    ) -> ApiResult<Value> {
        let request = ApiRequest::put(format!(
            "/api/decay/reports/{}/review",
            urlencoding::encode(report_id)
        ))
        .with_body(json!({ "reviewStatus": status, "reviewNotes": notes }));
        let updated = self.client.fetch(request).await?;
        self.client.invalidate([&reports_key(), &stats_key()]);
        Ok(updated)
    }

    /// Dashboard counters for the workspace.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn summary(&self) -> ApiResult<DashboardStats> {
        let request =
            ApiRequest::get("/api/decay/summary").with_query("workspaceId", &self.workspace_id);
        self.client
            .fetch_cached(
                QueryKey::new(["dashboard-stats", self.workspace_id.as_str()]),
                self.ttl,
                request,
            )
            .await
    }
}
