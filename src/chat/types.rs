//! Chat data model.
//!
//! The backend sends message bodies and warnings either as plain strings or
//! as `{type, message}` objects. [`RichText`] absorbs both at decode time so
//! nothing downstream has to look at the raw shape again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text that arrives as a bare string or a structured notice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RichText {
    /// Bare string.
    Plain(String),
    /// Structured `{type, message}` object.
    Structured(StructuredText),
}

/// Structured notice body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredText {
    /// Notice category, e.g. `stale_document`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Human-readable text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Document the notice refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl RichText {
    /// Text to show. A structured value without a message falls back to its JSON.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::Plain(text) => text.clone(),
            Self::Structured(StructuredText {
                message: Some(message),
                ..
            }) => message.clone(),
            Self::Structured(other) => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl fmt::Display for RichText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text())
    }
}

impl From<&str> for RichText {
    fn from(value: &str) -> Self {
        Self::Plain(value.to_string())
    }
}

impl From<String> for RichText {
    fn from(value: String) -> Self {
        Self::Plain(value)
    }
}

/// A document an answer was grounded on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Document identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Document type (SOP, Policy, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Retrieval similarity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    /// Whether the backend flagged the document as stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    /// Last update of the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Who wrote a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The person asking.
    User,
    /// The answering system.
    Assistant,
}

/// Verdict on an answer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    /// The answer helped.
    Helpful,
    /// The answer did not help.
    NotHelpful,
}

impl Feedback {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Helpful => "helpful",
            Self::NotHelpful => "not_helpful",
        }
    }
}

impl std::str::FromStr for Feedback {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "helpful" => Ok(Self::Helpful),
            "not_helpful" => Ok(Self::NotHelpful),
            _ => Err(value.to_string()),
        }
    }
}

/// One entry of the visible transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Backend record id. Only persisted assistant answers carry one.
    pub id: Option<String>,
    /// Author.
    pub role: MessageRole,
    /// Body.
    pub content: RichText,
    /// Documents the answer cites.
    pub sources: Vec<Source>,
    /// Warnings attached to the answer.
    pub warnings: Vec<RichText>,
    /// Set once feedback was recorded. Never reset.
    pub feedback_given: bool,
}

impl ChatMessage {
    /// A question typed by the user.
    #[must_use]
    pub fn user(content: impl Into<RichText>) -> Self {
        Self {
            id: None,
            role: MessageRole::User,
            content: content.into(),
            sources: Vec::new(),
            warnings: Vec::new(),
            feedback_given: false,
        }
    }

    /// An answer produced by the backend.
    #[must_use]
    pub fn assistant(reply: ChatReply) -> Self {
        Self {
            id: reply.id,
            role: MessageRole::Assistant,
            content: reply.answer,
            sources: reply.sources,
            warnings: reply.warnings,
            feedback_given: false,
        }
    }

    /// A locally generated assistant notice with no backend record.
    #[must_use]
    pub fn local_notice(content: impl Into<RichText>) -> Self {
        Self {
            id: None,
            role: MessageRole::Assistant,
            content: content.into(),
            sources: Vec::new(),
            warnings: Vec::new(),
            feedback_given: false,
        }
    }

    /// Whether feedback controls apply to this message right now.
    #[must_use]
    pub const fn accepts_feedback(&self) -> bool {
        matches!(self.role, MessageRole::Assistant) && self.id.is_some() && !self.feedback_given
    }
}

/// A persisted question/answer pair from the history endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryItem {
    /// Record id.
    pub id: String,
    /// Question asked.
    pub question: String,
    /// Answer given.
    pub answer: RichText,
    /// Backend confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Cited documents.
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Warnings.
    #[serde(default)]
    pub warnings: Vec<RichText>,
    /// Feedback already recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    /// Answer latency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// When the question was asked.
    pub created_at: DateTime<Utc>,
}

/// Body of `GET /api/chat/history`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    /// Items, newest first.
    #[serde(default)]
    pub history: Vec<ChatHistoryItem>,
    /// Number of items.
    #[serde(default)]
    pub count: usize,
}

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    /// Persisted record id.
    #[serde(default)]
    pub id: Option<String>,
    /// Answer.
    pub answer: RichText,
    /// Backend confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Cited documents.
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Warnings.
    #[serde(default)]
    pub warnings: Vec<RichText>,
    /// Whether an AI provider produced the answer.
    #[serde(default)]
    pub ai_enabled: bool,
    /// Answer latency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

/// Body of `GET /api/chat/status`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStatus {
    /// Whether answers are AI-generated.
    pub ai_enabled: bool,
    /// Provider name.
    #[serde(default)]
    pub provider: String,
    /// Capability flags.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A semantic search hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Document id.
    pub document_id: String,
    /// Title.
    pub title: String,
    /// Document type.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Similarity score.
    pub similarity: f64,
    /// Matching excerpt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Body of `POST /api/chat/search`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Echoed query.
    #[serde(default)]
    pub query: String,
    /// Hits, best first.
    #[serde(default)]
    pub results: Vec<SearchHit>,
    /// Number of hits.
    #[serde(default)]
    pub count: usize,
}
