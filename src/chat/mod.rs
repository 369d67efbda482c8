//! Chat with the knowledge base: data model, transcript state, engine.

pub mod engine;
pub mod transcript;
pub mod types;

pub use engine::{ChatEngine, SendOutcome, CONNECTION_ERROR_MESSAGE};
pub use transcript::{MarkError, Transcript};
pub use types::{ChatHistoryItem, ChatMessage, ChatReply, ChatStatus, Feedback, MessageRole, RichText, Source};

use thiserror::Error;

use crate::error::ApiError;

/// Errors from chat operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No message in the transcript has this id.
    #[error("no message with id {0}")]
    UnknownMessage(String),

    /// Feedback only applies to assistant answers.
    #[error("message {0} is not an assistant answer")]
    NotAssistantMessage(String),

    /// Feedback is recorded once per answer.
    #[error("feedback already given for message {0}")]
    FeedbackAlreadyGiven(String),

    /// A submission for this answer is still in flight.
    #[error("feedback for message {0} is already being submitted")]
    FeedbackPending(String),

    /// The backend call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ChatError {
    pub(crate) fn from_mark(error: MarkError, id: &str) -> Self {
        match error {
            MarkError::Unknown => Self::UnknownMessage(id.to_string()),
            MarkError::NotAssistant => Self::NotAssistantMessage(id.to_string()),
            MarkError::AlreadyGiven => Self::FeedbackAlreadyGiven(id.to_string()),
        }
    }
}
