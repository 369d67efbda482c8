//! The ordered list of messages a chat view shows.
//!
//! Pure state: no I/O and no clock. The caller passes `now` so the expiry
//! window is evaluated at call time.

use chrono::{DateTime, Duration, Utc};

use super::types::{ChatHistoryItem, ChatMessage, MessageRole};

/// Why a feedback mark was refused.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MarkError {
    /// No message has this id.
    Unknown,
    /// The id belongs to a non-assistant message.
    NotAssistant,
    /// Feedback was already recorded.
    AlreadyGiven,
}

/// Client-visible conversation, in display order.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    /// Empty transcript.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing is shown.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replace everything with the history items still inside `expiry`.
    ///
    /// `items` are newest first as the backend returns them. Each surviving
    /// item becomes a question followed by its answer, oldest pair first.
    pub fn load_history(&mut self, items: &[ChatHistoryItem], now: DateTime<Utc>, expiry: Duration) {
        self.messages = items
            .iter()
            .filter(|item| now.signed_duration_since(item.created_at) < expiry)
            .rev()
            .flat_map(|item| {
                [
                    ChatMessage::user(item.question.as_str()),
                    ChatMessage {
                        id: Some(item.id.clone()),
                        role: MessageRole::Assistant,
                        content: item.answer.clone(),
                        sources: item.sources.clone(),
                        warnings: item.warnings.clone(),
                        feedback_given: item.feedback.is_some(),
                    },
                ]
            })
            .collect();
    }

    /// Append a message at the end.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Find a message by backend id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id.as_deref() == Some(id))
    }

    /// Check that `id` can take feedback.
    ///
    /// # Errors
    /// Returns the reason the message cannot take feedback.
    pub fn check_feedback(&self, id: &str) -> Result<(), MarkError> {
        let message = self.find(id).ok_or(MarkError::Unknown)?;
        if message.role != MessageRole::Assistant {
            return Err(MarkError::NotAssistant);
        }
        if message.feedback_given {
            return Err(MarkError::AlreadyGiven);
        }
        Ok(())
    }

    /// Record feedback on every message carrying `id`. One-way.
    ///
    /// Returns whether any message changed.
    pub fn mark_feedback_given(&mut self, id: &str) -> bool {
        let mut changed = false;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.id.as_deref() == Some(id) && !m.feedback_given)
        {
            message.feedback_given = true;
            changed = true;
        }
        changed
    }
}
