//! Chat engine: the transcript plus the calls that feed it.
//!
//! Sends are serialized by a pending flag; a second send while one is in
//! flight is dropped, not queued. History reloads replace the transcript and
//! are skipped while a send is pending so an optimistic question is never
//! wiped before its answer lands. Whenever the signed-in identity changes
//! the conversation is dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use super::transcript::Transcript;
use super::types::{ChatHistoryItem, ChatMessage, Feedback};
use super::ChatError;
use crate::api::chat::ChatApi;
use crate::error::{ApiError, ApiResult};
use crate::session::SessionEvent;

/// Shown in place of an answer when the question could not be delivered.
pub const CONNECTION_ERROR_MESSAGE: &str =
    "I'm having trouble connecting to the Neural Core. Please try again.";

/// What happened to a send.
#[derive(Debug)]
pub enum SendOutcome {
    /// Empty input, or another send was pending. Nothing changed.
    Ignored,
    /// The answer was appended.
    Answered,
    /// The call failed and a local notice was appended.
    Failed(ApiError),
}

/// Clears a flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Removes a message id from the pending feedback set when dropped.
struct PendingFeedback<'a> {
    pending: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for PendingFeedback<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Owns one conversation view.
#[derive(Debug)]
pub struct ChatEngine {
    api: ChatApi,
    expiry: chrono::Duration,
    transcript: Mutex<Transcript>,
    sending: AtomicBool,
    pending_feedback: Mutex<HashSet<String>>,
    session_events: Mutex<broadcast::Receiver<SessionEvent>>,
}

impl ChatEngine {
    /// Engine hiding history older than `expiry`.
    ///
    /// # Errors
    /// Returns [`ApiError::Config`] if `expiry` does not fit a time delta.
    pub fn new(api: ChatApi, expiry: std::time::Duration) -> ApiResult<Self> {
        let expiry = chrono::Duration::from_std(expiry)
            .map_err(|e| ApiError::Config(format!("chat expiry out of range: {e}")))?;
        let session_events = Mutex::new(api.session().subscribe());
        Ok(Self {
            api,
            expiry,
            transcript: Mutex::new(Transcript::new()),
            sending: AtomicBool::new(false),
            pending_feedback: Mutex::new(HashSet::new()),
            session_events,
        })
    }

    /// Underlying endpoint client.
    #[must_use]
    pub const fn api(&self) -> &ChatApi {
        &self.api
    }

    /// Snapshot of the transcript.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.sync_with_session();
        self.transcript().messages().to_vec()
    }

    /// Whether a send is in flight.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    /// Ask a question.
    ///
    /// The question is shown immediately and stays shown whatever the
    /// outcome. A failure is turned into a local notice without an id.
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        self.sync_with_session();
        let question = text.trim();
        if question.is_empty() {
            return SendOutcome::Ignored;
        }
        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Send ignored, another one is pending");
            return SendOutcome::Ignored;
        }
        let _sending = FlagGuard(&self.sending);

        self.transcript().push(ChatMessage::user(question));

        match self.api.send(question).await {
            Ok(reply) => {
                self.transcript().push(ChatMessage::assistant(reply));
                SendOutcome::Answered
            }
            Err(e) => {
                tracing::warn!("Chat send failed: {e}");
                self.transcript()
                    .push(ChatMessage::local_notice(CONNECTION_ERROR_MESSAGE));
                SendOutcome::Failed(e)
            }
        }
    }

    /// Rate an answer. On success the answer can never be rated again.
    ///
    /// # Errors
    /// Returns a precondition error without any network call if the id is
    /// unknown, not an answer, already rated, or being rated right now.
    /// Returns [`ChatError::Api`] with the transcript unchanged if the call fails.
    pub async fn submit_feedback(&self, id: &str, feedback: Feedback) -> Result<(), ChatError> {
        self.sync_with_session();
        self.transcript()
            .check_feedback(id)
            .map_err(|e| ChatError::from_mark(e, id))?;

        if !self
            .pending_feedback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string())
        {
            return Err(ChatError::FeedbackPending(id.to_string()));
        }
        let _pending = PendingFeedback {
            pending: &self.pending_feedback,
            id: id.to_string(),
        };

        if let Err(e) = self.api.feedback(id, feedback).await {
            tracing::warn!("Feedback for {id} failed: {e}");
            return Err(e.into());
        }
        self.transcript().mark_feedback_given(id);
        Ok(())
    }

    /// Replace the transcript with the persisted history.
    ///
    /// Returns `false` without touching anything if a send was pending
    /// before or during the fetch, or if the session changed hands meanwhile.
    ///
    /// # Errors
    /// Returns [`ChatError::Api`] if the history could not be fetched.
    pub async fn refresh_history(&self) -> Result<bool, ChatError> {
        self.sync_with_session();
        if self.is_sending() {
            return Ok(false);
        }
        let items = self.api.history().await?;
        if self.sync_with_session() {
            tracing::debug!("History reload skipped, the session changed meanwhile");
            return Ok(false);
        }

        // Checked under the guard so a send cannot slip its question in first.
        let mut transcript = self.transcript();
        if self.is_sending() {
            tracing::debug!("History reload skipped, a send started meanwhile");
            return Ok(false);
        }
        transcript.load_history(&items, Utc::now(), self.expiry);
        Ok(true)
    }

    /// Replace the transcript with `items` (newest first), dropping
    /// anything older than the expiry window as of now.
    pub fn load_history(&self, items: &[ChatHistoryItem]) {
        self.sync_with_session();
        self.transcript().load_history(items, Utc::now(), self.expiry);
    }

    /// Forget the conversation and any feedback in flight.
    pub fn reset(&self) {
        *self.transcript() = Transcript::new();
        self.pending_feedback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::debug!("Chat transcript reset");
    }

    /// Apply session changes seen since the last call. Returns whether the
    /// transcript was reset.
    fn sync_with_session(&self) -> bool {
        let mut identity_changed = false;
        {
            let mut events = self
                .session_events
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            loop {
                match events.try_recv() {
                    Ok(
                        SessionEvent::SignedIn
                        | SessionEvent::SignedOut
                        | SessionEvent::ReauthenticationRequired,
                    )
                    | Err(TryRecvError::Lagged(_)) => identity_changed = true,
                    Ok(SessionEvent::TokenRefreshed) => {}
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
        if identity_changed {
            self.reset();
        }
        identity_changed
    }

    fn transcript(&self) -> MutexGuard<'_, Transcript> {
        self.transcript.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::SecondsFormat;
    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::chat::types::MessageRole;
    use crate::config::ClientConfig;
    use crate::http::testing::{client_with, ok_json, StubBackend};
    use crate::http::ApiResponse;
    use crate::session::tests::sample_user;
    use crate::session::User;

    const EXPIRY: Duration = Duration::from_secs(20 * 60);

    fn engine(backend: &StubBackend) -> ChatEngine {
        let api = ChatApi::new(client_with(backend), &ClientConfig::default());
        ChatEngine::new(api, EXPIRY).unwrap()
    }

    fn minutes_ago(minutes: i64) -> String {
        (Utc::now() - chrono::Duration::minutes(minutes)).to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn reply(id: &str) -> serde_json::Value {
        json!({"id": id, "answer": format!("answer {id}"), "sources": [], "warnings": []})
    }

    #[tokio::test]
    async fn test_send_appends_question_then_answer() {
        let backend = StubBackend::new(|_| Ok(ok_json(&reply("c1"))));
        let engine = engine(&backend);

        let outcome = engine.send_message("  hello  ").await;

        assert!(matches!(outcome, SendOutcome::Answered));
        let messages = engine.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content.display_text(), "hello");
        assert_eq!(messages[1].id.as_deref(), Some("c1"));
        assert!(!messages[1].feedback_given);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_question_and_adds_notice() {
        let backend = StubBackend::new(|_| Err(ApiError::HttpClient("connection refused".to_string())));
        let engine = engine(&backend);

        let outcome = engine.send_message("hello").await;

        assert!(matches!(outcome, SendOutcome::Failed(_)));
        let messages = engine.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.display_text(), "hello");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content.display_text(), CONNECTION_ERROR_MESSAGE);
        assert!(messages[1].id.is_none());
        assert!(!engine.is_sending());
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let backend = StubBackend::new(|_| Ok(ok_json(&reply("c1"))));
        let engine = engine(&backend);

        assert!(matches!(engine.send_message("   ").await, SendOutcome::Ignored));
        assert!(engine.messages().is_empty());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_second_send_while_pending_is_dropped() {
        let backend = StubBackend::new(|_| Ok(ok_json(&reply("c1"))))
            .with_delay(Duration::from_millis(20));
        let engine = engine(&backend);

        let (first, second) = tokio::join!(engine.send_message("one"), engine.send_message("two"));

        assert!(matches!(first, SendOutcome::Answered));
        assert!(matches!(second, SendOutcome::Ignored));
        let shown: Vec<String> = engine
            .messages()
            .iter()
            .map(|m| m.content.display_text())
            .collect();
        assert_eq!(shown, vec!["one".to_string(), "answer c1".to_string()]);
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_flips_once() {
        let backend = StubBackend::new(|request| {
            if request.path == "/api/chat" {
                return Ok(ok_json(&reply("c1")));
            }
            Ok(ok_json(&json!({"success": true})))
        });
        let engine = engine(&backend);
        engine.send_message("hello").await;

        engine.submit_feedback("c1", Feedback::Helpful).await.unwrap();
        assert!(engine.messages()[1].feedback_given);

        let again = engine.submit_feedback("c1", Feedback::NotHelpful).await;
        assert!(matches!(again, Err(ChatError::FeedbackAlreadyGiven(_))));
        assert_eq!(backend.count_path("/api/chat/c1/feedback"), 1);
    }

    #[tokio::test]
    async fn test_failed_feedback_leaves_state_unchanged() {
        let backend = StubBackend::new(|request| {
            if request.path == "/api/chat" {
                return Ok(ok_json(&reply("c1")));
            }
            Ok(ApiResponse::json_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"message": "boom"}),
            ))
        });
        let engine = engine(&backend);
        engine.send_message("hello").await;

        let err = engine.submit_feedback("c1", Feedback::Helpful).await.unwrap_err();

        assert!(matches!(err, ChatError::Api(_)));
        assert!(!engine.messages()[1].feedback_given);
        assert!(engine.submit_feedback("c1", Feedback::Helpful).await.is_err());
        assert_eq!(backend.count_path("/api/chat/c1/feedback"), 2);
    }

    #[tokio::test]
    async fn test_feedback_preconditions() {
        let backend = StubBackend::new(|_| Err(ApiError::HttpClient("offline".to_string())));
        let engine = engine(&backend);
        engine.send_message("hello").await;

        assert!(matches!(
            engine.submit_feedback("nope", Feedback::Helpful).await,
            Err(ChatError::UnknownMessage(_))
        ));
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_feedback_for_same_answer_is_rejected() {
        let backend = StubBackend::new(|request| {
            if request.path == "/api/chat" {
                return Ok(ok_json(&reply("c1")));
            }
            Ok(ok_json(&json!({"success": true})))
        })
        .with_delay(Duration::from_millis(20));
        let engine = engine(&backend);
        engine.send_message("hello").await;

        let (first, second) = tokio::join!(
            engine.submit_feedback("c1", Feedback::Helpful),
            engine.submit_feedback("c1", Feedback::Helpful),
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(ChatError::FeedbackPending(_))));
        assert_eq!(backend.count_path("/api/chat/c1/feedback"), 1);
    }

    #[tokio::test]
    async fn test_refresh_history_applies_expiry() {
        let backend = StubBackend::new(|_| {
            Ok(ok_json(&json!({
                "history": [
                    {"id": "new", "question": "recent?", "answer": "yes", "feedback": "helpful",
                     "createdAt": minutes_ago(5)},
                    {"id": "old", "question": "stale?", "answer": "no", "createdAt": minutes_ago(25)}
                ],
                "count": 2
            })))
        });
        let engine = engine(&backend);

        assert!(engine.refresh_history().await.unwrap());

        let messages = engine.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.display_text(), "recent?");
        assert_eq!(messages[1].id.as_deref(), Some("new"));
        assert!(messages[1].feedback_given);
    }

    #[tokio::test]
    async fn test_refresh_history_waits_for_pending_send() {
        let backend = StubBackend::new(|request| {
            if request.path == "/api/chat" {
                return Ok(ok_json(&reply("c1")));
            }
            Ok(ok_json(&json!({"history": [], "count": 0})))
        })
        .with_delay(Duration::from_millis(20));
        let engine = engine(&backend);

        let (sent, refreshed) = tokio::join!(engine.send_message("hello"), engine.refresh_history());

        assert!(matches!(sent, SendOutcome::Answered));
        assert!(!refreshed.unwrap());
        assert_eq!(engine.messages().len(), 2);
        assert_eq!(backend.count_path("/api/chat/history"), 0);
    }

    #[tokio::test]
    async fn test_question_is_visible_while_answer_is_pending() {
        let backend = StubBackend::new(|_| Ok(ok_json(&reply("c1"))))
            .with_delay(Duration::from_millis(50));
        let engine = engine(&backend);

        let observe = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            (engine.is_sending(), engine.messages())
        };
        let (outcome, (sending, in_flight)) = tokio::join!(engine.send_message("hello"), observe);

        assert!(sending);
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].role, MessageRole::User);
        assert_eq!(in_flight[0].content.display_text(), "hello");
        assert!(matches!(outcome, SendOutcome::Answered));
        assert_eq!(engine.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_send_started_during_history_fetch_is_kept() {
        let backend = StubBackend::new(|request| {
            if request.path == "/api/chat" {
                return Ok(ok_json(&reply("c1")));
            }
            Ok(ok_json(&json!({
                "history": [{"id": "h1", "question": "earlier?", "answer": "yes",
                             "createdAt": minutes_ago(1)}],
                "count": 1
            })))
        })
        .with_delay(Duration::from_millis(30));
        let engine = engine(&backend);

        let late_send = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            engine.send_message("hello").await
        };
        let (refreshed, sent) = tokio::join!(engine.refresh_history(), late_send);

        assert!(!refreshed.unwrap());
        assert!(matches!(sent, SendOutcome::Answered));
        let shown: Vec<String> = engine
            .messages()
            .iter()
            .map(|m| m.content.display_text())
            .collect();
        assert_eq!(shown, vec!["hello".to_string(), "answer c1".to_string()]);
    }

    #[tokio::test]
    async fn test_sign_out_drops_the_conversation() {
        let backend = StubBackend::new(|request| match request.path.as_str() {
            "/api/chat" => Ok(ok_json(&reply("c1"))),
            "/api/chat/history" => Err(ApiError::HttpClient("offline".to_string())),
            _ => Ok(ok_json(&json!({"success": true}))),
        });
        let engine = engine(&backend);
        let session = Arc::clone(engine.api().session());
        session.set_session(sample_user(), "a-token", "a-refresh").await;
        engine.send_message("private question").await;
        assert_eq!(engine.messages().len(), 2);

        session.clear_session().await;
        assert!(engine.messages().is_empty());

        let other = User {
            id: "u-2".to_string(),
            email: "bo@example.com".to_string(),
            ..sample_user()
        };
        session.set_session(other, "b-token", "b-refresh").await;
        assert!(engine.refresh_history().await.is_err());

        assert!(engine.messages().is_empty());
        assert!(matches!(
            engine.submit_feedback("c1", Feedback::Helpful).await,
            Err(ChatError::UnknownMessage(_))
        ));
        assert_eq!(backend.count_path("/api/chat/c1/feedback"), 0);
    }

    #[tokio::test]
    async fn test_forced_reauthentication_drops_the_conversation() {
        let backend = StubBackend::new(|request| match request.path.as_str() {
            "/api/auth/refresh" => Ok(ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"success": false}),
            )),
            "/api/chat" if request.bearer.as_deref() == Some("good") => Ok(ok_json(&reply("c1"))),
            _ => Ok(ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"message": "Token expired"}),
            )),
        });
        let engine = engine(&backend);
        engine
            .api()
            .session()
            .set_session(sample_user(), "good", "ref")
            .await;
        engine.send_message("first").await;
        assert_eq!(engine.messages().len(), 2);

        engine.api().session().update_access_token("expired").await;
        let outcome = engine.send_message("second").await;

        assert!(matches!(outcome, SendOutcome::Failed(ApiError::ReauthenticationRequired)));
        assert!(engine.messages().is_empty());
    }

    #[tokio::test]
    async fn test_history_fetched_across_sign_out_is_discarded() {
        let backend = StubBackend::new(|_| {
            Ok(ok_json(&json!({
                "history": [{"id": "h1", "question": "mine?", "answer": "yes",
                             "createdAt": minutes_ago(1)}],
                "count": 1
            })))
        })
        .with_delay(Duration::from_millis(30));
        let engine = engine(&backend);
        let session = Arc::clone(engine.api().session());
        session.set_session(sample_user(), "a", "r").await;

        let sign_out = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            session.clear_session().await;
        };
        let (refreshed, ()) = tokio::join!(engine.refresh_history(), sign_out);

        assert!(!refreshed.unwrap());
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn test_engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<ChatEngine>>();
    }
}
