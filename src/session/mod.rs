//! Authenticated session: identity, credentials, persistence.
//!
//! [`SessionManager`] is the single owner of the session. It is created once
//! per process and shared by `Arc` with the HTTP layer and the views; the only
//! mutators are `set_session`, `clear_session`, `update_access_token` and
//! `update_user`.

pub mod oauth;
pub mod storage;

pub use storage::{MemorySessionStorage, SessionStorage, SqliteSessionStorage, SESSION_ENTRY};

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, OnceCell};

use crate::http::ApiRequest;

/// Account role.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular member.
    #[default]
    User,
    /// Workspace administrator.
    Admin,
}

/// How the account signs in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthProvider {
    /// Email and password.
    Local,
    /// Google OAuth.
    Google,
}

/// Identity record returned by the backend.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Backend identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Account role.
    #[serde(default)]
    pub role: Role,
    /// Sign-in provider, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<AuthProvider>,
    /// Whether the email address was verified.
    #[serde(default)]
    pub is_verified: bool,
}

/// Snapshot of the authenticated session.
#[derive(Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Signed-in user.
    pub user: Option<User>,
    /// Short-lived bearer credential.
    pub access_token: Option<String>,
    /// Long-lived credential used only to mint access tokens.
    pub refresh_token: Option<String>,
}

impl Session {
    /// Whether an access token is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Whether every field is absent.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.user.is_none() && self.access_token.is_none() && self.refresh_token.is_none()
    }

    const fn is_complete(&self) -> bool {
        self.user.is_some() && self.access_token.is_some() && self.refresh_token.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("user", &self.user)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Session lifecycle notifications.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    /// A new session was established.
    SignedIn,
    /// The access token was replaced by a refresh.
    TokenRefreshed,
    /// The session was cleared on request.
    SignedOut,
    /// The session was cleared because it could not be repaired.
    ReauthenticationRequired,
}

/// Top-level destinations a client navigates between.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    /// Login form.
    Login,
    /// Protected dashboard.
    Dashboard,
}

/// Owner of the process-wide session.
pub struct SessionManager {
    state: RwLock<Session>,
    hydration: OnceCell<()>,
    storage: Arc<dyn SessionStorage>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create an unhydrated, signed-out manager over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: RwLock::new(Session::default()),
            hydration: OnceCell::new(),
            storage,
            events,
        }
    }

    /// Manager backed by process-local storage.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStorage::new()))
    }

    /// Load the persisted session. Runs once; later calls return immediately.
    ///
    /// A missing, unreadable or partial entry hydrates as signed out.
    pub async fn hydrate(&self) {
        self.hydration
            .get_or_init(|| async {
                let restored = match self.storage.load(SESSION_ENTRY).await {
                    Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                        Ok(session) if session.is_complete() => Some(session),
                        Ok(_) => None,
                        Err(e) => {
                            tracing::warn!("Discarding unreadable persisted session: {e}");
                            None
                        }
                    },
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!("Failed to load persisted session: {e}");
                        None
                    }
                };

                if let Some(session) = restored {
                    tracing::debug!("Restored session for {:?}", session.user.as_ref().map(|u| &u.email));
                    *self.write() = session;
                }
            })
            .await;
    }

    /// Whether persisted state has been loaded.
    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.hydration.initialized()
    }

    /// Current in-memory session. Safe before hydration (returns absent fields).
    #[must_use]
    pub fn get_session(&self) -> Session {
        self.read().clone()
    }

    /// Current access token.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    /// Current refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    /// Signed-in user.
    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.read().user.clone()
    }

    /// Whether an access token is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    /// Where a client should land: nothing until hydrated, then dashboard or login.
    #[must_use]
    pub fn landing_route(&self) -> Option<Route> {
        if !self.is_hydrated() {
            return None;
        }
        if self.is_authenticated() {
            Some(Route::Dashboard)
        } else {
            Some(Route::Login)
        }
    }

    /// Subscribe to lifecycle notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Replace the whole session.
    pub async fn set_session(
        &self,
        user: User,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) {
        let snapshot = {
            let mut state = self.write();
            *state = Session {
                user: Some(user),
                access_token: Some(access_token.into()),
                refresh_token: Some(refresh_token.into()),
            };
            state.clone()
        };
        self.persist(&snapshot).await;
        self.emit(SessionEvent::SignedIn);
    }

    /// Reset every field to absent. Idempotent.
    pub async fn clear_session(&self) {
        self.reset(SessionEvent::SignedOut).await;
    }

    /// Clear the session and announce that the user must log in again.
    pub async fn require_reauthentication(&self) {
        self.reset(SessionEvent::ReauthenticationRequired).await;
    }

    /// Swap in a freshly minted access token, keeping user and refresh token.
    ///
    /// Returns `false` without touching anything if there is no refresh token
    /// (the session was cleared while the refresh was in flight).
    pub async fn update_access_token(&self, access_token: impl Into<String>) -> bool {
        let snapshot = {
            let mut state = self.write();
            if state.refresh_token.is_none() {
                return false;
            }
            state.access_token = Some(access_token.into());
            state.clone()
        };
        self.persist(&snapshot).await;
        self.emit(SessionEvent::TokenRefreshed);
        true
    }

    /// Replace the stored profile after an update.
    pub async fn update_user(&self, user: User) {
        let snapshot = {
            let mut state = self.write();
            if state.user.is_none() {
                return;
            }
            state.user = Some(user);
            state.clone()
        };
        self.persist(&snapshot).await;
    }

    /// Attach the current access token to a bearer request.
    ///
    /// Without a token the request goes out unauthenticated and the backend
    /// decides.
    #[must_use]
    pub fn authorize(&self, mut request: ApiRequest) -> ApiRequest {
        if request.auth == crate::http::RequestAuth::Bearer {
            request.bearer = self.access_token();
        }
        request
    }

    async fn reset(&self, event: SessionEvent) {
        let was_empty = {
            let mut state = self.write();
            let was_empty = state.is_empty();
            *state = Session::default();
            was_empty
        };
        if let Err(e) = self.storage.remove(SESSION_ENTRY).await {
            tracing::warn!("Failed to remove persisted session: {e}");
        }
        if !was_empty || event == SessionEvent::ReauthenticationRequired {
            self.emit(event);
        }
    }

    async fn persist(&self, session: &Session) {
        let raw = match serde_json::to_string(session) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to serialize session: {e}");
                return;
            }
        };
        if let Err(e) = self.storage.save(SESSION_ENTRY, raw).await {
            tracing::warn!("Failed to persist session: {e}");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Session> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionManager")
            .field("state", &*self.read())
            .field("hydrated", &self.is_hydrated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_user() -> User {
        User {
            id: "u-1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Admin,
            provider: Some(AuthProvider::Local),
            is_verified: true,
        }
    }

    #[tokio::test]
    async fn test_get_session_before_hydration_is_empty() {
        let manager = SessionManager::in_memory();
        assert!(!manager.is_hydrated());
        assert!(manager.get_session().is_empty());
        assert_eq!(manager.landing_route(), None);
    }

    #[tokio::test]
    async fn test_set_then_hydrate_in_new_manager() {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemorySessionStorage::new());
        let first = SessionManager::new(Arc::clone(&storage));
        first.set_session(sample_user(), "access-1", "refresh-1").await;

        let second = SessionManager::new(storage);
        second.hydrate().await;
        assert!(second.is_hydrated());
        let session = second.get_session();
        assert_eq!(session.user, Some(sample_user()));
        assert_eq!(session.access_token.as_deref(), Some("access-1"));
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(second.landing_route(), Some(Route::Dashboard));
    }

    #[tokio::test]
    async fn test_hydrate_runs_once() {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemorySessionStorage::new());
        let manager = SessionManager::new(Arc::clone(&storage));
        manager.hydrate().await;

        let other = SessionManager::new(Arc::clone(&storage));
        other.set_session(sample_user(), "a", "r").await;

        manager.hydrate().await;
        assert!(manager.get_session().is_empty());
        assert_eq!(manager.landing_route(), Some(Route::Login));
    }

    #[tokio::test]
    async fn test_hydrate_discards_partial_and_corrupt_entries() {
        let storage = Arc::new(MemorySessionStorage::new());
        storage
            .save(SESSION_ENTRY, r#"{"user":null,"accessToken":"a","refreshToken":null}"#.to_string())
            .await
            .unwrap();
        let manager = SessionManager::new(storage.clone());
        manager.hydrate().await;
        assert!(manager.get_session().is_empty());

        storage.save(SESSION_ENTRY, "{not json".to_string()).await.unwrap();
        let manager = SessionManager::new(storage);
        manager.hydrate().await;
        assert!(manager.is_hydrated());
        assert!(manager.get_session().is_empty());
    }

    #[tokio::test]
    async fn test_clear_session_is_idempotent() {
        let manager = SessionManager::in_memory();
        manager.set_session(sample_user(), "a", "r").await;

        manager.clear_session().await;
        let once = manager.get_session();
        manager.clear_session().await;
        let twice = manager.get_session();

        assert_eq!(once, twice);
        assert!(twice.is_empty());
    }

    #[tokio::test]
    async fn test_update_access_token_preserves_identity() {
        let manager = SessionManager::in_memory();
        manager.set_session(sample_user(), "old", "refresh").await;
        let before = manager.get_session();

        assert!(manager.update_access_token("new").await);

        let after = manager.get_session();
        assert_eq!(after.user, before.user);
        assert_eq!(after.refresh_token, before.refresh_token);
        assert_eq!(after.access_token.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_update_access_token_after_clear_is_ignored() {
        let manager = SessionManager::in_memory();
        assert!(!manager.update_access_token("new").await);
        assert!(manager.get_session().is_empty());
    }

    #[tokio::test]
    async fn test_authorize_attaches_token_only_for_bearer_requests() {
        let manager = SessionManager::in_memory();
        let unauthenticated = manager.authorize(ApiRequest::get("/api/documents"));
        assert_eq!(unauthenticated.bearer, None);

        manager.set_session(sample_user(), "tok", "ref").await;
        let authed = manager.authorize(ApiRequest::get("/api/documents"));
        assert_eq!(authed.bearer.as_deref(), Some("tok"));

        let public = manager.authorize(ApiRequest::post("/api/auth/login").public());
        assert_eq!(public.bearer, None);
    }

    #[tokio::test]
    async fn test_events_follow_lifecycle() {
        let manager = SessionManager::in_memory();
        let mut events = manager.subscribe();

        manager.set_session(sample_user(), "a", "r").await;
        manager.update_access_token("b").await;
        manager.clear_session().await;
        manager.clear_session().await;
        manager.require_reauthentication().await;

        assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedIn);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::TokenRefreshed);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedOut);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::ReauthenticationRequired
        );
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = Session {
            user: None,
            access_token: Some("very-secret".to_string()),
            refresh_token: Some("also-secret".to_string()),
        };
        let printed = format!("{session:?}");
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_user_decodes_backend_shape() {
        let user: User = serde_json::from_str(
            r#"{"id":"1","name":"Bo","email":"bo@x.io","role":"admin","provider":"google","isVerified":true}"#,
        )
        .unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.provider, Some(AuthProvider::Google));
        assert!(user.is_verified);
    }
}
