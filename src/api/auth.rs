//! Account flows: login, registration, password recovery, OAuth, profile.
//!
//! Auth endpoints are sent as public requests so a rejected login comes back
//! to the form instead of being mistaken for an expired token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::cache::QueryKey;
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::http::{ApiClient, ApiRequest};
use crate::session::oauth::OAuthPayload;
use crate::session::{Route, User};
use crate::validation;

const UNVERIFIED_MESSAGE: &str = "Please verify your email address before logging in.";
const LOGIN_FALLBACK: &str = "Invalid credentials. Please try again.";
const REGISTER_FALLBACK: &str = "Registration failed. Please try again.";
const RESET_FALLBACK: &str = "Reset failed. Link may be expired.";

/// A failed account flow, with the text to show the user.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AuthFailure {
    message: String,
    #[source]
    source: ApiError,
}

impl AuthFailure {
    fn new(message: impl Into<String>, source: ApiError) -> Self {
        Self {
            message: message.into(),
            source,
        }
    }

    /// The backend's message, or `fallback` when it sent none.
    fn verbatim(source: ApiError, fallback: &str) -> Self {
        let message = match &source {
            ApiError::Validation(reason) => reason.clone(),
            other => other.server_message().unwrap_or(fallback).to_string(),
        };
        Self::new(message, source)
    }

    fn login(source: ApiError) -> Self {
        let unverified = source.status() == Some(StatusCode::UNAUTHORIZED)
            && source.server_message().is_some_and(|m| m.contains("verified"));
        if unverified {
            Self::new(UNVERIFIED_MESSAGE, source)
        } else {
            Self::verbatim(source, LOGIN_FALLBACK)
        }
    }

    /// User-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Underlying error.
    #[must_use]
    pub const fn error(&self) -> &ApiError {
        &self.source
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    user: User,
    access_token: String,
    refresh_token: String,
}

#[derive(Serialize, Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct MaybeUserEnvelope {
    #[serde(default)]
    user: Option<User>,
}

/// Profile fields to change. `None` leaves a field as is.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProfileUpdate {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

fn current_user_key() -> QueryKey {
    QueryKey::new(["user", "me"])
}

/// Client for `/api/auth` and `/api/users/me`.
#[derive(Clone, Debug)]
pub struct AuthApi {
    client: Arc<ApiClient>,
    user_ttl: Duration,
}

impl AuthApi {
    /// Auth client.
    #[must_use]
    pub fn new(client: Arc<ApiClient>, config: &ClientConfig) -> Self {
        Self {
            client,
            user_ttl: Duration::from_secs(config.cache.user_ttl_seconds),
        }
    }

    /// Sign in with email and password and establish the session.
    ///
    /// # Errors
    /// Returns an [`AuthFailure`] carrying the message to display; the
    /// session is left untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<Route, AuthFailure> {
        validation::email(email).map_err(AuthFailure::login)?;
        validation::password(password, validation::MIN_PASSWORD_LEN).map_err(AuthFailure::login)?;

        let request = ApiRequest::post("/api/auth/login")
            .public()
            .with_body(json!({ "email": email.trim(), "password": password }));
        let response: LoginResponse = self
            .client
            .fetch(request)
            .await
            .map_err(AuthFailure::login)?;

        tracing::info!("Signed in as {}", response.user.email);
        self.client.cache().clear();
        self.client
            .session()
            .set_session(response.user, response.access_token, response.refresh_token)
            .await;
        Ok(Route::Dashboard)
    }

    /// Create an account. No session is issued until the email is verified.
    ///
    /// # Errors
    /// Returns an [`AuthFailure`] carrying the message to display.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<(), AuthFailure> {
        let fail = |e| AuthFailure::verbatim(e, REGISTER_FALLBACK);
        validation::name(name).map_err(fail)?;
        validation::email(email).map_err(fail)?;
        validation::password(password, validation::MIN_PASSWORD_LEN).map_err(fail)?;

        let request = ApiRequest::post("/api/auth/register").public().with_body(json!({
            "name": name.trim(),
            "email": email.trim(),
            "password": password,
        }));
        self.client.execute(request).await.map_err(fail)?;
        Ok(())
    }

    /// Ask for a reset link.
    ///
    /// Reports success whether or not the account exists; only malformed
    /// input is rejected.
    ///
    /// # Errors
    /// Returns an [`AuthFailure`] if the email is malformed.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthFailure> {
        validation::email(email).map_err(|e| AuthFailure::verbatim(e, ""))?;

        let request = ApiRequest::post("/api/auth/forgot-password")
            .public()
            .with_body(json!({ "email": email.trim() }));
        if let Err(e) = self.client.execute(request).await {
            tracing::warn!("Forgot-password request failed: {e}");
        }
        Ok(())
    }

    /// Choose a new password through a reset link.
    ///
    /// # Errors
    /// Returns an [`AuthFailure`] carrying the message to display.
    pub async fn reset_password(
        &self,
        token: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthFailure> {
        let fail = |e| AuthFailure::verbatim(e, RESET_FALLBACK);
        validation::password_confirmation(password, confirm_password).map_err(fail)?;

        let request = ApiRequest::post(format!(
            "/api/auth/reset-password/{}",
            urlencoding::encode(token)
        ))
        .public()
        .with_body(json!({ "password": password, "confirmPassword": confirm_password }));
        self.client.execute(request).await.map_err(fail)?;
        Ok(())
    }

    /// Sign out. The local session is cleared even if the backend call fails.
    pub async fn logout(&self) {
        let mut request = ApiRequest::post("/api/auth/logout").public();
        if let Some(token) = self.client.session().access_token() {
            request = request.with_bearer(token);
        }
        if let Err(e) = self.client.execute(request).await {
            tracing::warn!("Logout request failed, clearing local session anyway: {e}");
        }
        self.client.session().clear_session().await;
        self.client.cache().clear();
    }

    /// Establish the session from a decoded OAuth callback.
    pub async fn complete_oauth(&self, payload: OAuthPayload) -> Route {
        tracing::info!("Signed in as {} via OAuth", payload.user.email);
        self.client.cache().clear();
        self.client
            .session()
            .set_session(payload.user, payload.access_token, payload.refresh_token)
            .await;
        Route::Dashboard
    }

    /// The signed-in user's profile.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn current_user(&self) -> ApiResult<User> {
        let envelope: UserEnvelope = self
            .client
            .fetch_cached(current_user_key(), self.user_ttl, ApiRequest::get("/api/users/me"))
            .await?;
        Ok(envelope.user)
    }

    /// Change name or email.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] for malformed fields, or an error if
    /// the request fails.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> ApiResult<()> {
        if let Some(name) = &update.name {
            validation::name(name)?;
        }
        if let Some(email) = &update.email {
            validation::email(email)?;
        }

        let body = serde_json::to_value(update)?;
        let response: MaybeUserEnvelope = self
            .client
            .fetch(ApiRequest::put("/api/users/me").with_body(body))
            .await?;
        if let Some(user) = response.user {
            self.client.session().update_user(user).await;
        }
        self.client.invalidate([&current_user_key()]);
        Ok(())
    }
}
