//! OAuth callback decoding.
//!
//! The backend finishes Google sign-in by handing the client its credentials
//! either in an `auth_transport` cookie (percent-encoded JSON) or in a query
//! parameter (base64 JSON). Both are decoded here exactly once; the caller
//! stores the result and then drops the credential-bearing cookie or URL.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::User;

/// Cookie the backend sets on the callback redirect.
pub const AUTH_COOKIE: &str = "auth_transport";

/// Query parameter carrying the base64 payload.
pub const AUTH_QUERY_PARAM: &str = "auth";

/// `Set-Cookie` value that expires the transport cookie.
pub const EXPIRED_AUTH_COOKIE: &str =
    "auth_transport=; expires=Thu, 01 Jan 1970 00:00:00 UTC; path=/;";

/// Errors decoding a callback.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Neither the cookie nor the query parameter was present.
    #[error("no credentials in OAuth callback")]
    Missing,
    /// The payload was not valid percent-encoding or base64.
    #[error("OAuth payload could not be decoded: {0}")]
    Decode(String),
    /// The decoded payload was not the expected JSON.
    #[error("OAuth payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl OAuthError {
    /// Error code appended to the login route (`/login?error=...`).
    #[must_use]
    pub const fn login_error_code(&self) -> &'static str {
        match self {
            Self::Missing => "no_auth",
            Self::Decode(_) | Self::Parse(_) => "auth_failed",
        }
    }
}

/// Credentials delivered by the OAuth callback.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthPayload {
    /// Signed-in user.
    pub user: User,
    /// Access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: String,
}

impl std::fmt::Debug for OAuthPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthPayload")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Decode the payload from a `Cookie` header value.
///
/// # Errors
/// Returns [`OAuthError::Missing`] if the cookie is absent, or a decode error.
pub fn from_cookie_header(header: &str) -> Result<OAuthPayload, OAuthError> {
    let raw = header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value)
        .ok_or(OAuthError::Missing)?;

    let json = urlencoding::decode(raw).map_err(|e| OAuthError::Decode(e.to_string()))?;
    Ok(serde_json::from_str(&json)?)
}

/// Decode the payload from the callback URL and return the URL with the
/// credential parameter removed.
///
/// # Errors
/// Returns [`OAuthError::Missing`] if the parameter is absent, or a decode error.
pub fn from_callback_url(url: &Url) -> Result<(OAuthPayload, Url), OAuthError> {
    let encoded = url
        .query_pairs()
        .find(|(name, _)| name == AUTH_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .ok_or(OAuthError::Missing)?;

    let bytes = decode_base64(&encoded)?;
    let payload = serde_json::from_slice(&bytes)?;
    Ok((payload, strip_credentials(url)))
}

/// Copy of `url` without the credential parameter.
#[must_use]
pub fn strip_credentials(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != AUTH_QUERY_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, OAuthError> {
    STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')))
        .map_err(|e| OAuthError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{"user":{"id":"g-1","name":"Grace","email":"grace@example.com","role":"user","provider":"google","isVerified":true},"accessToken":"acc","refreshToken":"ref"}"#;

    #[test]
    fn test_cookie_payload() {
        let header = format!(
            "theme=dark; {AUTH_COOKIE}={}; other=1",
            urlencoding::encode(PAYLOAD)
        );
        let payload = from_cookie_header(&header).unwrap();
        assert_eq!(payload.user.email, "grace@example.com");
        assert_eq!(payload.access_token, "acc");
        assert_eq!(payload.refresh_token, "ref");
    }

    #[test]
    fn test_missing_cookie() {
        let err = from_cookie_header("theme=dark").unwrap_err();
        assert!(matches!(err, OAuthError::Missing));
        assert_eq!(err.login_error_code(), "no_auth");
    }

    #[test]
    fn test_garbage_cookie_is_auth_failed() {
        let err = from_cookie_header("auth_transport=%7Bnope").unwrap_err();
        assert_eq!(err.login_error_code(), "auth_failed");
    }

    #[test]
    fn test_query_payload_is_stripped_from_url() {
        let encoded = URL_SAFE_NO_PAD.encode(PAYLOAD);
        let url = Url::parse(&format!(
            "https://app.example/auth/callback?next=%2Fdashboard&{AUTH_QUERY_PARAM}={encoded}"
        ))
        .unwrap();

        let (payload, clean) = from_callback_url(&url).unwrap();
        assert_eq!(payload.user.id, "g-1");
        assert_eq!(clean.as_str(), "https://app.example/auth/callback?next=%2Fdashboard");
    }

    #[test]
    fn test_standard_base64_and_only_param() {
        let encoded = urlencoding::encode(&STANDARD.encode(PAYLOAD)).into_owned();
        let url = Url::parse(&format!(
            "https://app.example/auth/callback?{AUTH_QUERY_PARAM}={encoded}"
        ))
        .unwrap();

        let (payload, clean) = from_callback_url(&url).unwrap();
        assert_eq!(payload.refresh_token, "ref");
        assert_eq!(clean.query(), None);
    }

    #[test]
    fn test_payload_debug_hides_tokens() {
        let payload: OAuthPayload = serde_json::from_str(PAYLOAD).unwrap();
        assert!(!format!("{payload:?}").contains("acc\""));
    }
}
