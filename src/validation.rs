//! Form validation, applied before anything reaches the backend.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ApiError, ApiResult};

/// Minimum password length on the login and registration forms.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Minimum length for a password chosen through a reset link.
pub const MIN_RESET_PASSWORD_LEN: usize = 8;

/// Minimum display name length.
pub const MIN_NAME_LEN: usize = 2;

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
}

/// Check an email address.
///
/// # Errors
/// Returns [`ApiError::Validation`] if the address is malformed.
pub fn email(value: &str) -> ApiResult<()> {
    if email_pattern().is_some_and(|re| re.is_match(value.trim())) {
        Ok(())
    } else {
        Err(ApiError::Validation("Invalid email address".to_string()))
    }
}

/// Check a password is at least `min_len` characters.
///
/// # Errors
/// Returns [`ApiError::Validation`] if the password is too short.
pub fn password(value: &str, min_len: usize) -> ApiResult<()> {
    if value.chars().count() >= min_len {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "Password must be at least {min_len} characters"
        )))
    }
}

/// Check a reset password and its confirmation.
///
/// # Errors
/// Returns [`ApiError::Validation`] if the password is too short or the two differ.
pub fn password_confirmation(password_value: &str, confirmation: &str) -> ApiResult<()> {
    password(password_value, MIN_RESET_PASSWORD_LEN)?;
    if password_value == confirmation {
        Ok(())
    } else {
        Err(ApiError::Validation("Passwords don't match".to_string()))
    }
}

/// Check a display name.
///
/// # Errors
/// Returns [`ApiError::Validation`] if the name is too short.
pub fn name(value: &str) -> ApiResult<()> {
    if value.trim().chars().count() >= MIN_NAME_LEN {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "Name must be at least {MIN_NAME_LEN} characters"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email() {
        assert!(email("ada@example.com").is_ok());
        assert!(email("  ada@example.com ").is_ok());
        assert!(email("ada@example").is_err());
        assert!(email("ada example.com").is_err());
        assert!(email("").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(password("12345", MIN_PASSWORD_LEN).is_err());
        assert!(password("123456", MIN_PASSWORD_LEN).is_ok());
        assert!(password_confirmation("secret12", "secret12").is_ok());
        assert!(password_confirmation("secret1", "secret1").is_err());
        assert!(matches!(
            password_confirmation("secret12", "secret13"),
            Err(ApiError::Validation(msg)) if msg == "Passwords don't match"
        ));
    }

    #[test]
    fn test_name() {
        assert!(name("Al").is_ok());
        assert!(name(" A ").is_err());
    }
}
