// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Input validation for identities, chat bodies and profile patches.

use std::sync::LazyLock;

use aura_common::{ProfilePatch, SYSTEM_SENDER};
use regex::Regex;
use thiserror::Error;

// Common validation constants
const MAX_USERNAME_LENGTH: usize = 32;
const MAX_BIO_LENGTH: usize = 500;
const MAX_REFERENCE_LENGTH: usize = 2048;

static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap());

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Message too long: {len} characters (limit {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a username and return it trimmed
pub fn validate_username(username: &str) -> ValidationResult<&str> {
    let username = username.trim();

    if username.is_empty() {
        return Err(ValidationError::InvalidUsername(
            "Username must not be empty".to_string(),
        ));
    }

    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::InvalidUsername(format!(
            "Username must be at most {MAX_USERNAME_LENGTH} characters"
        )));
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(ValidationError::InvalidUsername(
            "Username may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }

    if username.eq_ignore_ascii_case(SYSTEM_SENDER) {
        return Err(ValidationError::InvalidUsername(format!(
            "'{username}' is reserved"
        )));
    }

    Ok(username)
}

/// Trim a chat body. `None` means there is nothing to send.
pub fn validate_message(text: &str, max_len: usize) -> ValidationResult<Option<&str>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let len = text.chars().count();
    if len > max_len {
        return Err(ValidationError::MessageTooLong { len, max: max_len });
    }

    Ok(Some(text))
}

/// Validate the client-writable profile fields
pub fn validate_profile(patch: &ProfilePatch) -> ValidationResult<()> {
    if let Some(bio) = &patch.bio {
        if bio.chars().count() > MAX_BIO_LENGTH {
            return Err(ValidationError::InvalidProfile(format!(
                "Bio must be at most {MAX_BIO_LENGTH} characters"
            )));
        }
    }

    for (field, value) in [("pfp", &patch.pfp), ("banner", &patch.banner)] {
        let Some(value) = value else { continue };
        if value.chars().count() > MAX_REFERENCE_LENGTH {
            return Err(ValidationError::InvalidProfile(format!(
                "{field} must be at most {MAX_REFERENCE_LENGTH} characters"
            )));
        }
        if value.chars().any(char::is_control) {
            return Err(ValidationError::InvalidProfile(format!(
                "{field} must not contain control characters"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  Alice_01 "), Ok("Alice_01"));
        assert!(validate_username("").is_err());
        assert!(validate_username("   ").is_err());
        assert!(validate_username("bad name").is_err());
        assert!(validate_username("<script>").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username(&"a".repeat(32)).is_ok());
    }

    #[test]
    fn test_system_name_is_reserved() {
        assert!(validate_username("system").is_err());
        assert!(validate_username("SYSTEM").is_err());
        assert!(validate_username("systems").is_ok());
    }

    #[test]
    fn test_validate_message() {
        assert_eq!(validate_message("  hi  ", 10), Ok(Some("hi")));
        assert_eq!(validate_message("   ", 10), Ok(None));
        assert_eq!(
            validate_message("hello world", 5),
            Err(ValidationError::MessageTooLong { len: 11, max: 5 })
        );
    }

    #[test]
    fn test_validate_profile() {
        let ok = ProfilePatch {
            pfp: Some("https://img.example/p.png".to_string()),
            bio: Some("I like dice".to_string()),
            banner: None,
        };
        assert!(validate_profile(&ok).is_ok());

        let long_bio = ProfilePatch {
            bio: Some("x".repeat(501)),
            ..ProfilePatch::default()
        };
        assert!(validate_profile(&long_bio).is_err());

        let control = ProfilePatch {
            banner: Some("a\nb".to_string()),
            ..ProfilePatch::default()
        };
        assert!(validate_profile(&control).is_err());
    }
}
