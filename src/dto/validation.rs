//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::session::SessionCode;

/// Longest display name accepted, counted in characters.
pub const DISPLAY_NAME_MAX_CHARS: usize = 32;

/// Validates that a session code parses once trimmed and uppercased.
///
/// # Examples
///
/// ```ignore
/// validate_session_code("AB12CD")  // Ok
/// validate_session_code(" ab12cd") // Ok - normalised before use
/// validate_session_code("AB-2CD")  // Err - not alphanumeric
/// ```
pub fn validate_session_code(code: &str) -> Result<(), ValidationError> {
    SessionCode::parse(code).map(|_| ()).map_err(|err| {
        let mut error = ValidationError::new("session_code_format");
        error.message = Some(err.to_string().into());
        error
    })
}

/// Validates that a display name is non-blank and reasonably short.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > DISPLAY_NAME_MAX_CHARS {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be at most {DISPLAY_NAME_MAX_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_session_code_valid() {
        assert!(validate_session_code("AB12CD").is_ok());
        assert!(validate_session_code("ab12cd").is_ok());
        assert!(validate_session_code(" 000000 ").is_ok());
    }

    #[test]
    fn test_validate_session_code_invalid() {
        assert!(validate_session_code("AB12C").is_err()); // too short
        assert!(validate_session_code("AB12CDE").is_err()); // too long
        assert!(validate_session_code("AB-2CD").is_err()); // punctuation
        assert!(validate_session_code("").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Ann").is_ok());
        assert!(validate_display_name("  ").is_err());
        assert!(validate_display_name(&"x".repeat(DISPLAY_NAME_MAX_CHARS)).is_ok());
        assert!(validate_display_name(&"x".repeat(DISPLAY_NAME_MAX_CHARS + 1)).is_err());
    }
}
