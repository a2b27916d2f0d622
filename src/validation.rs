// Validation utilities module
// Provides custom validation functions for identity and role payloads

use regex::Regex;
use std::sync::OnceLock;
use validator::ValidationError;

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]{3,32}$").expect("username pattern is valid"))
}

fn role_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{1,31}$").expect("role name pattern is valid"))
}

/// Validates that a username is 3-32 characters of letters, digits, '_', '.', '-'
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username_pattern().is_match(username) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_username"))
    }
}

/// Validates that a role name is lowercase snake case, 2-32 characters
pub fn validate_role_name(name: &str) -> Result<(), ValidationError> {
    if role_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_role_name"))
    }
}

/// Validates that a display name is not blank
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new("must_not_be_blank"))
    } else {
        Ok(())
    }
}
