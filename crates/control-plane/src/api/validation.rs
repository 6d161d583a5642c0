// Input validation for user-facing APIs
//
// Hard limits on user-editable fields. Violations surface as
// ServiceError::Validation and render as 400 envelopes.

use nicheflow_core::ServiceError;
use regex::Regex;

// =============================================================================
// Input Size Limits
// =============================================================================

pub const MAX_USERNAME_BYTES: usize = 64;

pub const MAX_NAME_BYTES: usize = 128;

/// Avatar URLs from identity providers can carry long signed query strings.
pub const MAX_IMAGE_URL_BYTES: usize = 2048;

pub const MAX_EMAIL_BYTES: usize = 320;

/// Custom preference key limit.
pub const MAX_PREFERENCE_KEY_BYTES: usize = 50;

/// Custom preference value limit.
pub const MAX_PREFERENCE_VALUE_BYTES: usize = 255;

/// Upper bound for admin-issued verification token lifetimes (30 days).
pub const MAX_VERIFICATION_TOKEN_MINUTES: i64 = 30 * 24 * 60;

const PHONE_PATTERN: &str = r"^\+?[0-9][0-9 ()\-]{2,31}$";
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const PREFERENCE_KEY_PATTERN: &str = r"^[A-Za-z0-9_.\-]+$";

// =============================================================================
// Validation Functions
// =============================================================================

fn check_len(field: &str, value: &str, max: usize) -> Result<(), ServiceError> {
    if value.len() > max {
        tracing::warn!(
            "{} exceeds limit: {} bytes (max: {})",
            field,
            value.len(),
            max
        );
        return Err(ServiceError::validation(format!(
            "{} must be at most {} bytes",
            field, max
        )));
    }
    Ok(())
}

fn matches(pattern: &str, value: &str) -> Result<bool, ServiceError> {
    let regex = Regex::new(pattern).map_err(|e| ServiceError::Internal(e.into()))?;
    Ok(regex.is_match(value))
}

pub fn validate_username(username: &str) -> Result<(), ServiceError> {
    check_len("username", username, MAX_USERNAME_BYTES)
}

pub fn validate_name(field: &str, name: &str) -> Result<(), ServiceError> {
    check_len(field, name, MAX_NAME_BYTES)
}

pub fn validate_image_url(url: &str) -> Result<(), ServiceError> {
    check_len("image_url", url, MAX_IMAGE_URL_BYTES)?;
    if !url.is_empty() && url::Url::parse(url).is_err() {
        return Err(ServiceError::validation("image_url must be an absolute URL"));
    }
    Ok(())
}

/// Empty clears the phone number.
pub fn validate_phone_number(phone: &str) -> Result<(), ServiceError> {
    if phone.is_empty() {
        return Ok(());
    }
    if !matches(PHONE_PATTERN, phone)? {
        return Err(ServiceError::validation("phone_number is not a valid phone number"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ServiceError> {
    check_len("email", email, MAX_EMAIL_BYTES)?;
    if !matches(EMAIL_PATTERN, email)? {
        return Err(ServiceError::validation("email is not a valid address"));
    }
    Ok(())
}

pub fn validate_preference_key(key: &str) -> Result<(), ServiceError> {
    if key.is_empty() {
        return Err(ServiceError::validation("preference key must not be empty"));
    }
    check_len("preference key", key, MAX_PREFERENCE_KEY_BYTES)?;
    if !matches(PREFERENCE_KEY_PATTERN, key)? {
        return Err(ServiceError::validation(format!(
            "preference key '{}' contains invalid characters",
            key
        )));
    }
    Ok(())
}

pub fn validate_preference_value(key: &str, value: &str) -> Result<(), ServiceError> {
    check_len(&format!("preference '{}'", key), value, MAX_PREFERENCE_VALUE_BYTES)
}

pub fn validate_verification_token_minutes(minutes: i64) -> Result<(), ServiceError> {
    if minutes <= 0 || minutes > MAX_VERIFICATION_TOKEN_MINUTES {
        return Err(ServiceError::validation(format!(
            "expires_in_minutes must be between 1 and {}",
            MAX_VERIFICATION_TOKEN_MINUTES
        )));
    }
    Ok(())
}
