//! Request field validation and input sanitising

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ApiError, FieldErrors};

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("invalid email pattern"));

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script>").expect("invalid script pattern"));

static IFRAME_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<iframe\b.*?</iframe>").expect("invalid iframe pattern"));

static JS_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("invalid scheme pattern"));

static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)on\w+\s*=").expect("invalid handler pattern"));

const PASSWORD_SPECIALS: &str = "@$!%*?&";

pub fn validate_email(email: &str) -> Result<(), String> {
    if EMAIL.is_match(email) {
        Ok(())
    } else {
        Err("Invalid email format".to_string())
    }
}

/// Password strength rules; the first failing rule is reported
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters long".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one number".to_string());
    }
    if !password.chars().any(|c| PASSWORD_SPECIALS.contains(c)) {
        return Err(
            "Password must contain at least one special character (@$!%*?&)".to_string(),
        );
    }
    Ok(())
}

/// Strip script/iframe blocks, `javascript:` and inline event handlers, then trim
pub fn sanitize(input: &str) -> String {
    let out = SCRIPT_TAG.replace_all(input, "");
    let out = IFRAME_TAG.replace_all(&out, "");
    let out = JS_SCHEME.replace_all(&out, "");
    let out = EVENT_HANDLER.replace_all(&out, "");
    out.trim().to_string()
}

pub fn sanitize_opt(input: Option<String>) -> Option<String> {
    input.map(|s| sanitize(&s))
}

/// Collects field errors; the first failure per field wins
#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(&mut self, field: &str, message: String) {
        self.errors.entry(field.to_string()).or_insert(message);
    }

    fn has(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// Returns the value when present and non-empty
    pub fn required<'a>(&mut self, field: &str, value: Option<&'a str>) -> Option<&'a str> {
        match value {
            Some(v) if !v.is_empty() => Some(v),
            _ => {
                self.fail(field, format!("{} is required", field));
                None
            }
        }
    }

    pub fn email(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            if let Err(message) = validate_email(value) {
                self.fail(field, message);
            }
        }
        self
    }

    pub fn password(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            if let Err(message) = validate_password(value) {
                self.fail(field, message);
            }
        }
        self
    }

    pub fn min_len(&mut self, field: &str, value: Option<&str>, min: usize) -> &mut Self {
        if let Some(value) = value {
            if !self.has(field) && value.chars().count() < min {
                self.fail(
                    field,
                    format!("{} must be at least {} characters long", field, min),
                );
            }
        }
        self
    }

    pub fn max_len(&mut self, field: &str, value: Option<&str>, max: usize) -> &mut Self {
        if let Some(value) = value {
            if !self.has(field) && value.chars().count() > max {
                self.fail(field, format!("{} must not exceed {} characters", field, max));
            }
        }
        self
    }

    pub fn range<T>(&mut self, field: &str, value: Option<T>, min: T, max: T) -> &mut Self
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        if let Some(value) = value {
            if value < min {
                self.fail(field, format!("{} must be at least {}", field, min));
            } else if value > max {
                self.fail(field, format!("{} must not exceed {}", field, max));
            }
        }
        self
    }

    pub fn one_of(&mut self, field: &str, value: Option<&str>, allowed: &[&str]) -> &mut Self {
        if let Some(value) = value {
            if !allowed.contains(&value) {
                self.fail(
                    field,
                    format!("{} must be one of {}", field, allowed.join(", ")),
                );
            }
        }
        self
    }

    /// Record an arbitrary failure
    pub fn check(&mut self, field: &str, ok: bool, message: impl Into<String>) -> &mut Self {
        if !ok {
            self.fail(field, message.into());
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> FieldErrors {
        self.errors
    }

    /// `Err(ApiError::Validation)` when any field failed
    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }

    /// 400 `"Validation error: <m1>, <m2>"`, the form the LLM routes answer with
    pub fn finish_joined(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let messages: Vec<String> = self.errors.into_values().collect();
        Err(ApiError::bad_request(format!(
            "Validation error: {}",
            messages.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("a.b+c@sub.domain.io").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("user@nodot").is_err());
        assert!(validate_email("with space@example.com").is_err());
    }

    #[test]
    fn test_validate_password_messages() {
        assert_eq!(
            validate_password("Ab1!").unwrap_err(),
            "Password must be at least 8 characters long"
        );
        assert_eq!(
            validate_password("ABCDEFG1!").unwrap_err(),
            "Password must contain at least one lowercase letter"
        );
        assert_eq!(
            validate_password("abcdefg1!").unwrap_err(),
            "Password must contain at least one uppercase letter"
        );
        assert_eq!(
            validate_password("Abcdefgh!").unwrap_err(),
            "Password must contain at least one number"
        );
        assert_eq!(
            validate_password("Abcdefgh1").unwrap_err(),
            "Password must contain at least one special character (@$!%*?&)"
        );
        assert!(validate_password("Password123!").is_ok());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  hello  "), "hello");
        assert_eq!(sanitize("a<script>alert(1)</script>b"), "ab");
        assert_eq!(sanitize("<IFRAME src=x></iframe>text"), "text");
        assert_eq!(sanitize("javascript:alert(1)"), "alert(1)");
        assert_eq!(sanitize("<img onerror=alert(1)>"), "<img alert(1)>");
    }

    #[test]
    fn test_validator_collects_first_error_per_field() {
        let mut v = Validator::new();
        v.required("email", None);
        v.email("email", Some("bad"));
        v.max_len("firstName", Some("x".repeat(51).as_str()), 50);
        v.range("limit", Some(0), 1, 100);

        let errors = v.into_errors();
        assert_eq!(errors["email"], "email is required");
        assert_eq!(errors["firstName"], "firstName must not exceed 50 characters");
        assert_eq!(errors["limit"], "limit must be at least 1");
    }

    #[test]
    fn test_validator_finish() {
        let mut v = Validator::new();
        v.email("email", Some("user@example.com"));
        assert!(v.finish().is_ok());

        let mut v = Validator::new();
        v.one_of("level", Some("TRACE"), &["DEBUG", "INFO"]);
        match v.finish() {
            Err(ApiError::Validation { message, errors }) => {
                assert_eq!(message, "Validation failed");
                assert!(errors.contains_key("level"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_finish_joined() {
        let mut v = Validator::new();
        v.check("content", false, "Message content must be between 1 and 10000 characters")
            .check("temperature", false, "Temperature must be between 0 and 2");
        match v.finish_joined() {
            Err(ApiError::BadRequest(message)) => assert_eq!(
                message,
                "Validation error: Message content must be between 1 and 10000 characters, Temperature must be between 0 and 2"
            ),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(Validator::new().finish_joined().is_ok());
    }
}
