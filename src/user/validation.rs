use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::error::FieldError;
use crate::user::registration::RegistrationRequest;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_EMAIL_LOCAL_LENGTH: usize = 64;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$"
    ).unwrap();
    static ref NAME_RE: Regex = Regex::new(r"^[\p{L}][\p{L} '\-]*$").unwrap();
}

// Matched case-insensitively anywhere in the password
const WEAK_PASSWORD_FRAGMENTS: &[&str] = &[
    "password", "123456", "qwerty", "letmein", "welcome", "admin", "abc123",
    "iloveyou", "monkey", "dragon", "111111", "passw0rd",
];

/// Result of a single field check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()) }
    }
}

/// Check the format and length limits of an email address
pub fn validate_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return false;
    }

    match email.rsplit_once('@') {
        Some((local, _)) if !local.is_empty() && local.len() <= MAX_EMAIL_LOCAL_LENGTH => {}
        _ => return false,
    }

    EMAIL_RE.is_match(email)
}

/// Check a password against the strength policy.
///
/// The first failing rule is reported; the checks run in a fixed order so the
/// reason is stable for a given input.
pub fn validate_password(password: &str) -> ValidationOutcome {
    let length = password.chars().count();

    if length < MIN_PASSWORD_LENGTH {
        return ValidationOutcome::fail(format!(
            "Password must be at least {} characters long", MIN_PASSWORD_LENGTH));
    }
    if length > MAX_PASSWORD_LENGTH {
        return ValidationOutcome::fail(format!(
            "Password must be at most {} characters long", MAX_PASSWORD_LENGTH));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return ValidationOutcome::fail("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return ValidationOutcome::fail("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return ValidationOutcome::fail("Password must contain at least one number");
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        return ValidationOutcome::fail("Password must contain at least one special character");
    }
    if has_repeated_run(password, 3) {
        return ValidationOutcome::fail("Password must not repeat the same character 3 or more times in a row");
    }

    let lower = password.to_lowercase();
    if WEAK_PASSWORD_FRAGMENTS.iter().any(|weak| lower.contains(weak)) {
        return ValidationOutcome::fail("Password contains a common weak pattern");
    }
    if is_repeating_motif(&lower) {
        return ValidationOutcome::fail("Password must not be a short repeated sequence");
    }

    ValidationOutcome::ok()
}

/// Check a first or last name
pub fn validate_name(name: &str) -> ValidationOutcome {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return ValidationOutcome::fail("Name is required");
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return ValidationOutcome::fail(format!("Name must be at most {} characters", MAX_NAME_LENGTH));
    }
    if !NAME_RE.is_match(trimmed) {
        return ValidationOutcome::fail("Name may only contain letters, spaces, hyphens and apostrophes");
    }

    ValidationOutcome::ok()
}

/// Validate every registration field and collect all failures
pub fn validate_registration(request: &RegistrationRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !validate_email(request.email.trim()) {
        errors.push(FieldError::new("email", "A valid email address is required"));
    }

    let password = validate_password(&request.password);
    if let Some(reason) = password.reason {
        errors.push(FieldError::new("password", reason));
    }

    if request.password != request.confirm_password {
        errors.push(FieldError::new("confirmPassword", "Passwords do not match"));
    }

    for (field, value) in [("firstName", &request.first_name), ("lastName", &request.last_name)] {
        if let Some(reason) = validate_name(value).reason {
            errors.push(FieldError::new(field, reason));
        }
    }

    errors
}

/// Validate a replacement password and its confirmation
pub fn validate_new_password(password: &str, confirm_password: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Some(reason) = validate_password(password).reason {
        errors.push(FieldError::new("password", reason));
    }
    if password != confirm_password {
        errors.push(FieldError::new("confirmPassword", "Passwords do not match"));
    }

    errors
}

fn has_repeated_run(value: &str, run: usize) -> bool {
    let chars: Vec<char> = value.chars().collect();
    chars.windows(run).any(|w| w.iter().all(|c| *c == w[0]))
}

// True when the whole value is one 1-4 character unit repeated
fn is_repeating_motif(value: &str) -> bool {
    let chars: Vec<char> = value.chars().collect();

    (1..=4).any(|unit| {
        chars.len() > unit
            && chars.len() % unit == 0
            && chars.chunks(unit).all(|chunk| chunk == &chars[..unit])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("alice@example.com" ; "simple")]
    #[test_case("first.last+tag@sub.example.co" ; "dotted with tag")]
    #[test_case("o'brien@example.ie" ; "apostrophe")]
    fn test_valid_emails(email: &str) {
        assert!(validate_email(email));
    }

    #[test_case("" ; "empty")]
    #[test_case("no-at-sign.example.com" ; "missing at")]
    #[test_case("a@b" ; "no tld")]
    #[test_case("two..dots@example.com" ; "consecutive dots")]
    #[test_case("@example.com" ; "empty local")]
    #[test_case("space in@example.com" ; "whitespace")]
    fn test_invalid_emails(email: &str) {
        assert!(!validate_email(email));
    }

    #[test]
    fn test_email_length_ceilings() {
        let local = "a".repeat(65);
        assert!(!validate_email(&format!("{}@example.com", local)));

        let local = "a".repeat(64);
        assert!(validate_email(&format!("{}@example.com", local)));

        let domain = format!("{}.com", "d".repeat(60));
        let long = format!("{}@{}.{}.{}.{}", "a".repeat(20), domain, domain, domain, domain);
        assert!(long.len() > MAX_EMAIL_LENGTH);
        assert!(!validate_email(&long));
    }

    #[test_case("Str0ng!Pass" ; "typical")]
    #[test_case("C0rrect-H0rse-Battery" ; "passphrase")]
    #[test_case("Zx9#mQ2v" ; "minimum length")]
    fn test_strong_passwords(password: &str) {
        assert_eq!(validate_password(password), ValidationOutcome::ok());
    }

    #[test_case("Sh0rt!" ; "too short")]
    #[test_case("alllower1!" ; "no uppercase")]
    #[test_case("ALLUPPER1!" ; "no lowercase")]
    #[test_case("NoDigits!!x" ; "no digit")]
    #[test_case("NoSymbol123" ; "no symbol")]
    #[test_case("Baaad1!xyz" ; "triple repeat")]
    #[test_case("MyPassword1!" ; "deny list")]
    #[test_case("Qwerty12#x" ; "keyboard walk")]
    #[test_case("Ab1!Ab1!" ; "repeating motif")]
    fn test_weak_passwords(password: &str) {
        let outcome = validate_password(password);
        assert!(!outcome.valid);
        assert!(outcome.reason.is_some());
    }

    #[test]
    fn test_password_upper_bound() {
        let long = format!("Aa1!{}", "xy".repeat(70));
        assert!(!validate_password(&long).valid);
    }

    #[test_case("Alice" ; "single word")]
    #[test_case("Mary-Jane" ; "hyphen")]
    #[test_case("O'Connor" ; "apostrophe")]
    #[test_case("José María" ; "accents and space")]
    fn test_valid_names(name: &str) {
        assert!(validate_name(name).valid);
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace only")]
    #[test_case("R2D2" ; "digits")]
    #[test_case("<script>" ; "markup")]
    fn test_invalid_names(name: &str) {
        assert!(!validate_name(name).valid);
    }

    #[test]
    fn test_name_length_limit() {
        assert!(validate_name(&"a".repeat(100)).valid);
        assert!(!validate_name(&"a".repeat(101)).valid);
    }

    #[test]
    fn test_registration_aggregates_every_failure() {
        let request = RegistrationRequest {
            email: "not-an-email".to_string(),
            password: "weak".to_string(),
            confirm_password: "different".to_string(),
            first_name: "".to_string(),
            last_name: "Sm1th".to_string(),
        };

        let errors = validate_registration(&request);
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "password", "confirmPassword", "firstName", "lastName"]);
    }

    #[test]
    fn test_registration_accepts_valid_input() {
        let request = RegistrationRequest {
            email: "  Alice@Example.com ".to_string(),
            password: "Str0ng!Pass".to_string(),
            confirm_password: "Str0ng!Pass".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Smith".to_string(),
        };

        assert!(validate_registration(&request).is_empty());
    }
}
