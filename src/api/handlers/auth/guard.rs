//! Input validation and sanitization for auth payloads.
//!
//! Flow Overview: every inbound credential or profile field passes through here
//! before it reaches the rate limiter or the identity provider. Failures are
//! collected into a stable `{field, message}` list (declaration order, at most
//! one entry per field) and answered with 400. Accepted free text is
//! HTML-escaped before it is forwarded.

use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::provider::Profile;
use super::types::{LoginRequest, RegisterRequest};

pub(crate) const PASSWORD_MIN_CHARS: usize = 8;
pub(crate) const PASSWORD_MAX_CHARS: usize = 128;
const EMAIL_MAX_CHARS: usize = 254;
const NAME_MAX_CHARS: usize = 100;
const COMPANY_MAX_CHARS: usize = 200;
const QUERY_PARAM_MAX_CHARS: usize = 512;

/// A single field-level validation failure.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Ordered list of field failures; empty means the payload is acceptable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        if self.0.iter().any(|error| error.field == field) {
            return;
        }
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.0.iter().map(|error| error.field.as_str()).collect()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<FieldError> {
        self.0
    }

    fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

/// Which password rules apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PasswordPolicy {
    /// Length bounds only.
    Login,
    /// Length bounds plus upper, lower, digit and symbol.
    Registration,
}

/// Validated registration input.
pub struct Registration {
    pub email: String,
    pub password: SecretString,
    pub profile: Profile,
}

/// Validated login input.
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
    pub remember_me: bool,
}

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// addr-spec check on already-normalized input: dot-atom local part, dotted
/// domain labels that neither start nor end with a hyphen.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    if email_normalized.chars().count() > EMAIL_MAX_CHARS {
        return false;
    }
    Regex::new(
        r"^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$",
    )
    .is_ok_and(|regex| regex.is_match(email_normalized))
}

fn check_email(errors: &mut ValidationErrors, email: &str) -> String {
    let normalized = normalize_email(email);
    if normalized.is_empty() {
        errors.push("email", "email is required");
    } else if !valid_email(&normalized) {
        errors.push("email", "email is not a valid address");
    }
    normalized
}

pub(crate) fn check_password(errors: &mut ValidationErrors, password: &str, policy: PasswordPolicy) {
    let length = password.chars().count();
    if !(PASSWORD_MIN_CHARS..=PASSWORD_MAX_CHARS).contains(&length) {
        errors.push(
            "password",
            format!(
                "password must be between {PASSWORD_MIN_CHARS} and {PASSWORD_MAX_CHARS} characters"
            ),
        );
        return;
    }

    if policy == PasswordPolicy::Registration {
        let has_upper = password.chars().any(char::is_uppercase);
        let has_lower = password.chars().any(char::is_lowercase);
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        let has_symbol = password
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace());
        if !(has_upper && has_lower && has_digit && has_symbol) {
            errors.push(
                "password",
                "password must contain an uppercase letter, a lowercase letter, a digit and a symbol",
            );
        }
    }
}

fn contains_markup(value: &str) -> bool {
    Regex::new(r"(?i)(<\s*/?\s*[a-z!?]|javascript\s*:|vbscript\s*:|\bon[a-z]+\s*=|data\s*:\s*text/html)")
        .is_ok_and(|regex| regex.is_match(value))
}

fn allowed_free_text(value: &str) -> bool {
    Regex::new(r"^[\p{Latin}\p{Bengali}\p{M}\p{N}\s.,'&()/#:-]*$")
        .is_ok_and(|regex| regex.is_match(value))
}

fn contains_sql_meta(value: &str) -> bool {
    Regex::new(
        r#"(?i)('|"|;|--|/\*|\*/|\bunion\s+(all\s+)?select\b|\bdrop\s+table\b|\binsert\s+into\b|\bdelete\s+from\b|\bor\s+1\s*=\s*1\b)"#,
    )
    .is_ok_and(|regex| regex.is_match(value))
}

/// Validate optional free text. Returns the escaped value when present and
/// acceptable; `None` when absent, blank, or rejected.
pub(crate) fn check_free_text(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&str>,
    max_chars: usize,
) -> Option<String> {
    let trimmed = value.map(str::trim).filter(|value| !value.is_empty())?;

    if trimmed.chars().count() > max_chars {
        errors.push(field, format!("{field} must be at most {max_chars} characters"));
        return None;
    }
    if contains_markup(trimmed) {
        errors.push(field, format!("{field} must not contain markup or script content"));
        return None;
    }
    if !allowed_free_text(trimmed) {
        errors.push(field, format!("{field} contains unsupported characters"));
        return None;
    }

    Some(html_escape(trimmed))
}

/// Reject read-path parameters (path segments, query values) that carry SQL
/// metacharacters or are blank/oversized.
///
/// # Errors
/// Returns a single-entry `ValidationErrors` naming `field`.
pub fn check_query_param(field: &str, value: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.push(field, format!("{field} is required"));
    } else if trimmed.chars().count() > QUERY_PARAM_MAX_CHARS {
        errors.push(
            field,
            format!("{field} must be at most {QUERY_PARAM_MAX_CHARS} characters"),
        );
    } else if contains_sql_meta(trimmed) || contains_markup(trimmed) {
        errors.push(field, format!("{field} contains forbidden characters"));
    }
    errors.into_result(())
}

/// Escape text for safe embedding in HTML.
pub(crate) fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Validate and sanitize a registration payload.
///
/// # Errors
/// Returns every failing field in declaration order.
pub fn validate_register(request: &RegisterRequest) -> Result<Registration, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let email = check_email(&mut errors, &request.email);
    check_password(&mut errors, &request.password, PasswordPolicy::Registration);
    let name = check_free_text(&mut errors, "name", request.name.as_deref(), NAME_MAX_CHARS);
    let company = check_free_text(
        &mut errors,
        "company",
        request.company.as_deref(),
        COMPANY_MAX_CHARS,
    );

    errors.into_result(Registration {
        email,
        password: SecretString::from(request.password.clone()),
        profile: Profile { name, company },
    })
}

/// Validate a login payload. Only length bounds apply to the password so that
/// accounts created under older rules can still sign in.
///
/// # Errors
/// Returns every failing field in declaration order.
pub fn validate_login(request: &LoginRequest) -> Result<Credentials, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let email = check_email(&mut errors, &request.email);
    check_password(&mut errors, &request.password, PasswordPolicy::Login);

    errors.into_result(Credentials {
        email,
        password: SecretString::from(request.password.clone()),
        remember_me: request.remember_me,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: None,
            company: None,
        }
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_addr_spec() {
        assert!(valid_email("a@b.com"));
        assert!(valid_email("name.surname+tag@mail.example.co"));
        assert!(valid_email("o'brien@example.ie"));
    }

    #[test]
    fn valid_email_rejects_malformed() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
        assert!(!valid_email("a@localhost"));
        assert!(!valid_email("double..dot@example.com"));
        assert!(!valid_email("a@-example.com"));
        assert!(!valid_email(&format!("{}@example.com", "a".repeat(250))));
    }

    #[test]
    fn register_accepts_strong_password() {
        let registration = validate_register(&register_request(" A@B.com ", "Aa12345!"));
        assert!(registration.is_ok());
        if let Ok(registration) = registration {
            assert_eq!(registration.email, "a@b.com");
            assert_eq!(registration.password.expose_secret(), "Aa12345!");
        }
    }

    #[test]
    fn register_rejects_weak_password_naming_field() {
        let result = validate_register(&register_request("a@b.com", "weak"));
        let errors = result.err().map(ValidationErrors::into_inner).unwrap_or_default();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "password");
    }

    #[test]
    fn register_requires_symbol() {
        let result = validate_register(&register_request("a@b.com", "Aa123456"));
        let fields = result.err().map(|errors| {
            errors.fields().into_iter().map(str::to_string).collect::<Vec<_>>()
        });
        assert_eq!(fields, Some(vec!["password".to_string()]));
    }

    #[test]
    fn password_upper_bound_enforced() {
        let mut errors = ValidationErrors::default();
        check_password(&mut errors, &"a".repeat(129), PasswordPolicy::Login);
        assert_eq!(errors.fields(), vec!["password"]);

        let mut errors = ValidationErrors::default();
        check_password(&mut errors, &"a".repeat(128), PasswordPolicy::Login);
        assert!(errors.is_empty());
    }

    #[test]
    fn login_only_checks_length() {
        let request = LoginRequest {
            email: "a@b.com".to_string(),
            password: "alllowercase".to_string(),
            remember_me: true,
        };
        let credentials = validate_login(&request);
        assert!(credentials.is_ok_and(|credentials| credentials.remember_me));
    }

    #[test]
    fn errors_keep_declaration_order() {
        let result = validate_register(&RegisterRequest {
            email: "nope".to_string(),
            password: "x".to_string(),
            name: Some("<b>bold</b>".to_string()),
            company: Some("Acme".to_string()),
        });
        let fields = result.err().map(|errors| {
            errors.fields().into_iter().map(str::to_string).collect::<Vec<_>>()
        });
        assert_eq!(
            fields,
            Some(vec![
                "email".to_string(),
                "password".to_string(),
                "name".to_string()
            ])
        );
    }

    #[test]
    fn free_text_accepts_bengali_and_escapes() {
        let mut errors = ValidationErrors::default();
        let value = check_free_text(&mut errors, "company", Some("রহিম & Sons"), 200);
        assert!(errors.is_empty());
        assert_eq!(value.as_deref(), Some("রহিম &amp; Sons"));
    }

    #[test]
    fn free_text_rejects_script_injection() {
        for payload in [
            "<script>alert(1)</script>",
            "javascript:alert(1)",
            "x onload=alert(1)",
        ] {
            let mut errors = ValidationErrors::default();
            let value = check_free_text(&mut errors, "name", Some(payload), 100);
            assert!(value.is_none(), "accepted {payload}");
            assert_eq!(errors.fields(), vec!["name"]);
        }
    }

    #[test]
    fn free_text_rejects_unsupported_script_and_length() {
        let mut errors = ValidationErrors::default();
        assert!(check_free_text(&mut errors, "name", Some("Привет"), 100).is_none());
        assert_eq!(errors.fields(), vec!["name"]);

        let mut errors = ValidationErrors::default();
        let long = "a".repeat(COMPANY_MAX_CHARS + 1);
        assert!(check_free_text(&mut errors, "company", Some(&long), COMPANY_MAX_CHARS).is_none());
        assert_eq!(errors.fields(), vec!["company"]);
    }

    #[test]
    fn blank_free_text_is_absent() {
        let mut errors = ValidationErrors::default();
        assert!(check_free_text(&mut errors, "name", Some("   "), 100).is_none());
        assert!(errors.is_empty());
    }

    #[test]
    fn query_param_rejects_sql_meta() {
        assert!(check_query_param("provider", "google").is_ok());
        assert!(check_query_param("code", "4f1c-9b2e_abc.def~x").is_ok());
        assert!(check_query_param("provider", "google' OR 1=1 --").is_err());
        assert!(check_query_param("code", "x; DROP TABLE users").is_err());
        assert!(check_query_param("code", "1 UNION SELECT password").is_err());
        assert!(check_query_param("code", " ").is_err());
    }

    #[test]
    fn html_escape_covers_special_characters() {
        assert_eq!(
            html_escape(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }
}
