//! Validation and normalization of inbound lead submissions.
//!
//! Everything here is pure. `validate_lead` reports every failing field at
//! once; `normalize_submission` validates and then produces the canonical
//! [`NewLead`] that gets persisted.
//!
//! `sanitize_input` only strips tag-like substrings. It does not defend against
//! attribute-based or entity-encoded payloads; output must still be escaped by
//! whatever renders it.

use crate::errors::FieldErrors;
use crate::models::{Attribution, LeadSubmission, LineOfBusiness, NewLead};
use regex::Regex;
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static ZIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{5}(-\d{4})?$").unwrap());
static STATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z]{2}$").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Result of validating a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: FieldErrors,
}

/// Conservative `local@domain.tld` check.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

/// 10 digits, or 11 with a country code, once formatting is stripped.
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    digits == 10 || digits == 11
}

/// `NNNNN` or `NNNNN-NNNN`.
pub fn is_valid_zip(zip: &str) -> bool {
    ZIP_RE.is_match(zip.trim())
}

/// Strips formatting and a leading `1` country code.
///
/// `"1-555-123-4567"` and `"(555) 123-4567"` both become `"5551234567"`.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.strip_prefix('1') {
        Some(rest) if digits.len() == 11 => rest.to_string(),
        _ => digits,
    }
}

/// Keeps the leading five digits: `"55401-1234"` becomes `"55401"`.
pub fn normalize_zip(zip: &str) -> String {
    let cleaned: String = zip
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();

    cleaned
        .split('-')
        .next()
        .unwrap_or_default()
        .chars()
        .take(5)
        .collect()
}

/// Removes HTML tag-like substrings and surrounding whitespace.
pub fn sanitize_input(input: &str) -> String {
    TAG_RE.replace_all(input, "").trim().to_string()
}

fn normalize_email(email: &str) -> String {
    sanitize_input(&email.to_lowercase())
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| sanitize_input(v).is_empty())
}

/// Validates a raw submission, collecting a message for every failing field.
pub fn validate_lead(data: &LeadSubmission) -> ValidationResult {
    let mut errors = FieldErrors::new();
    let mut fail = |field: &str, message: &str| {
        errors.insert(field.to_string(), message.to_string());
    };

    if is_blank(data.first_name.as_deref()) {
        fail("first_name", "First name is required");
    }

    if is_blank(data.last_name.as_deref()) {
        fail("last_name", "Last name is required");
    }

    match data.email.as_deref() {
        Some(email) if !email.trim().is_empty() => {
            // Checked in the form it will be stored in
            if !is_valid_email(&normalize_email(email)) {
                fail("email", "Invalid email format");
            }
        }
        _ => fail("email", "Email is required"),
    }

    match data.phone.as_deref() {
        Some(phone) if !phone.trim().is_empty() => {
            if !is_valid_phone(phone) {
                fail("phone", "Invalid phone number (must be 10 digits)");
            }
        }
        _ => fail("phone", "Phone number is required"),
    }

    match data.zip.as_deref() {
        Some(zip) if !zip.trim().is_empty() => {
            if !is_valid_zip(zip) {
                fail("zip", "Invalid ZIP code format");
            }
        }
        _ => fail("zip", "ZIP code is required"),
    }

    match data.state.as_deref() {
        Some(state) if !state.trim().is_empty() => {
            if !STATE_RE.is_match(&sanitize_input(state)) {
                fail("state", "Invalid state code");
            }
        }
        _ => fail("state", "State is required"),
    }

    if is_blank(data.city.as_deref()) {
        fail("city", "City is required");
    }

    let line = data
        .line_of_business
        .as_deref()
        .filter(|l| !l.trim().is_empty());
    match line.map(str::parse::<LineOfBusiness>) {
        None => fail("line_of_business", "Please select a line of business"),
        Some(Err(_)) => fail("line_of_business", "Invalid line of business"),
        Some(Ok(LineOfBusiness::Commercial)) if is_blank(data.commercial_type.as_deref()) => {
            fail(
                "commercial_type",
                "Commercial type is required for commercial insurance",
            );
        }
        Some(Ok(_)) => {}
    }

    if data.consent_tcpa != Some(true) {
        fail("consent_tcpa", "You must agree to be contacted");
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

fn sanitize_optional(value: Option<&str>) -> Option<String> {
    value.map(sanitize_input).filter(|v| !v.is_empty())
}

fn sanitize_attribution(raw: &Attribution) -> Attribution {
    Attribution {
        utm_source: sanitize_optional(raw.utm_source.as_deref()),
        utm_medium: sanitize_optional(raw.utm_medium.as_deref()),
        utm_campaign: sanitize_optional(raw.utm_campaign.as_deref()),
        utm_term: sanitize_optional(raw.utm_term.as_deref()),
        utm_content: sanitize_optional(raw.utm_content.as_deref()),
        gclid: sanitize_optional(raw.gclid.as_deref()),
        gbraid: sanitize_optional(raw.gbraid.as_deref()),
        wbraid: sanitize_optional(raw.wbraid.as_deref()),
    }
}

/// Validates and canonicalizes a submission.
///
/// Phone becomes 10 digits, ZIP 5 digits, state uppercase, email lowercase.
/// A commercial sub-type sent with a non-commercial line is dropped.
pub fn normalize_submission(data: &LeadSubmission) -> Result<NewLead, FieldErrors> {
    let result = validate_lead(data);
    if !result.valid {
        return Err(result.errors);
    }

    let text = |value: &Option<String>| sanitize_input(value.as_deref().unwrap_or_default());

    let line_of_business = data
        .line_of_business
        .as_deref()
        .unwrap_or_default()
        .parse::<LineOfBusiness>()
        .map_err(|e| FieldErrors::from([("line_of_business".to_string(), e)]))?;

    let commercial_type = match line_of_business {
        LineOfBusiness::Commercial => sanitize_optional(data.commercial_type.as_deref()),
        _ => None,
    };

    Ok(NewLead {
        first_name: text(&data.first_name),
        last_name: text(&data.last_name),
        email: normalize_email(data.email.as_deref().unwrap_or_default()),
        phone: normalize_phone(data.phone.as_deref().unwrap_or_default()),
        zip: normalize_zip(data.zip.as_deref().unwrap_or_default()),
        state: sanitize_input(&data.state.as_deref().unwrap_or_default().to_uppercase()),
        city: text(&data.city),
        line_of_business,
        commercial_type,
        consent_tcpa: true,
        attribution: sanitize_attribution(&data.attribution),
    })
}
