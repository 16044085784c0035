//! Input validation helpers
//!
//! Email syntax, domain allowlist entries and API key names.

use lazy_static::lazy_static;
use regex::Regex;

const MAX_EMAIL_LENGTH: usize = 254;
const MAX_KEY_NAME_LENGTH: usize = 255;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$"
    )
    .expect("email regex is valid");
    static ref DOMAIN_RE: Regex = Regex::new(
        r"^[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$"
    )
    .expect("domain regex is valid");
}

/// Trim and lowercase an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check email syntax. A TLD is required.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return false;
    }
    if !EMAIL_RE.is_match(email) {
        return false;
    }

    match email.split_once('@') {
        Some((local, _)) => !local.contains(".."),
        None => false,
    }
}

/// Domain part of an address, lowercased.
pub fn email_domain(email: &str) -> Option<String> {
    email
        .split_once('@')
        .map(|(_, domain)| domain.to_ascii_lowercase())
}

/// Check a bare domain such as `company.com`.
pub fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty() && DOMAIN_RE.is_match(domain)
}

/// Validate allowlist entries, reporting the first bad one.
pub fn validate_domain_list(domains: &[String]) -> Result<(), String> {
    for domain in domains {
        if domain.is_empty() {
            return Err("empty domain entry".to_string());
        }
        if domain.chars().any(char::is_whitespace) {
            return Err(format!("domain {domain:?} contains whitespace"));
        }
        if !is_valid_domain(domain) {
            return Err(format!(
                "domain {domain:?} is not a valid domain (must have TLD, e.g. company.com)"
            ));
        }
    }
    Ok(())
}

/// Lowercase and trim allowlist entries, dropping blanks.
pub fn normalize_domain_list(domains: &[String]) -> Vec<String> {
    domains
        .iter()
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Validate a user-supplied API key name.
pub fn validate_api_key_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("key name must not be empty".to_string());
    }
    if name.chars().count() > MAX_KEY_NAME_LENGTH {
        return Err(format!(
            "key name must be at most {MAX_KEY_NAME_LENGTH} characters"
        ));
    }
    if name.chars().any(char::is_control) {
        return Err("key name must not contain control characters".to_string());
    }
    Ok(())
}
