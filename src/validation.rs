//! Syntactic checks on request fields.
//!
//! Every check returns human-readable messages rather than failing fast, so
//! a caller sees all problems with a request at once.

use crate::naming::Environment;

pub const MAX_ENTRY_CHARS: usize = 500;

/// Validate the fields of an `add` request.
///
/// `environment` and `tenant` are only checked when present; a missing
/// required field is reported by the handler before validation runs.
pub fn validate_input(entry: &str, environment: Option<&str>, tenant: Option<&str>) -> Vec<String> {
    let mut errors = Vec::new();

    if entry.trim().is_empty() {
        errors.push("Entry cannot be empty".to_string());
    } else if entry.chars().count() > MAX_ENTRY_CHARS {
        errors.push(format!("Entry too long (max {MAX_ENTRY_CHARS} characters)"));
    } else if entry.contains(['\n', '\r']) {
        errors.push("Entry must be a single line".to_string());
    }

    errors.extend(environment.and_then(validate_environment));
    errors.extend(tenant.and_then(validate_tenant));

    errors
}

pub fn validate_environment(environment: &str) -> Option<String> {
    if environment.parse::<Environment>().is_ok() {
        return None;
    }
    let allowed: Vec<&str> = Environment::ALL.iter().map(|env| env.as_str()).collect();
    Some(format!("Environment must be one of: {}", allowed.join(", ")))
}

/// Tenants are used as path segments: letters, digits, `-` and `_` only, and
/// at least one letter or digit.
pub fn validate_tenant(tenant: &str) -> Option<String> {
    let mut significant = tenant.chars().filter(|c| *c != '-' && *c != '_').peekable();
    let valid = significant.peek().is_some() && significant.all(char::is_alphanumeric);
    if valid {
        None
    } else {
        Some("Tenant name can only contain letters, numbers, hyphens, and underscores".to_string())
    }
}

/// The file name is joined onto repository paths and URLs, so it must be a
/// single plain segment.
pub fn validate_file_name(file: &str) -> Option<String> {
    let valid = !file.is_empty()
        && file != "."
        && file != ".."
        && !file.contains(['/', '\\'])
        && !file.chars().any(char::is_control);
    if valid {
        None
    } else {
        Some("File name must be a plain file name without path separators".to_string())
    }
}
