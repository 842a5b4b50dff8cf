// Error handling utilities for consistent error messages and exit codes

use std::process;

/// Exit with a user error (exit code 1)
/// User errors are for invalid input, missing resources, etc.
pub fn user_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

/// Exit with an internal error (exit code >1)
/// Internal errors are for unexpected system failures, database corruption, etc.
pub fn internal_error(message: &str) -> ! {
    eprintln!("Internal error: {}", message);
    process::exit(2);
}

/// Validate a row ID argument (positive integer)
pub fn validate_id(id_str: &str, kind: &str) -> Result<i64, String> {
    id_str.parse::<i64>()
        .map_err(|_| format!("Invalid {} ID: '{}'. {} ID must be a number.", kind, id_str, capitalize(kind)))
        .and_then(|id| {
            if id > 0 {
                Ok(id)
            } else {
                Err(format!("Invalid {} ID: {}. {} ID must be positive.", kind, id, capitalize(kind)))
            }
        })
}

/// Validate a template or project name.
///
/// Names may contain spaces and punctuation but must not be blank or purely
/// numeric, so that a command argument resolves unambiguously to an ID or a name.
pub fn validate_name(name: &str, kind: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("{} name cannot be empty", capitalize(kind)));
    }
    if name.trim() != name {
        return Err(format!("{} name cannot start or end with whitespace", capitalize(kind)));
    }
    if name.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Invalid {} name: '{}'. Names cannot be purely numeric.", kind, name));
    }
    Ok(())
}

/// Validate an optional non-negative amount (days, cost)
pub fn validate_non_negative<T>(value: Option<T>, field: &str) -> Result<(), String>
where
    T: PartialOrd + Default + std::fmt::Display + Copy,
{
    match value {
        Some(v) if v < T::default() => Err(format!("{} cannot be negative (got {})", field, v)),
        _ => Ok(()),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
