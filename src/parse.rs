use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use crate::error::OutputError;

/// Extracts the body of the first Markdown code fence (```` ``` ```` or
/// ```` ```json ````) in model output, ignoring any prose around it. Text
/// without a fence is returned trimmed.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let rest = &trimmed[open + 3..];
    // Drop the info string ("json", "JSON", ...) up to the first newline
    let body = match rest.find('\n') {
        Some(newline) if rest[..newline].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &rest[newline + 1..],
        Some(_) | None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Parses free-text model output as `T` and validates it.
pub fn parse_and_validate<T>(raw: &str) -> Result<T, OutputError>
where
    T: DeserializeOwned + Validate,
{
    let parsed: T = serde_json::from_str(strip_code_fences(raw))?;
    parsed.validate()?;
    Ok(parsed)
}

/// Same check for output that already arrived as JSON.
pub fn validate_value<T>(value: Value) -> Result<T, OutputError>
where
    T: DeserializeOwned + Validate,
{
    let parsed: T = serde_json::from_value(value)?;
    parsed.validate()?;
    Ok(parsed)
}
