//! Masking of credentials when recordings are displayed.
//!
//! Recordings on disk keep every header and query parameter as received.
//! Redaction is applied only when a recording is rendered for a person.

use crate::core::recording::Headers;

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key"];

const SENSITIVE_QUERY_PARAMS: &[&str] = &["key", "apiKey", "api_key", "token", "access_token"];

pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

/// Copy of `headers` with credential values masked.
pub fn redact_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .map(|(name, values)| {
            let values = if is_sensitive_header(name) {
                vec![REDACTED.to_string(); values.len()]
            } else {
                values.clone()
            };
            (name.clone(), values)
        })
        .collect()
}

/// Mask the values of credential-bearing query parameters.
///
/// Parameter names match exactly; parameters without `=` pass through.
pub fn redact_query(query: &str) -> String {
    query
        .split('&')
        .map(|param| match param.split_once('=') {
            Some((key, _)) if SENSITIVE_QUERY_PARAMS.contains(&key) => {
                format!("{}={}", key, REDACTED)
            }
            _ => param.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}
