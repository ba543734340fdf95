//! Recording data model shared by the proxy (writer) and the offline tools (readers).
//!
//! One [`Recording`] is produced per inbound request. Recordings are persisted
//! as JSON Lines, one file per UTC calendar day, named `recordings-YYYY-MM-DD.jsonl`.

use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Marker prefixed to base64-encoded binary bodies.
pub const BINARY_BODY_PREFIX: &str = "base64:";

const DAY_FILE_PREFIX: &str = "recordings-";
const DAY_FILE_SUFFIX: &str = ".jsonl";

/// Multi-valued header map keyed by canonical header name.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Upstream LLM API vendor a request was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    OpenAI,
    Gemini,
    #[default]
    Unknown,
}

impl Provider {
    /// Providers that can have an upstream configured.
    pub const ROUTABLE: [Provider; 3] = [Provider::Claude, Provider::OpenAI, Provider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
            Provider::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Provider::Unknown)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Provider::Claude),
            "openai" => Ok(Provider::OpenAI),
            "gemini" => Ok(Provider::Gemini),
            "unknown" => Ok(Provider::Unknown),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Captured inbound request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Captured upstream response (or the locally generated error response).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    /// HTTP status, 0 until known
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub streaming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingData {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// One proxied request/response exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub provider: Provider,
    pub request: RequestData,
    pub response: ResponseData,
    pub timing: TimingData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Recording {
    /// Create the skeleton for a request that started at `started_at`.
    ///
    /// Headers and bodies start empty; `completed_at` equals `started_at`
    /// until [`Recording::finish`] is called.
    pub fn new(
        provider: Provider,
        method: impl Into<String>,
        path: impl Into<String>,
        query: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            provider,
            request: RequestData {
                method: method.into(),
                path: path.into(),
                query: query.into(),
                headers: Headers::new(),
                body: None,
            },
            response: ResponseData {
                status: 0,
                headers: Headers::new(),
                body: None,
                streaming: false,
            },
            timing: TimingData {
                started_at,
                completed_at: started_at,
                duration_ms: 0,
            },
            error: None,
        }
    }

    /// Stamp completion time and compute the whole-millisecond duration.
    pub fn finish(&mut self, completed_at: DateTime<Utc>) {
        let completed_at = completed_at.max(self.timing.started_at);
        self.timing.completed_at = completed_at;
        self.timing.duration_ms = (completed_at - self.timing.started_at).num_milliseconds();
    }

    /// Set the response status together with the error text.
    pub fn fail(&mut self, status: u16, error: impl Into<String>) {
        self.response.status = status;
        self.error = Some(error.into());
    }

    /// First 8 characters of the id, used in log lines.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    /// Encode as a single JSON Lines entry, including the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Encode a captured body: JSON value when it parses, raw text otherwise.
///
/// Returns `None` for an empty body and for a literal JSON `null`, which
/// would otherwise read back as an absent body.
pub fn encode_body(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}

/// Encode a buffered response body.
///
/// Non-JSON gzip payloads are stored as [`BINARY_BODY_PREFIX`] + base64 so the
/// raw bytes survive the text-only log format.
pub fn encode_response_body(bytes: &[u8], gzipped: bool) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return (!value.is_null()).then_some(value);
    }
    if gzipped {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        return Some(Value::String(format!("{}{}", BINARY_BODY_PREFIX, encoded)));
    }
    Some(Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Canonical `Title-Case` form of a header name (`x-api-key` -> `X-Api-Key`).
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Collect raw `(name, value)` pairs into a [`Headers`] map.
pub fn collect_headers<'a, I>(pairs: I) -> Headers
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut headers = Headers::new();
    for (name, value) in pairs {
        headers
            .entry(canonical_header_name(name))
            .or_default()
            .push(String::from_utf8_lossy(value).into_owned());
    }
    headers
}

/// Case-insensitive lookup of every value recorded for `name`.
pub fn header_values<'a>(headers: &'a Headers, name: &'a str) -> impl Iterator<Item = &'a str> {
    headers
        .iter()
        .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
        .flat_map(|(_, values)| values.iter().map(String::as_str))
}

/// Whether any `Content-Encoding` value mentions gzip.
pub fn is_gzip_encoded(headers: &Headers) -> bool {
    header_values(headers, "content-encoding").any(|v| v.to_lowercase().contains("gzip"))
}

/// File name holding the recordings written on `date`.
pub fn day_file_name(date: NaiveDate) -> String {
    format!("{}{}{}", DAY_FILE_PREFIX, date.format("%Y-%m-%d"), DAY_FILE_SUFFIX)
}

/// Parse the date out of a day file name; `None` for any other file.
pub fn parse_day_file_name(name: &str) -> Option<NaiveDate> {
    let date = name
        .strip_prefix(DAY_FILE_PREFIX)?
        .strip_suffix(DAY_FILE_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}
