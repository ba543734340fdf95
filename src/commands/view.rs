//! `view`: print one recording in a readable layout.

use crate::commands::redaction::{redact_headers, redact_query};
use crate::core::error::LookupError;
use crate::core::recording::{is_gzip_encoded, Headers, Recording, BINARY_BODY_PREFIX};
use crate::core::store::RecordingStore;
use anyhow::{bail, Result};
use base64::Engine;
use chrono::SecondsFormat;
use clap::Args;
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// Bytes of compressed payload shown before the decompressed content.
const GZIP_PREVIEW_BYTES: usize = 100;

#[derive(Debug, Args)]
pub struct ViewArgs {
    /// Recording id or unambiguous id prefix; newest recording when omitted
    pub id: Option<String>,

    /// Path to recordings directory
    #[arg(long, default_value = "./recordings")]
    pub recordings: PathBuf,
}

pub fn run(args: &ViewArgs) -> Result<()> {
    let store = RecordingStore::new(&args.recordings);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let rec = match &args.id {
        None => {
            eprintln!("Warning: No recording ID provided, showing last recording\n");
            store.newest()?
        }
        Some(id) => match store.find(id) {
            Ok(rec) => rec,
            Err(LookupError::Ambiguous { prefix, candidates }) => {
                writeln!(
                    out,
                    "error: ambiguous recording ID '{}' matches multiple recordings:",
                    prefix
                )?;
                for candidate in &candidates {
                    writeln!(out, "  {}", candidate)?;
                }
                bail!("please provide more characters to uniquely identify the recording");
            }
            Err(e) => return Err(e.into()),
        },
    };

    render(&rec, &mut out)?;
    Ok(())
}

/// Render `rec` with credentials masked.
pub fn render(rec: &Recording, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "=== Recording {} ===", rec.id)?;
    writeln!(
        out,
        "Timestamp: {}",
        rec.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    )?;
    writeln!(out, "Provider: {}", rec.provider)?;
    writeln!(out, "Duration: {}ms", rec.timing.duration_ms)?;
    writeln!(out)?;

    writeln!(out, "--- Request ---")?;
    writeln!(out, "Method: {}", rec.request.method)?;
    writeln!(out, "Path: {}", rec.request.path)?;
    if !rec.request.query.is_empty() {
        writeln!(out, "Query: {}", redact_query(&rec.request.query))?;
    }
    write_headers(out, &redact_headers(&rec.request.headers))?;
    if let Some(body) = &rec.request.body {
        writeln!(out, "Body:")?;
        writeln!(out, "{}", pretty_json(body, "  "))?;
    }

    writeln!(out)?;
    writeln!(out, "--- Response ---")?;
    writeln!(out, "Status: {}", rec.response.status)?;
    writeln!(out, "Streaming: {}", rec.response.streaming)?;
    write_headers(out, &redact_headers(&rec.response.headers))?;
    if let Some(body) = &rec.response.body {
        writeln!(out, "Body:")?;
        let gzipped = is_gzip_encoded(&rec.response.headers);
        match body {
            Value::String(text) if gzipped => write_gzip_body(out, text)?,
            Value::String(text) if rec.response.streaming => write_sse_body(out, text)?,
            other => writeln!(out, "{}", pretty_json(other, "  "))?,
        }
    }
    if let Some(error) = &rec.error {
        writeln!(out)?;
        writeln!(out, "Error: {}", error)?;
    }
    Ok(())
}

fn write_headers(out: &mut impl Write, headers: &Headers) -> io::Result<()> {
    if headers.is_empty() {
        return Ok(());
    }
    writeln!(out, "Headers:")?;
    for (name, values) in headers {
        for value in values {
            writeln!(out, "  {}: {}", name, value)?;
        }
    }
    Ok(())
}

/// Pretty JSON where every line after the first carries `prefix`.
fn pretty_json(value: &Value, prefix: &str) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    pretty.replace('\n', &format!("\n{}", prefix))
}

/// One server-sent event reassembled from a recorded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Group `event:`/`data:` lines into events.
///
/// Only named events are kept; multiple `data:` lines join with `\n`.
pub fn parse_sse_events(body: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut event = String::new();
    let mut data = String::new();

    let mut flush = |event: &mut String, data: &mut String| {
        if !event.is_empty() && !data.is_empty() {
            events.push(SseEvent {
                event: std::mem::take(event),
                data: std::mem::take(data),
            });
        }
    };

    for line in body.split('\n').map(|l| l.trim_end_matches('\r')) {
        if let Some(name) = line.strip_prefix("event: ") {
            flush(&mut event, &mut data);
            data.clear();
            event = name.to_string();
        } else if let Some(content) = line.strip_prefix("data: ") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(content);
        } else if line.is_empty() && !event.is_empty() && !data.is_empty() {
            flush(&mut event, &mut data);
        }
    }
    flush(&mut event, &mut data);
    events
}

fn write_sse_body(out: &mut impl Write, body: &str) -> io::Result<()> {
    for SseEvent { event, data } in parse_sse_events(body) {
        writeln!(out)?;
        writeln!(out, "  Event: {}", event)?;
        match serde_json::from_str::<Value>(&data) {
            Ok(json) => writeln!(out, "    {}", pretty_json(&json, "    "))?,
            Err(_) => {
                for line in data.split('\n') {
                    writeln!(out, "    {}", line)?;
                }
            }
        }
    }
    Ok(())
}

/// Compressed bytes of a recorded gzip body.
///
/// Bodies written with the binary marker are base64; older recordings hold
/// the payload as (possibly mangled) text.
pub fn gzip_payload(body: &str) -> Result<Vec<u8>, base64::DecodeError> {
    match body.strip_prefix(BINARY_BODY_PREFIX) {
        Some(encoded) => base64::engine::general_purpose::STANDARD.decode(encoded),
        None => Ok(body.as_bytes().to_vec()),
    }
}

pub fn decompress_gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    GzDecoder::new(data).read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

fn write_gzip_body(out: &mut impl Write, body: &str) -> io::Result<()> {
    let payload = match gzip_payload(body) {
        Ok(payload) => payload,
        Err(e) => {
            writeln!(out)?;
            writeln!(out, "  [Failed to decode base64: {}]", e)?;
            return Ok(());
        }
    };

    writeln!(out)?;
    writeln!(
        out,
        "  [Gzipped Content - showing first {} bytes]",
        GZIP_PREVIEW_BYTES
    )?;
    let preview = &payload[..payload.len().min(GZIP_PREVIEW_BYTES)];
    writeln!(out, "  \"{}\"...", preview.escape_ascii())?;

    let decompressed = match decompress_gzip(&payload) {
        Ok(decompressed) => decompressed,
        Err(e) => {
            writeln!(out)?;
            writeln!(out, "  [Failed to decompress: {}]", e)?;
            return Ok(());
        }
    };

    writeln!(out)?;
    writeln!(out, "  [Decompressed Content]")?;
    match serde_json::from_slice::<Value>(&decompressed) {
        Ok(json) => writeln!(out, "{}", pretty_json(&json, "  ")),
        Err(_) => writeln!(out, "{}", String::from_utf8_lossy(&decompressed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recording::{collect_headers, encode_response_body, Provider};
    use chrono::Utc;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn rendered(rec: &Recording) -> String {
        let mut out = Vec::new();
        render(rec, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_sse_events() {
        let body = "event: message_start\ndata: {\"type\":\"message_start\"}\n\n\
                    event: content_block_delta\ndata: line1\ndata: line2\n\n\
                    data: [DONE]\n\n";
        let events = parse_sse_events(body);
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "message_start".to_string(),
                    data: "{\"type\":\"message_start\"}".to_string(),
                },
                SseEvent {
                    event: "content_block_delta".to_string(),
                    data: "line1\nline2".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_sse_events_with_crlf_and_unterminated_tail() {
        let body = "event: ping\r\ndata: {}\r\n\r\nevent: message_stop\r\ndata: {\"x\":1}";
        let events = parse_sse_events(body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "ping");
        assert_eq!(events[1].data, "{\"x\":1}");
    }

    #[test]
    fn test_gzip_payload_and_decompress() {
        let compressed = gzip(br#"{"ok":true}"#);
        let stored = encode_response_body(&compressed, true).unwrap();
        let payload = gzip_payload(stored.as_str().unwrap()).unwrap();
        assert_eq!(payload, compressed);
        assert_eq!(decompress_gzip(&payload).unwrap(), br#"{"ok":true}"#);

        assert!(gzip_payload("base64:***").is_err());
        assert!(decompress_gzip(b"not gzip").is_err());
    }

    #[test]
    fn test_render_redacts_credentials() {
        let mut rec = Recording::new(
            Provider::Gemini,
            "POST",
            "/v1beta/models/gemini-pro:generateContent",
            "key=AIza-secret&alt=sse",
            Utc::now(),
        );
        rec.request.headers = collect_headers([
            ("authorization", b"Bearer sk-secret".as_slice()),
            ("x-api-key", b"sk-other".as_slice()),
            ("content-type", b"application/json".as_slice()),
        ]);
        rec.request.body = Some(json!({"contents": []}));
        rec.response.status = 200;

        let text = rendered(&rec);
        assert!(text.contains("Provider: gemini"));
        assert!(text.contains("Query: key=[REDACTED]&alt=sse"));
        assert!(text.contains("  Authorization: [REDACTED]"));
        assert!(text.contains("  X-Api-Key: [REDACTED]"));
        assert!(text.contains("  Content-Type: application/json"));
        assert!(!text.contains("secret"));
        assert!(!text.contains("sk-other"));
    }

    #[test]
    fn test_render_streaming_body_as_events() {
        let mut rec = Recording::new(Provider::Claude, "POST", "/v1/messages", "", Utc::now());
        rec.response.status = 200;
        rec.response.streaming = true;
        rec.response.body = Some(Value::String(
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_string(),
        ));

        let text = rendered(&rec);
        assert!(text.contains("Streaming: true"));
        assert!(text.contains("  Event: message_stop"));
        assert!(text.contains("\"type\": \"message_stop\""));
    }

    #[test]
    fn test_render_gzip_body_decompressed() {
        let compressed = gzip(br#"{"answer":42}"#);
        let mut rec = Recording::new(Provider::OpenAI, "GET", "/v1/models", "", Utc::now());
        rec.response.status = 200;
        rec.response.headers = collect_headers([("content-encoding", b"gzip".as_slice())]);
        rec.response.body = encode_response_body(&compressed, true);

        let text = rendered(&rec);
        assert!(text.contains("[Gzipped Content - showing first 100 bytes]"));
        assert!(text.contains("[Decompressed Content]"));
        assert!(text.contains("\"answer\": 42"));
    }

    #[test]
    fn test_render_error_recording() {
        let mut rec = Recording::new(Provider::Claude, "POST", "/v1/messages", "", Utc::now());
        rec.fail(502, "upstream request failed: connection refused");
        let text = rendered(&rec);
        assert!(text.contains("Status: 502"));
        assert!(text.contains("Error: upstream request failed: connection refused"));
    }
}
