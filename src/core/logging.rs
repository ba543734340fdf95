//! Logging setup and the per-request completion log line.

use crate::core::config::{LogFormat, LoggingConfig};
use crate::core::recording::Recording;
use chrono::Local;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Custom time formatter that uses local timezone (respects TZ environment variable)
struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%H:%M:%S"))
    }
}

/// Map a configured level name onto a tracing directive.
fn normalize_level(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Build the filter directive string.
///
/// `RUST_LOG` wins over the configured level. Noise suppression for the HTTP
/// stack is always appended, otherwise `RUST_LOG=trace` floods the output.
fn filter_directives(level: &str, rust_log: Option<String>) -> String {
    let base = rust_log
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| normalize_level(level).to_string());
    format!("{},hyper=warn,hyper::proto=warn,h2=warn,reqwest=warn", base)
}

/// Install the global tracing subscriber.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::new(filter_directives(
        &config.level,
        std::env::var("RUST_LOG").ok(),
    ));
    // NO_COLOR disables ANSI codes (e.g. when logging to a file)
    let no_color = std::env::var("NO_COLOR").is_ok();

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
        LogFormat::Plain => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_timer(LocalTime)
                    .with_target(false)
                    .with_ansi(!no_color),
            )
            .init(),
    }
}

/// Emit the `request completed` line for a finalized recording.
///
/// Level is info for 1xx/2xx (and status 0), warn for 3xx or when an error
/// is set below 400, error for 4xx/5xx.
pub fn log_request_completed(rec: &Recording) {
    let id = rec.short_id();
    let provider = rec.provider.as_str();
    let status = rec.response.status;
    let duration_ms = rec.timing.duration_ms;
    let path = rec.request.path.as_str();
    let error = rec.error.as_deref();

    match status {
        400.. => tracing::error!(id, provider, status, duration_ms, path, error, "request completed"),
        300..=399 => tracing::warn!(id, provider, status, duration_ms, path, error, "request completed"),
        _ if error.is_some() => {
            tracing::warn!(id, provider, status, duration_ms, path, error, "request completed")
        }
        _ => tracing::info!(id, provider, status, duration_ms, path, error, "request completed"),
    }
}
