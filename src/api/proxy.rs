//! Transparent forwarding of provider API calls.
//!
//! Every request that is not `/health` lands here. The path decides the
//! provider, the request is re-issued against that provider's upstream with
//! the original method, query, headers and body, and the response is relayed
//! back while being captured into a [`Recording`].

use crate::api::guard::RecordingGuard;
use crate::api::handlers::AppState;
use crate::api::streaming::{channel_body, relay_buffered, relay_lines, RELAY_CHANNEL_CAPACITY};
use crate::core::error::{AppError, Result};
use crate::core::recording::{collect_headers, encode_body, Provider, Recording};
use crate::services::provider_detector::ProviderDetector;
use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::{request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;

/// Request headers that describe the inbound connection rather than the call.
const HOP_REQUEST_HEADERS: &[&str] = &["host", "content-length", "transfer-encoding"];

/// Response header the server recomputes for the client connection.
const HOP_RESPONSE_HEADER: &str = "transfer-encoding";

/// Catch-all proxy handler.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let started_at = Utc::now();
    let (parts, body) = request.into_parts();

    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or_default().to_string();
    let provider = ProviderDetector::detect(&path);

    let mut rec = Recording::new(provider, parts.method.as_str(), path, query, started_at);
    rec.request.headers = collect_headers(header_pairs(&parts.headers));
    let mut guard = RecordingGuard::new(rec, state.recorder.clone());

    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr.to_string());

    match forward(&state, &parts, body, remote_addr.as_deref(), &mut guard).await {
        Ok(upstream) => relay(upstream, guard),
        Err(err) => {
            guard.fail(err.status().as_u16(), err.to_string());
            err.into_response()
        }
    }
}

/// Upstream response ready to be relayed.
struct Upstream {
    response: reqwest::Response,
    streaming: bool,
}

async fn forward(
    state: &AppState,
    parts: &Parts,
    body: Body,
    remote_addr: Option<&str>,
    rec: &mut Recording,
) -> Result<Upstream> {
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| AppError::BadRequest("failed to read request body".to_string()))?;
    rec.request.body = encode_body(&body);

    if rec.provider == Provider::Unknown {
        tracing::warn!(
            id = %rec.short_id(),
            method = %parts.method,
            path = %rec.request.path,
            host = header_str(&parts.headers, "host").unwrap_or_default(),
            remote_addr = remote_addr.unwrap_or("unknown"),
            user_agent = header_str(&parts.headers, "user-agent").unwrap_or_default(),
            "unknown API endpoint"
        );
        return Err(AppError::UnknownEndpoint);
    }

    let upstream = state
        .config
        .upstream_for(rec.provider)
        .ok_or(AppError::ProviderNotConfigured(rec.provider))?;

    let mut url = format!("{}{}", upstream.upstream_url, rec.request.path);
    if !rec.request.query.is_empty() {
        url.push('?');
        url.push_str(&rec.request.query);
    }

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|e| AppError::Internal(format!("failed to create upstream request: {}", e)))?;

    let mut builder = state.http_client.request(method, &url);
    for (name, value) in parts.headers.iter() {
        if HOP_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    tracing::debug!(
        id = %rec.short_id(),
        provider = %rec.provider,
        upstream = %upstream.upstream_url,
        path = %rec.request.path,
        "forwarding request"
    );

    let response = builder.body(body).send().await.map_err(|e| {
        tracing::error!(
            id = %rec.short_id(),
            provider = %rec.provider,
            path = %rec.request.path,
            error = %e,
            "upstream request failed"
        );
        AppError::Upstream(e)
    })?;

    rec.response.status = response.status().as_u16();
    rec.response.headers = collect_headers(
        response
            .headers()
            .iter()
            .filter(|(name, _)| name.as_str() != HOP_RESPONSE_HEADER)
            .map(|(name, value)| (name.as_str(), value.as_bytes())),
    );

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let streaming = is_streaming_content_type(content_type);
    rec.response.streaming = streaming;

    Ok(Upstream {
        response,
        streaming,
    })
}

/// Send status and headers now, relay the body from a background task.
///
/// The task owns the guard, so the recording is finalized when the relay
/// ends, whether the body completed or the client went away.
fn relay(upstream: Upstream, mut guard: RecordingGuard) -> Response {
    let Upstream {
        response,
        streaming,
    } = upstream;

    let mut builder = Response::builder().status(response.status().as_u16());
    for (name, value) in response.headers() {
        let name = name.as_str();
        // the line relay may add a terminator the upstream length does not cover
        if name == HOP_RESPONSE_HEADER || (streaming && name == "content-length") {
            continue;
        }
        builder = builder.header(name, value.as_bytes());
    }

    let (mut sink, body) = channel_body(RELAY_CHANNEL_CAPACITY);
    let client_response = match builder.body(body) {
        Ok(client_response) => client_response,
        Err(e) => {
            let err = AppError::Internal(format!("failed to build response: {}", e));
            guard.fail(err.status().as_u16(), err.to_string());
            return err.into_response();
        }
    };

    guard.responded();
    tokio::spawn(async move {
        let stream = response.bytes_stream();
        if streaming {
            relay_lines(stream, &mut sink, &mut guard).await;
        } else {
            relay_buffered(stream, &mut sink, &mut guard).await;
        }
        // recording is queued before the client sees end of body
        drop(guard);
        drop(sink);
    });

    client_response
}

fn is_streaming_content_type(content_type: &str) -> bool {
    content_type.contains("text/event-stream") || content_type.contains("stream")
}

fn header_pairs(headers: &HeaderMap) -> impl Iterator<Item = (&str, &[u8])> {
    headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_bytes()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::{build_router, create_http_client};
    use crate::core::config::{AppConfig, ProviderConfig};
    use crate::core::recorder::Recorder;
    use axum::http::StatusCode;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Router plus the raw receiving end of its recorder queue (no worker).
    fn app_with_queue(
        upstream: &MockServer,
        queue_size: usize,
    ) -> (axum::Router, Arc<Recorder>, mpsc::Receiver<Recording>) {
        let mut config = AppConfig::default();
        for provider in Provider::ROUTABLE {
            config
                .providers
                .insert(provider.to_string(), ProviderConfig::new(upstream.uri()));
        }
        let (recorder, receiver) = Recorder::detached(queue_size);
        let recorder = Arc::new(recorder);
        let client = create_http_client(&config).unwrap();
        let state = Arc::new(AppState::new(config, client, recorder.clone()));
        (build_router(state), recorder, receiver)
    }

    fn post(uri: &str, body: &str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_queue_overflow_drops_one_and_serves_everyone() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&upstream)
            .await;

        // nothing drains the queue, so it behaves like a stalled worker
        let (app, recorder, mut receiver) = app_with_queue(&upstream, 100);

        let requests = (0..101).map(|_| {
            let app = app.clone();
            async move {
                let response = app.oneshot(post("/v1/chat/completions", "{}")).await.unwrap();
                let status = response.status();
                to_bytes(response.into_body(), usize::MAX).await.unwrap();
                status
            }
        });
        let statuses = futures::future::join_all(requests).await;

        assert!(statuses.iter().all(|s| *s == StatusCode::OK));
        assert_eq!(recorder.dropped_count(), 1);

        let mut queued = 0;
        while receiver.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 100);
    }

    #[tokio::test]
    async fn test_client_disconnect_still_records_partial_stream() {
        let upstream = MockServer::start().await;
        let body: String = (0..500)
            .map(|i| format!("data: {{\"chunk\":{}}}\n\n", i))
            .collect();
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "text/event-stream"))
            .mount(&upstream)
            .await;

        let (app, _recorder, mut receiver) = app_with_queue(&upstream, 4);
        let response = app.oneshot(post("/v1/messages", r#"{"stream":true}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // client goes away without reading the body
        drop(response);

        let rec = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("recording should be finalized after disconnect")
            .unwrap();
        assert_eq!(rec.provider, Provider::Claude);
        assert_eq!(rec.response.status, 200);
        assert!(rec.response.streaming);
        let captured = rec.response.body.as_ref().and_then(|b| b.as_str()).unwrap_or("");
        assert!(body.starts_with(captured));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_client_cancel_during_upstream_wait_is_recorded_as_error() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&upstream)
            .await;

        let (app, _recorder, mut receiver) = app_with_queue(&upstream, 4);
        // the handler future is dropped while reqwest waits on the upstream
        let pending = tokio::time::timeout(
            Duration::from_millis(300),
            app.oneshot(post("/v1/chat/completions", "{}")),
        )
        .await;
        assert!(pending.is_err());

        let rec = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("recording should be finalized after cancellation")
            .unwrap();
        assert_eq!(rec.provider, Provider::OpenAI);
        assert_eq!(rec.response.status, 0);
        assert_eq!(
            rec.error.as_deref(),
            Some(crate::api::guard::ABANDONED_ERROR)
        );
        assert_eq!(rec.request.body, Some(serde_json::json!({})));
    }

    #[tokio::test]
    async fn test_completed_exchange_has_no_error() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&upstream)
            .await;

        let (app, _recorder, mut receiver) = app_with_queue(&upstream, 4);
        let response = app.oneshot(post("/v1/embeddings", "{}")).await.unwrap();
        to_bytes(response.into_body(), usize::MAX).await.unwrap();

        let rec = receiver.recv().await.unwrap();
        assert_eq!(rec.response.status, 200);
        assert!(rec.error.is_none());
    }

    #[test]
    fn test_is_streaming_content_type() {
        assert!(is_streaming_content_type("text/event-stream"));
        assert!(is_streaming_content_type("text/event-stream; charset=utf-8"));
        assert!(is_streaming_content_type("application/x-ndjson-stream"));
        assert!(is_streaming_content_type("application/octet-stream"));
        assert!(!is_streaming_content_type("application/json"));
        assert!(!is_streaming_content_type(""));
    }

    #[test]
    fn test_header_pairs_preserve_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("x-trace", "a".parse().unwrap());
        headers.append("x-trace", "b".parse().unwrap());
        let collected = collect_headers(header_pairs(&headers));
        assert_eq!(collected["X-Trace"], vec!["a".to_string(), "b".to_string()]);
    }
}
