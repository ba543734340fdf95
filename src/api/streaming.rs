//! Relaying upstream response bodies to the client while capturing them.
//!
//! Two relays exist:
//!
//! - [`relay_lines`] for streaming responses (SSE and friends). The upstream
//!   body is split on `\n`; every line is forwarded together with its
//!   terminator and flushed before the next line is read, so the client sees
//!   events as soon as the upstream produces them. Lines are accumulated
//!   verbatim and stored as one text body.
//! - [`relay_buffered`] for everything else. Chunks are forwarded as they
//!   arrive and teed into a buffer that becomes the recorded body.
//!
//! Both relays stop at the first failed client write. Whatever was captured
//! up to that point stays in the recording.

use crate::core::recording::{encode_response_body, is_gzip_encoded, Recording};
use axum::body::Body;
use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;

/// Initial capacity of the line buffer.
pub const INITIAL_LINE_BUFFER: usize = 64 * 1024;

/// Longest line the streaming relay accepts.
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Frames in flight between a relay task and the HTTP server.
pub const RELAY_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("client disconnected")]
    ClientGone,

    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Destination the relays write the response body into.
pub trait ClientSink: Send {
    /// Whether written data can be pushed to the client on demand.
    fn supports_flush(&self) -> bool;

    fn write(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), RelayError>> + Send;

    fn flush(&mut self) -> impl Future<Output = Result<(), RelayError>> + Send;
}

/// Sink feeding a channel-backed response [`Body`].
///
/// Each chunk becomes one body frame, which the server writes out as soon as
/// it is polled. A closed receiver means the client went away.
pub struct ChannelSink {
    sender: mpsc::Sender<Result<Bytes, std::io::Error>>,
}

impl ClientSink for ChannelSink {
    fn supports_flush(&self) -> bool {
        true
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), RelayError> {
        self.sender
            .send(Ok(chunk))
            .await
            .map_err(|_| RelayError::ClientGone)
    }

    async fn flush(&mut self) -> Result<(), RelayError> {
        // frames are handed to the server one by one; only liveness matters
        if self.sender.is_closed() {
            return Err(RelayError::ClientGone);
        }
        Ok(())
    }
}

/// Create a response body and the sink that feeds it.
pub fn channel_body(capacity: usize) -> (ChannelSink, Body) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    });
    (ChannelSink { sender }, Body::from_stream(stream))
}

/// Incremental `\n` splitter with a bounded line length.
///
/// Returned lines exclude the `\n` but keep everything else, including a
/// trailing `\r`.
pub struct LineScanner {
    buf: BytesMut,
    searched: usize,
    max_line: usize,
}

impl LineScanner {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_LINE_BUFFER.min(max_line)),
            searched: 0,
            max_line,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line, `None` when more input is needed.
    pub fn next_line(&mut self) -> Result<Option<Bytes>, RelayError> {
        if let Some(pos) = self.buf[self.searched..].iter().position(|b| *b == b'\n') {
            let end = self.searched + pos;
            let line = self.buf.split_to(end + 1).freeze();
            self.searched = 0;
            return Ok(Some(line.slice(..end)));
        }
        self.searched = self.buf.len();
        if self.buf.len() > self.max_line {
            return Err(RelayError::LineTooLong(self.max_line));
        }
        Ok(None)
    }

    /// Unterminated remainder once the input is exhausted.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.searched = 0;
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

/// Relay a streaming body line by line, flushing after every line.
///
/// A sink that cannot flush gets a plain copy of the body and nothing is
/// captured.
pub async fn relay_lines<S, B, E>(upstream: B, sink: &mut S, rec: &mut Recording)
where
    S: ClientSink,
    B: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    if !sink.supports_flush() {
        tracing::error!(id = %rec.short_id(), "client does not support flushing, relaying without capture");
        copy_through(upstream, sink).await;
        return;
    }

    let mut upstream = std::pin::pin!(upstream);
    let mut scanner = LineScanner::new(MAX_LINE_SIZE);
    let mut captured = BytesMut::new();

    'relay: loop {
        let chunk = match upstream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                tracing::error!(id = %rec.short_id(), error = %e, "error reading stream");
                break;
            }
            None => {
                if let Some(rest) = scanner.finish() {
                    if let Err(e) = forward_line(sink, &mut captured, &rest).await {
                        tracing::warn!(id = %rec.short_id(), error = %e, "failed to write streaming chunk");
                    }
                }
                break;
            }
        };

        scanner.push(&chunk);
        loop {
            match scanner.next_line() {
                Ok(Some(line)) => {
                    if let Err(e) = forward_line(sink, &mut captured, &line).await {
                        tracing::warn!(id = %rec.short_id(), error = %e, "failed to write streaming chunk");
                        break 'relay;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(id = %rec.short_id(), error = %e, "error reading stream");
                    break 'relay;
                }
            }
        }
    }

    if !captured.is_empty() {
        rec.response.body = Some(Value::String(
            String::from_utf8_lossy(&captured).into_owned(),
        ));
    }
}

/// Capture first, then write and flush `line` plus its terminator.
async fn forward_line<S: ClientSink>(
    sink: &mut S,
    captured: &mut BytesMut,
    line: &[u8],
) -> Result<(), RelayError> {
    captured.extend_from_slice(line);
    captured.put_u8(b'\n');

    let mut frame = BytesMut::with_capacity(line.len() + 1);
    frame.extend_from_slice(line);
    frame.put_u8(b'\n');
    sink.write(frame.freeze()).await?;
    sink.flush().await
}

async fn copy_through<S, B, E>(upstream: B, sink: &mut S)
where
    S: ClientSink,
    B: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut upstream = std::pin::pin!(upstream);
    while let Some(chunk) = upstream.next().await {
        match chunk {
            Ok(chunk) => {
                if sink.write(chunk).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "error reading stream");
                break;
            }
        }
    }
}

/// Relay a non-streaming body, teeing every chunk into the recording.
pub async fn relay_buffered<S, B, E>(upstream: B, sink: &mut S, rec: &mut Recording)
where
    S: ClientSink,
    B: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut buffer = BytesMut::new();

    while let Some(chunk) = upstream.next().await {
        match chunk {
            Ok(chunk) => {
                buffer.extend_from_slice(&chunk);
                if let Err(e) = sink.write(chunk).await {
                    tracing::warn!(id = %rec.short_id(), error = %e, "failed to copy response");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(id = %rec.short_id(), error = %e, "failed to copy response");
                break;
            }
        }
    }

    let gzipped = is_gzip_encoded(&rec.response.headers);
    rec.response.body = encode_response_body(&buffer, gzipped);
}
