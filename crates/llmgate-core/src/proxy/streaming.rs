//! Upstream response → client response without buffering.
//!
//! Status and headers are copied first. Body chunks are pumped through a
//! small bounded channel by a background task; hyper writes each chunk as
//! its own frame, so Server-Sent Events reach the client as they arrive.
//! A chunk the client does not accept within the write deadline ends the
//! stream. A client that disconnects while the upstream is idle releases
//! the upstream body at once.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::prometheus::record_stream_truncated;
use super::upstream::strip_hop_by_hop;

const CHANNEL_CAPACITY: usize = 8;

/// Build the client response for `upstream`, streaming its body.
pub fn stream_response(
    upstream: reqwest::Response,
    write_deadline: Duration,
    provider: String,
) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);
    let sse = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(pump(upstream.bytes_stream(), tx, write_deadline, provider, sse));

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Copy chunks from `source` into `tx` until either side ends.
///
/// `source` is dropped as soon as the receiver goes away, even when no
/// chunk is pending.
pub(crate) async fn pump<S, E>(
    source: S,
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    write_deadline: Duration,
    provider: String,
    sse: bool,
) where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    futures::pin_mut!(source);
    let mut sent = 0_usize;

    loop {
        let next = tokio::select! {
            biased;
            () = tx.closed() => {
                debug!(
                    provider = %provider,
                    bytes = sent,
                    "Client went away while upstream was idle; closing upstream body"
                );
                return;
            },
            next = source.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    provider = %provider,
                    error = %e,
                    bytes = sent,
                    "Upstream body failed mid-stream"
                );
                let _ = tx.send(Err(io::Error::other(e))).await;
                return;
            },
        };
        let len = bytes.len();
        match tx.send_timeout(Ok(bytes), write_deadline).await {
            Ok(()) => sent += len,
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    provider = %provider,
                    sse,
                    bytes = sent,
                    deadline = ?write_deadline,
                    "Client did not accept data within write deadline; stream truncated"
                );
                record_stream_truncated(&provider);
                return;
            },
            Err(SendTimeoutError::Closed(_)) => {
                debug!(
                    provider = %provider,
                    bytes = sent,
                    "Client went away; closing upstream body"
                );
                return;
            },
        }
    }
    debug!(provider = %provider, sse, bytes = sent, "Upstream body complete");
}
