//! Stream transport: a long-lived SSE channel bound to one session.
//!
//! `GET /sse` performs the handshake: the session is created (or the connect
//! is rejected if its id is still live), the credential is resolved once
//! from the connect headers and held for the session's lifetime, and the
//! first pushed event announces the companion message-post endpoint.
//! `POST /messages?session=<id>` submits envelopes; responses are pushed
//! back over the channel in completion order.
//!
//! All writes go through the session's outbound mpsc channel into a single
//! `StreamBody`, so frames are never interleaved even when handlers run
//! concurrently. When the client disconnects, the receiver drops, the
//! watchdog task observes it, in-flight dispatches are cancelled and their
//! late results discarded, and the session is removed.

use super::{
    collect_body, envelope_response, json_response, query_param, TransportState, MESSAGES_PATH,
};
use crate::protocol::{ResponseEnvelope, RpcError, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR};
use crate::session::{ProtocolServer, SessionError, SessionHandle, SessionManager};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::http::{header, Request, Response, StatusCode};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt as _};
use tracing::{debug, warn};

/// Outbound frame buffer per session.
const OUTBOUND_BUFFER: usize = 64;

/// SSE comment frame used as keep-alive.
const KEEP_ALIVE_FRAME: &str = ": keep-alive\n\n";

fn sse_frame(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// Handle `GET /sse`: open the push channel and create the session.
pub async fn handle_connect<B>(
    state: &TransportState,
    req: Request<B>,
) -> Response<BoxBody<Bytes, Infallible>>
where
    B: http_body::Body + Send + 'static,
{
    // Resolved once at connect; the stream transport has no per-message
    // headers, so this context is fixed for the session's lifetime.
    let auth = state.auth.resolve(req.headers());
    let requested_id = query_param(&req, "session");

    let (tx, rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let server = ProtocolServer::new(state.dispatcher.clone(), auth);
    let handle = match state
        .sessions
        .create_stream(requested_id, server, tx.clone())
        .await
    {
        Ok(handle) => handle,
        Err(e @ (SessionError::SessionAlreadyActive(_) | SessionError::SessionClosing(_))) => {
            return envelope_response(
                StatusCode::CONFLICT,
                &ResponseEnvelope::error(None, RpcError::new(INVALID_REQUEST, e.to_string())),
            );
        }
        Err(e) => {
            return envelope_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ResponseEnvelope::error(None, RpcError::new(INTERNAL_ERROR, e.to_string())),
            );
        }
    };

    // Handshake: tell the client where to post messages for this session.
    let endpoint = format!("{MESSAGES_PATH}?session={}", handle.id());
    if tx.send(sse_frame("endpoint", &endpoint)).await.is_err() {
        state.sessions.remove(handle.id()).await;
        return envelope_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ResponseEnvelope::error(None, RpcError::new(INTERNAL_ERROR, "channel closed")),
        );
    }

    spawn_watchdog(Arc::clone(&state.sessions), handle, tx, state.keep_alive);

    let stream = ReceiverStream::new(rx).map(|frame| Ok(Frame::data(Bytes::from(frame))));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(StreamBody::new(stream).boxed())
        .unwrap_or_else(|_| {
            super::text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Error")
        })
}

/// Per-session watchdog: emits keep-alive frames, detects the client
/// disconnecting, and completes teardown (`closing -> absent`) once the
/// session stops. This task is the sole owner of the final removal.
fn spawn_watchdog(
    sessions: Arc<SessionManager>,
    handle: SessionHandle,
    tx: mpsc::Sender<String>,
    keep_alive: Option<Duration>,
) {
    let cancel = handle.cancel_token().clone();
    tokio::spawn(async move {
        let mut ticker = keep_alive.map(tokio::time::interval);
        if let Some(t) = ticker.as_mut() {
            t.tick().await; // consume the immediate first tick
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tx.closed() => {
                    debug!(session_id = %handle.id(), "stream client disconnected");
                    sessions.close(handle.id()).await;
                    break;
                }
                _ = next_tick(&mut ticker) => {
                    if tx.send(KEEP_ALIVE_FRAME.to_string()).await.is_err() {
                        sessions.close(handle.id()).await;
                        break;
                    }
                }
            }
        }
        // Drop our sender before removal so the body stream can end.
        drop(tx);
        sessions.remove(handle.id()).await;
    });
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle `POST /messages?session=<id>`: submit one envelope to a stream
/// session. Returns 202 immediately; the response is pushed over the SSE
/// channel when the handler completes.
pub async fn handle_message<B>(
    state: &TransportState,
    req: Request<B>,
) -> Response<BoxBody<Bytes, Infallible>>
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    let Some(id) = query_param(&req, "session") else {
        return envelope_response(
            StatusCode::BAD_REQUEST,
            &ResponseEnvelope::error(
                None,
                RpcError::new(INVALID_REQUEST, "missing session parameter"),
            ),
        );
    };

    let handle = match state.sessions.attach(&id).await {
        Ok(handle) => handle,
        Err(e @ SessionError::SessionNotFound(_)) => {
            return envelope_response(
                StatusCode::NOT_FOUND,
                &ResponseEnvelope::error(None, RpcError::new(INVALID_REQUEST, e.to_string())),
            );
        }
        Err(e) => {
            return envelope_response(
                StatusCode::CONFLICT,
                &ResponseEnvelope::error(None, RpcError::new(INVALID_REQUEST, e.to_string())),
            );
        }
    };

    let Some(body) = collect_body(req).await else {
        return envelope_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ResponseEnvelope::error(
                None,
                RpcError::new(INTERNAL_ERROR, "failed to read request body"),
            ),
        );
    };
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            return envelope_response(
                StatusCode::BAD_REQUEST,
                &ResponseEnvelope::error(None, RpcError::new(PARSE_ERROR, format!("parse error: {e}"))),
            );
        }
    };

    // Dispatch concurrently within the session; the writer channel is the
    // serialization point, not dispatch. If the session closes first, the
    // late result is discarded rather than written to a dead channel.
    let cancel = handle.cancel_token().clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %handle.id(), "discarding result for closed session");
            }
            response = handle.handle_message(raw) => {
                let Some(response) = response else { return };
                match serde_json::to_string(&response) {
                    Ok(payload) => {
                        if handle.push(sse_frame("message", &payload)).await.is_err() {
                            // Transport error: the caller is already gone.
                            debug!(session_id = %handle.id(), "dropping response for disconnected session");
                        }
                    }
                    Err(e) => warn!(session_id = %handle.id(), "failed to serialize response: {e}"),
                }
            }
        }
    });

    json_response(StatusCode::ACCEPTED, &serde_json::json!({"accepted": true}))
}
