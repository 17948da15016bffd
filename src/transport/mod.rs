//! HTTP transport adapters.
//!
//! Two variants share one dispatcher contract:
//!
//! - the one-shot variant (`POST /mcp`) correlates one HTTP request with one
//!   JSON response and persists nothing between requests;
//! - the stream variant (`GET /sse` + `POST /messages`) binds a long-lived
//!   server-push channel to one session.
//!
//! This module is the only place aware of network framing. Endpoints reject
//! HTTP methods they do not support with 405 and a structured JSON-RPC error
//! body rather than attempting dispatch.

pub mod oneshot;
pub mod stream;

use crate::auth::AuthResolver;
use crate::dispatch::RequestDispatcher;
use crate::protocol::{ResponseEnvelope, RpcError, METHOD_NOT_ALLOWED};
use crate::session::SessionManager;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::http::{header, header::ORIGIN, Method, Request, Response, StatusCode};
use serde_json::json;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_service::Service;
use tracing::warn;

/// One-shot request/response endpoint.
pub const MCP_PATH: &str = "/mcp";
/// Stream connect endpoint.
pub const SSE_PATH: &str = "/sse";
/// Companion message-post endpoint for stream sessions.
pub const MESSAGES_PATH: &str = "/messages";
/// Liveness endpoint, not subject to auth resolution.
pub const HEALTH_PATH: &str = "/health";

/// Shared transport configuration and collaborators. Cloned per connection.
#[derive(Clone)]
pub struct TransportState {
    pub dispatcher: RequestDispatcher,
    pub sessions: Arc<SessionManager>,
    pub auth: AuthResolver,
    /// SSE keep-alive interval; `None` disables keep-alive frames.
    pub keep_alive: Option<Duration>,
    /// Allowed `Origin` values. Requests without an Origin header pass.
    pub allowed_origins: Arc<HashSet<String>>,
    /// Stateless mode: serve the one-shot endpoint only.
    pub stateless: bool,
}

/// The hyper service serving both transport variants plus the health path.
#[derive(Clone)]
pub struct McpService {
    state: TransportState,
}

impl McpService {
    pub fn new(state: TransportState) -> Self {
        Self { state }
    }
}

impl<B> Service<Request<B>> for McpService
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move { Ok(route(state, req).await) })
    }
}

async fn route<B>(state: TransportState, req: Request<B>) -> Response<BoxBody<Bytes, Infallible>>
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    if let Some(origin) = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
        if !state.allowed_origins.contains(origin) {
            warn!(origin = %origin, "rejecting disallowed origin");
            return text_response(StatusCode::FORBIDDEN, "Forbidden");
        }
    }

    match (req.method().clone(), req.uri().path()) {
        (Method::GET, HEALTH_PATH) => health_response(),
        (Method::POST, MCP_PATH) => oneshot::handle_post(&state, req).await,
        (_, MCP_PATH) => method_not_allowed(&Method::POST),
        (_, SSE_PATH | MESSAGES_PATH) if state.stateless => {
            text_response(StatusCode::NOT_FOUND, "Not Found")
        }
        (Method::GET, SSE_PATH) => stream::handle_connect(&state, req).await,
        (_, SSE_PATH) => method_not_allowed(&Method::GET),
        (Method::POST, MESSAGES_PATH) => stream::handle_message(&state, req).await,
        (_, MESSAGES_PATH) => method_not_allowed(&Method::POST),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// Transport-appropriate rejection for unsupported methods: HTTP 405 with a
/// structured JSON-RPC error body (`code: -32000`).
pub fn method_not_allowed(allowed: &Method) -> Response<BoxBody<Bytes, Infallible>> {
    let envelope = ResponseEnvelope::error(
        None,
        RpcError::new(METHOD_NOT_ALLOWED, "method not allowed"),
    );
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header(header::ALLOW, allowed.as_str())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)).boxed())
        .unwrap_or_else(|_| text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"))
}

/// Fixed-shape liveness payload.
fn health_response() -> Response<BoxBody<Bytes, Infallible>> {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "server": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

pub(crate) fn json_response(
    status: StatusCode,
    payload: &serde_json::Value,
) -> Response<BoxBody<Bytes, Infallible>> {
    let body = serde_json::to_vec(payload).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)).boxed())
        .unwrap_or_else(|_| text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Error"))
}

pub(crate) fn envelope_response(
    status: StatusCode,
    envelope: &ResponseEnvelope,
) -> Response<BoxBody<Bytes, Infallible>> {
    match serde_json::to_value(envelope) {
        Ok(value) => json_response(status, &value),
        Err(_) => text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Error"),
    }
}

pub(crate) fn text_response(
    status: StatusCode,
    message: &'static str,
) -> Response<BoxBody<Bytes, Infallible>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(message.as_bytes())).boxed())
        .expect("static response")
}

/// Collect a request body, mapping transport read errors to `None`.
pub(crate) async fn collect_body<B>(req: Request<B>) -> Option<Bytes>
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    match req.into_body().collect().await {
        Ok(collected) => Some(collected.to_bytes()),
        Err(e) => {
            warn!("failed to read request body: {e}");
            None
        }
    }
}

/// Extract a query parameter from a request URI.
pub(crate) fn query_param<B>(req: &Request<B>, key: &str) -> Option<String> {
    req.uri().query().and_then(|q| {
        q.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key && !v.is_empty()).then(|| v.to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;
    use serde_json::Value;

    pub(crate) fn test_state(registry: ToolRegistry) -> TransportState {
        TransportState {
            dispatcher: RequestDispatcher::new(Arc::new(registry)),
            sessions: Arc::new(SessionManager::new(Duration::from_secs(300))),
            auth: AuthResolver::new(None),
            keep_alive: None,
            allowed_origins: Arc::new(
                ["http://localhost".to_string()].into_iter().collect(),
            ),
            stateless: false,
        }
    }

    pub(crate) async fn body_json(resp: Response<BoxBody<Bytes, Infallible>>) -> Value {
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("body is JSON")
    }

    fn get(path: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .expect("request")
    }

    #[tokio::test]
    async fn health_is_fixed_shape() {
        let state = test_state(ToolRegistry::new());
        let resp = route(state, get(HEALTH_PATH)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let state = test_state(ToolRegistry::new());
        let resp = route(state, get("/nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn disallowed_origin_is_forbidden() {
        let state = test_state(ToolRegistry::new());
        let req = Request::builder()
            .method(Method::GET)
            .uri(HEALTH_PATH)
            .header(ORIGIN, "http://evil.example")
            .body(Full::new(Bytes::new()))
            .expect("request");
        let resp = route(state, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn allowed_origin_passes() {
        let state = test_state(ToolRegistry::new());
        let req = Request::builder()
            .method(Method::GET)
            .uri(HEALTH_PATH)
            .header(ORIGIN, "http://localhost")
            .body(Full::new(Bytes::new()))
            .expect("request");
        let resp = route(state, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn query_param_extraction() {
        let req = Request::builder()
            .uri("/messages?foo=1&session=abc-123")
            .body(())
            .expect("request");
        assert_eq!(query_param(&req, "session"), Some("abc-123".to_string()));
        assert_eq!(query_param(&req, "missing"), None);
    }

    #[tokio::test]
    async fn stateless_mode_hides_stream_endpoints() {
        let mut state = test_state(ToolRegistry::new());
        state.stateless = true;
        let resp = route(state.clone(), get(SSE_PATH)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = route(state, get(MESSAGES_PATH)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
