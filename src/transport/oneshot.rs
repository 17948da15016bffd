//! One-shot transport: one HTTP POST in, one JSON response out.
//!
//! Every request runs in its own ephemeral session - create, dispatch,
//! respond, destroy - so no state (and no credential) survives to the next
//! request. This is the required behavior when the transport cannot
//! guarantee that repeated requests come from the same logical client.
//! Credentials are re-resolved on every request, so header values may
//! legitimately differ request-to-request.

use super::{collect_body, envelope_response, json_response, TransportState};
use crate::protocol::{ResponseEnvelope, RpcError, INTERNAL_ERROR, PARSE_ERROR};
use crate::session::ProtocolServer;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::http::{Request, Response, StatusCode};
use serde_json::Value;
use std::convert::Infallible;
use tracing::debug;

/// Handle `POST /mcp`.
pub async fn handle_post<B>(
    state: &TransportState,
    req: Request<B>,
) -> Response<BoxBody<Bytes, Infallible>>
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    // Per-request credential resolution; nothing is cached across requests.
    let auth = state.auth.resolve(req.headers());

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
            debug!("rejecting malformed request body: {e}");
            return envelope_response(
                StatusCode::BAD_REQUEST,
                &ResponseEnvelope::error(None, RpcError::new(PARSE_ERROR, format!("parse error: {e}"))),
            );
        }
    };

    let server = ProtocolServer::new(state.dispatcher.clone(), auth);
    let session = state.sessions.create_oneshot(server).await;
    let response = session.handle_message(raw).await;
    state.sessions.remove(session.id()).await;

    match response {
        Some(envelope) => envelope_response(StatusCode::OK, &envelope),
        // Notification: nothing to send back beyond acceptance.
        None => json_response(StatusCode::ACCEPTED, &serde_json::json!({})),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{body_json, test_state};
    use super::super::{route, MCP_PATH};
    use crate::auth::CREDENTIAL_HEADER;
    use crate::error::ToolError;
    use crate::registry::{ToolDescriptor, ToolHandler, ToolRegistry};
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        let handler: ToolHandler = Arc::new(|args, _auth| Box::pin(async move { Ok(args) }));
        registry
            .register(
                ToolDescriptor::new(
                    "echo",
                    "echo text back",
                    json!({
                        "type": "object",
                        "properties": {"text": {"type": "string"}},
                        "required": ["text"],
                    }),
                    handler,
                )
                .expect("descriptor"),
            )
            .expect("register");
        registry
    }

    fn credential_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        let handler: ToolHandler = Arc::new(|_args, auth| {
            Box::pin(async move {
                match auth.credential() {
                    Some(cred) => Ok(json!({"credential": cred})),
                    None => Err(ToolError::MissingCredential("credential required".into())),
                }
            })
        });
        registry
            .register(
                ToolDescriptor::new("reflect", "reflect credential", json!({"type": "object"}), handler)
                    .expect("descriptor"),
            )
            .expect("register");
        registry
    }

    fn post(body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri(MCP_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .expect("request")
    }

    #[tokio::test]
    async fn echo_round_trip_over_http() {
        let state = test_state(echo_registry());
        let resp = route(
            state,
            post(r#"{"id":"1","operation":"echo","arguments":{"text":"hi"}}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["id"], json!("1"));
        assert_eq!(body["result"], json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn unknown_operation_is_32601() {
        let state = test_state(echo_registry());
        let resp = route(state, post(r#"{"id":2,"operation":"nope","arguments":{}}"#)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error_not_a_stack_trace() {
        let state = test_state(echo_registry());
        let resp = route(state, post("{not json")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], json!(-32700));
    }

    #[tokio::test]
    async fn get_is_405_with_structured_error() {
        let state = test_state(echo_registry());
        let req = Request::builder()
            .method(Method::GET)
            .uri(MCP_PATH)
            .body(Full::new(Bytes::new()))
            .expect("request");
        let resp = route(state, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], json!(-32000));
    }

    #[tokio::test]
    async fn delete_is_405_with_structured_error() {
        let state = test_state(echo_registry());
        let req = Request::builder()
            .method(Method::DELETE)
            .uri(MCP_PATH)
            .body(Full::new(Bytes::new()))
            .expect("request");
        let resp = route(state, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], json!(-32000));
    }

    #[tokio::test]
    async fn notification_is_accepted_with_no_result() {
        let state = test_state(echo_registry());
        let resp = route(state, post(r#"{"operation":"echo","arguments":{"text":"x"}}"#)).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn missing_credential_yields_auth_error_not_silent_success() {
        let state = test_state(credential_registry());
        let resp = route(state, post(r#"{"id":1,"operation":"reflect","arguments":{}}"#)).await;
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], json!(-32001));
        assert!(body.get("result").is_none());
    }

    #[tokio::test]
    async fn ephemeral_session_is_destroyed_after_the_request() {
        let state = test_state(echo_registry());
        let sessions = Arc::clone(&state.sessions);
        let resp = route(
            state,
            post(r#"{"id":"1","operation":"echo","arguments":{"text":"hi"}}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(sessions.stats().await.total_sessions, 0);
    }

    #[tokio::test]
    async fn concurrent_requests_never_observe_each_others_credential() {
        let state = test_state(credential_registry());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                let token = format!("secret-{i}");
                let req = Request::builder()
                    .method(Method::POST)
                    .uri(MCP_PATH)
                    .header(CREDENTIAL_HEADER, token.clone())
                    .body(Full::new(Bytes::from(
                        format!(r#"{{"id":{i},"operation":"reflect","arguments":{{}}}}"#),
                    )))
                    .expect("request");
                let resp = route(state, req).await;
                let body = body_json(resp).await;
                (token, body)
            }));
        }

        for task in tasks {
            let (token, body): (String, Value) = task.await.expect("task");
            // Each handler saw exactly the credential its own request carried.
            assert_eq!(body["result"]["credential"], json!(token));
        }
    }
}
