//! Request dispatch: envelope validation, operation lookup, argument
//! validation, and the handler failure boundary.
//!
//! Every failure mode is converted into exactly one well-defined outcome:
//!
//! - Malformed envelope, unknown operation, schema violation, and missing
//!   credential surface as envelope-level errors with standard codes.
//! - Handler failures (vendor call errors, timeouts) surface as a *success*
//!   envelope whose payload carries `is_error: true`, so callers reading
//!   content learn why the operation failed.
//! - Notifications (no `id`) never produce a response, error or not.
//!
//! Nothing a handler does, including panicking, escapes this boundary.

use crate::auth::AuthContext;
use crate::error::{failure_payload, ToolError};
use crate::protocol::{
    RequestEnvelope, ResponseEnvelope, RpcError, AUTH_REQUIRED, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND,
};
use crate::registry::ToolRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reserved operation: enumerate the registry's enabled tools.
pub const OP_TOOLS_LIST: &str = "tools/list";

/// Dispatches parsed requests against a shared, read-only registry.
#[derive(Clone)]
pub struct RequestDispatcher {
    registry: Arc<ToolRegistry>,
}

impl RequestDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatch a raw JSON value that has not yet been shape-checked.
    /// Returns `None` when the message is a notification.
    pub async fn dispatch_value(&self, raw: Value, auth: &AuthContext) -> Option<ResponseEnvelope> {
        let id = raw.get("id").cloned();
        match serde_json::from_value::<RequestEnvelope>(raw) {
            Ok(envelope) => self.dispatch(envelope, auth).await,
            Err(e) => {
                // A malformed notification still gets no response.
                let id = id?;
                Some(ResponseEnvelope::error(
                    Some(id),
                    RpcError::new(INVALID_REQUEST, format!("invalid request: {e}")),
                ))
            }
        }
    }

    /// Dispatch one request. Returns `None` for notifications.
    pub async fn dispatch(
        &self,
        envelope: RequestEnvelope,
        auth: &AuthContext,
    ) -> Option<ResponseEnvelope> {
        let is_notification = envelope.is_notification();
        let response = self.dispatch_inner(envelope, auth).await;
        if is_notification {
            None
        } else {
            Some(response)
        }
    }

    async fn dispatch_inner(&self, envelope: RequestEnvelope, auth: &AuthContext) -> ResponseEnvelope {
        let RequestEnvelope {
            id,
            operation,
            arguments,
        } = envelope;

        if operation == OP_TOOLS_LIST {
            return ResponseEnvelope::success(id, self.list_tools());
        }

        let Some(tool) = self.registry.resolve(&operation) else {
            debug!(operation = %operation, "operation not found");
            return ResponseEnvelope::error(
                id,
                RpcError::new(METHOD_NOT_FOUND, format!("operation not found: {operation}")),
            );
        };

        if let Err(violation) = tool.validate_arguments(&arguments) {
            return ResponseEnvelope::error(
                id,
                RpcError::with_data(
                    INVALID_PARAMS,
                    format!("invalid arguments for {operation}"),
                    json!({"violation": violation}),
                ),
            );
        }

        // Run the handler on its own task so a panic is contained as a
        // JoinError instead of unwinding through the transport.
        let future = tool.invoke(arguments, auth.clone());
        let outcome = tokio::spawn(future).await;

        match outcome {
            Ok(Ok(result)) => ResponseEnvelope::success(id, result),
            Ok(Err(ToolError::MissingCredential(detail))) => {
                let detail = auth
                    .diagnostic()
                    .map(|d| format!("{detail} ({d})"))
                    .unwrap_or(detail);
                ResponseEnvelope::error(
                    id,
                    RpcError::new(AUTH_REQUIRED, format!("missing credential: {detail}")),
                )
            }
            Ok(Err(ToolError::InvalidCredential(detail))) => ResponseEnvelope::error(
                id,
                RpcError::new(AUTH_REQUIRED, format!("invalid credential: {detail}")),
            ),
            Ok(Err(tool_err)) => {
                debug!(operation = %operation, error = %tool_err, "tool execution failed");
                ResponseEnvelope::success(id, tool_err.to_failure_payload())
            }
            Err(join_err) => {
                warn!(operation = %operation, "tool handler panicked: {join_err}");
                ResponseEnvelope::success(
                    id,
                    failure_payload(&format!("operation {operation} aborted: {join_err}")),
                )
            }
        }
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<Value> = self
            .registry
            .list()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "input_schema": t.schema(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }
}
