//! The per-session protocol server instance.

use crate::auth::AuthContext;
use crate::dispatch::RequestDispatcher;
use crate::protocol::ResponseEnvelope;
use serde_json::Value;

/// One session's exclusive protocol handler: the dispatcher bound to the
/// credential context resolved for that session.
///
/// Never shared across sessions. For the stream transport the credential is
/// fixed at connect time; the one-shot transport builds a fresh instance per
/// request, so "per session" and "per request" coincide there.
pub struct ProtocolServer {
    dispatcher: RequestDispatcher,
    auth: AuthContext,
}

impl ProtocolServer {
    pub fn new(dispatcher: RequestDispatcher, auth: AuthContext) -> Self {
        Self { dispatcher, auth }
    }

    /// Handle one raw inbound message. Returns `None` for notifications.
    pub async fn handle(&self, raw: Value) -> Option<ResponseEnvelope> {
        self.dispatcher.dispatch_value(raw, &self.auth).await
    }

    /// The credential context this session was created with.
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }
}
