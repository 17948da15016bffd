//! Session manager: tracks every logical connection and enforces
//! at-most-one live session per session id.
//!
//! Lifecycle per id: `absent -> active -> closing -> absent`. A connection
//! presenting the id of a session that has not fully reached `absent` is
//! rejected, so two concurrent owners of one protocol server instance cannot
//! exist. Destruction happens only here: removing the entry drops the owned
//! [`ProtocolServer`], the outbound channel, and any buffered output.

use super::server::ProtocolServer;
use super::types::{SessionInfo, SessionStats, SessionStatus, TransportKind};
use crate::protocol::ResponseEnvelope;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default idle timeout before a stream session is evicted.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
/// Interval between idle-eviction sweeps.
const SWEEP_INTERVAL_SECS: u64 = 30;

/// Error type for session management operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Session already active: {0}")]
    SessionAlreadyActive(String),
    #[error("Session is closing and may not be reused yet: {0}")]
    SessionClosing(String),
    #[error("Transport channel closed")]
    TransportClosed,
}

/// Internal entry owning the session's resources.
struct SessionEntry {
    info: SessionInfo,
    server: Arc<ProtocolServer>,
    outbound: Option<mpsc::Sender<String>>,
    cancel: CancellationToken,
}

/// Cloneable handle to one session, given to the transport task and to
/// in-flight dispatches. Holding a handle does not keep the session alive in
/// the manager's table; it only keeps the server instance reachable until
/// the last in-flight task finishes or is cancelled.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    server: Arc<ProtocolServer>,
    outbound: Option<mpsc::Sender<String>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Dispatch one raw message through this session's protocol server.
    pub async fn handle_message(&self, raw: Value) -> Option<ResponseEnvelope> {
        self.server.handle(raw).await
    }

    /// The session's protocol server instance.
    pub fn server(&self) -> &Arc<ProtocolServer> {
        &self.server
    }

    /// Push a serialized frame to the session's outbound channel. Fails with
    /// [`SessionError::TransportClosed`] once the channel is gone; callers
    /// discard the frame rather than surfacing the error to the (already
    /// disconnected) client.
    pub async fn push(&self, frame: String) -> Result<(), SessionError> {
        let sender = self
            .outbound
            .as_ref()
            .ok_or(SessionError::TransportClosed)?;
        sender
            .send(frame)
            .await
            .map_err(|_| SessionError::TransportClosed)
    }

    /// Cancellation token tripped when the session begins closing.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Manager for all live sessions.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Create a stream session. `id` may be supplied by the transport; when
    /// absent a fresh UUID is assigned. Rejected while a session with the
    /// same id is active or still closing.
    pub async fn create_stream(
        &self,
        id: Option<String>,
        server: ProtocolServer,
        outbound: mpsc::Sender<String>,
    ) -> Result<SessionHandle, SessionError> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&id) {
            return Err(match existing.info.status {
                SessionStatus::Active => SessionError::SessionAlreadyActive(id),
                SessionStatus::Closing => SessionError::SessionClosing(id),
            });
        }

        let entry = SessionEntry {
            info: SessionInfo::new(id.clone(), TransportKind::Stream),
            server: Arc::new(server),
            outbound: Some(outbound),
            cancel: CancellationToken::new(),
        };
        let handle = Self::handle_of(&id, &entry);
        info!(session_id = %id, "stream session created");
        sessions.insert(id, entry);
        Ok(handle)
    }

    /// Create an ephemeral session for one one-shot request. Every request
    /// gets its own entry: create, dispatch, respond, destroy, with no state
    /// carried to the next request.
    pub async fn create_oneshot(&self, server: ProtocolServer) -> SessionHandle {
        let id = Uuid::new_v4().to_string();
        let entry = SessionEntry {
            info: SessionInfo::new(id.clone(), TransportKind::Oneshot),
            server: Arc::new(server),
            outbound: None,
            cancel: CancellationToken::new(),
        };
        let handle = Self::handle_of(&id, &entry);
        debug!(session_id = %id, "oneshot session created");
        self.sessions.write().await.insert(id, entry);
        handle
    }

    /// Look up an active session and record the activity. Closing sessions
    /// are not attachable.
    pub async fn attach(&self, id: &str) -> Result<SessionHandle, SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        if entry.info.status == SessionStatus::Closing {
            return Err(SessionError::SessionClosing(id.to_string()));
        }
        entry.info.last_active_at = Utc::now();
        Ok(Self::handle_of(id, entry))
    }

    /// Begin teardown: `active -> closing`. Cancels the session's token so
    /// in-flight dispatches are discarded instead of writing to a dead
    /// channel. Returns false if the session does not exist.
    pub async fn close(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(id) else {
            return false;
        };
        if entry.info.status != SessionStatus::Closing {
            info!(session_id = %id, "session closing");
            entry.info.status = SessionStatus::Closing;
        }
        entry.cancel.cancel();
        true
    }

    /// Complete teardown: `closing -> absent`. Dropping the entry releases
    /// the protocol server and the outbound channel; this is the only place
    /// session resources are freed.
    pub async fn remove(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.remove(id) {
            entry.cancel.cancel();
            info!(session_id = %id, "session removed");
        }
    }

    /// Mark sessions idle past the timeout as closing. Returns the affected
    /// ids. The owning transport task observes the cancellation and calls
    /// [`SessionManager::remove`]; sessions stuck in closing for more than
    /// twice the timeout are force-removed in case that task is gone.
    pub async fn evict_idle(&self) -> Vec<String> {
        let now = Utc::now();
        let idle = chrono::Duration::from_std(self.idle_timeout).unwrap_or(chrono::Duration::MAX);
        let stale = idle
            .checked_mul(2)
            .unwrap_or(chrono::Duration::MAX);

        let mut evicted = Vec::new();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|id, entry| {
            if entry.info.status == SessionStatus::Closing && now - entry.info.last_active_at > stale
            {
                warn!(session_id = %id, "force-removing stale closing session");
                entry.cancel.cancel();
                return false;
            }
            true
        });
        for (id, entry) in sessions.iter_mut() {
            if entry.info.status == SessionStatus::Active
                && entry.info.transport_kind == TransportKind::Stream
                && now - entry.info.last_active_at > idle
            {
                info!(session_id = %id, "evicting idle session");
                entry.info.status = SessionStatus::Closing;
                entry.cancel.cancel();
                evicted.push(id.clone());
            }
        }
        evicted
    }

    /// Spawn the background idle-eviction sweep. Runs until `shutdown` is
    /// cancelled.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            tick.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let evicted = manager.evict_idle().await;
                        if !evicted.is_empty() {
                            debug!(count = evicted.len(), "idle sweep evicted sessions");
                        }
                    }
                }
            }
        })
    }

    /// Get info about a specific session.
    pub async fn info(&self, id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|e| e.info.clone())
    }

    /// Get session statistics.
    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let closing = sessions
            .values()
            .filter(|e| e.info.status == SessionStatus::Closing)
            .count();
        SessionStats {
            total_sessions: sessions.len(),
            active_sessions: sessions.len() - closing,
            closing_sessions: closing,
        }
    }

    /// Tear down every session. Used on server shutdown.
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.write().await;
        for (id, entry) in sessions.drain() {
            debug!(session_id = %id, "closing session during shutdown");
            entry.cancel.cancel();
        }
    }

    fn handle_of(id: &str, entry: &SessionEntry) -> SessionHandle {
        SessionHandle {
            id: id.to_string(),
            server: Arc::clone(&entry.server),
            outbound: entry.outbound.clone(),
            cancel: entry.cancel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::dispatch::RequestDispatcher;
    use crate::registry::ToolRegistry;

    fn protocol_server() -> ProtocolServer {
        let dispatcher = RequestDispatcher::new(Arc::new(ToolRegistry::new()));
        ProtocolServer::new(dispatcher, AuthContext::anonymous())
    }

    fn manager() -> SessionManager {
        SessionManager::new(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    #[tokio::test]
    async fn stream_session_lifecycle() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(8);
        let handle = manager
            .create_stream(Some("s1".to_string()), protocol_server(), tx)
            .await
            .expect("create");
        assert_eq!(handle.id(), "s1");

        let attached = manager.attach("s1").await.expect("attach");
        assert_eq!(attached.id(), "s1");

        assert!(manager.close("s1").await);
        assert!(handle.cancel_token().is_cancelled());

        manager.remove("s1").await;
        assert!(manager.info("s1").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_id_rejected_while_active() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(8);
        manager
            .create_stream(Some("dup".to_string()), protocol_server(), tx)
            .await
            .expect("create");

        let (tx2, _rx2) = mpsc::channel(8);
        let err = manager
            .create_stream(Some("dup".to_string()), protocol_server(), tx2)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionAlreadyActive(_)));
    }

    #[tokio::test]
    async fn closing_session_rejects_reuse_until_removed() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(8);
        manager
            .create_stream(Some("re".to_string()), protocol_server(), tx)
            .await
            .expect("create");
        manager.close("re").await;

        // Still closing: both attach and a fresh connect are rejected.
        assert!(matches!(
            manager.attach("re").await.unwrap_err(),
            SessionError::SessionClosing(_)
        ));
        let (tx2, _rx2) = mpsc::channel(8);
        assert!(matches!(
            manager
                .create_stream(Some("re".to_string()), protocol_server(), tx2)
                .await
                .unwrap_err(),
            SessionError::SessionClosing(_)
        ));

        // Fully absent: the id is fresh state again.
        manager.remove("re").await;
        let (tx3, _rx3) = mpsc::channel(8);
        let handle = manager
            .create_stream(Some("re".to_string()), protocol_server(), tx3)
            .await
            .expect("fresh session after removal");
        assert!(!handle.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn oneshot_sessions_are_ephemeral() {
        let manager = manager();
        let handle = manager.create_oneshot(protocol_server()).await;
        assert_eq!(manager.stats().await.total_sessions, 1);

        manager.remove(handle.id()).await;
        let stats = manager.stats().await;
        assert_eq!(stats.total_sessions, 0);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let manager = SessionManager::new(Duration::from_millis(0));
        let (tx, _rx) = mpsc::channel(8);
        let handle = manager
            .create_stream(Some("idle".to_string()), protocol_server(), tx)
            .await
            .expect("create");

        tokio::time::sleep(Duration::from_millis(5)).await;
        let evicted = manager.evict_idle().await;
        assert_eq!(evicted, vec!["idle".to_string()]);
        assert!(handle.cancel_token().is_cancelled());

        let info = manager.info("idle").await.expect("still closing");
        assert_eq!(info.status, SessionStatus::Closing);
    }

    #[tokio::test]
    async fn oneshot_sessions_are_not_idle_evicted() {
        let manager = SessionManager::new(Duration::from_millis(0));
        let _handle = manager.create_oneshot(protocol_server()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(manager.evict_idle().await.is_empty());
    }

    #[tokio::test]
    async fn push_after_receiver_dropped_is_transport_closed() {
        let manager = manager();
        let (tx, rx) = mpsc::channel(1);
        let handle = manager
            .create_stream(Some("gone".to_string()), protocol_server(), tx)
            .await
            .expect("create");
        drop(rx);

        let err = handle.push("data: {}\n\n".to_string()).await.unwrap_err();
        assert!(matches!(err, SessionError::TransportClosed));
    }

    #[tokio::test]
    async fn shutdown_tears_down_everything() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(8);
        let handle = manager
            .create_stream(None, protocol_server(), tx)
            .await
            .expect("create");
        let _oneshot = manager.create_oneshot(protocol_server()).await;

        manager.shutdown_all().await;
        assert_eq!(manager.stats().await.total_sessions, 0);
        assert!(handle.cancel_token().is_cancelled());
    }
}
