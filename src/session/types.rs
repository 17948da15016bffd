//! Session and session info types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which transport variant a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Long-lived server-push channel carrying multiple messages.
    Stream,
    /// Single request/response exchange with no persisted state.
    Oneshot,
}

/// Status of a session.
///
/// The full lifecycle is `absent -> active -> closing -> absent`; `absent`
/// is represented by the session not existing in the manager's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is serving requests.
    Active,
    /// Teardown has begun; the id may not be reused until it completes.
    Closing,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Closing => write!(f, "closing"),
        }
    }
}

/// Information about a session (serializable for introspection).
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Opaque session identifier.
    pub id: String,
    /// Transport variant that created the session.
    pub transport_kind: TransportKind,
    /// Current status.
    pub status: SessionStatus,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last inbound activity, used for idle eviction.
    pub last_active_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(id: String, transport_kind: TransportKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            transport_kind,
            status: SessionStatus::Active,
            created_at: now,
            last_active_at: now,
        }
    }
}

/// Snapshot of session counts.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub closing_sessions: usize,
}
