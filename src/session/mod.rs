//! Session lifecycle management.
//!
//! A session is the lifetime scope of one logical client connection and its
//! exclusively owned protocol server instance. The manager enforces
//! at-most-one live session per id and is the only place session resources
//! are released.

mod manager;
mod server;
mod types;

pub use manager::{SessionError, SessionHandle, SessionManager};
pub use server::ProtocolServer;
pub use types::{SessionInfo, SessionStats, SessionStatus, TransportKind};
