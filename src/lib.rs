//! Protocol session core for MCP-style tool servers.
//!
//! This library provides the component every tool server in the family
//! shares: accepting connections over two transport styles, resolving
//! per-request caller credentials without leaking them across concurrent
//! callers, dispatching named operations against a registry, and
//! normalizing every failure mode into one well-defined response envelope.
//!
//! # Architecture
//!
//! - **[`registry::ToolRegistry`]**: insertion-ordered table of operations,
//!   each with a compiled argument schema and an async handler. Built at
//!   startup, shared read-only afterwards.
//!
//! - **[`auth::AuthResolver`]**: produces a request-scoped
//!   [`auth::AuthContext`] from a process-wide override or the `x-api-key`
//!   header. The context is threaded explicitly through dispatch; there is
//!   no ambient credential state anywhere.
//!
//! - **[`session::SessionManager`]**: owns every logical connection. Each
//!   session exclusively owns one [`session::ProtocolServer`] instance;
//!   ids may not be reused until teardown fully completes.
//!
//! - **[`dispatch::RequestDispatcher`]**: envelope validation, operation
//!   lookup, argument validation, and the handler failure boundary. Handler
//!   failures become payload-level `is_error` results; only unserviceable
//!   requests get envelope-level errors.
//!
//! - **[`transport`]**: the hyper service bridging HTTP to dispatch. The
//!   one-shot variant (`POST /mcp`) is fully stateless; the stream variant
//!   (`GET /sse` + `POST /messages`) binds a server-push channel to one
//!   session and cancels in-flight work when the client disconnects.
//!
//! # Error model
//!
//! Two tiers, deliberately: envelope-level errors (standard JSON-RPC codes)
//! mean the request could not be serviced at all; a success envelope whose
//! payload carries `is_error: true` means the operation ran and failed, with
//! the reason readable as ordinary content.

pub mod auth;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

pub use auth::{AuthContext, AuthResolver, AuthSource};
pub use dispatch::RequestDispatcher;
pub use error::ToolError;
pub use protocol::{RequestEnvelope, ResponseEnvelope, RpcError};
pub use registry::{RegistryError, ToolDescriptor, ToolHandler, ToolRegistry};
pub use session::{ProtocolServer, SessionError, SessionManager};
pub use transport::{McpService, TransportState};
