//! Error types for the protocol session core.
//!
//! Tool execution errors are returned inside a success-shaped response with
//! `is_error: true`, so callers reading the payload see why a vendor call
//! failed. Envelope-level errors (unknown operation, bad auth, malformed
//! request) are handled by the dispatcher and never reach this type.

use serde_json::{json, Value};
use thiserror::Error;

/// Tool execution errors - surfaced as payload-level failures, never as
/// envelope-level protocol errors.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Vendor call failed: {0}")]
    VendorCall(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Convert to a payload-level failure marker. The envelope around this
    /// payload is a *success* response; `is_error: true` is what tells the
    /// caller the operation failed.
    pub fn to_failure_payload(&self) -> Value {
        failure_payload(&self.to_string())
    }
}

/// Build an `is_error: true` payload from arbitrary failure text. Used for
/// handler panics and other failures that never became a `ToolError`.
pub fn failure_payload(message: &str) -> Value {
    json!({
        "content": [{"type": "text", "text": message}],
        "is_error": true,
    })
}
