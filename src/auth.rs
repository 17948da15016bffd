//! Per-request credential resolution.
//!
//! Resolution order is strict: a process-wide override configured at startup
//! wins for every request; otherwise the `x-api-key` header is consulted;
//! otherwise the context carries no credential and the operation decides
//! whether that is fatal.
//!
//! The header value is either a plain token or a base64-encoded JSON object
//! carrying the credential under `apiKey` (canonical) or `api_key` / `token`
//! (aliases). A value starting with `eyJ` (base64 of `{"`) is treated as an
//! encoded object; decode and field-lookup failures there degrade to
//! `AuthSource::None` with a diagnostic instead of an error.
//!
//! Only the stateless one-shot transport re-resolves per message; a stream
//! session resolves once at connect time and holds the result for its
//! lifetime, since only one header set is available on the channel.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hyper::http::HeaderMap;
use serde::Serialize;
use serde_json::Value;

/// Header consulted for per-request credentials.
pub const CREDENTIAL_HEADER: &str = "x-api-key";

/// Environment variable for the process-wide credential override.
pub const CREDENTIAL_ENV: &str = "RELAY_API_KEY";

/// Recognized field names inside a base64-encoded credential object, in
/// lookup order.
const CREDENTIAL_FIELDS: &[&str] = &["apiKey", "api_key", "token"];

/// Where a resolved credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthSource {
    /// Per-request transport header.
    Header,
    /// Process-wide override from configuration or environment.
    Environment,
    /// No credential available.
    None,
}

/// The resolved credential for exactly one request (or one stream session).
///
/// Never persisted beyond the request/session that produced it, never merged
/// across requests, and never logged: the `Debug` impl redacts the value.
#[derive(Clone)]
pub struct AuthContext {
    credential: Option<String>,
    source: AuthSource,
    diagnostic: Option<String>,
}

impl AuthContext {
    /// A context with no credential and no diagnostic.
    pub fn anonymous() -> Self {
        Self {
            credential: None,
            source: AuthSource::None,
            diagnostic: None,
        }
    }

    fn resolved(credential: String, source: AuthSource) -> Self {
        Self {
            credential: Some(credential),
            source,
            diagnostic: None,
        }
    }

    fn failed(diagnostic: String) -> Self {
        Self {
            credential: None,
            source: AuthSource::None,
            diagnostic: Some(diagnostic),
        }
    }

    /// The credential value, if one was resolved.
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn source(&self) -> AuthSource {
        self.source
    }

    /// Why resolution produced no credential, when it tried and failed.
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("source", &self.source)
            .field("diagnostic", &self.diagnostic)
            .finish()
    }
}

/// Resolves an [`AuthContext`] from transport headers and startup
/// configuration. The override is immutable after startup and safe to read
/// concurrently.
#[derive(Debug, Clone, Default)]
pub struct AuthResolver {
    override_credential: Option<String>,
}

impl AuthResolver {
    /// Create a resolver with an optional process-wide override. Pass the
    /// value from CLI config or [`CREDENTIAL_ENV`], read once at startup.
    pub fn new(override_credential: Option<String>) -> Self {
        Self {
            override_credential: override_credential.filter(|c| !c.trim().is_empty()),
        }
    }

    /// Resolve a credential for one request.
    pub fn resolve(&self, headers: &HeaderMap) -> AuthContext {
        if let Some(cred) = &self.override_credential {
            return AuthContext::resolved(cred.clone(), AuthSource::Environment);
        }

        let Some(raw) = headers.get(CREDENTIAL_HEADER) else {
            return AuthContext::anonymous();
        };
        let Ok(value) = raw.to_str() else {
            return AuthContext::failed(format!("{CREDENTIAL_HEADER} is not valid UTF-8"));
        };
        let value = value.trim();
        if value.is_empty() {
            return AuthContext::failed(format!("{CREDENTIAL_HEADER} is empty"));
        }

        // base64("{\"...") always starts with eyJ; anything else is a raw token.
        if value.starts_with("eyJ") {
            return decode_credential_object(value);
        }

        AuthContext::resolved(value.to_string(), AuthSource::Header)
    }
}

/// Decode a base64-encoded JSON credential object and extract the first
/// recognized field. All failures degrade to a no-credential context with a
/// diagnostic; the caller decides whether that is fatal.
fn decode_credential_object(value: &str) -> AuthContext {
    let bytes = match BASE64.decode(value) {
        Ok(bytes) => bytes,
        Err(e) => return AuthContext::failed(format!("invalid base64 in credential header: {e}")),
    };
    let parsed: Value = match serde_json::from_slice(&bytes) {
        Ok(parsed) => parsed,
        Err(e) => return AuthContext::failed(format!("invalid JSON in credential header: {e}")),
    };
    let Some(object) = parsed.as_object() else {
        return AuthContext::failed("credential header did not decode to a JSON object".to_string());
    };

    for field in CREDENTIAL_FIELDS {
        if let Some(cred) = object.get(*field).and_then(|v| v.as_str()) {
            if !cred.is_empty() {
                return AuthContext::resolved(cred.to_string(), AuthSource::Header);
            }
        }
    }

    AuthContext::failed(format!(
        "credential object has none of the recognized fields: {}",
        CREDENTIAL_FIELDS.join(", ")
    ))
}
