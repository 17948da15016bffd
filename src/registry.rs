//! Registry of named operations exposed by the server.
//!
//! The registry is built once at startup and shared read-only across all
//! sessions afterwards. Each descriptor carries a compiled JSON schema for
//! its arguments, so dispatch never re-parses schemas on the hot path.
//!
//! Disabled tools are excluded from discovery listings and resolve as "not
//! found" rather than "forbidden", so feature gating is not observable.

use crate::auth::AuthContext;
use crate::error::ToolError;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by tool handlers.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;

/// Async handler invoked with the validated arguments and the request's
/// resolved credential context.
pub type ToolHandler = Arc<dyn Fn(Value, AuthContext) -> ToolFuture + Send + Sync>;

/// Errors from registry construction.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateName(String),
    #[error("Invalid parameter schema for tool {name}: {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// One operation offered by the server.
pub struct ToolDescriptor {
    name: String,
    description: String,
    schema: Value,
    compiled: JSONSchema,
    handler: ToolHandler,
    enabled: bool,
}

impl ToolDescriptor {
    /// Build a descriptor, compiling the parameter schema. Fails if the
    /// schema itself is not a valid JSON schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: ToolHandler,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        let compiled = JSONSchema::compile(&schema).map_err(|e| RegistryError::InvalidSchema {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name,
            description: description.into(),
            schema,
            compiled,
            handler,
            enabled: true,
        })
    }

    /// Mark the descriptor as disabled. Disabled tools are invisible to
    /// callers: absent from listings, and dispatch reports "not found".
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Validate arguments against the compiled schema. Returns a description
    /// of the violated constraints on mismatch.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), String> {
        if let Err(errors) = self.compiled.validate(arguments) {
            let reasons: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(reasons.join("; "));
        }
        Ok(())
    }

    /// Invoke the handler.
    pub fn invoke(&self, arguments: Value, auth: AuthContext) -> ToolFuture {
        (self.handler)(arguments, auth)
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Insertion-ordered table of tool descriptors.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Fails if the name already exists - overwriting
    /// an operation would hide bugs, so there is no silent replace.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        if self.index.contains_key(descriptor.name()) {
            return Err(RegistryError::DuplicateName(descriptor.name().to_string()));
        }
        self.index
            .insert(descriptor.name().to_string(), self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    /// Enabled descriptors in registration order. The order is observable to
    /// callers enumerating operations and is stable across calls.
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().filter(|t| t.is_enabled())
    }

    /// Resolve a name to its descriptor. Unknown and disabled names both
    /// return `None`.
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .filter(|t| t.is_enabled())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.len())
            .finish()
    }
}
