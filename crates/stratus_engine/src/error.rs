//! Error types for planning and applying.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stratus_core::{DeclarationError, LogicalId};

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while planning, applying or destroying a stack.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    #[error("Apply failed: {0}")]
    Apply(#[from] ApplyError),

    #[error("State error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why the provider refused a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyFailureKind {
    QuotaExceeded,
    NameCollision,
    /// The region does not offer the requested capability, e.g. an
    /// instance type.
    UnsupportedCapability,
    PermissionDenied,
    Provider,
}

impl fmt::Display for ApplyFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ApplyFailureKind::QuotaExceeded => "quota exceeded",
            ApplyFailureKind::NameCollision => "name collision",
            ApplyFailureKind::UnsupportedCapability => "unsupported capability",
            ApplyFailureKind::PermissionDenied => "permission denied",
            ApplyFailureKind::Provider => "provider error",
        };
        write!(f, "{}", text)
    }
}

/// A failure reported while realizing one resource.
///
/// `completed` lists the resources realized earlier in the same apply; their
/// state has been persisted so the stack can be inspected and re-applied.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} on {resource}: {message}")]
pub struct ApplyError {
    pub resource: LogicalId,
    pub kind: ApplyFailureKind,
    pub message: String,
    pub completed: Vec<LogicalId>,
}

impl ApplyError {
    pub fn new(resource: &LogicalId, kind: ApplyFailureKind, message: impl Into<String>) -> Self {
        Self {
            resource: resource.clone(),
            kind,
            message: message.into(),
            completed: Vec::new(),
        }
    }

    pub fn with_completed(mut self, completed: Vec<LogicalId>) -> Self {
        self.completed = completed;
        self
    }
}
