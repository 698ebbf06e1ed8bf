//! Declaration-time error types.

use thiserror::Error;

use crate::id::LogicalId;

/// Result type alias for declaration operations.
pub type DeclarationResult<T> = Result<T, DeclarationError>;

/// Errors raised while assembling or validating a resource graph.
///
/// Every variant blocks an apply; all of them are fixed by changing the
/// declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    #[error("Invalid logical id: {0}")]
    InvalidLogicalId(String),

    #[error("Duplicate resource: {0}")]
    DuplicateResource(LogicalId),

    #[error("Unknown resource: {0}")]
    UnknownResource(LogicalId),

    #[error("Dangling reference: {from} refers to undeclared resource {to}")]
    DanglingReference { from: LogicalId, to: LogicalId },

    #[error("Dependency cycle between: {}", format_ids(.0))]
    DependencyCycle(Vec<LogicalId>),

    #[error("Invalid range for {field}: {message}")]
    InvalidRange { field: String, message: String },

    #[error("Missing required field {field} on {resource}")]
    MissingField { resource: String, field: String },

    #[error("Invalid CIDR block: {0}")]
    InvalidCidr(String),

    #[error("Address space exhausted: {0}")]
    AddressSpaceExhausted(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid placement: {0}")]
    InvalidPlacement(String),

    #[error("Inconsistent wiring: {0}")]
    InconsistentWiring(String),

    #[error("Manifest rendering failed: {0}")]
    Rendering(String),

    #[error("Multiple declaration errors: {}", format_errors(.0))]
    Multiple(Vec<DeclarationError>),
}

impl DeclarationError {
    pub fn range(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRange {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing(resource: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            resource: resource.into(),
            field: field.into(),
        }
    }

    /// Collapse a list of errors into one, or `None` if the list is empty.
    pub fn collect(mut errors: Vec<DeclarationError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }
}

fn format_ids(ids: &[LogicalId]) -> String {
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}

fn format_errors(errors: &[DeclarationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
