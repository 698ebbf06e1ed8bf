//! Logical resource identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DeclarationError, DeclarationResult};

/// Declaration-scoped name of a resource.
///
/// Logical ids start with a letter and contain only ASCII letters and
/// digits, so they can be used verbatim as manifest keys. The engine maps
/// each logical id to the physical id of the realized resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalId(String);

fn pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{0,254}$").ok())
        .as_ref()
}

fn stack_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").ok())
        .as_ref()
}

/// Check a stack name: a letter, then letters, digits and hyphens.
///
/// Stack names become state file names, so nothing else is accepted.
pub fn check_stack_name(name: &str) -> DeclarationResult<()> {
    if stack_name_pattern().is_some_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(DeclarationError::InvalidName(format!(
            "stack name '{}' must start with a letter and use only letters, digits and hyphens",
            name
        )))
    }
}

impl LogicalId {
    pub fn new(id: impl Into<String>) -> DeclarationResult<Self> {
        let id = id.into();
        match pattern() {
            Some(re) if re.is_match(&id) => Ok(Self(id)),
            _ => Err(DeclarationError::InvalidLogicalId(id)),
        }
    }

    /// Derive a child id by appending a suffix, e.g. `ImmersionDay` →
    /// `ImmersionDayPrivateSubnet1`.
    pub fn child(&self, suffix: &str) -> DeclarationResult<Self> {
        Self::new(format!("{}{}", self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LogicalId {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for LogicalId {
    type Error = DeclarationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LogicalId> for String {
    fn from(id: LogicalId) -> Self {
        id.0
    }
}

impl AsRef<str> for LogicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
