//! Generated database credentials.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use stratus_core::{DeclarationError, DeclarationResult, LogicalId, Resource, ResourceGraph, ResourceKind, Value};

use crate::iam::Role;

/// Characters left out of generated passwords.
pub const DEFAULT_EXCLUDE_CHARACTERS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

const PASSWORD_LENGTH: i64 = 30;

const READ_ACTIONS: [&str; 2] = ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"];

#[derive(Debug, Clone)]
pub struct DatabaseSecretProps {
    pub name: Option<String>,
    pub username: String,
    pub exclude_characters: Option<String>,
}

impl DatabaseSecretProps {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            name: None,
            username: username.into(),
            exclude_characters: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Handle to a declared credential secret.
///
/// The password is generated by the secret store; the declaration only
/// carries the generation template, never the credential itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSecret {
    pub id: LogicalId,
    pub username: String,
}

fn username_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,15}$").ok())
        .as_ref()
}

impl DatabaseSecret {
    pub fn declare(graph: &mut ResourceGraph, id: &LogicalId, props: &DatabaseSecretProps) -> DeclarationResult<Self> {
        if !username_pattern().is_some_and(|re| re.is_match(&props.username)) {
            return Err(DeclarationError::InvalidName(format!(
                "database username '{}' must start with a letter and use at most 16 letters, digits or underscores",
                props.username
            )));
        }

        let exclude = props
            .exclude_characters
            .clone()
            .unwrap_or_else(|| DEFAULT_EXCLUDE_CHARACTERS.to_string());
        let template = Value::map([
            (
                "SecretStringTemplate",
                Value::from(json!({ "username": props.username }).to_string()),
            ),
            ("GenerateStringKey", Value::from("password")),
            ("PasswordLength", Value::from(PASSWORD_LENGTH)),
            ("ExcludeCharacters", Value::from(exclude)),
        ]);

        let id = graph.add(
            Resource::new(id.clone(), ResourceKind::Secret)
                .with_property("GenerateSecretString", template)
                .with_optional("Name", props.name.clone()),
        )?;
        Ok(Self {
            id,
            username: props.username.clone(),
        })
    }

    pub fn secret_arn(&self) -> Value {
        Value::reference(&self.id)
    }

    /// Dynamic reference to one field of the secret value, resolved by the
    /// provider when the consuming resource is realized.
    pub fn secret_value_field(&self, field: &str) -> Value {
        Value::join(
            "",
            vec![
                Value::from("{{resolve:secretsmanager:"),
                self.secret_arn(),
                Value::from(format!(":SecretString:{}::}}}}", field)),
            ],
        )
    }

    /// Allow `role` to read the secret value.
    pub fn grant_read(&self, graph: &mut ResourceGraph, role: &Role) -> DeclarationResult<LogicalId> {
        role.grant(graph, &READ_ACTIONS, self.secret_arn())
    }

    /// Link the secret to a database cluster so it records the connection
    /// details once the cluster exists.
    pub fn attach_to_cluster(&self, graph: &mut ResourceGraph, cluster: &LogicalId) -> DeclarationResult<LogicalId> {
        graph.add(
            Resource::new(self.id.child("AttachedSecret")?, ResourceKind::SecretTargetAttachment)
                .with_property("SecretId", self.secret_arn())
                .with_property("TargetId", Value::reference(cluster))
                .with_property("TargetType", ResourceKind::DbCluster.type_name()),
        )
    }
}

/// Whether a value is a secret-store dynamic reference rather than a literal.
pub fn is_secret_reference(value: &Value) -> bool {
    match value {
        Value::Join { parts, .. } => {
            parts.first().and_then(Value::as_str) == Some("{{resolve:secretsmanager:")
                && parts
                    .iter()
                    .any(|p| p.as_reference().is_some_and(|r| r.attribute.is_none()))
        }
        Value::Str(s) => s.starts_with("{{resolve:secretsmanager:"),
        _ => false,
    }
}
