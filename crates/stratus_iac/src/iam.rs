//! IAM roles, instance profiles and policy grants.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use stratus_core::{DeclarationError, DeclarationResult, LogicalId, Resource, ResourceGraph, ResourceKind, Value};

const POLICY_VERSION: &str = "2012-10-17";

/// Service allowed to assume a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipal(String);

impl ServicePrincipal {
    pub fn new(service: impl Into<String>) -> Self {
        Self(service.into())
    }

    /// The compute service.
    pub fn ec2() -> Self {
        Self::new("ec2.amazonaws.com")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct RoleProps {
    pub name: Option<String>,
    pub assumed_by: ServicePrincipal,
}

/// Handle to a declared role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: LogicalId,
    pub assumed_by: ServicePrincipal,
}

/// Handle to a declared instance profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProfile {
    pub id: LogicalId,
    pub role: LogicalId,
}

impl InstanceProfile {
    pub fn arn(&self) -> Value {
        Value::get_att(&self.id, "Arn")
    }
}

fn role_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[\w+=,.@-]{1,64}$").ok())
        .as_ref()
}

impl Role {
    pub fn declare(graph: &mut ResourceGraph, id: &LogicalId, props: &RoleProps) -> DeclarationResult<Self> {
        if let Some(name) = &props.name {
            if !role_name_pattern().is_some_and(|re| re.is_match(name)) {
                return Err(DeclarationError::InvalidName(format!("role name '{}' is not allowed", name)));
            }
        }

        let trust = Value::map([
            (
                "Statement",
                Value::List(vec![Value::map([
                    ("Action", Value::from("sts:AssumeRole")),
                    ("Effect", Value::from("Allow")),
                    ("Principal", Value::map([("Service", props.assumed_by.as_str())])),
                ])]),
            ),
            ("Version", Value::from(POLICY_VERSION)),
        ]);

        let id = graph.add(
            Resource::new(id.clone(), ResourceKind::IamRole)
                .with_property("AssumeRolePolicyDocument", trust)
                .with_optional("RoleName", props.name.clone()),
        )?;
        Ok(Self {
            id,
            assumed_by: props.assumed_by.clone(),
        })
    }

    pub fn arn(&self) -> Value {
        Value::get_att(&self.id, "Arn")
    }

    /// Declare an instance profile carrying this role, named `{role}Profile`
    /// unless an id is given.
    pub fn instance_profile(
        &self,
        graph: &mut ResourceGraph,
        id: Option<&LogicalId>,
    ) -> DeclarationResult<InstanceProfile> {
        let id = match id {
            Some(id) => id.clone(),
            None => self.id.child("Profile")?,
        };
        let id = graph.add(
            Resource::new(id, ResourceKind::InstanceProfile)
                .with_property("Roles", Value::List(vec![Value::reference(&self.id)])),
        )?;
        Ok(InstanceProfile {
            id,
            role: self.id.clone(),
        })
    }

    /// Allow `actions` on `resource`.
    ///
    /// Grants accumulate in one `{role}DefaultPolicy` attached to the role.
    pub fn grant(&self, graph: &mut ResourceGraph, actions: &[&str], resource: Value) -> DeclarationResult<LogicalId> {
        if actions.is_empty() {
            return Err(DeclarationError::missing(self.id.as_str(), "actions"));
        }

        let action = match actions {
            [single] => Value::from(*single),
            many => Value::List(many.iter().map(|a| Value::from(*a)).collect()),
        };
        let statement = Value::map([
            ("Action", action),
            ("Effect", Value::from("Allow")),
            ("Resource", resource),
        ]);

        let policy_id = self.id.child("DefaultPolicy")?;
        if !graph.contains(&policy_id) {
            graph.add(
                Resource::new(policy_id.clone(), ResourceKind::IamPolicy)
                    .with_property("PolicyName", policy_id.as_str())
                    .with_property(
                        "PolicyDocument",
                        Value::map([
                            ("Statement", Value::List(Vec::new())),
                            ("Version", Value::from(POLICY_VERSION)),
                        ]),
                    )
                    .with_property("Roles", Value::List(vec![Value::reference(&self.id)])),
            )?;
        }

        let policy = graph.get_mut(&policy_id)?;
        match policy.properties.get_mut("PolicyDocument") {
            Some(Value::Map(document)) => match document.get_mut("Statement") {
                Some(Value::List(statements)) => statements.push(statement),
                _ => {
                    document.insert("Statement".to_string(), Value::List(vec![statement]));
                }
            },
            _ => return Err(DeclarationError::missing(policy_id.as_str(), "PolicyDocument")),
        }

        debug!("Granted {} to {}", actions.join(", "), self.id);
        Ok(policy_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn role(graph: &mut ResourceGraph) -> Role {
        Role::declare(
            graph,
            &id("InstanceRole"),
            &RoleProps {
                name: Some("ImmersionDayInstanceRole".to_string()),
                assumed_by: ServicePrincipal::ec2(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_trust_policy_names_principal() {
        let mut graph = ResourceGraph::new("Test");
        let role = role(&mut graph);

        let resource = graph.get(&role.id).unwrap();
        let statement = &resource
            .property("AssumeRolePolicyDocument")
            .and_then(|d| d.get("Statement"))
            .and_then(Value::as_list)
            .unwrap()[0];
        assert_eq!(
            statement.get("Principal").and_then(|p| p.get("Service")).and_then(Value::as_str),
            Some("ec2.amazonaws.com")
        );
    }

    #[test]
    fn test_grants_accumulate_in_default_policy() {
        let mut graph = ResourceGraph::new("Test");
        let role = role(&mut graph);
        let bucket = Value::from("arn:aws:s3:::bucket");

        let first = role.grant(&mut graph, &["s3:GetObject"], bucket.clone()).unwrap();
        let second = role.grant(&mut graph, &["s3:ListBucket", "s3:GetBucketLocation"], bucket).unwrap();
        assert_eq!(first, second);

        let policy = graph.get(&first).unwrap();
        let statements = policy
            .property("PolicyDocument")
            .and_then(|d| d.get("Statement"))
            .and_then(Value::as_list)
            .unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].get("Action").and_then(Value::as_str), Some("s3:GetObject"));
        assert_eq!(statements[1].get("Action").and_then(Value::as_list).map(|a| a.len()), Some(2));
        graph.validate().unwrap();
    }

    #[test]
    fn test_instance_profile() {
        let mut graph = ResourceGraph::new("Test");
        let role = role(&mut graph);
        let profile = role.instance_profile(&mut graph, None).unwrap();
        assert_eq!(profile.id.as_str(), "InstanceRoleProfile");
        assert_eq!(graph.dependents(&role.id).len(), 1);
    }

    #[test]
    fn test_invalid_role_name() {
        let mut graph = ResourceGraph::new("Test");
        let props = RoleProps {
            name: Some("has spaces".to_string()),
            assumed_by: ServicePrincipal::ec2(),
        };
        assert!(matches!(
            Role::declare(&mut graph, &id("Role"), &props),
            Err(DeclarationError::InvalidName(_))
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_empty_grant_rejected() {
        let mut graph = ResourceGraph::new("Test");
        let role = role(&mut graph);
        assert!(role.grant(&mut graph, &[], Value::from("*")).is_err());
    }
}
