//! Aurora database cluster.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use stratus_core::{DeclarationError, DeclarationResult, LogicalId, Resource, ResourceGraph, ResourceKind, Value};

use crate::compute::InstanceType;
use crate::network::{Network, SubnetSelection};
use crate::secret::DatabaseSecret;
use crate::security::{SecurityGroup, Tier};

/// Engine name and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEngine {
    pub engine: String,
    pub version: String,
}

impl ClusterEngine {
    pub fn aurora_mysql(version: impl Into<String>) -> Self {
        Self {
            engine: "aurora-mysql".to_string(),
            version: version.into(),
        }
    }
}

pub struct DatabaseClusterProps<'a> {
    pub engine: ClusterEngine,
    pub instance_type: InstanceType,
    pub instances: u32,
    pub port: u16,
    pub default_database_name: Option<String>,
    pub subnets: SubnetSelection,
    pub security_groups: Vec<&'a SecurityGroup>,
    pub credentials: &'a DatabaseSecret,
}

/// Handle to a declared database cluster.
#[derive(Debug, Clone)]
pub struct DatabaseCluster {
    pub id: LogicalId,
    pub subnet_group: LogicalId,
    pub instances: Vec<LogicalId>,
    pub secret_attachment: LogicalId,
    pub port: u16,
}

fn database_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,63}$").ok())
        .as_ref()
}

impl DatabaseCluster {
    /// Declare the subnet group, cluster, instances and secret attachment.
    ///
    /// The cluster may only be placed in non-public subnets spanning at
    /// least two availability zones. Credentials are dynamic references to
    /// the secret; the password never appears in the declaration.
    pub fn declare(
        graph: &mut ResourceGraph,
        id: &LogicalId,
        network: &Network,
        props: &DatabaseClusterProps<'_>,
    ) -> DeclarationResult<Self> {
        if props.instances == 0 {
            return Err(DeclarationError::range("instances", "a cluster needs at least one instance"));
        }
        if !props.instance_type.is_database_class() {
            return Err(DeclarationError::InvalidName(format!(
                "{} is not a database instance class",
                props.instance_type
            )));
        }
        if props.engine.version.trim().is_empty() {
            return Err(DeclarationError::missing(id.as_str(), "engine version"));
        }
        if let Some(name) = &props.default_database_name {
            if !database_name_pattern().is_some_and(|re| re.is_match(name)) {
                return Err(DeclarationError::InvalidName(format!("database name '{}' is not allowed", name)));
            }
        }
        if props.security_groups.is_empty() {
            return Err(DeclarationError::missing(id.as_str(), "security_groups"));
        }
        if let Some(sg) = props.security_groups.iter().find(|sg| sg.tier != Tier::Database) {
            return Err(DeclarationError::InconsistentWiring(format!(
                "{} is a {} tier group, the cluster needs database tier groups",
                sg.id, sg.tier
            )));
        }

        let subnets = network.select_subnets(&props.subnets)?;
        if let Some(public) = subnets.iter().find(|s| s.subnet_type.is_public()) {
            return Err(DeclarationError::InvalidPlacement(format!(
                "{} selects public subnet {} of group {}",
                id, public.id, public.group
            )));
        }
        let zones: BTreeSet<&str> = subnets.iter().map(|s| s.availability_zone.as_str()).collect();
        if zones.len() < 2 {
            return Err(DeclarationError::InvalidPlacement(format!(
                "{} needs subnets in at least 2 availability zones, got {}",
                id,
                zones.len()
            )));
        }

        let subnet_group = graph.add(
            Resource::new(id.child("Subnets")?, ResourceKind::DbSubnetGroup)
                .with_property("DBSubnetGroupDescription", format!("Subnets for {} database", id))
                .with_property("SubnetIds", Value::List(subnets.iter().map(|s| s.subnet_id()).collect())),
        )?;

        let secret = props.credentials;
        let cluster = graph.add(
            Resource::new(id.clone(), ResourceKind::DbCluster)
                .with_property("Engine", props.engine.engine.as_str())
                .with_property("EngineVersion", props.engine.version.as_str())
                .with_property("DBSubnetGroupName", Value::reference(&subnet_group))
                .with_property(
                    "VpcSecurityGroupIds",
                    Value::List(props.security_groups.iter().map(|sg| sg.group_id()).collect()),
                )
                .with_property("Port", props.port)
                .with_optional("DatabaseName", props.default_database_name.clone())
                .with_property("MasterUsername", secret.secret_value_field("username"))
                .with_property("MasterUserPassword", secret.secret_value_field("password"))
                .with_property("CopyTagsToSnapshot", true),
        )?;

        let mut instances = Vec::new();
        for n in 1..=props.instances {
            let mut instance = Resource::new(id.child(&format!("Instance{}", n))?, ResourceKind::DbInstance)
                .with_property("DBClusterIdentifier", Value::reference(&cluster))
                .with_property("DBInstanceClass", props.instance_type.as_str())
                .with_property("DBSubnetGroupName", Value::reference(&subnet_group))
                .with_property("Engine", props.engine.engine.as_str())
                .with_property("PubliclyAccessible", false);
            for route in subnets.iter().filter_map(|s| s.default_route.as_ref()) {
                instance = instance.depends_on(route);
            }
            instances.push(graph.add(instance)?);
        }

        let secret_attachment = secret.attach_to_cluster(graph, &cluster)?;

        info!(
            "Declared {} cluster {} with {} instances in {} subnets",
            props.engine.engine,
            cluster,
            instances.len(),
            subnets.len()
        );
        Ok(Self {
            id: cluster,
            subnet_group,
            instances,
            secret_attachment,
            port: props.port,
        })
    }

    pub fn endpoint(&self) -> Value {
        Value::get_att(&self.id, "Endpoint.Address")
    }
}
