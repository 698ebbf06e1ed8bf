//! Target group, application load balancer and listener.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use stratus_core::{DeclarationError, DeclarationResult, LogicalId, Resource, ResourceGraph, ResourceKind, Value};

use crate::compute::AutoScalingGroup;
use crate::network::{Network, SubnetSelection, SubnetType};
use crate::security::{SecurityGroup, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApplicationProtocol {
    Http,
    Https,
}

impl ApplicationProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationProtocol::Http => "HTTP",
            ApplicationProtocol::Https => "HTTPS",
        }
    }
}

impl fmt::Display for ApplicationProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a target group registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Instance,
    Ip,
    Lambda,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Instance => "instance",
            TargetType::Ip => "ip",
            TargetType::Lambda => "lambda",
        }
    }
}

fn elb_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,30}[A-Za-z0-9])?$").ok())
        .as_ref()
}

fn check_elb_name(name: &str) -> DeclarationResult<()> {
    let valid = elb_name_pattern().is_some_and(|re| re.is_match(name)) && !name.starts_with("internal-");
    if valid {
        Ok(())
    } else {
        Err(DeclarationError::InvalidName(format!(
            "'{}' must be 1-32 letters, digits or hyphens and not start or end with a hyphen",
            name
        )))
    }
}

pub struct TargetGroupProps<'a> {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: ApplicationProtocol,
    pub target_type: TargetType,
    pub targets: Vec<&'a AutoScalingGroup>,
}

/// Handle to a declared target group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    pub id: LogicalId,
    pub port: u16,
    pub protocol: ApplicationProtocol,
    pub target_type: TargetType,
}

impl TargetGroup {
    pub fn declare(
        graph: &mut ResourceGraph,
        id: &LogicalId,
        network: &Network,
        props: &TargetGroupProps<'_>,
    ) -> DeclarationResult<Self> {
        if let Some(name) = &props.name {
            check_elb_name(name)?;
        }
        // Autoscaling groups register instances.
        if !props.targets.is_empty() && props.target_type != TargetType::Instance {
            return Err(DeclarationError::InconsistentWiring(format!(
                "{} registers autoscaling groups but has target type {}",
                id,
                props.target_type.as_str()
            )));
        }
        if props.port == 0 {
            return Err(DeclarationError::range("port", "target group port must be 1-65535"));
        }

        let targets: Vec<Value> = props.targets.iter().map(|asg| Value::reference(&asg.id)).collect();
        let id = graph.add(
            Resource::new(id.clone(), ResourceKind::TargetGroup)
                .with_optional("Name", props.name.clone())
                .with_property("Port", props.port)
                .with_property("Protocol", props.protocol.as_str())
                .with_property("TargetType", props.target_type.as_str())
                .with_property("VpcId", network.vpc_id())
                .with_property("TargetAutoScalingGroups", Value::List(targets)),
        )?;
        Ok(Self {
            id,
            port: props.port,
            protocol: props.protocol,
            target_type: props.target_type,
        })
    }

    pub fn arn(&self) -> Value {
        Value::reference(&self.id)
    }
}

pub struct LoadBalancerProps<'a> {
    pub name: Option<String>,
    pub security_group: &'a SecurityGroup,
    pub internet_facing: bool,
}

/// Handle to a declared application load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub id: LogicalId,
    pub internet_facing: bool,
}

pub struct ListenerProps<'a> {
    pub port: u16,
    pub protocol: ApplicationProtocol,
    pub default_target_group: &'a TargetGroup,
}

/// Handle to a declared listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub id: LogicalId,
    pub port: u16,
    pub target_group: LogicalId,
}

impl LoadBalancer {
    /// Internet-facing balancers go in the public subnets and wait for their
    /// routes to the internet gateway; internal ones use the private subnets.
    pub fn declare(
        graph: &mut ResourceGraph,
        id: &LogicalId,
        network: &Network,
        props: &LoadBalancerProps<'_>,
    ) -> DeclarationResult<Self> {
        if let Some(name) = &props.name {
            check_elb_name(name)?;
        }
        if props.security_group.tier != Tier::Edge {
            return Err(DeclarationError::InconsistentWiring(format!(
                "{} is a {} tier group, a load balancer needs an edge tier group",
                props.security_group.id, props.security_group.tier
            )));
        }

        let (scheme, selection) = if props.internet_facing {
            ("internet-facing", SubnetSelection::Type(SubnetType::Public))
        } else {
            ("internal", SubnetSelection::Type(SubnetType::PrivateWithEgress))
        };
        let subnets = network.select_subnets(&selection)?;
        if subnets.len() < 2 {
            return Err(DeclarationError::InvalidPlacement(format!(
                "{} needs subnets in at least 2 availability zones",
                id
            )));
        }

        let mut resource = Resource::new(id.clone(), ResourceKind::LoadBalancer)
            .with_optional("Name", props.name.clone())
            .with_property("Scheme", scheme)
            .with_property("Type", "application")
            .with_property("SecurityGroups", Value::List(vec![props.security_group.group_id()]))
            .with_property("Subnets", Value::List(subnets.iter().map(|s| s.subnet_id()).collect()))
            .with_property(
                "LoadBalancerAttributes",
                Value::List(vec![Value::map([
                    ("Key", "deletion_protection.enabled"),
                    ("Value", "false"),
                ])]),
            );
        if props.internet_facing {
            for route in subnets.iter().filter_map(|s| s.default_route.as_ref()) {
                resource = resource.depends_on(route);
            }
        }

        let id = graph.add(resource)?;
        info!("Declared {} load balancer {} over {} subnets", scheme, id, subnets.len());
        Ok(Self {
            id,
            internet_facing: props.internet_facing,
        })
    }

    pub fn arn(&self) -> Value {
        Value::reference(&self.id)
    }

    pub fn dns_name(&self) -> Value {
        Value::get_att(&self.id, "DNSName")
    }

    /// Add a listener forwarding to a default target group.
    ///
    /// The listener port must equal the target group port.
    pub fn add_listener(
        &self,
        graph: &mut ResourceGraph,
        id: &LogicalId,
        props: &ListenerProps<'_>,
    ) -> DeclarationResult<Listener> {
        let target_group = props.default_target_group;
        if props.port != target_group.port {
            return Err(DeclarationError::InconsistentWiring(format!(
                "listener {} on port {} forwards to {} on port {}",
                id, props.port, target_group.id, target_group.port
            )));
        }
        if props.protocol != target_group.protocol {
            return Err(DeclarationError::InconsistentWiring(format!(
                "listener {} speaks {} but {} expects {}",
                id, props.protocol, target_group.id, target_group.protocol
            )));
        }

        let id = graph.add(
            Resource::new(id.clone(), ResourceKind::Listener)
                .with_property("LoadBalancerArn", self.arn())
                .with_property("Port", props.port)
                .with_property("Protocol", props.protocol.as_str())
                .with_property(
                    "DefaultActions",
                    Value::List(vec![Value::map([
                        ("Type", Value::from("forward")),
                        ("TargetGroupArn", target_group.arn()),
                    ])]),
                ),
        )?;
        Ok(Listener {
            id,
            port: props.port,
            target_group: target_group.id.clone(),
        })
    }
}
