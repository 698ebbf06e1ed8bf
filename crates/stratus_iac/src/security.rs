//! Security groups and ingress rules.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use stratus_core::{DeclarationError, DeclarationResult, Ipv4Cidr, LogicalId, Resource, ResourceGraph, ResourceKind, Value};

use crate::network::Network;

/// IP protocol of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    /// Every protocol (`-1`).
    All,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::All => "-1",
        }
    }
}

/// Protocol plus port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub protocol: Protocol,
    pub from: u16,
    pub to: u16,
}

impl Port {
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from: port,
            to: port,
        }
    }

    pub fn tcp_range(from: u16, to: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from,
            to,
        }
    }

    pub fn all_traffic() -> Self {
        Self {
            protocol: Protocol::All,
            from: 0,
            to: 65535,
        }
    }

    /// Whether `port` falls inside this range.
    pub fn covers(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }

    fn id_suffix(&self) -> String {
        match self.protocol {
            Protocol::All => "AllTraffic".to_string(),
            _ if self.from == self.to => self.from.to_string(),
            _ => format!("{}to{}", self.from, self.to),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::All => write!(f, "ALL TRAFFIC"),
            _ if self.from == self.to => write!(f, "{}", self.from),
            _ => write!(f, "{}-{}", self.from, self.to),
        }
    }
}

/// Source of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    /// `0.0.0.0/0`.
    AnyIpv4,
    Cidr(Ipv4Cidr),
    /// Another declared security group.
    SecurityGroup(LogicalId),
}

impl Peer {
    pub fn any_ipv4() -> Self {
        Peer::AnyIpv4
    }

    pub fn security_group(group: &SecurityGroup) -> Self {
        Peer::SecurityGroup(group.id.clone())
    }

    /// Whether the peer admits every address.
    pub fn is_unrestricted(&self) -> bool {
        match self {
            Peer::AnyIpv4 => true,
            Peer::Cidr(cidr) => cidr.is_unrestricted(),
            Peer::SecurityGroup(_) => false,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::AnyIpv4 => write!(f, "{}", Ipv4Cidr::any()),
            Peer::Cidr(cidr) => write!(f, "{}", cidr),
            Peer::SecurityGroup(id) => write!(f, "{}", id),
        }
    }
}

/// What a security group protects.
///
/// Only the edge tier may accept traffic from an unrestricted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Edge,
    Compute,
    Database,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Edge => "edge",
            Tier::Compute => "compute",
            Tier::Database => "database",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SecurityGroupProps {
    /// Provider-side group name. Generated by the provider when unset.
    pub name: Option<String>,
    pub description: Option<String>,
    pub tier: Tier,
    pub allow_all_outbound: bool,
}

impl SecurityGroupProps {
    pub fn new(tier: Tier) -> Self {
        Self {
            name: None,
            description: None,
            tier,
            allow_all_outbound: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Handle to a declared security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroup {
    pub id: LogicalId,
    pub tier: Tier,
}

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9 ._:/()#,@\[\]+=&;{}!$*-]{1,255}$").ok())
        .as_ref()
}

impl SecurityGroup {
    pub fn declare(
        graph: &mut ResourceGraph,
        id: &LogicalId,
        network: &Network,
        props: &SecurityGroupProps,
    ) -> DeclarationResult<Self> {
        if let Some(name) = &props.name {
            let valid = name_pattern().is_some_and(|re| re.is_match(name));
            if !valid || name.starts_with("sg-") {
                return Err(DeclarationError::InvalidName(format!(
                    "security group name '{}' is not allowed",
                    name
                )));
            }
        }

        let description = props
            .description
            .clone()
            .unwrap_or_else(|| format!("{}/{}", graph.name(), id));

        let mut resource = Resource::new(id.clone(), ResourceKind::SecurityGroup)
            .with_property("GroupDescription", description)
            .with_property("VpcId", network.vpc_id())
            .with_optional("GroupName", props.name.clone());
        if props.allow_all_outbound {
            resource = resource.with_property(
                "SecurityGroupEgress",
                Value::List(vec![Value::map([
                    ("CidrIp", Value::from(Ipv4Cidr::any().to_string())),
                    ("IpProtocol", Value::from(Protocol::All.as_str())),
                    ("Description", Value::from("Allow all outbound traffic by default")),
                ])]),
            );
        }

        let id = graph.add(resource)?;
        Ok(Self { id, tier: props.tier })
    }

    /// Deferred reference to the generated group id.
    pub fn group_id(&self) -> Value {
        Value::get_att(&self.id, "GroupId")
    }

    /// Allow inbound traffic from `peer` on `port`.
    ///
    /// Address ranges become inline rules on the group. Group peers become a
    /// separate ingress resource so two groups can reference each other
    /// without a dependency cycle.
    pub fn add_ingress_rule(&self, graph: &mut ResourceGraph, peer: Peer, port: Port) -> DeclarationResult<()> {
        if peer.is_unrestricted() && self.tier != Tier::Edge {
            return Err(DeclarationError::InvalidPlacement(format!(
                "{} is a {} tier group and cannot accept traffic from {}",
                self.id, self.tier, peer
            )));
        }
        if port.from > port.to {
            return Err(DeclarationError::range(
                "port",
                format!("{} > {} on {}", port.from, port.to, self.id),
            ));
        }

        let description = format!("from {}:{}", peer, port);
        match &peer {
            Peer::AnyIpv4 | Peer::Cidr(_) => {
                let rule = Value::map([
                    ("CidrIp", Value::from(peer.to_string())),
                    ("IpProtocol", Value::from(port.protocol.as_str())),
                    ("FromPort", Value::from(port.from)),
                    ("ToPort", Value::from(port.to)),
                    ("Description", Value::from(description)),
                ]);
                graph.get_mut(&self.id)?.push_property("SecurityGroupIngress", rule);
            }
            Peer::SecurityGroup(source) => {
                let rule_id = self.id.child(&format!("From{}{}", source, port.id_suffix()))?;
                graph.add(
                    Resource::new(rule_id, ResourceKind::SecurityGroupIngress)
                        .with_property("GroupId", self.group_id())
                        .with_property("SourceSecurityGroupId", Value::get_att(source, "GroupId"))
                        .with_property("IpProtocol", port.protocol.as_str())
                        .with_property("FromPort", port.from)
                        .with_property("ToPort", port.to)
                        .with_property("Description", description),
                )?;
            }
        }
        debug!("Ingress on {} from {} port {}", self.id, peer, port);
        Ok(())
    }
}

/// An ingress rule as read back from a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct IngressRule {
    /// Group the rule admits traffic into.
    pub group: LogicalId,
    pub cidr: Option<String>,
    pub source_group: Option<LogicalId>,
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
}

impl IngressRule {
    pub fn covers(&self, port: u16) -> bool {
        let port = i64::from(port);
        match (self.from_port, self.to_port) {
            (Some(from), Some(to)) => from <= port && port <= to,
            _ => false,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.cidr
            .as_deref()
            .and_then(|c| c.parse::<Ipv4Cidr>().ok())
            .is_some_and(|c| c.is_unrestricted())
    }
}

/// Every ingress rule in the graph, inline or standalone.
pub fn ingress_rules(graph: &ResourceGraph) -> Vec<IngressRule> {
    let mut rules = Vec::new();

    for group in graph.of_kind(ResourceKind::SecurityGroup) {
        let inline = group
            .property("SecurityGroupIngress")
            .and_then(Value::as_list)
            .unwrap_or_default();
        for rule in inline {
            rules.push(IngressRule {
                group: group.id.clone(),
                cidr: rule.get("CidrIp").and_then(Value::as_str).map(str::to_string),
                source_group: rule
                    .get("SourceSecurityGroupId")
                    .and_then(Value::as_reference)
                    .map(|r| r.target.clone()),
                from_port: rule.get("FromPort").and_then(Value::as_int),
                to_port: rule.get("ToPort").and_then(Value::as_int),
            });
        }
    }

    for rule in graph.of_kind(ResourceKind::SecurityGroupIngress) {
        let Some(group) = rule
            .property("GroupId")
            .and_then(Value::as_reference)
            .map(|r| r.target.clone())
        else {
            continue;
        };
        rules.push(IngressRule {
            group,
            cidr: rule.property("CidrIp").and_then(Value::as_str).map(str::to_string),
            source_group: rule
                .property("SourceSecurityGroupId")
                .and_then(Value::as_reference)
                .map(|r| r.target.clone()),
            from_port: rule.property("FromPort").and_then(Value::as_int),
            to_port: rule.property("ToPort").and_then(Value::as_int),
        });
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkProps, SubnetGroupConfig, SubnetType};

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn setup() -> (ResourceGraph, Network) {
        let mut graph = ResourceGraph::new("Test");
        let network = Network::declare(
            &mut graph,
            &id("Vpc"),
            &NetworkProps {
                name: "Vpc".to_string(),
                cidr: "10.0.0.0/16".parse().unwrap(),
                region: "eu-west-1".to_string(),
                max_azs: 2,
                nat_gateways: 1,
                subnet_groups: vec![
                    SubnetGroupConfig::new("Private", SubnetType::PrivateWithEgress, 24),
                    SubnetGroupConfig::new("Public", SubnetType::Public, 24),
                ],
            },
        )
        .unwrap();
        (graph, network)
    }

    #[test]
    fn test_declare_with_default_egress() {
        let (mut graph, network) = setup();
        let sg = SecurityGroup::declare(
            &mut graph,
            &id("Web"),
            &network,
            &SecurityGroupProps::new(Tier::Edge).with_name("WebSG"),
        )
        .unwrap();

        let resource = graph.get(&sg.id).unwrap();
        assert_eq!(resource.property("GroupName").and_then(Value::as_str), Some("WebSG"));
        assert_eq!(resource.property("GroupDescription").and_then(Value::as_str), Some("Test/Web"));
        let egress = resource.property("SecurityGroupEgress").unwrap().as_list().unwrap();
        assert_eq!(egress[0].get("IpProtocol").and_then(Value::as_str), Some("-1"));
    }

    #[test]
    fn test_cidr_ingress_is_inline() {
        let (mut graph, network) = setup();
        let sg = SecurityGroup::declare(&mut graph, &id("Web"), &network, &SecurityGroupProps::new(Tier::Edge)).unwrap();
        sg.add_ingress_rule(&mut graph, Peer::any_ipv4(), Port::tcp(80)).unwrap();

        let rules = ingress_rules(&graph);
        assert_eq!(rules.len(), 1);
        assert!(rules[0].is_unrestricted());
        assert!(rules[0].covers(80));
        assert!(!rules[0].covers(443));
    }

    #[test]
    fn test_group_peer_is_separate_resource() {
        let (mut graph, network) = setup();
        let web = SecurityGroup::declare(&mut graph, &id("Web"), &network, &SecurityGroupProps::new(Tier::Edge)).unwrap();
        let app = SecurityGroup::declare(&mut graph, &id("App"), &network, &SecurityGroupProps::new(Tier::Compute)).unwrap();
        app.add_ingress_rule(&mut graph, Peer::security_group(&web), Port::tcp(80)).unwrap();

        let rule = graph.get(&id("AppFromWeb80")).unwrap();
        assert_eq!(rule.kind, ResourceKind::SecurityGroupIngress);
        assert_eq!(rule.property("SourceSecurityGroupId"), Some(&web.group_id()));
        assert_eq!(rule.property("Description").and_then(Value::as_str), Some("from Web:80"));
        graph.validate().unwrap();
    }

    #[test]
    fn test_unrestricted_ingress_rejected_outside_edge() {
        let (mut graph, network) = setup();
        let db = SecurityGroup::declare(&mut graph, &id("Db"), &network, &SecurityGroupProps::new(Tier::Database)).unwrap();

        let result = db.add_ingress_rule(&mut graph, Peer::any_ipv4(), Port::tcp(3306));
        assert!(matches!(result, Err(DeclarationError::InvalidPlacement(_))));

        let result = db.add_ingress_rule(&mut graph, Peer::Cidr(Ipv4Cidr::any()), Port::tcp(3306));
        assert!(result.is_err());

        db.add_ingress_rule(&mut graph, Peer::Cidr("10.0.0.0/16".parse().unwrap()), Port::tcp(3306))
            .unwrap();
    }

    #[test]
    fn test_invalid_group_name() {
        let (mut graph, network) = setup();
        let props = SecurityGroupProps::new(Tier::Edge).with_name("sg-123");
        assert!(SecurityGroup::declare(&mut graph, &id("Web"), &network, &props).is_err());

        let props = SecurityGroupProps::new(Tier::Edge).with_name("bad|name");
        assert!(SecurityGroup::declare(&mut graph, &id("Web"), &network, &props).is_err());
    }

    #[test]
    fn test_port_display() {
        assert_eq!(Port::tcp(80).to_string(), "80");
        assert_eq!(Port::tcp_range(8000, 8080).to_string(), "8000-8080");
        assert_eq!(Port::all_traffic().to_string(), "ALL TRAFFIC");
        assert!(Port::tcp_range(8000, 8080).covers(8001));
    }
}
