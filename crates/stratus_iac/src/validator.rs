//! Post-assembly topology checks.
//!
//! The builders already refuse most bad wiring while the graph is assembled.
//! These checks read the finished graph back, so they also hold for graphs
//! assembled by hand or edited after the fact.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use stratus_core::{LogicalId, Resource, ResourceGraph, ResourceKind, Value};

use crate::compute::declared_capacity;
use crate::network::{tag_value, SUBNET_NAME_TAG, SUBNET_TYPE_TAG};
use crate::secret::is_secret_reference;
use crate::security::{ingress_rules, IngressRule, Tier};

/// Validation report for a topology.
#[derive(Debug)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
    pub passed: bool,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            passed: true,
        }
    }

    pub fn add_check(&mut self, name: &str, passed: bool, message: &str) {
        if !passed {
            self.passed = false;
        }
        self.checks.push(ValidationCheck {
            name: name.to_string(),
            passed,
            message: message.to_string(),
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Look up a check by name.
    pub fn check(&self, name: &str) -> Option<&ValidationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

/// Topology validator.
pub struct TopologyValidator;

impl TopologyValidator {
    pub fn validate(graph: &ResourceGraph) -> ValidationReport {
        let mut report = ValidationReport::new();

        match graph.validate() {
            Ok(()) => report.add_check(
                "references",
                true,
                &format!("{} resources, every reference resolves", graph.len()),
            ),
            Err(e) => report.add_check("references", false, &e.to_string()),
        }

        let (passed, message) = Self::check_capacity(graph);
        report.add_check("capacity", passed, &message);

        let (passed, message) = Self::check_database_placement(graph);
        report.add_check("database-placement", passed, &message);

        let (passed, message) = Self::check_database_credentials(graph);
        report.add_check("database-credentials", passed, &message);

        let (passed, message) = Self::check_listener_routing(graph);
        report.add_check("listener-routing", passed, &message);

        let (passed, message) = Self::check_target_type(graph);
        report.add_check("target-type", passed, &message);

        let (passed, message) = Self::check_ingress(graph);
        report.add_check("ingress", passed, &message);

        if report.passed {
            info!("Topology {} passed {} checks", graph.name(), report.checks.len());
        } else {
            for check in report.failures() {
                warn!("Check {} failed: {}", check.name, check.message);
            }
        }
        report
    }

    fn check_capacity(graph: &ResourceGraph) -> (bool, String) {
        let mut problems = Vec::new();
        let mut seen = 0;
        for asg in graph.of_kind(ResourceKind::AutoScalingGroup) {
            seen += 1;
            match declared_capacity(asg) {
                Some((min, max)) if min >= 0 && max >= min => {}
                Some((min, max)) => problems.push(format!("{}: min {} max {}", asg.id, min, max)),
                None => problems.push(format!("{}: MinSize/MaxSize missing", asg.id)),
            }
        }
        summarize(problems, || format!("{} autoscaling groups within bounds", seen))
    }

    fn check_database_placement(graph: &ResourceGraph) -> (bool, String) {
        let mut problems = Vec::new();
        let mut groups = BTreeSet::new();

        for cluster in graph.of_kind(ResourceKind::DbCluster) {
            let Some(subnet_group) = referenced(graph, cluster.property("DBSubnetGroupName")) else {
                problems.push(format!("{}: no subnet group", cluster.id));
                continue;
            };
            let subnets = subnet_group
                .property("SubnetIds")
                .and_then(Value::as_list)
                .unwrap_or_default();
            if subnets.is_empty() {
                problems.push(format!("{}: subnet group is empty", cluster.id));
            }
            for subnet in subnets {
                let Some(subnet) = referenced(graph, Some(subnet)) else {
                    problems.push(format!("{}: subnet is not declared", cluster.id));
                    continue;
                };
                let public = tag_value(subnet, SUBNET_TYPE_TAG) == Some("Public")
                    || subnet.property("MapPublicIpOnLaunch") == Some(&Value::Bool(true));
                if public {
                    problems.push(format!("{}: placed in public subnet {}", cluster.id, subnet.id));
                }
                if let Some(group) = tag_value(subnet, SUBNET_NAME_TAG) {
                    groups.insert(group.to_string());
                }
            }
        }

        summarize(problems, || {
            if groups.is_empty() {
                "no database clusters".to_string()
            } else {
                format!("clusters placed in group {}", join(&groups))
            }
        })
    }

    fn check_database_credentials(graph: &ResourceGraph) -> (bool, String) {
        let mut problems = Vec::new();
        for cluster in graph.of_kind(ResourceKind::DbCluster) {
            for field in ["MasterUsername", "MasterUserPassword"] {
                match cluster.property(field) {
                    Some(value) if is_secret_reference(value) => {}
                    Some(_) => problems.push(format!("{}: {} is not a secret reference", cluster.id, field)),
                    None => problems.push(format!("{}: {} missing", cluster.id, field)),
                }
            }
        }
        summarize(problems, || "credentials resolve through the secret store".to_string())
    }

    fn check_listener_routing(graph: &ResourceGraph) -> (bool, String) {
        let mut problems = Vec::new();
        let mut routes = Vec::new();

        for listener in graph.of_kind(ResourceKind::Listener) {
            let port = listener.property("Port").and_then(Value::as_int);
            for target in forward_targets(graph, listener) {
                let target_port = target.property("Port").and_then(Value::as_int);
                match (port, target_port) {
                    (Some(p), Some(t)) if p == t => routes.push(format!("{}:{} -> {}", listener.id, p, target.id)),
                    _ => problems.push(format!(
                        "{} port {:?} forwards to {} port {:?}",
                        listener.id, port, target.id, target_port
                    )),
                }
            }
        }

        summarize(problems, || {
            if routes.is_empty() {
                "no listeners".to_string()
            } else {
                routes.join(", ")
            }
        })
    }

    fn check_target_type(graph: &ResourceGraph) -> (bool, String) {
        let mut problems = Vec::new();
        for tg in graph.of_kind(ResourceKind::TargetGroup) {
            let has_asg = tg
                .property("TargetAutoScalingGroups")
                .and_then(Value::as_list)
                .is_some_and(|l| !l.is_empty());
            let target_type = tg.property("TargetType").and_then(Value::as_str);
            if has_asg && target_type != Some("instance") {
                problems.push(format!(
                    "{} registers autoscaling groups with target type {}",
                    tg.id,
                    target_type.unwrap_or("unset")
                ));
            }
        }
        summarize(problems, || "target types match their targets".to_string())
    }

    /// Tiers are derived from what uses each group: load balancers make a
    /// group edge, launch templates compute, database clusters database.
    fn check_ingress(graph: &ResourceGraph) -> (bool, String) {
        let tiers = derive_tiers(graph);
        let listener_ports = listener_ports_by_group(graph);
        let rules = ingress_rules(graph);
        let mut problems = Vec::new();

        for rule in &rules {
            let tier = tiers.get(&rule.group).copied();
            match tier {
                Some(Tier::Edge) => {
                    if rule.is_unrestricted() {
                        let ports = listener_ports.get(&rule.group).cloned().unwrap_or_default();
                        let on_listener = matches!((rule.from_port, rule.to_port), (Some(f), Some(t)) if f == t && ports.contains(&f));
                        if !on_listener {
                            problems.push(format!(
                                "{} is open to the internet outside its listener ports",
                                rule.group
                            ));
                        }
                    }
                }
                Some(Tier::Compute) => {
                    if !from_tier(rule, &tiers, Tier::Edge) {
                        problems.push(format!("{} admits traffic from outside the load balancer", rule.group));
                    }
                }
                Some(Tier::Database) => {
                    if !from_tier(rule, &tiers, Tier::Compute) {
                        problems.push(format!("{} admits traffic from outside the instance tier", rule.group));
                    }
                }
                None => {
                    if rule.is_unrestricted() {
                        problems.push(format!("{} is unused and open to the internet", rule.group));
                    }
                }
            }
        }

        summarize(problems, || format!("{} ingress rules scoped to their tiers", rules.len()))
    }
}

fn summarize(problems: Vec<String>, ok: impl FnOnce() -> String) -> (bool, String) {
    if problems.is_empty() {
        (true, ok())
    } else {
        (false, problems.join("; "))
    }
}

fn join(items: &BTreeSet<String>) -> String {
    items.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn referenced<'a>(graph: &'a ResourceGraph, value: Option<&Value>) -> Option<&'a Resource> {
    let reference = value?.as_reference()?;
    graph.get(&reference.target)
}

fn forward_targets<'a>(graph: &'a ResourceGraph, listener: &Resource) -> Vec<&'a Resource> {
    listener
        .property("DefaultActions")
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(|action| referenced(graph, action.get("TargetGroupArn")))
        .collect()
}

fn group_refs<'a>(value: Option<&'a Value>) -> impl Iterator<Item = &'a LogicalId> {
    value
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_reference().map(|r| &r.target))
}

fn derive_tiers(graph: &ResourceGraph) -> BTreeMap<LogicalId, Tier> {
    let mut tiers = BTreeMap::new();
    for lb in graph.of_kind(ResourceKind::LoadBalancer) {
        for group in group_refs(lb.property("SecurityGroups")) {
            tiers.insert(group.clone(), Tier::Edge);
        }
    }
    for lt in graph.of_kind(ResourceKind::LaunchTemplate) {
        let data = lt.property("LaunchTemplateData");
        for group in group_refs(data.and_then(|d| d.get("SecurityGroupIds"))) {
            tiers.insert(group.clone(), Tier::Compute);
        }
    }
    for cluster in graph.of_kind(ResourceKind::DbCluster) {
        for group in group_refs(cluster.property("VpcSecurityGroupIds")) {
            tiers.insert(group.clone(), Tier::Database);
        }
    }
    tiers
}

fn listener_ports_by_group(graph: &ResourceGraph) -> BTreeMap<LogicalId, BTreeSet<i64>> {
    let mut ports: BTreeMap<LogicalId, BTreeSet<i64>> = BTreeMap::new();
    for listener in graph.of_kind(ResourceKind::Listener) {
        let Some(port) = listener.property("Port").and_then(Value::as_int) else {
            continue;
        };
        let Some(lb) = referenced(graph, listener.property("LoadBalancerArn")) else {
            continue;
        };
        for group in group_refs(lb.property("SecurityGroups")) {
            ports.entry(group.clone()).or_default().insert(port);
        }
    }
    ports
}

fn from_tier(rule: &IngressRule, tiers: &BTreeMap<LogicalId, Tier>, expected: Tier) -> bool {
    rule.cidr.is_none()
        && rule
            .source_group
            .as_ref()
            .is_some_and(|source| tiers.get(source) == Some(&expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::topology::declare_topology;

    fn default_graph() -> ResourceGraph {
        declare_topology(&StackConfig::default()).unwrap().graph
    }

    #[test]
    fn test_default_topology_passes() {
        let report = TopologyValidator::validate(&default_graph());
        assert!(report.passed, "{:?}", report.failures().collect::<Vec<_>>());
        assert_eq!(report.checks.len(), 7);
        assert_eq!(
            report.check("database-placement").map(|c| c.message.as_str()),
            Some("clusters placed in group Private")
        );
    }

    #[test]
    fn test_inverted_capacity_fails() {
        let mut graph = default_graph();
        let asg = graph.get_mut(&LogicalId::new("InstanceAutoScale").unwrap()).unwrap();
        asg.set_property("MinSize", "3");

        let report = TopologyValidator::validate(&graph);
        assert!(!report.passed);
        assert!(!report.check("capacity").unwrap().passed);
    }

    #[test]
    fn test_plaintext_password_fails() {
        let mut graph = default_graph();
        let cluster = graph.get_mut(&LogicalId::new("Database").unwrap()).unwrap();
        cluster.set_property("MasterUserPassword", "hunter2");

        let report = TopologyValidator::validate(&graph);
        assert!(!report.check("database-credentials").unwrap().passed);
    }

    #[test]
    fn test_open_instance_tier_fails() {
        let mut graph = default_graph();
        let sg = graph.get_mut(&LogicalId::new("InstanceSecurityGroup").unwrap()).unwrap();
        sg.push_property(
            "SecurityGroupIngress",
            Value::map([
                ("CidrIp", Value::from("0.0.0.0/0")),
                ("IpProtocol", Value::from("tcp")),
                ("FromPort", Value::from(22i64)),
                ("ToPort", Value::from(22i64)),
            ]),
        );

        let report = TopologyValidator::validate(&graph);
        assert!(!report.check("ingress").unwrap().passed);
    }

    #[test]
    fn test_empty_graph_passes() {
        let report = TopologyValidator::validate(&ResourceGraph::new("Empty"));
        assert!(report.passed);
    }
}
