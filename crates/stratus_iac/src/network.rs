//! Network declaration: VPC, subnets, routing, gateways.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use stratus_core::{
    CidrAllocator, DeclarationError, DeclarationResult, Ipv4Cidr, LogicalId, Resource, ResourceGraph,
    ResourceKind, Value,
};

/// Tag carrying the subnet group name on every subnet.
pub const SUBNET_NAME_TAG: &str = "stratus:subnet-name";
/// Tag carrying the subnet type on every subnet.
pub const SUBNET_TYPE_TAG: &str = "stratus:subnet-type";

/// Smallest subnet the provider accepts.
const MAX_SUBNET_PREFIX: u8 = 28;

/// Reachability class of a subnet group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetType {
    /// Routed to the internet gateway.
    Public,
    /// Outbound traffic through a NAT gateway, no inbound reachability.
    PrivateWithEgress,
    /// No route outside the VPC.
    PrivateIsolated,
}

impl SubnetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetType::Public => "Public",
            SubnetType::PrivateWithEgress => "Private",
            SubnetType::PrivateIsolated => "Isolated",
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, SubnetType::Public)
    }
}

/// One subnet group: a subnet of this shape is carved in every AZ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetGroupConfig {
    pub name: String,
    pub subnet_type: SubnetType,
    pub cidr_mask: u8,
}

impl SubnetGroupConfig {
    pub fn new(name: impl Into<String>, subnet_type: SubnetType, cidr_mask: u8) -> Self {
        Self {
            name: name.into(),
            subnet_type,
            cidr_mask,
        }
    }
}

/// Which subnets a resource should be placed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetSelection {
    Group(String),
    Type(SubnetType),
}

impl SubnetSelection {
    pub fn group(name: impl Into<String>) -> Self {
        SubnetSelection::Group(name.into())
    }
}

impl Default for SubnetSelection {
    fn default() -> Self {
        SubnetSelection::Type(SubnetType::PrivateWithEgress)
    }
}

/// Network properties.
#[derive(Debug, Clone)]
pub struct NetworkProps {
    pub name: String,
    pub cidr: Ipv4Cidr,
    pub region: String,
    pub max_azs: u8,
    pub nat_gateways: u8,
    pub subnet_groups: Vec<SubnetGroupConfig>,
}

/// A declared subnet.
#[derive(Debug, Clone)]
pub struct Subnet {
    pub id: LogicalId,
    pub group: String,
    pub subnet_type: SubnetType,
    pub availability_zone: String,
    pub cidr: Ipv4Cidr,
    pub route_table: LogicalId,
    /// Default route, if the subnet has one.
    pub default_route: Option<LogicalId>,
}

impl Subnet {
    pub fn subnet_id(&self) -> Value {
        Value::reference(&self.id)
    }
}

/// Handle to a declared network.
#[derive(Debug, Clone)]
pub struct Network {
    pub vpc: LogicalId,
    pub cidr: Ipv4Cidr,
    pub availability_zones: Vec<String>,
    pub subnets: Vec<Subnet>,
    pub internet_gateway: Option<LogicalId>,
    pub nat_gateways: Vec<LogicalId>,
}

impl Network {
    /// Declare a VPC and everything needed to route its subnets.
    ///
    /// Subnets are carved sequentially from the block, group by group in
    /// declared order and AZ by AZ within a group. NAT gateways live in the
    /// first `nat_gateways` public subnets; private subnet `i` routes
    /// through NAT gateway `i % nat_gateways`.
    pub fn declare(graph: &mut ResourceGraph, id: &LogicalId, props: &NetworkProps) -> DeclarationResult<Self> {
        validate_props(props)?;

        let vpc = graph.add(
            Resource::new(id.clone(), ResourceKind::Vpc)
                .with_property("CidrBlock", props.cidr.to_string())
                .with_property("EnableDnsHostnames", true)
                .with_property("EnableDnsSupport", true)
                .with_property("InstanceTenancy", "default")
                .with_property("Tags", name_tag(&props.name)),
        )?;

        let availability_zones: Vec<String> = (0..props.max_azs)
            .map(|i| format!("{}{}", props.region, char::from(b'a' + i)))
            .collect();

        let mut allocator = CidrAllocator::new(props.cidr);
        let mut subnets = Vec::new();
        for group in &props.subnet_groups {
            for (index, az) in availability_zones.iter().enumerate() {
                let cidr = allocator.allocate(group.cidr_mask)?;
                subnets.push(declare_subnet(graph, &vpc, group, index + 1, az, cidr)?);
            }
        }

        let has_public = subnets.iter().any(|s| s.subnet_type.is_public());
        let internet_gateway = if has_public {
            let igw = graph.add(
                Resource::new(vpc.child("IGW")?, ResourceKind::InternetGateway)
                    .with_property("Tags", name_tag(&props.name)),
            )?;
            let attachment = graph.add(
                Resource::new(vpc.child("VPCGW")?, ResourceKind::VpcGatewayAttachment)
                    .with_property("VpcId", Value::reference(&vpc))
                    .with_property("InternetGatewayId", Value::reference(&igw)),
            )?;

            for subnet in subnets.iter_mut().filter(|s| s.subnet_type.is_public()) {
                let route = graph.add(
                    default_route(subnet)?
                        .with_property("GatewayId", Value::reference(&igw))
                        .depends_on(&attachment),
                )?;
                subnet.default_route = Some(route);
            }
            Some(igw)
        } else {
            None
        };

        let mut nat_gateways = Vec::new();
        let public: Vec<Subnet> = subnets
            .iter()
            .filter(|s| s.subnet_type.is_public())
            .take(usize::from(props.nat_gateways))
            .cloned()
            .collect();
        for subnet in &public {
            let eip = graph.add(
                Resource::new(subnet.id.child("EIP")?, ResourceKind::Eip)
                    .with_property("Domain", "vpc")
                    .with_property("Tags", name_tag(&props.name)),
            )?;
            let mut nat = Resource::new(subnet.id.child("NATGateway")?, ResourceKind::NatGateway)
                .with_property("SubnetId", subnet.subnet_id())
                .with_property("AllocationId", Value::get_att(&eip, "AllocationId"))
                .with_property("Tags", name_tag(&props.name));
            if let Some(route) = &subnet.default_route {
                nat = nat.depends_on(route);
            }
            nat_gateways.push(graph.add(nat)?);
        }

        if !nat_gateways.is_empty() {
            let egress = subnets
                .iter_mut()
                .filter(|s| s.subnet_type == SubnetType::PrivateWithEgress);
            for subnet in egress {
                let az_index = availability_zones
                    .iter()
                    .position(|az| *az == subnet.availability_zone)
                    .unwrap_or(0);
                let nat = &nat_gateways[az_index % nat_gateways.len()];
                let route = graph.add(default_route(subnet)?.with_property("NatGatewayId", Value::reference(nat)))?;
                subnet.default_route = Some(route);
            }
        }

        info!(
            "Declared network {} ({}) with {} subnets across {} AZs",
            vpc,
            props.cidr,
            subnets.len(),
            availability_zones.len()
        );

        Ok(Self {
            vpc,
            cidr: props.cidr,
            availability_zones,
            subnets,
            internet_gateway,
            nat_gateways,
        })
    }

    pub fn vpc_id(&self) -> Value {
        Value::reference(&self.vpc)
    }

    /// Names of the declared subnet groups, in declaration order.
    pub fn group_names(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.subnets
            .iter()
            .map(|s| s.group.as_str())
            .filter(|g| seen.insert(*g))
            .collect()
    }

    /// Resolve a selection to the matching subnets.
    pub fn select_subnets(&self, selection: &SubnetSelection) -> DeclarationResult<Vec<&Subnet>> {
        let selected: Vec<&Subnet> = self
            .subnets
            .iter()
            .filter(|s| match selection {
                SubnetSelection::Group(name) => s.group == *name,
                SubnetSelection::Type(subnet_type) => s.subnet_type == *subnet_type,
            })
            .collect();

        if selected.is_empty() {
            return Err(DeclarationError::InvalidPlacement(format!(
                "no subnets match {:?} in {}",
                selection, self.vpc
            )));
        }
        Ok(selected)
    }

    pub fn public_subnets(&self) -> Vec<&Subnet> {
        self.subnets.iter().filter(|s| s.subnet_type.is_public()).collect()
    }
}

fn validate_props(props: &NetworkProps) -> DeclarationResult<()> {
    if props.subnet_groups.len() < 2 {
        return Err(DeclarationError::range(
            "subnet_groups",
            format!("a network needs at least 2 subnet groups, got {}", props.subnet_groups.len()),
        ));
    }
    if props.max_azs == 0 || props.max_azs > 26 {
        return Err(DeclarationError::range("max_azs", "must be between 1 and 26"));
    }

    let mut names = BTreeSet::new();
    for group in &props.subnet_groups {
        if !names.insert(group.name.as_str()) {
            return Err(DeclarationError::InvalidName(format!(
                "subnet group {} is declared twice",
                group.name
            )));
        }
        if group.cidr_mask < props.cidr.prefix() || group.cidr_mask > MAX_SUBNET_PREFIX {
            return Err(DeclarationError::range(
                "cidr_mask",
                format!(
                    "group {} uses /{}, must be between /{} and /{}",
                    group.name,
                    group.cidr_mask,
                    props.cidr.prefix(),
                    MAX_SUBNET_PREFIX
                ),
            ));
        }
    }

    let has_public = props.subnet_groups.iter().any(|g| g.subnet_type.is_public());
    let has_egress = props
        .subnet_groups
        .iter()
        .any(|g| g.subnet_type == SubnetType::PrivateWithEgress);

    if props.nat_gateways > 0 && !has_public {
        return Err(DeclarationError::InvalidPlacement(
            "NAT gateways need a public subnet group".to_string(),
        ));
    }
    if props.nat_gateways > props.max_azs {
        return Err(DeclarationError::range(
            "nat_gateways",
            format!("{} NAT gateways exceed {} availability zones", props.nat_gateways, props.max_azs),
        ));
    }
    if has_egress && props.nat_gateways == 0 {
        return Err(DeclarationError::range(
            "nat_gateways",
            "private subnets with egress need at least one NAT gateway",
        ));
    }
    Ok(())
}

fn declare_subnet(
    graph: &mut ResourceGraph,
    vpc: &LogicalId,
    group: &SubnetGroupConfig,
    index: usize,
    az: &str,
    cidr: Ipv4Cidr,
) -> DeclarationResult<Subnet> {
    let id = vpc.child(&format!("{}Subnet{}", group.name, index))?;
    let subnet = graph.add(
        Resource::new(id, ResourceKind::Subnet)
            .with_property("VpcId", Value::reference(vpc))
            .with_property("CidrBlock", cidr.to_string())
            .with_property("AvailabilityZone", az)
            .with_property("MapPublicIpOnLaunch", group.subnet_type.is_public())
            .with_property(
                "Tags",
                Value::List(vec![
                    tag("Name", &format!("{}/{}Subnet{}", vpc, group.name, index)),
                    tag(SUBNET_NAME_TAG, &group.name),
                    tag(SUBNET_TYPE_TAG, group.subnet_type.as_str()),
                ]),
            ),
    )?;

    let route_table = graph.add(
        Resource::new(subnet.child("RouteTable")?, ResourceKind::RouteTable)
            .with_property("VpcId", Value::reference(vpc)),
    )?;
    graph.add(
        Resource::new(subnet.child("RouteTableAssociation")?, ResourceKind::SubnetRouteTableAssociation)
            .with_property("RouteTableId", Value::reference(&route_table))
            .with_property("SubnetId", Value::reference(&subnet)),
    )?;

    Ok(Subnet {
        id: subnet,
        group: group.name.clone(),
        subnet_type: group.subnet_type,
        availability_zone: az.to_string(),
        cidr,
        route_table,
        default_route: None,
    })
}

fn default_route(subnet: &Subnet) -> DeclarationResult<Resource> {
    Ok(Resource::new(subnet.id.child("DefaultRoute")?, ResourceKind::Route)
        .with_property("RouteTableId", Value::reference(&subnet.route_table))
        .with_property("DestinationCidrBlock", Ipv4Cidr::any().to_string()))
}

pub(crate) fn tag(key: &str, value: &str) -> Value {
    Value::map([("Key", key), ("Value", value)])
}

pub(crate) fn name_tag(name: &str) -> Value {
    Value::List(vec![tag("Name", name)])
}

/// Read a tag value from a resource's `Tags` property.
pub fn tag_value<'a>(resource: &'a Resource, key: &str) -> Option<&'a str> {
    resource
        .property("Tags")?
        .as_list()?
        .iter()
        .find(|t| t.get("Key").and_then(Value::as_str) == Some(key))?
        .get("Value")?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> NetworkProps {
        NetworkProps {
            name: "ImmersionDayVPC".to_string(),
            cidr: "10.0.0.0/16".parse().unwrap(),
            region: "eu-west-1".to_string(),
            max_azs: 2,
            nat_gateways: 2,
            subnet_groups: vec![
                SubnetGroupConfig::new("Private", SubnetType::PrivateWithEgress, 24),
                SubnetGroupConfig::new("Public", SubnetType::Public, 24),
            ],
        }
    }

    fn declare(props: &NetworkProps) -> DeclarationResult<(ResourceGraph, Network)> {
        let mut graph = ResourceGraph::new("Test");
        let id = LogicalId::new("ImmersionDay").unwrap();
        let network = Network::declare(&mut graph, &id, props)?;
        Ok((graph, network))
    }

    #[test]
    fn test_subnets_carved_in_group_order() {
        let (_, network) = declare(&props()).unwrap();
        let layout: Vec<(String, String, String)> = network
            .subnets
            .iter()
            .map(|s| (s.id.to_string(), s.cidr.to_string(), s.availability_zone.clone()))
            .collect();

        assert_eq!(
            layout,
            vec![
                ("ImmersionDayPrivateSubnet1".into(), "10.0.0.0/24".into(), "eu-west-1a".into()),
                ("ImmersionDayPrivateSubnet2".into(), "10.0.1.0/24".into(), "eu-west-1b".into()),
                ("ImmersionDayPublicSubnet1".into(), "10.0.2.0/24".into(), "eu-west-1a".into()),
                ("ImmersionDayPublicSubnet2".into(), "10.0.3.0/24".into(), "eu-west-1b".into()),
            ]
        );
    }

    #[test]
    fn test_gateways_and_routes() {
        let (graph, network) = declare(&props()).unwrap();

        assert!(network.internet_gateway.is_some());
        assert_eq!(network.nat_gateways.len(), 2);
        assert_eq!(graph.of_kind(ResourceKind::Eip).count(), 2);
        assert_eq!(graph.of_kind(ResourceKind::Route).count(), 4);
        assert!(network.subnets.iter().all(|s| s.default_route.is_some()));

        let private_route = graph
            .get(&LogicalId::new("ImmersionDayPrivateSubnet2DefaultRoute").unwrap())
            .unwrap();
        let nat = private_route.property("NatGatewayId").unwrap().as_reference().unwrap();
        assert_eq!(nat.target.as_str(), "ImmersionDayPublicSubnet2NATGateway");

        graph.validate().unwrap();
    }

    #[test]
    fn test_subnet_tags_record_group() {
        let (graph, network) = declare(&props()).unwrap();
        let subnet = graph.get(&network.subnets[0].id).unwrap();
        assert_eq!(tag_value(subnet, SUBNET_NAME_TAG), Some("Private"));
        assert_eq!(tag_value(subnet, SUBNET_TYPE_TAG), Some("Private"));
    }

    #[test]
    fn test_select_subnets() {
        let (_, network) = declare(&props()).unwrap();

        let private = network.select_subnets(&SubnetSelection::group("Private")).unwrap();
        assert_eq!(private.len(), 2);
        assert!(private.iter().all(|s| !s.subnet_type.is_public()));

        let public = network.select_subnets(&SubnetSelection::Type(SubnetType::Public)).unwrap();
        assert_eq!(public.len(), 2);

        assert!(network.select_subnets(&SubnetSelection::group("Data")).is_err());
        assert_eq!(network.group_names(), vec!["Private", "Public"]);
    }

    #[test]
    fn test_single_group_rejected() {
        let mut props = props();
        props.subnet_groups.truncate(1);
        assert!(matches!(declare(&props), Err(DeclarationError::InvalidRange { .. })));
    }

    #[test]
    fn test_nat_requires_public_group() {
        let mut props = props();
        props.subnet_groups = vec![
            SubnetGroupConfig::new("Private", SubnetType::PrivateWithEgress, 24),
            SubnetGroupConfig::new("Isolated", SubnetType::PrivateIsolated, 24),
        ];
        assert!(matches!(declare(&props), Err(DeclarationError::InvalidPlacement(_))));
    }

    #[test]
    fn test_egress_requires_nat() {
        let mut props = props();
        props.nat_gateways = 0;
        assert!(matches!(declare(&props), Err(DeclarationError::InvalidRange { .. })));
    }

    #[test]
    fn test_block_too_small() {
        let mut props = props();
        props.cidr = "10.0.0.0/23".parse().unwrap();
        assert!(matches!(
            declare(&props),
            Err(DeclarationError::AddressSpaceExhausted(_))
        ));
    }

    #[test]
    fn test_single_nat_shared() {
        let mut props = props();
        props.nat_gateways = 1;
        let (graph, network) = declare(&props).unwrap();
        assert_eq!(network.nat_gateways.len(), 1);

        for subnet in network.subnets.iter().filter(|s| !s.subnet_type.is_public()) {
            let route = graph.get(subnet.default_route.as_ref().unwrap()).unwrap();
            let nat = route.property("NatGatewayId").unwrap().as_reference().unwrap();
            assert_eq!(nat.target.as_str(), "ImmersionDayPublicSubnet1NATGateway");
        }
    }
}
