//! Resource descriptors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::LogicalId;
use crate::value::{Reference, Value};

/// Provider resource types known to Stratus.
///
/// Each kind maps 1:1 to a provider type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "AWS::EC2::VPC")]
    Vpc,
    #[serde(rename = "AWS::EC2::Subnet")]
    Subnet,
    #[serde(rename = "AWS::EC2::InternetGateway")]
    InternetGateway,
    #[serde(rename = "AWS::EC2::VPCGatewayAttachment")]
    VpcGatewayAttachment,
    #[serde(rename = "AWS::EC2::RouteTable")]
    RouteTable,
    #[serde(rename = "AWS::EC2::SubnetRouteTableAssociation")]
    SubnetRouteTableAssociation,
    #[serde(rename = "AWS::EC2::Route")]
    Route,
    #[serde(rename = "AWS::EC2::EIP")]
    Eip,
    #[serde(rename = "AWS::EC2::NatGateway")]
    NatGateway,
    #[serde(rename = "AWS::EC2::SecurityGroup")]
    SecurityGroup,
    #[serde(rename = "AWS::EC2::SecurityGroupIngress")]
    SecurityGroupIngress,
    #[serde(rename = "AWS::IAM::Role")]
    IamRole,
    #[serde(rename = "AWS::IAM::Policy")]
    IamPolicy,
    #[serde(rename = "AWS::IAM::InstanceProfile")]
    InstanceProfile,
    #[serde(rename = "AWS::SecretsManager::Secret")]
    Secret,
    #[serde(rename = "AWS::SecretsManager::SecretTargetAttachment")]
    SecretTargetAttachment,
    #[serde(rename = "AWS::EC2::LaunchTemplate")]
    LaunchTemplate,
    #[serde(rename = "AWS::AutoScaling::AutoScalingGroup")]
    AutoScalingGroup,
    #[serde(rename = "AWS::ElasticLoadBalancingV2::TargetGroup")]
    TargetGroup,
    #[serde(rename = "AWS::ElasticLoadBalancingV2::LoadBalancer")]
    LoadBalancer,
    #[serde(rename = "AWS::ElasticLoadBalancingV2::Listener")]
    Listener,
    #[serde(rename = "AWS::RDS::DBSubnetGroup")]
    DbSubnetGroup,
    #[serde(rename = "AWS::RDS::DBCluster")]
    DbCluster,
    #[serde(rename = "AWS::RDS::DBInstance")]
    DbInstance,
}

impl ResourceKind {
    /// Provider type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "AWS::EC2::VPC",
            ResourceKind::Subnet => "AWS::EC2::Subnet",
            ResourceKind::InternetGateway => "AWS::EC2::InternetGateway",
            ResourceKind::VpcGatewayAttachment => "AWS::EC2::VPCGatewayAttachment",
            ResourceKind::RouteTable => "AWS::EC2::RouteTable",
            ResourceKind::SubnetRouteTableAssociation => "AWS::EC2::SubnetRouteTableAssociation",
            ResourceKind::Route => "AWS::EC2::Route",
            ResourceKind::Eip => "AWS::EC2::EIP",
            ResourceKind::NatGateway => "AWS::EC2::NatGateway",
            ResourceKind::SecurityGroup => "AWS::EC2::SecurityGroup",
            ResourceKind::SecurityGroupIngress => "AWS::EC2::SecurityGroupIngress",
            ResourceKind::IamRole => "AWS::IAM::Role",
            ResourceKind::IamPolicy => "AWS::IAM::Policy",
            ResourceKind::InstanceProfile => "AWS::IAM::InstanceProfile",
            ResourceKind::Secret => "AWS::SecretsManager::Secret",
            ResourceKind::SecretTargetAttachment => "AWS::SecretsManager::SecretTargetAttachment",
            ResourceKind::LaunchTemplate => "AWS::EC2::LaunchTemplate",
            ResourceKind::AutoScalingGroup => "AWS::AutoScaling::AutoScalingGroup",
            ResourceKind::TargetGroup => "AWS::ElasticLoadBalancingV2::TargetGroup",
            ResourceKind::LoadBalancer => "AWS::ElasticLoadBalancingV2::LoadBalancer",
            ResourceKind::Listener => "AWS::ElasticLoadBalancingV2::Listener",
            ResourceKind::DbSubnetGroup => "AWS::RDS::DBSubnetGroup",
            ResourceKind::DbCluster => "AWS::RDS::DBCluster",
            ResourceKind::DbInstance => "AWS::RDS::DBInstance",
        }
    }

    /// Properties whose change forces the provider to replace the resource
    /// instead of updating it in place.
    pub fn replacement_properties(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Vpc => &["CidrBlock"],
            ResourceKind::Subnet => &["VpcId", "CidrBlock", "AvailabilityZone"],
            ResourceKind::VpcGatewayAttachment => &["VpcId", "InternetGatewayId"],
            ResourceKind::RouteTable => &["VpcId"],
            ResourceKind::SubnetRouteTableAssociation => &["SubnetId", "RouteTableId"],
            ResourceKind::Route => &["RouteTableId", "DestinationCidrBlock"],
            ResourceKind::Eip => &["Domain"],
            ResourceKind::NatGateway => &["SubnetId", "AllocationId"],
            ResourceKind::SecurityGroup => &["GroupName", "GroupDescription", "VpcId"],
            ResourceKind::SecurityGroupIngress => &[
                "GroupId",
                "IpProtocol",
                "FromPort",
                "ToPort",
                "CidrIp",
                "SourceSecurityGroupId",
            ],
            ResourceKind::IamRole => &["RoleName", "Path"],
            ResourceKind::IamPolicy => &[],
            ResourceKind::InstanceProfile => &["InstanceProfileName", "Path"],
            ResourceKind::Secret => &["Name"],
            ResourceKind::SecretTargetAttachment => &["SecretId"],
            ResourceKind::LaunchTemplate => &["LaunchTemplateName"],
            ResourceKind::AutoScalingGroup => &["AutoScalingGroupName"],
            ResourceKind::TargetGroup => &["Name", "Port", "Protocol", "TargetType", "VpcId"],
            ResourceKind::LoadBalancer => &["Name", "Scheme", "Type"],
            ResourceKind::Listener => &["LoadBalancerArn"],
            ResourceKind::DbSubnetGroup => &["DBSubnetGroupName"],
            ResourceKind::DbCluster => &[
                "Engine",
                "DatabaseName",
                "DBSubnetGroupName",
                "MasterUsername",
                "StorageEncrypted",
            ],
            ResourceKind::DbInstance => &["DBClusterIdentifier", "Engine", "DBSubnetGroupName"],
            ResourceKind::InternetGateway => &[],
        }
    }

    /// Attributes that take a new value on every in-place update, so a
    /// reference to one changes whenever its target is updated.
    pub fn volatile_attributes(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::LaunchTemplate => &["LatestVersionNumber"],
            _ => &[],
        }
    }

    /// Property holding the provider-side name, for kinds whose names must
    /// be unique within an account and region.
    pub fn name_property(&self) -> Option<&'static str> {
        match self {
            ResourceKind::SecurityGroup => Some("GroupName"),
            ResourceKind::IamRole => Some("RoleName"),
            ResourceKind::Secret => Some("Name"),
            ResourceKind::TargetGroup => Some("Name"),
            ResourceKind::LoadBalancer => Some("Name"),
            _ => None,
        }
    }

    /// Whether the provider supports a `Tags` property on this kind.
    pub fn is_taggable(&self) -> bool {
        !matches!(
            self,
            ResourceKind::VpcGatewayAttachment
                | ResourceKind::SubnetRouteTableAssociation
                | ResourceKind::Route
                | ResourceKind::SecurityGroupIngress
                | ResourceKind::IamPolicy
                | ResourceKind::InstanceProfile
                | ResourceKind::SecretTargetAttachment
                | ResourceKind::LaunchTemplate
                | ResourceKind::Listener
        )
    }

    /// Physical id prefix the provider uses for this kind.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::VpcGatewayAttachment => "igw-attach",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::SubnetRouteTableAssociation => "rtbassoc",
            ResourceKind::Route => "r",
            ResourceKind::Eip => "eipalloc",
            ResourceKind::NatGateway => "nat",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::SecurityGroupIngress => "sgr",
            ResourceKind::IamRole => "role",
            ResourceKind::IamPolicy => "policy",
            ResourceKind::InstanceProfile => "instance-profile",
            ResourceKind::Secret => "secret",
            ResourceKind::SecretTargetAttachment => "secret-attach",
            ResourceKind::LaunchTemplate => "lt",
            ResourceKind::AutoScalingGroup => "asg",
            ResourceKind::TargetGroup => "targetgroup",
            ResourceKind::LoadBalancer => "loadbalancer",
            ResourceKind::Listener => "listener",
            ResourceKind::DbSubnetGroup => "dbsubnetgroup",
            ResourceKind::DbCluster => "cluster",
            ResourceKind::DbInstance => "db",
        }
    }

    /// Whether the provider identifies this kind by ARN rather than by id.
    pub fn is_arn_identified(&self) -> bool {
        matches!(
            self,
            ResourceKind::IamPolicy
                | ResourceKind::Secret
                | ResourceKind::SecretTargetAttachment
                | ResourceKind::TargetGroup
                | ResourceKind::LoadBalancer
                | ResourceKind::Listener
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// A declared resource: kind, properties, and explicit ordering edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: LogicalId,
    pub kind: ResourceKind,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Ordering-only dependencies that no property references.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<LogicalId>,
}

impl Resource {
    pub fn new(id: LogicalId, kind: ResourceKind) -> Self {
        Self {
            id,
            kind,
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set a property only when a value is present.
    pub fn with_optional(self, key: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.with_property(key, value),
            None => self,
        }
    }

    pub fn depends_on(mut self, id: &LogicalId) -> Self {
        self.depends_on.insert(id.clone());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Append to a list property, creating it if needed.
    pub fn push_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let entry = self
            .properties
            .entry(key.into())
            .or_insert_with(|| Value::List(Vec::new()));
        match entry {
            Value::List(items) => items.push(value.into()),
            other => *other = Value::List(vec![other.clone(), value.into()]),
        }
    }

    /// References held by this resource's properties.
    pub fn references(&self) -> Vec<&Reference> {
        self.properties
            .values()
            .flat_map(|v| v.references())
            .collect()
    }

    /// Every resource this one depends on, through references or explicit
    /// ordering edges.
    pub fn dependencies(&self) -> BTreeSet<LogicalId> {
        self.references()
            .into_iter()
            .map(|r| r.target.clone())
            .chain(self.depends_on.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    #[test]
    fn test_dependencies_merge_references_and_ordering_edges() {
        let resource = Resource::new(id("LoadBalancer"), ResourceKind::LoadBalancer)
            .with_property(
                "SecurityGroups",
                Value::List(vec![Value::get_att(&id("AlbSg"), "GroupId")]),
            )
            .with_property("Subnets", Value::List(vec![Value::reference(&id("Public1"))]))
            .depends_on(&id("Public1DefaultRoute"));

        let deps: Vec<String> = resource
            .dependencies()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(deps, vec!["AlbSg", "Public1", "Public1DefaultRoute"]);
    }

    #[test]
    fn test_push_property_appends() {
        let mut sg = Resource::new(id("Sg"), ResourceKind::SecurityGroup);
        sg.push_property("SecurityGroupIngress", Value::map([("FromPort", 80i64)]));
        sg.push_property("SecurityGroupIngress", Value::map([("FromPort", 443i64)]));

        let rules = sg.property("SecurityGroupIngress").unwrap().as_list().unwrap();
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn test_kind_serializes_as_provider_type() {
        let json = serde_json::to_string(&ResourceKind::DbCluster).unwrap();
        assert_eq!(json, "\"AWS::RDS::DBCluster\"");
        assert_eq!(ResourceKind::DbCluster.type_name(), "AWS::RDS::DBCluster");
    }

    #[test]
    fn test_name_properties() {
        assert_eq!(ResourceKind::SecurityGroup.name_property(), Some("GroupName"));
        assert_eq!(ResourceKind::Vpc.name_property(), None);
    }
}
