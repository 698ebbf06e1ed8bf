//! Launch template and autoscaling group.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use stratus_core::{DeclarationError, DeclarationResult, LogicalId, Resource, ResourceGraph, ResourceKind, Value};

use crate::iam::{InstanceProfile, Role, ServicePrincipal};
use crate::network::{Network, SubnetSelection};
use crate::security::{SecurityGroup, Tier};

/// Region-keyed machine image map.
///
/// Image ids are region-scoped, so moving the stack to another region needs
/// a new entry here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineImage {
    images: BTreeMap<String, String>,
}

fn image_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^ami-[0-9a-f]{8,17}$").ok())
        .as_ref()
}

impl MachineImage {
    pub fn generic_linux(images: BTreeMap<String, String>) -> Self {
        Self { images }
    }

    /// Image id for `region`.
    pub fn resolve(&self, region: &str) -> DeclarationResult<&str> {
        let image = self.images.get(region).ok_or_else(|| {
            DeclarationError::InvalidPlacement(format!(
                "no machine image for region {} (known: {})",
                region,
                self.images.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })?;
        if !image_pattern().is_some_and(|re| re.is_match(image)) {
            return Err(DeclarationError::InvalidName(format!("'{}' is not a machine image id", image)));
        }
        Ok(image)
    }
}

/// Instance size such as `t2.micro` or `db.t2.small`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceType(String);

fn instance_type_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(db\.)?[a-z][a-z0-9-]*\.[a-z0-9]+$").ok())
        .as_ref()
}

impl InstanceType {
    pub fn new(value: impl Into<String>) -> DeclarationResult<Self> {
        let value = value.into();
        if instance_type_pattern().is_some_and(|re| re.is_match(&value)) {
            Ok(Self(value))
        } else {
            Err(DeclarationError::InvalidName(format!("'{}' is not an instance type", value)))
        }
    }

    /// Whether this is a database instance class (`db.` prefix).
    pub fn is_database_class(&self) -> bool {
        self.0.starts_with("db.")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct LaunchTemplateProps<'a> {
    pub machine_image: MachineImage,
    pub region: String,
    pub instance_type: InstanceType,
    pub security_group: &'a SecurityGroup,
    pub role: &'a Role,
}

/// Handle to a declared launch template.
#[derive(Debug, Clone)]
pub struct LaunchTemplate {
    pub id: LogicalId,
    pub profile: InstanceProfile,
    pub security_group: LogicalId,
}

impl LaunchTemplate {
    pub fn declare(graph: &mut ResourceGraph, id: &LogicalId, props: &LaunchTemplateProps<'_>) -> DeclarationResult<Self> {
        if props.role.assumed_by != ServicePrincipal::ec2() {
            return Err(DeclarationError::InconsistentWiring(format!(
                "{} is assumed by {}, instances need {}",
                props.role.id,
                props.role.assumed_by.as_str(),
                ServicePrincipal::ec2().as_str()
            )));
        }
        if props.instance_type.is_database_class() {
            return Err(DeclarationError::InvalidName(format!(
                "{} is a database instance class",
                props.instance_type
            )));
        }
        if props.security_group.tier != Tier::Compute {
            return Err(DeclarationError::InconsistentWiring(format!(
                "{} is a {} tier group, instances need a compute tier group",
                props.security_group.id, props.security_group.tier
            )));
        }

        let image = props.machine_image.resolve(&props.region)?.to_string();
        // Both ids are checked before either resource lands in the graph.
        let profile_id = id.child("Profile")?;
        if graph.contains(&profile_id) {
            return Err(DeclarationError::DuplicateResource(profile_id));
        }

        let data = Value::map([
            ("ImageId", Value::from(image)),
            ("InstanceType", Value::from(props.instance_type.as_str())),
            ("SecurityGroupIds", Value::List(vec![props.security_group.group_id()])),
            ("IamInstanceProfile", Value::map([("Arn", Value::get_att(&profile_id, "Arn"))])),
        ]);

        let id = graph.add(
            Resource::new(id.clone(), ResourceKind::LaunchTemplate)
                .with_property("LaunchTemplateData", data)
                .depends_on(&props.role.id),
        )?;
        let profile = props.role.instance_profile(graph, Some(&profile_id))?;
        Ok(Self {
            id,
            profile,
            security_group: props.security_group.id.clone(),
        })
    }

    pub fn latest_version(&self) -> Value {
        Value::get_att(&self.id, "LatestVersionNumber")
    }
}

/// Autoscaling bounds: `max >= min >= 0`, desired within the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub min: u32,
    pub max: u32,
    pub desired: Option<u32>,
}

impl Capacity {
    pub fn new(min: u32, max: u32, desired: Option<u32>) -> DeclarationResult<Self> {
        if max < min {
            return Err(DeclarationError::range(
                "capacity",
                format!("max capacity {} is below min capacity {}", max, min),
            ));
        }
        if let Some(desired) = desired {
            if desired < min || desired > max {
                return Err(DeclarationError::range(
                    "desired_capacity",
                    format!("{} is outside {}..={}", desired, min, max),
                ));
            }
        }
        Ok(Self { min, max, desired })
    }

    /// Bounds with only a maximum; the minimum defaults to zero.
    pub fn up_to(max: u32) -> Self {
        Self {
            min: 0,
            max,
            desired: None,
        }
    }
}

pub struct AutoScalingGroupProps<'a> {
    pub launch_template: &'a LaunchTemplate,
    pub capacity: Capacity,
    pub subnets: SubnetSelection,
}

/// Handle to a declared autoscaling group.
#[derive(Debug, Clone)]
pub struct AutoScalingGroup {
    pub id: LogicalId,
    pub capacity: Capacity,
}

impl AutoScalingGroup {
    pub fn declare(
        graph: &mut ResourceGraph,
        id: &LogicalId,
        network: &Network,
        props: &AutoScalingGroupProps<'_>,
    ) -> DeclarationResult<Self> {
        let capacity = Capacity::new(props.capacity.min, props.capacity.max, props.capacity.desired)?;
        let subnets = network.select_subnets(&props.subnets)?;

        let launch_template = Value::map([
            ("LaunchTemplateId", Value::reference(&props.launch_template.id)),
            ("Version", props.launch_template.latest_version()),
        ]);

        let mut resource = Resource::new(id.clone(), ResourceKind::AutoScalingGroup)
            .with_property("MinSize", capacity.min.to_string())
            .with_property("MaxSize", capacity.max.to_string())
            .with_optional("DesiredCapacity", capacity.desired.map(|d| d.to_string()))
            .with_property("LaunchTemplate", launch_template)
            .with_property(
                "VPCZoneIdentifier",
                Value::List(subnets.iter().map(|s| s.subnet_id()).collect()),
            )
            .with_property(
                "Tags",
                Value::List(vec![Value::map([
                    ("Key", Value::from("Name")),
                    ("Value", Value::from(format!("{}/{}", graph.name(), id))),
                    ("PropagateAtLaunch", Value::from(true)),
                ])]),
            );
        // Instances need their egress route before they boot.
        for route in subnets.iter().filter_map(|s| s.default_route.as_ref()) {
            resource = resource.depends_on(route);
        }

        let id = graph.add(resource)?;
        info!(
            "Declared autoscaling group {} ({}..{}) over {} subnets",
            id,
            capacity.min,
            capacity.max,
            subnets.len()
        );
        Ok(Self { id, capacity })
    }
}

/// Read `(min, max)` back from a declared autoscaling group.
pub fn declared_capacity(resource: &Resource) -> Option<(i64, i64)> {
    let read = |key: &str| match resource.property(key)? {
        Value::Str(s) => s.parse::<i64>().ok(),
        Value::Int(i) => Some(*i),
        _ => None,
    };
    Some((read("MinSize")?, read("MaxSize")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::RoleProps;
    use crate::network::{NetworkProps, SubnetGroupConfig, SubnetType};
    use crate::security::SecurityGroupProps;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn images() -> MachineImage {
        MachineImage::generic_linux(BTreeMap::from([(
            "eu-west-1".to_string(),
            "ami-0198c8ba2ab3402a6".to_string(),
        )]))
    }

    struct Fixture {
        graph: ResourceGraph,
        network: Network,
        sg: SecurityGroup,
        role: Role,
    }

    fn fixture() -> Fixture {
        let mut graph = ResourceGraph::new("Test");
        let network = Network::declare(
            &mut graph,
            &id("Vpc"),
            &NetworkProps {
                name: "Vpc".to_string(),
                cidr: "10.0.0.0/16".parse().unwrap(),
                region: "eu-west-1".to_string(),
                max_azs: 2,
                nat_gateways: 2,
                subnet_groups: vec![
                    SubnetGroupConfig::new("Private", SubnetType::PrivateWithEgress, 24),
                    SubnetGroupConfig::new("Public", SubnetType::Public, 24),
                ],
            },
        )
        .unwrap();
        let sg = SecurityGroup::declare(&mut graph, &id("InstanceSg"), &network, &SecurityGroupProps::new(Tier::Compute))
            .unwrap();
        let role = Role::declare(
            &mut graph,
            &id("Role"),
            &RoleProps {
                name: None,
                assumed_by: ServicePrincipal::ec2(),
            },
        )
        .unwrap();
        Fixture { graph, network, sg, role }
    }

    fn template(f: &mut Fixture, region: &str) -> DeclarationResult<LaunchTemplate> {
        LaunchTemplate::declare(
            &mut f.graph,
            &id("Template"),
            &LaunchTemplateProps {
                machine_image: images(),
                region: region.to_string(),
                instance_type: InstanceType::new("t2.micro").unwrap(),
                security_group: &f.sg,
                role: &f.role,
            },
        )
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(Capacity::new(0, 1, None).is_ok());
        assert!(Capacity::new(1, 1, Some(1)).is_ok());
        assert!(matches!(Capacity::new(2, 1, None), Err(DeclarationError::InvalidRange { .. })));
        assert!(Capacity::new(0, 2, Some(3)).is_err());
        assert_eq!(Capacity::up_to(1).min, 0);
    }

    #[test]
    fn test_image_is_region_scoped() {
        assert_eq!(images().resolve("eu-west-1").unwrap(), "ami-0198c8ba2ab3402a6");
        assert!(matches!(images().resolve("us-east-1"), Err(DeclarationError::InvalidPlacement(_))));
    }

    #[test]
    fn test_instance_types() {
        assert!(InstanceType::new("t2.micro").is_ok());
        assert!(InstanceType::new("db.t2.small").unwrap().is_database_class());
        assert!(InstanceType::new("micro").is_err());
        assert!(InstanceType::new("T2.Micro").is_err());
    }

    #[test]
    fn test_launch_template_wires_profile_and_group() {
        let mut f = fixture();
        let lt = template(&mut f, "eu-west-1").unwrap();

        let resource = f.graph.get(&lt.id).unwrap();
        let data = resource.property("LaunchTemplateData").unwrap();
        assert_eq!(data.get("ImageId").and_then(Value::as_str), Some("ami-0198c8ba2ab3402a6"));
        assert_eq!(
            data.get("SecurityGroupIds").and_then(Value::as_list),
            Some(&[f.sg.group_id()][..])
        );
        assert_eq!(lt.profile.id.as_str(), "TemplateProfile");
        f.graph.validate().unwrap();
    }

    #[test]
    fn test_failed_launch_template_leaves_no_profile() {
        let mut f = fixture();
        f.graph
            .add(Resource::new(id("Template"), ResourceKind::LaunchTemplate))
            .unwrap();
        let before = f.graph.len();

        assert!(matches!(
            template(&mut f, "eu-west-1"),
            Err(DeclarationError::DuplicateResource(_))
        ));
        assert_eq!(f.graph.len(), before);
        assert!(!f.graph.contains(&id("TemplateProfile")));
    }

    #[test]
    fn test_taken_profile_id_leaves_no_template() {
        let mut f = fixture();
        f.graph
            .add(Resource::new(id("TemplateProfile"), ResourceKind::InstanceProfile))
            .unwrap();

        assert!(matches!(
            template(&mut f, "eu-west-1"),
            Err(DeclarationError::DuplicateResource(_))
        ));
        assert!(!f.graph.contains(&id("Template")));
    }

    #[test]
    fn test_launch_template_rejects_other_region() {
        let mut f = fixture();
        assert!(template(&mut f, "us-east-1").is_err());
    }

    #[test]
    fn test_launch_template_rejects_foreign_principal() {
        let mut f = fixture();
        f.role.assumed_by = ServicePrincipal::new("lambda.amazonaws.com");
        assert!(matches!(
            template(&mut f, "eu-west-1"),
            Err(DeclarationError::InconsistentWiring(_))
        ));
    }

    #[test]
    fn test_autoscaling_group_over_private_subnets() {
        let mut f = fixture();
        let lt = template(&mut f, "eu-west-1").unwrap();
        let asg = AutoScalingGroup::declare(
            &mut f.graph,
            &id("Asg"),
            &f.network,
            &AutoScalingGroupProps {
                launch_template: &lt,
                capacity: Capacity::up_to(1),
                subnets: SubnetSelection::default(),
            },
        )
        .unwrap();

        let resource = f.graph.get(&asg.id).unwrap();
        assert_eq!(declared_capacity(resource), Some((0, 1)));
        let zones = resource.property("VPCZoneIdentifier").unwrap().as_list().unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(resource.depends_on.len(), 2);
        f.graph.validate().unwrap();
    }

    #[test]
    fn test_autoscaling_group_rejects_inverted_capacity() {
        let mut f = fixture();
        let lt = template(&mut f, "eu-west-1").unwrap();
        let result = AutoScalingGroup::declare(
            &mut f.graph,
            &id("Asg"),
            &f.network,
            &AutoScalingGroupProps {
                launch_template: &lt,
                capacity: Capacity {
                    min: 3,
                    max: 1,
                    desired: None,
                },
                subnets: SubnetSelection::default(),
            },
        );
        assert!(result.is_err());
        assert!(f.graph.get(&id("Asg")).is_none());
    }
}
