//! The reference topology: network, web tier behind a load balancer, and an
//! Aurora cluster whose credentials live in a generated secret.

use tracing::info;

use stratus_core::{check_stack_name, DeclarationResult, LogicalId, ResourceGraph};

use crate::compute::{
    AutoScalingGroup, AutoScalingGroupProps, Capacity, InstanceType, LaunchTemplate, LaunchTemplateProps,
    MachineImage,
};
use crate::config::StackConfig;
use crate::database::{ClusterEngine, DatabaseCluster, DatabaseClusterProps};
use crate::iam::{Role, RoleProps, ServicePrincipal};
use crate::load_balancing::{
    ApplicationProtocol, Listener, ListenerProps, LoadBalancer, LoadBalancerProps, TargetGroup, TargetGroupProps,
    TargetType,
};
use crate::network::{Network, NetworkProps, SubnetSelection};
use crate::secret::{DatabaseSecret, DatabaseSecretProps};
use crate::security::{Peer, Port, SecurityGroup, SecurityGroupProps, Tier};

/// The declared graph plus a handle for every top-level resource.
#[derive(Debug, Clone)]
pub struct Topology {
    pub graph: ResourceGraph,
    pub network: Network,
    pub alb_security_group: SecurityGroup,
    pub instance_security_group: SecurityGroup,
    pub instance_role: Role,
    pub launch_template: LaunchTemplate,
    pub auto_scaling_group: AutoScalingGroup,
    pub target_group: TargetGroup,
    pub load_balancer: LoadBalancer,
    pub listener: Listener,
    pub database_security_group: SecurityGroup,
    pub secret: DatabaseSecret,
    pub database: DatabaseCluster,
}

fn id(name: &str) -> DeclarationResult<LogicalId> {
    LogicalId::new(name)
}

/// Declare the full topology described by `config`.
///
/// The returned graph has already passed reference and cycle validation.
pub fn declare_topology(config: &StackConfig) -> DeclarationResult<Topology> {
    check_stack_name(&config.stack_name)?;

    let mut graph = ResourceGraph::new(&config.stack_name).with_region(&config.region);
    for (key, value) in &config.tags {
        graph.set_tag(key, value);
    }

    let network = Network::declare(
        &mut graph,
        &id("ImmersionDay")?,
        &NetworkProps {
            name: config.network.name.clone(),
            cidr: config.network.cidr,
            region: config.region.clone(),
            max_azs: config.network.max_azs,
            nat_gateways: config.network.nat_gateways,
            subnet_groups: config.network.subnet_groups.clone(),
        },
    )?;

    let lb = &config.load_balancer;
    let alb_security_group = SecurityGroup::declare(
        &mut graph,
        &id("ALBSecurityGroup")?,
        &network,
        &SecurityGroupProps::new(Tier::Edge).with_name(&lb.security_group_name),
    )?;
    alb_security_group.add_ingress_rule(&mut graph, Peer::any_ipv4(), Port::tcp(lb.port))?;

    let instance_security_group = SecurityGroup::declare(
        &mut graph,
        &id("InstanceSecurityGroup")?,
        &network,
        &SecurityGroupProps::new(Tier::Compute).with_name(&config.compute.security_group_name),
    )?;
    instance_security_group.add_ingress_rule(
        &mut graph,
        Peer::security_group(&alb_security_group),
        Port::tcp(lb.port),
    )?;

    let instance_role = Role::declare(
        &mut graph,
        &id("InstanceRole")?,
        &RoleProps {
            name: Some(config.compute.role_name.clone()),
            assumed_by: ServicePrincipal::ec2(),
        },
    )?;

    let launch_template = LaunchTemplate::declare(
        &mut graph,
        &id("AutoscaleTemplate")?,
        &LaunchTemplateProps {
            machine_image: MachineImage::generic_linux(config.compute.machine_images.clone()),
            region: config.region.clone(),
            instance_type: InstanceType::new(&config.compute.instance_type)?,
            security_group: &instance_security_group,
            role: &instance_role,
        },
    )?;

    let capacity = Capacity::new(
        config.compute.min_capacity.unwrap_or(0),
        config.compute.max_capacity,
        config.compute.desired_capacity,
    )?;
    let auto_scaling_group = AutoScalingGroup::declare(
        &mut graph,
        &id("InstanceAutoScale")?,
        &network,
        &AutoScalingGroupProps {
            launch_template: &launch_template,
            capacity,
            subnets: SubnetSelection::default(),
        },
    )?;

    let target_group = TargetGroup::declare(
        &mut graph,
        &id("TargetGroup")?,
        &network,
        &TargetGroupProps {
            name: Some(lb.target_group_name.clone()),
            port: lb.port,
            protocol: ApplicationProtocol::Http,
            target_type: TargetType::Instance,
            targets: vec![&auto_scaling_group],
        },
    )?;

    let load_balancer = LoadBalancer::declare(
        &mut graph,
        &id("LoadBalancer")?,
        &network,
        &LoadBalancerProps {
            name: Some(lb.name.clone()),
            security_group: &alb_security_group,
            internet_facing: lb.internet_facing,
        },
    )?;
    let listener = load_balancer.add_listener(
        &mut graph,
        &id("Listener")?,
        &ListenerProps {
            port: lb.port,
            protocol: ApplicationProtocol::Http,
            default_target_group: &target_group,
        },
    )?;

    let db = &config.database;
    let database_security_group = SecurityGroup::declare(
        &mut graph,
        &id("AuroraSecurityGroup")?,
        &network,
        &SecurityGroupProps::new(Tier::Database).with_name(&db.security_group_name),
    )?;
    database_security_group.add_ingress_rule(
        &mut graph,
        Peer::security_group(&instance_security_group),
        Port::tcp(db.port),
    )?;

    let secret = DatabaseSecret::declare(
        &mut graph,
        &id("DatabaseSecret")?,
        &DatabaseSecretProps::new(&config.secret.username).with_name(&config.secret.name),
    )?;
    secret.grant_read(&mut graph, &instance_role)?;

    let database = DatabaseCluster::declare(
        &mut graph,
        &id("Database")?,
        &network,
        &DatabaseClusterProps {
            engine: ClusterEngine::aurora_mysql(&db.engine_version),
            instance_type: InstanceType::new(&db.instance_type)?,
            instances: db.instances,
            port: db.port,
            default_database_name: Some(db.default_database_name.clone()),
            subnets: SubnetSelection::group(&db.subnet_group),
            security_groups: vec![&database_security_group],
            credentials: &secret,
        },
    )?;

    graph.validate()?;
    info!(
        "Declared topology {} in {} with {} resources",
        graph.name(),
        config.region,
        graph.len()
    );

    Ok(Topology {
        graph,
        network,
        alb_security_group,
        instance_security_group,
        instance_role,
        launch_template,
        auto_scaling_group,
        target_group,
        load_balancer,
        listener,
        database_security_group,
        secret,
        database,
    })
}
