//! # stratus_iac
//!
//! Typed infrastructure builders and the Stratus reference topology.
//!
//! Every builder takes the [`ResourceGraph`](stratus_core::ResourceGraph)
//! it declares into as an explicit `&mut` parameter and returns a typed
//! handle. Handles are how resources are wired together: a launch template
//! takes a `&SecurityGroup` and a `&Role`, never a copied identifier.
//!
//! ## Features
//!
//! - VPC expansion into subnets, route tables, gateways and NAT
//! - Security groups with tier-aware ingress rules
//! - IAM roles, instance profiles and read grants
//! - Generated database credentials in a secret
//! - Launch template, autoscaling group, target group, load balancer, listener
//! - Aurora MySQL cluster placed by subnet group
//! - YAML/TOML stack configuration with deployment overrides
//! - Post-assembly topology checks
//!
//! ## Example
//!
//! ```rust
//! use stratus_iac::{declare_topology, StackConfig, TopologyValidator};
//!
//! let config = StackConfig::default().with_tag("Environment", "dev");
//! let topology = declare_topology(&config).unwrap();
//!
//! let report = TopologyValidator::validate(&topology.graph);
//! assert!(report.passed);
//! ```

pub mod compute;
pub mod config;
pub mod database;
pub mod error;
pub mod iam;
pub mod load_balancing;
pub mod network;
pub mod secret;
pub mod security;
pub mod topology;
pub mod validator;

pub use compute::{
    AutoScalingGroup, AutoScalingGroupProps, Capacity, InstanceType, LaunchTemplate, LaunchTemplateProps,
    MachineImage,
};
pub use config::{
    ComputeConfig, DatabaseConfig, LoadBalancerConfig, NetworkConfig, SecretConfig, StackConfig,
};
pub use database::{ClusterEngine, DatabaseCluster, DatabaseClusterProps};
pub use error::{ConfigError, ConfigResult};
pub use iam::{InstanceProfile, Role, RoleProps, ServicePrincipal};
pub use load_balancing::{
    ApplicationProtocol, Listener, ListenerProps, LoadBalancer, LoadBalancerProps, TargetGroup,
    TargetGroupProps, TargetType,
};
pub use network::{Network, NetworkProps, Subnet, SubnetGroupConfig, SubnetSelection, SubnetType};
pub use secret::{DatabaseSecret, DatabaseSecretProps};
pub use security::{Peer, Port, Protocol, SecurityGroup, SecurityGroupProps, Tier};
pub use topology::{declare_topology, Topology};
pub use validator::{TopologyValidator, ValidationCheck, ValidationReport};
