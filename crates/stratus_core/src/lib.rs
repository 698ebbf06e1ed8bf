//! # stratus_core
//!
//! Resource graph model for Stratus.
//!
//! A topology is declared as an explicit [`ResourceGraph`]: builders take the
//! graph as a `&mut` parameter, add [`Resource`]s to it, and hand back typed
//! handles. Cross-resource attributes are carried as symbolic
//! [`Reference`]s which a provisioning engine resolves only at apply time.
//!
//! ## Features
//!
//! - Validated logical ids and provider resource kinds
//! - Deferred reference values (`Ref`, `GetAtt`, `Join`)
//! - Dangling reference and dependency cycle detection
//! - Deterministic topological ordering for create and destroy
//! - IPv4 CIDR parsing and subnet allocation
//! - Manifest rendering for hand-off to an engine
//!
//! ## Example
//!
//! ```rust
//! use stratus_core::{LogicalId, Resource, ResourceGraph, ResourceKind, Value};
//!
//! let mut graph = ResourceGraph::new("Demo");
//! let vpc = graph
//!     .add(Resource::new(LogicalId::new("Vpc").unwrap(), ResourceKind::Vpc)
//!         .with_property("CidrBlock", "10.0.0.0/16"))
//!     .unwrap();
//! graph
//!     .add(Resource::new(LogicalId::new("Igw").unwrap(), ResourceKind::InternetGateway)
//!         .with_property("VpcId", Value::reference(&vpc)))
//!     .unwrap();
//!
//! graph.validate().unwrap();
//! assert_eq!(graph.topological_order().unwrap()[0].as_str(), "Vpc");
//! ```

pub mod cidr;
pub mod error;
pub mod graph;
pub mod id;
pub mod manifest;
pub mod resource;
pub mod value;

pub use cidr::{CidrAllocator, Ipv4Cidr};
pub use error::{DeclarationError, DeclarationResult};
pub use graph::ResourceGraph;
pub use id::{check_stack_name, LogicalId};
pub use manifest::{Manifest, ManifestFormat};
pub use resource::{Resource, ResourceKind};
pub use value::{Reference, Value};
