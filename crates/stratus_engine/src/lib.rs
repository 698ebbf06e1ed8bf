//! # stratus_engine
//!
//! Planning and realization of Stratus resource graphs.
//!
//! A [`ProvisioningEngine`] diffs a [`ResourceGraph`](stratus_core::ResourceGraph)
//! against the [`StateSnapshot`] it owns for the stack, produces a
//! [`ChangeSet`], and converges realized infrastructure onto the graph.
//! Deferred references are resolved only here, while applying.
//!
//! ## Features
//!
//! - Change sets with create, update, replace and delete actions
//! - JSON state snapshots, one per stack
//! - [`LocalEngine`]: a simulated provider with quotas, name collisions and
//!   injected failures
//! - [`Deployer`]: blocks invalid graphs before they reach an engine
//!
//! ## Example
//!
//! ```rust,no_run
//! use stratus_core::{LogicalId, Resource, ResourceGraph, ResourceKind};
//! use stratus_engine::{LocalEngine, ProvisioningEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut graph = ResourceGraph::new("Demo").with_region("eu-west-1");
//!     graph.add(
//!         Resource::new(LogicalId::new("Vpc")?, ResourceKind::Vpc)
//!             .with_property("CidrBlock", "10.0.0.0/16"),
//!     )?;
//!
//!     let engine = LocalEngine::new(".stratus");
//!     let report = engine.apply(&graph).await?;
//!     println!("{}", report.changes.summary());
//!
//!     // Nothing left to do the second time.
//!     assert!(engine.plan(&graph).await?.is_empty());
//!     Ok(())
//! }
//! ```

pub mod deployer;
pub mod engine;
pub mod error;
pub mod local;
pub mod plan;
pub mod state;

pub use deployer::{DeployOutcome, Deployer};
pub use engine::{ApplyReport, DestroyReport, ProvisioningEngine};
pub use error::{ApplyError, ApplyFailureKind, EngineError, EngineResult};
pub use local::LocalEngine;
pub use plan::{Change, ChangeAction, ChangeSet};
pub use state::{ResourceState, StateSnapshot};
