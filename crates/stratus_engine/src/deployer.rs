//! Deployment front end over a provisioning engine.

use tracing::{info, warn};

use stratus_core::ResourceGraph;

use crate::engine::{ApplyReport, DestroyReport, ProvisioningEngine};
use crate::error::{EngineError, EngineResult};
use crate::plan::ChangeSet;
use crate::state::StateSnapshot;

/// What a deploy did.
#[derive(Debug, Clone)]
pub enum DeployOutcome {
    /// Dry run: the changes an apply would carry out.
    Planned(ChangeSet),
    Applied(ApplyReport),
}

/// Validates graphs before they reach the engine, then delegates.
pub struct Deployer<E> {
    engine: E,
    dry_run: bool,
}

impl<E: ProvisioningEngine> Deployer<E> {
    pub fn new(engine: E) -> Self {
        Self { engine, dry_run: false }
    }

    /// Only plan; never apply.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub async fn plan(&self, graph: &ResourceGraph) -> EngineResult<ChangeSet> {
        graph.validate()?;
        self.engine.plan(graph).await
    }

    pub async fn deploy(&self, graph: &ResourceGraph) -> EngineResult<DeployOutcome> {
        graph.validate()?;
        info!(
            "Deploying {} ({} resources) with the {} engine",
            graph.name(),
            graph.len(),
            self.engine.name()
        );

        if self.dry_run {
            let changes = self.engine.plan(graph).await?;
            info!("Dry run for {}: {}", graph.name(), changes.summary());
            return Ok(DeployOutcome::Planned(changes));
        }

        match self.engine.apply(graph).await {
            Ok(report) => Ok(DeployOutcome::Applied(report)),
            Err(EngineError::Apply(error)) => {
                warn!(
                    "Deployment of {} failed at {}; {} resources were realized before the failure",
                    graph.name(),
                    error.resource,
                    error.completed.len()
                );
                Err(EngineError::Apply(error))
            }
            Err(other) => Err(other),
        }
    }

    /// Tear a stack down. In dry-run mode only the teardown plan is
    /// returned, wrapped as an empty report.
    pub async fn destroy(&self, stack: &str) -> EngineResult<DestroyReport> {
        if self.dry_run {
            let deleted = match self.engine.state(stack).await? {
                Some(state) => ChangeSet::teardown(&state)?.iter().map(|c| c.id.clone()).collect(),
                None => Vec::new(),
            };
            info!("Dry run: destroying {} would remove {} resources", stack, deleted.len());
            return Ok(DestroyReport {
                stack: stack.to_string(),
                deleted,
                duration_ms: 0,
            });
        }
        self.engine.destroy(stack).await
    }

    pub async fn state(&self, stack: &str) -> EngineResult<Option<StateSnapshot>> {
        self.engine.state(stack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockProvisioningEngine;
    use crate::error::{ApplyError, ApplyFailureKind};
    use stratus_core::{LogicalId, Resource, ResourceKind, Value};

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn valid_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new("Demo");
        graph
            .add(Resource::new(id("Vpc"), ResourceKind::Vpc).with_property("CidrBlock", "10.0.0.0/16"))
            .unwrap();
        graph
    }

    fn dangling_graph() -> ResourceGraph {
        let mut graph = valid_graph();
        graph
            .add(
                Resource::new(id("Subnet"), ResourceKind::Subnet)
                    .with_property("VpcId", Value::reference(&id("Elsewhere"))),
            )
            .unwrap();
        graph
    }

    fn engine() -> MockProvisioningEngine {
        let mut engine = MockProvisioningEngine::new();
        engine.expect_name().return_const("mock");
        engine
    }

    #[tokio::test]
    async fn test_invalid_graph_never_reaches_engine() {
        let mut engine = engine();
        engine.expect_apply().never();
        engine.expect_plan().never();

        let deployer = Deployer::new(engine);
        assert!(matches!(
            deployer.deploy(&dangling_graph()).await,
            Err(EngineError::Declaration(_))
        ));
        assert!(matches!(
            deployer.plan(&dangling_graph()).await,
            Err(EngineError::Declaration(_))
        ));
    }

    #[tokio::test]
    async fn test_dry_run_only_plans() {
        let mut engine = engine();
        engine.expect_apply().never();
        engine
            .expect_plan()
            .times(1)
            .returning(|graph| ChangeSet::compute(None, graph));

        let outcome = Deployer::new(engine).dry_run(true).deploy(&valid_graph()).await.unwrap();
        match outcome {
            DeployOutcome::Planned(changes) => assert_eq!(changes.len(), 1),
            other => panic!("expected a plan, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_apply_error_passes_through() {
        let mut engine = engine();
        engine.expect_apply().times(1).returning(|_| {
            Err(ApplyError::new(&id("Vpc"), ApplyFailureKind::QuotaExceeded, "The maximum number of VPCs has been reached.").into())
        });

        let error = Deployer::new(engine).deploy(&valid_graph()).await.unwrap_err();
        match error {
            EngineError::Apply(error) => {
                assert_eq!(error.message, "The maximum number of VPCs has been reached.");
            }
            other => panic!("expected apply error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dry_run_destroy_reports_teardown() {
        let mut engine = engine();
        engine.expect_destroy().never();
        engine.expect_state().returning(|_| Ok(None));

        let report = Deployer::new(engine).dry_run(true).destroy("Demo").await.unwrap();
        assert!(report.deleted.is_empty());
    }
}
