//! Provisioning engine trait and report types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stratus_core::{LogicalId, ResourceGraph};

use crate::error::EngineResult;
use crate::plan::ChangeSet;
use crate::state::StateSnapshot;

/// Outcome of a successful apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub stack: String,
    pub deployment_id: Uuid,
    /// Changes that were carried out.
    pub changes: ChangeSet,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ApplyReport {
    /// Whether the apply found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Outcome of a successful destroy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyReport {
    pub stack: String,
    /// Removed resources, in removal order.
    pub deleted: Vec<LogicalId>,
    pub duration_ms: u64,
}

/// Converges realized infrastructure onto a resource graph.
///
/// Engines own the state snapshot for each stack they manage and resolve
/// deferred references only while applying.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &'static str;

    /// Compute the change set an apply would carry out.
    async fn plan(&self, graph: &ResourceGraph) -> EngineResult<ChangeSet>;

    /// Realize the graph.
    async fn apply(&self, graph: &ResourceGraph) -> EngineResult<ApplyReport>;

    /// Tear down every resource of a stack, dependents first.
    async fn destroy(&self, stack: &str) -> EngineResult<DestroyReport>;

    /// Current state of a stack, if it was ever applied.
    async fn state(&self, stack: &str) -> EngineResult<Option<StateSnapshot>>;
}
