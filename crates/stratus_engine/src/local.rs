//! Local provisioning engine.
//!
//! Realizes graphs against a simulated provider: physical ids and generated
//! attributes are minted locally and state is kept in memory or in one JSON
//! file per stack. Provider-side refusals (quotas, name collisions, region
//! capabilities, injected failures) are simulated so apply-time failure
//! handling can be exercised end to end.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stratus_core::{check_stack_name, LogicalId, Reference, ResourceGraph, ResourceKind, Value};

use crate::engine::{ApplyReport, DestroyReport, ProvisioningEngine};
use crate::error::{ApplyError, ApplyFailureKind, EngineResult};
use crate::plan::{Change, ChangeAction, ChangeSet};
use crate::state::{ResourceState, StateSnapshot};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_ACCOUNT: &str = "000000000000";

#[derive(Debug, Clone)]
struct InjectedFailure {
    kind: ApplyFailureKind,
    message: String,
}

/// Engine that keeps its state locally.
#[derive(Clone)]
pub struct LocalEngine {
    /// Where state files live; `None` keeps state in memory only.
    state_dir: Option<PathBuf>,
    account_id: String,
    states: Arc<RwLock<BTreeMap<String, StateSnapshot>>>,
    /// Per-kind resource limits across every stack the engine manages.
    quotas: Arc<RwLock<BTreeMap<ResourceKind, usize>>>,
    failures: Arc<RwLock<BTreeMap<LogicalId, InjectedFailure>>>,
    /// `(region, instance type)` pairs the provider refuses.
    unsupported: Arc<RwLock<BTreeSet<(String, String)>>>,
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalEngine {
    /// Engine persisting state under `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: Some(state_dir.into()),
            ..Self::in_memory()
        }
    }

    /// Engine keeping state in memory.
    pub fn in_memory() -> Self {
        Self {
            state_dir: None,
            account_id: DEFAULT_ACCOUNT.to_string(),
            states: Arc::new(RwLock::new(BTreeMap::new())),
            quotas: Arc::new(RwLock::new(BTreeMap::new())),
            failures: Arc::new(RwLock::new(BTreeMap::new())),
            unsupported: Arc::new(RwLock::new(BTreeSet::new())),
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    /// Limit how many resources of `kind` may exist across all stacks.
    pub fn with_quota(self, kind: ResourceKind, limit: usize) -> Self {
        self.quotas.write().insert(kind, limit);
        self
    }

    /// Make every operation on `id` fail with the given kind and message.
    pub fn inject_failure(self, id: &LogicalId, kind: ApplyFailureKind, message: impl Into<String>) -> Self {
        self.failures.write().insert(
            id.clone(),
            InjectedFailure {
                kind,
                message: message.into(),
            },
        );
        self
    }

    /// Refuse an instance type in one region.
    pub fn with_unsupported_instance_type(self, region: impl Into<String>, instance_type: impl Into<String>) -> Self {
        self.unsupported.write().insert((region.into(), instance_type.into()));
        self
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    pub fn state_dir(&self) -> Option<&Path> {
        self.state_dir.as_deref()
    }

    /// State file of `stack`, or `None` when state is kept in memory.
    fn state_path(&self, stack: &str) -> EngineResult<Option<PathBuf>> {
        check_stack_name(stack)?;
        Ok(self.state_dir.as_deref().map(|dir| StateSnapshot::path_for(dir, stack)))
    }

    async fn load(&self, stack: &str) -> EngineResult<Option<StateSnapshot>> {
        match self.state_path(stack)? {
            Some(path) => StateSnapshot::load(&path).await,
            None => Ok(self.cached(stack)),
        }
    }

    fn cached(&self, stack: &str) -> Option<StateSnapshot> {
        self.states.read().get(stack).cloned()
    }

    fn cached_all(&self) -> Vec<StateSnapshot> {
        self.states.read().values().cloned().collect()
    }

    async fn store(&self, snapshot: &StateSnapshot) -> EngineResult<()> {
        if let Some(path) = self.state_path(&snapshot.stack)? {
            snapshot.save(&path).await?;
        }
        self.states.write().insert(snapshot.stack.clone(), snapshot.clone());
        Ok(())
    }

    async fn remove(&self, stack: &str) -> EngineResult<()> {
        if let Some(path) = self.state_path(stack)? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.states.write().remove(stack);
        Ok(())
    }

    async fn other_stacks(&self, stack: &str) -> EngineResult<Vec<StateSnapshot>> {
        let all = match &self.state_dir {
            Some(dir) => StateSnapshot::load_all(dir).await?,
            None => self.cached_all(),
        };
        Ok(all.into_iter().filter(|s| s.stack != stack).collect())
    }

    fn injected(&self, id: &LogicalId) -> Option<ApplyError> {
        self.failures
            .read()
            .get(id)
            .map(|f| ApplyError::new(id, f.kind, f.message.clone()))
    }

    /// Carry out one change against `state`.
    fn execute(
        &self,
        change: &Change,
        graph: &ResourceGraph,
        region: &str,
        others: &[StateSnapshot],
        state: &mut StateSnapshot,
    ) -> Result<(), ApplyError> {
        if let Some(error) = self.injected(&change.id) {
            return Err(error);
        }

        if change.action == ChangeAction::Delete {
            state.resources.remove(&change.id);
            debug!("Deleted {}", change.id);
            return Ok(());
        }

        let resource = graph.get(&change.id).ok_or_else(|| {
            ApplyError::new(&change.id, ApplyFailureKind::Provider, "resource is not declared")
        })?;
        let properties = graph.effective_properties(resource);
        let resolved: BTreeMap<String, Value> = properties
            .iter()
            .map(|(key, value)| value.resolve(&|r: &Reference| state.resolve(r)).map(|v| (key.clone(), v)))
            .collect::<Option<_>>()
            .ok_or_else(|| {
                ApplyError::new(&change.id, ApplyFailureKind::Provider, "a referenced resource has not been realized")
            })?;

        self.preflight(change, &resolved, region, others, state)?;

        let existing = match change.action {
            ChangeAction::Update => state.resources.get(&change.id),
            _ => None,
        };
        let physical_id = match existing {
            Some(existing) => existing.physical_id.clone(),
            None => self.physical_id(resource.kind, &change.id, region, &resolved),
        };
        let attributes = self.attributes(resource.kind, &physical_id, region, existing);

        debug!("{} {} as {}", change.action, change.id, physical_id);
        state.resources.insert(
            change.id.clone(),
            ResourceState {
                kind: resource.kind,
                physical_id,
                properties,
                resolved,
                dependencies: resource.dependencies(),
                attributes,
            },
        );
        Ok(())
    }

    /// Provider-side checks before a resource is realized.
    fn preflight(
        &self,
        change: &Change,
        resolved: &BTreeMap<String, Value>,
        region: &str,
        others: &[StateSnapshot],
        state: &StateSnapshot,
    ) -> Result<(), ApplyError> {
        let creates = matches!(change.action, ChangeAction::Create | ChangeAction::Replace);

        if creates {
            if let Some(limit) = self.quotas.read().get(&change.kind).copied() {
                let elsewhere = others
                    .iter()
                    .flat_map(|s| s.resources.values())
                    .filter(|r| r.kind == change.kind)
                    .count();
                // A replaced resource is swapped, not added.
                let here = state
                    .resources
                    .iter()
                    .filter(|(id, r)| r.kind == change.kind && **id != change.id)
                    .count();
                let in_use = elsewhere + here;
                if in_use >= limit {
                    return Err(ApplyError::new(
                        &change.id,
                        ApplyFailureKind::QuotaExceeded,
                        format!("The maximum number of {} resources ({}) has been reached", change.kind, limit),
                    ));
                }
            }
        }

        let name_property = change.kind.name_property();
        let renamed = name_property.is_some_and(|p| change.changed.iter().any(|c| c == p));
        if let (Some(property), true) = (name_property, creates || renamed) {
            if let Some(name) = resolved.get(property).and_then(Value::as_str) {
                let owner = others
                    .iter()
                    .map(|s| (s.stack.as_str(), s))
                    .chain(std::iter::once((state.stack.as_str(), state)))
                    .find(|(_, s)| {
                        s.resources.iter().any(|(id, r)| {
                            *id != change.id
                                && r.kind == change.kind
                                && r.resolved.get(property).and_then(Value::as_str) == Some(name)
                        })
                    })
                    .map(|(stack, _)| stack.to_string());
                if let Some(owner) = owner {
                    return Err(ApplyError::new(
                        &change.id,
                        ApplyFailureKind::NameCollision,
                        format!("{} '{}' already exists in stack {}", change.kind, name, owner),
                    ));
                }
            }
        }

        if let Some(instance_type) = instance_type(change.kind, resolved) {
            let refused = self
                .unsupported
                .read()
                .contains(&(region.to_string(), instance_type.to_string()));
            if refused {
                return Err(ApplyError::new(
                    &change.id,
                    ApplyFailureKind::UnsupportedCapability,
                    format!("The requested instance type {} is not supported in {}", instance_type, region),
                ));
            }
        }

        Ok(())
    }

    fn physical_id(&self, kind: ResourceKind, id: &LogicalId, region: &str, resolved: &BTreeMap<String, Value>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        if kind.is_arn_identified() {
            let name = kind
                .name_property()
                .and_then(|p| resolved.get(p))
                .and_then(Value::as_str)
                .unwrap_or(id.as_str());
            format!(
                "arn:aws:{}:{}:{}:{}/{}/{}",
                service(kind),
                region,
                self.account_id,
                kind.id_prefix(),
                name,
                &suffix[..16]
            )
        } else {
            format!("{}-{}", kind.id_prefix(), &suffix[..17])
        }
    }

    fn attributes(
        &self,
        kind: ResourceKind,
        physical_id: &str,
        region: &str,
        existing: Option<&ResourceState>,
    ) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        let arn = if kind.is_arn_identified() {
            physical_id.to_string()
        } else {
            format!(
                "arn:aws:{}:{}:{}:{}/{}",
                service(kind),
                region,
                self.account_id,
                kind.id_prefix(),
                physical_id
            )
        };
        attributes.insert("Arn".to_string(), arn);

        match kind {
            ResourceKind::SecurityGroup => {
                attributes.insert("GroupId".to_string(), physical_id.to_string());
            }
            ResourceKind::Eip => {
                attributes.insert("AllocationId".to_string(), physical_id.to_string());
            }
            ResourceKind::LaunchTemplate => {
                let version = existing
                    .and_then(|e| e.attributes.get("LatestVersionNumber"))
                    .and_then(|v| v.parse::<u64>().ok())
                    .map_or(1, |v| v + 1);
                attributes.insert("LatestVersionNumber".to_string(), version.to_string());
            }
            ResourceKind::LoadBalancer => {
                let host = physical_id.rsplit('/').next().unwrap_or(physical_id);
                attributes.insert(
                    "DNSName".to_string(),
                    format!("{}.{}.elb.amazonaws.com", host, region),
                );
            }
            ResourceKind::DbCluster => {
                attributes.insert(
                    "Endpoint.Address".to_string(),
                    format!("{}.cluster.{}.rds.amazonaws.com", physical_id, region),
                );
            }
            _ => {}
        }
        attributes
    }
}

/// Service segment of an ARN, e.g. `ec2` or `elasticloadbalancing`.
fn service(kind: ResourceKind) -> String {
    let service = kind.type_name().split("::").nth(1).unwrap_or("aws").to_lowercase();
    service.trim_end_matches("v2").to_string()
}

fn instance_type(kind: ResourceKind, resolved: &BTreeMap<String, Value>) -> Option<&str> {
    match kind {
        ResourceKind::LaunchTemplate => resolved
            .get("LaunchTemplateData")
            .and_then(|d| d.get("InstanceType"))
            .and_then(Value::as_str),
        ResourceKind::DbInstance => resolved.get("DBInstanceClass").and_then(Value::as_str),
        _ => None,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl ProvisioningEngine for LocalEngine {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn plan(&self, graph: &ResourceGraph) -> EngineResult<ChangeSet> {
        graph.validate()?;
        let previous = self.load(graph.name()).await?;
        ChangeSet::compute(previous.as_ref(), graph)
    }

    async fn apply(&self, graph: &ResourceGraph) -> EngineResult<ApplyReport> {
        graph.validate()?;
        let started_at = Utc::now();
        let timer = Instant::now();
        let deployment_id = Uuid::new_v4();

        let previous = self.load(graph.name()).await?;
        let changes = ChangeSet::compute(previous.as_ref(), graph)?;
        if changes.is_empty() {
            info!("Stack {} is up to date", graph.name());
            return Ok(ApplyReport {
                stack: graph.name().to_string(),
                deployment_id,
                changes,
                started_at,
                finished_at: Utc::now(),
                duration_ms: elapsed_ms(timer),
            });
        }

        info!("Applying {} to {}: {}", deployment_id, graph.name(), changes.summary());
        let others = self.other_stacks(graph.name()).await?;
        let region = graph.region().unwrap_or(DEFAULT_REGION).to_string();
        let mut state = previous
            .unwrap_or_else(|| StateSnapshot::new(graph.name(), graph.region().map(str::to_string)));
        state.region = graph.region().map(str::to_string);
        state.deployment_id = Some(deployment_id);

        let mut completed = Vec::new();
        for change in changes.iter() {
            if let Err(error) = self.execute(change, graph, &region, &others, &mut state) {
                warn!(
                    "Apply of {} stopped at {} after {} changes: {}",
                    graph.name(),
                    change.id,
                    completed.len(),
                    error
                );
                state.serial += 1;
                state.updated_at = Utc::now();
                self.store(&state).await?;
                return Err(error.with_completed(completed).into());
            }
            completed.push(change.id.clone());
        }

        state.serial += 1;
        state.updated_at = Utc::now();
        self.store(&state).await?;

        let duration_ms = elapsed_ms(timer);
        info!("Applied {} changes to {} in {}ms", completed.len(), graph.name(), duration_ms);
        Ok(ApplyReport {
            stack: graph.name().to_string(),
            deployment_id,
            changes,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        })
    }

    async fn destroy(&self, stack: &str) -> EngineResult<DestroyReport> {
        let timer = Instant::now();
        let Some(mut state) = self.load(stack).await? else {
            warn!("Stack {} has no state, nothing to destroy", stack);
            return Ok(DestroyReport {
                stack: stack.to_string(),
                deleted: Vec::new(),
                duration_ms: elapsed_ms(timer),
            });
        };

        let teardown = ChangeSet::teardown(&state)?;
        let mut deleted = Vec::new();
        for change in teardown.iter() {
            if let Some(error) = self.injected(&change.id) {
                warn!("Destroy of {} stopped at {}: {}", stack, change.id, error);
                state.serial += 1;
                state.updated_at = Utc::now();
                self.store(&state).await?;
                return Err(error.with_completed(deleted).into());
            }
            state.resources.remove(&change.id);
            deleted.push(change.id.clone());
        }

        self.remove(stack).await?;
        let duration_ms = elapsed_ms(timer);
        info!("Destroyed {} ({} resources) in {}ms", stack, deleted.len(), duration_ms);
        Ok(DestroyReport {
            stack: stack.to_string(),
            deleted,
            duration_ms,
        })
    }

    async fn state(&self, stack: &str) -> EngineResult<Option<StateSnapshot>> {
        self.load(stack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use stratus_core::Resource;
    use tempfile::TempDir;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn graph(stack: &str, group_name: &str) -> ResourceGraph {
        let mut graph = ResourceGraph::new(stack).with_region("eu-west-1");
        let vpc = graph
            .add(Resource::new(id("Vpc"), ResourceKind::Vpc).with_property("CidrBlock", "10.0.0.0/16"))
            .unwrap();
        let sg = graph
            .add(
                Resource::new(id("Sg"), ResourceKind::SecurityGroup)
                    .with_property("VpcId", Value::reference(&vpc))
                    .with_property("GroupName", group_name)
                    .with_property("GroupDescription", "web"),
            )
            .unwrap();
        graph
            .add(
                Resource::new(id("Ingress"), ResourceKind::SecurityGroupIngress)
                    .with_property("GroupId", Value::get_att(&sg, "GroupId"))
                    .with_property("FromPort", 80i64),
            )
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_apply_resolves_references() {
        let engine = LocalEngine::in_memory();
        let report = engine.apply(&graph("Demo", "web")).await.unwrap();
        assert_eq!(report.changes.count(ChangeAction::Create), 3);

        let state = engine.state("Demo").await.unwrap().unwrap();
        let vpc_id = state.physical_id(&id("Vpc")).unwrap().to_string();
        let sg = &state.resources[&id("Sg")];
        assert!(vpc_id.starts_with("vpc-"));
        assert_eq!(sg.resolved["VpcId"], Value::from(vpc_id));

        let ingress = &state.resources[&id("Ingress")];
        assert_eq!(ingress.resolved["GroupId"], Value::from(sg.physical_id.clone()));
        assert_eq!(state.serial, 1);
    }

    #[tokio::test]
    async fn test_second_apply_is_noop() {
        let engine = LocalEngine::in_memory();
        engine.apply(&graph("Demo", "web")).await.unwrap();
        let report = engine.apply(&graph("Demo", "web")).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(engine.state("Demo").await.unwrap().unwrap().serial, 1);
    }

    #[tokio::test]
    async fn test_name_collision_across_stacks() {
        let engine = LocalEngine::in_memory();
        engine.apply(&graph("First", "web")).await.unwrap();

        let error = engine.apply(&graph("Second", "web")).await.unwrap_err();
        match error {
            EngineError::Apply(error) => {
                assert_eq!(error.kind, ApplyFailureKind::NameCollision);
                assert_eq!(error.resource, id("Sg"));
                assert_eq!(error.completed, vec![id("Vpc")]);
            }
            other => panic!("expected apply error, got {:?}", other),
        }

        // Partial state is kept for inspection.
        let partial = engine.state("Second").await.unwrap().unwrap();
        assert_eq!(partial.resources.len(), 1);
        engine.apply(&graph("Second", "other")).await.unwrap();
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let engine = LocalEngine::in_memory().with_quota(ResourceKind::Vpc, 1);
        engine.apply(&graph("First", "a")).await.unwrap();

        let error = engine.apply(&graph("Second", "b")).await.unwrap_err();
        assert!(matches!(
            error,
            EngineError::Apply(ApplyError { kind: ApplyFailureKind::QuotaExceeded, .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_then_retry() {
        let engine = LocalEngine::in_memory().inject_failure(
            &id("Ingress"),
            ApplyFailureKind::PermissionDenied,
            "not authorized to perform ec2:AuthorizeSecurityGroupIngress",
        );

        let error = engine.apply(&graph("Demo", "web")).await.unwrap_err();
        match error {
            EngineError::Apply(error) => {
                assert_eq!(error.kind, ApplyFailureKind::PermissionDenied);
                assert_eq!(error.message, "not authorized to perform ec2:AuthorizeSecurityGroupIngress");
                assert_eq!(error.completed.len(), 2);
            }
            other => panic!("expected apply error, got {:?}", other),
        }

        engine.clear_failures();
        let plan = engine.plan(&graph("Demo", "web")).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.changes[0].id, id("Ingress"));

        let report = engine.apply(&graph("Demo", "web")).await.unwrap();
        assert_eq!(report.changes.count(ChangeAction::Create), 1);
    }

    #[tokio::test]
    async fn test_replace_mints_new_physical_id() {
        let engine = LocalEngine::in_memory();
        engine.apply(&graph("Demo", "web")).await.unwrap();
        let before = engine.state("Demo").await.unwrap().unwrap();

        let report = engine.apply(&graph("Demo", "renamed")).await.unwrap();
        assert_eq!(report.changes.get(&id("Sg")).unwrap().action, ChangeAction::Replace);
        // GroupId changed, so the ingress rule is replaced too.
        assert_eq!(report.changes.get(&id("Ingress")).unwrap().action, ChangeAction::Replace);

        let after = engine.state("Demo").await.unwrap().unwrap();
        assert_eq!(before.physical_id(&id("Vpc")), after.physical_id(&id("Vpc")));
        assert_ne!(before.physical_id(&id("Sg")), after.physical_id(&id("Sg")));
    }

    #[tokio::test]
    async fn test_state_persists_across_engines() {
        let dir = TempDir::new().unwrap();
        LocalEngine::new(dir.path()).apply(&graph("Demo", "web")).await.unwrap();
        assert!(dir.path().join("Demo.state.json").exists());

        let engine = LocalEngine::new(dir.path());
        assert!(engine.plan(&graph("Demo", "web")).await.unwrap().is_empty());

        let report = engine.destroy("Demo").await.unwrap();
        assert_eq!(report.deleted.first(), Some(&id("Ingress")));
        assert_eq!(report.deleted.last(), Some(&id("Vpc")));
        assert!(!dir.path().join("Demo.state.json").exists());
        assert!(engine.state("Demo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_destroy_unknown_stack() {
        let report = LocalEngine::in_memory().destroy("Nothing").await.unwrap();
        assert!(report.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_stack_name_cannot_leave_state_dir() {
        let root = TempDir::new().unwrap();
        let state_dir = root.path().join("state");
        let outside = root.path().join("victim.state.json");
        std::fs::write(&outside, "{}").unwrap();

        let engine = LocalEngine::new(&state_dir);
        assert!(matches!(engine.destroy("../victim").await, Err(EngineError::Declaration(_))));
        assert!(matches!(engine.state("../victim").await, Err(EngineError::Declaration(_))));
        assert!(matches!(
            engine.apply(&graph("../victim", "web")).await,
            Err(EngineError::Declaration(_))
        ));
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn test_dangling_graph_never_applied() {
        let engine = LocalEngine::in_memory();
        let mut graph = graph("Demo", "web");
        graph
            .add(
                Resource::new(id("Orphan"), ResourceKind::Subnet)
                    .with_property("VpcId", Value::reference(&id("Missing"))),
            )
            .unwrap();

        assert!(matches!(engine.apply(&graph).await, Err(EngineError::Declaration(_))));
        assert!(engine.state("Demo").await.unwrap().is_none());
    }

    #[test]
    fn test_service_names() {
        assert_eq!(service(ResourceKind::LoadBalancer), "elasticloadbalancing");
        assert_eq!(service(ResourceKind::Secret), "secretsmanager");
        assert_eq!(service(ResourceKind::Vpc), "ec2");
    }
}
