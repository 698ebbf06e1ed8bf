//! Persisted state snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use stratus_core::{DeclarationError, LogicalId, Reference, ResourceKind, Value};

use crate::error::{EngineError, EngineResult};

const STATE_SUFFIX: &str = ".state.json";

/// A realized resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub physical_id: String,
    /// Properties as declared at the last apply, references unresolved.
    /// Future plans diff against these.
    pub properties: BTreeMap<String, Value>,
    /// Properties with every reference replaced by its realized value.
    #[serde(default)]
    pub resolved: BTreeMap<String, Value>,
    #[serde(default)]
    pub dependencies: BTreeSet<LogicalId>,
    /// Generated attributes such as `GroupId` or `Arn`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Everything an engine knows about one realized stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Incremented on every apply that changes something.
    pub serial: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
    pub resources: BTreeMap<LogicalId, ResourceState>,
}

impl StateSnapshot {
    pub fn new(stack: impl Into<String>, region: Option<String>) -> Self {
        Self {
            stack: stack.into(),
            region,
            serial: 0,
            deployment_id: None,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }

    /// State file for `stack` inside `dir`.
    pub fn path_for(dir: &Path, stack: &str) -> PathBuf {
        dir.join(format!("{}{}", stack, STATE_SUFFIX))
    }

    /// Load a snapshot, or `None` if the file does not exist.
    pub async fn load(path: &Path) -> EngineResult<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let snapshot = serde_json::from_str(&content)?;
                debug!("Loaded state from {}", path.display());
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the snapshot, replacing any previous file atomically.
    pub async fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// Every snapshot stored in `dir`.
    pub async fn load_all(dir: &Path) -> EngineResult<Vec<Self>> {
        let mut snapshots = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshots),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_state = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(STATE_SUFFIX));
            if is_state {
                if let Some(snapshot) = Self::load(&path).await? {
                    snapshots.push(snapshot);
                }
            }
        }
        Ok(snapshots)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn physical_id(&self, id: &LogicalId) -> Option<&str> {
        self.resources.get(id).map(|r| r.physical_id.as_str())
    }

    /// Realized value of a reference: the physical id, or a generated
    /// attribute.
    pub fn resolve(&self, reference: &Reference) -> Option<String> {
        let resource = self.resources.get(&reference.target)?;
        match &reference.attribute {
            None => Some(resource.physical_id.clone()),
            Some(attribute) => resource.attributes.get(attribute).cloned(),
        }
    }

    /// Teardown order over the stored dependencies: dependents first.
    pub fn destroy_order(&self) -> EngineResult<Vec<LogicalId>> {
        let mut remaining: BTreeMap<&LogicalId, BTreeSet<&LogicalId>> = self
            .resources
            .iter()
            .map(|(id, r)| {
                let deps = r.dependencies.iter().filter(|d| self.resources.contains_key(*d)).collect();
                (id, deps)
            })
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            // Leaves: nothing remaining depends on them.
            let depended_on: BTreeSet<&LogicalId> = remaining.values().flatten().copied().collect();
            let leaves: Vec<&LogicalId> = remaining
                .keys()
                .filter(|id| !depended_on.contains(*id))
                .copied()
                .collect();
            if leaves.is_empty() {
                let cycle = remaining.keys().map(|id| (*id).clone()).collect();
                return Err(EngineError::Declaration(DeclarationError::DependencyCycle(cycle)));
            }
            for leaf in leaves {
                remaining.remove(leaf);
                order.push(leaf.clone());
            }
        }
        Ok(order)
    }
}
