//! Change sets: what an apply would do.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use stratus_core::{LogicalId, ResourceGraph, ResourceKind, Value};

use crate::error::EngineResult;
use crate::state::StateSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    /// Modified in place; the physical id survives.
    Update,
    /// A replacement-trigger property changed; a new physical resource is
    /// created and the old one removed.
    Replace,
    Delete,
}

impl ChangeAction {
    pub fn symbol(&self) -> &'static str {
        match self {
            ChangeAction::Create => "+",
            ChangeAction::Update => "~",
            ChangeAction::Replace => "-/+",
            ChangeAction::Delete => "-",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Replace => "replace",
            ChangeAction::Delete => "delete",
        };
        write!(f, "{}", text)
    }
}

/// One planned change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: LogicalId,
    pub kind: ResourceKind,
    pub action: ChangeAction,
    /// Property names that differ, empty for creates and deletes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>3} {} ({})", self.action.symbol(), self.id, self.kind)?;
        if !self.changed.is_empty() {
            write!(f, " [{}]", self.changed.join(", "))?;
        }
        Ok(())
    }
}

/// Ordered changes that converge realized state onto a graph.
///
/// Creates, updates and replaces come first in dependency order; deletes
/// follow in reverse dependency order of the previous state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub stack: String,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    /// Diff a graph against the previously realized state.
    pub fn compute(previous: Option<&StateSnapshot>, desired: &ResourceGraph) -> EngineResult<Self> {
        let mut changes = Vec::new();
        let mut replaced: BTreeSet<LogicalId> = BTreeSet::new();
        let mut updated: BTreeMap<LogicalId, ResourceKind> = BTreeMap::new();

        for id in desired.topological_order()? {
            let resource = desired.get_required(&id)?;
            let properties = desired.effective_properties(resource);
            let Some(prior) = previous.and_then(|p| p.resources.get(&id)) else {
                changes.push(Change {
                    id,
                    kind: resource.kind,
                    action: ChangeAction::Create,
                    changed: Vec::new(),
                });
                continue;
            };

            if prior.kind != resource.kind {
                replaced.insert(id.clone());
                changes.push(Change {
                    id,
                    kind: resource.kind,
                    action: ChangeAction::Replace,
                    changed: vec!["Type".to_string()],
                });
                continue;
            }

            let mut changed = changed_properties(&prior.properties, &properties);
            // A replaced dependency gets a new physical id, so every
            // property pointing at it changes too. An updated one only moves
            // its volatile attributes.
            for (key, value) in &properties {
                let stale = value.references().iter().any(|r| {
                    replaced.contains(&r.target)
                        || match (updated.get(&r.target), &r.attribute) {
                            (Some(kind), Some(attribute)) => {
                                kind.volatile_attributes().contains(&attribute.as_str())
                            }
                            _ => false,
                        }
                });
                if stale {
                    changed.insert(key.clone());
                }
            }
            if changed.is_empty() {
                continue;
            }

            let replacement = resource.kind.replacement_properties();
            let action = if changed.iter().any(|k| replacement.contains(&k.as_str())) {
                replaced.insert(id.clone());
                ChangeAction::Replace
            } else {
                updated.insert(id.clone(), resource.kind);
                ChangeAction::Update
            };
            changes.push(Change {
                id,
                kind: resource.kind,
                action,
                changed: changed.into_iter().collect(),
            });
        }

        if let Some(previous) = previous {
            for id in previous.destroy_order()? {
                if desired.contains(&id) {
                    continue;
                }
                if let Some(prior) = previous.resources.get(&id) {
                    changes.push(Change {
                        id,
                        kind: prior.kind,
                        action: ChangeAction::Delete,
                        changed: Vec::new(),
                    });
                }
            }
        }

        Ok(Self {
            stack: desired.name().to_string(),
            changes,
        })
    }

    /// Plan for tearing down everything in `state`.
    pub fn teardown(state: &StateSnapshot) -> EngineResult<Self> {
        let changes = state
            .destroy_order()?
            .into_iter()
            .filter_map(|id| {
                let kind = state.resources.get(&id)?.kind;
                Some(Change {
                    id,
                    kind,
                    action: ChangeAction::Delete,
                    changed: Vec::new(),
                })
            })
            .collect();
        Ok(Self {
            stack: state.stack.clone(),
            changes,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn count(&self, action: ChangeAction) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    pub fn get(&self, id: &LogicalId) -> Option<&Change> {
        self.changes.iter().find(|c| &c.id == id)
    }

    /// One-line summary such as `3 to create, 1 to update, 0 to replace, 0 to delete`.
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to replace, {} to delete",
            self.count(ChangeAction::Create),
            self.count(ChangeAction::Update),
            self.count(ChangeAction::Replace),
            self.count(ChangeAction::Delete)
        )
    }
}

fn changed_properties(before: &BTreeMap<String, Value>, after: &BTreeMap<String, Value>) -> BTreeSet<String> {
    before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect()
}
