//! The resource graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DeclarationError, DeclarationResult};
use crate::id::LogicalId;
use crate::resource::{Resource, ResourceKind};
use crate::value::Value;

/// A set of declared resources plus the reference edges between them.
///
/// Builders receive the graph as `&mut ResourceGraph` and add resources to
/// it explicitly; nothing registers itself implicitly. Declaration order is
/// preserved for display, while all ordering decisions use the dependency
/// edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    resources: BTreeMap<LogicalId, Resource>,
    #[serde(default)]
    declared: Vec<LogicalId>,
}

impl ResourceGraph {
    /// Create an empty graph for the named stack.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Properties as they should be realized: the declared properties plus
    /// stack tags on taggable kinds. Tags declared on the resource win over
    /// stack tags with the same key.
    pub fn effective_properties(&self, resource: &Resource) -> BTreeMap<String, Value> {
        let mut properties = resource.properties.clone();
        if self.tags.is_empty() || !resource.kind.is_taggable() {
            return properties;
        }

        let mut merged: BTreeMap<String, Value> = self
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v)))
            .collect();
        if let Some(Value::List(own)) = properties.get("Tags") {
            for tag in own {
                if let (Some(key), Some(value)) = (tag.get("Key").and_then(Value::as_str), tag.get("Value")) {
                    merged.insert(key.to_string(), value.clone());
                }
            }
        }

        let tags = merged
            .into_iter()
            .map(|(key, value)| Value::map([("Key", Value::Str(key)), ("Value", value)]))
            .collect();
        properties.insert("Tags".to_string(), Value::List(tags));
        properties
    }

    /// Add a resource and return its logical id for wiring.
    ///
    /// References held by the resource are not checked here, so resources
    /// may be added in any order; [`validate`](Self::validate) checks the
    /// finished graph.
    pub fn add(&mut self, resource: Resource) -> DeclarationResult<LogicalId> {
        if self.resources.contains_key(&resource.id) {
            return Err(DeclarationError::DuplicateResource(resource.id));
        }
        let id = resource.id.clone();
        debug!("Declaring {} ({})", id, resource.kind);
        self.declared.push(id.clone());
        self.resources.insert(id.clone(), resource);
        Ok(id)
    }

    pub fn get(&self, id: &LogicalId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Get a resource, returning an error if it was never declared.
    pub fn get_required(&self, id: &LogicalId) -> DeclarationResult<&Resource> {
        self.get(id)
            .ok_or_else(|| DeclarationError::UnknownResource(id.clone()))
    }

    /// Mutable access for builders that extend an already declared resource.
    pub fn get_mut(&mut self, id: &LogicalId) -> DeclarationResult<&mut Resource> {
        self.resources
            .get_mut(id)
            .ok_or_else(|| DeclarationError::UnknownResource(id.clone()))
    }

    pub fn contains(&self, id: &LogicalId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.declared.iter().filter_map(|id| self.resources.get(id))
    }

    /// Resources of one kind, in declaration order.
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.iter().filter(move |r| r.kind == kind)
    }

    /// Ids of resources that depend on `id`.
    pub fn dependents(&self, id: &LogicalId) -> BTreeSet<LogicalId> {
        self.resources
            .values()
            .filter(|r| r.dependencies().contains(id))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Check that the graph is complete and acyclic.
    ///
    /// All dangling references are reported together.
    pub fn validate(&self) -> DeclarationResult<()> {
        let mut errors = Vec::new();

        for resource in self.iter() {
            for dependency in resource.dependencies() {
                if !self.resources.contains_key(&dependency) {
                    errors.push(DeclarationError::DanglingReference {
                        from: resource.id.clone(),
                        to: dependency,
                    });
                }
            }
        }

        if let Some(error) = DeclarationError::collect(errors) {
            return Err(error);
        }

        self.topological_order().map(|_| ())
    }

    /// Creation order: every resource after everything it depends on.
    ///
    /// Ties are broken by logical id so the order is stable across runs.
    /// References to undeclared resources are ignored here; use
    /// [`validate`](Self::validate) to catch them.
    pub fn topological_order(&self) -> DeclarationResult<Vec<LogicalId>> {
        let mut in_degree: BTreeMap<&LogicalId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&LogicalId, Vec<&LogicalId>> = BTreeMap::new();
        let dependencies: BTreeMap<&LogicalId, BTreeSet<LogicalId>> = self
            .resources
            .iter()
            .map(|(id, r)| (id, r.dependencies()))
            .collect();

        for (id, deps) in &dependencies {
            let known: Vec<&LogicalId> = deps
                .iter()
                .filter_map(|d| self.resources.get_key_value(d).map(|(k, _)| k))
                .collect();
            in_degree.insert(*id, known.len());
            for dep in known {
                dependents.entry(dep).or_default().push(*id);
            }
        }

        let mut ready: BTreeSet<&LogicalId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.resources.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != self.resources.len() {
            let placed: BTreeSet<&LogicalId> = order.iter().collect();
            let cycle = self
                .resources
                .keys()
                .filter(|id| !placed.contains(id))
                .cloned()
                .collect();
            return Err(DeclarationError::DependencyCycle(cycle));
        }

        Ok(order)
    }

    /// Teardown order: dependents before their dependencies.
    pub fn destroy_order(&self) -> DeclarationResult<Vec<LogicalId>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }
}
