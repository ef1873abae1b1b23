//! Ensembles materialized so far in the current step
//!
//! Selection predicates consult this list to avoid claiming components
//! already taken by higher-priority ensembles. Queries are typed on the
//! ensemble struct, so "other ensembles of my kind" is a filter on a
//! recorded [`TypeId`] rather than an inspection of ensemble objects.

use crate::core::types::{ComponentId, EnsembleId};
use std::any::TypeId;

/// Members a single role selected
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSelection {
    pub role: &'static str,
    pub members: Vec<ComponentId>,
}

/// Snapshot of one successfully materialized ensemble instance
#[derive(Debug, Clone)]
pub struct MaterializedEnsemble {
    pub id: EnsembleId,
    pub kind: TypeId,
    pub kind_name: &'static str,
    pub priority: f64,
    pub roles: Vec<RoleSelection>,
}

impl MaterializedEnsemble {
    pub fn is<E: 'static>(&self) -> bool {
        self.kind == TypeId::of::<E>()
    }

    /// Members of `role`, empty if the role does not exist
    pub fn members(&self, role: &str) -> &[ComponentId] {
        self.roles
            .iter()
            .find(|r| r.role == role)
            .map(|r| r.members.as_slice())
            .unwrap_or(&[])
    }

    /// True if any role of this ensemble selected `component`
    pub fn contains(&self, component: ComponentId) -> bool {
        self.roles.iter().any(|r| r.members.contains(&component))
    }
}

/// Ordered list of ensembles materialized this step
#[derive(Debug, Clone, Default)]
pub struct Materialized {
    entries: Vec<MaterializedEnsemble>,
}

impl Materialized {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: MaterializedEnsemble) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in materialization (priority) order
    pub fn iter(&self) -> impl Iterator<Item = &MaterializedEnsemble> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<EnsembleId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn get(&self, id: EnsembleId) -> Option<&MaterializedEnsemble> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn contains_ensemble(&self, id: EnsembleId) -> bool {
        self.get(id).is_some()
    }

    /// Materialized ensembles of kind `E`
    pub fn of_kind<E: 'static>(&self) -> impl Iterator<Item = &MaterializedEnsemble> {
        self.entries.iter().filter(|e| e.is::<E>())
    }

    /// True if any materialized ensemble selected `component`
    pub fn claims(&self, component: ComponentId) -> bool {
        self.entries.iter().any(|e| e.contains(component))
    }

    /// True if a materialized ensemble of kind `E` selected `component`
    pub fn claimed_by<E: 'static>(&self, component: ComponentId) -> bool {
        self.of_kind::<E>().any(|e| e.contains(component))
    }

    /// True if `role` of a materialized ensemble of kind `E` selected `component`
    pub fn selected_in<E: 'static>(&self, role: &str, component: ComponentId) -> bool {
        self.of_kind::<E>().any(|e| e.members(role).contains(&component))
    }

    pub fn into_vec(self) -> Vec<MaterializedEnsemble> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a Materialized {
    type Item = &'a MaterializedEnsemble;
    type IntoIter = std::slice::Iter<'a, MaterializedEnsemble>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
